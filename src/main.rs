mod cli;
mod formatting;
mod settings;

use std::process::ExitCode;

use pagewatch_lib::progress::stdout_progress;
use pagewatch_lib::{BrowserManager, BrowserOptions, MockPageSource, Monitor, RunToken, WatchError};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use url::Url;

use settings::RunOverrides;

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

async fn run() -> ExitCode {
    let args = cli::parse();
    init_logging(args.verbose);

    let config = match settings::resolve_config(&args.config, &RunOverrides::from_cli(&args)) {
        Ok(config) => config,
        Err(err) => return formatting::render_error(&err, args.json),
    };
    let url = match Url::parse(args.url.trim()) {
        Ok(url) => url,
        Err(err) => return formatting::render_error(&WatchError::from(err), args.json),
    };

    let token = RunToken::generate();
    let progress = stdout_progress();
    let result = match MockPageSource::from_env() {
        Some(source) => {
            debug!("serving pages from mock directory");
            Monitor::new(source, config, url, token)
                .with_progress(progress)
                .run()
                .await
        }
        None => {
            let source = BrowserManager::new(
                BrowserOptions::from_env(),
                token.clone(),
                Some(progress.clone()),
            );
            Monitor::new(source, config, url, token)
                .with_progress(progress)
                .run()
                .await
        }
    };

    match result {
        Ok(outcome) => formatting::write_outcome(&outcome, args.json),
        Err(err) => formatting::render_error(&err, args.json),
    }
}

/// Diagnostics go to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
