use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pagewatch_lib::config::parse_duration;
use pagewatch_lib::Viewport;

#[derive(Parser, Debug)]
#[command(name = "pagewatch")]
#[command(
    version,
    about = "Watch a web page for visual and structural change",
    long_about = "pagewatch\n\nLoads URL in headless Chromium, waits until the page stops loading, and walks the DOM into a JSON tree.\nIf the tree differs from the latest snapshot under path.dir, a new snapshot is written and, when there is a\nprevious one, a side-by-side highlight image is rendered to <dir>/diff/<previous>-<current>.png.\n\nExit codes: 0 success, 1 load or runtime failure, 2 invalid configuration or arguments."
)]
pub struct Cli {
    #[arg(value_name = "URL", help = "Page to watch")]
    pub url: String,

    #[arg(
        value_name = "CONFIG",
        help = "Inline JSON configuration, or a path to a .json/.toml/.yaml file"
    )]
    pub config: String,

    #[arg(long, value_name = "PATH", help = "Snapshot root directory (overrides path.dir)")]
    pub root: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Quiet period before the page counts as loaded, e.g. 500 or 1.5s (overrides render.delay)"
    )]
    pub delay: Option<Duration>,

    #[arg(
        long,
        value_name = "DURATION",
        value_parser = parse_duration,
        help = "Give up if the page has not settled after this long (overrides render.maxWait)"
    )]
    pub max_wait: Option<Duration>,

    #[arg(
        long,
        value_name = "WxH",
        help = "Viewport dimensions, e.g. 1280x800 (overrides page.viewportSize)"
    )]
    pub viewport: Option<Viewport>,

    #[arg(long, help = "Enable debug diagnostics on stderr")]
    pub verbose: bool,

    #[arg(long, help = "Print the run outcome as JSON on the last stdout line")]
    pub json: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}
