use std::path::PathBuf;
use std::time::Duration;

use pagewatch_lib::{Result, RunConfig, Viewport};

use crate::cli::Cli;

/// Command-line values that take precedence over the config document.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub root: Option<PathBuf>,
    pub delay: Option<Duration>,
    pub max_wait: Option<Duration>,
    pub viewport: Option<Viewport>,
}

impl RunOverrides {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            root: cli.root.clone(),
            delay: cli.delay,
            max_wait: cli.max_wait,
            viewport: cli.viewport,
        }
    }
}

/// Reads the config document, applies explicit flags, then validates.
pub fn resolve_config(source: &str, overrides: &RunOverrides) -> Result<RunConfig> {
    let mut config = RunConfig::read(source)?;
    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

pub fn apply_overrides(config: &mut RunConfig, overrides: &RunOverrides) {
    if let Some(root) = &overrides.root {
        config.path.dir = root.clone();
    }
    if let Some(delay) = overrides.delay {
        config.render.delay = delay;
    }
    if let Some(max_wait) = overrides.max_wait {
        config.render.max_wait = max_wait;
    }
    if let Some(viewport) = overrides.viewport {
        config.page.viewport_size = viewport;
    }
}
