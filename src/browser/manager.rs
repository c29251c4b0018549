//! Browser manager for opening settled pages.
//!
//! Every page gets its own controller (and browser process) so launch-time
//! engine flags never leak between the watched page and the highlight
//! document. A semaphore keeps sessions from overlapping.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use super::bridge::RunToken;
use super::page::{LaunchOptions, PageController};
use super::{LoadedPage, PageSource};
use crate::config::{PageOptions, RenderOptions};
use crate::progress::ProgressCallback;
use crate::{Result, WatchError};

/// Environment variable naming the Chrome/Chromium binary.
pub const CHROME_ENV: &str = "PAGEWATCH_CHROME";

/// Environment variable that disables the Chromium sandbox when set to `1`.
pub const NO_SANDBOX_ENV: &str = "PAGEWATCH_NO_SANDBOX";

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub launch: LaunchOptions,
    /// Maximum number of browser sessions alive at once.
    pub max_concurrent_sessions: usize,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            launch: LaunchOptions::default(),
            max_concurrent_sessions: 1,
        }
    }
}

impl BrowserOptions {
    /// Defaults, overridden by `PAGEWATCH_CHROME` and `PAGEWATCH_NO_SANDBOX`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(path) = std::env::var(CHROME_ENV) {
            if !path.trim().is_empty() {
                options.launch.executable = Some(PathBuf::from(path));
            }
        }
        options.launch.no_sandbox = std::env::var(NO_SANDBOX_ENV)
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        options
    }
}

pub struct BrowserManager {
    options: BrowserOptions,
    semaphore: Arc<Semaphore>,
    token: RunToken,
    progress: Option<ProgressCallback>,
}

impl BrowserManager {
    pub fn new(options: BrowserOptions, token: RunToken, progress: Option<ProgressCallback>) -> Self {
        let permits = options.max_concurrent_sessions.max(1);
        Self {
            options,
            semaphore: Arc::new(Semaphore::new(permits)),
            token,
            progress,
        }
    }

    pub fn token(&self) -> &RunToken {
        &self.token
    }
}

/// A controller holding one of the manager's session permits.
pub struct ManagedPage {
    controller: PageController,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[async_trait]
impl PageSource for BrowserManager {
    type Page = ManagedPage;

    async fn open(
        &self,
        url: &str,
        options: &PageOptions,
        render: &RenderOptions,
    ) -> Result<ManagedPage> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| WatchError::browser("browser manager unavailable"))?;

        let launch = LaunchOptions {
            request_timeout: request_timeout_for(render),
            ..self.options.launch.clone()
        };
        let mut controller =
            PageController::launch(options, &launch, &self.token, self.progress.clone()).await?;
        match controller.open(url, render).await {
            Ok(settled) => {
                debug!(url, location = %settled.location, "opened");
                Ok(ManagedPage {
                    controller,
                    _permit: permit,
                })
            }
            Err(err) => {
                if let Err(close_err) = controller.close().await {
                    debug!("closing failed page: {close_err}");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl LoadedPage for ManagedPage {
    async fn evaluate(&self, function: &str, args: &[Value]) -> Result<Value> {
        self.controller.evaluate(function, args).await
    }

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>> {
        self.controller.screenshot(full_page).await
    }

    async fn render_to_file(&self, path: &Path, full_page: bool) -> Result<()> {
        self.controller.render_to_file(path, full_page).await
    }

    async fn close(self) -> Result<()> {
        self.controller.close().await
    }
}

/// Request timeout long enough to cover `render.max_wait`.
pub fn request_timeout_for(render: &RenderOptions) -> Duration {
    render.max_wait.max(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_run_one_session() {
        let options = BrowserOptions::default();
        assert_eq!(options.max_concurrent_sessions, 1);
        assert!(options.launch.executable.is_none());
        assert!(!options.launch.no_sandbox);
    }

    #[test]
    fn request_timeout_never_undercuts_max_wait() {
        let mut render = RenderOptions::default();
        render.max_wait = Duration::from_secs(120);
        assert_eq!(request_timeout_for(&render), Duration::from_secs(120));
        render.max_wait = Duration::from_secs(5);
        assert_eq!(request_timeout_for(&render), Duration::from_secs(30));
    }
}
