//! Page loading and in-page scripting.
//!
//! # Module Structure
//!
//! - [`page`] - one Chromium page driven over CDP
//! - [`manager`] - opens a fresh controller per page, one at a time
//! - [`mock`] - file-backed pages for runs without a browser
//! - [`bridge`] - token-checked messages from page scripts
//! - [`scripts`] - the tree walker, highlight document and bootstrap script
//!
//! The run orchestrator only sees the [`PageSource`] and [`LoadedPage`]
//! traits, so any source that can produce a settled page will do.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{PageOptions, RenderOptions};
use crate::Result;

pub mod bridge;
pub mod manager;
pub mod mock;
pub mod page;
pub mod scripts;

pub use bridge::{PageErrorReport, RunToken, BRIDGE_BINDING};
pub use manager::{BrowserManager, BrowserOptions};
pub use mock::{MockPageSource, MOCK_PAGE_DIR_ENV};
pub use page::{LaunchOptions, PageController};

/// Opens pages and waits for them to settle.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Page: LoadedPage;

    /// Loads `url` and returns once the page is stable.
    async fn open(
        &self,
        url: &str,
        options: &PageOptions,
        render: &RenderOptions,
    ) -> Result<Self::Page>;
}

/// A settled page.
#[async_trait]
pub trait LoadedPage: Send + Sync {
    async fn evaluate(&self, function: &str, args: &[Value]) -> Result<Value>;

    async fn screenshot(&self, full_page: bool) -> Result<Vec<u8>>;

    async fn render_to_file(&self, path: &Path, full_page: bool) -> Result<()> {
        let bytes = self.screenshot(full_page).await?;
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn close(self) -> Result<()>
    where
        Self: Sized;
}
