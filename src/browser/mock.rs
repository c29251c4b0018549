//! File-backed page source.
//!
//! When `PAGEWATCH_MOCK_PAGE_DIR` is set, pages are read from that directory
//! instead of a browser:
//!
//! - `tree.json` is what the tree walker returns
//! - `screenshot.png` is every capture
//! - a `fail` file makes every non-file URL fail to load, with the file's
//!   contents as the reason
//!
//! Files are re-read on every open, so a test can change the page between
//! runs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use super::scripts::{HIGHLIGHT_FN, WALK_JS};
use super::{LoadedPage, PageSource};
use crate::config::{PageOptions, RenderOptions};
use crate::{Result, WatchError};

pub const MOCK_PAGE_DIR_ENV: &str = "PAGEWATCH_MOCK_PAGE_DIR";

const TREE_FILE: &str = "tree.json";
const SCREENSHOT_FILE: &str = "screenshot.png";
const FAIL_FILE: &str = "fail";

#[derive(Debug, Clone)]
pub struct MockPageSource {
    dir: PathBuf,
    opened: Arc<Mutex<Vec<String>>>,
}

impl MockPageSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_env() -> Option<Self> {
        let dir = std::env::var(MOCK_PAGE_DIR_ENV).ok()?;
        if dir.trim().is_empty() {
            return None;
        }
        Some(Self::new(dir))
    }

    /// URLs opened so far, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(name);
        std::fs::read(&path).map_err(|err| {
            WatchError::browser(format!("mock page file {}: {err}", path.display()))
        })
    }
}

#[async_trait]
impl PageSource for MockPageSource {
    type Page = MockPage;

    async fn open(
        &self,
        url: &str,
        _options: &PageOptions,
        _render: &RenderOptions,
    ) -> Result<MockPage> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(url.to_string());
        }

        let parsed = Url::parse(url)?;
        if parsed.scheme() == "file" {
            let local = parsed
                .to_file_path()
                .map_err(|_| WatchError::page_load(url, "not a local path"))?;
            if !local.is_file() {
                return Err(WatchError::page_load(url, "file not found"));
            }
            return Ok(MockPage {
                tree: Value::Null,
                screenshot: self.read(SCREENSHOT_FILE)?,
            });
        }

        let fail = self.dir.join(FAIL_FILE);
        if fail.exists() {
            let reason = std::fs::read_to_string(&fail).unwrap_or_default();
            let reason = match reason.trim() {
                "" => "mock load failure".to_string(),
                text => text.to_string(),
            };
            return Err(WatchError::page_load(url, reason));
        }

        let tree = serde_json::from_slice(&self.read(TREE_FILE)?)?;
        Ok(MockPage {
            tree,
            screenshot: self.read(SCREENSHOT_FILE)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockPage {
    tree: Value,
    screenshot: Vec<u8>,
}

#[async_trait]
impl LoadedPage for MockPage {
    async fn evaluate(&self, function: &str, args: &[Value]) -> Result<Value> {
        if function == WALK_JS {
            return Ok(self.tree.clone());
        }
        if function == HIGHLIGHT_FN {
            let boxes = args
                .get(1)
                .and_then(Value::as_array)
                .map(|changes| changes.len())
                .unwrap_or(0);
            return Ok(Value::from(boxes));
        }
        Err(WatchError::Script(
            "mock page only runs the tree walker and highlighter".to_string(),
        ))
    }

    async fn screenshot(&self, _full_page: bool) -> Result<Vec<u8>> {
        Ok(self.screenshot.clone())
    }

    async fn render_to_file(&self, path: &Path, _full_page: bool) -> Result<()> {
        tokio::fs::write(path, &self.screenshot).await?;
        Ok(())
    }

    async fn close(self) -> Result<()> {
        Ok(())
    }
}
