//! pagewatch library
//!
//! Watches a web page for visual and structural change. Each run loads the
//! page in headless Chromium, waits until it stops loading, walks the DOM into
//! a JSON tree and compares it with the previous snapshot. Changed pages get a
//! new snapshot and a side-by-side highlight image of what moved.
//!
//! # Module Overview
//!
//! - [`idle`] - load-quiescence detection from page events
//! - [`browser`] - page sources, the CDP page controller and in-page scripts
//! - [`store`] - on-disk snapshot history
//! - [`diff`] - structural tree diff
//! - [`monitor`] - one watch run from load to highlight
//! - [`config`] - run configuration
//! - [`timestamp`] - snapshot ids and their display form
//!
//! # Example
//!
//! ```no_run
//! use pagewatch_lib::{BrowserManager, BrowserOptions, Monitor, RunConfig, RunToken};
//!
//! # async fn example() -> pagewatch_lib::Result<()> {
//! let config = RunConfig::load(r#"{"path": {"dir": "snapshots"}}"#)?;
//! let token = RunToken::generate();
//! let source = BrowserManager::new(BrowserOptions::from_env(), token.clone(), None);
//! let url = url::Url::parse("https://example.com/")?;
//! let outcome = Monitor::new(source, config, url, token).run().await?;
//! println!("latest snapshot: {}", outcome.latest());
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod diff;
pub mod error;
pub mod idle;
pub mod monitor;
pub mod progress;
pub mod store;
pub mod timestamp;

pub use browser::{
    BrowserManager, BrowserOptions, LaunchOptions, LoadedPage, MockPageSource, PageController,
    PageErrorReport, PageSource, RunToken, MOCK_PAGE_DIR_ENV,
};
pub use config::{
    ConfigFormat, EngineSettings, PageOptions, RenderOptions, RunConfig, Viewport,
    DEFAULT_MAX_WAIT, DEFAULT_RENDER_DELAY,
};
pub use diff::{
    ChangeKind, ChangeRecord, ChangeTypes, DiffOptions, HighlightColors, Rect, StructuralDiffer,
    TreeDiffer, CHANGE_TYPES,
};
pub use error::{ErrorCategory, ErrorPayload, Result, WatchError};
pub use idle::{wait_for_quiescence, IdleDetector, LoadStatus, PageEvent, Settled};
pub use monitor::{Monitor, RunOutcome};
pub use progress::{log_progress, ProgressCallback, ProgressRecorder};
pub use store::{Baseline, SnapshotInfo, SnapshotStore};
pub use timestamp::{format_timestamp, SnapshotId};
