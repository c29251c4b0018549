//! Run log lines.
//!
//! Each step of a run reports a short line through a [`ProgressCallback`].
//! The binary prints them to stdout; tests collect them.

use std::sync::{Arc, Mutex};

pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

pub fn log_progress(progress: &Option<ProgressCallback>, message: &str) {
    tracing::debug!(target: "pagewatch::progress", "{message}");
    if let Some(cb) = progress {
        cb(message);
    }
}

/// Progress sink that prints each line to stdout.
pub fn stdout_progress() -> ProgressCallback {
    Arc::new(|message: &str| println!("{message}"))
}

/// Progress sink that keeps lines in memory.
#[derive(Clone, Default)]
pub struct ProgressRecorder {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ProgressRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> ProgressCallback {
        let lines = Arc::clone(&self.lines);
        Arc::new(move |message: &str| {
            if let Ok(mut lines) = lines.lock() {
                lines.push(message.to_string());
            }
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}
