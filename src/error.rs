use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

use crate::timestamp::SnapshotId;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Page failed to load {url}: {reason}")]
    PageLoad { url: String, reason: String },

    #[error("Page {url} did not settle within {waited:?}")]
    Timeout { url: String, waited: Duration },

    #[error("Unable to make directory [{}]: {source}", path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot {0} not found")]
    SnapshotNotFound(SnapshotId),

    #[error("Snapshot {id} is corrupt: {reason}")]
    SnapshotCorrupt { id: SnapshotId, reason: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Page script error: {0}")]
    Script(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WatchError {
    pub fn page_load(url: impl Into<String>, reason: impl Into<String>) -> Self {
        WatchError::PageLoad {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn browser(message: impl Into<String>) -> Self {
        WatchError::Browser(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        WatchError::Config(message.into())
    }

    /// Process exit code for a run that ended with this error.
    ///
    /// Runtime failures (page load, timeout, disk) use 1; bad input uses 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            WatchError::Config(_) | WatchError::InvalidUrl(_) => 2,
            _ => 1,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        match self {
            WatchError::Io(e) => ErrorPayload::new(
                ErrorCategory::Storage,
                e.to_string(),
                "Check the snapshot root path and its permissions.",
            ),
            WatchError::InvalidUrl(e) => ErrorPayload::new(
                ErrorCategory::Config,
                e.to_string(),
                "Verify URL/format (e.g., https://example.com).",
            ),
            WatchError::Image(e) => ErrorPayload::new(
                ErrorCategory::Browser,
                e.to_string(),
                "The captured screenshot could not be decoded; rerun with --verbose.",
            ),
            WatchError::Serialization(e) => ErrorPayload::new(
                ErrorCategory::Storage,
                e.to_string(),
                "Check JSON inputs; a stored tree.json may have been edited by hand.",
            ),
            WatchError::PageLoad { .. } => ErrorPayload::new(
                ErrorCategory::Page,
                self.to_string(),
                "Check that the URL is reachable from this machine (DNS, proxy, VPN).",
            ),
            WatchError::Timeout { .. } => ErrorPayload::new(
                ErrorCategory::Page,
                self.to_string(),
                "The page kept requesting resources; raise render.maxWait or set settings.resourceTimeout.",
            ),
            WatchError::DirectoryCreation { .. } => ErrorPayload::new(
                ErrorCategory::Storage,
                self.to_string(),
                "Ensure path.dir exists and is writable, and that no other run is writing to it.",
            ),
            WatchError::SnapshotNotFound(_) | WatchError::SnapshotCorrupt { .. } => {
                ErrorPayload::new(
                    ErrorCategory::Storage,
                    self.to_string(),
                    "Remove latest.log to start a fresh baseline.",
                )
            }
            WatchError::Browser(msg) => {
                let lower = msg.to_ascii_lowercase();
                if lower.contains("launch") || lower.contains("executable") {
                    ErrorPayload::new(
                        ErrorCategory::Browser,
                        msg.to_string(),
                        "Ensure google-chrome or chromium is installed and available on PATH.",
                    )
                } else {
                    ErrorPayload::new(
                        ErrorCategory::Browser,
                        msg.to_string(),
                        "Re-run with --verbose; file an issue if persistent.",
                    )
                }
            }
            WatchError::Script(msg) => ErrorPayload::new(
                ErrorCategory::Page,
                msg.to_string(),
                "The page threw while being walked; check walk options such as excludeSelectors.",
            ),
            WatchError::Config(msg) => {
                let lower = msg.to_ascii_lowercase();
                if lower.contains("path.dir") {
                    ErrorPayload::new(
                        ErrorCategory::Config,
                        msg.to_string(),
                        "Set path.dir in the config document or pass --root.",
                    )
                } else if lower.contains("unknown field") {
                    ErrorPayload::new(
                        ErrorCategory::Config,
                        msg.to_string(),
                        "Page attributes are viewportSize, zoomFactor and customHeaders; engine options such as userAgent go under page.settings.",
                    )
                } else if lower.contains("not found") {
                    ErrorPayload::new(
                        ErrorCategory::Config,
                        msg.to_string(),
                        "Pass an inline JSON document or an existing .json/.toml/.yaml file.",
                    )
                } else {
                    ErrorPayload::new(
                        ErrorCategory::Config,
                        msg.to_string(),
                        "Check flags and the config document (e.g., --delay 500ms).",
                    )
                }
            }
        }
    }
}

impl From<chromiumoxide::error::CdpError> for WatchError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        WatchError::Browser(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WatchError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Config,
    Page,
    Browser,
    Storage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(category: ErrorCategory, message: String, remediation: impl Into<String>) -> Self {
        Self {
            category,
            message,
            remediation: Some(remediation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_load_failure_exits_with_one() {
        let err = WatchError::page_load("https://example.com", "net::ERR_NAME_NOT_RESOLVED");
        assert_eq!(err.exit_code(), 1);
        let payload = err.to_payload();
        assert_eq!(payload.category, ErrorCategory::Page);
        assert!(payload.message.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn directory_creation_failure_is_fatal() {
        let err = WatchError::DirectoryCreation {
            path: PathBuf::from("/snapshots/1700000000000"),
            source: std::io::Error::other("read-only file system"),
        };
        assert_eq!(err.exit_code(), 1);
        let rendered = err.to_string();
        assert!(
            rendered.starts_with("Unable to make directory"),
            "unexpected message: {rendered}"
        );
        assert!(rendered.contains("1700000000000"));
    }

    #[test]
    fn timeout_is_distinct_from_page_load() {
        let err = WatchError::Timeout {
            url: "https://example.com".to_string(),
            waited: Duration::from_secs(60),
        };
        assert!(!matches!(err, WatchError::PageLoad { .. }));
        let remediation = err.to_payload().remediation.unwrap_or_default();
        assert!(
            remediation.contains("maxWait"),
            "expected maxWait hint, got: {remediation}"
        );
    }

    #[test]
    fn config_errors_exit_with_two() {
        assert_eq!(WatchError::config("bad").exit_code(), 2);
        let url_err = url::Url::parse("not a url").unwrap_err();
        assert_eq!(WatchError::from(url_err).exit_code(), 2);
    }

    #[test]
    fn config_payload_includes_root_hint() {
        let err = WatchError::config("path.dir is required");
        let remediation = err.to_payload().remediation.unwrap_or_default();
        assert!(
            remediation.contains("--root"),
            "expected root remediation, got: {remediation}"
        );
    }

    #[test]
    fn config_payload_explains_unknown_page_keys() {
        let err = WatchError::config("page: unknown field `viewport`");
        let remediation = err.to_payload().remediation.unwrap_or_default();
        assert!(
            remediation.contains("page.settings"),
            "expected settings remediation, got: {remediation}"
        );
    }

    #[test]
    fn browser_launch_payload_mentions_chromium() {
        let err = WatchError::browser("Failed to launch browser: executable not found");
        let remediation = err.to_payload().remediation.unwrap_or_default();
        assert!(remediation.to_ascii_lowercase().contains("chromium"));
    }
}
