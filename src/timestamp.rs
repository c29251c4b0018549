//! Snapshot identifiers and human-readable timestamps.
//!
//! A snapshot is named by its creation time in epoch milliseconds; the same
//! number is used verbatim as the snapshot's directory name.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Epoch-millisecond identifier of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(u64);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotIdParseError {
    #[error("Snapshot id is empty")]
    Empty,
    #[error("Invalid snapshot id: {0}")]
    Invalid(String),
}

impl SnapshotId {
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Id for a snapshot taken now.
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis().max(0) as u64)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// `YYYY-MM-DD HH:MM:SS` in the local time zone.
    pub fn format_local(self) -> String {
        format_timestamp(self, &Local)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SnapshotId {
    type Err = SnapshotIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(SnapshotIdParseError::Empty);
        }
        trimmed
            .parse::<u64>()
            .map(SnapshotId)
            .map_err(|_| SnapshotIdParseError::Invalid(trimmed.to_string()))
    }
}

/// Formats a snapshot id as `YYYY-MM-DD HH:MM:SS` in the given time zone.
pub fn format_timestamp<Tz: TimeZone>(id: SnapshotId, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    let utc = DateTime::<Utc>::from_timestamp_millis(id.0 as i64).unwrap_or_default();
    utc.with_timezone(tz).format("%Y-%m-%d %H:%M:%S").to_string()
}
