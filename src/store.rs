//! On-disk snapshot store.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/latest.log              id of the newest complete snapshot
//! <root>/<id>/tree.json          walked tree, compact JSON
//! <root>/<id>/screenshot.png
//! <root>/<id>/info.json          time, url and the run configuration
//! <root>/diff/<left>-<right>.png highlight renders
//! ```
//!
//! Snapshots are staged in `.<id>.partial` and renamed into place once every
//! file is written, and the latest pointer is replaced through a temp file,
//! so `latest.log` never names a snapshot with missing files.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};

use image::io::Reader as ImageReader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::timestamp::SnapshotId;
use crate::{Result, WatchError};

pub const LATEST_FILE: &str = "latest.log";
pub const TREE_FILE: &str = "tree.json";
pub const SCREENSHOT_FILE: &str = "screenshot.png";
pub const INFO_FILE: &str = "info.json";
pub const DIFF_DIR: &str = "diff";

/// Metadata written next to every snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub time: SnapshotId,
    pub url: String,
    /// The configuration the snapshot was taken with.
    pub settings: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ImageSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// What the stored history says about a freshly walked tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Baseline {
    /// No usable previous snapshot.
    Empty,
    /// The latest snapshot serialized to exactly the same text.
    Unchanged(SnapshotId),
    /// The latest snapshot differs; its tree is carried along for diffing.
    Changed { id: SnapshotId, tree: Value },
}

impl Baseline {
    pub fn previous(&self) -> Option<SnapshotId> {
        match self {
            Baseline::Empty => None,
            Baseline::Unchanged(id) | Baseline::Changed { id, .. } => Some(*id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_dir(&self, id: SnapshotId) -> PathBuf {
        self.root.join(id.to_string())
    }

    pub fn screenshot_path(&self, id: SnapshotId) -> PathBuf {
        self.snapshot_dir(id).join(SCREENSHOT_FILE)
    }

    /// Id named by `latest.log`, or `None` when there is no usable pointer.
    pub fn read_latest(&self) -> Result<Option<SnapshotId>> {
        let path = self.root.join(LATEST_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match text.parse::<SnapshotId>() {
            Ok(id) => Ok(Some(id)),
            Err(err) => {
                warn!(path = %path.display(), "ignoring unreadable latest pointer: {err}");
                Ok(None)
            }
        }
    }

    /// Raw `tree.json` text of a stored snapshot.
    pub fn read_tree_text(&self, id: SnapshotId) -> Result<String> {
        let path = self.snapshot_dir(id).join(TREE_FILE);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(WatchError::SnapshotNotFound(id))
            }
            Err(err) => Err(WatchError::SnapshotCorrupt {
                id,
                reason: err.to_string(),
            }),
        }
    }

    pub fn read_tree(&self, id: SnapshotId) -> Result<Value> {
        let text = self.read_tree_text(id)?;
        parse_tree(id, &text)
    }

    pub fn read_info(&self, id: SnapshotId) -> Result<SnapshotInfo> {
        let path = self.snapshot_dir(id).join(INFO_FILE);
        let text = fs::read_to_string(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => WatchError::SnapshotNotFound(id),
            _ => WatchError::SnapshotCorrupt {
                id,
                reason: err.to_string(),
            },
        })?;
        serde_json::from_str(&text).map_err(|err| WatchError::SnapshotCorrupt {
            id,
            reason: format!("{INFO_FILE}: {err}"),
        })
    }

    /// Compares a freshly serialized tree against the latest snapshot.
    ///
    /// A latest pointer whose tree is missing or unreadable is treated as no
    /// history at all, so the run starts over with a first snapshot.
    pub fn baseline(&self, tree_json: &str) -> Result<Baseline> {
        let Some(latest) = self.read_latest()? else {
            return Ok(Baseline::Empty);
        };
        let stored = match self.read_tree_text(latest) {
            Ok(text) => text,
            Err(err @ (WatchError::SnapshotNotFound(_) | WatchError::SnapshotCorrupt { .. })) => {
                warn!("{err}; starting a new history");
                return Ok(Baseline::Empty);
            }
            Err(err) => return Err(err),
        };
        if stored == tree_json {
            return Ok(Baseline::Unchanged(latest));
        }
        match parse_tree(latest, &stored) {
            Ok(tree) => Ok(Baseline::Changed { id: latest, tree }),
            Err(err) => {
                warn!("{err}; starting a new history");
                Ok(Baseline::Empty)
            }
        }
    }

    /// Writes all files of snapshot `id` and returns its directory.
    ///
    /// The directory only appears under its final name once complete.
    pub fn write_snapshot(
        &self,
        id: SnapshotId,
        tree_json: &str,
        screenshot: &[u8],
        info: &SnapshotInfo,
    ) -> Result<PathBuf> {
        let final_dir = self.snapshot_dir(id);
        fs::create_dir_all(&self.root).map_err(|source| WatchError::DirectoryCreation {
            path: final_dir.clone(),
            source,
        })?;
        if final_dir.exists() {
            return Err(WatchError::DirectoryCreation {
                path: final_dir,
                source: io::Error::new(io::ErrorKind::AlreadyExists, "snapshot already exists"),
            });
        }

        let staging = self.root.join(format!(".{id}.partial"));
        if staging.exists() {
            debug!(path = %staging.display(), "removing stale staging directory");
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir(&staging).map_err(|source| WatchError::DirectoryCreation {
            path: final_dir.clone(),
            source,
        })?;

        let written = (|| -> Result<()> {
            fs::write(staging.join(SCREENSHOT_FILE), screenshot)?;
            fs::write(staging.join(TREE_FILE), tree_json)?;
            fs::write(staging.join(INFO_FILE), serde_json::to_string_pretty(info)?)?;
            fs::rename(&staging, &final_dir)?;
            Ok(())
        })();
        if let Err(err) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(err);
        }

        debug!(id = %id, path = %final_dir.display(), "snapshot written");
        Ok(final_dir)
    }

    /// Points `latest.log` at `id`. The snapshot must already be complete.
    pub fn update_latest_pointer(&self, id: SnapshotId) -> Result<()> {
        if !self.snapshot_dir(id).join(TREE_FILE).is_file() {
            return Err(WatchError::SnapshotNotFound(id));
        }
        let tmp = self.root.join(format!(".{LATEST_FILE}.tmp"));
        fs::write(&tmp, id.to_string())?;
        fs::rename(&tmp, self.root.join(LATEST_FILE))?;
        Ok(())
    }

    /// Output path for the highlight render of `left` against `right`,
    /// creating the diff directory when needed.
    pub fn diff_image_path(&self, left: SnapshotId, right: SnapshotId) -> Result<PathBuf> {
        let dir = self.root.join(DIFF_DIR);
        fs::create_dir_all(&dir).map_err(|source| WatchError::DirectoryCreation {
            path: dir.clone(),
            source,
        })?;
        Ok(dir.join(format!("{left}-{right}.png")))
    }
}

/// Trees nest two JSON levels per element, which outruns serde_json's
/// default limit of 128 on deep pages. The walker caps depth, so the
/// unbounded parse stays within the stack.
fn parse_tree(id: SnapshotId, text: &str) -> Result<Value> {
    let corrupt = |err: serde_json::Error| WatchError::SnapshotCorrupt {
        id,
        reason: format!("{TREE_FILE}: {err}"),
    };
    let mut de = serde_json::Deserializer::from_str(text);
    de.disable_recursion_limit();
    let tree = Value::deserialize(&mut de).map_err(corrupt)?;
    de.end().map_err(corrupt)?;
    Ok(tree)
}

/// Dimensions of an encoded screenshot; fails if the bytes are not an image.
pub fn image_size(bytes: &[u8]) -> Result<ImageSize> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(ImageSize { width, height })
}
