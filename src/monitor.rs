//! One watch run.
//!
//! ```text
//! START -> OPENING -> STABLE (tree walked)
//! STABLE -> UNCHANGED
//! STABLE -> CHANGED, no prior -> WRITE_ONLY
//! STABLE -> CHANGED, prior    -> WRITE -> DIFF_OPENING -> DIFF_STABLE -> HIGHLIGHT_RENDERED
//! ```
//!
//! Any load failure ends the run with an error. The latest pointer moves only
//! after the new snapshot is completely on disk.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::browser::scripts::{
    highlight_url, write_highlight_document, HighlightQuery, HIGHLIGHT_FN, WALK_JS,
};
use crate::browser::{LoadedPage, PageSource, RunToken};
use crate::config::{PageOptions, RunConfig};
use crate::diff::{ChangeRecord, ChangeTypes, DiffOptions, StructuralDiffer, TreeDiffer, CHANGE_TYPES};
use crate::progress::{log_progress, ProgressCallback};
use crate::store::{image_size, Baseline, SnapshotInfo, SnapshotStore};
use crate::timestamp::SnapshotId;
use crate::Result;

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RunOutcome {
    /// The page serialized exactly as the latest snapshot; nothing written.
    #[serde(rename_all = "camelCase")]
    Unchanged { latest: SnapshotId },
    /// No usable history; the first snapshot was written.
    #[serde(rename_all = "camelCase")]
    FirstSnapshot { id: SnapshotId },
    /// A new snapshot was written and compared with the previous one.
    /// `diff_image` is absent when the differ found no structural change.
    #[serde(rename_all = "camelCase")]
    Changed {
        previous: SnapshotId,
        current: SnapshotId,
        changes: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        diff_image: Option<PathBuf>,
    },
}

impl RunOutcome {
    /// Newest snapshot after the run.
    pub fn latest(&self) -> SnapshotId {
        match self {
            RunOutcome::Unchanged { latest } => *latest,
            RunOutcome::FirstSnapshot { id } => *id,
            RunOutcome::Changed { current, .. } => *current,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HighlightOptions<'a> {
    #[serde(flatten)]
    diff: &'a DiffOptions,
    change_type: &'a ChangeTypes,
}

pub struct Monitor<S, D = StructuralDiffer> {
    source: S,
    differ: D,
    config: RunConfig,
    store: SnapshotStore,
    url: Url,
    token: RunToken,
    progress: Option<ProgressCallback>,
    scratch_dir: PathBuf,
}

impl<S: PageSource> Monitor<S> {
    pub fn new(source: S, config: RunConfig, url: Url, token: RunToken) -> Self {
        let store = SnapshotStore::new(config.path.dir.clone());
        let scratch_dir = std::env::temp_dir().join(format!("pagewatch-{token}"));
        Self {
            source,
            differ: StructuralDiffer,
            config,
            store,
            url,
            token,
            progress: None,
            scratch_dir,
        }
    }
}

impl<S: PageSource, D: TreeDiffer> Monitor<S, D> {
    pub fn with_differ<D2: TreeDiffer>(self, differ: D2) -> Monitor<S, D2> {
        Monitor {
            source: self.source,
            differ,
            config: self.config,
            store: self.store,
            url: self.url,
            token: self.token,
            progress: self.progress,
            scratch_dir: self.scratch_dir,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Directory for the temporary highlight document.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let url = self.url.as_str();
        log_progress(&self.progress, &format!("load: {url}"));
        let page = self
            .source
            .open(url, &self.config.page, &self.config.render)
            .await?;

        log_progress(&self.progress, "walk tree");
        let walked = page
            .evaluate(WALK_JS, &[json!(self.token.as_str()), self.config.walk.clone()])
            .await;
        let tree = match walked {
            Ok(tree) => tree,
            Err(err) => {
                close_quietly(page).await;
                return Err(err);
            }
        };
        let tree_json = serde_json::to_string(&tree)?;

        let baseline = match self.store.baseline(&tree_json) {
            Ok(baseline) => baseline,
            Err(err) => {
                close_quietly(page).await;
                return Err(err);
            }
        };
        if let Baseline::Unchanged(latest) = baseline {
            close_quietly(page).await;
            log_progress(&self.progress, &format!("no change since [{latest}]"));
            return Ok(RunOutcome::Unchanged { latest });
        }

        log_progress(&self.progress, "has diff");
        let id = next_snapshot_id(baseline.previous());
        let screenshot = page.screenshot(self.config.render.full_page).await;
        close_quietly(page).await;
        let screenshot = screenshot?;

        let info = SnapshotInfo {
            time: id,
            url: url.to_string(),
            settings: serde_json::to_value(&self.config)?,
            screenshot: Some(image_size(&screenshot)?),
        };
        self.store
            .write_snapshot(id, &tree_json, &screenshot, &info)?;
        self.store.update_latest_pointer(id)?;

        match baseline {
            Baseline::Changed { id: previous, tree: previous_tree } => {
                self.highlight(previous, id, &previous_tree, &tree).await
            }
            Baseline::Empty | Baseline::Unchanged(_) => Ok(RunOutcome::FirstSnapshot { id }),
        }
    }

    async fn highlight(
        &self,
        left: SnapshotId,
        right: SnapshotId,
        left_tree: &Value,
        right_tree: &Value,
    ) -> Result<RunOutcome> {
        log_progress(&self.progress, &format!("diff [{left}] with [{right}]"));
        let changes = self
            .differ
            .diff(left_tree, right_tree, &self.config.diff, &CHANGE_TYPES)?;

        if changes.is_empty() {
            warn!(%left, %right, "trees serialize differently but no structural change");
            log_progress(&self.progress, "warning, no change");
            return Ok(RunOutcome::Changed {
                previous: left,
                current: right,
                changes: 0,
                diff_image: None,
            });
        }
        log_progress(&self.progress, &format!("has {} changes", changes.len()));

        let document = write_highlight_document(&self.scratch_dir)?;
        let left_image = self.store.screenshot_path(left);
        let right_image = self.store.screenshot_path(right);
        let left_time = left.format_local();
        let right_time = right.format_local();
        let url = highlight_url(
            &document,
            &HighlightQuery {
                left_image: &left_image,
                right_image: &right_image,
                left_time: &left_time,
                right_time: &right_time,
            },
        )?;
        let output = self.store.diff_image_path(left, right)?;

        log_progress(&self.progress, "start highlight");
        let options = PageOptions::for_highlight(self.config.page.viewport_size);
        let opened = self
            .source
            .open(url.as_str(), &options, &self.config.render)
            .await;
        let rendered = match opened {
            Ok(page) => {
                log_progress(&self.progress, "highlight done");
                let rendered = self.draw(&page, &changes, &output).await;
                close_quietly(page).await;
                rendered
            }
            Err(err) => Err(err),
        };
        if let Err(err) = std::fs::remove_dir_all(&self.scratch_dir) {
            debug!(path = %self.scratch_dir.display(), "scratch cleanup: {err}");
        }
        rendered?;

        Ok(RunOutcome::Changed {
            previous: left,
            current: right,
            changes: changes.len(),
            diff_image: Some(output),
        })
    }

    async fn draw(
        &self,
        page: &S::Page,
        changes: &[ChangeRecord],
        output: &std::path::Path,
    ) -> Result<()> {
        let options = HighlightOptions {
            diff: &self.config.diff,
            change_type: &CHANGE_TYPES,
        };
        let drawn = page
            .evaluate(
                HIGHLIGHT_FN,
                &[
                    json!(self.token.as_str()),
                    serde_json::to_value(changes)?,
                    serde_json::to_value(&options)?,
                ],
            )
            .await?;
        debug!(boxes = %drawn, "highlight drawn");
        page.render_to_file(output, true).await
    }
}

async fn close_quietly<P: LoadedPage>(page: P) {
    if let Err(err) = page.close().await {
        warn!("closing page: {err}");
    }
}

/// Id for a new snapshot, strictly after `previous`.
fn next_snapshot_id(previous: Option<SnapshotId>) -> SnapshotId {
    let now = SnapshotId::now();
    match previous {
        Some(previous) if now <= previous => SnapshotId::from_millis(previous.as_millis() + 1),
        _ => now,
    }
}
