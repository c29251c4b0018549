//! Scripts and documents injected into pages.

use std::path::{Path, PathBuf};

use serde_json::Value;
use url::Url;

use super::bridge::BRIDGE_BINDING;
use crate::{Result, WatchError};

/// Runs before any page script: stubs audio and exposes the bridge helper.
const BOOTSTRAP_TEMPLATE: &str = include_str!("../../assets/bootstrap.js");

/// Tree walker, evaluated as `walk(token, walkOptions)`.
pub const WALK_JS: &str = include_str!("../../assets/walk.js");

/// Diff-rendering document.
pub const HIGHLIGHT_HTML: &str = include_str!("../../assets/highlight.html");

/// Entry point defined by [`HIGHLIGHT_HTML`], evaluated as
/// `highlight(token, changes, options)`.
pub const HIGHLIGHT_FN: &str = "window.pagewatchHighlight";

pub const HIGHLIGHT_FILENAME: &str = "highlight.html";

pub fn bootstrap_script() -> String {
    BOOTSTRAP_TEMPLATE.replace("__BRIDGE_BINDING__", BRIDGE_BINDING)
}

/// Builds `(function)(arg0, arg1, ...)` with JSON-encoded arguments.
pub fn call_expression(function: &str, args: &[Value]) -> Result<String> {
    let encoded = args
        .iter()
        .map(serde_json::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(format!("({})({})", function.trim(), encoded.join(", ")))
}

/// Query parameters the highlight document reads on load.
#[derive(Debug, Clone)]
pub struct HighlightQuery<'a> {
    pub left_image: &'a Path,
    pub right_image: &'a Path,
    pub left_time: &'a str,
    pub right_time: &'a str,
}

/// Writes the highlight document into `dir` and returns its path.
pub fn write_highlight_document(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|source| WatchError::DirectoryCreation {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(HIGHLIGHT_FILENAME);
    std::fs::write(&path, HIGHLIGHT_HTML)?;
    Ok(path)
}

/// `file://` URL of the highlight document with both screenshots attached.
pub fn highlight_url(document: &Path, query: &HighlightQuery<'_>) -> Result<Url> {
    let absolute = std::path::absolute(document)?;
    let mut url = Url::from_file_path(&absolute).map_err(|_| {
        WatchError::config(format!(
            "cannot build a file URL for {}",
            absolute.display()
        ))
    })?;
    let image_url = |path: &Path| -> Result<String> {
        let absolute = std::path::absolute(path)?;
        Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|_| {
                WatchError::config(format!(
                    "cannot build a file URL for {}",
                    absolute.display()
                ))
            })
    };
    url.query_pairs_mut()
        .append_pair("left", &image_url(query.left_image)?)
        .append_pair("right", &image_url(query.right_image)?)
        .append_pair("leftTime", query.left_time)
        .append_pair("rightTime", query.right_time);
    Ok(url)
}
