//! Structural tree diff.
//!
//! Trees come from the in-page walker as JSON. The differ aligns children
//! with a longest-common-subsequence pass (greedy for very long sibling
//! lists) and reports one [`ChangeRecord`]
//! per changed element, tagged with a [`ChangeKind`] bitmask.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Bitmask classifying one change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeKind(u8);

impl ChangeKind {
    pub const NONE: ChangeKind = ChangeKind(0);
    pub const ADD: ChangeKind = ChangeKind(1);
    pub const REMOVE: ChangeKind = ChangeKind(2);
    pub const STYLE: ChangeKind = ChangeKind(4);
    pub const TEXT: ChangeKind = ChangeKind(8);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: ChangeKind) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ChangeKind {
    type Output = ChangeKind;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChangeKind(self.0 | rhs.0)
    }
}

impl BitOrAssign for ChangeKind {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The named change-type constants handed to the differ and to the
/// highlight document. Serializes as `{"ADD":1,"REMOVE":2,"STYLE":4,"TEXT":8}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct ChangeTypes {
    pub add: ChangeKind,
    pub remove: ChangeKind,
    pub style: ChangeKind,
    pub text: ChangeKind,
}

pub const CHANGE_TYPES: ChangeTypes = ChangeTypes {
    add: ChangeKind::ADD,
    remove: ChangeKind::REMOVE,
    style: ChangeKind::STYLE,
    text: ChangeKind::TEXT,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<[f64; 4]> for Rect {
    fn from(r: [f64; 4]) -> Self {
        Rect {
            x: r[0],
            y: r[1],
            width: r[2],
            height: r[3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    /// Slash-separated element path, e.g. `html/body[1]/div[0]`.
    pub path: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub right: Option<Rect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffOptions {
    /// Computed-style properties left out of comparison.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore_styles: Vec<String>,
    #[serde(default)]
    pub ignore_text: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_changes: Option<usize>,
    #[serde(default)]
    pub colors: HighlightColors,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_styles: Vec::new(),
            ignore_text: false,
            max_changes: None,
            colors: HighlightColors::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HighlightColors {
    pub add: String,
    pub remove: String,
    pub style: String,
    pub text: String,
}

impl Default for HighlightColors {
    fn default() -> Self {
        Self {
            add: "rgba(0, 170, 0, 0.9)".to_string(),
            remove: "rgba(220, 0, 0, 0.9)".to_string(),
            style: "rgba(0, 90, 220, 0.9)".to_string(),
            text: "rgba(230, 140, 0, 0.9)".to_string(),
        }
    }
}

/// Compares two walked trees.
pub trait TreeDiffer: Send + Sync {
    fn diff(
        &self,
        left: &Value,
        right: &Value,
        options: &DiffOptions,
        types: &ChangeTypes,
    ) -> Result<Vec<ChangeRecord>>;
}

const TEXT_NODE: &str = "#text";

#[derive(Debug, Deserialize)]
struct TreeNode {
    name: String,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
    #[serde(default)]
    rect: Option<[f64; 4]>,
    #[serde(default)]
    style: BTreeMap<String, String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    children: Vec<TreeNode>,
}

impl TreeNode {
    fn is_text(&self) -> bool {
        self.name == TEXT_NODE
    }

    fn key(&self) -> (&str, Option<&str>) {
        (self.name.as_str(), self.attrs.get("id").map(String::as_str))
    }

    fn rect(&self) -> Option<Rect> {
        self.rect.map(Rect::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Matched(usize, usize),
    Removed(usize),
    Added(usize),
}

/// Largest middle section, in table cells, aligned by exact LCS.
const LCS_CELL_LIMIT: usize = 1 << 22;

/// Aligns two child lists on their keys; output follows document order.
///
/// The common prefix and suffix are matched directly. What remains goes
/// through LCS, or a greedy in-order key match when the table would exceed
/// [`LCS_CELL_LIMIT`].
fn align(left: &[TreeNode], right: &[TreeNode]) -> Vec<Step> {
    let prefix = left
        .iter()
        .zip(right)
        .take_while(|(l, r)| l.key() == r.key())
        .count();
    let suffix = left[prefix..]
        .iter()
        .rev()
        .zip(right[prefix..].iter().rev())
        .take_while(|(l, r)| l.key() == r.key())
        .count();
    let (left_end, right_end) = (left.len() - suffix, right.len() - suffix);

    let mut steps = Vec::with_capacity(left.len().max(right.len()));
    steps.extend((0..prefix).map(|i| Step::Matched(i, i)));
    let middle_left = &left[prefix..left_end];
    let middle_right = &right[prefix..right_end];
    let cells = (middle_left.len() + 1).saturating_mul(middle_right.len() + 1);
    let middle = if cells > LCS_CELL_LIMIT {
        align_greedy(middle_left, middle_right)
    } else {
        align_lcs(middle_left, middle_right)
    };
    steps.extend(middle.into_iter().map(|step| match step {
        Step::Matched(i, j) => Step::Matched(i + prefix, j + prefix),
        Step::Removed(i) => Step::Removed(i + prefix),
        Step::Added(j) => Step::Added(j + prefix),
    }));
    steps.extend((0..suffix).map(|k| Step::Matched(left_end + k, right_end + k)));
    steps
}

fn align_lcs(left: &[TreeNode], right: &[TreeNode]) -> Vec<Step> {
    let (n, m) = (left.len(), right.len());
    let width = m + 1;
    let mut table = vec![0u32; (n + 1) * width];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i * width + j] = if left[i].key() == right[j].key() {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut steps = Vec::with_capacity(n.max(m));
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if left[i].key() == right[j].key() {
            steps.push(Step::Matched(i, j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            steps.push(Step::Removed(i));
            i += 1;
        } else {
            steps.push(Step::Added(j));
            j += 1;
        }
    }
    steps.extend((i..n).map(Step::Removed));
    steps.extend((j..m).map(Step::Added));
    steps
}

/// Matches each left node to the next unused right node with the same key.
fn align_greedy(left: &[TreeNode], right: &[TreeNode]) -> Vec<Step> {
    let mut positions: HashMap<(&str, Option<&str>), VecDeque<usize>> = HashMap::new();
    for (j, node) in right.iter().enumerate() {
        positions.entry(node.key()).or_default().push_back(j);
    }

    let mut steps = Vec::with_capacity(left.len().max(right.len()));
    let mut next = 0;
    for (i, node) in left.iter().enumerate() {
        let found = positions.get_mut(&node.key()).and_then(|queue| {
            while queue.front().is_some_and(|&j| j < next) {
                queue.pop_front();
            }
            queue.pop_front()
        });
        match found {
            Some(j) => {
                steps.extend((next..j).map(Step::Added));
                steps.push(Step::Matched(i, j));
                next = j + 1;
            }
            None => steps.push(Step::Removed(i)),
        }
    }
    steps.extend((next..right.len()).map(Step::Added));
    steps
}

/// LCS-based element differ used by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralDiffer;

impl StructuralDiffer {
    fn style_changed(&self, left: &TreeNode, right: &TreeNode, options: &DiffOptions) -> bool {
        let ignored = |prop: &String| options.ignore_styles.iter().any(|p| p == prop);
        let styles = |node: &TreeNode| -> Vec<(String, String)> {
            node.style
                .iter()
                .filter(|(k, _)| !ignored(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        left.attrs != right.attrs || styles(left) != styles(right)
    }

    fn walk(
        &self,
        left: &TreeNode,
        right: &TreeNode,
        path: &str,
        options: &DiffOptions,
        types: &ChangeTypes,
        out: &mut Vec<ChangeRecord>,
    ) {
        let slot = out.len();
        let mut kind = ChangeKind::NONE;
        if self.style_changed(left, right, options) {
            kind |= types.style;
        }

        for step in align(&left.children, &right.children) {
            match step {
                Step::Matched(i, j) => {
                    let (l, r) = (&left.children[i], &right.children[j]);
                    if l.is_text() {
                        if !options.ignore_text && l.text != r.text {
                            kind |= types.text;
                        }
                    } else {
                        let child_path = format!("{}/{}[{}]", path, r.name, j);
                        self.walk(l, r, &child_path, options, types, out);
                    }
                }
                Step::Removed(i) => {
                    let l = &left.children[i];
                    if l.is_text() {
                        if !options.ignore_text {
                            kind |= types.text;
                        }
                    } else {
                        out.push(ChangeRecord {
                            kind: types.remove,
                            path: format!("{}/{}[{}]", path, l.name, i),
                            name: l.name.clone(),
                            left: l.rect(),
                            right: None,
                        });
                    }
                }
                Step::Added(j) => {
                    let r = &right.children[j];
                    if r.is_text() {
                        if !options.ignore_text {
                            kind |= types.text;
                        }
                    } else {
                        out.push(ChangeRecord {
                            kind: types.add,
                            path: format!("{}/{}[{}]", path, r.name, j),
                            name: r.name.clone(),
                            left: None,
                            right: r.rect(),
                        });
                    }
                }
            }
        }

        if !kind.is_empty() {
            out.insert(
                slot,
                ChangeRecord {
                    kind,
                    path: path.to_string(),
                    name: right.name.clone(),
                    left: left.rect(),
                    right: right.rect(),
                },
            );
        }
    }
}

impl TreeDiffer for StructuralDiffer {
    fn diff(
        &self,
        left: &Value,
        right: &Value,
        options: &DiffOptions,
        types: &ChangeTypes,
    ) -> Result<Vec<ChangeRecord>> {
        let left = TreeNode::deserialize(left)?;
        let right = TreeNode::deserialize(right)?;

        let mut out = Vec::new();
        if left.key() == right.key() {
            self.walk(&left, &right, &right.name, options, types, &mut out);
        } else {
            out.push(ChangeRecord {
                kind: types.remove,
                path: left.name.clone(),
                name: left.name.clone(),
                left: left.rect(),
                right: None,
            });
            out.push(ChangeRecord {
                kind: types.add,
                path: right.name.clone(),
                name: right.name.clone(),
                left: None,
                right: right.rect(),
            });
        }

        if let Some(max) = options.max_changes {
            out.truncate(max);
        }
        Ok(out)
    }
}
