//! Directory tree reconstruction from flat path listings.
//!
//! The builder groups paths by their first segment and recurses on the
//! remainders. A remainder is treated as a file when it has no further
//! separator and contains a `.`; anything else becomes a child directory.
//! Every level is sorted by name, so building is deterministic and
//! `build_tree(flatten_tree(&build_tree(s)?))` equals `build_tree(s)`.

use crate::{MAX_PATH_DEPTH, SEPARATOR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Deepest input the builder accepts: a repository name followed by a
/// logical path of [`MAX_PATH_DEPTH`] segments.
pub const MAX_TREE_DEPTH: usize = MAX_PATH_DEPTH + 1;

/// A directory in a reconstructed tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirNode {
    pub name: String,
    #[serde(rename = "subDirs")]
    pub sub_dirs: Vec<DirNode>,
    pub files: Vec<String>,
}

impl DirNode {
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.sub_dirs.is_empty() && self.files.is_empty()
    }
}

/// Build a nested tree from a set of paths.
///
/// Empty segments are dropped, so directory-marker keys with a trailing
/// separator collapse onto their directory. An empty input yields an empty
/// tree. Inputs nested deeper than [`MAX_TREE_DEPTH`] are rejected.
pub fn build_tree<I, S>(paths: I) -> crate::Result<Vec<DirNode>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let normalized: BTreeSet<String> = paths
        .into_iter()
        .filter_map(|p| normalize(p.as_ref()))
        .collect();
    build_level(normalized.iter().map(String::as_str).collect(), 0)
}

/// Inverse of [`build_tree`]: one path per file and per empty directory.
pub fn flatten_tree(nodes: &[DirNode]) -> Vec<String> {
    let mut out = Vec::new();
    for node in nodes {
        flatten_into(node, "", &mut out);
    }
    out
}

#[derive(Default)]
struct Group<'a> {
    files: BTreeSet<&'a str>,
    children: Vec<&'a str>,
}

fn build_level(paths: Vec<&str>, depth: usize) -> crate::Result<Vec<DirNode>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }
    if depth >= MAX_TREE_DEPTH {
        return Err(crate::Error::PathTooDeep {
            max: MAX_TREE_DEPTH,
        });
    }

    let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();
    for path in paths {
        match path.split_once(SEPARATOR) {
            None => {
                groups.entry(path).or_default();
            }
            Some((head, rest)) => {
                let group = groups.entry(head).or_default();
                if is_file(rest) {
                    group.files.insert(rest);
                } else {
                    group.children.push(rest);
                }
            }
        }
    }

    groups
        .into_iter()
        .map(|(name, group)| {
            Ok(DirNode {
                name: name.to_string(),
                sub_dirs: build_level(group.children, depth + 1)?,
                files: group.files.into_iter().map(str::to_string).collect(),
            })
        })
        .collect()
}

fn is_file(remainder: &str) -> bool {
    !remainder.contains(SEPARATOR) && remainder.contains('.')
}

fn normalize(path: &str) -> Option<String> {
    let joined = path
        .split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    (!joined.is_empty()).then_some(joined)
}

fn flatten_into(node: &DirNode, prefix: &str, out: &mut Vec<String>) {
    let path = if prefix.is_empty() {
        node.name.clone()
    } else {
        format!("{prefix}{SEPARATOR}{}", node.name)
    };

    if node.is_leaf() {
        out.push(path);
        return;
    }
    for file in &node.files {
        out.push(format!("{path}{SEPARATOR}{file}"));
    }
    for child in &node.sub_dirs {
        flatten_into(child, &path, out);
    }
}
