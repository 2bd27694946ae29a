//! Logical paths, repository-qualified paths and object keys.
//!
//! A [`LogicalPath`] is relative to its repository and never contains the
//! repository name or the storage namespace. The boundary layer receives
//! [`RepoPath`]s (`<repository>/<logical path>`) and object keys are derived
//! from both with [`ObjectKey`].

use crate::{MAX_PATH_DEPTH, MAX_PATH_LEN, SEPARATOR};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a single path segment in bytes.
const MAX_SEGMENT_LEN: usize = 255;

/// A validated path relative to a repository.
///
/// The empty path is the repository root.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LogicalPath(String);

impl LogicalPath {
    /// The repository root.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and normalize a logical path.
    ///
    /// Leading and trailing separators are ignored. Empty inner segments,
    /// `.` and `..` segments, backslashes and control characters are rejected.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        if trimmed.len() > MAX_PATH_LEN {
            return Err(crate::Error::InvalidPath(format!(
                "path exceeds {MAX_PATH_LEN} bytes"
            )));
        }

        let mut depth = 0;
        for segment in trimmed.split(SEPARATOR) {
            validate_segment(segment)?;
            depth += 1;
        }
        if depth > MAX_PATH_DEPTH {
            return Err(crate::Error::PathTooDeep {
                max: MAX_PATH_DEPTH,
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments; zero for the root.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split(SEPARATOR).count()
        }
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR).filter(|s| !s.is_empty())
    }

    /// First segment, if any.
    pub fn top_segment(&self) -> Option<&str> {
        self.segments().next()
    }

    /// Last segment, if any.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit(SEPARATOR).next()
    }

    /// Parent path; `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Append a single validated segment.
    pub fn join(&self, name: &str) -> crate::Result<Self> {
        validate_segment(name)?;
        if self.is_root() {
            return Self::parse(name);
        }
        Self::parse(&format!("{}{SEPARATOR}{name}", self.0))
    }

    /// This path and each ancestor, deepest first, ending at the top segment.
    ///
    /// The root itself is never yielded.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: (!self.is_root()).then_some(self.0.as_str()),
        }
    }

    /// Whether `self` is `dir` or lies beneath it.
    ///
    /// Matching is separator-anchored: `docs-old` is not within `docs`.
    pub fn is_within(&self, dir: &LogicalPath) -> bool {
        if dir.is_root() {
            return true;
        }
        match self.0.strip_prefix(dir.as_str()) {
            Some("") => true,
            Some(rest) => rest.starts_with(SEPARATOR),
            None => false,
        }
    }

    /// Replace the `old` prefix with `new`; `None` when not within `old`.
    pub fn rebase(&self, old: &LogicalPath, new: &LogicalPath) -> Option<Self> {
        if !self.is_within(old) {
            return None;
        }
        let remainder = self.0[old.0.len()..].trim_start_matches(SEPARATOR);
        match (new.is_root(), remainder.is_empty()) {
            (_, true) => Some(new.clone()),
            (true, false) => Some(Self(remainder.to_string())),
            (false, false) => Some(Self(format!("{}{SEPARATOR}{remainder}", new.0))),
        }
    }
}

fn validate_segment(segment: &str) -> crate::Result<()> {
    if segment.is_empty() {
        return Err(crate::Error::InvalidPath(
            "path contains an empty segment".to_string(),
        ));
    }
    if segment == "." || segment == ".." {
        return Err(crate::Error::InvalidPath(format!(
            "relative segment not allowed: {segment}"
        )));
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(crate::Error::InvalidPath(format!(
            "segment exceeds {MAX_SEGMENT_LEN} bytes"
        )));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| *c == SEPARATOR || *c == '\\' || c.is_control())
    {
        return Err(crate::Error::InvalidPath(format!(
            "invalid character in segment: {c:?}"
        )));
    }
    Ok(())
}

/// Iterator over a path and its ancestors, deepest first.
pub struct Ancestors<'a> {
    next: Option<&'a str>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let current = self.next?;
        self.next = current.rfind(SEPARATOR).map(|idx| &current[..idx]);
        Some(current)
    }
}

impl TryFrom<String> for LogicalPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<LogicalPath> for String {
    fn from(path: LogicalPath) -> Self {
        path.0
    }
}

impl fmt::Debug for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogicalPath({:?})", self.0)
    }
}

impl fmt::Display for LogicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A boundary path: `<repository>/<logical path>`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RepoPath {
    repository: String,
    path: LogicalPath,
}

impl RepoPath {
    /// Split a boundary path into repository name and logical path.
    ///
    /// A top-level entry named after its own repository is rejected, since
    /// the repository root is indexed under the repository name.
    pub fn parse(input: &str) -> crate::Result<Self> {
        let trimmed = input.trim_matches(SEPARATOR);
        let (repository, rest) = trimmed.split_once(SEPARATOR).unwrap_or((trimmed, ""));
        crate::validate_repository_name(repository)?;
        let path = LogicalPath::parse(rest)?;

        if path.top_segment() == Some(repository) {
            return Err(crate::Error::InvalidPath(format!(
                "top-level entry may not reuse the repository name {repository:?}"
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            path,
        })
    }

    pub fn new(repository: impl Into<String>, path: LogicalPath) -> crate::Result<Self> {
        let repository = repository.into();
        crate::validate_repository_name(&repository)?;
        Ok(Self { repository, path })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn path(&self) -> &LogicalPath {
        &self.path
    }

    pub fn into_parts(self) -> (String, LogicalPath) {
        (self.repository, self.path)
    }
}

impl fmt::Debug for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RepoPath({self})")
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            f.write_str(&self.repository)
        } else {
            write!(f, "{}{SEPARATOR}{}", self.repository, self.path)
        }
    }
}

/// A blob-store key: `<namespace>/<repository>/<logical path>`.
///
/// Directory markers are zero-length objects whose key ends with the
/// separator.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Key of the object holding a file's contents.
    pub fn file(namespace: &str, repository: &str, path: &LogicalPath) -> Self {
        let mut key = Self::repository_prefix(namespace, repository).0;
        key.push_str(path.as_str());
        if path.is_root() {
            key.pop();
        }
        Self(key)
    }

    /// Key of a directory marker; also the listing prefix for its contents.
    pub fn marker(namespace: &str, repository: &str, dir: &LogicalPath) -> Self {
        let mut key = Self::repository_prefix(namespace, repository).0;
        if !dir.is_root() {
            key.push_str(dir.as_str());
            key.push(SEPARATOR);
        }
        Self(key)
    }

    /// Prefix covering every object of a repository (the root marker key).
    pub fn repository_prefix(namespace: &str, repository: &str) -> Self {
        let mut key = Self::namespace_prefix(namespace).0;
        key.push_str(repository);
        key.push(SEPARATOR);
        Self(key)
    }

    /// Prefix covering every object of every repository.
    pub fn namespace_prefix(namespace: &str) -> Self {
        let namespace = namespace.trim_matches(SEPARATOR);
        if namespace.is_empty() {
            Self(String::new())
        } else {
            Self(format!("{namespace}{SEPARATOR}"))
        }
    }

    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn is_marker(&self) -> bool {
        self.0.ends_with(SEPARATOR)
    }

    /// Split a raw key into `(repository, relative path)` under `namespace`.
    ///
    /// The relative path has separators trimmed and is empty for the
    /// repository root marker. Returns `None` for keys outside the namespace.
    pub fn split<'a>(namespace: &str, key: &'a str) -> Option<(&'a str, &'a str)> {
        let prefix = Self::namespace_prefix(namespace);
        let rest = key.strip_prefix(prefix.as_str())?;
        let rest = rest.trim_start_matches(SEPARATOR);
        let (repository, remainder) = rest.split_once(SEPARATOR).unwrap_or((rest, ""));
        if repository.is_empty() {
            return None;
        }
        Some((repository, remainder.trim_matches(SEPARATOR)))
    }

    /// Move this key from under `old_prefix` to under `new_prefix`.
    pub fn rebase(&self, old_prefix: &ObjectKey, new_prefix: &ObjectKey) -> Option<Self> {
        self.0
            .strip_prefix(old_prefix.as_str())
            .map(|rest| Self(format!("{}{rest}", new_prefix.as_str())))
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
