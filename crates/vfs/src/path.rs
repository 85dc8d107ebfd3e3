//! Protocol path normalization.
//!
//! The protocol engine hands out rooted paths (`/docs/report.pdf`), the object
//! store wants unrooted keys (`docs/report.pdf`, directories as `docs/`) and
//! the resource cache is keyed by the rooted form without a trailing slash.
//! [`VirtualPath`] is the only conversion point between the three, and
//! [`is_dir_key`]/[`name_of_key`] are the only places that look at a trailing
//! `/`.

use crate::error::{ErrorKind, Result};
use std::fmt;

/// A validated, rooted protocol path.
///
/// Stored as a list of non-empty segments; the root has none. Parsing
/// collapses repeated slashes and `.` segments, and resolves `..` as long as
/// it stays inside the root.
///
/// # Examples
///
/// ```
/// use ossdav_vfs::VirtualPath;
///
/// let path = VirtualPath::parse("/docs//2024/./report.pdf").unwrap();
/// assert_eq!(path.cache_key(), "/docs/2024/report.pdf");
/// assert_eq!(path.file_key(), "docs/2024/report.pdf");
/// assert_eq!(path.dir_key(), "docs/2024/report.pdf/");
/// assert_eq!(path.name(), "report.pdf");
/// assert!(VirtualPath::parse("/../etc").is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a protocol path. The leading slash is optional.
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = || exn::Exn::from(ErrorKind::InvalidPath(path.escape_default().to_string()));
        if path.contains('\0') {
            return Err(invalid());
        }
        let mut segments: Vec<String> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {},
                ".." => {
                    if segments.pop().is_none() {
                        return Err(invalid());
                    }
                },
                segment => segments.push(segment.to_string()),
            }
        }
        Ok(Self { segments })
    }

    /// Rebuild a path from an object-store key (file or directory form).
    pub fn from_key(key: &str) -> Result<Self> {
        Self::parse(key.strip_suffix('/').unwrap_or(key))
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last segment; empty for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Parent directory, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self { segments: parent.to_vec() })
    }

    /// Append a relative path below this one.
    pub fn join(&self, relative: &str) -> Result<Self> {
        let joined = format!("{}/{}", self.cache_key(), relative.trim_start_matches('/'));
        let path = Self::parse(&joined)?;
        match path.starts_with(self) {
            true => Ok(path),
            false => exn::bail!(ErrorKind::InvalidPath(joined)),
        }
    }

    /// Sibling of this path called `name`.
    pub fn with_name(&self, name: &str) -> Result<Self> {
        if self.is_root() || name.is_empty() || name.contains('/') || matches!(name, "." | "..") {
            exn::bail!(ErrorKind::InvalidPath(name.escape_default().to_string()));
        }
        let mut segments = self.segments.clone();
        if let Some(last) = segments.last_mut() {
            *last = name.to_string();
        }
        Ok(Self { segments })
    }

    /// `true` if `self` is `other` or lives somewhere below it.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.segments.starts_with(&other.segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Object key of this path as a file (no trailing slash).
    pub fn file_key(&self) -> String {
        self.segments.join("/")
    }

    /// Object key of this path as a directory (trailing slash, empty for the
    /// root so it can be used directly as a listing prefix).
    pub fn dir_key(&self) -> String {
        match self.is_root() {
            true => String::new(),
            false => format!("{}/", self.file_key()),
        }
    }

    /// Rooted key used by the resource cache (`/` for the root).
    pub fn cache_key(&self) -> String {
        format!("/{}", self.file_key())
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Whether an object key follows the directory placeholder convention.
pub fn is_dir_key(key: &str) -> bool {
    key.ends_with('/')
}

/// Last segment of an object key, ignoring the directory slash.
pub fn name_of_key(key: &str) -> &str {
    let body = key.strip_suffix('/').unwrap_or(key);
    body.rsplit('/').next().unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/", "/")]
    #[case("", "/")]
    #[case("/a", "/a")]
    #[case("a/b", "/a/b")]
    #[case("/a/b/", "/a/b")]
    #[case("//a///b", "/a/b")]
    #[case("/a/./b", "/a/b")]
    #[case("/a/c/../b", "/a/b")]
    #[case("/New Folder/notes.txt", "/New Folder/notes.txt")]
    fn test_parse(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(VirtualPath::parse(input).unwrap().cache_key(), expected);
    }

    #[rstest]
    #[case("/..")]
    #[case("/a/../..")]
    #[case("../a")]
    #[case("/a\0b")]
    fn test_parse_rejects(#[case] input: &str) {
        let err = VirtualPath::parse(input).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_root_keys() {
        let root = VirtualPath::root();
        assert!(root.is_root());
        assert_eq!(root.file_key(), "");
        assert_eq!(root.dir_key(), "");
        assert_eq!(root.cache_key(), "/");
        assert_eq!(root.name(), "");
        assert_eq!(root.parent(), None);
    }

    #[rstest]
    #[case("dir/", "/dir")]
    #[case("dir/x", "/dir/x")]
    #[case("dir/y/", "/dir/y")]
    fn test_from_key(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(VirtualPath::from_key(key).unwrap().cache_key(), expected);
    }

    #[test]
    fn test_parent_and_name() {
        let path = VirtualPath::parse("/a/b/c.txt").unwrap();
        assert_eq!(path.name(), "c.txt");
        assert_eq!(path.parent().unwrap().cache_key(), "/a/b");
        assert_eq!(VirtualPath::parse("/a").unwrap().parent(), Some(VirtualPath::root()));
    }

    #[test]
    fn test_join() {
        let base = VirtualPath::parse("/a").unwrap();
        assert_eq!(base.join("b/c").unwrap().cache_key(), "/a/b/c");
        assert_eq!(VirtualPath::root().join("x").unwrap().cache_key(), "/x");
        assert!(base.join("../escape").is_err());
    }

    #[test]
    fn test_with_name() {
        let path = VirtualPath::parse("/a/b.txt").unwrap();
        assert_eq!(path.with_name("c.txt").unwrap().cache_key(), "/a/c.txt");
        assert!(path.with_name("x/y").is_err());
        assert!(path.with_name("..").is_err());
        assert!(VirtualPath::root().with_name("x").is_err());
    }

    #[test]
    fn test_starts_with() {
        let dir = VirtualPath::parse("/dir").unwrap();
        assert!(VirtualPath::parse("/dir/x").unwrap().starts_with(&dir));
        assert!(dir.starts_with(&dir));
        assert!(!VirtualPath::parse("/dirt").unwrap().starts_with(&dir));
        assert!(dir.starts_with(&VirtualPath::root()));
    }

    #[rstest]
    #[case("dir/", true, "dir")]
    #[case("dir/y/", true, "y")]
    #[case("dir/x", false, "x")]
    #[case("a.txt", false, "a.txt")]
    fn test_key_helpers(#[case] key: &str, #[case] dir: bool, #[case] name: &str) {
        assert_eq!(is_dir_key(key), dir);
        assert_eq!(name_of_key(key), name);
    }
}
