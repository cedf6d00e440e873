//! Path filtering and lexical path cleaning.
//!
//! Candidate paths coming out of `/proc` are noisy: anonymous mappings, build
//! artifacts, home directories and pseudo filesystems. A path is excluded when
//! it starts with any configured prefix. The match is a plain byte prefix, not a glob.
//!
//! Paths are handled as raw bytes throughout; Linux file names need not be UTF-8.

/// Prefixes excluded when the configuration does not provide its own list.
pub const DEFAULT_IGNORED_PREFIXES: &[&str] = &[
    "anon_inode",
    "/memfd",
    "/root",
    "/home",
    "/proc",
    "/dev",
    "/tmp/go-build",
];

/// Ordered list of path prefixes excluded from the frequency map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredPrefixes(Vec<Vec<u8>>);

impl IgnoredPrefixes {
    pub fn new<I, P>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self(prefixes.into_iter().map(Into::into).collect())
    }

    /// Returns `true` if `path` starts with any configured prefix.
    pub fn is_ignored(&self, path: impl AsRef<[u8]>) -> bool {
        let path = path.as_ref();
        self.0.iter().any(|prefix| path.starts_with(prefix))
    }

    pub fn as_slice(&self) -> &[Vec<u8>] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for IgnoredPrefixes {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORED_PREFIXES.iter().map(|p| p.as_bytes()))
    }
}

/// Lexically cleans a slash-separated path.
///
/// Repeated separators collapse, `.` elements are dropped, `..` removes the
/// preceding element, and trailing separators are removed. `..` above the root
/// of an absolute path is discarded; an empty result becomes `.`.
pub fn clean_path(path: &[u8]) -> Vec<u8> {
    if path.is_empty() {
        return b".".to_vec();
    }

    let rooted = path.starts_with(b"/");
    let mut parts: Vec<&[u8]> = Vec::new();

    for element in path.split(|b| *b == b'/') {
        match element {
            b"" | b"." => {}
            b".." => {
                if parts.last().is_some_and(|last| *last != b"..") {
                    parts.pop();
                } else if !rooted {
                    parts.push(b"..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join(&b'/');
    match (rooted, joined.is_empty()) {
        (true, _) => {
            let mut cleaned = Vec::with_capacity(joined.len() + 1);
            cleaned.push(b'/');
            cleaned.extend_from_slice(&joined);
            cleaned
        }
        (false, true) => b".".to_vec(),
        (false, false) => joined,
    }
}

/// Returns `true` for cleaned paths that carry no file: `.` (unresolved) and `/`.
pub fn is_unresolved(path: &[u8]) -> bool {
    path == b"." || path == b"/"
}
