//! Namespace path helpers.
//!
//! Paths are absolute, `/`-separated, with no empty segments and no trailing
//! separator (except the root itself).

use super::{CoordResult, CoordinationError};

/// Namespace separator.
pub const SEPARATOR: char = '/';

/// The namespace root.
pub const ROOT: &str = "/";

/// Check that `path` is a well-formed absolute namespace path.
pub fn validate(path: &str) -> CoordResult<()> {
    if path.is_empty() {
        return Err(CoordinationError::BadArguments(
            "path must not be empty".to_string(),
        ));
    }
    if !path.starts_with(SEPARATOR) {
        return Err(CoordinationError::BadArguments(format!(
            "path must start with '{}': {}",
            SEPARATOR, path
        )));
    }
    if path == ROOT {
        return Ok(());
    }
    if path.ends_with(SEPARATOR) {
        return Err(CoordinationError::BadArguments(format!(
            "path must not end with '{}': {}",
            SEPARATOR, path
        )));
    }
    if path[1..].split(SEPARATOR).any(|segment| segment.is_empty()) {
        return Err(CoordinationError::BadArguments(format!(
            "path contains an empty segment: {}",
            path
        )));
    }
    Ok(())
}

/// Parent of `path`, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT {
        return None;
    }
    match path.rfind(SEPARATOR) {
        Some(0) => Some(ROOT),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last segment of `path`.
pub fn name(path: &str) -> &str {
    path.rsplit(SEPARATOR).next().unwrap_or(path)
}

/// Join a child name onto a parent path.
pub fn join(parent: &str, child: &str) -> String {
    if parent == ROOT {
        format!("{}{}", ROOT, child)
    } else {
        format!("{}{}{}", parent, SEPARATOR, child)
    }
}

/// Every non-root prefix of `path`, outermost first.
///
/// `/a/b/c` yields `/a`, `/a/b`, `/a/b/c`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices(SEPARATOR)
        .map(|(idx, _)| idx)
        .skip(1)
        .chain(std::iter::once(path.len()))
        .map(move |end| &path[..end])
        .filter(|prefix| *prefix != ROOT)
}

/// Numeric sequence suffix of a sequentially-named node.
///
/// `lock-0000000042` yields `Some(42)`; names without trailing digits yield `None`.
pub fn sequence_of(name: &str) -> Option<u64> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

/// Render a sequential node name the way the service assigns it.
pub fn sequential_name(prefix: &str, sequence: u64) -> String {
    format!("{}{:010}", prefix, sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_absolute_paths() {
        assert!(validate("/").is_ok());
        assert!(validate("/locks").is_ok());
        assert!(validate("/locks/cache-dir").is_ok());
    }

    #[test]
    fn validate_rejects_malformed_paths() {
        assert!(validate("").is_err());
        assert!(validate("locks").is_err());
        assert!(validate("/locks/").is_err());
        assert!(validate("/locks//cache").is_err());
    }

    #[test]
    fn parent_walks_up_to_root() {
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a/b", "c"), "/a/b/c");
        assert_eq!(name("/a/b/c"), "c");
    }

    #[test]
    fn ancestors_are_outermost_first() {
        let got: Vec<&str> = ancestors("/a/b/c").collect();
        assert_eq!(got, vec!["/a", "/a/b", "/a/b/c"]);

        let got: Vec<&str> = ancestors("/a").collect();
        assert_eq!(got, vec!["/a"]);

        assert_eq!(ancestors("/").count(), 0);
    }

    #[test]
    fn sequence_suffix_parsing() {
        assert_eq!(sequence_of("lock-0000000042"), Some(42));
        assert_eq!(sequence_of("0000000007"), Some(7));
        assert_eq!(sequence_of("lock-"), None);
        assert_eq!(sequence_of("readme"), None);
        assert_eq!(sequential_name("lock-", 3), "lock-0000000003");
    }
}
