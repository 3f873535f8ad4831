//! String-level path algebra.
//!
//! Paths are `/`-separated. The root is `/`. Identifier references are
//! written as a bracketed identifier, e.g. `[0f6d...]`.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::TypeError;

/// The root path.
pub const ROOT: &str = "/";

/// Returns `true` if `path` starts at the root.
pub fn is_absolute(path: &str) -> bool {
    path.starts_with('/')
}

/// Normalize `.` and `..` segments and collapse repeated separators.
///
/// `..` above the root is dropped. An absolute input always yields an
/// absolute output; the empty relative path normalizes to `""`.
pub fn normalize(path: &str) -> String {
    let absolute = is_absolute(path);
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    let joined = stack.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Resolve `rel` against `root` and normalize. Absolute `rel` ignores `root`.
pub fn absolute(root: &str, rel: &str) -> String {
    if is_absolute(rel) {
        return normalize(rel);
    }
    if rel.is_empty() {
        return normalize(root);
    }
    normalize(&format!("{}/{}", root.trim_end_matches('/'), rel))
}

/// Check that `path` is absolute and carries no characters forbidden in names.
pub fn validate_absolute(path: &str) -> Result<(), TypeError> {
    if !is_absolute(path) {
        return Err(TypeError::InvalidPath(format!("{path} is not absolute")));
    }
    if path.contains(['[', ']', '*', '|']) {
        return Err(TypeError::InvalidPath(format!(
            "{path} contains an illegal character"
        )));
    }
    Ok(())
}

/// Parent of `path`. The root is its own parent.
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => ROOT.to_string(),
        Some(i) => path[..i].to_string(),
    }
}

/// Final segment of `path`. The root has the empty name.
pub fn name(path: &str) -> &str {
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Append a single child name to `parent`.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// Returns `true` if `path` lies strictly below `ancestor`.
pub fn is_descendant(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT {
        return path != ROOT && is_absolute(path);
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

/// Returns `true` if `path` equals `ancestor` or lies below it.
pub fn is_descendant_or_self(path: &str, ancestor: &str) -> bool {
    path == ancestor || is_descendant(path, ancestor)
}

/// Replace the `from` prefix of `path` with `to`.
///
/// Returns `None` if `path` is not at or below `from`.
pub fn rebase(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    if !is_descendant(path, from) {
        return None;
    }
    let rest = if from == ROOT {
        &path[1..]
    } else {
        &path[from.len() + 1..]
    };
    Some(join(to, rest))
}

/// Depth of `path`: the number of segments below the root.
pub fn depth(path: &str) -> usize {
    path.split('/').filter(|s| !s.is_empty()).count()
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\[([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\]$",
        )
        .expect("static identifier pattern")
    })
}

/// Extract the identifier from a bracketed identifier reference.
pub fn identifier_reference(path: &str) -> Option<&str> {
    identifier_regex()
        .captures(path)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Returns `true` if `value` looks like a node identifier.
pub fn is_identifier(value: &str) -> bool {
    identifier_reference(&format!("[{value}]")).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize("/a//b/"), "/a/b");
        assert_eq!(normalize("/.."), "/");
        assert_eq!(normalize("/../a"), "/a");
        assert_eq!(normalize("a/../../b"), "b");
        assert_eq!(normalize("/"), "/");
    }

    #[test]
    fn absolute_joins_relative() {
        assert_eq!(absolute("/a", "b"), "/a/b");
        assert_eq!(absolute("/", "b"), "/b");
        assert_eq!(absolute("/a/b", ".."), "/a");
        assert_eq!(absolute("/a", "/x"), "/x");
        assert_eq!(absolute("/a", ""), "/a");
    }

    #[test]
    fn validate_rejects_relative_and_brackets() {
        assert!(validate_absolute("/a/b").is_ok());
        assert!(validate_absolute("a/b").is_err());
        assert!(validate_absolute("/a[1]").is_err());
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("/a/b"), "/a");
        assert_eq!(parent("/a"), "/");
        assert_eq!(parent("/"), "/");
        assert_eq!(name("/a/b"), "b");
        assert_eq!(name("/"), "");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn descendant_checks_respect_segments() {
        assert!(is_descendant("/a/b", "/a"));
        assert!(!is_descendant("/ab", "/a"));
        assert!(!is_descendant("/a", "/a"));
        assert!(is_descendant_or_self("/a", "/a"));
        assert!(is_descendant("/a", "/"));
        assert!(!is_descendant("/", "/"));
    }

    #[test]
    fn rebase_replaces_prefix() {
        assert_eq!(rebase("/a/b/c", "/a/b", "/x").as_deref(), Some("/x/c"));
        assert_eq!(rebase("/a/b", "/a/b", "/x").as_deref(), Some("/x"));
        assert_eq!(rebase("/a/bc", "/a/b", "/x"), None);
        assert_eq!(rebase("/a", "/", "/x").as_deref(), Some("/x/a"));
    }

    #[test]
    fn depth_counts_segments() {
        assert_eq!(depth("/"), 0);
        assert_eq!(depth("/a/b"), 2);
    }

    #[test]
    fn identifier_references() {
        let id = "842e61c0-09ab-42a9-87c0-308ccc90e6f4";
        assert_eq!(identifier_reference(&format!("[{id}]")), Some(id));
        assert_eq!(identifier_reference(id), None);
        assert!(is_identifier(id));
        assert!(is_identifier(&id.to_uppercase()));
        assert!(!is_identifier("not-a-uuid"));
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(segments in prop::collection::vec("[a-z]{1,3}|\\.|\\.\\.", 0..8)) {
            let path = format!("/{}", segments.join("/"));
            let once = normalize(&path);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert!(is_absolute(&once));
            prop_assert!(once.split('/').all(|s| s != "." && s != ".."));
        }
    }
}
