//! Best-effort path normalization for reconciliation comparisons.
//!
//! Paths coming out of the model are strings, not filesystem objects, so the
//! comparison stays at the string level: no canonicalization, no symlink
//! resolution. Both sides of a comparison must go through the same function.

/// Normalize a path string for set comparison.
///
/// Steps, in order: unify separators to `/`, strip a literal project-root
/// prefix, strip a drive or scheme prefix (`C:`, `file:`), strip any leading
/// slashes.
pub fn normalize(path: &str, project_root: &str) -> String {
    let mut p = path.replace('\\', "/");
    let root = project_root.replace('\\', "/");
    let root = root.trim_end_matches('/');
    if !root.is_empty()
        && let Some(rest) = p.strip_prefix(root)
    {
        p = rest.to_string();
    }
    // Drive letter or URI scheme before the first slash.
    if let Some(colon) = p.find(':')
        && p[..colon].chars().all(|c| c.is_ascii_alphanumeric())
        && !p[..colon].is_empty()
    {
        p = p[colon + 1..].to_string();
    }
    p.trim_start_matches('/').to_string()
}

/// True when `required` is covered by `changed`, comparing normalized forms.
pub fn covers(changed: &[String], required: &str, project_root: &str) -> bool {
    let want = normalize(required, project_root);
    changed.iter().any(|c| normalize(c, project_root) == want)
}

/// Pull file-path-looking tokens out of free text (gap descriptions).
///
/// A token qualifies when it contains a directory separator and ends in a
/// dotted extension. Heuristic by design; misses are acceptable because the
/// result only feeds advisory suggestions.
pub fn path_like_tokens(text: &str) -> Vec<String> {
    use std::sync::LazyLock;
    static PATH_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"[\w.-]+(?:[/\\][\w.-]+)+\.\w+").expect("path token pattern")
    });
    PATH_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}
