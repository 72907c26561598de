//! Hierarchical glob matching of request paths.
//!
//! Patterns are split into `/` separated segments:
//!
//! - `**` matches zero or more whole segments;
//! - `*` inside a segment matches zero or more characters of that segment;
//! - `?` matches exactly one character.
//!
//! Everything else is compared literally, so a pattern like `/files/[a-z]` only
//! matches the path `/files/[a-z]`.
//!
//! A non-final `**` tries every split point of the remaining path, which makes the
//! worst case exponential in the number of `**` segments. Patterns come from the
//! operator's configuration and are short, so this is not guarded against.

/// Matches `path` against a hierarchical glob `pattern`.
///
/// # Examples
///
/// ```
/// use request_logger::pattern::glob_match;
///
/// assert!(glob_match("/api/**", "/api/v1/users"));
/// assert!(glob_match("/static/*.css", "/static/site.css"));
/// assert!(!glob_match("/a/*/c", "/a/b/d/c"));
/// ```
#[must_use]
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }

    let pattern_segments = pattern.trim_matches('/').split('/').collect::<Vec<_>>();
    let path_segments = path.trim_matches('/').split('/').collect::<Vec<_>>();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    let (mut pattern_idx, mut path_idx) = (0, 0);

    while pattern_idx < pattern.len() && path_idx < path.len() {
        let segment = pattern[pattern_idx];

        if segment == "**" {
            if pattern_idx == pattern.len() - 1 {
                return true;
            }

            let rest = &pattern[pattern_idx + 1..];
            return (path_idx..=path.len()).any(|split| match_segments(rest, &path[split..]));
        }

        if !segment_match(segment, path[path_idx]) {
            return false;
        }

        pattern_idx += 1;
        path_idx += 1;
    }

    // Trailing `**` segments may stand for nothing.
    while pattern_idx < pattern.len() && pattern[pattern_idx] == "**" {
        pattern_idx += 1;
    }

    pattern_idx == pattern.len() && path_idx == path.len()
}

fn segment_match(pattern: &str, segment: &str) -> bool {
    pattern == "*" || wildcard_match(pattern, segment)
}

/// Matches a single segment where `?` is any one character and `*` is any run of
/// characters.
#[must_use]
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let pattern = pattern.chars().collect::<Vec<_>>();
    let text = text.chars().collect::<Vec<_>>();

    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text offset it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, t));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}
