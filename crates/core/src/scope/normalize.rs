/// Why a path was rejected as hallucinated (spec.md §4.3, §7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathIssue {
    RepeatedSegment,
    DoubleSlash,
}

/// Detect a hallucinated path *before* any slash-collapsing: a `//` that
/// the model invented (rather than a harmless artifact of path joining)
/// is a signal worth rejecting outright, not silently fixing up. Applied
/// after backslash-to-`/` conversion and leading-`./` stripping only, so
/// a genuinely doubled slash in the caller's input is never hidden by
/// the same collapse step that normalizes cosmetic issues.
fn detect_issue(raw: &str) -> Option<PathIssue> {
    let slashed = raw.replace('\\', "/");
    let stripped = slashed.strip_prefix("./").unwrap_or(&slashed).to_string();

    if stripped.contains("//") {
        return Some(PathIssue::DoubleSlash);
    }

    let trimmed = stripped.trim_end_matches('/');
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
    for pair in segments.windows(2) {
        if pair[0] == pair[1] {
            return Some(PathIssue::RepeatedSegment);
        }
    }
    None
}

/// Convert backslashes to `/`, strip a leading `./`, collapse `//+`, drop
/// a trailing `/`. Rejects inputs `detect_issue` flags as hallucinated
/// instead of normalizing them away.
pub fn normalize_path(raw: &str) -> Result<String, PathIssue> {
    if let Some(issue) = detect_issue(raw) {
        return Err(issue);
    }

    let slashed = raw.replace('\\', "/");
    let stripped = slashed.strip_prefix("./").unwrap_or(&slashed);

    let mut collapsed = String::with_capacity(stripped.len());
    let mut last_was_slash = false;
    for ch in stripped.chars() {
        if ch == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(ch);
    }
    Ok(collapsed.trim_end_matches('/').to_string())
}

/// `true` iff the raw path would be rejected by `normalize_path`.
pub fn is_hallucinated(raw: &str) -> bool {
    normalize_path(raw).is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_backslashes_and_strips_leading_dot_slash() {
        assert_eq!(normalize_path("./src\\lib.rs").unwrap(), "src/lib.rs");
    }

    #[test]
    fn rejects_doubled_slash_instead_of_silently_fixing_it() {
        assert_eq!(normalize_path("src//lib.rs"), Err(PathIssue::DoubleSlash));
    }

    #[test]
    fn rejects_repeated_identical_segments() {
        assert_eq!(
            normalize_path("src/lib/lib/mod.rs"),
            Err(PathIssue::RepeatedSegment)
        );
    }

    #[test]
    fn plain_paths_pass_through_unchanged() {
        assert_eq!(normalize_path("a/b"), Ok("a/b".to_string()));
        assert!(!is_hallucinated("src/lib/mod.rs"));
    }

    #[test]
    fn drops_trailing_slash() {
        assert_eq!(normalize_path("src/lib/"), Ok("src/lib".to_string()));
    }
}
