use super::glob::glob_matches;
use super::normalize::is_hallucinated;

/// Per-changed-file classification used by scope-violation analysis
/// (spec.md §4.3). Ordered by severity: `InForbidden` always wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationClass {
    InForbidden,
    Hallucinated,
    NotInAllowed,
    Clean,
}

pub fn classify(file: &str, allowed: &[String], forbidden: &[String]) -> ViolationClass {
    if forbidden.iter().any(|pat| glob_matches(pat, file)) {
        return ViolationClass::InForbidden;
    }
    if is_hallucinated(file) {
        return ViolationClass::Hallucinated;
    }
    if allowed.is_empty() || allowed.iter().any(|pat| glob_matches(pat, file)) {
        return ViolationClass::Clean;
    }
    ViolationClass::NotInAllowed
}

#[derive(Clone, Debug)]
pub struct ViolationDecision {
    /// `true` when any violation hard-stops auto-expansion (forbidden or
    /// hallucinated); in that case `expandable` is always empty and the
    /// ticket must be blocked.
    pub hard_stop: bool,
    /// Files that can be folded into `allowedPaths` because they are a
    /// sibling or related test/type/impl file of an already-allowed file.
    pub expandable: Vec<String>,
    /// Every file outside `Clean`, for diagnostics (§7 "violation list").
    pub violations: Vec<(String, ViolationClass)>,
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn stem_without_suffixes(path: &str) -> String {
    let basename = path.rsplit('/').next().unwrap_or(path);
    let without_ext = basename.rsplit_once('.').map(|(s, _)| s).unwrap_or(basename);
    const SUFFIXES: &[&str] = &[
        "_test", ".test", "_spec", ".spec", "Test", "Impl", "_impl", ".types", ".d",
    ];
    let mut stem = without_ext.to_string();
    for suffix in SUFFIXES {
        if let Some(stripped) = stem.strip_suffix(suffix) {
            stem = stripped.to_string();
        }
    }
    stem
}

/// `true` when `candidate` is a sibling (same directory) of `allowed`, or
/// shares a stem after stripping common test/type/impl suffixes (e.g.
/// `parser.rs` and `parser_test.rs`, or `widget.ts` and `widget.types.ts`).
fn is_related(candidate: &str, allowed: &str) -> bool {
    if parent_dir(candidate) == parent_dir(allowed) {
        return true;
    }
    stem_without_suffixes(candidate) == stem_without_suffixes(allowed)
}

/// Analyze changed files against the ticket's current allow/forbid
/// lists, deciding which out-of-scope files can be auto-folded into
/// `allowedPaths` (spec.md §4.3, §4.6 step 6, §7).
///
/// Hard-stops (no expansion at all) on any forbidden or hallucinated
/// file. Otherwise every `NotInAllowed` file must be a sibling/related
/// file of something already allowed, and the total number of additions
/// is capped at `max_expansions`.
pub fn analyze_violations(
    changed_files: &[String],
    allowed: &[String],
    forbidden: &[String],
    max_expansions: usize,
) -> ViolationDecision {
    let mut violations = Vec::new();
    let mut candidates = Vec::new();
    let mut hard_stop = false;

    for file in changed_files {
        match classify(file, allowed, forbidden) {
            ViolationClass::Clean => continue,
            ViolationClass::InForbidden => {
                hard_stop = true;
                violations.push((file.clone(), ViolationClass::InForbidden));
            }
            ViolationClass::Hallucinated => {
                hard_stop = true;
                violations.push((file.clone(), ViolationClass::Hallucinated));
            }
            ViolationClass::NotInAllowed => {
                violations.push((file.clone(), ViolationClass::NotInAllowed));
                candidates.push(file.clone());
            }
        }
    }

    if hard_stop {
        return ViolationDecision {
            hard_stop: true,
            expandable: Vec::new(),
            violations,
        };
    }

    let mut expandable = Vec::new();
    for candidate in candidates {
        if expandable.len() >= max_expansions {
            break;
        }
        if allowed.iter().any(|a| is_related(&candidate, a)) {
            expandable.push(candidate);
        }
    }

    // Only a genuine hard-stop blocks the ticket; anything left over that
    // isn't expandable (not a sibling/related file of an allowed one) still
    // blocks, since we can't silently widen scope for an unrelated file.
    let all_candidates_expandable = violations
        .iter()
        .filter(|(_, c)| *c == ViolationClass::NotInAllowed)
        .all(|(f, _)| expandable.contains(f));

    ViolationDecision {
        hard_stop: !all_candidates_expandable,
        expandable,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_file_hard_stops() {
        let decision = analyze_violations(
            &["config/secrets.json".to_string()],
            &["src/lib/index.ts".to_string()],
            &["config/**".to_string()],
            5,
        );
        assert!(decision.hard_stop);
        assert!(decision.expandable.is_empty());
    }

    #[test]
    fn sibling_file_auto_expands() {
        let decision = analyze_violations(
            &["src/lib/helpers.ts".to_string()],
            &["src/lib/index.ts".to_string()],
            &[],
            5,
        );
        assert!(!decision.hard_stop);
        assert_eq!(decision.expandable, vec!["src/lib/helpers.ts".to_string()]);
    }

    #[test]
    fn unrelated_file_blocks_without_expansion() {
        let decision = analyze_violations(
            &["other/module/unrelated.ts".to_string()],
            &["src/lib/index.ts".to_string()],
            &[],
            5,
        );
        assert!(decision.hard_stop);
        assert!(decision.expandable.is_empty());
    }

    #[test]
    fn expansion_cap_limits_additions() {
        let changed = vec![
            "src/lib/a.ts".to_string(),
            "src/lib/b.ts".to_string(),
            "src/lib/c.ts".to_string(),
        ];
        let decision = analyze_violations(&changed, &["src/lib/index.ts".to_string()], &[], 2);
        assert_eq!(decision.expandable.len(), 2);
        assert!(decision.hard_stop, "third file couldn't be expanded, so it still blocks");
    }
}
