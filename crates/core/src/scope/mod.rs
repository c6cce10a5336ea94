//! Scope & safety (C3): path normalization, hallucinated-path detection,
//! credential detection, allow/deny glob decisions, and bounded
//! scope-violation analysis for auto-expansion.

mod credential;
mod glob;
mod normalize;
mod violations;

pub use credential::{is_credential_filename, is_credential_content, CredentialMatch};
pub use glob::{glob_matches, Scope};
pub use normalize::{normalize_path, PathIssue};
pub use violations::{analyze_violations, ViolationClass, ViolationDecision};

/// `isPathAllowed(path, allow, deny)` from spec.md §4.3.
///
/// Deny takes priority over allow; a credential-pattern match always
/// denies regardless of the allow list; an empty allow list means
/// "allow everything not otherwise denied".
pub fn is_path_allowed(path: &str, allow: &[String], deny: &[String]) -> bool {
    let normalized = normalize_path(path);
    let normalized = match normalized {
        Ok(p) => p,
        Err(_) => return false,
    };

    if deny.iter().any(|pat| glob_matches(pat, &normalized)) {
        return false;
    }
    if is_credential_filename(&normalized) {
        return false;
    }
    if allow.is_empty() {
        return true;
    }
    allow.iter().any(|pat| glob_matches(pat, &normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_wins_over_allow() {
        assert!(!is_path_allowed(
            "src/secrets.json",
            &["**".to_string()],
            &["**/secrets.json".to_string()]
        ));
    }

    #[test]
    fn empty_allow_allows_everything_not_denied() {
        assert!(is_path_allowed("src/lib.rs", &[], &[]));
    }

    #[test]
    fn credential_filename_denies_regardless_of_allow() {
        assert!(!is_path_allowed(".env", &["**".to_string()], &[]));
        assert!(!is_path_allowed(
            "config/credentials.json",
            &["**".to_string()],
            &[]
        ));
    }

    #[test]
    fn allow_list_restricts_to_matches() {
        assert!(is_path_allowed("src/lib.rs", &["src/**".to_string()], &[]));
        assert!(!is_path_allowed(
            "docs/readme.md",
            &["src/**".to_string()],
            &[]
        ));
    }
}
