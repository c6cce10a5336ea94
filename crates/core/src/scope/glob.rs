use globset::Glob;

/// `**`, `*`, or empty means "everything in scope" (spec.md §4.2 stage 6).
#[derive(Clone, Debug)]
pub struct Scope(String);

impl Scope {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn is_universal(&self) -> bool {
        matches!(self.0.as_str(), "**" | "*" | "")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` iff `file` is inside this scope (universal scope always
    /// matches; otherwise a glob match against the pattern).
    pub fn contains(&self, file: &str) -> bool {
        self.is_universal() || glob_matches(&self.0, file)
    }

    /// `true` iff this scope strictly contains `other`'s scope string —
    /// used to decide whether a deferred proposal should re-enter the
    /// pipeline (spec.md §9 open question (b)).
    pub fn strictly_contains(&self, other: &Scope) -> bool {
        if self.0 == other.0 {
            return false;
        }
        self.is_universal() && !other.is_universal()
    }
}

/// Glob-match `path` against `pattern`. An invalid pattern never matches
/// rather than panicking — scout/formula input is untrusted.
pub fn glob_matches(pattern: &str, path: &str) -> bool {
    let Ok(glob) = Glob::new(pattern) else {
        return false;
    };
    glob.compile_matcher().is_match(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn universal_scope_matches_everything() {
        let scope = Scope::new("**");
        assert!(scope.contains("any/nested/path.rs"));
        let scope = Scope::new("");
        assert!(scope.contains("any/nested/path.rs"));
    }

    #[test]
    fn glob_scope_restricts_matches() {
        let scope = Scope::new("src/**");
        assert!(scope.contains("src/lib/mod.rs"));
        assert!(!scope.contains("docs/readme.md"));
    }

    #[test]
    fn universal_strictly_contains_non_universal() {
        let wide = Scope::new("**");
        let narrow = Scope::new("src/**");
        assert!(wide.strictly_contains(&narrow));
        assert!(!narrow.strictly_contains(&wide));
    }
}
