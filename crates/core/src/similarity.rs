//! Title similarity (bigram Jaccard) and file-set overlap, used by the
//! proposal pipeline's dedup stages (spec.md §4.2 stages 7–8) and by the
//! wave scheduler's conflict predicate (§4.4).

use std::collections::HashSet;

fn normalize_for_bigrams(title: &str) -> String {
    title
        .to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn bigrams(title: &str) -> HashSet<String> {
    let normalized = normalize_for_bigrams(title);
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() < 2 {
        return chars.iter().map(|c| c.to_string()).collect();
    }
    chars
        .windows(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect()
}

/// Jaccard similarity over character bigrams of two titles, in `[0, 1]`.
/// Used as the dedup threshold gate (≥ 0.7 means "duplicate").
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let set_a = bigrams(a);
    let set_b = bigrams(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// `true` when two file lists overlap bidirectionally and both have at
/// least `min_files` entries (spec.md §4.2 stage 8's "full file-set
/// overlap" dedup rule). Glob-aware: an entry in one list matches the
/// other if it is identical or a glob-match against it.
pub fn file_sets_fully_overlap(a: &[String], b: &[String], min_files: usize) -> bool {
    if a.len() < min_files || b.len() < min_files {
        return false;
    }
    let a_covered = a
        .iter()
        .all(|fa| b.iter().any(|fb| fa == fb || super::scope::glob_matches(fb, fa)));
    let b_covered = b
        .iter()
        .all(|fb| a.iter().any(|fa| fa == fb || super::scope::glob_matches(fa, fb)));
    a_covered && b_covered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_identical_titles_score_above_threshold() {
        let sim = title_similarity("Add tests for parser", "Add tests for the parser");
        assert!(sim >= 0.7, "similarity was {sim}");
    }

    #[test]
    fn unrelated_titles_score_low() {
        let sim = title_similarity("Add tests for parser", "Refactor database connection pool");
        assert!(sim < 0.3, "similarity was {sim}");
    }

    #[test]
    fn identical_titles_score_one() {
        assert_eq!(title_similarity("same title", "same title"), 1.0);
    }

    #[test]
    fn file_sets_overlap_requires_minimum_size() {
        let a = vec!["a.rs".to_string(), "b.rs".to_string()];
        let b = vec!["a.rs".to_string(), "b.rs".to_string()];
        assert!(!file_sets_fully_overlap(&a, &b, 3));
        assert!(file_sets_fully_overlap(&a, &b, 2));
    }

    #[test]
    fn file_sets_must_overlap_bidirectionally() {
        let a = vec!["a.rs".to_string(), "b.rs".to_string(), "c.rs".to_string()];
        let b = vec!["a.rs".to_string(), "b.rs".to_string(), "d.rs".to_string()];
        assert!(!file_sets_fully_overlap(&a, &b, 3));
    }
}
