/// A contiguous line range a proposal touched within one file, used only
/// for structural merge prediction (spec.md §4.4's "Structural merge
/// prediction" subsection) — coarser than the wave conflict predicate,
/// which works off whole files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolRange {
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
}

impl SymbolRange {
    fn overlaps(&self, other: &SymbolRange) -> bool {
        self.file == other.file && self.start_line <= other.end_line && other.start_line <= self.end_line
    }

    fn adjacent(&self, other: &SymbolRange) -> bool {
        self.file == other.file
            && (self.end_line + 1 == other.start_line || other.end_line + 1 == self.start_line)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeClass {
    /// No files in common, or all touched ranges are non-overlapping and
    /// non-adjacent: safe to merge in any order.
    Safe,
    /// Touched ranges overlap or sit immediately next to each other:
    /// mergeable, but a 3-way merge is likely to need manual resolution.
    Risky,
    /// Files in common but no line-range information to compare (e.g. a
    /// rename or a generated-file diff): can't predict, treat as risky.
    Unknown,
}

/// Classify the expected merge outcome of applying `b`'s ranges on top of
/// a branch that already has `a`'s ranges applied. Used to order
/// milestone merges safest-first.
pub fn classify_merge(a: &[SymbolRange], b: &[SymbolRange]) -> MergeClass {
    let a_files: std::collections::HashSet<&str> = a.iter().map(|r| r.file.as_str()).collect();
    let b_files: std::collections::HashSet<&str> = b.iter().map(|r| r.file.as_str()).collect();
    if a_files.is_disjoint(&b_files) {
        return MergeClass::Safe;
    }

    if a.is_empty() || b.is_empty() {
        return MergeClass::Unknown;
    }

    let mut any_shared_file_without_ranges = false;
    for file in a_files.intersection(&b_files) {
        let a_ranges: Vec<&SymbolRange> = a.iter().filter(|r| r.file == *file).collect();
        let b_ranges: Vec<&SymbolRange> = b.iter().filter(|r| r.file == *file).collect();
        if a_ranges.is_empty() || b_ranges.is_empty() {
            any_shared_file_without_ranges = true;
            continue;
        }
        for ra in &a_ranges {
            for rb in &b_ranges {
                if ra.overlaps(rb) || ra.adjacent(rb) {
                    return MergeClass::Risky;
                }
            }
        }
    }

    if any_shared_file_without_ranges {
        return MergeClass::Unknown;
    }

    MergeClass::Safe
}

/// Order a batch of (id, ranges) pairs safest-first relative to what has
/// already landed on the milestone branch, so the merge driver (C5)
/// attempts low-risk merges before ones likely to need AI-assisted
/// conflict resolution.
pub fn order_safest_first<'a>(
    landed: &[SymbolRange],
    candidates: &'a [(String, Vec<SymbolRange>)],
) -> Vec<&'a str> {
    let mut scored: Vec<(&str, MergeClass)> = candidates
        .iter()
        .map(|(id, ranges)| (id.as_str(), classify_merge(landed, ranges)))
        .collect();
    scored.sort_by_key(|(_, class)| match class {
        MergeClass::Safe => 0,
        MergeClass::Unknown => 1,
        MergeClass::Risky => 2,
    });
    scored.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(file: &str, start: u32, end: u32) -> SymbolRange {
        SymbolRange {
            file: file.to_string(),
            start_line: start,
            end_line: end,
        }
    }

    #[test]
    fn disjoint_files_are_safe() {
        let a = vec![range("a.rs", 1, 10)];
        let b = vec![range("b.rs", 1, 10)];
        assert_eq!(classify_merge(&a, &b), MergeClass::Safe);
    }

    #[test]
    fn non_overlapping_ranges_in_same_file_are_safe() {
        let a = vec![range("a.rs", 1, 10)];
        let b = vec![range("a.rs", 50, 60)];
        assert_eq!(classify_merge(&a, &b), MergeClass::Safe);
    }

    #[test]
    fn overlapping_ranges_are_risky() {
        let a = vec![range("a.rs", 1, 10)];
        let b = vec![range("a.rs", 8, 20)];
        assert_eq!(classify_merge(&a, &b), MergeClass::Risky);
    }

    #[test]
    fn adjacent_ranges_are_risky() {
        let a = vec![range("a.rs", 1, 10)];
        let b = vec![range("a.rs", 11, 20)];
        assert_eq!(classify_merge(&a, &b), MergeClass::Risky);
    }

    #[test]
    fn safest_first_ordering_puts_safe_before_risky() {
        let landed = vec![range("a.rs", 1, 10)];
        let candidates = vec![
            ("risky".to_string(), vec![range("a.rs", 5, 15)]),
            ("safe".to_string(), vec![range("b.rs", 1, 5)]),
        ];
        let order = order_safest_first(&landed, &candidates);
        assert_eq!(order, vec!["safe", "risky"]);
    }
}
