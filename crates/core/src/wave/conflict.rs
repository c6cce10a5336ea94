use super::WaveItem;
use std::collections::HashSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sensitivity {
    Strict,
    Normal,
    Relaxed,
}

const CONFLICT_PRONE_FILENAMES: &[&str] = &[
    "index.ts",
    "index.js",
    "package.json",
    "tsconfig.json",
    "__init__.py",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
];

const SHARED_COMMON_DIRS: &[&str] = &[
    "/shared/", "/common/", "/utils/", "/helpers/", "/lib/", "/types/", "/interfaces/",
    "/constants/", "/config/",
];

/// Both proposals declare `target_symbols` and the sets are disjoint:
/// no conflict regardless of what the other rules would say.
fn symbol_escape_hatch(a: &WaveItem, b: &WaveItem) -> bool {
    match (&a.target_symbols, &b.target_symbols) {
        (Some(sa), Some(sb)) => {
            let set_a: HashSet<&String> = sa.iter().collect();
            let set_b: HashSet<&String> = sb.iter().collect();
            set_a.is_disjoint(&set_b)
        }
        _ => false,
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn glob_base(path: &str) -> &str {
    // The "base" a glob-style prefix comparison cares about: everything
    // before the first wildcard-looking segment. Plain file paths (no
    // wildcards here — these are *changed files*, not patterns) just
    // return the whole path.
    path.split("*").next().unwrap_or(path)
}

fn path_overlap(a: &WaveItem, b: &WaveItem) -> bool {
    for fa in &a.files {
        for fb in &b.files {
            if fa == fb {
                return true;
            }
            if fa.starts_with(&format!("{fb}/")) || fb.starts_with(&format!("{fa}/")) {
                return true;
            }
            let base_a = glob_base(fa);
            let base_b = glob_base(fb);
            if !base_a.is_empty() && !base_b.is_empty() && (base_a.starts_with(base_b) || base_b.starts_with(base_a)) {
                return true;
            }
        }
    }
    false
}

fn sibling_conflict(a: &WaveItem, b: &WaveItem) -> bool {
    for fa in &a.files {
        for fb in &b.files {
            if fa == fb {
                continue;
            }
            if parent_dir(fa) == parent_dir(fb) {
                let prone = CONFLICT_PRONE_FILENAMES.contains(&basename(fa))
                    || CONFLICT_PRONE_FILENAMES.contains(&basename(fb));
                if prone || a.category == b.category {
                    return true;
                }
            }
        }
    }
    false
}

fn directories_of(item: &WaveItem) -> HashSet<&str> {
    item.files.iter().map(|f| parent_dir(f)).collect()
}

fn directory_jaccard(a: &WaveItem, b: &WaveItem) -> f64 {
    let dirs_a = directories_of(a);
    let dirs_b = directories_of(b);
    if dirs_a.is_empty() && dirs_b.is_empty() {
        return 0.0;
    }
    let intersection = dirs_a.intersection(&dirs_b).count();
    let union = dirs_a.union(&dirs_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn monorepo_package(path: &str) -> Option<String> {
    const ROOTS: &[&str] = &["packages/", "apps/", "libs/", "modules/"];
    for root in ROOTS {
        if let Some(rest) = path.strip_prefix(root) {
            if let Some((name, _)) = rest.split_once('/') {
                return Some(format!("{root}{name}"));
            }
        }
    }
    None
}

fn same_monorepo_package(a: &WaveItem, b: &WaveItem) -> bool {
    let pkgs_a: HashSet<String> = a.files.iter().filter_map(|f| monorepo_package(f)).collect();
    let pkgs_b: HashSet<String> = b.files.iter().filter_map(|f| monorepo_package(f)).collect();
    !pkgs_a.is_empty() && !pkgs_a.is_disjoint(&pkgs_b)
}

fn reaches_shared_common_dir(item: &WaveItem) -> bool {
    item.files
        .iter()
        .any(|f| SHARED_COMMON_DIRS.iter().any(|d| format!("/{f}").contains(d)))
}

fn both_reach_shared_common_dir(a: &WaveItem, b: &WaveItem) -> bool {
    reaches_shared_common_dir(a) && reaches_shared_common_dir(b)
}

/// Import-chain conflict: `a` and `b` touch modules connected by a
/// direct edge, in either direction. `dependency_edges` is the
/// (importer_file, imported_file) pairs the codebase index (C11)
/// surfaced; empty when no dependency graph is available.
fn import_chain_conflict(a: &WaveItem, b: &WaveItem, dependency_edges: &[(String, String)]) -> bool {
    if dependency_edges.is_empty() {
        return false;
    }
    for (from, to) in dependency_edges {
        let a_has_from = a.files.contains(from);
        let a_has_to = a.files.contains(to);
        let b_has_from = b.files.contains(from);
        let b_has_to = b.files.contains(to);
        if (a_has_from && b_has_to) || (a_has_to && b_has_from) {
            return true;
        }
    }
    false
}

/// `conflict(A, B)` from spec.md §4.4. Depends on `sensitivity`; the
/// symbol escape hatch can veto every other rule when both proposals
/// declare disjoint `target_symbols`.
pub fn conflict(
    a: &WaveItem,
    b: &WaveItem,
    sensitivity: Sensitivity,
    dependency_edges: &[(String, String)],
) -> bool {
    if symbol_escape_hatch(a, b) {
        return false;
    }

    if path_overlap(a, b) {
        return true;
    }

    match sensitivity {
        Sensitivity::Relaxed => false,
        Sensitivity::Normal | Sensitivity::Strict => {
            if sibling_conflict(a, b) {
                return true;
            }
            let threshold = if sensitivity == Sensitivity::Strict { 0.2 } else { 0.3 };
            if directory_jaccard(a, b) >= threshold {
                return true;
            }
            if import_chain_conflict(a, b, dependency_edges) {
                return true;
            }
            if sensitivity == Sensitivity::Strict {
                if same_monorepo_package(a, b) {
                    return true;
                }
                if both_reach_shared_common_dir(a, b) {
                    return true;
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, files: &[&str], category: &str) -> WaveItem {
        WaveItem {
            id: id.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            target_symbols: None,
            category: category.to_string(),
        }
    }

    #[test]
    fn same_file_always_conflicts() {
        let a = item("a", &["src/lib.rs"], "bug");
        let b = item("b", &["src/lib.rs"], "docs");
        assert!(conflict(&a, &b, Sensitivity::Relaxed, &[]));
    }

    #[test]
    fn disjoint_symbols_escape_path_overlap() {
        let mut a = item("a", &["src/lib.rs"], "bug");
        let mut b = item("b", &["src/lib.rs"], "docs");
        a.target_symbols = Some(vec!["foo".to_string()]);
        b.target_symbols = Some(vec!["bar".to_string()]);
        assert!(!conflict(&a, &b, Sensitivity::Strict, &[]));
    }

    #[test]
    fn sibling_same_category_conflicts_in_normal_mode() {
        let a = item("a", &["src/mod/a.rs"], "bug");
        let b = item("b", &["src/mod/b.rs"], "bug");
        assert!(conflict(&a, &b, Sensitivity::Normal, &[]));
    }

    #[test]
    fn sibling_different_category_non_prone_filename_does_not_conflict_in_normal() {
        let a = item("a", &["src/mod/a.rs"], "bug");
        let b = item("b", &["src/mod/b.rs"], "docs");
        assert!(!conflict(&a, &b, Sensitivity::Normal, &[]));
    }

    #[test]
    fn strict_mode_flags_shared_monorepo_package() {
        let a = item("a", &["packages/ui/a.rs"], "bug");
        let b = item("b", &["packages/ui/b.rs"], "docs");
        assert!(conflict(&a, &b, Sensitivity::Strict, &[]));
        assert!(!conflict(&a, &b, Sensitivity::Normal, &[]));
    }

    #[test]
    fn strict_mode_flags_shared_common_dir() {
        let a = item("a", &["shared/util.rs"], "bug");
        let b = item("b", &["shared/other.rs"], "docs");
        assert!(conflict(&a, &b, Sensitivity::Strict, &[]));
    }

    #[test]
    fn import_chain_edge_conflicts_in_normal_and_strict() {
        let a = item("a", &["src/a.rs"], "bug");
        let b = item("b", &["src/b.rs"], "docs");
        let edges = vec![("src/a.rs".to_string(), "src/b.rs".to_string())];
        assert!(conflict(&a, &b, Sensitivity::Normal, &edges));
        assert!(!conflict(&a, &b, Sensitivity::Relaxed, &edges));
    }
}
