//! Codebase index (C11): an "external collaborator, interface only"
//! component per spec.md §2, but shipped with a minimal real
//! implementation so the crate builds and the scout prompt has content
//! to work from. `FsCodebaseIndex` walks the scope, buckets files into
//! `Sector`s by top-level directory, computes a line-regex import-edge
//! graph (not a real parser — Non-goals exclude that), and exposes
//! per-directory hotspots by mtime-derived churn.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use spin_core::scope::Scope;

#[derive(Debug)]
pub struct IndexError(pub String);

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "codebase index error: {}", self.0)
    }
}

impl std::error::Error for IndexError {}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError(e.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ModuleSummary {
    pub path: String,
    pub sector: String,
    pub line_count: usize,
}

#[derive(Clone, Debug)]
pub struct Hotspot {
    pub path: String,
    pub churn_score: f64,
    pub last_touched_ms: i64,
}

pub trait CodebaseIndex {
    fn refresh(&mut self, repo_root: &Path, scope: &Scope) -> Result<(), IndexError>;
    fn modules(&self) -> &[ModuleSummary];
    fn hotspots(&self) -> &[Hotspot];
    fn dependents_of(&self, file: &str) -> &[String];
}

const IGNORED_DIRS: &[&str] = &[".git", "target", "node_modules", ".spin", "dist", "build"];
const SOURCE_EXTENSIONS: &[&str] = &["rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "rb"];

fn sector_of(repo_relative: &Path) -> String {
    repo_relative
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string())
}

fn walk(dir: &Path, repo_root: &Path, scope: &Scope, out: &mut Vec<PathBuf>) -> Result<(), IndexError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if entry.file_type()?.is_dir() {
            if IGNORED_DIRS.contains(&name.as_ref()) {
                continue;
            }
            walk(&path, repo_root, scope, out)?;
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }
        let relative = path.strip_prefix(repo_root).unwrap_or(&path);
        if scope.contains(&relative.to_string_lossy()) {
            out.push(path);
        }
    }
    Ok(())
}

/// Lines matching `(use|import|require)\s+<path-ish token>` — a naive
/// heuristic, never a language parser.
fn import_targets(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("use ")
        .or_else(|| trimmed.strip_prefix("import "))
        .or_else(|| trimmed.strip_prefix("require("))?;
    let token: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || "_:./-\"'".contains(*c))
        .collect();
    let cleaned = token.trim_matches(|c| c == '"' || c == '\'' || c == ';' || c == '(');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

#[derive(Default)]
pub struct FsCodebaseIndex {
    modules: Vec<ModuleSummary>,
    hotspots: Vec<Hotspot>,
    dependents: HashMap<String, Vec<String>>,
    empty: Vec<String>,
}

impl FsCodebaseIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CodebaseIndex for FsCodebaseIndex {
    fn refresh(&mut self, repo_root: &Path, scope: &Scope) -> Result<(), IndexError> {
        let mut files = Vec::new();
        walk(repo_root, repo_root, scope, &mut files)?;

        let mut modules = Vec::with_capacity(files.len());
        let mut hotspots = Vec::with_capacity(files.len());
        let mut edges: HashMap<String, Vec<String>> = HashMap::new();

        for path in &files {
            let relative = path.strip_prefix(repo_root).unwrap_or(path);
            let relative_str = relative.to_string_lossy().into_owned();
            let text = fs::read_to_string(path).unwrap_or_default();
            let line_count = text.lines().count();

            modules.push(ModuleSummary {
                path: relative_str.clone(),
                sector: sector_of(relative),
                line_count,
            });

            let mut targets: Vec<String> = text.lines().filter_map(import_targets).collect();
            targets.sort();
            targets.dedup();
            if !targets.is_empty() {
                edges.insert(relative_str.clone(), targets);
            }

            let metadata = fs::metadata(path)?;
            let modified_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            hotspots.push(Hotspot {
                path: relative_str,
                churn_score: line_count as f64,
                last_touched_ms: modified_ms,
            });
        }

        hotspots.sort_by(|a, b| b.churn_score.partial_cmp(&a.churn_score).unwrap_or(std::cmp::Ordering::Equal));

        self.modules = modules;
        self.hotspots = hotspots;
        self.dependents = invert_edges(&edges);
        Ok(())
    }

    fn modules(&self) -> &[ModuleSummary] {
        &self.modules
    }

    fn hotspots(&self) -> &[Hotspot] {
        &self.hotspots
    }

    fn dependents_of(&self, file: &str) -> &[String] {
        self.dependents.get(file).map(Vec::as_slice).unwrap_or(&self.empty)
    }
}

fn invert_edges(edges: &HashMap<String, Vec<String>>) -> HashMap<String, Vec<String>> {
    let mut inverted: HashMap<String, Vec<String>> = HashMap::new();
    for (from, targets) in edges {
        for target in targets {
            inverted.entry(target.clone()).or_default().push(from.clone());
        }
    }
    inverted
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn refresh_buckets_modules_into_sectors() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src/core")).unwrap();
        let mut f = fs::File::create(dir.path().join("src/core/lib.rs")).unwrap();
        writeln!(f, "use crate::foo;\nfn main() {{}}\n").unwrap();

        let mut index = FsCodebaseIndex::new();
        index.refresh(dir.path(), &Scope::new("**")).unwrap();

        assert_eq!(index.modules().len(), 1);
        assert_eq!(index.modules()[0].sector, "src");
    }

    #[test]
    fn refresh_ignores_target_and_git_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        fs::write(dir.path().join("target/debug/x.rs"), "fn x() {}").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/y.rs"), "fn y() {}").unwrap();

        let mut index = FsCodebaseIndex::new();
        index.refresh(dir.path(), &Scope::new("**")).unwrap();

        assert_eq!(index.modules().len(), 1);
        assert_eq!(index.modules()[0].path, "src/y.rs");
    }

    #[test]
    fn hotspots_are_sorted_by_churn_descending() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("small.rs"), "fn a() {}\n").unwrap();
        fs::write(dir.path().join("big.rs"), "fn a() {}\n".repeat(50)).unwrap();

        let mut index = FsCodebaseIndex::new();
        index.refresh(dir.path(), &Scope::new("**")).unwrap();

        assert_eq!(index.hotspots()[0].path, "big.rs");
    }

    #[test]
    fn dependents_of_reflects_import_edges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "use b;\nfn a() {}\n").unwrap();
        fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();

        let mut index = FsCodebaseIndex::new();
        index.refresh(dir.path(), &Scope::new("**")).unwrap();

        assert_eq!(index.dependents_of("b"), vec!["a.rs".to_string()]);
    }
}
