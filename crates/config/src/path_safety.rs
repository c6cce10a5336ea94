//! Filename/path safety validation for Formula/Goal/Trajectory files
//! (spec.md §6): unsafe filenames and paths escaping the resource
//! directory are rejected before the file is ever opened.

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct UnsafeNameError(pub String);

impl std::fmt::Display for UnsafeNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unsafe resource name: {}", self.0)
    }
}

impl std::error::Error for UnsafeNameError {}

fn is_safe_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Validate `name` (e.g. a formula name from a CLI flag or YAML
/// filename stem) and resolve it to `<dir>/<name>.yaml`, rejecting
/// anything that could escape `dir`: non-alphanumeric-leading names,
/// `..`, absolute paths, or UNC-style paths.
pub fn resolve_resource_path(dir: &Path, name: &str) -> Result<PathBuf, UnsafeNameError> {
    if !is_safe_name(name) {
        return Err(UnsafeNameError(format!(
            "name must match ^[A-Za-z0-9][A-Za-z0-9_-]*$: {name}"
        )));
    }
    if name.contains("..") {
        return Err(UnsafeNameError(format!("path traversal in name: {name}")));
    }
    if Path::new(name).is_absolute() || name.starts_with("\\\\") {
        return Err(UnsafeNameError(format!("absolute or UNC path not allowed: {name}")));
    }
    Ok(dir.join(format!("{name}.yaml")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_names() {
        let path = resolve_resource_path(Path::new("/repo/.spin/formulas"), "perf-focus").unwrap();
        assert_eq!(path, Path::new("/repo/.spin/formulas/perf-focus.yaml"));
    }

    #[test]
    fn rejects_names_with_dotdot() {
        assert!(resolve_resource_path(Path::new("/repo/.spin/formulas"), "../secrets").is_err());
    }

    #[test]
    fn rejects_names_starting_with_punctuation() {
        assert!(resolve_resource_path(Path::new("/repo/.spin/formulas"), "-leading-dash").is_err());
        assert!(resolve_resource_path(Path::new("/repo/.spin/formulas"), ".hidden").is_err());
    }

    #[test]
    fn rejects_absolute_paths() {
        assert!(resolve_resource_path(Path::new("/repo/.spin/formulas"), "/etc/passwd").is_err());
    }

    #[test]
    fn rejects_unc_paths() {
        assert!(resolve_resource_path(Path::new("/repo/.spin/formulas"), "\\\\server\\share").is_err());
    }
}
