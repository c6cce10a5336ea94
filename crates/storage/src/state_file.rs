//! Atomic `.tmp`-then-rename JSON persistence for `RunState`,
//! `TrajectoryState`, and the other append-light/replace-whole state
//! blobs C9/C10 own (spec.md §5: "RunState atomic file swap"). Grounded
//! on the teacher's durability stance (`SqliteStore` never leaves a
//! half-written file on disk) generalized to plain JSON state outside
//! the database.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Write `value` to `path` by writing to `path.tmp` first, flushing,
/// then renaming over the final path. A crash mid-write leaves the
/// previous `path` untouched and an orphaned `.tmp` file, never a
/// corrupt `path`.
pub fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp_path = tmp_path_for(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        let bytes = serde_json::to_vec_pretty(value)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read and deserialize `path`; `Ok(None)` when the file does not
/// exist yet (a fresh session with no prior state).
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Remove a leftover `.tmp` file from a crash that happened between
/// `File::create` and `rename`; called once on startup before trusting
/// `path` as the source of truth.
pub fn recover_tmp(path: &Path) -> Result<(), StoreError> {
    let tmp_path = tmp_path_for(path);
    match std::fs::remove_file(&tmp_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::path::PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        n: i64,
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, &Sample { n: 7 }).unwrap();
        let read_back: Sample = read(&path).unwrap().unwrap();
        assert_eq!(read_back, Sample { n: 7 });
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read_back: Option<Sample> = read(&path).unwrap();
        assert!(read_back.is_none());
    }

    #[test]
    fn overwrite_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_atomic(&path, &Sample { n: 1 }).unwrap();
        write_atomic(&path, &Sample { n: 2 }).unwrap();
        let read_back: Sample = read(&path).unwrap().unwrap();
        assert_eq!(read_back, Sample { n: 2 });
        assert!(!tmp_path_for(&path).exists());
    }

    #[test]
    fn recover_tmp_removes_orphaned_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(tmp_path_for(&path), b"{}").unwrap();
        recover_tmp(&path).unwrap();
        assert!(!tmp_path_for(&path).exists());
    }
}
