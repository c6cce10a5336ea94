//! Append-only, line-buffered NDJSON event journal (C10, spec.md §4.10):
//! one file per run under `.<appdir>/runs/<run_id>/events.ndjson`.
//! Malformed lines are skipped on read rather than aborting the whole
//! replay — a half-written final line from a crash should not hide
//! every event that came before it.

use crate::error::StoreError;
use spin_core::model::Event;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

pub struct Journal {
    path: std::path::PathBuf,
}

impl Journal {
    pub fn open(path: impl Into<std::path::PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Append one event as a single line. Opens in append mode per
    /// call so concurrent writers (unlikely within one run, but cheap
    /// to make safe) never truncate each other's output.
    pub fn append(&self, event: &Event) -> Result<(), StoreError> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replay every well-formed event line in `path`, in file order,
/// skipping (not failing on) lines that don't parse as an `Event`.
pub fn replay(path: &Path) -> Result<Vec<Event>, StoreError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let reader = BufReader::new(file);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(event) = serde_json::from_str::<Event>(&line) {
            events.push(event);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin_core::ids::RunId;
    use spin_core::model::EventType;
    use serde_json::json;

    #[test]
    fn appends_and_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let journal = Journal::open(&path).unwrap();
        let run_id = RunId::generate();

        journal
            .append(&Event::new(&run_id, "scout", EventType::SessionStart, json!({})))
            .unwrap();
        journal
            .append(&Event::new(&run_id, "scout", EventType::ScoutOutput, json!({"n": 3})))
            .unwrap();

        let events = replay(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::SessionStart);
        assert_eq!(events[1].event_type, EventType::ScoutOutput);
    }

    #[test]
    fn skips_malformed_trailing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let journal = Journal::open(&path).unwrap();
        let run_id = RunId::generate();
        journal
            .append(&Event::new(&run_id, "scout", EventType::SessionStart, json!({})))
            .unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not valid json\n").unwrap();

        let events = replay(&path).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn replay_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.ndjson");
        let events = replay(&path).unwrap();
        assert!(events.is_empty());
    }
}
