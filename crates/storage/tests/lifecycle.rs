//! Crate-level integration tests that exercise `Store`, `Journal`, and
//! `state_file` together against real on-disk sqlite/NDJSON/JSON files,
//! rather than re-testing a single method in isolation like the
//! colocated unit tests in `src/store.rs` already do.

use spin_core::ids::RunId;
use spin_core::model::{
    Event, EventType, Run, RunMetadata, RunState, RunStatus, RunStep, RunStepStatus, RunType,
    Ticket, TicketStatus,
};
use spin_storage::{state_file, Journal, Store};
use serde_json::Map;

fn sample_ticket(project_id: &spin_core::ids::ProjectId, status: TicketStatus) -> Ticket {
    Ticket {
        id: spin_core::ids::TicketId::generate(),
        project_id: project_id.clone(),
        title: "fix the parser".to_string(),
        description: "desc".to_string(),
        status,
        priority: 0,
        category: "bug".to_string(),
        allowed_paths: vec!["src/parser.rs".to_string()],
        forbidden_paths: Vec::new(),
        verification_commands: Vec::new(),
        max_retries: 3,
        retry_count: 0,
        metadata: Map::new(),
        revision: 0,
        created_at_ms: 1,
        updated_at_ms: 1,
    }
}

/// A ticket's whole life as the engine would actually drive it:
/// created `Ready`, picked up into a run whose steps get appended one
/// at a time, the run completed, and the ticket finally marked `Done` —
/// then re-read back from a fresh `Store` handle against the same db
/// file to prove none of it only lived in an in-memory cache.
#[test]
fn ticket_run_and_steps_persist_across_store_handles() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("spin.db");

    let project_id = {
        let store = Store::open(&db_path).unwrap();
        let project = store.create_project("demo", "/repo", None).unwrap();
        let ticket = sample_ticket(&project.id, TicketStatus::Ready);
        store.create_ticket(&ticket).unwrap();

        let run = Run {
            id: RunId::generate(),
            project_id: project.id.clone(),
            ticket_id: Some(ticket.id.clone()),
            run_type: RunType::Worker,
            status: RunStatus::Running,
            started_at_ms: 10,
            completed_at_ms: None,
            error: None,
            metadata: RunMetadata::default(),
        };
        store.create_run(&run).unwrap();

        for (ordinal, cmd) in ["cargo build", "cargo test"].iter().enumerate() {
            let step = RunStep {
                run_id: run.id.clone(),
                attempt: 1,
                ordinal: ordinal as u32 + 1,
                name: cmd.to_string(),
                status: RunStepStatus::Success,
                cmd: cmd.to_string(),
                exit_code: Some(0),
                signal: None,
                started_at_ms: Some(10),
                ended_at_ms: Some(11),
                duration_ms: Some(1),
                stdout_path: None,
                stderr_path: None,
                stdout_bytes: 0,
                stderr_bytes: 0,
                truncated: false,
                tail: String::new(),
            };
            store.append_run_step(&step).unwrap();
        }

        store
            .complete_run(&run.id, RunStatus::Success, None, &RunMetadata::default())
            .unwrap();
        store
            .update_ticket_status(&ticket.id, TicketStatus::Done, ticket.revision)
            .unwrap();

        project.id
    };

    // Re-open against the same file: nothing above may have been
    // memory-only.
    let store = Store::open(&db_path).unwrap();
    let done = store.list_tickets_by_status(&project_id, TicketStatus::Done).unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(store.count_tickets_by_status(&project_id, TicketStatus::Done).unwrap(), 1);
}

/// A run's journal is scoped by file path, not by any field on `Event`
/// itself (C10, spec.md §4.10) — appending several events to the same
/// on-disk path and replaying it back must return them in append
/// order, and a malformed trailing line must not hide what came before.
#[test]
fn journal_append_and_replay_round_trips_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let run_id = RunId::generate();
    let path = dir.path().join("runs").join(run_id.as_str()).join("events.ndjson");

    let journal = Journal::open(path.clone()).unwrap();
    journal
        .append(&Event::new(&run_id, "start", EventType::SessionStart, serde_json::json!({"n": 1})))
        .unwrap();
    journal
        .append(&Event::new(&run_id, "qa", EventType::QaPassed, serde_json::json!({"n": 2})))
        .unwrap();

    // A crash mid-write would leave a partial trailing line; simulate
    // that by appending one directly and confirm replay still returns
    // the two well-formed events ahead of it.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{not json\n").unwrap();
    }

    let events = spin_storage::journal::replay(&path).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].step, "start");
    assert_eq!(events[1].step, "qa");
}

/// `state_file` crash recovery: a leftover `.tmp` from a write that
/// never got to rename must be cleared by `recover_tmp` before the
/// real path is trusted, and a normal write/read cycle for `RunState`
/// must survive that.
#[test]
fn run_state_survives_orphaned_tmp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run_state.json");

    // orphan a .tmp file as if a previous process died between
    // File::create and rename
    std::fs::write(format!("{}.tmp", path.display()), b"garbage").unwrap();

    state_file::recover_tmp(&path).unwrap();
    assert!(std::fs::read(format!("{}.tmp", path.display())).is_err());

    let mut run_state = RunState::default();
    run_state.cycle_count = 3;
    state_file::write_atomic(&path, &run_state).unwrap();

    let read_back: RunState = state_file::read(&path).unwrap().unwrap();
    assert_eq!(read_back.cycle_count, run_state.cycle_count);
}
