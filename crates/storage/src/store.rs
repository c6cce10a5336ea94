//! Repository methods over the tables installed by `crate::schema`.
//! Grounded on `SqliteStore`'s per-entity method style
//! (`create_branch`/`list_branches`/...), generalized to
//! project/ticket/run/run_step and the optimistic-concurrency
//! `revision` column (teacher's `RevisionMismatch` pattern).

use crate::db::Db;
use crate::error::StoreError;
use crate::migrations::ApplyOptions;
use crate::schema::MIGRATIONS;
use rusqlite::types::Value;
use spin_core::ids::{ProjectId, RunId, TicketId};
use spin_core::model::{
    Project, Run, RunMetadata, RunStatus, RunStep, RunStepStatus, RunType, Ticket, TicketStatus,
};
use std::path::Path;

pub struct Store {
    db: Db,
}

fn text(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Null => String::new(),
        other => format!("{other:?}"),
    }
}

fn opt_text(value: &Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(format!("{other:?}")),
    }
}

fn int(value: &Value) -> i64 {
    match value {
        Value::Integer(n) => *n,
        _ => 0,
    }
}

fn opt_int(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(n) => Some(*n),
        Value::Null => None,
        _ => None,
    }
}

fn json_list(value: &Value) -> Vec<String> {
    serde_json::from_str(&text(value)).unwrap_or_default()
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Db::open(db_path)?;
        crate::migrations::apply(&db, MIGRATIONS, ApplyOptions::default())?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Db::open_in_memory()?;
        crate::migrations::apply(&db, MIGRATIONS, ApplyOptions::default())?;
        Ok(Self { db })
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    // ---- projects ----

    pub fn create_project(&self, name: &str, root: &str, allowed_remote: Option<&str>) -> Result<Project, StoreError> {
        let id = ProjectId::generate();
        let now = spin_core::now_ms();
        self.db.execute(
            "INSERT INTO projects(id, name, root, allowed_remote, created_at_ms, updated_at_ms) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[&id.as_str(), &name, &root, &allowed_remote, &now, &now],
        )?;
        Ok(Project {
            id,
            name: name.to_string(),
            root: root.into(),
            allowed_remote: allowed_remote.map(str::to_string),
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    pub fn get_project_by_root(&self, root: &str) -> Result<Option<Project>, StoreError> {
        let rows = self.db.query(
            "SELECT id, name, root, allowed_remote, created_at_ms, updated_at_ms FROM projects WHERE root=$1",
            &[&root],
        )?;
        Ok(rows.rows.first().map(|row| Project {
            id: ProjectId::from(text(&row[0])),
            name: text(&row[1]),
            root: text(&row[2]).into(),
            allowed_remote: opt_text(&row[3]),
            created_at_ms: int(&row[4]),
            updated_at_ms: int(&row[5]),
        }))
    }

    // ---- tickets ----

    pub fn create_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        self.db.execute(
            "INSERT INTO tickets(id, project_id, title, description, status, priority, category, \
               allowed_paths, forbidden_paths, verification_commands, max_retries, retry_count, \
               metadata, revision, created_at_ms, updated_at_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
            &[
                &ticket.id.as_str(),
                &ticket.project_id.as_str(),
                &ticket.title,
                &ticket.description,
                &ticket.status.as_str(),
                &ticket.priority,
                &ticket.category,
                &serde_json::to_string(&ticket.allowed_paths)?,
                &serde_json::to_string(&ticket.forbidden_paths)?,
                &serde_json::to_string(&ticket.verification_commands)?,
                &ticket.max_retries,
                &ticket.retry_count,
                &serde_json::to_string(&ticket.metadata)?,
                &ticket.revision,
                &ticket.created_at_ms,
                &ticket.updated_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>, StoreError> {
        let rows = self.db.query(
            "SELECT id, project_id, title, description, status, priority, category, allowed_paths, \
               forbidden_paths, verification_commands, max_retries, retry_count, metadata, revision, \
               created_at_ms, updated_at_ms \
             FROM tickets WHERE id=$1",
            &[&id.as_str()],
        )?;
        rows.rows.first().map(row_to_ticket).transpose()
    }

    pub fn list_tickets_by_status(&self, project_id: &ProjectId, status: TicketStatus) -> Result<Vec<Ticket>, StoreError> {
        let rows = self.db.query(
            "SELECT id, project_id, title, description, status, priority, category, allowed_paths, \
               forbidden_paths, verification_commands, max_retries, retry_count, metadata, revision, \
               created_at_ms, updated_at_ms \
             FROM tickets WHERE project_id=$1 AND status=$2 ORDER BY priority DESC, created_at_ms ASC",
            &[&project_id.as_str(), &status.as_str()],
        )?;
        rows.rows.iter().map(row_to_ticket).collect()
    }

    /// Optimistic-concurrency update: fails with `RevisionMismatch` if
    /// `expected_revision` no longer matches the stored row, mirroring
    /// the teacher's `RevisionMismatch` variant.
    pub fn update_ticket_status(
        &self,
        id: &TicketId,
        new_status: TicketStatus,
        expected_revision: i64,
    ) -> Result<(), StoreError> {
        self.db.with_transaction(|db| {
            let rows = db.query("SELECT revision FROM tickets WHERE id=$1", &[&id.as_str()])?;
            let actual = rows
                .rows
                .first()
                .map(|row| int(&row[0]))
                .ok_or_else(|| StoreError::UnknownId("ticket", id.as_str().to_string()))?;
            if actual != expected_revision {
                return Err(StoreError::RevisionMismatch { expected: expected_revision, actual });
            }
            db.execute(
                "UPDATE tickets SET status=$1, revision=revision+1, updated_at_ms=$2 WHERE id=$3",
                &[&new_status.as_str(), &spin_core::now_ms(), &id.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn update_ticket_scope(&self, id: &TicketId, allowed_paths: &[String]) -> Result<(), StoreError> {
        self.db.execute(
            "UPDATE tickets SET allowed_paths=$1, revision=revision+1, updated_at_ms=$2 WHERE id=$3",
            &[&serde_json::to_string(allowed_paths)?, &spin_core::now_ms(), &id.as_str()],
        )?;
        Ok(())
    }

    pub fn count_tickets_by_status(&self, project_id: &ProjectId, status: TicketStatus) -> Result<i64, StoreError> {
        let rows = self.db.query(
            "SELECT COUNT(*) FROM tickets WHERE project_id=$1 AND status=$2",
            &[&project_id.as_str(), &status.as_str()],
        )?;
        Ok(rows.rows.first().map(|row| int(&row[0])).unwrap_or(0))
    }

    /// Retention GC (§4.8 stage 4): hard-delete the oldest `done` tickets
    /// once the project holds more than `keep_max`. Returns the number of
    /// rows removed.
    pub fn delete_oldest_done_tickets(&self, project_id: &ProjectId, keep_max: u32) -> Result<u64, StoreError> {
        let total = self.count_tickets_by_status(project_id, TicketStatus::Done)?;
        let overflow = total - keep_max as i64;
        if overflow <= 0 {
            return Ok(0);
        }
        self.db.execute(
            "DELETE FROM tickets WHERE id IN ( \
               SELECT id FROM tickets WHERE project_id=$1 AND status=$2 \
               ORDER BY updated_at_ms ASC LIMIT $3)",
            &[&project_id.as_str(), &TicketStatus::Done.as_str(), &overflow],
        )?;
        Ok(overflow as u64)
    }

    // ---- runs ----

    pub fn create_run(&self, run: &Run) -> Result<(), StoreError> {
        self.db.execute(
            "INSERT INTO runs(id, project_id, ticket_id, run_type, status, started_at_ms, completed_at_ms, error, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &run.id.as_str(),
                &run.project_id.as_str(),
                &run.ticket_id.as_ref().map(|t| t.as_str().to_string()),
                &run.run_type.as_str(),
                &run.status.as_str(),
                &run.started_at_ms,
                &run.completed_at_ms,
                &run.error,
                &serde_json::to_string(&run.metadata)?,
            ],
        )?;
        Ok(())
    }

    pub fn complete_run(&self, id: &RunId, status: RunStatus, error: Option<&str>, metadata: &RunMetadata) -> Result<(), StoreError> {
        self.db.execute(
            "UPDATE runs SET status=$1, completed_at_ms=$2, error=$3, metadata=$4 WHERE id=$5",
            &[
                &status.as_str(),
                &spin_core::now_ms(),
                &error,
                &serde_json::to_string(metadata)?,
                &id.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, id: &RunId) -> Result<Option<Run>, StoreError> {
        let rows = self.db.query(
            "SELECT id, project_id, ticket_id, run_type, status, started_at_ms, completed_at_ms, error, metadata \
             FROM runs WHERE id=$1",
            &[&id.as_str()],
        )?;
        rows.rows.first().map(row_to_run).transpose()
    }

    // ---- run steps ----

    pub fn append_run_step(&self, step: &RunStep) -> Result<(), StoreError> {
        self.db.execute(
            "INSERT INTO run_steps(run_id, attempt, ordinal, name, status, cmd, exit_code, signal, \
               started_at_ms, ended_at_ms, duration_ms, stdout_path, stderr_path, stdout_bytes, \
               stderr_bytes, truncated, tail) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
            &[
                &step.run_id.as_str(),
                &step.attempt,
                &step.ordinal,
                &step.name,
                &step.status.as_str(),
                &step.cmd,
                &step.exit_code,
                &step.signal,
                &step.started_at_ms,
                &step.ended_at_ms,
                &step.duration_ms,
                &step.stdout_path,
                &step.stderr_path,
                &(step.stdout_bytes as i64),
                &(step.stderr_bytes as i64),
                &step.truncated,
                &step.tail,
            ],
        )?;
        Ok(())
    }

    pub fn list_run_steps(&self, run_id: &RunId) -> Result<Vec<RunStep>, StoreError> {
        let rows = self.db.query(
            "SELECT run_id, attempt, ordinal, name, status, cmd, exit_code, signal, started_at_ms, \
               ended_at_ms, duration_ms, stdout_path, stderr_path, stdout_bytes, stderr_bytes, \
               truncated, tail \
             FROM run_steps WHERE run_id=$1 ORDER BY attempt, ordinal",
            &[&run_id.as_str()],
        )?;
        rows.rows.iter().map(row_to_run_step).collect()
    }
}

fn row_to_ticket(row: &Vec<Value>) -> Result<Ticket, StoreError> {
    Ok(Ticket {
        id: TicketId::from(text(&row[0])),
        project_id: ProjectId::from(text(&row[1])),
        title: text(&row[2]),
        description: text(&row[3]),
        status: TicketStatus::parse(&text(&row[4])).ok_or(StoreError::InvalidInput("bad ticket status"))?,
        priority: int(&row[5]),
        category: text(&row[6]),
        allowed_paths: json_list(&row[7]),
        forbidden_paths: json_list(&row[8]),
        verification_commands: json_list(&row[9]),
        max_retries: int(&row[10]) as u32,
        retry_count: int(&row[11]) as u32,
        metadata: serde_json::from_str(&text(&row[12])).unwrap_or_default(),
        revision: int(&row[13]),
        created_at_ms: int(&row[14]),
        updated_at_ms: int(&row[15]),
    })
}

fn row_to_run(row: &Vec<Value>) -> Result<Run, StoreError> {
    Ok(Run {
        id: RunId::from(text(&row[0])),
        project_id: ProjectId::from(text(&row[1])),
        ticket_id: opt_text(&row[2]).map(TicketId::from),
        run_type: parse_run_type(&text(&row[3]))?,
        status: parse_run_status(&text(&row[4]))?,
        started_at_ms: int(&row[5]),
        completed_at_ms: opt_int(&row[6]),
        error: opt_text(&row[7]),
        metadata: serde_json::from_str(&text(&row[8])).unwrap_or_default(),
    })
}

fn row_to_run_step(row: &Vec<Value>) -> Result<RunStep, StoreError> {
    Ok(RunStep {
        run_id: RunId::from(text(&row[0])),
        attempt: int(&row[1]) as u32,
        ordinal: int(&row[2]) as u32,
        name: text(&row[3]),
        status: parse_run_step_status(&text(&row[4]))?,
        cmd: text(&row[5]),
        exit_code: opt_int(&row[6]).map(|v| v as i32),
        signal: opt_int(&row[7]).map(|v| v as i32),
        started_at_ms: opt_int(&row[8]),
        ended_at_ms: opt_int(&row[9]),
        duration_ms: opt_int(&row[10]),
        stdout_path: opt_text(&row[11]),
        stderr_path: opt_text(&row[12]),
        stdout_bytes: int(&row[13]) as u64,
        stderr_bytes: int(&row[14]) as u64,
        truncated: int(&row[15]) != 0,
        tail: text(&row[16]),
    })
}

fn parse_run_type(raw: &str) -> Result<RunType, StoreError> {
    Ok(match raw {
        "scout" => RunType::Scout,
        "worker" => RunType::Worker,
        "qa" => RunType::Qa,
        "merge" => RunType::Merge,
        _ => return Err(StoreError::InvalidInput("bad run_type")),
    })
}

fn parse_run_status(raw: &str) -> Result<RunStatus, StoreError> {
    Ok(match raw {
        "running" => RunStatus::Running,
        "success" => RunStatus::Success,
        "failure" => RunStatus::Failure,
        _ => return Err(StoreError::InvalidInput("bad run status")),
    })
}

fn parse_run_step_status(raw: &str) -> Result<RunStepStatus, StoreError> {
    Ok(match raw {
        "queued" => RunStepStatus::Queued,
        "running" => RunStepStatus::Running,
        "success" => RunStepStatus::Success,
        "failed" => RunStepStatus::Failed,
        "skipped" => RunStepStatus::Skipped,
        "canceled" => RunStepStatus::Canceled,
        _ => return Err(StoreError::InvalidInput("bad run step status")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn sample_ticket(project_id: &ProjectId) -> Ticket {
        Ticket {
            id: TicketId::generate(),
            project_id: project_id.clone(),
            title: "Add tests".to_string(),
            description: "desc".to_string(),
            status: TicketStatus::Ready,
            priority: 42,
            category: "bug".to_string(),
            allowed_paths: vec!["src/**".to_string()],
            forbidden_paths: vec![],
            verification_commands: vec!["cargo test".to_string()],
            max_retries: 3,
            retry_count: 0,
            metadata: Map::new(),
            revision: 0,
            created_at_ms: 1,
            updated_at_ms: 1,
        }
    }

    #[test]
    fn create_and_fetch_project() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "/repo", Some("origin")).unwrap();
        let fetched = store.get_project_by_root("/repo").unwrap().unwrap();
        assert_eq!(fetched.id, project.id);
        assert_eq!(fetched.allowed_remote.as_deref(), Some("origin"));
    }

    #[test]
    fn create_and_list_tickets_by_status() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "/repo", None).unwrap();
        let ticket = sample_ticket(&project.id);
        store.create_ticket(&ticket).unwrap();

        let ready = store.list_tickets_by_status(&project.id, TicketStatus::Ready).unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, ticket.id);
    }

    #[test]
    fn ticket_status_update_bumps_revision() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "/repo", None).unwrap();
        let ticket = sample_ticket(&project.id);
        store.create_ticket(&ticket).unwrap();

        store.update_ticket_status(&ticket.id, TicketStatus::InProgress, 0).unwrap();
        let fetched = store.get_ticket(&ticket.id).unwrap().unwrap();
        assert_eq!(fetched.status, TicketStatus::InProgress);
        assert_eq!(fetched.revision, 1);
    }

    #[test]
    fn stale_revision_is_rejected() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "/repo", None).unwrap();
        let ticket = sample_ticket(&project.id);
        store.create_ticket(&ticket).unwrap();

        store.update_ticket_status(&ticket.id, TicketStatus::InProgress, 0).unwrap();
        let err = store.update_ticket_status(&ticket.id, TicketStatus::Done, 0).unwrap_err();
        assert_eq!(err.code(), "REVISION_MISMATCH");
    }

    #[test]
    fn run_steps_round_trip_in_order() {
        let store = Store::open_in_memory().unwrap();
        let project = store.create_project("demo", "/repo", None).unwrap();
        let run = Run {
            id: RunId::generate(),
            project_id: project.id.clone(),
            ticket_id: None,
            run_type: RunType::Scout,
            status: RunStatus::Running,
            started_at_ms: 1,
            completed_at_ms: None,
            error: None,
            metadata: RunMetadata::default(),
        };
        store.create_run(&run).unwrap();

        let step = RunStep {
            run_id: run.id.clone(),
            attempt: 1,
            ordinal: 1,
            name: "cargo test".to_string(),
            status: RunStepStatus::Success,
            cmd: "cargo test".to_string(),
            exit_code: Some(0),
            signal: None,
            started_at_ms: Some(1),
            ended_at_ms: Some(2),
            duration_ms: Some(1),
            stdout_path: None,
            stderr_path: None,
            stdout_bytes: 0,
            stderr_bytes: 0,
            truncated: false,
            tail: String::new(),
        };
        store.append_run_step(&step).unwrap();

        let steps = store.list_run_steps(&run.id).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, RunStepStatus::Success);
    }
}
