//! Schema-as-SQL-constants (grounded on
//! `store/support/schema/sql/*.rs`'s one-constant-per-table style),
//! wired into the ordered migration list consumed by
//! `crate::migrations::apply`.

mod sql;

use crate::migrations::Migration;

pub const MIGRATIONS: &[Migration] = &[
    Migration { id: "0001_projects", up: sql::PROJECTS },
    Migration { id: "0002_tickets", up: sql::TICKETS },
    Migration { id: "0003_runs", up: sql::RUNS },
    Migration { id: "0004_run_steps", up: sql::RUN_STEPS },
];
