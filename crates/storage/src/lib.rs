#![forbid(unsafe_code)]

//! Persistence layer (C1) and state/event durability (C10): a narrow
//! sqlite adapter with `$n` placeholder rewriting and ordered
//! checksummed migrations, plus atomic JSON state files and an
//! append-only NDJSON event journal. Grounded on the teacher's
//! `bm_storage::store::SqliteStore`, generalized from its
//! branch/commit/merge schema to spin's project/ticket/run schema.

pub mod db;
pub mod error;
pub mod journal;
pub mod migrations;
mod placeholders;
mod schema;
pub mod state_file;
mod store;

pub use db::{Db, Rows};
pub use error::StoreError;
pub use journal::Journal;
pub use store::Store;
