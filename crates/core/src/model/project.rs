use crate::ids::ProjectId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique by canonical repo root path. Created once per repo; never
/// deleted except on explicit reset (cascades to tickets/runs, enforced
/// at the storage layer via `ON DELETE CASCADE`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub root: PathBuf,
    /// The remote URL PR creation is allowed to push to; `None` means PR
    /// delivery is refused (direct/milestone delivery still works).
    pub allowed_remote: Option<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
