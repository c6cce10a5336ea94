pub const PROJECTS: &str = "
CREATE TABLE projects (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  root TEXT NOT NULL UNIQUE,
  allowed_remote TEXT,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);
";

pub const TICKETS: &str = "
CREATE TABLE tickets (
  id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
  title TEXT NOT NULL,
  description TEXT NOT NULL,
  status TEXT NOT NULL,
  priority INTEGER NOT NULL,
  category TEXT NOT NULL,
  allowed_paths TEXT NOT NULL,
  forbidden_paths TEXT NOT NULL,
  verification_commands TEXT NOT NULL,
  max_retries INTEGER NOT NULL,
  retry_count INTEGER NOT NULL,
  metadata TEXT NOT NULL,
  revision INTEGER NOT NULL,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);

CREATE INDEX idx_tickets_project_status ON tickets(project_id, status, updated_at_ms);
";

pub const RUNS: &str = "
CREATE TABLE runs (
  id TEXT PRIMARY KEY,
  project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
  ticket_id TEXT REFERENCES tickets(id) ON DELETE CASCADE,
  run_type TEXT NOT NULL,
  status TEXT NOT NULL,
  started_at_ms INTEGER NOT NULL,
  completed_at_ms INTEGER,
  error TEXT,
  metadata TEXT NOT NULL
);

CREATE INDEX idx_runs_project_status ON runs(project_id, status, started_at_ms);
CREATE INDEX idx_runs_ticket ON runs(ticket_id);
";

pub const RUN_STEPS: &str = "
CREATE TABLE run_steps (
  run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  attempt INTEGER NOT NULL,
  ordinal INTEGER NOT NULL,
  name TEXT NOT NULL,
  status TEXT NOT NULL,
  cmd TEXT NOT NULL,
  exit_code INTEGER,
  signal INTEGER,
  started_at_ms INTEGER,
  ended_at_ms INTEGER,
  duration_ms INTEGER,
  stdout_path TEXT,
  stderr_path TEXT,
  stdout_bytes INTEGER NOT NULL,
  stderr_bytes INTEGER NOT NULL,
  truncated INTEGER NOT NULL,
  tail TEXT NOT NULL,
  PRIMARY KEY (run_id, attempt, ordinal)
);
";
