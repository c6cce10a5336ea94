#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Json(serde_json::Error),
    InvalidInput(&'static str),
    RevisionMismatch { expected: i64, actual: i64 },
    UnknownId(&'static str, String),
    DuplicateMigrationId(String),
    DuplicateMigrationChecksum(String, String),
    MigrationChecksumMismatch { id: String, expected: String, actual: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQL",
            Self::Json(_) => "JSON",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::RevisionMismatch { .. } => "REVISION_MISMATCH",
            Self::UnknownId(..) => "NOT_FOUND",
            Self::DuplicateMigrationId(_) => "DUPLICATE_MIGRATION_ID",
            Self::DuplicateMigrationChecksum(..) => "DUPLICATE_MIGRATION_CHECKSUM",
            Self::MigrationChecksumMismatch { .. } => "MIGRATION_CHECKSUM_MISMATCH",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Json(err) => write!(f, "json: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::RevisionMismatch { expected, actual } => {
                write!(f, "revision mismatch (expected={expected}, actual={actual})")
            }
            Self::UnknownId(kind, id) => write!(f, "unknown {kind} id: {id}"),
            Self::DuplicateMigrationId(id) => write!(f, "duplicate migration id: {id}"),
            Self::DuplicateMigrationChecksum(a, b) => {
                write!(f, "duplicate migration checksum shared by {a} and {b}")
            }
            Self::MigrationChecksumMismatch { id, expected, actual } => write!(
                f,
                "migration {id} checksum mismatch (expected={expected}, actual={actual})"
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
