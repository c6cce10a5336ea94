//! Ordered, checksummed migrations (spec.md §4.1). Unlike the teacher's
//! idempotent `add_column_if_missing` helpers, this list is a strict
//! sequence recorded in `_migrations`; duplicate ids or duplicate
//! checksums are fatal before the table even exists, and re-running a
//! migration whose SQL text has drifted from what was recorded is
//! fatal too.

use crate::db::Db;
use crate::error::StoreError;
use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug)]
pub struct Migration {
    pub id: &'static str,
    pub up: &'static str,
}

fn checksum(up: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(up.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn validate_no_duplicates(migrations: &[Migration]) -> Result<(), StoreError> {
    for (i, a) in migrations.iter().enumerate() {
        for b in &migrations[..i] {
            if a.id == b.id {
                return Err(StoreError::DuplicateMigrationId(a.id.to_string()));
            }
            if checksum(a.up) == checksum(b.up) {
                return Err(StoreError::DuplicateMigrationChecksum(
                    a.id.to_string(),
                    b.id.to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn ensure_migrations_table(db: &Db) -> Result<(), StoreError> {
    db.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
           id TEXT PRIMARY KEY,
           checksum TEXT NOT NULL,
           applied_at_ms INTEGER NOT NULL
         )",
        &[],
    )?;
    Ok(())
}

fn applied_checksum(db: &Db, id: &str) -> Result<Option<String>, StoreError> {
    let rows = db.query("SELECT checksum FROM _migrations WHERE id=$1", &[&id])?;
    Ok(rows.rows.first().map(|row| match &row[0] {
        rusqlite::types::Value::Text(s) => s.clone(),
        _ => String::new(),
    }))
}

/// Options mirroring the spec's `dryRun` and `target` migration knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyOptions<'a> {
    pub dry_run: bool,
    pub target: Option<&'a str>,
}

/// Apply every migration in `migrations` not yet recorded in
/// `_migrations`, in list order, stopping at (and including) `target`
/// if given. Validates the whole list for duplicate ids/checksums
/// first, fatal before the migrations table is even created — so a
/// malformed migration list never partially applies.
pub fn apply(db: &Db, migrations: &[Migration], options: ApplyOptions<'_>) -> Result<Vec<&'static str>, StoreError> {
    validate_no_duplicates(migrations)?;
    ensure_migrations_table(db)?;

    let mut applied_ids = Vec::new();

    for migration in migrations {
        let expected = checksum(migration.up);
        match applied_checksum(db, migration.id)? {
            Some(stored) if stored == expected => {}
            Some(stored) => {
                return Err(StoreError::MigrationChecksumMismatch {
                    id: migration.id.to_string(),
                    expected,
                    actual: stored,
                });
            }
            None => {
                if !options.dry_run {
                    db.with_transaction(|db| {
                        db.connection().execute_batch(migration.up)?;
                        db.execute(
                            "INSERT INTO _migrations(id, checksum, applied_at_ms) VALUES ($1, $2, $3)",
                            &[&migration.id, &expected, &spin_core::now_ms()],
                        )?;
                        Ok(())
                    })?;
                }
                applied_ids.push(migration.id);
            }
        }

        if options.target == Some(migration.id) {
            break;
        }
    }

    Ok(applied_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIGRATIONS: &[Migration] = &[
        Migration {
            id: "0001_init",
            up: "CREATE TABLE widgets (id INTEGER PRIMARY KEY)",
        },
        Migration {
            id: "0002_add_name",
            up: "ALTER TABLE widgets ADD COLUMN name TEXT",
        },
    ];

    #[test]
    fn applies_migrations_in_order_and_records_them() {
        let db = Db::open_in_memory().unwrap();
        let applied = apply(&db, MIGRATIONS, ApplyOptions::default()).unwrap();
        assert_eq!(applied, vec!["0001_init", "0002_add_name"]);

        db.execute("INSERT INTO widgets(id, name) VALUES (1, 'a')", &[]).unwrap();
        let rows = db.query("SELECT checksum FROM _migrations", &[]).unwrap();
        assert_eq!(rows.row_count, 2);
    }

    #[test]
    fn is_idempotent_across_repeated_applications() {
        let db = Db::open_in_memory().unwrap();
        apply(&db, MIGRATIONS, ApplyOptions::default()).unwrap();
        let second = apply(&db, MIGRATIONS, ApplyOptions::default()).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn dry_run_does_not_apply_ddl() {
        let db = Db::open_in_memory().unwrap();
        let applied = apply(&db, MIGRATIONS, ApplyOptions { dry_run: true, target: None }).unwrap();
        assert_eq!(applied.len(), 2);
        let result = db.query("SELECT * FROM widgets", &[]);
        assert!(result.is_err());
    }

    #[test]
    fn target_stops_early() {
        let db = Db::open_in_memory().unwrap();
        let applied = apply(
            &db,
            MIGRATIONS,
            ApplyOptions { dry_run: false, target: Some("0001_init") },
        )
        .unwrap();
        assert_eq!(applied, vec!["0001_init"]);
        let result = db.query("SELECT name FROM widgets", &[]);
        assert!(result.is_err(), "0002 should not have applied");
    }

    #[test]
    fn duplicate_ids_are_fatal_before_table_creation() {
        let db = Db::open_in_memory().unwrap();
        let bad = &[
            Migration { id: "dup", up: "CREATE TABLE a (id INTEGER)" },
            Migration { id: "dup", up: "CREATE TABLE b (id INTEGER)" },
        ];
        let err = apply(&db, bad, ApplyOptions::default()).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_MIGRATION_ID");
        let rows = db.query("SELECT name FROM sqlite_master WHERE type='table'", &[]).unwrap();
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn duplicate_checksums_are_fatal() {
        let db = Db::open_in_memory().unwrap();
        let bad = &[
            Migration { id: "a", up: "CREATE TABLE a (id INTEGER)" },
            Migration { id: "b", up: "CREATE TABLE a (id INTEGER)" },
        ];
        let err = apply(&db, bad, ApplyOptions::default()).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_MIGRATION_CHECKSUM");
    }
}
