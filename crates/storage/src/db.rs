//! Narrow persistence adapter (C1): `query`/`with_transaction`, nested
//! transactions via savepoints, `$n` placeholder rewriting with template
//! caching. Grounded on `SqliteStore::open`'s `busy_timeout` + pragma
//! sequencing, generalized from single-purpose methods to a general
//! adapter since spin's schema (projects/tickets/runs) differs from the
//! teacher's (branches/commits/merges).

use crate::error::StoreError;
use crate::placeholders::rewrite_placeholders;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub struct Rows {
    pub rows: Vec<Vec<rusqlite::types::Value>>,
    pub row_count: usize,
}

pub struct Db {
    conn: Connection,
    template_cache: RefCell<HashMap<String, String>>,
    savepoint_depth: RefCell<u32>,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA synchronous=NORMAL;",
        )?;
        Ok(Self {
            conn,
            template_cache: RefCell::new(HashMap::new()),
            savepoint_depth: RefCell::new(0),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            template_cache: RefCell::new(HashMap::new()),
            savepoint_depth: RefCell::new(0),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn rewritten(&self, sql: &str) -> String {
        if let Some(cached) = self.template_cache.borrow().get(sql) {
            return cached.clone();
        }
        let rewritten = rewrite_placeholders(sql);
        self.template_cache
            .borrow_mut()
            .insert(sql.to_string(), rewritten.clone());
        rewritten
    }

    /// Execute `sql` (using `$1..$n` placeholders) with positional
    /// params, returning every row as a vector of dynamically-typed
    /// values. Works for both `SELECT` and DML with `RETURNING`.
    pub fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Rows, StoreError> {
        let rewritten = self.rewritten(sql);
        let mut stmt = self.conn.prepare(&rewritten)?;
        let column_count = stmt.column_count();
        let mut rows_out = Vec::new();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            rows_out.push(extract_row(row, column_count)?);
        }
        let row_count = rows_out.len();
        Ok(Rows { rows: rows_out, row_count })
    }

    /// Execute `sql` for side effects only (no rows expected back other
    /// than an affected-row count).
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize, StoreError> {
        let rewritten = self.rewritten(sql);
        Ok(self.conn.execute(&rewritten, rusqlite::params_from_iter(params.iter()))?)
    }

    /// Run `body` inside a transaction. Nested calls use `SAVEPOINT`/
    /// `RELEASE`/`ROLLBACK TO` instead of a new `BEGIN`, so callers can
    /// compose transactional helpers freely.
    pub fn with_transaction<T>(
        &self,
        body: impl FnOnce(&Db) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let depth = {
            let mut depth = self.savepoint_depth.borrow_mut();
            let current = *depth;
            *depth += 1;
            current
        };

        if depth == 0 {
            self.conn.execute_batch("BEGIN")?;
        } else {
            self.conn.execute_batch(&format!("SAVEPOINT sp_{depth}"))?;
        }

        let result = body(self);

        *self.savepoint_depth.borrow_mut() -= 1;

        match result {
            Ok(value) => {
                if depth == 0 {
                    self.conn.execute_batch("COMMIT")?;
                } else {
                    self.conn.execute_batch(&format!("RELEASE sp_{depth}"))?;
                }
                Ok(value)
            }
            Err(err) => {
                if depth == 0 {
                    self.conn.execute_batch("ROLLBACK").ok();
                } else {
                    self.conn
                        .execute_batch(&format!("ROLLBACK TO sp_{depth}"))
                        .ok();
                }
                Err(err)
            }
        }
    }
}

fn extract_row(row: &Row<'_>, column_count: usize) -> Result<Vec<rusqlite::types::Value>, StoreError> {
    let mut values = Vec::with_capacity(column_count);
    for idx in 0..column_count {
        values.push(row.get::<_, rusqlite::types::Value>(idx)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_rewrites_dollar_placeholders() {
        let db = Db::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[]).unwrap();
        db.execute("INSERT INTO t(id, name) VALUES ($1, $2)", &[&1i64, &"a"]).unwrap();
        let rows = db.query("SELECT name FROM t WHERE id=$1", &[&1i64]).unwrap();
        assert_eq!(rows.row_count, 1);
    }

    #[test]
    fn nested_transaction_rolls_back_inner_only() {
        let db = Db::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();

        db.with_transaction(|db| {
            db.execute("INSERT INTO t(id) VALUES (1)", &[])?;
            let inner = db.with_transaction(|db| {
                db.execute("INSERT INTO t(id) VALUES (2)", &[])?;
                Err::<(), StoreError>(StoreError::InvalidInput("force rollback"))
            });
            assert!(inner.is_err());
            Ok::<(), StoreError>(())
        })
        .unwrap();

        let rows = db.query("SELECT id FROM t ORDER BY id", &[]).unwrap();
        assert_eq!(rows.row_count, 1);
    }

    #[test]
    fn outer_rollback_discards_everything() {
        let db = Db::open_in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER)", &[]).unwrap();

        let result = db.with_transaction(|db| {
            db.execute("INSERT INTO t(id) VALUES (1)", &[])?;
            Err::<(), StoreError>(StoreError::InvalidInput("force rollback"))
        });
        assert!(result.is_err());

        let rows = db.query("SELECT id FROM t", &[]).unwrap();
        assert_eq!(rows.row_count, 0);
    }
}
