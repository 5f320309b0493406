//! Schema migrations for the stream tables.
//!
//! The schema version lives in SQLite's `user_version` header field. Script
//! `n` in [`MIGRATIONS`] moves the schema from version `n` to `n + 1`, and is
//! applied together with the version bump in one transaction.

use rusqlite::{Connection, TransactionBehavior};

/// Ordered schema scripts. Append only; never edit a released entry.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "stream_entries",
        include_str!("migrations/000_stream_entries.sql"),
    ),
    (
        "consumer_groups",
        include_str!("migrations/001_consumer_groups.sql"),
    ),
    (
        "parked_entries",
        include_str!("migrations/002_parked_entries.sql"),
    ),
];

/// A schema script that could not be applied.
#[derive(Debug, thiserror::Error)]
#[error("schema migration to version {version} ({name}) failed: {source}")]
pub struct MigrationError {
    pub version: usize,
    pub name: &'static str,
    #[source]
    source: rusqlite::Error,
}

/// Brings the schema up to date and returns how many scripts were applied.
///
/// # Errors
///
/// Returns `MigrationError` for the first script that fails; earlier scripts
/// stay applied.
pub fn run_migrations(conn: &mut Connection) -> Result<usize, MigrationError> {
    apply(conn, MIGRATIONS)
}

fn schema_version(conn: &Connection) -> rusqlite::Result<usize> {
    conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))
        .map(|v| v.max(0) as usize)
}

fn apply(
    conn: &mut Connection,
    scripts: &[(&'static str, &str)],
) -> Result<usize, MigrationError> {
    let current = schema_version(conn).map_err(|source| MigrationError {
        version: 0,
        name: "read schema version",
        source,
    })?;

    let mut applied = 0;
    for (index, &(name, sql)) in scripts.iter().enumerate().skip(current) {
        let version = index + 1;
        let ran = step(conn, sql, version).map_err(|source| MigrationError {
            version,
            name,
            source,
        })?;
        if ran {
            applied += 1;
            tracing::info!(version, migration = name, "schema migrated");
        }
    }
    Ok(applied)
}

/// Applies one script unless another connection got there first.
fn step(conn: &mut Connection, sql: &str, version: usize) -> rusqlite::Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if schema_version(&tx)? >= version {
        return Ok(false);
    }
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version as i64)?;
    tx.commit()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [name],
            |row| row.get(0),
        )
        .expect("should query sqlite_master")
    }

    #[test]
    fn fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        assert_eq!(run_migrations(&mut conn).expect("migrate"), MIGRATIONS.len());
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());

        for table in [
            "stream_entries",
            "stream_groups",
            "stream_pending",
            "stream_parked",
        ] {
            assert!(table_exists(&conn, table), "{table} table should exist");
        }
    }

    #[test]
    fn second_run_applies_nothing() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        run_migrations(&mut conn).expect("first run");
        assert_eq!(run_migrations(&mut conn).expect("second run"), 0);
    }

    #[test]
    fn only_newer_scripts_run() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        let scripts = [("a", "CREATE TABLE a (id INTEGER);")];
        assert_eq!(apply(&mut conn, &scripts).unwrap(), 1);

        let scripts = [
            ("a", "CREATE TABLE a (id INTEGER);"),
            ("b", "CREATE TABLE b (id INTEGER);"),
        ];
        assert_eq!(apply(&mut conn, &scripts).unwrap(), 1);
        assert!(table_exists(&conn, "b"));
        assert_eq!(schema_version(&conn).unwrap(), 2);
    }

    #[test]
    fn failed_script_rolls_back_and_keeps_version() {
        let mut conn = Connection::open_in_memory().expect("in-memory db");
        let scripts = [
            ("good", "CREATE TABLE good (id INTEGER);"),
            ("bad", "CREATE TABLE half (id INTEGER); CREATE TABLE good (id INTEGER);"),
        ];

        let err = apply(&mut conn, &scripts).expect_err("second script should fail");
        assert_eq!((err.version, err.name), (2, "bad"));
        assert!(table_exists(&conn, "good"));
        assert!(!table_exists(&conn, "half"), "partial script should roll back");
        assert_eq!(schema_version(&conn).unwrap(), 1);
    }
}
