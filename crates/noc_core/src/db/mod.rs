//! SQLite connection setup and schema migrations.
//!
//! Every connection handed out here has foreign keys enforced and a busy timeout, since the
//! watcher and ingest runs may share one workspace file.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection};
use time::OffsetDateTime;

use crate::error::AppError;
use crate::normalize::timestamps::format_canonical;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Applied in order; names are recorded in `_migrations` and never reused.
const MIGRATIONS: &[Migration] = &[Migration {
    name: "0001_init.sql",
    sql: include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_init.sql"
    )),
}];

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn configure(conn: Connection) -> Result<Connection, AppError> {
    conn.busy_timeout(BUSY_TIMEOUT).map_err(|e| {
        AppError::persistence("DB_OPEN_FAILED", "Failed to set SQLite busy timeout", &e)
    })?;
    conn.pragma_update(None, "foreign_keys", true).map_err(|e| {
        AppError::persistence("DB_OPEN_FAILED", "Failed to enable foreign keys", &e)
    })?;
    Ok(conn)
}

pub fn open(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite database")
            .with_retryable(true)
            .with_details(format!("path={}; err={e}", path.display()))
    })?;
    configure(conn)
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    let conn = Connection::open_in_memory().map_err(|e| {
        AppError::persistence("DB_OPEN_FAILED", "Failed to open in-memory SQLite database", &e)
    })?;
    configure(conn)
}

fn applied_migrations(conn: &Connection) -> Result<HashSet<String>, AppError> {
    let query_failed = |e: rusqlite::Error| {
        AppError::persistence("DB_MIGRATIONS_QUERY_FAILED", "Failed to read applied migrations", &e)
    };

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(|e| {
        AppError::persistence("DB_MIGRATIONS_TABLE_FAILED", "Failed to create migrations table", &e)
    })?;

    let mut stmt = conn.prepare("SELECT name FROM _migrations").map_err(query_failed)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(query_failed)?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(query_failed)?;
    Ok(names)
}

fn apply(conn: &mut Connection, migration: &Migration) -> Result<(), AppError> {
    let failed = |e: rusqlite::Error| {
        AppError::persistence(
            "DB_MIGRATION_FAILED",
            format!("Migration {} failed", migration.name),
            &e,
        )
    };

    let tx = conn.transaction().map_err(failed)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _migrations(name, applied_at) VALUES (?1, ?2)",
        params![migration.name, format_canonical(OffsetDateTime::now_utc())],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}

/// Bring the schema up to date. Returns how many migrations were applied; each runs in its
/// own transaction, so a failure leaves earlier ones in place.
pub fn migrate(conn: &mut Connection) -> Result<usize, AppError> {
    let applied = applied_migrations(conn)?;

    let mut count = 0;
    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(m.name)) {
        apply(conn, migration)?;
        tracing::debug!(migration = migration.name, "applied migration");
        count += 1;
    }
    Ok(count)
}
