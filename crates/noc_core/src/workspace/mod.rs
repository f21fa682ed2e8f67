//! Workspace database lifecycle: create a fresh tracker DB, or open an existing one and bring
//! its schema up to date.

use std::path::Path;

use rusqlite::Connection;

use crate::error::AppError;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMetadata {
    pub db_path: String,
    pub incident_count: i64,
    pub history_count: i64,
    pub is_empty: bool,
}

fn validate_db_path(path: &Path) -> Result<(), AppError> {
    if path.as_os_str().is_empty() {
        return Err(AppError::new(
            "WORKSPACE_INVALID_PATH",
            "Workspace DB path is empty",
        ));
    }
    if path.is_dir() {
        return Err(AppError::new(
            "WORKSPACE_INVALID_PATH",
            "Workspace DB path must be a file (not a directory)",
        )
        .with_details(path.display().to_string()));
    }
    Ok(())
}

fn count_rows(conn: &Connection, table: &str) -> Result<i64, AppError> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to count workspace rows")
                .with_retryable(true)
                .with_details(format!("table={table}; err={e}"))
        })
}

fn metadata(conn: &Connection, db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let incident_count = count_rows(conn, "incidents")?;
    let history_count = count_rows(conn, "incident_history")?;
    Ok(WorkspaceMetadata {
        db_path: db_path.to_string_lossy().to_string(),
        incident_count,
        history_count,
        is_empty: incident_count == 0 && history_count == 0,
    })
}

fn open_and_migrate(db_path: &Path, code: &str, message: &str) -> Result<Connection, AppError> {
    let mut conn = crate::db::open(db_path).map_err(|e| {
        let details = e.details.clone().unwrap_or_else(|| e.to_string());
        AppError::new(code, message).with_details(details)
    })?;
    crate::db::migrate(&mut conn).map_err(|e| {
        let details = e.details.clone().unwrap_or_else(|| e.to_string());
        AppError::new(
            "WORKSPACE_MIGRATION_FAILED",
            "Failed to migrate workspace database",
        )
        .with_details(details)
    })?;
    Ok(conn)
}

/// Open an existing workspace. Fails with `WORKSPACE_DB_NOT_FOUND` rather than silently
/// creating an empty database at a mistyped path.
pub fn open_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    validate_db_path(db_path)?;
    if !db_path.is_file() {
        return Err(AppError::new(
            "WORKSPACE_DB_NOT_FOUND",
            "Workspace database file not found",
        )
        .with_details(db_path.display().to_string()));
    }
    open_and_migrate(db_path, "WORKSPACE_OPEN_FAILED", "Failed to open workspace database")
}

pub fn create_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    validate_db_path(db_path)?;
    if db_path.exists() {
        return Err(AppError::new(
            "WORKSPACE_CREATE_FAILED",
            "Workspace DB file already exists",
        )
        .with_details(db_path.display().to_string()));
    }

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::new(
                "WORKSPACE_CREATE_FAILED",
                "Failed to create workspace directory",
            )
            .with_details(format!("path={}; err={}", parent.display(), e))
        })?;
    }

    let conn = open_and_migrate(
        db_path,
        "WORKSPACE_CREATE_FAILED",
        "Failed to create workspace database",
    )?;
    tracing::info!(path = %db_path.display(), "workspace created");
    Ok(conn)
}

pub fn open_workspace(db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let conn = open_workspace_connection(db_path)?;
    metadata(&conn, db_path)
}

pub fn create_workspace(db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let conn = create_workspace_connection(db_path)?;
    metadata(&conn, db_path)
}

/// Open the workspace at `db_path`, creating it first when the file does not exist yet.
pub fn open_or_create_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    if db_path.exists() {
        open_workspace_connection(db_path)
    } else {
        create_workspace_connection(db_path)
    }
}

pub fn describe_workspace(conn: &Connection, db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    metadata(conn, db_path)
}
