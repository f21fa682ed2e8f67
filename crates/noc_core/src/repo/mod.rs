//! Incident store gateway.
//!
//! The ingestion and reconstruction engines only talk to storage through [`IncidentStore`].
//! The shipped implementation is SQLite via [`rusqlite::Connection`]; a `Transaction`
//! derefs to `Connection`, so the same code runs inside [`IncidentStore::atomically`].

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};

use crate::domain::{
    FieldChange, HistoryEntry, Incident, LatestChange, NaturalKey, NewHistoryEntry, NewIncident,
    TrackedField,
};
use crate::error::AppError;

pub trait IncidentStore {
    /// Run `f` so that every read and write it performs is atomic with respect to other
    /// writers. An `Err` from `f` discards all of its writes.
    fn atomically<T, F>(&mut self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Self) -> Result<T, AppError>;

    /// `Ok(None)` when the natural key is unknown; `Err` only for store failures.
    fn find_by_key(&self, key: &NaturalKey) -> Result<Option<Incident>, AppError>;

    fn get_incident(&self, id: i64) -> Result<Incident, AppError>;

    fn insert_incident(&self, incident: &NewIncident) -> Result<i64, AppError>;

    /// Apply `changes` and refresh `updated_at`. Untouched columns keep their values.
    fn update_incident(
        &self,
        id: i64,
        changes: &[FieldChange],
        updated_at: &str,
    ) -> Result<(), AppError>;

    fn append_history(&self, entry: &NewHistoryEntry) -> Result<i64, AppError>;

    /// All history rows of one incident, ordered by `changed_at` then insertion order.
    fn list_history(&self, incident_id: i64) -> Result<Vec<HistoryEntry>, AppError>;

    /// The incident with the most recent `updated_at` (ties: highest id).
    fn latest_changed(&self) -> Result<Option<LatestChange>, AppError>;

    fn count_incidents(&self) -> Result<i64, AppError>;
}

const INCIDENT_COLUMNS: &str = r#"
  id, origin, external_id,
  status, summary, city, region, group_name, cluster, subcluster,
  category2, category3, operational_category2, operational_category3,
  topology, topology_type, treating_organization, treating_group,
  started_at, started_at_raw, created_at, updated_at
"#;

fn incident_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    Ok(Incident {
        id: row.get(0)?,
        origin: row.get(1)?,
        external_id: row.get(2)?,
        status: row.get(3)?,
        summary: row.get(4)?,
        city: row.get(5)?,
        region: row.get(6)?,
        group: row.get(7)?,
        cluster: row.get(8)?,
        subcluster: row.get(9)?,
        category2: row.get(10)?,
        category3: row.get(11)?,
        operational_category2: row.get(12)?,
        operational_category3: row.get(13)?,
        topology: row.get(14)?,
        topology_type: row.get(15)?,
        treating_organization: row.get(16)?,
        treating_group: row.get(17)?,
        started_at: row.get(18)?,
        started_at_raw: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => e.code == rusqlite::ErrorCode::ConstraintViolation,
        _ => false,
    }
}

impl IncidentStore for Connection {
    fn atomically<T, F>(&mut self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Self) -> Result<T, AppError>,
    {
        // IMMEDIATE takes the write lock up front, so lookup-then-write cannot interleave
        // with another connection doing the same for this natural key.
        let tx = self
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::persistence("DB_TX_FAILED", "Failed to start transaction", &e))?;

        let out = f(&*tx)?;

        tx.commit()
            .map_err(|e| AppError::persistence("DB_TX_FAILED", "Failed to commit transaction", &e))?;
        Ok(out)
    }

    fn find_by_key(&self, key: &NaturalKey) -> Result<Option<Incident>, AppError> {
        self.query_row(
            &format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE origin = ?1 AND external_id = ?2"
            ),
            params![key.origin, key.external_id],
            incident_from_row,
        )
        .optional()
        .map_err(|e| {
            AppError::persistence("DB_QUERY_FAILED", "Failed to query incident by natural key", &e)
        })
    }

    fn get_incident(&self, id: i64) -> Result<Incident, AppError> {
        self.query_row(
            &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
            [id],
            incident_from_row,
        )
        .optional()
        .map_err(|e| AppError::persistence("DB_QUERY_FAILED", "Failed to query incident", &e))?
        .ok_or_else(|| {
            AppError::new("DB_NOT_FOUND", "Incident not found").with_details(format!("id={id}"))
        })
    }

    fn insert_incident(&self, incident: &NewIncident) -> Result<i64, AppError> {
        let mut columns = vec![
            "origin",
            "external_id",
            "started_at",
            "started_at_raw",
            "created_at",
            "updated_at",
        ];
        let mut values: Vec<Option<&str>> = vec![
            Some(incident.key.origin.as_str()),
            Some(incident.key.external_id.as_str()),
            incident.started_at.as_deref(),
            incident.started_at_raw.as_deref(),
            Some(incident.created_at.as_str()),
            Some(incident.created_at.as_str()),
        ];
        for (field, value) in &incident.fields {
            columns.push(field.column());
            values.push(Some(value.as_str()));
        }

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO incidents({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        self.execute(&sql, params_from_iter(values)).map_err(|e| {
            if is_constraint_violation(&e) {
                AppError::persistence(
                    "DB_CONSTRAINT_VIOLATION",
                    "Natural key already stored while inserting incident",
                    &e,
                )
            } else {
                AppError::persistence("DB_INSERT_FAILED", "Failed to insert incident", &e)
            }
        })?;

        Ok(self.last_insert_rowid())
    }

    fn update_incident(
        &self,
        id: i64,
        changes: &[FieldChange],
        updated_at: &str,
    ) -> Result<(), AppError> {
        let mut assignments = Vec::with_capacity(changes.len() + 1);
        let mut values: Vec<Value> = Vec::with_capacity(changes.len() + 2);
        for (idx, change) in changes.iter().enumerate() {
            assignments.push(format!("{} = ?{}", change.field.column(), idx + 1));
            values.push(Value::Text(change.new_value.clone()));
        }
        assignments.push(format!("updated_at = ?{}", values.len() + 1));
        values.push(Value::Text(updated_at.to_string()));
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE incidents SET {} WHERE id = ?{}",
            assignments.join(", "),
            values.len()
        );

        let touched = self
            .execute(&sql, params_from_iter(values))
            .map_err(|e| AppError::persistence("DB_UPDATE_FAILED", "Failed to update incident", &e))?;
        if touched == 0 {
            return Err(AppError::new("DB_NOT_FOUND", "Incident vanished during update")
                .with_details(format!("id={id}")));
        }
        Ok(())
    }

    fn append_history(&self, entry: &NewHistoryEntry) -> Result<i64, AppError> {
        self.execute(
            r#"
      INSERT INTO incident_history(
        incident_id, field, previous_value, new_value, changed_by, changed_at
      ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
      "#,
            params![
                entry.incident_id,
                entry.field.label(),
                entry.previous_value,
                entry.new_value,
                entry.changed_by,
                entry.changed_at
            ],
        )
        .map_err(|e| AppError::persistence("DB_INSERT_FAILED", "Failed to append history entry", &e))?;

        Ok(self.last_insert_rowid())
    }

    fn list_history(&self, incident_id: i64) -> Result<Vec<HistoryEntry>, AppError> {
        let mut stmt = self
            .prepare(
                r#"
      SELECT id, incident_id, field, previous_value, new_value, changed_by, changed_at
      FROM incident_history
      WHERE incident_id = ?1
      ORDER BY changed_at ASC, id ASC
      "#,
            )
            .map_err(|e| {
                AppError::persistence("DB_QUERY_FAILED", "Failed to prepare history query", &e)
            })?;

        let rows = stmt
            .query_map([incident_id], |row| {
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    incident_id: row.get(1)?,
                    field: row.get(2)?,
                    previous_value: row.get(3)?,
                    new_value: row.get(4)?,
                    changed_by: row.get(5)?,
                    changed_at: row.get(6)?,
                })
            })
            .map_err(|e| AppError::persistence("DB_QUERY_FAILED", "Failed to query history", &e))?;

        rows.collect::<Result<Vec<_>, _>>().map_err(|e| {
            AppError::persistence("DB_QUERY_FAILED", "Failed to decode history row", &e)
        })
    }

    fn latest_changed(&self) -> Result<Option<LatestChange>, AppError> {
        self.query_row(
            r#"
      SELECT id, origin, external_id, updated_at
      FROM incidents
      ORDER BY updated_at DESC, id DESC
      LIMIT 1
      "#,
            [],
            |row| {
                Ok(LatestChange {
                    incident_id: row.get(0)?,
                    key: NaturalKey {
                        origin: row.get(1)?,
                        external_id: row.get(2)?,
                    },
                    updated_at: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(|e| {
            AppError::persistence("DB_QUERY_FAILED", "Failed to query latest changed incident", &e)
        })
    }

    fn count_incidents(&self) -> Result<i64, AppError> {
        self.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
            .map_err(|e| AppError::persistence("DB_QUERY_FAILED", "Failed to count incidents", &e))
    }
}

/// Every stored incident, oldest first.
pub fn list_incidents(conn: &Connection) -> Result<Vec<Incident>, AppError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents ORDER BY created_at ASC, id ASC"
        ))
        .map_err(|e| {
            AppError::persistence("DB_QUERY_FAILED", "Failed to prepare incidents query", &e)
        })?;

    let rows = stmt
        .query_map([], incident_from_row)
        .map_err(|e| AppError::persistence("DB_QUERY_FAILED", "Failed to query incidents", &e))?;

    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| AppError::persistence("DB_QUERY_FAILED", "Failed to decode incident row", &e))
}
