use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{
    FieldChange, Incident, IncomingIncident, NewHistoryEntry, NewIncident, TrackedField,
    ValidationWarning, NEW_STATUS_MARKER, NOT_AVAILABLE, SYSTEM_ACTOR,
};
use crate::error::AppError;
use crate::normalize::timestamps::{format_canonical, normalize_timestamp};
use crate::repo::IncidentStore;
use crate::validate::validate_natural_key;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpsertAction {
    Inserted,
    Updated,
    Ignored,
}

impl UpsertAction {
    pub fn as_str(self) -> &'static str {
        match self {
            UpsertAction::Inserted => "inserted",
            UpsertAction::Updated => "updated",
            UpsertAction::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOutcome {
    pub action: UpsertAction,
    pub incident_id: i64,
    /// Fields written to the audit log by this upsert.
    pub changed_fields: Vec<TrackedField>,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOptions {
    /// Recorded as `changed_by` on every history entry this engine writes.
    pub changed_by: String,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            changed_by: SYSTEM_ACTOR.to_string(),
        }
    }
}

/// Tracked fields whose incoming value is present and differs from the stored value.
///
/// Absent incoming values never produce a change: the feed may omit what it does not know.
pub fn compute_delta(existing: &Incident, incoming: &IncomingIncident) -> Vec<FieldChange> {
    TrackedField::ALL
        .into_iter()
        .filter_map(|field| {
            let new_value = incoming.field(field)?;
            let previous = existing.field(field);
            if previous == Some(new_value) {
                return None;
            }
            Some(FieldChange {
                field,
                previous_value: previous.map(str::to_string),
                new_value: new_value.to_string(),
            })
        })
        .collect()
}

fn insert_new<S: IncidentStore + ?Sized>(
    store: &S,
    key: crate::domain::NaturalKey,
    record: &IncomingIncident,
    options: &UpsertOptions,
    now: &str,
) -> Result<UpsertOutcome, AppError> {
    let mut warnings = Vec::new();

    let (started_at, started_at_raw) = match record.started_at.as_deref() {
        Some(raw) => {
            let n = normalize_timestamp("started_at", raw, &mut warnings);
            (n.canonical, n.raw)
        }
        None => (None, None),
    };

    let fields = TrackedField::ALL
        .into_iter()
        .filter_map(|f| record.field(f).map(|v| (f, v.to_string())))
        .collect::<Vec<_>>();

    let incident_id = store.insert_incident(&NewIncident {
        key,
        fields,
        started_at,
        started_at_raw,
        created_at: now.to_string(),
    })?;

    // Creation is logged as a single status transition out of the N/A sentinel.
    store.append_history(&NewHistoryEntry {
        incident_id,
        field: TrackedField::Status,
        previous_value: Some(NOT_AVAILABLE.to_string()),
        new_value: record
            .status
            .clone()
            .unwrap_or_else(|| NEW_STATUS_MARKER.to_string()),
        changed_by: options.changed_by.clone(),
        changed_at: now.to_string(),
    })?;

    Ok(UpsertOutcome {
        action: UpsertAction::Inserted,
        incident_id,
        changed_fields: vec![TrackedField::Status],
        warnings,
    })
}

fn apply_delta<S: IncidentStore + ?Sized>(
    store: &S,
    existing: &Incident,
    changes: Vec<FieldChange>,
    options: &UpsertOptions,
    now: &str,
) -> Result<UpsertOutcome, AppError> {
    store.update_incident(existing.id, &changes, now)?;

    for change in &changes {
        store.append_history(&NewHistoryEntry {
            incident_id: existing.id,
            field: change.field,
            previous_value: change.previous_value.clone(),
            new_value: change.new_value.clone(),
            changed_by: options.changed_by.clone(),
            changed_at: now.to_string(),
        })?;
    }

    Ok(UpsertOutcome {
        action: UpsertAction::Updated,
        incident_id: existing.id,
        changed_fields: changes.iter().map(|c| c.field).collect(),
        warnings: Vec::new(),
    })
}

/// Insert, update or ignore one incoming snapshot.
///
/// The lookup and every write happen inside [`IncidentStore::atomically`], so re-delivery of
/// the same snapshot, even concurrently, converges to one stored row and one history entry
/// per real transition. Store failures are returned as-is and never retried here.
pub fn upsert_incident<S: IncidentStore>(
    store: &mut S,
    record: &IncomingIncident,
    options: &UpsertOptions,
    now: OffsetDateTime,
) -> Result<UpsertOutcome, AppError> {
    let key = validate_natural_key(record)?;
    let now = format_canonical(now);

    let outcome = store.atomically(|s| match s.find_by_key(&key)? {
        None => insert_new(s, key.clone(), record, options, &now),
        Some(existing) => {
            let changes = compute_delta(&existing, record);
            if changes.is_empty() {
                // No writes at all, not even an updated_at bump.
                return Ok(UpsertOutcome {
                    action: UpsertAction::Ignored,
                    incident_id: existing.id,
                    changed_fields: Vec::new(),
                    warnings: Vec::new(),
                });
            }
            apply_delta(s, &existing, changes, options, &now)
        }
    })?;

    tracing::debug!(
        key = %key,
        incident_id = outcome.incident_id,
        action = outcome.action.as_str(),
        changed = outcome.changed_fields.len(),
        "upsert applied"
    );

    Ok(outcome)
}
