use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{IncomingIncident, ValidationWarning};
use crate::error::AppError;
use crate::ingest::upsert::{upsert_incident, UpsertAction, UpsertOptions};
use crate::repo::IncidentStore;

/// Per-batch counters. `processed == inserted + updated + ignored + errors` always holds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchStats {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub ignored: usize,
    pub errors: usize,
}

impl BatchStats {
    fn record(&mut self, outcome: Result<UpsertAction, ()>) {
        self.processed += 1;
        match outcome {
            Ok(UpsertAction::Inserted) => self.inserted += 1,
            Ok(UpsertAction::Updated) => self.updated += 1,
            Ok(UpsertAction::Ignored) => self.ignored += 1,
            Err(()) => self.errors += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.processed == self.inserted + self.updated + self.ignored + self.errors
    }
}

/// A record that could not be applied, identified by its position and key as received.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub index: usize,
    pub origin: Option<String>,
    pub external_id: Option<String>,
    pub error: AppError,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchReport {
    #[serde(flatten)]
    pub stats: BatchStats,
    pub failures: Vec<BatchFailure>,
    pub warnings: Vec<ValidationWarning>,
}

/// Parse a feed payload: a JSON array of incident snapshot objects.
///
/// Only structural problems fail here. Records with a missing natural key parse fine and are
/// rejected per record by the coordinator.
pub fn parse_batch_payload(json: &str) -> Result<Vec<IncomingIncident>, AppError> {
    serde_json::from_str::<Vec<IncomingIncident>>(json).map_err(|e| {
        AppError::new(
            "VALIDATION_BATCH_PAYLOAD_INVALID",
            "Batch payload must be a JSON array of incident objects",
        )
        .with_details(e.to_string())
    })
}

/// Apply `records` in submitted order, stamping each with the current wall-clock time.
pub fn process_batch<S: IncidentStore>(
    store: &mut S,
    records: &[IncomingIncident],
    options: &UpsertOptions,
) -> BatchReport {
    process_batch_with_clock(store, records, options, OffsetDateTime::now_utc)
}

/// Apply `records` strictly one after another.
///
/// Two records sharing a natural key must see each other's effect, so there is no
/// parallelism here. A failing record is counted, logged with its key and skipped; it never
/// aborts the batch.
pub fn process_batch_with_clock<S, C>(
    store: &mut S,
    records: &[IncomingIncident],
    options: &UpsertOptions,
    mut clock: C,
) -> BatchReport
where
    S: IncidentStore,
    C: FnMut() -> OffsetDateTime,
{
    let span = tracing::info_span!("process_batch", records = records.len());
    let _enter = span.enter();

    let mut report = BatchReport::default();

    for (index, record) in records.iter().enumerate() {
        match upsert_incident(store, record, options, clock()) {
            Ok(outcome) => {
                report.stats.record(Ok(outcome.action));
                report.warnings.extend(outcome.warnings);
            }
            Err(error) => {
                tracing::warn!(
                    index,
                    origin = record.origin.as_deref().unwrap_or("<missing>"),
                    external_id = record.external_id.as_deref().unwrap_or("<missing>"),
                    code = %error.code,
                    error = %error,
                    "incident record failed"
                );
                report.stats.record(Err(()));
                report.failures.push(BatchFailure {
                    index,
                    origin: record.origin.clone(),
                    external_id: record.external_id.clone(),
                    error,
                });
            }
        }
    }

    debug_assert!(report.stats.is_consistent());
    tracing::info!(
        processed = report.stats.processed,
        inserted = report.stats.inserted,
        updated = report.stats.updated,
        ignored = report.stats.ignored,
        errors = report.stats.errors,
        "batch processed"
    );

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_stay_consistent() {
        let mut stats = BatchStats::default();
        stats.record(Ok(UpsertAction::Inserted));
        stats.record(Ok(UpsertAction::Ignored));
        stats.record(Err(()));
        assert_eq!(stats.processed, 3);
        assert!(stats.is_consistent());
    }

    #[test]
    fn payload_must_be_an_array() {
        let err = parse_batch_payload(r#"{"origin":"noc"}"#).expect_err("object");
        assert_eq!(err.code, "VALIDATION_BATCH_PAYLOAD_INVALID");

        let ok = parse_batch_payload(r#"[{"origin":"noc","externalId":"1"},{"status":"NOVO"}]"#)
            .expect("array");
        assert_eq!(ok.len(), 2);
        assert_eq!(ok[1].origin, None);
    }

    #[test]
    fn report_serializes_flat_counters() {
        let report = BatchReport::default();
        let v = serde_json::to_value(&report).unwrap();
        for k in ["processed", "inserted", "updated", "ignored", "errors"] {
            assert_eq!(v[k], 0, "missing counter {k}");
        }
        assert!(v["failures"].as_array().unwrap().is_empty());
    }
}
