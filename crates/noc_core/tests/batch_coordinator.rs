use pretty_assertions::assert_eq;
use rusqlite::Connection;
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use noc_core::db;
use noc_core::domain::{
    FieldChange, HistoryEntry, Incident, IncomingIncident, LatestChange, NaturalKey,
    NewHistoryEntry, NewIncident, TrackedField,
};
use noc_core::error::AppError;
use noc_core::ingest::batch::{
    parse_batch_payload, process_batch, process_batch_with_clock, BatchStats,
};
use noc_core::ingest::upsert::UpsertOptions;
use noc_core::repo::IncidentStore;

fn fresh() -> Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

fn ticking_clock() -> impl FnMut() -> OffsetDateTime {
    let mut at = OffsetDateTime::parse("2026-04-01T12:00:00Z", &Rfc3339).unwrap();
    move || {
        let now = at;
        at += Duration::seconds(1);
        now
    }
}

/// Delegates to SQLite but fails every lookup for one natural key.
struct FlakyStore {
    inner: Connection,
    broken: NaturalKey,
}

impl IncidentStore for FlakyStore {
    fn atomically<T, F>(&mut self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Self) -> Result<T, AppError>,
    {
        f(&*self)
    }

    fn find_by_key(&self, key: &NaturalKey) -> Result<Option<Incident>, AppError> {
        if *key == self.broken {
            return Err(AppError::new("DB_QUERY_FAILED", "store unreachable").with_retryable(true));
        }
        self.inner.find_by_key(key)
    }

    fn get_incident(&self, id: i64) -> Result<Incident, AppError> {
        self.inner.get_incident(id)
    }

    fn insert_incident(&self, incident: &NewIncident) -> Result<i64, AppError> {
        self.inner.insert_incident(incident)
    }

    fn update_incident(
        &self,
        id: i64,
        changes: &[FieldChange],
        updated_at: &str,
    ) -> Result<(), AppError> {
        self.inner.update_incident(id, changes, updated_at)
    }

    fn append_history(&self, entry: &NewHistoryEntry) -> Result<i64, AppError> {
        self.inner.append_history(entry)
    }

    fn list_history(&self, incident_id: i64) -> Result<Vec<HistoryEntry>, AppError> {
        self.inner.list_history(incident_id)
    }

    fn latest_changed(&self) -> Result<Option<LatestChange>, AppError> {
        self.inner.latest_changed()
    }

    fn count_incidents(&self) -> Result<i64, AppError> {
        self.inner.count_incidents()
    }
}

#[test]
fn mixed_batch_counts_every_outcome() {
    let mut conn = fresh();
    let payload = r#"[
        {"origin": "noc-sp", "externalId": "A-1", "status": "NOVO"},
        {"origin": "noc-sp", "externalId": "A-2", "status": "NOVO", "city": "Santos"},
        {"origin": "noc-sp", "externalId": "A-1", "status": "NOVO"},
        {"origin": "noc-sp", "status": "NOVO"},
        {"origin": "noc-sp", "externalId": "A-2", "status": "NOVO", "city": "Santos"}
    ]"#;
    let records = parse_batch_payload(payload).expect("parse");

    let report = process_batch(&mut conn, &records, &UpsertOptions::default());
    assert_eq!(
        report.stats,
        BatchStats {
            processed: 5,
            inserted: 2,
            updated: 0,
            ignored: 2,
            errors: 1,
        }
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 3);
    assert_eq!(report.failures[0].external_id, None);
    assert!(report.failures[0].error.is_validation());
    assert_eq!(conn.count_incidents().unwrap(), 2);
}

#[test]
fn empty_batch_is_all_zeroes() {
    let mut conn = fresh();
    let report = process_batch(&mut conn, &[], &UpsertOptions::default());
    assert_eq!(report.stats, BatchStats::default());
    assert!(report.stats.is_consistent());
}

#[test]
fn store_failure_is_isolated_to_its_record() {
    let mut store = FlakyStore {
        inner: fresh(),
        broken: NaturalKey {
            origin: "noc-rs".to_string(),
            external_id: "B-2".to_string(),
        },
    };
    let records = vec![
        IncomingIncident::new("noc-rs", "B-1").with_field(TrackedField::Status, "NOVO"),
        IncomingIncident::new("noc-rs", "B-2").with_field(TrackedField::Status, "NOVO"),
        IncomingIncident::new("noc-rs", "B-3").with_field(TrackedField::Status, "NOVO"),
    ];

    let report = process_batch_with_clock(
        &mut store,
        &records,
        &UpsertOptions::default(),
        ticking_clock(),
    );
    assert_eq!(report.stats.processed, 3);
    assert_eq!(report.stats.inserted, 2);
    assert_eq!(report.stats.errors, 1);
    assert!(report.stats.is_consistent());

    let failure = &report.failures[0];
    assert_eq!(failure.index, 1);
    assert_eq!(failure.external_id.as_deref(), Some("B-2"));
    assert!(failure.error.is_persistence());
    assert!(failure.error.retryable);

    assert_eq!(store.count_incidents().unwrap(), 2);
}

#[test]
fn same_key_records_apply_in_submitted_order() {
    let mut conn = fresh();
    let records = vec![
        IncomingIncident::new("noc-sp", "C-1").with_field(TrackedField::Status, "NOVO"),
        IncomingIncident::new("noc-sp", "C-1").with_field(TrackedField::Status, "DESIGNADO"),
        IncomingIncident::new("noc-sp", "C-1").with_field(TrackedField::Status, "EM TRATAMENTO"),
    ];

    let report = process_batch_with_clock(
        &mut conn,
        &records,
        &UpsertOptions::default(),
        ticking_clock(),
    );
    assert_eq!(report.stats.inserted, 1);
    assert_eq!(report.stats.updated, 2);

    let latest = conn.latest_changed().unwrap().expect("latest");
    let stored = conn.get_incident(latest.incident_id).unwrap();
    assert_eq!(stored.status.as_deref(), Some("EM TRATAMENTO"));

    let transitions: Vec<_> = conn
        .list_history(latest.incident_id)
        .unwrap()
        .into_iter()
        .map(|h| (h.previous_value.unwrap_or_default(), h.new_value))
        .collect();
    assert_eq!(
        transitions,
        vec![
            ("N/A".to_string(), "NOVO".to_string()),
            ("NOVO".to_string(), "DESIGNADO".to_string()),
            ("DESIGNADO".to_string(), "EM TRATAMENTO".to_string()),
        ]
    );
}

#[test]
fn normalization_warnings_are_collected_per_batch() {
    let mut conn = fresh();
    let records = parse_batch_payload(
        r#"[{"origin": "noc-sp", "externalId": "D-1", "startedAt": "not a date"}]"#,
    )
    .unwrap();

    let report = process_batch(&mut conn, &records, &UpsertOptions::default());
    assert_eq!(report.stats.inserted, 1);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].code, "INGEST_TS_UNPARSEABLE");
}
