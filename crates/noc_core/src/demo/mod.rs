use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use crate::error::AppError;
use crate::ingest::batch::{parse_batch_payload, process_batch_with_clock, BatchReport};
use crate::ingest::upsert::UpsertOptions;

const SNAPSHOTS: [&str; 3] = [
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../fixtures/demo/feed_snapshot_1.json"
    )),
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../fixtures/demo/feed_snapshot_2.json"
    )),
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../fixtures/demo/feed_snapshot_3.json"
    )),
];

/// Snapshots are applied two hours apart starting here; records inside a snapshot are a
/// second apart so same-batch updates keep a strict order.
const DEMO_EPOCH_UNIX: i64 = 1_767_600_000; // 2026-01-05T08:00:00Z

const SNAPSHOT_SPACING: Duration = Duration::hours(2);

/// Replay the bundled feed snapshots into `conn`, one batch per snapshot.
///
/// Deterministic: the clock is synthetic, so every run yields the same history.
pub fn seed_demo_dataset(conn: &mut Connection) -> Result<Vec<BatchReport>, AppError> {
    let epoch = OffsetDateTime::from_unix_timestamp(DEMO_EPOCH_UNIX).map_err(|e| {
        AppError::new("DEMO_CLOCK_INVALID", "Demo epoch is out of range").with_details(e.to_string())
    })?;
    let options = UpsertOptions {
        changed_by: "demo-feed".to_string(),
    };

    let mut reports = Vec::with_capacity(SNAPSHOTS.len());
    for (n, payload) in SNAPSHOTS.iter().enumerate() {
        let records = parse_batch_payload(payload)?;
        let mut at = epoch + SNAPSHOT_SPACING * n as i32;
        let report = process_batch_with_clock(conn, &records, &options, || {
            let now = at;
            at += Duration::seconds(1);
            now
        });
        tracing::debug!(snapshot = n + 1, processed = report.stats.processed, "demo snapshot applied");
        reports.push(report);
    }
    Ok(reports)
}
