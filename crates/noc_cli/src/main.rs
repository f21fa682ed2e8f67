use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use noc_core::demo::seed_demo_dataset;
use noc_core::domain::{Incident, SYSTEM_ACTOR};
use noc_core::ingest::batch::{parse_batch_payload, process_batch, BatchReport};
use noc_core::ingest::upsert::UpsertOptions;
use noc_core::repo::{list_incidents, IncidentStore};
use noc_core::timeline::{load_timeline, Timeline};
use noc_core::watcher::{start_live_watcher, Selection, WatcherConfig};
use noc_core::workspace::{
    create_workspace, describe_workspace, open_or_create_workspace_connection,
    open_workspace_connection,
};

#[derive(Parser)]
#[command(name = "noc", version, about = "Network incident lifecycle tracker")]
struct Cli {
    /// Workspace database file
    #[arg(long, env = "NOC_DB_PATH", global = true, default_value = "noc.sqlite")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new workspace database
    Init,
    /// Apply one feed payload (a JSON array of incident snapshots)
    Ingest {
        /// Payload file
        #[arg(long)]
        input: PathBuf,
        /// Actor recorded on every history entry
        #[arg(long, env = "NOC_CHANGED_BY", default_value = SYSTEM_ACTOR)]
        changed_by: String,
    },
    /// Print every stored incident, oldest first
    List,
    /// Reconstruct and print the timeline of one incident
    Timeline {
        /// Incident id
        #[arg(long)]
        incident: i64,
    },
    /// Follow the most recently changed incident until Ctrl-C
    Watch {
        /// Poll interval in milliseconds
        #[arg(long, env = "NOC_POLL_INTERVAL_MS", default_value_t = 5000)]
        interval_ms: u64,
        /// Print one JSON object per rebind instead of a summary line
        #[arg(long)]
        json: bool,
    },
    /// Load the bundled demo feed, creating the workspace if needed
    SeedDemo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RebindEvent<'a> {
    incident_id: i64,
    origin: &'a str,
    external_id: &'a str,
    timeline: &'a Timeline,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `h:mm:ss`, hours unbounded.
fn format_hms(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn ingest_file(
    conn: &mut Connection,
    input: &Path,
    changed_by: String,
) -> anyhow::Result<BatchReport> {
    let payload = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read payload {}", input.display()))?;
    let records = parse_batch_payload(&payload)
        .with_context(|| format!("invalid payload {}", input.display()))?;
    Ok(process_batch(conn, &records, &UpsertOptions { changed_by }))
}

fn summary_line(origin: &str, external_id: &str, timeline: &Timeline) -> String {
    let kpis = &timeline.kpis;
    format!(
        "{}/{} (#{}) status={} org={} group={} hops={} in_hop={} total={}",
        origin,
        external_id,
        timeline.incident_id,
        kpis.current_status,
        kpis.current_org,
        kpis.current_group,
        kpis.hop_count,
        format_hms(kpis.time_in_current_hop_ms),
        format_hms(kpis.total_time_ms),
    )
}

/// Read the rebound incident and its timeline on the blocking pool.
async fn load_rebound(
    store: &Arc<Mutex<Connection>>,
    incident_id: i64,
) -> anyhow::Result<(Incident, Timeline)> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || {
        let conn = store
            .lock()
            .map_err(|_| anyhow::anyhow!("workspace connection lock poisoned"))?;
        let incident = conn.get_incident(incident_id)?;
        let timeline = load_timeline(&*conn, incident_id, OffsetDateTime::now_utc())?;
        Ok::<_, anyhow::Error>((incident, timeline))
    })
    .await
    .context("timeline task failed")?
}

async fn report_rebind(
    store: &Arc<Mutex<Connection>>,
    incident_id: i64,
    json: bool,
) -> anyhow::Result<()> {
    let (incident, timeline) = load_rebound(store, incident_id).await?;

    if json {
        let event = RebindEvent {
            incident_id,
            origin: &incident.origin,
            external_id: &incident.external_id,
            timeline: &timeline,
        };
        println!("{}", serde_json::to_string(&event)?);
    } else {
        println!(
            "{}",
            summary_line(&incident.origin, &incident.external_id, &timeline)
        );
    }
    Ok(())
}

async fn watch(db: &Path, interval_ms: u64, json: bool) -> anyhow::Result<()> {
    let conn = open_workspace_connection(db).context("failed to open workspace")?;
    let store = Arc::new(Mutex::new(conn));
    let config = WatcherConfig {
        interval: Duration::from_millis(interval_ms),
    };

    let mut watcher = start_live_watcher(Arc::clone(&store), config, Selection::Live { bound: None })
        .context("failed to start live watcher")?;
    let mut selection = watcher.subscribe();
    info!(db = %db.display(), interval_ms, "watching for incident changes");

    loop {
        tokio::select! {
            changed = selection.changed() => {
                if changed.is_err() {
                    break;
                }
                let bound = selection.borrow_and_update().bound();
                if let Some(incident_id) = bound {
                    if let Err(e) = report_rebind(&store, incident_id, json).await {
                        warn!(incident_id, error = %e, "failed to render rebound incident");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping watcher");
                break;
            }
        }
    }

    watcher.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init => {
            let meta = create_workspace(&cli.db).context("failed to create workspace")?;
            print_json(&meta)?;
        }
        Commands::Ingest { input, changed_by } => {
            let mut conn = open_workspace_connection(&cli.db).context("failed to open workspace")?;
            let report = ingest_file(&mut conn, &input, changed_by)?;
            print_json(&report)?;
        }
        Commands::List => {
            let conn = open_workspace_connection(&cli.db).context("failed to open workspace")?;
            print_json(&list_incidents(&conn)?)?;
        }
        Commands::Timeline { incident } => {
            let conn = open_workspace_connection(&cli.db).context("failed to open workspace")?;
            let timeline = load_timeline(&conn, incident, OffsetDateTime::now_utc())
                .with_context(|| format!("failed to load timeline for incident {incident}"))?;
            print_json(&timeline)?;
        }
        Commands::Watch { interval_ms, json } => watch(&cli.db, interval_ms, json).await?,
        Commands::SeedDemo => {
            let mut conn = open_or_create_workspace_connection(&cli.db)
                .context("failed to open workspace")?;
            let reports = seed_demo_dataset(&mut conn).context("failed to seed demo feed")?;
            for (n, report) in reports.iter().enumerate() {
                info!(
                    snapshot = n + 1,
                    inserted = report.stats.inserted,
                    updated = report.stats.updated,
                    "demo snapshot"
                );
            }
            print_json(&describe_workspace(&conn, &cli.db)?)?;
        }
    }

    Ok(())
}
