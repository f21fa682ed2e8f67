//! Live-selection watcher.
//!
//! Polls the store for the most recently changed incident and rebinds the current
//! selection to it. The selection is an explicit value on a `watch` channel; whether to
//! rebind is decided by the pure [`should_rebind`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::domain::LatestChange;
use crate::error::AppError;
use crate::repo::IncidentStore;

/// Which incident the timeline view is bound to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", rename_all_fields = "camelCase", tag = "mode")]
pub enum Selection {
    /// Follow the most recently changed incident.
    Live { bound: Option<i64> },
    /// Pinned by an operator; polling is paused.
    Manual { incident_id: i64 },
}

impl Selection {
    pub fn bound(&self) -> Option<i64> {
        match self {
            Selection::Live { bound } => *bound,
            Selection::Manual { incident_id } => Some(*incident_id),
        }
    }
}

/// The incident to rebind to, or `None` when the selection must stay as it is.
///
/// Never rebinds to the incident that is already bound, and never overrides a manual pick.
pub fn should_rebind(selection: &Selection, latest: Option<&LatestChange>) -> Option<i64> {
    match (selection, latest) {
        (Selection::Live { bound }, Some(latest)) if *bound != Some(latest.incident_id) => {
            Some(latest.incident_id)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    pub interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct LiveWatcherHandle {
    selection: Arc<watch::Sender<Selection>>,
    /// Created before the poll task starts and never marked seen, so clones observe every
    /// change made since then.
    since_start: watch::Receiver<Selection>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LiveWatcherHandle {
    /// A receiver that reports any change made since the watcher started, including a
    /// rebind that happened before this call.
    pub fn subscribe(&self) -> watch::Receiver<Selection> {
        self.since_start.clone()
    }

    pub fn selection(&self) -> Selection {
        *self.selection.borrow()
    }

    /// Pin the selection to `incident_id` and pause polling.
    pub fn select_manual(&self, incident_id: i64) {
        self.selection
            .send_replace(Selection::Manual { incident_id });
    }

    /// Resume following the latest change. The pinned incident stays bound until a
    /// different one is detected.
    pub fn resume_live(&self) {
        self.selection.send_modify(|sel| {
            *sel = Selection::Live {
                bound: sel.bound(),
            }
        });
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop the poll loop. A poll already in flight is not aborted; its result is dropped.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

async fn poll_latest<S>(store: &Arc<Mutex<S>>) -> Result<Option<LatestChange>, AppError>
where
    S: IncidentStore + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || {
        let guard = store
            .lock()
            .map_err(|_| AppError::new("DB_LOCK_POISONED", "Incident store lock poisoned"))?;
        guard.latest_changed()
    })
    .await
    .map_err(|e| {
        AppError::new("WATCHER_POLL_FAILED", "Watcher poll task failed").with_details(e.to_string())
    })?
}

async fn run_watch_loop<S>(
    store: Arc<Mutex<S>>,
    config: WatcherConfig,
    selection: Arc<watch::Sender<Selection>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    S: IncidentStore + Send + 'static,
{
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let paused = matches!(*selection.borrow(), Selection::Manual { .. });
                if !paused {
                    match poll_latest(&store).await {
                        Ok(latest) => {
                            // Decide against the selection as it is now; an operator may
                            // have pinned an incident while the poll was running.
                            selection.send_if_modified(|sel| {
                                match should_rebind(sel, latest.as_ref()) {
                                    Some(incident_id) => {
                                        tracing::info!(incident_id, "live selection rebound");
                                        *sel = Selection::Live { bound: Some(incident_id) };
                                        true
                                    }
                                    None => false,
                                }
                            });
                        }
                        Err(error) => {
                            tracing::warn!(code = %error.code, error = %error, "live selection poll failed");
                        }
                    }
                }
            }
            _ = &mut shutdown_rx => break,
        }
    }

    tracing::debug!("live selection watcher stopped");
}

/// Spawn the poll loop on the current Tokio runtime.
pub fn start_live_watcher<S>(
    store: Arc<Mutex<S>>,
    config: WatcherConfig,
    initial: Selection,
) -> Result<LiveWatcherHandle, AppError>
where
    S: IncidentStore + Send + 'static,
{
    if config.interval.is_zero() {
        return Err(AppError::new(
            "WATCHER_INVALID_INTERVAL",
            "Watcher poll interval must be greater than zero",
        ));
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
        AppError::new("WATCHER_NO_RUNTIME", "Watcher requires an active Tokio runtime")
            .with_details(e.to_string())
    })?;

    let (tx, since_start) = watch::channel(initial);
    let selection = Arc::new(tx);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = runtime.spawn(run_watch_loop(
        store,
        config,
        Arc::clone(&selection),
        shutdown_rx,
    ));

    Ok(LiveWatcherHandle {
        selection,
        since_start,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}
