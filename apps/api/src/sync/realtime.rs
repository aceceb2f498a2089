use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::engine::{BulkSyncOptions, SyncEngine};
use super::SyncDirection;
use crate::errors::AppError;

pub const REALTIME_BATCH_SIZE: usize = 25;

/// Periodic bulk sync driven by the stored `SyncConfig`.
///
/// At most one timer runs per instance. Stopping signals the loop; a bulk run
/// already in flight completes and writes its results.
pub struct RealTimeSync {
    engine: Arc<SyncEngine>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl RealTimeSync {
    pub fn new(engine: Arc<SyncEngine>) -> Self {
        Self {
            engine,
            shutdown: Mutex::new(None),
        }
    }

    /// (Re)starts the timer from the current config. Returns whether a timer
    /// is running afterwards: `false` when sync is unconfigured or `autoSync` is off.
    pub async fn start(&self) -> Result<bool, AppError> {
        let config = self.engine.get_config().await?;
        let mut shutdown = self.shutdown.lock().await;
        if let Some(previous) = shutdown.take() {
            let _ = previous.send(true);
        }

        let Some(config) = config.filter(|c| c.auto_sync) else {
            info!("Real-time sync not started: auto sync is off or Fish is not configured");
            return Ok(false);
        };

        let period = Duration::from_secs(u64::from(config.sync_interval.max(1)) * 60);
        let (tx, rx) = watch::channel(false);
        *shutdown = Some(tx);

        tokio::spawn(run_timer(self.engine.clone(), period, rx));
        info!("Real-time sync started, every {} minute(s)", config.sync_interval);
        Ok(true)
    }

    /// Returns whether a timer was running.
    pub async fn stop(&self) -> bool {
        match self.shutdown.lock().await.take() {
            Some(tx) => {
                let _ = tx.send(true);
                info!("Real-time sync stopping");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown.lock().await.is_some()
    }
}

async fn run_timer(engine: Arc<SyncEngine>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => run_once(&engine).await,
            // any signal, or a dropped sender, ends the loop
            _ = shutdown.changed() => break,
        }
    }
    info!("Real-time sync stopped");
}

async fn run_once(engine: &SyncEngine) {
    let direction = match engine.get_config().await {
        Ok(Some(config)) if config.features.bidirectional_sync => SyncDirection::Bidirectional,
        Ok(Some(_)) => SyncDirection::ToRemote,
        Ok(None) => {
            warn!("Real-time sync tick skipped: Fish is no longer configured");
            return;
        }
        Err(e) => {
            warn!("Real-time sync tick skipped: {e}");
            return;
        }
    };

    let options = BulkSyncOptions {
        direction,
        contact_ids: None,
        batch_size: Some(REALTIME_BATCH_SIZE),
    };
    match engine.bulk_sync(options).await {
        Ok(summary) => info!(
            "Real-time sync tick: {} ok, {} failed, {} conflicts",
            summary.success, summary.errors, summary.conflicts
        ),
        Err(e) => warn!("Real-time sync tick failed: {e}"),
    }
}
