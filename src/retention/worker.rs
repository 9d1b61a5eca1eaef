//! Background retention worker
//!
//! Ticks on a fixed interval. Each tick opens its own catalog connection on
//! a blocking thread and applies every retention policy in one unit of work.

use crate::catalog::Catalog;
use crate::chunk::calculator::now_micros;
use crate::chunk::error::ChunkResult;
use crate::chunk::manager::ChunkManager;
use crate::config::Config;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Applies retention policies periodically
#[derive(Debug, Clone)]
pub struct RetentionWorker {
    catalog_path: PathBuf,
    busy_timeout: Duration,
    poll_interval: Duration,
}

/// Running worker; dropping it leaves the task running until the runtime ends
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker and wait for the current tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            tracing::error!("Retention worker task failed: {}", e);
        }
    }
}

impl RetentionWorker {
    pub fn new(catalog_path: impl Into<PathBuf>, busy_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            busy_timeout,
            poll_interval,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.catalog.path.clone(),
            Duration::from_millis(config.catalog.busy_timeout_ms),
            Duration::from_secs(config.retention.poll_interval_secs.max(1)),
        )
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Apply all policies once; returns the number of chunks dropped
    pub fn run_once(&self) -> ChunkResult<usize> {
        let mut catalog = Catalog::open(&self.catalog_path, self.busy_timeout)?;
        let manager = ChunkManager::new();

        let mut uow = catalog.begin()?;
        let dropped = manager.apply_retention_policies(&mut uow, now_micros())?;
        uow.commit()?;

        // Dropped segments leave their pages in the WAL until a checkpoint
        if dropped > 0 {
            if let Err(e) = catalog.checkpoint() {
                tracing::warn!("Checkpoint after retention failed: {}", e);
            }
        }
        Ok(dropped)
    }

    /// Spawn the worker on the current tokio runtime
    pub fn start(self) -> WorkerHandle {
        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(self.run(rx));
        WorkerHandle { shutdown: tx, join }
    }

    /// Tick until `shutdown` turns true or its sender is dropped
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Retention worker started for {:?}, polling every {:?}",
            self.catalog_path,
            self.poll_interval
        );
        let mut ticker = interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let worker = self.clone();
                    match tokio::task::spawn_blocking(move || worker.run_once()).await {
                        Ok(Ok(0)) => tracing::debug!("Retention pass: nothing to drop"),
                        Ok(Ok(dropped)) => tracing::info!("Retention pass dropped {} chunks", dropped),
                        Ok(Err(e)) => tracing::error!("Retention pass failed: {}", e),
                        Err(e) => tracing::error!("Retention pass panicked: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Retention worker stopped");
    }
}
