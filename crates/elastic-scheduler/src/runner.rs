//! The periodic trigger.
//!
//! A [`Scheduler`] owns one engine over the state directory. Each tick
//! re-reads the state files, runs a full evaluation pass on the blocking
//! pool and then merges the orders and history rows it created back into
//! the repository file.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use elastic_scaling::{
    InMemoryDeviceSearch, InMemoryLockProvider, InMemoryRepository, ScalingEngine, TickReport,
};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::state::StateFiles;

/// Engine over the file-backed collaborators.
pub type SchedulerEngine = ScalingEngine<InMemoryRepository, InMemoryDeviceSearch, InMemoryLockProvider>;

/// Periodically evaluates strategies against persisted state.
pub struct Scheduler {
    engine: SchedulerEngine,
    repository: Arc<InMemoryRepository>,
    devices: Arc<InMemoryDeviceSearch>,
    files: StateFiles,
    tick_interval: Duration,
}

impl Scheduler {
    /// Loads state and builds the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository cannot be loaded or the engine
    /// configuration is rejected.
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let files = StateFiles::new(&config.state_dir);
        let repository = Arc::new(files.load_repository()?);
        let devices = Arc::new(files.load_devices());

        let engine = ScalingEngine::new(
            config.engine_config(),
            Arc::clone(&repository),
            Arc::clone(&devices),
            Arc::new(InMemoryLockProvider::new()),
        )?;

        Ok(Self {
            engine,
            repository,
            devices,
            files,
            tick_interval: config.tick_interval(),
        })
    }

    /// The shared repository.
    #[must_use]
    pub fn repository(&self) -> &InMemoryRepository {
        &self.repository
    }

    /// The engine.
    #[must_use]
    pub const fn engine(&self) -> &SchedulerEngine {
        &self.engine
    }

    /// Runs one pass now and persists the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass cannot start or state cannot be saved.
    pub fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now())
    }

    /// Runs one pass at a specific time over freshly read state and
    /// persists what it created.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be read, the pass cannot start, or
    /// state cannot be saved.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let since = self.files.refresh(&self.repository, &self.devices)?;
        let report = self.engine.evaluate_strategies_at(now)?;
        self.files.persist_pass(&self.repository, since)?;
        Ok(report)
    }

    /// Ticks until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the blocking pool rejects a pass.
    pub async fn run(self: Arc<Self>) -> Result<u64> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Ticks until `shutdown` completes, returning the number of passes run.
    ///
    /// The first pass starts immediately. A failed pass is logged and the
    /// loop continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the blocking pool rejects a pass.
    pub async fn run_until<F>(self: Arc<Self>, shutdown: F) -> Result<u64>
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_secs = self.tick_interval.as_secs(), "scheduler started");
        let mut ticks = 0_u64;

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(ticks, "shutdown requested; scheduler stopping");
                    return Ok(ticks);
                }
                _ = interval.tick() => {
                    let scheduler = Arc::clone(&self);
                    let outcome = tokio::task::spawn_blocking(move || scheduler.tick())
                        .await
                        .map_err(|e| SchedulerError::Task(format!("evaluation pass panicked or was cancelled: {e}")))?;
                    ticks += 1;

                    match outcome {
                        Ok(report) => info!(
                            tick = ticks,
                            evaluated = report.evaluated,
                            orders = report.orders_created(),
                            "tick complete"
                        ),
                        Err(e) => error!(tick = ticks, error = %e, "tick failed"),
                    }
                }
            }
        }
    }
}
