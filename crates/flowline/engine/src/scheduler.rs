//! Recurring SLA sweeps

use crate::engine::WorkflowEngine;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Runs [`WorkflowEngine::sweep`] on a fixed interval
#[derive(Debug)]
pub struct SlaScheduler {
    engine: WorkflowEngine,
    interval: Duration,
}

impl SlaScheduler {
    /// Sweep every `sla.sweep_interval_secs` of the engine's config
    pub fn new(engine: WorkflowEngine) -> Self {
        let interval = engine.config().sla.sweep_interval();
        Self { engine, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Tick until `shutdown` resolves. Each sweep runs in its own task;
    /// a tick that finds the previous sweep still running is skipped by
    /// the engine.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(interval_secs = self.interval.as_secs(), "SLA scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("SLA scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = engine.sweep().await {
                            tracing::error!(error = %e, "SLA sweep failed");
                        }
                    });
                }
            }
        }
    }
}
