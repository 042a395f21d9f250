//! Scheduler
//!
//! Drives the two independent cadences: a frequent watcher cycle (change
//! detection) and a periodic trigger cycle that runs the pipeline when
//! eligible work exists. Runs as a background task until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::db::state::StateStore;
use crate::pipeline::Pipeline;
use crate::storage::StorageObserver;
use crate::watcher::run_watcher_cycle;

/// Interval scheduler over the watcher and trigger cycles.
pub struct Orchestrator {
    store: StateStore,
    observer: Arc<dyn StorageObserver>,
    pipeline: Arc<Pipeline>,
    config: PipelineConfig,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        observer: Arc<dyn StorageObserver>,
        pipeline: Arc<Pipeline>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            observer,
            pipeline,
            config,
        }
    }

    /// Start the scheduler in the background.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                watch_interval = self.config.watch_interval_secs,
                trigger_interval = self.config.trigger_interval_secs,
                "orchestrator started"
            );

            let mut watch_tick = interval(Duration::from_secs(self.config.watch_interval_secs));
            let mut trigger_tick =
                interval(Duration::from_secs(self.config.trigger_interval_secs));

            loop {
                tokio::select! {
                    _ = watch_tick.tick() => {
                        if let Err(e) = run_watcher_cycle(
                            self.observer.as_ref(),
                            &self.store,
                            &self.config.watch_prefix,
                        )
                        .await
                        {
                            error!(error = %e, "watcher cycle failed");
                        }
                    },
                    _ = trigger_tick.tick() => {
                        match self.store.has_eligible().await {
                            Ok(true) => {
                                info!("eligible files found, triggering pipeline");
                                if let Err(e) = self.pipeline.run().await {
                                    error!(error = %e, "pipeline run failed");
                                }
                            },
                            Ok(false) => {
                                info!("no eligible files, pipeline not triggered");
                            },
                            Err(e) => {
                                // Transient storage trouble: leave state
                                // alone and try again next tick.
                                error!(error = %e, "eligibility check failed");
                            },
                        }
                    },
                }
            }
        })
    }
}
