// ABOUTME: Poll-loop runner: one cycle at startup, then fixed-interval cycles
// ABOUTME: Graceful shutdown waits, bounded, for the in-flight cycle

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::config::Config;
use crate::sync::{CycleOrchestrator, CycleOutcome};

/// Runs synchronization cycles until a shutdown signal arrives.
pub struct Runner {
    config: Config,
    orchestrator: Arc<CycleOrchestrator>,
}

impl Runner {
    pub fn new(config: Config, orchestrator: Arc<CycleOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Main loop. The first tick fires immediately, which is the startup
    /// pass; later ticks follow the configured poll interval. A cycle in
    /// flight always runs to completion; shutdown waits for it up to the
    /// configured timeout before the loop exits anyway.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let mut ticks = interval(self.config.poll_interval());
        let mut cycle_no = 0u64;

        tracing::info!(
            "Synchronizing every {} second(s); press Ctrl+C to stop",
            self.config.poll_interval_secs
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping");
                    break;
                }
                _ = ticks.tick() => {
                    cycle_no += 1;
                    tracing::info!("Starting sync cycle {}", cycle_no);

                    let orchestrator = self.orchestrator.clone();
                    let mut cycle = tokio::spawn(async move { orchestrator.run_cycle().await });

                    tokio::select! {
                        biased;

                        _ = shutdown.recv() => {
                            let timeout = self.config.shutdown_timeout();
                            tracing::info!("Waiting up to {:?} for the in-flight cycle", timeout);
                            match tokio::time::timeout(timeout, &mut cycle).await {
                                Ok(joined) => report_cycle(cycle_no, flatten(joined)),
                                Err(_) => tracing::warn!(
                                    "Cycle {} did not finish within the shutdown timeout",
                                    cycle_no
                                ),
                            }
                            break;
                        }
                        joined = &mut cycle => report_cycle(cycle_no, flatten(joined)),
                    }
                }
            }
        }

        Ok(())
    }
}

fn flatten(
    joined: std::result::Result<Result<CycleOutcome>, tokio::task::JoinError>,
) -> Result<CycleOutcome> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("cycle task panicked: {e}")),
    }
}

fn report_cycle(cycle_no: u64, result: Result<CycleOutcome>) {
    match result {
        Ok(CycleOutcome::Completed(stats)) => {
            tracing::info!(
                "Cycle {} complete: {} source(s), {} new, {} updated, {} deleted, {} file(s) written in {}ms",
                cycle_no,
                stats.sources_processed,
                stats.new_records,
                stats.updated_records,
                stats.deleted_records,
                stats.files_written,
                stats.duration_ms,
            );
            if !stats.errors.is_empty() {
                tracing::warn!("Cycle {} had {} error(s)", cycle_no, stats.errors.len());
                for error in &stats.errors {
                    tracing::warn!("  - {}", error);
                }
            }
        }
        Ok(CycleOutcome::Skipped) => {
            tracing::info!("Cycle {} skipped (previous cycle still running)", cycle_no);
        }
        Err(e) => tracing::error!("Cycle {} failed: {:?}", cycle_no, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::StateStore;

    #[tokio::test]
    async fn runner_exits_on_shutdown_after_startup_pass() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            input_dir: dir.path().join("export"),
            output_dir: dir.path().join("esl"),
            state_file: dir.path().join("state.json"),
            poll_interval_secs: 3600,
            shutdown_timeout_secs: 5,
            ..Config::default()
        };
        config.ensure_directories().unwrap();

        let store = Arc::new(StateStore::load(config.state_file.clone()).await);
        let orchestrator = Arc::new(CycleOrchestrator::new(config.clone(), store));
        let runner = Runner::new(config, orchestrator);

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(async move { runner.run(rx).await });

        // let the startup pass land, then signal shutdown
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop")
            .unwrap()
            .unwrap();
    }
}
