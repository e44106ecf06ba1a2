// ABOUTME: Cycle orchestration across tracked sources with a single-flight guard
// ABOUTME: Aggregates per-source change counts and isolates per-source failures

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use dbf_reader::{Record, TableFile};

use super::detector::{ChangeDetector, ChangeSet};
use super::state::StateStore;
use crate::config::Config;
use crate::output::EslWriter;
use crate::sources::{discover_sources, SourceFile, SourceProfile};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Aggregate counts for one synchronization cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleStats {
    pub sources_processed: usize,
    pub new_records: u64,
    pub updated_records: u64,
    pub deleted_records: u64,
    pub unchanged_records: u64,
    pub files_written: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl CycleStats {
    /// Whether every source made it through the cycle.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of asking for a cycle: either it ran, or one was already in flight.
#[derive(Debug)]
pub enum CycleOutcome {
    Completed(CycleStats),
    Skipped,
}

struct SourceOutcome {
    changes: ChangeSet,
    wrote_file: bool,
}

/// Drives one detection pass per tracked source, in stable order.
///
/// Cycles never overlap: a request arriving while one is running is rejected
/// immediately rather than queued. A failure on one source is collected into
/// the cycle stats and never stops the remaining sources.
pub struct CycleOrchestrator {
    config: Config,
    store: Arc<StateStore>,
    detector: ChangeDetector,
    writer: EslWriter,
    in_flight: AtomicBool,
}

impl CycleOrchestrator {
    pub fn new(config: Config, store: Arc<StateStore>) -> Self {
        let detector = ChangeDetector::new(config.excluded_fields.clone());
        let writer = EslWriter::new(config.output_dir.clone());
        Self {
            config,
            store,
            detector,
            writer,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs one cycle over every discovered source, unless one is in flight.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Previous cycle still running, skipping this one");
            return Ok(CycleOutcome::Skipped);
        }
        let result = self.run_cycle_inner().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result.map(CycleOutcome::Completed)
    }

    async fn run_cycle_inner(&self) -> Result<CycleStats> {
        let start = Instant::now();
        let mut stats = CycleStats::default();

        let sources = discover_sources(&self.config.input_dir)?;
        if sources.is_empty() {
            tracing::warn!("No table files found in {:?}", self.config.input_dir);
        }

        for source in &sources {
            match self.process_source(source).await {
                Ok(outcome) => {
                    stats.sources_processed += 1;
                    stats.new_records += outcome.changes.new.len() as u64;
                    stats.updated_records += outcome.changes.updated.len() as u64;
                    stats.deleted_records += outcome.changes.deleted.len() as u64;
                    stats.unchanged_records += outcome.changes.unchanged.len() as u64;
                    if outcome.wrote_file {
                        stats.files_written += 1;
                    }
                }
                Err(e) => {
                    // Log with :? to show the full chain including root cause
                    tracing::error!("Failed to process {}: {:?}", source.name, e);
                    stats.errors.push(format!("{}: {:#}", source.name, e));
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    async fn process_source(&self, source: &SourceFile) -> Result<SourceOutcome> {
        let profile = SourceProfile::for_file_name(&source.name);
        tracing::info!("Processing {} as {:?} source", source.name, profile.kind);

        let records = self.read_with_retry(&source.path).await?;
        let key_field = profile.resolve_key_field(records.first());

        let changes = self
            .detector
            .detect(
                &self.store,
                &source.name,
                &records,
                key_field,
                profile.track_secondary,
            )
            .await?;

        let mut wrote_file = false;
        if !changes.new.is_empty() || !changes.updated.is_empty() {
            let to_sync = changes.records_to_sync();
            if let Some(path) =
                self.writer
                    .write_changes(&source.name, profile.kind, &to_sync, Utc::now())?
            {
                wrote_file = true;
                tracing::info!("CSV created: {:?} ({} records)", path, to_sync.len());
            }
        } else {
            tracing::info!("No records to synchronize for {}", source.name);
        }

        Ok(SourceOutcome { changes, wrote_file })
    }

    /// Reads the full snapshot, retrying with exponential backoff; the table
    /// may be mid-rewrite by the exporting process.
    async fn read_with_retry(&self, path: &Path) -> Result<Vec<Record>> {
        let max_attempts = self.config.max_retries.max(1);
        let mut delay = self.config.retry_delay();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match TableFile::open(path).and_then(|table| table.read_records()) {
                Ok(records) => return Ok(records),
                Err(e) if attempt < max_attempts => {
                    tracing::warn!(
                        "Failed to read {:?} (attempt {}/{}): {}; retrying in {:?}",
                        path,
                        attempt,
                        max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to read table file {:?}", path))
                }
            }
        }
    }
}
