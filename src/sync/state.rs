// ABOUTME: Durable per-source change-tracking state with atomic JSON persistence
// ABOUTME: Maps (source, record key) to the fingerprint and metadata last observed

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

/// Last-known state of a single tracked record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordState {
    pub record_id: String,
    pub checksum: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub doc_no: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
}

/// Change-tracking state for one table-file source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceState {
    #[serde(default)]
    pub last_processed: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_secondary_counter: i64,
    #[serde(default)]
    pub records: HashMap<String, RecordState>,
}

/// Per-source record counts reported by `status`.
#[derive(Debug, Clone)]
pub struct SourceSummary {
    pub source_id: String,
    pub tracked: usize,
    pub deleted: usize,
    pub last_processed: Option<DateTime<Utc>>,
}

/// Durable store of all [`SourceState`] entries, backed by a single JSON file.
///
/// Saves are write-through and atomic: the new state goes to a sibling temp
/// file which is then renamed over the canonical path, so a crash mid-save
/// leaves either the old or the new complete store on disk, never a mix. All
/// access runs under a store-wide lock, so two sources saving in the same
/// cycle cannot race on the temp file.
pub struct StateStore {
    path: PathBuf,
    sources: Mutex<HashMap<String, SourceState>>,
}

impl StateStore {
    /// Reads persisted state from `path`.
    ///
    /// A missing file starts empty. An unreadable or malformed file is logged
    /// and discarded rather than failing the process, at the cost of
    /// re-detecting every record as new once.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sources = match fs::read_to_string(&path).await {
            Ok(contents) => {
                match serde_json::from_str::<HashMap<String, SourceState>>(&contents) {
                    Ok(sources) => {
                        tracing::info!(
                            "Loaded state for {} source(s) from {:?}",
                            sources.len(),
                            path
                        );
                        for (source_id, state) in &sources {
                            tracing::debug!(
                                "  {}: {} record(s) tracked",
                                source_id,
                                state.records.len()
                            );
                        }
                        sources
                    }
                    Err(e) => {
                        tracing::warn!(
                            "State file {:?} is malformed ({}); starting fresh",
                            path,
                            e
                        );
                        HashMap::new()
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No state file at {:?}; starting with empty state", path);
                HashMap::new()
            }
            Err(e) => {
                tracing::warn!("Could not read state file {:?} ({}); starting fresh", path, e);
                HashMap::new()
            }
        };
        Self {
            path,
            sources: Mutex::new(sources),
        }
    }

    /// Working copy of the state for `source_id`, empty if never seen.
    ///
    /// The copy is not registered in the store; a detection pass mutates it
    /// and hands it back via [`StateStore::commit`] only on full success.
    pub async fn source_state(&self, source_id: &str) -> SourceState {
        self.sources
            .lock()
            .await
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Replaces the state for `source_id` and persists the whole store.
    pub async fn commit(&self, source_id: &str, state: SourceState) -> Result<()> {
        let mut sources = self.sources.lock().await;
        sources.insert(source_id.to_string(), state);
        save_locked(&self.path, &sources).await
    }

    /// Persists the current in-memory state.
    pub async fn save(&self) -> Result<()> {
        let sources = self.sources.lock().await;
        save_locked(&self.path, &sources).await
    }

    /// Drops tracking state for one source, or for all of them, and persists.
    pub async fn reset(&self, source_id: Option<&str>) -> Result<()> {
        let mut sources = self.sources.lock().await;
        match source_id {
            Some(id) => {
                sources.remove(id);
            }
            None => sources.clear(),
        }
        save_locked(&self.path, &sources).await
    }

    pub async fn summaries(&self) -> Vec<SourceSummary> {
        let sources = self.sources.lock().await;
        let mut out: Vec<SourceSummary> = sources
            .iter()
            .map(|(source_id, state)| SourceSummary {
                source_id: source_id.clone(),
                tracked: state.records.len(),
                deleted: state.records.values().filter(|r| r.deleted).count(),
                last_processed: state.last_processed,
            })
            .collect();
        out.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        out
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Sibling scratch path used for the write-then-rename save.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn save_locked(path: &Path, sources: &HashMap<String, SourceState>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create state directory {:?}", parent))?;
        }
    }
    let contents = serde_json::to_string_pretty(sources).context("Failed to serialize state")?;
    let temp = temp_path(path);
    fs::write(&temp, contents)
        .await
        .with_context(|| format!("Failed to write state to {:?}", temp))?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e).with_context(|| format!("Failed to replace state file {:?}", path));
    }
    tracing::debug!("State saved to {:?}", path);
    Ok(())
}
