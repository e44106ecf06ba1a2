// ABOUTME: Snapshot-vs-state classification into new/updated/deleted/unchanged
// ABOUTME: Mutates a working copy of source state and commits only on full success

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use dbf_reader::{Record, Value};
use rust_decimal::prelude::ToPrimitive;

use super::fingerprint::{fingerprint, normalize};
use super::state::{RecordState, StateStore};

/// Field carrying the document sequence number on transaction sources.
const SECONDARY_FIELD: &str = "DOC_NO";

/// A record observed in the current snapshot, with its key and fingerprint.
#[derive(Debug, Clone)]
pub struct TrackedRecord {
    pub record_id: String,
    pub record: Record,
    pub checksum: String,
}

#[derive(Debug, Clone)]
pub struct UpdatedRecord {
    pub record_id: String,
    pub record: Record,
    pub old_checksum: String,
    pub new_checksum: String,
}

/// A key that vanished from the snapshot; carries the state it last had.
#[derive(Debug, Clone)]
pub struct DeletedRecord {
    pub record_id: String,
    pub last_state: RecordState,
}

/// Classified output of one detection pass over one source.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub new: Vec<TrackedRecord>,
    pub updated: Vec<UpdatedRecord>,
    pub deleted: Vec<DeletedRecord>,
    pub unchanged: Vec<TrackedRecord>,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.updated.is_empty() || !self.deleted.is_empty()
    }

    /// Records that need to reach the ESL side: new first, then updated.
    pub fn records_to_sync(&self) -> Vec<&Record> {
        self.new
            .iter()
            .map(|entry| &entry.record)
            .chain(self.updated.iter().map(|entry| &entry.record))
            .collect()
    }
}

/// Classifies snapshot records against the persisted state of their source.
pub struct ChangeDetector {
    excluded_fields: Vec<String>,
}

impl ChangeDetector {
    pub fn new(excluded_fields: Vec<String>) -> Self {
        Self { excluded_fields }
    }

    /// Runs one detection pass for `source_id` over the full current snapshot.
    ///
    /// The pass is all-or-nothing with respect to state: it mutates a working
    /// copy and commits it (with a write-through save) only after every
    /// record has been processed, so a failed pass leaves prior state
    /// untouched. Running twice on an unchanged snapshot yields only
    /// Unchanged classifications.
    ///
    /// A key previously marked deleted counts as absent: its reappearance is
    /// classified New regardless of the stale fingerprint still on file, so
    /// a re-added item always triggers a fresh sync downstream.
    pub async fn detect(
        &self,
        store: &StateStore,
        source_id: &str,
        current_records: &[Record],
        key_field: &str,
        track_secondary: bool,
    ) -> Result<ChangeSet> {
        let mut state = store.source_state(source_id).await;
        let now = Utc::now();
        let mut seen: HashSet<String> = HashSet::with_capacity(current_records.len());
        let mut changes = ChangeSet::default();

        for record in current_records {
            let Some(record_id) = record_key(record, key_field) else {
                tracing::debug!(
                    "Record in {} has no usable {} value, skipping",
                    source_id,
                    key_field
                );
                continue;
            };
            seen.insert(record_id.clone());

            let doc_no = secondary_counter(record);
            if track_secondary {
                if let Some(n) = doc_no {
                    state.last_secondary_counter = state.last_secondary_counter.max(n);
                }
            }

            let checksum = fingerprint(record, &self.excluded_fields);
            let prior_checksum = state
                .records
                .get(&record_id)
                .filter(|prev| !prev.deleted)
                .map(|prev| prev.checksum.clone());

            match prior_checksum {
                None => {
                    state.records.insert(
                        record_id.clone(),
                        RecordState {
                            record_id: record_id.clone(),
                            checksum: checksum.clone(),
                            last_seen: now,
                            doc_no,
                            deleted: false,
                        },
                    );
                    changes.new.push(TrackedRecord {
                        record_id,
                        record: record.clone(),
                        checksum,
                    });
                }
                Some(old_checksum) if old_checksum != checksum => {
                    state.records.insert(
                        record_id.clone(),
                        RecordState {
                            record_id: record_id.clone(),
                            checksum: checksum.clone(),
                            last_seen: now,
                            doc_no,
                            deleted: false,
                        },
                    );
                    changes.updated.push(UpdatedRecord {
                        record_id,
                        record: record.clone(),
                        old_checksum,
                        new_checksum: checksum,
                    });
                }
                Some(_) => {
                    if let Some(prev) = state.records.get_mut(&record_id) {
                        prev.last_seen = now;
                    }
                    changes.unchanged.push(TrackedRecord {
                        record_id,
                        record: record.clone(),
                        checksum,
                    });
                }
            }
        }

        for (record_id, prev) in state.records.iter_mut() {
            if !prev.deleted && !seen.contains(record_id) {
                changes.deleted.push(DeletedRecord {
                    record_id: record_id.clone(),
                    last_state: prev.clone(),
                });
                // Kept, not removed: repeat absence must not re-signal a delete.
                prev.deleted = true;
            }
        }

        state.last_processed = Some(now);
        store.commit(source_id, state).await?;

        tracing::info!(
            "Change detection complete for {}: {} new, {} updated, {} deleted, {} unchanged",
            source_id,
            changes.new.len(),
            changes.updated.len(),
            changes.deleted.len(),
            changes.unchanged.len(),
        );
        Ok(changes)
    }
}

/// Key value for a record, `None` when the key field is missing or empty.
fn record_key(record: &Record, key_field: &str) -> Option<String> {
    let value = record.get(key_field)?;
    let key = match value {
        Value::Null => return None,
        Value::Text(text) => text.trim().to_string(),
        Value::Integer(n) => n.to_string(),
        other => normalize(other),
    };
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Numeric reading of the record's document number, if any.
fn secondary_counter(record: &Record) -> Option<i64> {
    match record.get(SECONDARY_FIELD)? {
        Value::Integer(n) => Some(*n),
        Value::Decimal(d) => d.trunc().to_i64(),
        Value::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
}
