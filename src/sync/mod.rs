// ABOUTME: Incremental change-detection engine for table-file snapshots
// ABOUTME: Fingerprints records and classifies them as new/updated/deleted/unchanged

pub mod cycle;
pub mod detector;
pub mod fingerprint;
pub mod state;

pub use cycle::{CycleOrchestrator, CycleOutcome, CycleStats};
pub use detector::{ChangeDetector, ChangeSet, DeletedRecord, TrackedRecord, UpdatedRecord};
pub use fingerprint::fingerprint;
pub use state::{RecordState, SourceState, SourceSummary, StateStore};
