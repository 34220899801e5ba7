//! Structured run events
//!
//! The reconciler and orchestrator describe what happens as [`SyncEvent`]s;
//! rendering them is up to a [`ReportSink`]. Sinks receive one whole event
//! per call, so output from concurrently running pairs never interleaves
//! mid-line.

use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ErrorKind;

/// Event emitted during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    RunStarted {
        pairs: usize,
        dry_run: bool,
        parallel: bool,
    },
    PairStarted {
        pair_id: String,
        index: usize,
        total: usize,
    },
    /// The pair could not be processed at all (credentials, listing, timeout)
    PairSkipped {
        pair_id: String,
        error: ErrorKind,
        message: String,
    },
    BucketStarted {
        pair_id: String,
        bucket: String,
    },
    BucketCreated {
        pair_id: String,
        bucket: String,
        dry_run: bool,
    },
    BucketCreationFailed {
        pair_id: String,
        bucket: String,
        message: String,
    },
    BucketSynced {
        pair_id: String,
        bucket: String,
        dry_run: bool,
    },
    BucketSyncFailed {
        pair_id: String,
        bucket: String,
        message: String,
    },
    PairSummary {
        pair_id: String,
        created: usize,
        synced: usize,
        failed: usize,
    },
    RunSummary {
        pairs_processed: usize,
        created: usize,
        synced: usize,
        failed: usize,
        has_failures: bool,
    },
}

/// Event plus run metadata, as delivered to sinks
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SyncEvent,
}

/// Receives run events
pub trait ReportSink: Send + Sync {
    fn emit(&self, envelope: &EventEnvelope);
}

/// Stamps events with the run id and time before handing them to a sink
#[derive(Clone)]
pub struct Reporter {
    run_id: String,
    sink: Arc<dyn ReportSink>,
}

impl Reporter {
    pub fn new(run_id: impl Into<String>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            run_id: run_id.into(),
            sink,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: SyncEvent) {
        self.sink.emit(&EventEnvelope {
            run_id: self.run_id.clone(),
            timestamp: Utc::now(),
            event,
        });
    }
}

/// Renders events as tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, envelope: &EventEnvelope) {
        let dry = |dry_run: bool| if dry_run { "[dry-run] " } else { "" };

        match &envelope.event {
            SyncEvent::RunStarted {
                pairs,
                dry_run,
                parallel,
            } => info!(
                run_id = %envelope.run_id,
                "{}Starting sync of {} pair(s) ({})",
                dry(*dry_run),
                pairs,
                if *parallel { "parallel" } else { "sequential" }
            ),
            SyncEvent::PairStarted {
                pair_id,
                index,
                total,
            } => info!(pair = %pair_id, "Processing pair {}/{}: {}", index, total, pair_id),
            SyncEvent::PairSkipped {
                pair_id,
                error,
                message,
            } => error!(pair = %pair_id, kind = %error, "Pair skipped: {}", message),
            SyncEvent::BucketStarted { pair_id, bucket } => {
                info!(pair = %pair_id, bucket = %bucket, "Processing bucket {}", bucket)
            }
            SyncEvent::BucketCreated {
                pair_id,
                bucket,
                dry_run,
            } => info!(pair = %pair_id, bucket = %bucket, "{}Bucket created", dry(*dry_run)),
            SyncEvent::BucketCreationFailed {
                pair_id,
                bucket,
                message,
            } => error!(pair = %pair_id, bucket = %bucket, "Bucket creation failed: {}", message),
            SyncEvent::BucketSynced {
                pair_id,
                bucket,
                dry_run,
            } => info!(pair = %pair_id, bucket = %bucket, "{}Bucket synced", dry(*dry_run)),
            SyncEvent::BucketSyncFailed {
                pair_id,
                bucket,
                message,
            } => error!(pair = %pair_id, bucket = %bucket, "Bucket sync failed: {}", message),
            SyncEvent::PairSummary {
                pair_id,
                created,
                synced,
                failed,
            } => {
                if *failed > 0 {
                    warn!(
                        pair = %pair_id,
                        "Pair done: {} created, {} synced, {} failed",
                        created, synced, failed
                    )
                } else {
                    info!(
                        pair = %pair_id,
                        "Pair done: {} created, {} synced, {} failed",
                        created, synced, failed
                    )
                }
            }
            SyncEvent::RunSummary {
                pairs_processed,
                created,
                synced,
                failed,
                has_failures,
            } => {
                if *has_failures {
                    warn!(
                        run_id = %envelope.run_id,
                        "Run finished with failures: {} pair(s), {} created, {} synced, {} failed",
                        pairs_processed, created, synced, failed
                    )
                } else {
                    info!(
                        run_id = %envelope.run_id,
                        "Run finished: {} pair(s), {} created, {} synced",
                        pairs_processed, created, synced
                    )
                }
            }
        }
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl ReportSink for JsonLinesSink {
    fn emit(&self, envelope: &EventEnvelope) {
        let line = match serde_json::to_string(envelope) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                return;
            }
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writeln!(writer, "{}", line).and_then(|_| writer.flush()) {
            warn!("Failed to write event: {}", e);
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Events belonging to one pair, in emission order
    pub fn events_for(&self, pair_id: &str) -> Vec<SyncEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.pair_id() == Some(pair_id))
            .collect()
    }
}

impl ReportSink for CollectingSink {
    fn emit(&self, envelope: &EventEnvelope) {
        self.events.lock().push(envelope.clone());
    }
}

impl SyncEvent {
    /// Pair the event belongs to, if any
    pub fn pair_id(&self) -> Option<&str> {
        match self {
            SyncEvent::RunStarted { .. } | SyncEvent::RunSummary { .. } => None,
            SyncEvent::PairStarted { pair_id, .. }
            | SyncEvent::PairSkipped { pair_id, .. }
            | SyncEvent::BucketStarted { pair_id, .. }
            | SyncEvent::BucketCreated { pair_id, .. }
            | SyncEvent::BucketCreationFailed { pair_id, .. }
            | SyncEvent::BucketSynced { pair_id, .. }
            | SyncEvent::BucketSyncFailed { pair_id, .. }
            | SyncEvent::PairSummary { pair_id, .. } => Some(pair_id.as_str()),
        }
    }
}
