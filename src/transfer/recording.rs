//! In-process transfer engine that records calls instead of moving bytes

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{TransferEngine, TransferOptions, TransferSession};
use crate::error::{Result, SyncError};
use crate::types::{BucketLocation, SyncPair};

/// One sync call seen by a [`RecordingEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub pair_id: String,
    pub source: BucketLocation,
    pub destination: BucketLocation,
    pub options: TransferOptions,
}

#[derive(Debug, Default)]
struct EngineState {
    transfers: Mutex<Vec<RecordedTransfer>>,
    failing: Mutex<HashSet<String>>,
    open_sessions: AtomicUsize,
    sessions_opened: AtomicUsize,
    peak_sessions: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

/// Records every sync call; buckets can be set to fail
#[derive(Debug, Default, Clone)]
pub struct RecordingEngine {
    state: Arc<EngineState>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every sync of `bucket` fail
    pub fn fail_bucket(&self, bucket: &str) {
        self.state.failing.lock().insert(bucket.to_string());
    }

    /// Sleep this long inside every sync call
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state.transfers.lock().clone()
    }

    /// Transfers that were not dry runs
    pub fn live_transfers(&self) -> Vec<RecordedTransfer> {
        self.transfers()
            .into_iter()
            .filter(|t| !t.options.dry_run)
            .collect()
    }

    /// Sessions currently alive
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.sessions_opened.load(Ordering::SeqCst)
    }

    /// Most sessions that were alive at the same time
    pub fn peak_sessions(&self) -> usize {
        self.state.peak_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferEngine for RecordingEngine {
    async fn open_session(&self, pair: &SyncPair) -> Result<Box<dyn TransferSession>> {
        let open = self.state.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_sessions.fetch_max(open, Ordering::SeqCst);
        self.state.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingSession {
            pair_id: pair.id(),
            state: self.state.clone(),
        }))
    }
}

struct RecordingSession {
    pair_id: String,
    state: Arc<EngineState>,
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferSession for RecordingSession {
    async fn sync(
        &self,
        source: &BucketLocation,
        destination: &BucketLocation,
        options: &TransferOptions,
    ) -> Result<()> {
        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state.transfers.lock().push(RecordedTransfer {
            pair_id: self.pair_id.clone(),
            source: source.clone(),
            destination: destination.clone(),
            options: options.clone(),
        });

        if self.state.failing.lock().contains(&source.bucket) {
            return Err(SyncError::Transfer {
                bucket: source.bucket.clone(),
                message: "simulated transfer failure".to_string(),
            });
        }
        Ok(())
    }
}
