//! Object-level bucket synchronization
//!
//! Byte comparison and transfer are delegated to an external engine. The
//! reconciler opens one [`TransferSession`] per pair; the session owns any
//! per-pair resources (credentials file, scratch state) and releases them
//! when dropped, whichever way the pair ends.

mod rclone;
mod recording;

pub use rclone::{RcloneEngine, RcloneSession};
pub use recording::{RecordedTransfer, RecordingEngine};

use async_trait::async_trait;
use serde::Serialize;

use crate::config::RunConfiguration;
use crate::error::Result;
use crate::types::{BucketLocation, SyncPair};

/// Policy flags for one bucket sync.
///
/// There is no delete or mirror option: sync only adds or updates objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferOptions {
    update_only: bool,
    pub dry_run: bool,
    pub transfers: usize,
    pub checkers: usize,
    pub verbose: bool,
}

impl TransferOptions {
    pub fn new(dry_run: bool, transfers: usize, checkers: usize, verbose: bool) -> Self {
        Self {
            update_only: true,
            dry_run,
            transfers,
            checkers,
            verbose,
        }
    }

    /// Never overwrite a destination object newer than its source
    pub fn update_only(&self) -> bool {
        self.update_only
    }
}

impl From<&RunConfiguration> for TransferOptions {
    fn from(config: &RunConfiguration) -> Self {
        Self::new(
            config.dry_run,
            config.transfers,
            config.checkers,
            config.verbose,
        )
    }
}

/// Opens per-pair transfer sessions
#[async_trait]
pub trait TransferEngine: Send + Sync {
    async fn open_session(&self, pair: &SyncPair) -> Result<Box<dyn TransferSession>>;
}

/// Transfer capability scoped to one pair
#[async_trait]
pub trait TransferSession: Send + Sync {
    /// Bring `destination` up to date with `source`
    async fn sync(
        &self,
        source: &BucketLocation,
        destination: &BucketLocation,
        options: &TransferOptions,
    ) -> Result<()>;
}
