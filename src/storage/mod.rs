//! Bucket-level access to one S3-compatible provider
//!
//! The reconciler only needs three capabilities from a provider: list its
//! buckets, check whether a bucket exists and create a bucket. Object
//! transfer belongs to [`crate::transfer`].

pub mod memory;
#[cfg(feature = "cloud")]
mod s3;

pub use memory::{MemoryCloud, MemoryStorage, StorageCall, StorageOp};
#[cfg(feature = "cloud")]
pub use s3::{S3StorageClient, S3StorageFactory};

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BucketSet, ProviderConfig};

/// Result of a bucket creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateOutcome {
    pub created: bool,
}

/// Bucket operations against a single provider
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Provider this client talks to
    fn provider(&self) -> &ProviderConfig;

    /// List all buckets.
    ///
    /// A provider without buckets yields an empty set; an unreachable or
    /// unauthorized provider yields [`crate::SyncError::List`].
    async fn list_buckets(&self) -> Result<BucketSet>;

    /// Whether `name` exists. Unknown is treated as not existing, which at
    /// worst leads to a redundant creation attempt.
    async fn bucket_exists(&self, name: &str) -> bool;

    /// Issue the real creation call
    async fn create_bucket_live(&self, name: &str) -> Result<()>;

    /// Create `name`; under dry-run only the intent is logged
    async fn create_bucket(&self, name: &str, dry_run: bool) -> Result<CreateOutcome> {
        if dry_run {
            tracing::info!(
                "[dry-run] Would create bucket {} on {}",
                name,
                self.provider().name()
            );
            return Ok(CreateOutcome { created: true });
        }

        self.create_bucket_live(name).await?;
        tracing::info!("Created bucket {} on {}", name, self.provider().name());
        Ok(CreateOutcome { created: true })
    }
}

/// Produces a client for a provider
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn connect(&self, provider: &Arc<ProviderConfig>) -> Result<Arc<dyn StorageClient>>;
}
