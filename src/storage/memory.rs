//! In-process providers
//!
//! `MemoryCloud` holds the bucket sets of any number of named providers and
//! records every call that reaches them, with hooks to inject listing and
//! creation failures. The integration tests drive the reconciler against it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{StorageClient, StorageFactory};
use crate::error::{Result, SyncError};
use crate::types::{BucketSet, ProviderConfig};

/// Kind of provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOp {
    List,
    Exists,
    Create,
}

/// A call that reached a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCall {
    pub provider: String,
    pub op: StorageOp,
    pub bucket: Option<String>,
}

#[derive(Debug, Default)]
struct ProviderState {
    buckets: Vec<String>,
    fail_listing: bool,
    fail_create: HashSet<String>,
    racing_create: HashSet<String>,
}

#[derive(Debug, Default)]
struct CloudState {
    providers: HashMap<String, ProviderState>,
    calls: Vec<StorageCall>,
}

/// A set of in-memory providers, shared by every client it hands out
#[derive(Debug, Default, Clone)]
pub struct MemoryCloud {
    state: Arc<Mutex<CloudState>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a provider's buckets, in listing order
    pub fn set_buckets<I, S>(&self, provider: &str, buckets: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock();
        state.providers.entry(provider.to_string()).or_default().buckets =
            buckets.into_iter().map(Into::into).collect();
    }

    /// Make every listing of `provider` fail
    pub fn fail_listing(&self, provider: &str) {
        let mut state = self.state.lock();
        state
            .providers
            .entry(provider.to_string())
            .or_default()
            .fail_listing = true;
    }

    /// Make creation of `bucket` on `provider` fail
    pub fn fail_create(&self, provider: &str, bucket: &str) {
        let mut state = self.state.lock();
        state
            .providers
            .entry(provider.to_string())
            .or_default()
            .fail_create
            .insert(bucket.to_string());
    }

    /// Creation of `bucket` fails because someone else created it first
    pub fn race_create(&self, provider: &str, bucket: &str) {
        let mut state = self.state.lock();
        state
            .providers
            .entry(provider.to_string())
            .or_default()
            .racing_create
            .insert(bucket.to_string());
    }

    pub fn buckets(&self, provider: &str) -> Vec<String> {
        self.state
            .lock()
            .providers
            .get(provider)
            .map(|p| p.buckets.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.state.lock().calls.clone()
    }

    /// Calls that would have changed remote state
    pub fn mutations(&self) -> Vec<StorageCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == StorageOp::Create)
            .collect()
    }

    fn log(state: &mut CloudState, provider: &str, op: StorageOp, bucket: Option<&str>) {
        state.calls.push(StorageCall {
            provider: provider.to_string(),
            op,
            bucket: bucket.map(String::from),
        });
    }
}

#[async_trait]
impl StorageFactory for MemoryCloud {
    async fn connect(&self, provider: &Arc<ProviderConfig>) -> Result<Arc<dyn StorageClient>> {
        Ok(Arc::new(MemoryStorage {
            cloud: self.clone(),
            provider: provider.clone(),
        }))
    }
}

/// Client for one provider of a [`MemoryCloud`]
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    cloud: MemoryCloud,
    provider: Arc<ProviderConfig>,
}

#[async_trait]
impl StorageClient for MemoryStorage {
    fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    async fn list_buckets(&self) -> Result<BucketSet> {
        let name = self.provider.name();
        let mut state = self.cloud.state.lock();
        MemoryCloud::log(&mut state, name, StorageOp::List, None);

        let provider = state.providers.entry(name.to_string()).or_default();
        if provider.fail_listing {
            return Err(SyncError::List {
                provider: name.to_string(),
                message: "AccessDenied".to_string(),
            });
        }
        Ok(provider.buckets.iter().cloned().collect())
    }

    async fn bucket_exists(&self, bucket: &str) -> bool {
        let name = self.provider.name();
        let mut state = self.cloud.state.lock();
        MemoryCloud::log(&mut state, name, StorageOp::Exists, Some(bucket));

        state
            .providers
            .get(name)
            .map(|p| !p.fail_listing && p.buckets.iter().any(|b| b == bucket))
            .unwrap_or(false)
    }

    async fn create_bucket_live(&self, bucket: &str) -> Result<()> {
        let name = self.provider.name();
        let mut state = self.cloud.state.lock();
        MemoryCloud::log(&mut state, name, StorageOp::Create, Some(bucket));

        let provider = state.providers.entry(name.to_string()).or_default();
        let failure = |message: &str| SyncError::Creation {
            provider: name.to_string(),
            bucket: bucket.to_string(),
            message: message.to_string(),
        };

        if provider.fail_create.contains(bucket) {
            return Err(failure("AccessDenied"));
        }
        if provider.racing_create.remove(bucket) {
            provider.buckets.push(bucket.to_string());
            return Err(failure("BucketAlreadyOwnedByYou"));
        }
        if provider.buckets.iter().any(|b| b == bucket) {
            return Err(failure("BucketAlreadyOwnedByYou"));
        }

        provider.buckets.push(bucket.to_string());
        Ok(())
    }
}
