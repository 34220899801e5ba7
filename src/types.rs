//! Core data types for bucketsync

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ErrorKind, Result, SyncError};

// =============================================================================
// Providers
// =============================================================================

/// A credential value that never prints itself
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value (only for handing to a client or engine config)
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Resolved endpoint and credentials for one named provider.
///
/// Only constructed through [`ProviderConfig::new`], which rejects
/// incomplete records, so every value of this type is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    name: String,
    endpoint: String,
    region: String,
    access_key: Secret,
    secret_key: Secret,
}

impl ProviderConfig {
    /// Validate and build a provider record.
    ///
    /// Every missing (empty) field is reported at once in the
    /// [`SyncError::Credential`] error.
    pub fn new(
        name: impl Into<String>,
        endpoint: Option<String>,
        region: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
    ) -> Result<Self> {
        let name = name.into();
        let mut missing = Vec::new();

        let mut take = |field: &str, value: Option<String>| -> String {
            match value.map(|v| v.trim().to_string()) {
                Some(v) if !v.is_empty() => v,
                _ => {
                    missing.push(field.to_string());
                    String::new()
                }
            }
        };

        let endpoint = take("endpoint", endpoint);
        let region = take("region", region);
        let access_key = take("access_key", access_key);
        let secret_key = take("secret_key", secret_key);

        if !missing.is_empty() {
            return Err(SyncError::Credential {
                provider: name,
                missing,
            });
        }

        if !is_http_url(&endpoint) {
            return Err(SyncError::Credential {
                provider: name,
                missing: vec![format!("endpoint (not an http(s) URL: {})", endpoint)],
            });
        }

        Ok(Self {
            name,
            endpoint,
            region,
            access_key: Secret(access_key),
            secret_key: Secret(secret_key),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn access_key(&self) -> &Secret {
        &self.access_key
    }

    pub fn secret_key(&self) -> &Secret {
        &self.secret_key
    }
}

fn is_http_url(s: &str) -> bool {
    match Url::parse(s) {
        Ok(url) => {
            matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

// =============================================================================
// Pairs
// =============================================================================

static PROVIDER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex"));

/// A `SOURCE:DEST` pair as written in configuration, before resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairToken {
    pub source: String,
    pub destination: String,
}

impl PairToken {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Stable identifier used in outcomes and events
    pub fn id(&self) -> String {
        format!("{}:{}", self.source, self.destination)
    }
}

impl fmt::Display for PairToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.destination)
    }
}

impl FromStr for PairToken {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (source, destination) = s.split_once(':').ok_or_else(|| {
            SyncError::Configuration(format!("pair '{}' must be SOURCE:DEST", s))
        })?;
        let (source, destination) = (source.trim(), destination.trim());

        for side in [source, destination] {
            if !PROVIDER_NAME.is_match(side) {
                return Err(SyncError::Configuration(format!(
                    "pair '{}' has invalid provider name '{}'",
                    s, side
                )));
            }
        }
        if source == destination {
            return Err(SyncError::Configuration(format!(
                "pair '{}' uses the same provider on both sides",
                s
            )));
        }

        Ok(Self::new(source, destination))
    }
}

/// A pair whose both sides resolved to valid providers
#[derive(Debug, Clone)]
pub struct SyncPair {
    pub source: Arc<ProviderConfig>,
    pub destination: Arc<ProviderConfig>,
}

impl SyncPair {
    pub fn id(&self) -> String {
        format!("{}:{}", self.source.name(), self.destination.name())
    }
}

/// Where a bucket lives, as handed to the transfer engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketLocation {
    pub provider: String,
    pub bucket: String,
}

impl BucketLocation {
    pub fn new(provider: &ProviderConfig, bucket: &str) -> Self {
        Self {
            provider: provider.name().to_string(),
            bucket: bucket.to_string(),
        }
    }
}

impl fmt::Display for BucketLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.bucket)
    }
}

// =============================================================================
// Buckets and plans
// =============================================================================

/// Bucket names returned by one listing, in listing order, deduplicated.
///
/// An empty set means the provider has no buckets; a failed listing is an
/// error and never an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSet {
    names: Vec<String>,
    index: HashSet<String>,
}

impl BucketSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a name, keeping first-seen order. Returns false on duplicates.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.index.contains(&name) {
            return false;
        }
        self.index.insert(name.clone());
        self.names.push(name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for BucketSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = BucketSet::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

/// What one pair needs: buckets to create and buckets to sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationPlan {
    /// Eligible source buckets missing on the destination
    pub to_create: BTreeSet<String>,
    /// Eligible source buckets, in source listing order
    pub to_sync: Vec<String>,
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of processing one bucket within a pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOutcome {
    pub bucket: String,
    pub created: bool,
    pub synced: bool,
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BucketOutcome {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            created: false,
            synced: false,
            error: None,
            message: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn fail(&mut self, err: &SyncError) {
        self.error = Some(err.kind());
        self.message = Some(err.to_string());
    }
}

/// Aggregated result of one pair.
///
/// Counts only move through [`PairOutcome::record`], so they always equal
/// the tallies over `per_bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairOutcome {
    pub pair_id: String,
    created_count: usize,
    synced_count: usize,
    failed_count: usize,
    per_bucket: Vec<BucketOutcome>,
    /// Pair-level failure that prevented bucket processing
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PairOutcome {
    pub fn new(pair_id: impl Into<String>) -> Self {
        Self {
            pair_id: pair_id.into(),
            created_count: 0,
            synced_count: 0,
            failed_count: 0,
            per_bucket: Vec::new(),
            error: None,
            message: None,
        }
    }

    pub(crate) fn abort(&mut self, err: &SyncError) {
        self.error = Some(err.kind());
        self.message = Some(err.to_string());
    }

    /// Append a finished bucket and update the tallies
    pub fn record(&mut self, bucket: BucketOutcome) {
        if bucket.created {
            self.created_count += 1;
        }
        if bucket.synced {
            self.synced_count += 1;
        }
        if bucket.failed() {
            self.failed_count += 1;
        }
        self.per_bucket.push(bucket);
    }

    pub fn created_count(&self) -> usize {
        self.created_count
    }

    pub fn synced_count(&self) -> usize {
        self.synced_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    pub fn per_bucket(&self) -> &[BucketOutcome] {
        &self.per_bucket
    }

    /// Any bucket failed, or the pair itself did not run to completion
    pub fn has_failures(&self) -> bool {
        self.failed_count > 0 || self.error.is_some()
    }
}

/// Final result of one orchestrated run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// Outcomes in input order, one per attempted pair
    pub outcomes: Vec<PairOutcome>,
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn pairs_processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(PairOutcome::has_failures)
    }

    pub fn total_created(&self) -> usize {
        self.outcomes.iter().map(PairOutcome::created_count).sum()
    }

    pub fn total_synced(&self) -> usize {
        self.outcomes.iter().map(PairOutcome::synced_count).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.outcomes.iter().map(PairOutcome::failed_count).sum()
    }

    /// Process exit status for a completed run
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict && self.has_failures() {
            2
        } else {
            0
        }
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
