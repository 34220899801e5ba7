//! Run configuration and provider/pair loading
//!
//! Configuration arrives through a [`ConfigSource`] (environment, TOML file
//! or in-memory map) and is turned into an immutable [`ProviderRegistry`]
//! plus an ordered pair list once, at startup. Nothing downstream reads the
//! environment.

mod loader;
mod source;

pub use loader::{load_setup, provider_key_prefix, ProviderRegistry, ProviderState, RunSetup};
pub use source::{ConfigSource, EnvSource, FileSource, LayeredSource, MapSource};

use std::collections::HashSet;
use std::time::Duration;

use crate::types::PairToken;

/// Default parallel transfers handed to the transfer engine
pub const DEFAULT_TRANSFERS: usize = 32;
/// Default parallel checkers handed to the transfer engine
pub const DEFAULT_CHECKERS: usize = 64;

/// Bucket names that are never processed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    names: HashSet<String>,
}

impl ExclusionList {
    /// Parse a whitespace- or comma-separated list of bucket names
    pub fn parse(raw: &str) -> Self {
        raw.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whole-name match; `logs` does not exclude `logs-archive`
    pub fn is_excluded(&self, bucket: &str) -> bool {
        self.names.contains(bucket)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Immutable execution parameters for one run
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Plan and report without mutating remote state
    pub dry_run: bool,
    /// Run all pairs concurrently
    pub parallel: bool,
    /// Restrict the run to exactly this pair
    pub pair_filter: Option<PairToken>,
    /// Restrict every pair to exactly this bucket
    pub bucket_filter: Option<String>,
    pub exclusions: ExclusionList,
    pub verbose: bool,
    /// Parallel object transfers inside one bucket sync
    pub transfers: usize,
    /// Parallel object checks inside one bucket sync
    pub checkers: usize,
    /// After a failed live creation, query existence once before counting it
    pub recheck_on_create_failure: bool,
    /// Exit non-zero when any bucket or pair failed
    pub strict_exit: bool,
    pub pair_timeout: Option<Duration>,
    pub run_timeout: Option<Duration>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallel: false,
            pair_filter: None,
            bucket_filter: None,
            exclusions: ExclusionList::default(),
            verbose: false,
            transfers: DEFAULT_TRANSFERS,
            checkers: DEFAULT_CHECKERS,
            recheck_on_create_failure: true,
            strict_exit: false,
            pair_timeout: None,
            run_timeout: None,
        }
    }
}

impl RunConfiguration {
    /// Whether a source bucket passes the bucket filter and exclusion list
    pub fn is_eligible(&self, bucket: &str) -> bool {
        if let Some(ref only) = self.bucket_filter {
            if only != bucket {
                return false;
            }
        }
        !self.exclusions.is_excluded(bucket)
    }
}
