//! Provider registry and pair list loading

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{ConfigSource, ExclusionList, RunConfiguration};
use crate::error::{Result, SyncError};
use crate::types::{PairToken, ProviderConfig, SyncPair};

/// Comma-separated `SOURCE:DEST` list
pub const PAIRS_KEY: &str = "SYNC_PAIRS";
pub const EXCLUDE_KEY: &str = "SYNC_EXCLUDE_BUCKETS";
pub const TRANSFERS_KEY: &str = "SYNC_TRANSFERS";
pub const CHECKERS_KEY: &str = "SYNC_CHECKERS";
/// Highest index read from the `PROVIDERA{i}` / `PROVIDERB{i}` scheme
pub const MAX_INDEX_KEY: &str = "SYNC_MAX_PAIR_INDEX";
const DEFAULT_MAX_INDEX: usize = 10;

/// Key prefix for a provider's settings: upper-cased, other characters as `_`
pub fn provider_key_prefix(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Validation state of one named provider
#[derive(Debug, Clone)]
pub enum ProviderState {
    Valid(Arc<ProviderConfig>),
    Invalid { missing: Vec<String> },
}

/// Immutable name -> provider map, built once per run
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderState>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already validated provider
    pub fn insert(&mut self, provider: ProviderConfig) {
        self.providers.insert(
            provider.name().to_string(),
            ProviderState::Valid(Arc::new(provider)),
        );
    }

    /// Read and validate `name` from `source`, recording the result
    pub fn load(&mut self, source: &dyn ConfigSource, name: &str) -> &ProviderState {
        self.providers
            .entry(name.to_string())
            .or_insert_with(|| read_provider(source, name))
    }

    pub fn get(&self, name: &str) -> Option<&ProviderState> {
        self.providers.get(name)
    }

    fn lookup(&self, name: &str) -> Result<Arc<ProviderConfig>> {
        match self.providers.get(name) {
            Some(ProviderState::Valid(provider)) => Ok(provider.clone()),
            Some(ProviderState::Invalid { missing }) => Err(SyncError::Credential {
                provider: name.to_string(),
                missing: missing.clone(),
            }),
            None => Err(SyncError::Credential {
                provider: name.to_string(),
                missing: vec!["endpoint", "region", "access_key", "secret_key"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            }),
        }
    }

    /// Resolve both sides of a pair
    pub fn resolve(&self, token: &PairToken) -> Result<SyncPair> {
        Ok(SyncPair {
            source: self.lookup(&token.source)?,
            destination: self.lookup(&token.destination)?,
        })
    }

    pub fn is_resolvable(&self, token: &PairToken) -> bool {
        self.resolve(token).is_ok()
    }
}

fn read_provider(source: &dyn ConfigSource, name: &str) -> ProviderState {
    let prefix = provider_key_prefix(name);
    let field = |suffix: &str| source.get(&format!("{}_S3_{}", prefix, suffix));

    match ProviderConfig::new(
        name,
        field("ENDPOINT"),
        field("REGION"),
        field("ACCESS_KEY"),
        field("SECRET_KEY"),
    ) {
        Ok(provider) => {
            debug!("Loaded provider {} ({})", name, provider.endpoint());
            ProviderState::Valid(Arc::new(provider))
        }
        Err(SyncError::Credential { missing, .. }) => {
            warn!(
                "Provider {} is incomplete, missing: {}",
                name,
                missing.join(", ")
            );
            ProviderState::Invalid { missing }
        }
        Err(e) => ProviderState::Invalid {
            missing: vec![e.to_string()],
        },
    }
}

/// Everything resolved from configuration before the first pair runs
#[derive(Debug, Clone)]
pub struct RunSetup {
    pub registry: Arc<ProviderRegistry>,
    /// Pairs to attempt, in configured order
    pub pairs: Vec<PairToken>,
}

impl RunConfiguration {
    /// Read the tuning keys (exclusions, concurrency hints) from `source`
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let mut config = RunConfiguration::default();

        if let Some(raw) = source.get(EXCLUDE_KEY) {
            config.exclusions = ExclusionList::parse(&raw);
        }
        if let Some(n) = parse_count(source, TRANSFERS_KEY)? {
            config.transfers = n;
        }
        if let Some(n) = parse_count(source, CHECKERS_KEY)? {
            config.checkers = n;
        }

        Ok(config)
    }
}

fn parse_count(source: &dyn ConfigSource, key: &str) -> Result<Option<usize>> {
    match source.get(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<usize>() {
            Ok(0) | Err(_) => Err(SyncError::Configuration(format!(
                "{} must be a positive integer, got '{}'",
                key, raw
            ))),
            Ok(n) => Ok(Some(n)),
        },
    }
}

/// Build the provider registry and pair list.
///
/// Fails with [`SyncError::Configuration`] when no pair is configured or no
/// configured pair has valid credentials on both sides. Pairs with invalid
/// credentials are otherwise kept so the run can report them.
pub fn load_setup(source: &dyn ConfigSource, config: &RunConfiguration) -> Result<RunSetup> {
    let mut registry = ProviderRegistry::new();

    let pairs = if let Some(ref only) = config.pair_filter {
        vec![only.clone()]
    } else if let Some(raw) = source.get(PAIRS_KEY) {
        parse_pair_list(&raw)
    } else {
        indexed_pairs(source, &mut registry)?
    };

    if pairs.is_empty() {
        return Err(SyncError::Configuration(format!(
            "no sync pairs configured (set {} or PROVIDERA1/PROVIDERB1)",
            PAIRS_KEY
        )));
    }

    for pair in &pairs {
        registry.load(source, &pair.source);
        registry.load(source, &pair.destination);
    }

    if !pairs.iter().any(|p| registry.is_resolvable(p)) {
        return Err(SyncError::Configuration(
            "no configured pair has valid credentials on both sides".to_string(),
        ));
    }

    Ok(RunSetup {
        registry: Arc::new(registry),
        pairs,
    })
}

/// Parse `a:b, c:d`; malformed tokens are skipped with a warning
fn parse_pair_list(raw: &str) -> Vec<PairToken> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .filter_map(|token| match token.parse::<PairToken>() {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!("Skipping pair token '{}': {}", token, e);
                None
            }
        })
        .collect()
}

/// `PROVIDERA{i}` / `PROVIDERB{i}` scheme: every index stands alone and is
/// only kept when both providers are fully configured.
fn indexed_pairs(
    source: &dyn ConfigSource,
    registry: &mut ProviderRegistry,
) -> Result<Vec<PairToken>> {
    let max = parse_count(source, MAX_INDEX_KEY)?.unwrap_or(DEFAULT_MAX_INDEX);
    let mut pairs = Vec::new();

    for i in 1..=max {
        let a = source.get(&format!("PROVIDERA{}", i));
        let b = source.get(&format!("PROVIDERB{}", i));
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            (None, None) => continue,
            _ => {
                warn!("Pair index {} has only one provider set, skipping", i);
                continue;
            }
        };

        let token = match format!("{}:{}", a.trim(), b.trim()).parse::<PairToken>() {
            Ok(token) => token,
            Err(e) => {
                warn!("Pair index {} is malformed: {}", i, e);
                continue;
            }
        };

        registry.load(source, &token.source);
        registry.load(source, &token.destination);
        if registry.is_resolvable(&token) {
            pairs.push(token);
        } else {
            warn!("Pair index {} ({}) has incomplete credentials, skipping", i, token);
        }
    }

    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapSource;
    use crate::error::ErrorKind;

    fn with_provider(source: MapSource, name: &str) -> MapSource {
        let prefix = provider_key_prefix(name);
        source
            .with(format!("{}_S3_ENDPOINT", prefix), "https://s3.example.com")
            .with(format!("{}_S3_REGION", prefix), "us-east-1")
            .with(format!("{}_S3_ACCESS_KEY", prefix), "key")
            .with(format!("{}_S3_SECRET_KEY", prefix), "secret")
    }

    #[test]
    fn test_provider_key_prefix() {
        assert_eq!(provider_key_prefix("wasabi"), "WASABI");
        assert_eq!(provider_key_prefix("do-spaces.ams3"), "DO_SPACES_AMS3");
    }

    #[test]
    fn test_pair_list_keeps_invalid_credential_pairs() {
        let source = with_provider(MapSource::new(), "aws")
            .with("SYNC_PAIRS", "aws:wasabi, aws:b2, bogus");
        let source = with_provider(source, "wasabi");

        let setup = load_setup(&source, &RunConfiguration::default()).unwrap();
        assert_eq!(
            setup.pairs,
            vec![PairToken::new("aws", "wasabi"), PairToken::new("aws", "b2")]
        );

        let err = setup
            .registry
            .resolve(&PairToken::new("aws", "b2"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Credential);
    }

    #[test]
    fn test_no_pairs_is_fatal() {
        let err = load_setup(&MapSource::new(), &RunConfiguration::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_no_valid_pair_is_fatal() {
        let source = MapSource::new().with("SYNC_PAIRS", "aws:wasabi");
        let err = load_setup(&source, &RunConfiguration::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_pair_filter_overrides_list() {
        let source = with_provider(with_provider(MapSource::new(), "gcs"), "r2")
            .with("SYNC_PAIRS", "aws:wasabi");
        let config = RunConfiguration {
            pair_filter: Some(PairToken::new("gcs", "r2")),
            ..Default::default()
        };

        let setup = load_setup(&source, &config).unwrap();
        assert_eq!(setup.pairs, vec![PairToken::new("gcs", "r2")]);
    }

    #[test]
    fn test_indexed_scheme_skips_incomplete_indices() {
        let source = with_provider(with_provider(MapSource::new(), "aws"), "wasabi")
            .with("PROVIDERA1", "aws")
            .with("PROVIDERB1", "wasabi")
            .with("PROVIDERA2", "aws")
            .with("PROVIDERB2", "b2")
            .with("PROVIDERA4", "wasabi")
            .with("PROVIDERB4", "aws")
            .with("PROVIDERA5", "aws");

        let setup = load_setup(&source, &RunConfiguration::default()).unwrap();
        assert_eq!(
            setup.pairs,
            vec![PairToken::new("aws", "wasabi"), PairToken::new("wasabi", "aws")]
        );
    }

    #[test]
    fn test_run_configuration_from_source() {
        let source = MapSource::new()
            .with("SYNC_EXCLUDE_BUCKETS", "tmp scratch")
            .with("SYNC_TRANSFERS", "4");
        let config = RunConfiguration::from_source(&source).unwrap();
        assert!(config.exclusions.is_excluded("scratch"));
        assert_eq!(config.transfers, 4);
        assert_eq!(config.checkers, crate::config::DEFAULT_CHECKERS);

        let bad = MapSource::new().with("SYNC_CHECKERS", "0");
        assert!(RunConfiguration::from_source(&bad).is_err());
    }
}
