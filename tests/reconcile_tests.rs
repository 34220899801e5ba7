//! Reconciler behavior against in-memory providers
//!
//! Run with: cargo test --test reconcile_tests

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use bucketsync::config::{ExclusionList, ProviderRegistry, RunConfiguration};
use bucketsync::report::{CollectingSink, Reporter, SyncEvent};
use bucketsync::storage::{MemoryCloud, StorageOp};
use bucketsync::transfer::RecordingEngine;
use bucketsync::{BucketReconciler, ErrorKind, PairOutcome, PairToken, ProviderConfig};

fn provider(name: &str) -> ProviderConfig {
    ProviderConfig::new(
        name,
        Some(format!("https://{}.example.com", name)),
        Some("us-east-1".into()),
        Some("access".into()),
        Some("secret".into()),
    )
    .unwrap()
}

struct Harness {
    cloud: MemoryCloud,
    engine: RecordingEngine,
    sink: Arc<CollectingSink>,
    registry: Arc<ProviderRegistry>,
}

impl Harness {
    fn new(source: &[&str], destination: &[&str]) -> Self {
        let cloud = MemoryCloud::new();
        cloud.set_buckets("src", source.iter().copied());
        cloud.set_buckets("dst", destination.iter().copied());

        let mut registry = ProviderRegistry::new();
        registry.insert(provider("src"));
        registry.insert(provider("dst"));

        Self {
            cloud,
            engine: RecordingEngine::new(),
            sink: Arc::new(CollectingSink::new()),
            registry: Arc::new(registry),
        }
    }

    fn reconciler(&self, config: RunConfiguration) -> BucketReconciler {
        BucketReconciler::new(
            self.registry.clone(),
            Arc::new(self.cloud.clone()),
            Arc::new(self.engine.clone()),
            Arc::new(config),
            Reporter::new("test-run", self.sink.clone()),
        )
    }

    async fn run(&self, config: RunConfiguration) -> PairOutcome {
        self.reconciler(config)
            .reconcile(&PairToken::new("src", "dst"), None)
            .await
    }

    fn synced_buckets(&self) -> Vec<String> {
        self.engine
            .transfers()
            .into_iter()
            .map(|t| t.source.bucket)
            .collect()
    }
}

fn dry_run() -> RunConfiguration {
    RunConfiguration {
        dry_run: true,
        ..Default::default()
    }
}

/// Counts must equal the tallies over per-bucket results
fn assert_consistent(outcome: &PairOutcome) {
    let buckets = outcome.per_bucket();
    assert_eq!(
        outcome.created_count(),
        buckets.iter().filter(|b| b.created).count()
    );
    assert_eq!(
        outcome.synced_count(),
        buckets.iter().filter(|b| b.synced).count()
    );
    assert_eq!(
        outcome.failed_count(),
        buckets.iter().filter(|b| b.failed()).count()
    );
}

fn counts(outcome: &PairOutcome) -> (usize, usize, usize) {
    (
        outcome.created_count(),
        outcome.synced_count(),
        outcome.failed_count(),
    )
}

// ============================================================================
// Live runs
// ============================================================================

#[tokio::test]
async fn test_live_run_with_creation_failure() {
    let h = Harness::new(&["a", "b", "c"], &["b"]);
    h.cloud.fail_create("dst", "c");

    let outcome = h.run(RunConfiguration::default()).await;

    assert_consistent(&outcome);
    assert_eq!(counts(&outcome), (1, 2, 1));
    assert_eq!(outcome.error, None);

    let c = &outcome.per_bucket()[2];
    assert_eq!(c.bucket, "c");
    assert!(!c.created);
    assert!(!c.synced);
    assert_eq!(c.error, Some(ErrorKind::Creation));

    // creation attempted for a and c only, sync never attempted for c
    let creates: Vec<_> = h
        .cloud
        .mutations()
        .into_iter()
        .filter_map(|c| c.bucket)
        .collect();
    assert_eq!(creates, vec!["a", "c"]);
    assert_eq!(h.synced_buckets(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_live_run_creates_missing_and_syncs_all() {
    let h = Harness::new(&["a", "b", "c"], &["b"]);

    let outcome = h.run(RunConfiguration::default()).await;

    assert_eq!(counts(&outcome), (2, 3, 0));
    assert_eq!(h.cloud.buckets("dst"), vec!["b", "a", "c"]);
    for transfer in h.engine.transfers() {
        assert!(transfer.options.update_only());
        assert!(!transfer.options.dry_run);
        assert_eq!(transfer.source.provider, "src");
        assert_eq!(transfer.destination.provider, "dst");
        assert_eq!(transfer.source.bucket, transfer.destination.bucket);
    }
}

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let h = Harness::new(&["a", "b", "c"], &["b"]);

    let first = h.run(RunConfiguration::default()).await;
    let second = h.run(RunConfiguration::default()).await;

    assert_eq!(first.created_count(), 2);
    assert_eq!(second.created_count(), 0);
    assert_eq!(second.synced_count(), first.synced_count());
}

#[tokio::test]
async fn test_transfer_failure_is_contained() {
    let h = Harness::new(&["a", "b", "c"], &["a", "b", "c"]);
    h.engine.fail_bucket("b");

    let outcome = h.run(RunConfiguration::default()).await;

    assert_consistent(&outcome);
    assert_eq!(counts(&outcome), (0, 2, 1));
    assert_eq!(outcome.per_bucket()[1].error, Some(ErrorKind::Transfer));
    assert_eq!(h.synced_buckets(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_created_bucket_with_failed_sync_counts_both() {
    let h = Harness::new(&["a"], &[]);
    h.engine.fail_bucket("a");

    let outcome = h.run(RunConfiguration::default()).await;

    assert_consistent(&outcome);
    assert_eq!(counts(&outcome), (1, 0, 1));
}

// ============================================================================
// Dry runs
// ============================================================================

#[tokio::test]
async fn test_dry_run_reports_plan_without_mutations() {
    let h = Harness::new(&["a", "b", "c"], &["b"]);
    h.cloud.fail_create("dst", "c");

    let outcome = h.run(dry_run()).await;

    assert_consistent(&outcome);
    assert_eq!(counts(&outcome), (2, 3, 0));
    assert!(h.cloud.mutations().is_empty());
    assert!(h.engine.live_transfers().is_empty());
    assert_eq!(h.engine.transfers().len(), 3);
    assert_eq!(h.cloud.buckets("dst"), vec!["b"]);
}

#[tokio::test]
async fn test_dry_run_counts_match_live_run() {
    let dry = Harness::new(&["x", "y", "z"], &["y"]);
    let live = Harness::new(&["x", "y", "z"], &["y"]);

    let planned = dry.run(dry_run()).await;
    let done = live.run(RunConfiguration::default()).await;

    assert_eq!(counts(&planned), counts(&done));
    let names = |o: &PairOutcome| {
        o.per_bucket()
            .iter()
            .map(|b| (b.bucket.clone(), b.created, b.synced))
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&planned), names(&done));
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_excluded_buckets_never_appear() {
    let h = Harness::new(&["a", "tmp", "c"], &[]);
    let config = RunConfiguration {
        exclusions: ExclusionList::parse("tmp scratch"),
        ..Default::default()
    };

    let outcome = h.run(config).await;

    assert!(outcome.per_bucket().iter().all(|b| b.bucket != "tmp"));
    assert_eq!(outcome.per_bucket().len(), 2);
    assert!(!h.synced_buckets().contains(&"tmp".to_string()));
    assert!(!h.cloud.buckets("dst").contains(&"tmp".to_string()));
}

#[tokio::test]
async fn test_bucket_filter_limits_to_one() {
    let h = Harness::new(&["a", "b", "c"], &[]);
    let config = RunConfiguration {
        bucket_filter: Some("b".into()),
        ..Default::default()
    };

    let outcome = h.run(config).await;
    let names: Vec<_> = outcome.per_bucket().iter().map(|b| b.bucket.as_str()).collect();
    assert_eq!(names, vec!["b"]);
}

#[tokio::test]
async fn test_bucket_filter_absent_is_empty_success() {
    let h = Harness::new(&["a", "b"], &[]);
    let config = RunConfiguration {
        bucket_filter: Some("nope".into()),
        ..Default::default()
    };

    let outcome = h.run(config).await;

    assert!(outcome.per_bucket().is_empty());
    assert!(!outcome.has_failures());
    assert_eq!(h.engine.sessions_opened(), 0);
}

// ============================================================================
// Listing and credentials
// ============================================================================

#[tokio::test]
async fn test_empty_source_is_trivial_success() {
    let h = Harness::new(&[], &["b"]);

    let outcome = h.run(RunConfiguration::default()).await;

    assert_eq!(counts(&outcome), (0, 0, 0));
    assert_eq!(outcome.error, None);
    assert_eq!(h.engine.sessions_opened(), 0);
}

#[tokio::test]
async fn test_source_listing_failure_aborts_pair() {
    let h = Harness::new(&["a"], &[]);
    h.cloud.fail_listing("src");

    let outcome = h.run(RunConfiguration::default()).await;

    assert_eq!(outcome.error, Some(ErrorKind::List));
    assert!(outcome.per_bucket().is_empty());
    assert!(h.cloud.mutations().is_empty());
}

#[tokio::test]
async fn test_destination_listing_failure_treated_as_empty() {
    let h = Harness::new(&["a", "b"], &[]);
    h.cloud.fail_listing("dst");

    let outcome = h.run(RunConfiguration::default()).await;

    assert_eq!(outcome.error, None);
    assert_eq!(counts(&outcome), (2, 2, 0));
}

#[tokio::test]
async fn test_invalid_credentials_abort_pair() {
    let h = Harness::new(&["a"], &[]);

    let outcome = h
        .reconciler(RunConfiguration::default())
        .reconcile(&PairToken::new("src", "unknown"), None)
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::Credential));
    assert!(outcome.per_bucket().is_empty());
    assert!(h.cloud.calls().is_empty());
}

// ============================================================================
// Creation races
// ============================================================================

#[tokio::test]
async fn test_failed_create_of_existing_bucket_proceeds_to_sync() {
    let h = Harness::new(&["a"], &[]);
    h.cloud.race_create("dst", "a");

    let outcome = h.run(RunConfiguration::default()).await;

    assert_consistent(&outcome);
    assert_eq!(counts(&outcome), (0, 1, 0));
    assert!(h
        .cloud
        .calls()
        .iter()
        .any(|c| c.op == StorageOp::Exists && c.bucket.as_deref() == Some("a")));
}

#[tokio::test]
async fn test_failed_create_without_recheck_is_failure() {
    let h = Harness::new(&["a"], &[]);
    h.cloud.race_create("dst", "a");
    let config = RunConfiguration {
        recheck_on_create_failure: false,
        ..Default::default()
    };

    let outcome = h.run(config).await;

    assert_eq!(counts(&outcome), (0, 0, 1));
    assert!(h.engine.transfers().is_empty());
}

// ============================================================================
// Sessions, events, timeouts
// ============================================================================

#[tokio::test]
async fn test_session_released_after_pair() {
    let h = Harness::new(&["a", "b"], &[]);
    h.engine.fail_bucket("a");

    h.run(RunConfiguration::default()).await;

    assert_eq!(h.engine.sessions_opened(), 1);
    assert_eq!(h.engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_event_sequence_for_pair() {
    let h = Harness::new(&["a", "c"], &[]);
    h.cloud.fail_create("dst", "c");

    h.run(RunConfiguration::default()).await;

    let kinds: Vec<&'static str> = h
        .sink
        .events_for("src:dst")
        .iter()
        .map(|e| match e {
            SyncEvent::BucketStarted { .. } => "started",
            SyncEvent::BucketCreated { .. } => "created",
            SyncEvent::BucketCreationFailed { .. } => "creation_failed",
            SyncEvent::BucketSynced { .. } => "synced",
            SyncEvent::BucketSyncFailed { .. } => "sync_failed",
            SyncEvent::PairSummary { .. } => "summary",
            _ => "other",
        })
        .collect();

    assert_eq!(
        kinds,
        vec!["started", "created", "synced", "started", "creation_failed", "summary"]
    );

    match h.sink.events().last() {
        Some(SyncEvent::PairSummary {
            created,
            synced,
            failed,
            ..
        }) => assert_eq!((*created, *synced, *failed), (1, 1, 1)),
        other => panic!("expected pair summary, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pair_timeout_keeps_finished_buckets() {
    let h = Harness::new(&["a", "b", "c"], &["a", "b", "c"]);
    h.engine.set_delay(Duration::from_millis(150));

    let outcome = h
        .reconciler(RunConfiguration::default())
        .reconcile(&PairToken::new("src", "dst"), Some(Duration::from_millis(250)))
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::Timeout));
    assert_consistent(&outcome);
    assert_eq!(outcome.synced_count(), 1);
    // "b" was mid-transfer when time ran out; "c" never started
    assert_eq!(outcome.failed_count(), 1);
    assert_eq!(outcome.per_bucket().len(), 2);
    assert_eq!(h.engine.open_sessions(), 0);
}

#[tokio::test]
async fn test_pair_timeout_reports_in_flight_bucket() {
    let h = Harness::new(&["a", "b"], &[]);
    h.engine.set_delay(Duration::from_millis(150));

    let outcome = h
        .reconciler(RunConfiguration::default())
        .reconcile(&PairToken::new("src", "dst"), Some(Duration::from_millis(250)))
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::Timeout));
    assert_consistent(&outcome);
    assert_eq!(counts(&outcome), (2, 1, 1));

    let interrupted = &outcome.per_bucket()[1];
    assert_eq!(interrupted.bucket, "b");
    assert!(interrupted.created);
    assert!(!interrupted.synced);
    assert_eq!(interrupted.error, Some(ErrorKind::Timeout));

    let b_events: Vec<&'static str> = h
        .sink
        .events_for("src:dst")
        .iter()
        .filter_map(|e| match e {
            SyncEvent::BucketStarted { bucket, .. } if bucket == "b" => Some("started"),
            SyncEvent::BucketCreated { bucket, .. } if bucket == "b" => Some("created"),
            SyncEvent::BucketSyncFailed { bucket, .. } if bucket == "b" => Some("sync_failed"),
            _ => None,
        })
        .collect();
    assert_eq!(b_events, vec!["started", "created", "sync_failed"]);
}
