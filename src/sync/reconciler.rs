//! Per-pair bucket reconciliation
//!
//! For one `SOURCE:DEST` pair: list both sides, create every eligible source
//! bucket the destination lacks, then hand each eligible bucket to the
//! transfer engine. Failures stay as small as possible: a failed bucket is
//! recorded and the next bucket proceeds; only unusable credentials, an
//! unlistable source or a timeout stop the pair.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ProviderRegistry, RunConfiguration};
use crate::error::{Result, SyncError};
use crate::report::{Reporter, SyncEvent};
use crate::storage::{StorageClient, StorageFactory};
use crate::transfer::{TransferEngine, TransferOptions, TransferSession};
use crate::types::{
    BucketLocation, BucketOutcome, BucketSet, PairOutcome, PairToken, ReconciliationPlan,
    SyncPair,
};

/// Compute which buckets to create and which to sync.
///
/// `to_sync` keeps source listing order; `to_create` is the eligible part of
/// `source - destination`.
pub fn compute_plan(
    source: &BucketSet,
    destination: &BucketSet,
    config: &RunConfiguration,
) -> ReconciliationPlan {
    let to_sync: Vec<String> = source
        .iter()
        .filter(|b| config.is_eligible(b))
        .map(String::from)
        .collect();

    let to_create = to_sync
        .iter()
        .filter(|b| !destination.contains(b))
        .cloned()
        .collect();

    ReconciliationPlan { to_create, to_sync }
}

/// Mutable state of one pair's run; never shared between pairs
struct PairContext<'a> {
    pair_id: String,
    pair: &'a SyncPair,
    destination: &'a dyn StorageClient,
    session: &'a dyn TransferSession,
    options: TransferOptions,
    /// Buckets known to exist on the destination
    present: HashSet<String>,
    /// Buckets "created" under dry-run
    virtually_created: HashSet<String>,
}

/// The bucket a pair is working on, kept outside the pair's future so a
/// timeout can still report it
#[derive(Default)]
struct InFlight {
    bucket: Option<BucketOutcome>,
    creating: bool,
}

impl PairContext<'_> {
    fn exists(&self, bucket: &str) -> bool {
        (self.options.dry_run && self.virtually_created.contains(bucket))
            || self.present.contains(bucket)
    }
}

/// Reconciles one pair at a time
pub struct BucketReconciler {
    registry: Arc<ProviderRegistry>,
    storage: Arc<dyn StorageFactory>,
    transfer: Arc<dyn TransferEngine>,
    config: Arc<RunConfiguration>,
    reporter: Reporter,
}

impl BucketReconciler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        storage: Arc<dyn StorageFactory>,
        transfer: Arc<dyn TransferEngine>,
        config: Arc<RunConfiguration>,
        reporter: Reporter,
    ) -> Self {
        Self {
            registry,
            storage,
            transfer,
            config,
            reporter,
        }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Run one pair to completion, or until `budget` runs out.
    ///
    /// Never fails: every error ends up in the returned outcome. Buckets
    /// finished before a timeout keep their results, and the bucket in
    /// flight is recorded as timed out.
    pub async fn reconcile(&self, token: &PairToken, budget: Option<Duration>) -> PairOutcome {
        let mut outcome = PairOutcome::new(token.id());
        let mut in_flight = InFlight::default();

        let result = match budget {
            Some(limit) => {
                let work = self.process(token, &mut outcome, &mut in_flight);
                match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(limit)),
                }
            }
            None => self.process(token, &mut outcome, &mut in_flight).await,
        };

        if let Err(e) = result {
            if let Some(bucket) = in_flight.bucket.take() {
                self.interrupt(&mut outcome, bucket, in_flight.creating, &e);
            }
            self.abort(&mut outcome, &e);
        }
        self.summarize(&outcome);
        outcome
    }

    /// Record a pair that is not attempted at all
    pub fn skip(&self, token: &PairToken, err: &SyncError) -> PairOutcome {
        let mut outcome = PairOutcome::new(token.id());
        self.abort(&mut outcome, err);
        self.summarize(&outcome);
        outcome
    }

    /// Close out a bucket cut off mid-way, keeping a creation that already
    /// happened
    fn interrupt(
        &self,
        outcome: &mut PairOutcome,
        mut bucket: BucketOutcome,
        creating: bool,
        err: &SyncError,
    ) {
        let event = if creating {
            SyncEvent::BucketCreationFailed {
                pair_id: outcome.pair_id.clone(),
                bucket: bucket.bucket.clone(),
                message: err.to_string(),
            }
        } else {
            SyncEvent::BucketSyncFailed {
                pair_id: outcome.pair_id.clone(),
                bucket: bucket.bucket.clone(),
                message: err.to_string(),
            }
        };
        self.reporter.emit(event);
        bucket.fail(err);
        outcome.record(bucket);
    }

    fn abort(&self, outcome: &mut PairOutcome, err: &SyncError) {
        outcome.abort(err);
        self.reporter.emit(SyncEvent::PairSkipped {
            pair_id: outcome.pair_id.clone(),
            error: err.kind(),
            message: err.to_string(),
        });
    }

    fn summarize(&self, outcome: &PairOutcome) {
        self.reporter.emit(SyncEvent::PairSummary {
            pair_id: outcome.pair_id.clone(),
            created: outcome.created_count(),
            synced: outcome.synced_count(),
            failed: outcome.failed_count(),
        });
    }

    async fn process(
        &self,
        token: &PairToken,
        outcome: &mut PairOutcome,
        in_flight: &mut InFlight,
    ) -> Result<()> {
        let pair = self.registry.resolve(token)?;
        let source = self.storage.connect(&pair.source).await?;
        let destination = self.storage.connect(&pair.destination).await?;

        let source_buckets = source.list_buckets().await?;
        if source_buckets.is_empty() {
            info!("No buckets on {}, nothing to sync", pair.source.name());
            return Ok(());
        }

        let destination_buckets = match destination.list_buckets().await {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!("{}; treating {} as empty", e, pair.destination.name());
                BucketSet::new()
            }
        };

        let plan = compute_plan(&source_buckets, &destination_buckets, &self.config);
        debug!(
            "Pair {}: {} to sync, {} to create",
            outcome.pair_id,
            plan.to_sync.len(),
            plan.to_create.len()
        );
        if plan.to_sync.is_empty() {
            info!("No eligible buckets for {}", outcome.pair_id);
            return Ok(());
        }

        // Dropped at the end of this function, whichever way it exits
        let session = self.transfer.open_session(&pair).await?;

        let mut ctx = PairContext {
            pair_id: outcome.pair_id.clone(),
            pair: &pair,
            destination: destination.as_ref(),
            session: session.as_ref(),
            options: TransferOptions::from(self.config.as_ref()),
            present: destination_buckets.iter().map(String::from).collect(),
            virtually_created: HashSet::new(),
        };

        for bucket in &plan.to_sync {
            self.process_bucket(&mut ctx, in_flight, bucket).await;
            if let Some(result) = in_flight.bucket.take() {
                outcome.record(result);
            }
        }

        Ok(())
    }

    /// Create `bucket` on the destination if needed, then sync it. Progress
    /// is kept in `in_flight` until the caller records it.
    async fn process_bucket(
        &self,
        ctx: &mut PairContext<'_>,
        in_flight: &mut InFlight,
        bucket: &str,
    ) {
        let dry_run = ctx.options.dry_run;
        in_flight.bucket = Some(BucketOutcome::new(bucket));
        in_flight.creating = false;

        self.reporter.emit(SyncEvent::BucketStarted {
            pair_id: ctx.pair_id.clone(),
            bucket: bucket.to_string(),
        });

        if !ctx.exists(bucket) {
            in_flight.creating = true;
            match ctx.destination.create_bucket(bucket, dry_run).await {
                Ok(created) => {
                    if let Some(result) = in_flight.bucket.as_mut() {
                        result.created = created.created;
                    }
                    if dry_run {
                        ctx.virtually_created.insert(bucket.to_string());
                    } else {
                        ctx.present.insert(bucket.to_string());
                    }
                    self.reporter.emit(SyncEvent::BucketCreated {
                        pair_id: ctx.pair_id.clone(),
                        bucket: bucket.to_string(),
                        dry_run,
                    });
                }
                Err(e) => {
                    if self.created_concurrently(ctx, bucket, dry_run).await {
                        warn!("{}; bucket exists now, continuing with sync", e);
                        ctx.present.insert(bucket.to_string());
                    } else {
                        self.reporter.emit(SyncEvent::BucketCreationFailed {
                            pair_id: ctx.pair_id.clone(),
                            bucket: bucket.to_string(),
                            message: e.to_string(),
                        });
                        if let Some(result) = in_flight.bucket.as_mut() {
                            result.fail(&e);
                        }
                        return;
                    }
                }
            }
        }

        in_flight.creating = false;
        let source = BucketLocation::new(&ctx.pair.source, bucket);
        let destination = BucketLocation::new(&ctx.pair.destination, bucket);

        let synced = ctx.session.sync(&source, &destination, &ctx.options).await;
        let Some(result) = in_flight.bucket.as_mut() else {
            return;
        };
        match synced {
            Ok(()) => {
                result.synced = true;
                self.reporter.emit(SyncEvent::BucketSynced {
                    pair_id: ctx.pair_id.clone(),
                    bucket: bucket.to_string(),
                    dry_run,
                });
            }
            Err(e) => {
                self.reporter.emit(SyncEvent::BucketSyncFailed {
                    pair_id: ctx.pair_id.clone(),
                    bucket: bucket.to_string(),
                    message: e.to_string(),
                });
                result.fail(&e);
            }
        }
    }

    /// After a failed live creation, whether the bucket turned up anyway
    async fn created_concurrently(
        &self,
        ctx: &PairContext<'_>,
        bucket: &str,
        dry_run: bool,
    ) -> bool {
        !dry_run
            && self.config.recheck_on_create_failure
            && ctx.destination.bucket_exists(bucket).await
    }
}
