//! Drives the reconciler across all pairs of a run

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info_span, Instrument};

use super::BucketReconciler;
use crate::error::SyncError;
use crate::report::SyncEvent;
use crate::types::{PairOutcome, PairToken, RunReport};

/// Runs pairs sequentially or concurrently and collects a [`RunReport`]
pub struct SyncOrchestrator {
    reconciler: Arc<BucketReconciler>,
}

impl SyncOrchestrator {
    pub fn new(reconciler: BucketReconciler) -> Self {
        Self {
            reconciler: Arc::new(reconciler),
        }
    }

    /// Process `pairs` and return once every pair has finished.
    ///
    /// A failing pair never stops or disturbs the others; its failure is
    /// part of the report.
    pub async fn run(&self, pairs: &[PairToken]) -> RunReport {
        let started = Instant::now();
        let config = self.reconciler.config();
        let reporter = self.reconciler.reporter();

        let pairs: Vec<PairToken> = match config.pair_filter {
            Some(ref only) => vec![only.clone()],
            None => pairs.to_vec(),
        };

        reporter.emit(SyncEvent::RunStarted {
            pairs: pairs.len(),
            dry_run: config.dry_run,
            parallel: config.parallel,
        });

        let deadline = config.run_timeout.map(|t| started + t);
        let outcomes = if config.parallel {
            self.run_concurrent(&pairs, deadline).await
        } else {
            self.run_sequential(&pairs, deadline).await
        };

        let report = RunReport {
            run_id: reporter.run_id().to_string(),
            outcomes,
            elapsed: started.elapsed(),
        };

        reporter.emit(SyncEvent::RunSummary {
            pairs_processed: report.pairs_processed(),
            created: report.total_created(),
            synced: report.total_synced(),
            failed: report.total_failed(),
            has_failures: report.has_failures(),
        });

        report
    }

    /// Time a pair may take: the per-pair limit, capped by what is left of
    /// the run deadline
    fn budget(&self, deadline: Option<Instant>) -> Option<Duration> {
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        match (self.reconciler.config().pair_timeout, remaining) {
            (Some(pair), Some(run)) => Some(pair.min(run)),
            (pair, run) => pair.or(run),
        }
    }

    fn announce(&self, pair: &PairToken, index: usize, total: usize) {
        self.reconciler.reporter().emit(SyncEvent::PairStarted {
            pair_id: pair.id(),
            index: index + 1,
            total,
        });
    }

    async fn run_sequential(
        &self,
        pairs: &[PairToken],
        deadline: Option<Instant>,
    ) -> Vec<PairOutcome> {
        let mut outcomes = Vec::with_capacity(pairs.len());

        for (i, pair) in pairs.iter().enumerate() {
            self.announce(pair, i, pairs.len());

            let outcome = match self.budget(deadline) {
                Some(budget) if budget.is_zero() => {
                    let run_timeout = self.reconciler.config().run_timeout.unwrap_or_default();
                    self.reconciler
                        .skip(pair, &SyncError::Timeout(run_timeout))
                }
                budget => {
                    let reconciler = self.reconciler.clone();
                    let task_pair = pair.clone();
                    let task = tokio::spawn(
                        async move { reconciler.reconcile(&task_pair, budget).await }
                            .instrument(info_span!("pair", pair = %pair)),
                    );
                    match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!("Pair task ended abnormally: {}", e);
                            self.panicked(pair)
                        }
                    }
                }
            };
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn run_concurrent(
        &self,
        pairs: &[PairToken],
        deadline: Option<Instant>,
    ) -> Vec<PairOutcome> {
        let mut tasks = JoinSet::new();

        for (i, pair) in pairs.iter().enumerate() {
            self.announce(pair, i, pairs.len());

            let reconciler = self.reconciler.clone();
            let pair = pair.clone();
            let budget = self.budget(deadline);
            let span = info_span!("pair", pair = %pair);

            tasks.spawn(
                async move {
                    let outcome = reconciler.reconcile(&pair, budget).await;
                    (i, outcome)
                }
                .instrument(span),
            );
        }

        let mut slots: Vec<Option<PairOutcome>> = vec![None; pairs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((i, outcome)) => slots[i] = Some(outcome),
                Err(e) => error!("Pair task ended abnormally: {}", e),
            }
        }

        // A task that panicked left its slot empty
        slots
            .into_iter()
            .zip(pairs)
            .map(|(slot, pair)| slot.unwrap_or_else(|| self.panicked(pair)))
            .collect()
    }

    fn panicked(&self, pair: &PairToken) -> PairOutcome {
        self.reconciler
            .skip(pair, &SyncError::Internal("pair task panicked".to_string()))
    }
}
