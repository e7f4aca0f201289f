//! The dispatcher owns the pending-target queue and the aggregate counters.
//! Workers never touch either; they only return results.

use crate::scrape::cycle::{run_cycle, ScrapeContext};
use crate::scrape::outcome::{decide, Disposition, RetryReason, WorkResult};
use crate::scrape::target::Target;
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Aggregate terminal counts for one run. Every target lands in exactly one
/// bucket.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.ok + self.skipped + self.failed
    }
}

/// Bounded-concurrency scrape loop: seeds a FIFO queue with every target,
/// submits up to `workers` cycles at a time, requeues retryable outcomes at
/// the back, and counts each target exactly once when it settles.
///
/// A target is only resubmitted after its previous attempt's task has
/// completed, so no target is ever in flight twice concurrently.
pub struct Dispatcher {
    ctx: Arc<ScrapeContext>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(ctx: Arc<ScrapeContext>, shutdown: CancellationToken) -> Self {
        Self { ctx, shutdown }
    }

    pub async fn run(&self, usernames: Vec<String>) -> RunSummary {
        let workers = self.ctx.config().workers();
        let retry_budget = self.ctx.config().blocked_retries();
        let total = usernames.len();

        let mut pending: VecDeque<Target> = usernames
            .into_iter()
            .map(|username| Target::new(username, retry_budget))
            .collect();
        let mut summary = RunSummary::default();
        let mut done = 0usize;

        tracing::info!(total, workers, retry_budget, "dispatch loop starting");

        while !pending.is_empty() {
            if self.shutdown.is_cancelled() {
                tracing::warn!(
                    abandoned = pending.len(),
                    "shutdown requested; abandoning pending targets"
                );
                summary.skipped += pending.len();
                pending.clear();
                break;
            }

            // Respect any active pause before submitting more work; worker
            // slots are not burned polling.
            let remaining = self.ctx.pause().remaining_secs();
            if remaining > 0 {
                tracing::warn!(remaining_secs = remaining, "global pause active; holding batch");
                self.ctx.pause().wait_until_clear().await;
            }

            let mut batch = Vec::with_capacity(workers);
            while batch.len() < workers {
                let Some(mut target) = pending.pop_front() else {
                    break;
                };
                target.begin_attempt();
                batch.push(target);
            }

            let mut in_flight = JoinSet::new();
            for (worker, target) in batch.into_iter().enumerate() {
                let ctx = self.ctx.clone();
                in_flight.spawn(async move {
                    let caught = std::panic::AssertUnwindSafe(run_cycle(
                        &ctx,
                        worker,
                        target.username(),
                    ))
                    .catch_unwind()
                    .await;
                    (target, caught)
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                let (mut target, caught) = match joined {
                    Ok(pair) => pair,
                    Err(join_err) => {
                        // Panics are caught inside the task, so this only
                        // fires for an aborted task. The target is lost with
                        // the task; it still has to land in a bucket.
                        summary.failed += 1;
                        done += 1;
                        self.ctx.telemetry().record_target_settled();
                        tracing::error!(done, total, error = %join_err, "[FAIL] worker task lost");
                        continue;
                    }
                };

                match caught {
                    Ok(Ok(result)) => match decide(&result, target.retries_left()) {
                        Disposition::Ok => {
                            summary.ok += 1;
                            done += 1;
                            self.ctx.telemetry().record_target_settled();
                            tracing::info!(
                                done,
                                total,
                                target = target.username(),
                                attempts = target.attempts(),
                                stories_found = result.stories_found,
                                stories_saved = result.stories_saved,
                                "[OK]"
                            );
                        }
                        Disposition::Skip => {
                            summary.skipped += 1;
                            done += 1;
                            self.ctx.telemetry().record_target_settled();
                            tracing::warn!(
                                done,
                                total,
                                target = target.username(),
                                attempts = target.attempts(),
                                classification = %result.classification,
                                message = %result.message,
                                "[SKIP]"
                            );
                        }
                        Disposition::Retry(reason) => {
                            target.consume_retry();
                            log_retry(&target, reason, &result, retry_budget);
                            pending.push_back(target);
                        }
                    },
                    Ok(Err(err)) => {
                        summary.failed += 1;
                        done += 1;
                        self.ctx.telemetry().record_target_settled();
                        tracing::error!(
                            done,
                            total,
                            target = target.username(),
                            attempts = target.attempts(),
                            error = %format!("{err:#}"),
                            "[FAIL]"
                        );
                    }
                    Err(panic) => {
                        summary.failed += 1;
                        done += 1;
                        self.ctx.telemetry().record_target_settled();
                        tracing::error!(
                            done,
                            total,
                            target = target.username(),
                            attempts = target.attempts(),
                            panic = %panic_message(panic.as_ref()),
                            "[FAIL] worker task panicked"
                        );
                    }
                }
            }
        }

        tracing::info!(
            ok = summary.ok,
            skipped = summary.skipped,
            failed = summary.failed,
            "dispatch loop finished"
        );
        summary
    }
}

fn log_retry(target: &Target, reason: RetryReason, result: &WorkResult, retry_budget: u32) {
    let max_attempts = retry_budget.saturating_add(1);
    match reason {
        RetryReason::Blocked => {
            tracing::warn!(
                target = target.username(),
                attempt = target.attempts(),
                max_attempts,
                retries_left = target.retries_left(),
                pause_secs = result.pause_seconds.unwrap_or(0),
                "[BLOCKED] will retry"
            );
        }
        RetryReason::UpstreamError => {
            tracing::warn!(
                target = target.username(),
                attempt = target.attempts(),
                max_attempts,
                retries_left = target.retries_left(),
                message = %result.message,
                "[RETRY] upstream temporarily unavailable"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
