//! Job scheduling over an execution plan.
//!
//! The scheduler owns every job's [`JobResult`] for the duration of a run and
//! is the only component that transitions them. Attempts run as tokio tasks
//! bounded by `max_parallelism`; the dispatch loop wakes when an attempt
//! finishes, a retry backoff elapses, or the run is cancelled.

use crate::dag::{ExecutionPlan, PlannedJob};
use crate::retry::{RetryDecision, RetryPolicyManager};
use crate::supervisor::RunCancellation;
use sluice_cache::{CacheEntry, CacheManager};
use sluice_core::config::{CacheSpec, PipelineConfig, TieBreak};
use sluice_core::ids::{JobId, RunId};
use sluice_core::job::{CacheUsage, FindingSeverity, JobResult, JobStatus, SkipReason};
use sluice_core::run::{CancelReason, JobReport};
use sluice_runner::{StepOutcome, StepRequest, StepRunner, StepStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Upper bound on resolving a job's cache key and lookup; a stalled cache is a miss.
const CACHE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_parallelism: usize,
    pub default_timeout: Duration,
    /// How long a signalled step may take to stop before it is abandoned.
    pub cancel_grace: Duration,
    pub tie_break: TieBreak,
    pub halt_on_critical: bool,
    pub workspace: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 4,
            default_timeout: Duration::from_secs(30 * 60),
            cancel_grace: Duration::from_secs(10),
            tie_break: TieBreak::Declaration,
            halt_on_critical: true,
            workspace: PathBuf::from("."),
        }
    }
}

impl SchedulerConfig {
    pub fn from_pipeline(config: &PipelineConfig, workspace: impl Into<PathBuf>) -> Self {
        Self {
            max_parallelism: config.max_parallelism.max(1),
            default_timeout: config.default_timeout(),
            cancel_grace: config.cancel_grace(),
            tie_break: config.tie_break,
            halt_on_critical: config.halt_on_critical,
            workspace: workspace.into(),
        }
    }
}

/// Terminal results of one scheduled run.
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Every job in declaration order.
    pub jobs: Vec<JobReport>,
    pub cancel_reason: Option<CancelReason>,
    /// Detached cache stores still in flight.
    pub pending_stores: Vec<JoinHandle<()>>,
}

impl ScheduleOutcome {
    pub fn result(&self, id: &str) -> Option<&JobResult> {
        self.jobs
            .iter()
            .find(|j| j.job_id.as_str() == id)
            .map(|j| &j.result)
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    runner: Arc<dyn StepRunner>,
    retry: RetryPolicyManager,
    cache: Option<CacheManager>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        runner: Arc<dyn StepRunner>,
        retry: RetryPolicyManager,
    ) -> Self {
        Self {
            config,
            runner,
            retry,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every job in the plan to a terminal status.
    #[instrument(skip_all, fields(run_id = %run_id, jobs = plan.len()))]
    pub async fn execute(
        &self,
        run_id: RunId,
        plan: &ExecutionPlan,
        cancellation: &RunCancellation,
    ) -> ScheduleOutcome {
        let jobs: Vec<&PlannedJob> = plan.jobs().collect();
        let mut slots: Vec<Slot> = jobs.iter().map(|job| Slot::new(job)).collect();
        let deps: Vec<Vec<usize>> = jobs
            .iter()
            .map(|job| {
                plan.dependencies(job.id().as_str())
                    .iter()
                    .map(|dep| dep.declaration_index)
                    .collect()
            })
            .collect();
        let topological: Vec<usize> = plan
            .topological_order()
            .map(|job| job.declaration_index)
            .collect();
        let dispatch_order = self.dispatch_order(&jobs);

        let mut workers = JoinSet::new();
        let mut running = 0usize;
        let mut halted = false;
        let mut pending_stores = Vec::new();

        loop {
            if !halted && cancellation.is_cancelled() {
                halted = true;
                info!(reason = ?cancellation.reason(), "Run cancelled, halting dispatch");
                cancel_waiting(&mut slots, &jobs);
            }

            if !halted {
                propagate_skips(&mut slots, &jobs, &deps, &topological);
                let now = Instant::now();
                for &idx in &dispatch_order {
                    if running >= self.config.max_parallelism {
                        break;
                    }
                    if is_ready(&slots, &deps, idx, now) {
                        self.dispatch(&mut workers, run_id, &mut slots[idx], jobs[idx], idx, cancellation);
                        running += 1;
                    }
                }
            }

            let next_eligible = if halted { None } else { next_eligible(&slots) };
            if running == 0 && next_eligible.is_none() {
                break;
            }

            tokio::select! {
                Some(joined) = workers.join_next() => {
                    running -= 1;
                    match joined {
                        Ok(report) => {
                            let idx = report.slot;
                            if let Some(store) = report.store {
                                pending_stores.push(store);
                            }
                            self.record(&mut slots[idx], jobs[idx], report.cache, report.end, cancellation);
                        }
                        Err(e) => error!(error = %e, "Worker task failed"),
                    }
                }
                _ = cancellation.cancelled(), if !halted => {}
                _ = tokio::time::sleep_until(next_eligible.unwrap_or_else(Instant::now)), if next_eligible.is_some() => {}
            }
        }

        for (slot, job) in slots.iter_mut().zip(&jobs) {
            if !slot.result.is_terminal() {
                warn!(job_id = %job.id(), status = %slot.result.status(), "Job unfinished when scheduling ended");
                slot.result.error = Some("scheduling ended before the job finished".to_string());
                apply(&mut slot.result, job.id(), JobStatus::Cancelled);
            }
        }

        ScheduleOutcome {
            jobs: jobs
                .iter()
                .zip(slots)
                .map(|(job, slot)| JobReport {
                    job_id: job.id().clone(),
                    result: slot.result,
                })
                .collect(),
            cancel_reason: cancellation.reason(),
            pending_stores,
        }
    }

    fn dispatch_order(&self, jobs: &[&PlannedJob]) -> Vec<usize> {
        let mut order: Vec<usize> = (0..jobs.len()).collect();
        match self.config.tie_break {
            TieBreak::Declaration => {}
            TieBreak::Topological => order.sort_by_key(|&idx| (jobs[idx].depth, idx)),
        }
        order
    }

    fn dispatch(
        &self,
        workers: &mut JoinSet<AttemptReport>,
        run_id: RunId,
        slot: &mut Slot,
        job: &PlannedJob,
        idx: usize,
        cancellation: &RunCancellation,
    ) {
        apply(&mut slot.result, job.id(), JobStatus::Running);
        slot.attempts += 1;
        slot.eligible_at = None;
        info!(job_id = %job.id(), attempt = slot.attempts, "Dispatching job");

        let attempt = Attempt {
            slot: idx,
            runner: self.runner.clone(),
            cache: self.cache.clone().zip(job.spec.cache.clone()),
            request: StepRequest {
                run_id,
                job_id: job.id().clone(),
                attempt: slot.attempts,
                step: job.spec.step.clone(),
                resource_class: job.spec.resource_class.clone(),
                workspace: self.config.workspace.clone(),
                cache: None,
            },
            timeout: job.spec.timeout(self.config.default_timeout),
            grace: self.config.cancel_grace,
            run_token: cancellation.token().clone(),
        };

        workers.spawn(async move {
            // The attempt runs in its own task so a panicking runner is
            // reported against its job.
            match tokio::spawn(attempt.run()).await {
                Ok(report) => report,
                Err(e) => AttemptReport {
                    slot: idx,
                    cache: None,
                    end: AttemptEnd::Errored(format!("runner task failed: {}", e)),
                    store: None,
                },
            }
        });
    }

    fn record(
        &self,
        slot: &mut Slot,
        job: &PlannedJob,
        cache: Option<CacheUsage>,
        end: AttemptEnd,
        cancellation: &RunCancellation,
    ) {
        if cache.is_some() {
            slot.result.cache = cache;
        }

        let failure = match end {
            AttemptEnd::Finished(outcome) => {
                let critical = outcome.output.count_at_least(FindingSeverity::Critical);
                let status = outcome.status;
                slot.result.output = Some(outcome.output);

                if self.config.halt_on_critical
                    && critical > 0
                    && cancellation.cancel(CancelReason::CriticalFinding)
                {
                    warn!(job_id = %job.id(), critical, "Critical finding reported, halting run");
                }

                match status {
                    StepStatus::Succeeded => {
                        info!(job_id = %job.id(), attempt = slot.attempts, duration_ms = outcome.duration_ms, "Job succeeded");
                        apply(&mut slot.result, job.id(), JobStatus::Succeeded);
                        return;
                    }
                    StepStatus::Failed => {
                        slot.result.error = Some(format!("step failed on attempt {}", slot.attempts));
                        JobStatus::Failed
                    }
                }
            }
            AttemptEnd::Errored(message) => {
                slot.result.error = Some(message);
                JobStatus::Failed
            }
            AttemptEnd::TimedOut(limit) => {
                slot.result.error = Some(format!("timed out after {}s", limit.as_secs_f64()));
                JobStatus::TimedOut
            }
            AttemptEnd::Cancelled => {
                info!(job_id = %job.id(), "Job cancelled");
                apply(&mut slot.result, job.id(), JobStatus::Cancelled);
                return;
            }
        };

        let decision = if cancellation.is_cancelled() {
            RetryDecision::Final
        } else {
            self.retry.decide(&job.spec, failure, slot.attempts)
        };

        match decision {
            RetryDecision::Retry { delay } => {
                warn!(
                    job_id = %job.id(),
                    attempt = slot.attempts,
                    status = %failure,
                    delay_ms = delay.as_millis() as u64,
                    "Job attempt failed, will retry"
                );
                apply(&mut slot.result, job.id(), JobStatus::Pending);
                slot.eligible_at = Some(Instant::now() + delay);
            }
            RetryDecision::Final => {
                warn!(job_id = %job.id(), attempt = slot.attempts, status = %failure, "Job failed");
                apply(&mut slot.result, job.id(), failure);
            }
        }
    }
}

/// Scheduler-side state of one job.
struct Slot {
    result: JobResult,
    attempts: u32,
    /// Set while a retry waits out its backoff.
    eligible_at: Option<Instant>,
}

impl Slot {
    fn new(job: &PlannedJob) -> Self {
        let result = match &job.skip {
            Some(reason) => JobResult::skipped(reason.clone()),
            None => JobResult::pending(),
        };
        Self {
            result,
            attempts: 0,
            eligible_at: None,
        }
    }
}

fn apply(result: &mut JobResult, job_id: &JobId, to: JobStatus) {
    if let Err(e) = result.transition(to) {
        error!(job_id = %job_id, error = %e, "Rejected status transition");
    }
}

fn is_ready(slots: &[Slot], deps: &[Vec<usize>], idx: usize, now: Instant) -> bool {
    let slot = &slots[idx];
    slot.result.status() == JobStatus::Pending
        && slot.eligible_at.is_none_or(|at| at <= now)
        && deps[idx]
            .iter()
            .all(|&dep| slots[dep].result.status().satisfies_dependents())
}

fn next_eligible(slots: &[Slot]) -> Option<Instant> {
    slots
        .iter()
        .filter(|s| s.result.status() == JobStatus::Pending)
        .filter_map(|s| s.eligible_at)
        .min()
}

/// The job whose failure blocks dependents of `result`, if any.
fn upstream_cause(result: &JobResult, job_id: &JobId) -> Option<String> {
    if result.status().is_failure() {
        return Some(job_id.to_string());
    }
    match &result.skip_reason {
        Some(SkipReason::UpstreamFailed { dependency }) => Some(dependency.clone()),
        _ => None,
    }
}

// Topological order lets one pass reach every transitive dependent.
fn propagate_skips(
    slots: &mut [Slot],
    jobs: &[&PlannedJob],
    deps: &[Vec<usize>],
    topological: &[usize],
) {
    for &idx in topological {
        if slots[idx].result.status() != JobStatus::Pending {
            continue;
        }
        let cause = deps[idx]
            .iter()
            .find_map(|&dep| upstream_cause(&slots[dep].result, jobs[dep].id()));
        if let Some(dependency) = cause {
            info!(job_id = %jobs[idx].id(), dependency = %dependency, "Skipping job, upstream did not succeed");
            if let Err(e) = slots[idx]
                .result
                .skip(SkipReason::UpstreamFailed { dependency })
            {
                error!(job_id = %jobs[idx].id(), error = %e, "Rejected status transition");
            }
        }
    }
}

fn cancel_waiting(slots: &mut [Slot], jobs: &[&PlannedJob]) {
    for (slot, job) in slots.iter_mut().zip(jobs) {
        if slot.result.status() == JobStatus::Pending {
            debug!(job_id = %job.id(), "Cancelling pending job");
            slot.eligible_at = None;
            apply(&mut slot.result, job.id(), JobStatus::Cancelled);
        }
    }
}

enum AttemptEnd {
    Finished(StepOutcome),
    Errored(String),
    TimedOut(Duration),
    Cancelled,
}

struct AttemptReport {
    slot: usize,
    cache: Option<CacheUsage>,
    end: AttemptEnd,
    store: Option<JoinHandle<()>>,
}

/// One attempt of one job, executed on a worker task.
struct Attempt {
    slot: usize,
    runner: Arc<dyn StepRunner>,
    cache: Option<(CacheManager, CacheSpec)>,
    request: StepRequest,
    timeout: Duration,
    grace: Duration,
    run_token: CancellationToken,
}

impl Attempt {
    async fn run(mut self) -> AttemptReport {
        if self.cache.is_some() {
            let bound = self.timeout.min(CACHE_LOOKUP_TIMEOUT);
            let resolved = tokio::select! {
                biased;
                _ = self.run_token.cancelled() => None,
                resolved = tokio::time::timeout(bound, self.resolve_cache()) => Some(resolved),
            };
            match resolved {
                None => {
                    return AttemptReport {
                        slot: self.slot,
                        cache: None,
                        end: AttemptEnd::Cancelled,
                        store: None,
                    };
                }
                Some(Ok(usage)) => self.request.cache = usage,
                Some(Err(_)) => {
                    warn!(job_id = %self.request.job_id, bound_ms = bound.as_millis() as u64, "Cache lookup stalled, treating as miss");
                }
            }
        }

        let end = self.execute().await;

        let store = match (&end, &self.cache, &self.request.cache) {
            (AttemptEnd::Finished(outcome), Some((manager, spec)), Some(usage))
                if outcome.status == StepStatus::Succeeded && !usage.hit =>
            {
                let storage_path = format!("{}/{}", spec.namespace, usage.key);
                Some(manager.store_detached(CacheEntry::new(usage.key.clone(), storage_path)))
            }
            _ => None,
        };

        AttemptReport {
            slot: self.slot,
            cache: self.request.cache.clone(),
            end,
            store,
        }
    }

    async fn resolve_cache(&self) -> Option<CacheUsage> {
        let (manager, spec) = self.cache.as_ref()?;
        let key = manager.key_for(&self.request.workspace, spec).await?;
        let hit = manager.lookup(&key).await.is_some();
        Some(CacheUsage { key, hit })
    }

    async fn execute(&self) -> AttemptEnd {
        let step_token = self.run_token.child_token();
        let step = self.runner.run(&self.request, step_token.clone());
        tokio::pin!(step);

        tokio::select! {
            biased;
            result = &mut step => {
                if self.run_token.is_cancelled() {
                    return AttemptEnd::Cancelled;
                }
                match result {
                    Ok(outcome) => AttemptEnd::Finished(outcome),
                    Err(e) => AttemptEnd::Errored(e.to_string()),
                }
            }
            _ = self.run_token.cancelled() => {
                if tokio::time::timeout(self.grace, &mut step).await.is_err() {
                    warn!(job_id = %self.request.job_id, "Step did not stop within grace period");
                }
                AttemptEnd::Cancelled
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(job_id = %self.request.job_id, timeout_secs = self.timeout.as_secs(), "Job timed out, cancelling step");
                step_token.cancel();
                if tokio::time::timeout(self.grace, &mut step).await.is_err() {
                    warn!(job_id = %self.request.job_id, "Step did not stop within grace period");
                }
                AttemptEnd::TimedOut(self.timeout)
            }
        }
    }
}
