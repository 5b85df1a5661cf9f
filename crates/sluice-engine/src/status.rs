//! Run summary and verdict aggregation.

use sluice_core::config::GateSeverity;
use sluice_core::job::{FindingSeverity, JobResult, JobStatus, SkipReason};
use sluice_core::run::{
    CancelReason, GateReport, JobReport, StatusSummary, SummaryEntry, SummaryLevel, Verdict,
};

/// Builds the ordered summary handed to reporting.
///
/// Entries are failures grouped by job in plan declaration order, then
/// advisory warnings, then notices.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusAggregator;

impl StatusAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Exactly one of passed, failed or cancelled.
    ///
    /// A cancelled run is never reported as failed. Otherwise the run passes
    /// only with no blocking violation and no job failed, timed out or
    /// cancelled.
    pub fn verdict(
        &self,
        jobs: &[JobReport],
        gates: &GateReport,
        cancel_reason: Option<CancelReason>,
    ) -> Verdict {
        if cancel_reason.is_some() {
            return Verdict::Cancelled;
        }
        let job_failed = jobs.iter().any(|j| j.result.status().is_failure());
        if job_failed || gates.blocking().next().is_some() {
            Verdict::Failed
        } else {
            Verdict::Passed
        }
    }

    pub fn summarize(
        &self,
        jobs: &[JobReport],
        gates: &GateReport,
        cancel_reason: Option<CancelReason>,
    ) -> StatusSummary {
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        let mut notices = Vec::new();

        if let Some(reason) = cancel_reason {
            let origin = match reason {
                CancelReason::CriticalFinding => jobs.iter().find(|j| {
                    j.result
                        .output
                        .as_ref()
                        .is_some_and(|o| o.count_at_least(FindingSeverity::Critical) > 0)
                }),
                _ => None,
            };
            failures.push(SummaryEntry {
                level: SummaryLevel::Failure,
                job_id: origin.map(|j| j.job_id.clone()),
                message: format!("run {}", reason),
                output_ref: origin.and_then(|j| output_ref(&j.result)),
            });
        }

        for job in jobs {
            let result = &job.result;
            let entry = |level, message: String| SummaryEntry {
                level,
                job_id: Some(job.job_id.clone()),
                message,
                output_ref: output_ref(result),
            };

            if result.status().is_failure() {
                failures.push(entry(SummaryLevel::Failure, failure_message(result)));
            }
            for violation in gates.violations.iter().filter(|v| v.job_id == job.job_id) {
                let message = format!("gate '{}': {}", violation.rule, violation.message);
                match violation.severity {
                    GateSeverity::Blocking => failures.push(entry(SummaryLevel::Failure, message)),
                    GateSeverity::Advisory => warnings.push(entry(SummaryLevel::Warning, message)),
                }
            }

            match (&result.skip_reason, result.status()) {
                (Some(reason @ SkipReason::UpstreamFailed { .. }), JobStatus::Skipped) => {
                    warnings.push(entry(SummaryLevel::Warning, format!("skipped: {}", reason)));
                }
                (Some(reason @ SkipReason::Inactive { .. }), JobStatus::Skipped) => {
                    notices.push(entry(SummaryLevel::Notice, format!("skipped: {}", reason)));
                }
                (_, JobStatus::Succeeded) if result.retry_count > 0 => {
                    notices.push(entry(
                        SummaryLevel::Notice,
                        format!("succeeded after {} retries", result.retry_count),
                    ));
                }
                _ => {}
            }
            if let Some(cache) = &result.cache
                && cache.hit
            {
                notices.push(entry(SummaryLevel::Notice, format!("cache hit {}", cache.key)));
            }
        }

        let mut entries = failures;
        entries.extend(warnings);
        entries.extend(notices);

        StatusSummary {
            verdict: self.verdict(jobs, gates, cancel_reason),
            entries,
        }
    }
}

fn output_ref(result: &JobResult) -> Option<String> {
    result.output.as_ref().and_then(|o| o.log_ref.clone())
}

fn failure_message(result: &JobResult) -> String {
    let status = match result.status() {
        JobStatus::TimedOut => "timed out",
        JobStatus::Cancelled => "cancelled",
        _ => "failed",
    };
    match &result.error {
        Some(error) => format!("{}: {}", status, error),
        None => status.to_string(),
    }
}
