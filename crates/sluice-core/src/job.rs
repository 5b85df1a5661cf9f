//! Job results and the per-job status state machine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    /// Whether dependents may run after this status. Skipped counts as success.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Skipped)
    }

    /// Terminal statuses that block dependents and fail the run.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
            JobStatus::TimedOut => "timed_out",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Why a job was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkipReason {
    /// Activation condition was false when the plan was built.
    Inactive { condition: String },
    /// A dependency ended failed, timed out or cancelled.
    UpstreamFailed { dependency: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Inactive { condition } => write!(f, "inactive ({})", condition),
            SkipReason::UpstreamFailed { dependency } => {
                write!(f, "dependency '{}' did not succeed", dependency)
            }
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub severity: FindingSeverity,
    pub message: String,
}

/// Opaque result payload produced by an external step.
///
/// The engine stores and forwards it; only quality gates read the metric and
/// finding values they are configured to inspect.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutputPayload {
    /// External reference to the step's log or report.
    #[serde(default)]
    pub log_ref: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl OutputPayload {
    pub fn with_log_ref(log_ref: impl Into<String>) -> Self {
        Self {
            log_ref: Some(log_ref.into()),
            ..Default::default()
        }
    }

    /// Findings at or above a severity.
    pub fn count_at_least(&self, severity: FindingSeverity) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity >= severity)
            .count()
    }
}

/// Cache usage recorded for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheUsage {
    pub key: String,
    pub hit: bool,
}

/// Outcome of one job within a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobResult {
    status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub output: Option<OutputPayload>,
    pub skip_reason: Option<SkipReason>,
    pub cache: Option<CacheUsage>,
    /// Last error reported by the runner or scheduler, if any.
    pub error: Option<String>,
}

impl Default for JobResult {
    fn default() -> Self {
        Self::pending()
    }
}

impl JobResult {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            output: None,
            skip_reason: None,
            cache: None,
            error: None,
        }
    }

    /// A result created already skipped at plan time.
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            status: JobStatus::Skipped,
            skip_reason: Some(reason),
            ..Self::pending()
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }

    /// Apply a status transition.
    ///
    /// Allowed: `pending -> running | skipped | cancelled`,
    /// `running -> succeeded | failed | timed_out | cancelled`, and
    /// `running -> pending` for a retry. Nothing leaves a terminal status.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        use JobStatus::*;

        let from = self.status;
        let allowed = match (from, to) {
            (Pending, Running | Skipped | Cancelled) => true,
            (Running, Succeeded | Failed | TimedOut | Cancelled | Pending) => true,
            _ => false,
        };
        if !allowed {
            return Err(TransitionError { from, to });
        }

        let now = Utc::now();
        match to {
            Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            Pending => self.retry_count += 1,
            _ => self.completed_at = Some(now),
        }
        self.status = to;
        Ok(())
    }

    /// Move a pending job to skipped with a reason.
    pub fn skip(&mut self, reason: SkipReason) -> Result<(), TransitionError> {
        self.transition(JobStatus::Skipped)?;
        self.skip_reason = Some(reason);
        Ok(())
    }
}
