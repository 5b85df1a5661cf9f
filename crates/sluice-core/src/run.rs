//! Run-level outcome and report types.

use crate::change::{CategorySet, RunType, TriggerFlags};
use crate::config::GateSeverity;
use crate::ids::{JobId, RunId};
use crate::job::JobResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final go/no-go decision of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    Cancelled,
}

impl Verdict {
    /// Process exit code for the verdict.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Passed => 0,
            Verdict::Failed => 1,
            Verdict::Cancelled => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Passed => "passed",
            Verdict::Failed => "failed",
            Verdict::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserRequested,
    Superseded,
    CriticalFinding,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::UserRequested => "cancelled by request",
            CancelReason::Superseded => "superseded by a newer run",
            CancelReason::CriticalFinding => "halted on a critical finding",
        };
        f.write_str(s)
    }
}

/// One quality gate rule that did not hold for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateViolation {
    pub rule: String,
    pub job_id: JobId,
    pub severity: GateSeverity,
    /// Inspected value; `None` when the job did not report the field.
    pub observed: Option<f64>,
    pub message: String,
}

/// Outcome of applying every quality gate rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateReport {
    pub verdict: Verdict,
    pub violations: Vec<GateViolation>,
}

impl GateReport {
    pub fn blocking(&self) -> impl Iterator<Item = &GateViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == GateSeverity::Blocking)
    }

    pub fn advisory(&self) -> impl Iterator<Item = &GateViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == GateSeverity::Advisory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryLevel {
    Failure,
    Warning,
    Notice,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub level: SummaryLevel,
    pub job_id: Option<JobId>,
    pub message: String,
    /// External reference to the job's output payload.
    pub output_ref: Option<String>,
}

/// Ordered, human-consumable status summary: failures, warnings, notices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub verdict: Verdict,
    pub entries: Vec<SummaryEntry>,
}

impl StatusSummary {
    /// The first blocking cause of a failed or cancelled verdict.
    pub fn first_blocking_cause(&self) -> Option<&SummaryEntry> {
        self.entries
            .iter()
            .find(|e| e.level == SummaryLevel::Failure)
    }
}

/// Final per-job line in a report, in plan declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub result: JobResult,
}

/// Everything handed to the external reporting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub run_type: RunType,
    pub categories: CategorySet,
    pub flags: TriggerFlags,
    pub jobs: Vec<JobReport>,
    pub gates: GateReport,
    pub summary: StatusSummary,
    pub cancel_reason: Option<CancelReason>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn verdict(&self) -> Verdict {
        self.summary.verdict
    }
}
