//! Core runner trait and types.

use async_trait::async_trait;
use sluice_core::Result;
use sluice_core::ids::{JobId, RunId};
use sluice_core::job::{CacheUsage, OutputPayload};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Everything a runner receives for one attempt of one job.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub run_id: RunId,
    pub job_id: JobId,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Opaque step description from the job specification.
    pub step: serde_json::Value,
    pub resource_class: String,
    pub workspace: PathBuf,
    /// Resolved cache key and whether a prior entry exists.
    pub cache: Option<CacheUsage>,
}

/// Terminal status reported by a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Result of step execution.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepStatus,
    pub duration_ms: u64,
    pub output: OutputPayload,
}

impl StepOutcome {
    pub fn succeeded(duration_ms: u64, output: OutputPayload) -> Self {
        Self {
            status: StepStatus::Succeeded,
            duration_ms,
            output,
        }
    }

    pub fn failed(duration_ms: u64, output: OutputPayload) -> Self {
        Self {
            status: StepStatus::Failed,
            duration_ms,
            output,
        }
    }
}

/// Trait for step execution.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute a step until it completes or `cancel` fires.
    ///
    /// On cancellation the runner stops its external work and returns
    /// promptly; the engine records the job as cancelled or timed out
    /// regardless of what is returned. An `Err` is recorded as a failed
    /// attempt, never as an engine error.
    async fn run(&self, request: &StepRequest, cancel: CancellationToken) -> Result<StepOutcome>;
}
