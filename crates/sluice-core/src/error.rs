//! Error types for Sluice.

use crate::glob::PatternError;
use crate::ids::JobId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    // Plan errors
    #[error("Invalid execution plan: {0}")]
    InvalidPlan(#[from] PlanError),

    // Run errors
    #[error("Run already completed")]
    RunAlreadyCompleted,

    #[error("Run cancelled: {reason}")]
    RunCancelled { reason: String },

    // Step errors
    #[error("Step failed: {0}")]
    StepFailed(String),

    #[error("Step runner unavailable: {0}")]
    RunnerUnavailable(String),

    // Cache errors
    #[error("Cache lookup failed for key {key}: {message}")]
    CacheLookup { key: String, message: String },

    #[error("Cache store failed for key {key}: {message}")]
    CacheStore { key: String, message: String },

    // Reporting errors
    #[error("Report delivery failed: {0}")]
    Report(String),

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Failures detected while loading or validating a pipeline configuration.
///
/// All of these are fatal and surface before any job runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid pattern in path rule '{category}': {source}")]
    InvalidPattern {
        category: String,
        #[source]
        source: PatternError,
    },

    #[error("Duplicate job id: {0}")]
    DuplicateJob(String),

    #[error("Invalid job id '{0}': only ASCII letters, digits, '_', '.' and '-' are allowed")]
    InvalidJobId(String),

    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Job '{job}' is activated by unknown area '{area}'")]
    UnknownArea { job: String, area: String },

    #[error("Fallback area '{0}' is not declared")]
    UnknownFallbackArea(String),

    #[error("Area '{area}' is triggered by unknown category '{category}'")]
    UnknownCategory { area: String, category: String },

    #[error("Quality gate '{rule}' references unknown job '{job}'")]
    UnknownGateJob { rule: String, job: String },

    #[error("Quality gate '{0}' declares neither a minimum nor a maximum")]
    EmptyGate(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Why a job list cannot be turned into an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Cycle detected in job dependencies involving '{0}'")]
    CycleDetected(JobId),
    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: JobId, dependency: JobId },
    #[error("Duplicate job id: {0}")]
    DuplicateJob(JobId),
    #[error("Empty plan")]
    EmptyPlan,
}
