//! Change analysis, planning, scheduling and gating for Sluice.

pub mod changes;
pub mod dag;
pub mod gates;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod supervisor;
pub mod triggers;

pub use changes::ChangeSetAnalyzer;
pub use dag::{ExecutionPlan, JobGraphBuilder, PlannedJob};
pub use gates::QualityGateEvaluator;
pub use pipeline::{Pipeline, RunPlan};
pub use retry::{RetryDecision, RetryPolicyManager};
pub use scheduler::{ScheduleOutcome, Scheduler, SchedulerConfig};
pub use status::StatusAggregator;
pub use supervisor::{RunCancellation, RunSupervisor};
pub use triggers::TriggerRuleEngine;

pub use sluice_core::PlanError;
