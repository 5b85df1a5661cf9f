//! Run orchestration: change analysis through reporting.

use crate::changes::ChangeSetAnalyzer;
use crate::dag::{ExecutionPlan, JobGraphBuilder};
use crate::gates::QualityGateEvaluator;
use crate::retry::RetryPolicyManager;
use crate::scheduler::{ScheduleOutcome, Scheduler, SchedulerConfig};
use crate::status::StatusAggregator;
use crate::supervisor::RunSupervisor;
use crate::triggers::TriggerRuleEngine;
use chrono::Utc;
use sluice_cache::{CacheKeyResolver, CacheManager, CacheProvider};
use sluice_core::change::{CategorySet, RunType, TriggerEvent, TriggerFlags};
use sluice_core::config::PipelineConfig;
use sluice_core::ids::RunId;
use sluice_core::ports::{NullSink, ReportSink};
use sluice_core::run::RunReport;
use sluice_core::Result;
use sluice_runner::StepRunner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Everything decided about a run before any job executes.
#[derive(Debug)]
pub struct RunPlan {
    pub run_type: RunType,
    pub categories: CategorySet,
    pub flags: TriggerFlags,
    pub plan: ExecutionPlan,
}

/// A configured pipeline, ready to plan and execute runs.
pub struct Pipeline {
    config: PipelineConfig,
    analyzer: ChangeSetAnalyzer,
    triggers: TriggerRuleEngine,
    builder: JobGraphBuilder,
    scheduler: Scheduler,
    gates: QualityGateEvaluator,
    aggregator: StatusAggregator,
    sink: Arc<dyn ReportSink>,
    supervisor: Arc<RunSupervisor>,
}

impl Pipeline {
    /// Build a pipeline from a configuration. The configuration is validated
    /// again here; nothing runs if it is invalid.
    pub fn new(
        config: PipelineConfig,
        runner: Arc<dyn StepRunner>,
        workspace: impl Into<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        let analyzer = ChangeSetAnalyzer::from_config(&config)?;
        let scheduler = Scheduler::new(
            SchedulerConfig::from_pipeline(&config, workspace),
            runner,
            RetryPolicyManager::new(config.retry.clone()),
        );

        Ok(Self {
            analyzer,
            triggers: TriggerRuleEngine::from_config(&config),
            builder: JobGraphBuilder::new(),
            scheduler,
            gates: QualityGateEvaluator::new(config.quality_gates.clone()),
            aggregator: StatusAggregator::new(),
            sink: Arc::new(NullSink),
            supervisor: Arc::new(RunSupervisor::new()),
            config,
        })
    }

    /// Cache job outputs through `provider`, keyed with this pipeline's
    /// runner context.
    pub fn with_cache(mut self, provider: Arc<dyn CacheProvider>) -> Self {
        let resolver = CacheKeyResolver::new(self.config.runner_context.clone());
        self.scheduler = self
            .scheduler
            .with_cache(CacheManager::new(provider, resolver));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share a supervisor so runs of several pipelines supersede each other.
    pub fn with_supervisor(mut self, supervisor: Arc<RunSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &Arc<RunSupervisor> {
        &self.supervisor
    }

    /// Analyze an event and build its execution plan without running it.
    pub fn plan(&self, event: &TriggerEvent) -> Result<RunPlan> {
        let categories = self.analyzer.analyze(&event.changes);
        let flags = self.triggers.evaluate(&categories);
        let plan = self
            .builder
            .build(&self.config.jobs, &flags, event.run_type)?;

        Ok(RunPlan {
            run_type: event.run_type,
            categories,
            flags,
            plan,
        })
    }

    pub async fn run(&self, event: TriggerEvent) -> Result<RunReport> {
        self.run_as(RunId::new(), event).await
    }

    /// Execute a run under a caller-chosen id, so it can be cancelled through
    /// the supervisor while in flight.
    #[instrument(skip(self, event), fields(run_id = %run_id, run_type = %event.run_type))]
    pub async fn run_as(&self, run_id: RunId, event: TriggerEvent) -> Result<RunReport> {
        let started_at = Utc::now();
        let RunPlan {
            run_type,
            categories,
            flags,
            plan,
        } = self.plan(&event)?;

        info!(
            jobs = plan.len(),
            active = plan.jobs().filter(|j| j.is_active()).count(),
            areas = ?flags.enabled().map(|a| a.as_str()).collect::<Vec<_>>(),
            "Run planned"
        );

        let cancellation = self
            .supervisor
            .register(run_id, event.concurrency_group.as_deref())
            .await;
        let ScheduleOutcome {
            jobs,
            cancel_reason,
            pending_stores,
        } = self.scheduler.execute(run_id, &plan, &cancellation).await;
        self.supervisor.release(run_id).await;

        let gates = self.gates.evaluate(&jobs);
        let summary = self.aggregator.summarize(&jobs, &gates, cancel_reason);
        let report = RunReport {
            run_id,
            run_type,
            categories,
            flags,
            jobs,
            gates,
            summary,
            cancel_reason,
            started_at,
            completed_at: Utc::now(),
        };
        info!(verdict = %report.verdict(), "Run finished");

        if let Err(e) = self.sink.publish(&report).await {
            warn!(error = %e, "Failed to publish run report");
        }

        // Give in-flight cache stores one grace period; abandoned stores only
        // cost a future cache miss.
        let deadline = tokio::time::Instant::now() + self.scheduler.config().cancel_grace;
        for store in pending_stores {
            if tokio::time::timeout_at(deadline, store).await.is_err() {
                debug!("Cache stores still in flight, not waiting");
                break;
            }
        }

        Ok(report)
    }
}
