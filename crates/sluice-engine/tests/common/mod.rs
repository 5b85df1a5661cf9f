//! Shared test doubles for engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde::Deserialize;
use sluice_core::job::OutputPayload;
use sluice_core::ports::ReportSink;
use sluice_core::run::RunReport;
use sluice_core::{Error, Result};
use sluice_runner::{StepOutcome, StepRequest, StepRunner};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,sluice_engine=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Behaviour of a scripted step, read from the job's step description.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Script {
    sleep_ms: u64,
    /// Fail this many leading attempts, then succeed.
    fail_attempts: u32,
    /// Fail every attempt.
    fail: bool,
    output: OutputPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Started,
    Finished,
}

#[derive(Debug, Clone)]
pub struct StepEvent {
    pub job: String,
    pub attempt: u32,
    pub kind: EventKind,
    pub at: Instant,
}

/// Step runner driven by `step:` blocks in the pipeline YAML.
#[derive(Default)]
pub struct ScriptedRunner {
    events: Mutex<Vec<StepEvent>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StepEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Attempts started for a job.
    pub fn attempts(&self, job: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.job == job && e.kind == EventKind::Started)
            .count()
    }

    pub fn event(&self, job: &str, kind: EventKind) -> Option<StepEvent> {
        self.events()
            .into_iter()
            .find(|e| e.job == job && e.kind == kind)
    }

    /// Highest number of steps observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn push(&self, request: &StepRequest, kind: EventKind) {
        self.events.lock().unwrap().push(StepEvent {
            job: request.job_id.to_string(),
            attempt: request.attempt,
            kind,
            at: Instant::now(),
        });
    }
}

#[async_trait]
impl StepRunner for ScriptedRunner {
    async fn run(&self, request: &StepRequest, cancel: CancellationToken) -> Result<StepOutcome> {
        let script: Script = if request.step.is_null() {
            Script::default()
        } else {
            serde_json::from_value(request.step.clone())?
        };

        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        self.push(request, EventKind::Started);

        let cancelled = tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(script.sleep_ms)) => false,
            _ = cancel.cancelled() => true,
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.push(request, EventKind::Finished);

        if cancelled {
            return Err(Error::StepFailed("cancelled".to_string()));
        }
        if script.fail || request.attempt <= script.fail_attempts {
            Ok(StepOutcome::failed(script.sleep_ms, script.output))
        } else {
            Ok(StepOutcome::succeeded(script.sleep_ms, script.output))
        }
    }
}

/// Report sink that keeps every published report.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<RunReport>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<RunReport> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    async fn publish(&self, report: &RunReport) -> Result<()> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}
