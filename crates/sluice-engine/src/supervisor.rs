//! Run-wide cancellation and supervision of in-flight runs.

use sluice_core::ids::RunId;
use sluice_core::run::CancelReason;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancellation signal for one run. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct RunCancellation {
    token: CancellationToken,
    reason: Arc<OnceLock<CancelReason>>,
}

impl RunCancellation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns false if the run was already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }

    /// Token that step runners observe.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

struct ActiveRun {
    group: Option<String>,
    cancellation: RunCancellation,
}

/// Tracks in-flight runs. A new run in a concurrency group supersedes the
/// group's previous run.
#[derive(Default)]
pub struct RunSupervisor {
    active: RwLock<HashMap<RunId, ActiveRun>>,
}

impl RunSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and return its cancellation handle.
    pub async fn register(&self, run_id: RunId, group: Option<&str>) -> RunCancellation {
        let cancellation = RunCancellation::new();
        let mut active = self.active.write().await;

        if let Some(group) = group {
            for (other_id, other) in active.iter() {
                if other.group.as_deref() == Some(group)
                    && other.cancellation.cancel(CancelReason::Superseded)
                {
                    info!(run_id = %other_id, superseded_by = %run_id, group, "Superseding run");
                }
            }
        }

        active.insert(
            run_id,
            ActiveRun {
                group: group.map(str::to_string),
                cancellation: cancellation.clone(),
            },
        );
        cancellation
    }

    /// Forget a finished run.
    pub async fn release(&self, run_id: RunId) {
        self.active.write().await.remove(&run_id);
    }

    /// Cancel a run on request. Returns false for unknown or already
    /// cancelled runs.
    pub async fn cancel(&self, run_id: RunId) -> bool {
        match self.active.read().await.get(&run_id) {
            Some(run) => {
                let first = run.cancellation.cancel(CancelReason::UserRequested);
                if first {
                    info!(run_id = %run_id, "Run cancellation requested");
                }
                first
            }
            None => false,
        }
    }

    pub async fn active_runs(&self) -> Vec<RunId> {
        self.active.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let cancellation = RunCancellation::new();
        assert!(!cancellation.is_cancelled());
        assert!(cancellation.cancel(CancelReason::CriticalFinding));
        assert!(!cancellation.cancel(CancelReason::UserRequested));
        assert!(cancellation.is_cancelled());
        assert_eq!(cancellation.reason(), Some(CancelReason::CriticalFinding));
    }

    #[tokio::test]
    async fn test_new_run_supersedes_same_group() {
        let supervisor = RunSupervisor::new();
        let first_id = RunId::new();
        let first = supervisor.register(first_id, Some("main")).await;
        let other = supervisor.register(RunId::new(), Some("feature/x")).await;

        let second = supervisor.register(RunId::new(), Some("main")).await;

        assert_eq!(first.reason(), Some(CancelReason::Superseded));
        assert!(!other.is_cancelled());
        assert!(!second.is_cancelled());

        supervisor.release(first_id).await;
        assert_eq!(supervisor.active_runs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_by_id() {
        let supervisor = RunSupervisor::new();
        let run_id = RunId::new();
        let cancellation = supervisor.register(run_id, None).await;

        assert!(supervisor.cancel(run_id).await);
        assert!(!supervisor.cancel(run_id).await);
        assert!(!supervisor.cancel(RunId::new()).await);
        assert_eq!(cancellation.reason(), Some(CancelReason::UserRequested));
    }
}
