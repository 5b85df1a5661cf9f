//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the core domain and external
//! adapters.

use crate::Result;
use crate::run::RunReport;
use async_trait::async_trait;

/// Consumer of final run reports (notifications, branch protection, ...).
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver a report. Delivery failures never change the verdict.
    async fn publish(&self, report: &RunReport) -> Result<()>;
}

/// Sink that discards reports.
pub struct NullSink;

#[async_trait]
impl ReportSink for NullSink {
    async fn publish(&self, _report: &RunReport) -> Result<()> {
        Ok(())
    }
}
