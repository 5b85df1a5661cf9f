//! Console rendering of run reports and plans.

use crate::config::OutputFormat;
use async_trait::async_trait;
use console::{StyledObject, style};
use serde::Serialize;
use sluice_core::job::JobStatus;
use sluice_core::ports::ReportSink;
use sluice_core::run::{RunReport, SummaryLevel, Verdict};
use sluice_core::{Error, Result};
use sluice_engine::RunPlan;

/// Report sink that prints the finished run to stdout.
pub struct ConsoleSink {
    format: OutputFormat,
}

impl ConsoleSink {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

#[async_trait]
impl ReportSink for ConsoleSink {
    async fn publish(&self, report: &RunReport) -> Result<()> {
        let rendered = match self.format {
            OutputFormat::Table => render_report_table(report),
            format => serialize(report, format)?,
        };
        println!("{}", rendered);
        Ok(())
    }
}

/// Serialize any report-like value as JSON or YAML.
pub fn serialize<T: Serialize>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => {
            serde_yaml::to_string(value).map_err(|e| Error::Serialization(e.to_string()))
        }
        _ => Ok(serde_json::to_string_pretty(value)?),
    }
}

fn status_icon(status: JobStatus) -> StyledObject<&'static str> {
    match status {
        JobStatus::Succeeded => style("✓").green(),
        JobStatus::Failed | JobStatus::TimedOut => style("✗").red(),
        JobStatus::Cancelled => style("■").yellow(),
        JobStatus::Skipped => style("-").dim(),
        JobStatus::Pending | JobStatus::Running => style("?").dim(),
    }
}

fn verdict_label(verdict: Verdict) -> StyledObject<String> {
    let label = verdict.to_string().to_uppercase();
    match verdict {
        Verdict::Passed => style(label).green().bold(),
        Verdict::Failed => style(label).red().bold(),
        Verdict::Cancelled => style(label).yellow().bold(),
    }
}

pub fn render_report_table(report: &RunReport) -> String {
    let mut out = String::new();
    let width = report
        .jobs
        .iter()
        .map(|j| j.job_id.as_str().len())
        .max()
        .unwrap_or(0);

    out.push_str(&format!(
        "{} Run {} ({})\n",
        style("▶").cyan(),
        style(report.run_id).bold(),
        report.run_type
    ));

    for job in &report.jobs {
        let result = &job.result;
        let mut line = format!(
            "  {} {:<width$}  {:<10}",
            status_icon(result.status()),
            job.job_id.as_str(),
            result.status().to_string(),
        );
        if let Some(ms) = result.duration_ms() {
            line.push_str(&format!(" {:>8}ms", ms));
        }
        if result.retry_count > 0 {
            line.push_str(&format!("  retries={}", result.retry_count));
        }
        if let Some(cache) = &result.cache
            && cache.hit
        {
            line.push_str(&format!("  {}", style("cached").dim()));
        }
        if let Some(reason) = &result.skip_reason {
            line.push_str(&format!("  {}", style(reason).dim()));
        }
        out.push_str(&line);
        out.push('\n');
    }

    if !report.summary.entries.is_empty() {
        out.push('\n');
    }
    for entry in &report.summary.entries {
        let marker = match entry.level {
            SummaryLevel::Failure => style("error").red(),
            SummaryLevel::Warning => style("warning").yellow(),
            SummaryLevel::Notice => style("note").dim(),
        };
        let job = entry
            .job_id
            .as_ref()
            .map(|j| format!("[{}] ", j))
            .unwrap_or_default();
        out.push_str(&format!("  {}: {}{}", marker, job, entry.message));
        if let Some(output_ref) = &entry.output_ref {
            out.push_str(&format!(" ({})", style(output_ref).dim()));
        }
        out.push('\n');
    }

    let elapsed = (report.completed_at - report.started_at).num_milliseconds();
    out.push_str(&format!(
        "\n{} in {:.2}s",
        verdict_label(report.verdict()),
        elapsed as f64 / 1000.0
    ));
    out
}

/// Serializable view of a plan for `sluice plan`.
#[derive(Debug, Serialize)]
pub struct PlanView {
    pub run_type: String,
    pub categories: Vec<String>,
    pub areas: Vec<String>,
    /// Jobs in declaration order.
    pub jobs: Vec<PlannedJobView>,
}

#[derive(Debug, Serialize)]
pub struct PlannedJobView {
    pub id: String,
    pub needs: Vec<String>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl From<&RunPlan> for PlanView {
    fn from(run: &RunPlan) -> Self {
        Self {
            run_type: run.run_type.to_string(),
            categories: run.categories.iter().map(|c| c.to_string()).collect(),
            areas: run.flags.enabled().map(|a| a.to_string()).collect(),
            jobs: run
                .plan
                .jobs()
                .map(|job| PlannedJobView {
                    id: job.id().to_string(),
                    needs: job.spec.needs.iter().map(|n| n.to_string()).collect(),
                    active: job.is_active(),
                    skip_reason: job.skip.as_ref().map(|r| r.to_string()),
                })
                .collect(),
        }
    }
}

pub fn render_plan_table(view: &PlanView) -> String {
    let mut out = format!(
        "{} Plan for {} run\n  Categories: {}\n  Areas: {}\n\n",
        style("▶").cyan(),
        view.run_type,
        view.categories.join(", "),
        view.areas.join(", ")
    );
    for job in &view.jobs {
        let icon = if job.active {
            style("●").green()
        } else {
            style("○").dim()
        };
        out.push_str(&format!("  {} {}", icon, job.id));
        if !job.needs.is_empty() {
            out.push_str(&format!(" <- {}", job.needs.join(", ")));
        }
        if let Some(reason) = &job.skip_reason {
            out.push_str(&format!("  {}", style(reason).dim()));
        }
        out.push('\n');
    }
    let active = view.jobs.iter().filter(|j| j.active).count();
    out.push_str(&format!("\n{} of {} jobs will run", active, view.jobs.len()));
    out
}
