//! Quality gate evaluation.

use sluice_core::config::{GateField, GateSeverity, QualityGateRule};
use sluice_core::job::{JobResult, JobStatus};
use sluice_core::run::{GateReport, GateViolation, JobReport, Verdict};

/// Applies quality gate rules to terminal job results.
///
/// Evaluation is a pure reduction over its inputs, so re-evaluating an
/// unchanged result set always yields the same report.
#[derive(Debug, Clone, Default)]
pub struct QualityGateEvaluator {
    rules: Vec<QualityGateRule>,
}

impl QualityGateEvaluator {
    pub fn new(rules: Vec<QualityGateRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[QualityGateRule] {
        &self.rules
    }

    /// Evaluate every rule against every job it inspects.
    ///
    /// Skipped jobs never ran and are not inspected. The verdict fails on any
    /// blocking violation, whatever the job statuses are.
    pub fn evaluate(&self, jobs: &[JobReport]) -> GateReport {
        let mut violations = Vec::new();

        for rule in &self.rules {
            let inspected = jobs.iter().filter(|job| {
                job.result.status() != JobStatus::Skipped
                    && (rule.jobs.is_empty() || rule.jobs.contains(&job.job_id))
            });

            for job in inspected {
                let observed = inspect(&rule.field, &job.result);
                let message = match observed {
                    Some(value) => match breach(rule, value) {
                        Some(bound) => format!(
                            "{} = {} on '{}' is {}",
                            field_name(&rule.field),
                            value,
                            job.job_id,
                            bound
                        ),
                        None => continue,
                    },
                    None if rule.missing_is_violation => format!(
                        "{} not reported by '{}'",
                        field_name(&rule.field),
                        job.job_id
                    ),
                    None => continue,
                };
                violations.push(GateViolation {
                    rule: rule.name.clone(),
                    job_id: job.job_id.clone(),
                    severity: rule.severity,
                    observed,
                    message,
                });
            }
        }

        let verdict = if violations
            .iter()
            .any(|v| v.severity == GateSeverity::Blocking)
        {
            Verdict::Failed
        } else {
            Verdict::Passed
        };

        GateReport {
            verdict,
            violations,
        }
    }
}

fn inspect(field: &GateField, result: &JobResult) -> Option<f64> {
    match field {
        GateField::Metric(name) => result.output.as_ref()?.metrics.get(name).copied(),
        GateField::Findings(severity) => result
            .output
            .as_ref()
            .map(|output| output.count_at_least(*severity) as f64),
        GateField::RetryCount => Some(f64::from(result.retry_count)),
        GateField::DurationSecs => result.duration_ms().map(|ms| ms as f64 / 1000.0),
    }
}

fn breach(rule: &QualityGateRule, value: f64) -> Option<String> {
    if let Some(min) = rule.min
        && value < min
    {
        return Some(format!("below minimum {}", min));
    }
    if let Some(max) = rule.max
        && value > max
    {
        return Some(format!("above maximum {}", max));
    }
    None
}

fn field_name(field: &GateField) -> String {
    match field {
        GateField::Metric(name) => format!("metric '{}'", name),
        GateField::Findings(severity) => format!("{:?} findings", severity).to_lowercase(),
        GateField::RetryCount => "retry count".to_string(),
        GateField::DurationSecs => "duration (s)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sluice_core::ids::JobId;
    use sluice_core::job::{Finding, FindingSeverity, OutputPayload, SkipReason};

    fn succeeded(id: &str, output: OutputPayload) -> JobReport {
        let mut result = JobResult::pending();
        result.transition(JobStatus::Running).unwrap();
        result.output = Some(output);
        result.transition(JobStatus::Succeeded).unwrap();
        JobReport {
            job_id: JobId::new(id),
            result,
        }
    }

    fn high_findings_rule(severity: GateSeverity) -> QualityGateRule {
        QualityGateRule {
            name: "no-high-findings".to_string(),
            jobs: vec![],
            field: GateField::Findings(FindingSeverity::High),
            min: None,
            max: Some(0.0),
            severity,
            missing_is_violation: false,
        }
    }

    fn with_finding(severity: FindingSeverity) -> OutputPayload {
        OutputPayload {
            findings: vec![Finding {
                severity,
                message: "CVE-2024-0001".to_string(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_blocking_violation_fails_despite_success() {
        let jobs = vec![
            succeeded("lint", OutputPayload::default()),
            succeeded("scan", with_finding(FindingSeverity::High)),
        ];
        let evaluator = QualityGateEvaluator::new(vec![high_findings_rule(GateSeverity::Blocking)]);

        let report = evaluator.evaluate(&jobs);
        assert_eq!(report.verdict, Verdict::Failed);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].job_id.as_str(), "scan");
        assert_eq!(report.violations[0].observed, Some(1.0));
    }

    #[test]
    fn test_advisory_violation_recorded_only() {
        let jobs = vec![succeeded("scan", with_finding(FindingSeverity::Critical))];
        let evaluator = QualityGateEvaluator::new(vec![high_findings_rule(GateSeverity::Advisory)]);

        let report = evaluator.evaluate(&jobs);
        assert_eq!(report.verdict, Verdict::Passed);
        assert_eq!(report.advisory().count(), 1);
    }

    #[test]
    fn test_lower_severity_not_counted() {
        let jobs = vec![succeeded("scan", with_finding(FindingSeverity::Medium))];
        let evaluator = QualityGateEvaluator::new(vec![high_findings_rule(GateSeverity::Blocking)]);
        assert!(evaluator.evaluate(&jobs).violations.is_empty());
    }

    #[test]
    fn test_metric_minimum_and_missing() {
        let mut output = OutputPayload::default();
        output.metrics.insert("coverage".to_string(), 71.5);
        let jobs = vec![
            succeeded("unit", output),
            succeeded("lint", OutputPayload::default()),
            JobReport {
                job_id: JobId::new("e2e"),
                result: JobResult::skipped(SkipReason::Inactive {
                    condition: "area frontend".to_string(),
                }),
            },
        ];
        let rule = QualityGateRule {
            name: "coverage".to_string(),
            jobs: vec![],
            field: GateField::Metric("coverage".to_string()),
            min: Some(80.0),
            max: None,
            severity: GateSeverity::Blocking,
            missing_is_violation: true,
        };

        let report = QualityGateEvaluator::new(vec![rule]).evaluate(&jobs);
        let failing: Vec<_> = report.violations.iter().map(|v| v.job_id.as_str()).collect();
        assert_eq!(failing, vec!["unit", "lint"]);
        assert_eq!(report.violations[1].observed, None);
    }

    #[test]
    fn test_rule_scoped_to_jobs() {
        let jobs = vec![
            succeeded("scan", with_finding(FindingSeverity::High)),
            succeeded("other", with_finding(FindingSeverity::High)),
        ];
        let mut rule = high_findings_rule(GateSeverity::Blocking);
        rule.jobs = vec![JobId::new("other")];

        let report = QualityGateEvaluator::new(vec![rule]).evaluate(&jobs);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].job_id.as_str(), "other");
    }

    #[test]
    fn test_evaluation_is_pure() {
        let jobs = vec![succeeded("scan", with_finding(FindingSeverity::High))];
        let evaluator = QualityGateEvaluator::new(vec![high_findings_rule(GateSeverity::Blocking)]);
        assert_eq!(evaluator.evaluate(&jobs), evaluator.evaluate(&jobs));
    }
}
