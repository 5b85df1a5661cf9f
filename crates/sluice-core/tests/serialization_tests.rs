//! Wire format tests for sluice-core types.

use chrono::Utc;
use sluice_core::change::*;
use sluice_core::config::*;
use sluice_core::ids::*;
use sluice_core::job::*;
use sluice_core::run::*;
use std::collections::BTreeMap;

fn sample_report() -> RunReport {
    let mut build = JobResult::pending();
    build.transition(JobStatus::Running).expect("start");
    build.output = Some(OutputPayload {
        log_ref: Some(".sluice/build-1.log".to_string()),
        findings: vec![Finding {
            severity: FindingSeverity::High,
            message: "unsafe block".to_string(),
        }],
        metrics: BTreeMap::from([("coverage".to_string(), 81.5)]),
    });
    build.cache = Some(CacheUsage {
        key: "deps-abc".to_string(),
        hit: false,
    });
    build.transition(JobStatus::Succeeded).expect("finish");

    let mut flags = BTreeMap::new();
    flags.insert(AreaName::new("backend"), true);
    flags.insert(AreaName::new("frontend"), false);

    RunReport {
        run_id: RunId::new(),
        run_type: RunType::PullRequest,
        categories: [Category::named("backend")].into_iter().collect(),
        flags: TriggerFlags::new(flags),
        jobs: vec![
            JobReport {
                job_id: JobId::new("build"),
                result: build,
            },
            JobReport {
                job_id: JobId::new("ui"),
                result: JobResult::skipped(SkipReason::Inactive {
                    condition: "area frontend".to_string(),
                }),
            },
        ],
        gates: GateReport {
            verdict: Verdict::Passed,
            violations: vec![],
        },
        summary: StatusSummary {
            verdict: Verdict::Passed,
            entries: vec![SummaryEntry {
                level: SummaryLevel::Notice,
                job_id: Some(JobId::new("ui")),
                message: "skipped: inactive (area frontend)".to_string(),
                output_ref: None,
            }],
        },
        cancel_reason: None,
        started_at: Utc::now(),
        completed_at: Utc::now(),
    }
}

#[test]
fn test_run_report_json_shape() {
    let report = sample_report();
    let value = serde_json::to_value(&report).expect("serialize");

    assert_eq!(value["run_type"], "pull_request");
    assert_eq!(value["categories"], serde_json::json!([{"named": "backend"}]));
    assert_eq!(value["flags"]["backend"], true);
    assert_eq!(value["flags"]["frontend"], false);
    assert_eq!(value["jobs"][0]["result"]["status"], "succeeded");
    assert_eq!(value["jobs"][0]["result"]["output"]["metrics"]["coverage"], 81.5);
    assert_eq!(value["jobs"][1]["result"]["skip_reason"]["kind"], "inactive");
    assert_eq!(value["summary"]["entries"][0]["level"], "notice");
    assert!(value["cancel_reason"].is_null());
}

#[test]
fn test_run_report_roundtrip() {
    let report = sample_report();
    let json = serde_json::to_string(&report).expect("serialize");
    let parsed: RunReport = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(parsed.run_id, report.run_id);
    assert_eq!(parsed.verdict(), Verdict::Passed);
    assert_eq!(parsed.jobs.len(), 2);
    assert_eq!(parsed.jobs[0].result.status(), JobStatus::Succeeded);
    assert_eq!(parsed.jobs[0].result.output, report.jobs[0].result.output);
    assert_eq!(parsed.flags, report.flags);
    assert!(parsed.categories.contains_named("backend"));
}

#[test]
fn test_force_all_category() {
    let json = serde_json::to_string(&CategorySet::force_all()).expect("serialize");
    assert_eq!(json, r#"["force_all"]"#);
}

#[test]
fn test_upstream_skip_reason_is_tagged() {
    let reason = SkipReason::UpstreamFailed {
        dependency: "build".to_string(),
    };
    let value = serde_json::to_value(&reason).expect("serialize");
    assert_eq!(
        value,
        serde_json::json!({"kind": "upstream_failed", "dependency": "build"})
    );
}

#[test]
fn test_output_payload_accepts_partial_json() {
    let payload: OutputPayload =
        serde_json::from_str(r#"{"metrics": {"coverage": 92}}"#).expect("deserialize");
    assert_eq!(payload.metrics["coverage"], 92.0);
    assert!(payload.findings.is_empty());
    assert!(payload.log_ref.is_none());
}

#[test]
fn test_gate_fields_from_yaml() {
    let yaml = r#"
jobs:
  - id: unit
  - id: scan
quality_gates:
  - name: coverage
    jobs: [unit]
    field: { metric: coverage }
    min: 80
  - name: no-high-findings
    field: { findings: high }
    max: 0
    severity: advisory
  - name: flaky
    field: retry_count
    max: 1
"#;
    let config = PipelineConfig::from_yaml(yaml).expect("parse");
    let gates = &config.quality_gates;

    assert_eq!(gates[0].field, GateField::Metric("coverage".to_string()));
    assert_eq!(gates[0].severity, GateSeverity::Blocking);
    assert_eq!(gates[1].field, GateField::Findings(FindingSeverity::High));
    assert_eq!(gates[1].severity, GateSeverity::Advisory);
    assert_eq!(gates[2].field, GateField::RetryCount);
    assert_eq!(gates[2].max, Some(1.0));
}

#[test]
fn test_trigger_event_json() {
    let event: TriggerEvent = serde_json::from_str(
        r#"{"run_type": "scheduled", "changes": ["a.rs", "b.rs"], "concurrency_group": "main"}"#,
    )
    .expect("deserialize");

    assert_eq!(event.run_type, RunType::Scheduled);
    assert_eq!(event.changes.paths(), &["a.rs", "b.rs"]);
    assert_eq!(event.concurrency_group.as_deref(), Some("main"));
}

#[test]
fn test_run_id_display_parses_back() {
    let id = RunId::new();
    let parsed: RunId = id.to_string().parse().expect("parse");
    assert_eq!(parsed, id);
    assert!(id.to_string().starts_with("run_"));
}
