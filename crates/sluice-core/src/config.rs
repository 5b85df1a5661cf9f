//! Pipeline configuration types.
//!
//! These types represent the user-authored pipeline YAML configuration. Every
//! struct rejects unknown fields, and [`PipelineConfig::validate`] runs once at
//! load time so that malformed patterns and dangling references surface
//! before any run begins.

use crate::change::RunType;
use crate::error::ConfigError;
use crate::glob::GlobPattern;
use crate::ids::{AreaName, JobId};
use crate::job::FindingSeverity;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Category name to glob patterns.
    #[serde(default)]
    pub path_rules: BTreeMap<String, Vec<String>>,
    /// Pipeline areas and the categories that enable them. When empty, every
    /// path rule category is an area of the same name.
    #[serde(default)]
    pub areas: BTreeMap<AreaName, AreaConfig>,
    /// Area enabled when a change set enables nothing else.
    #[serde(default)]
    pub fallback_area: Option<AreaName>,
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub quality_gates: Vec<QualityGateRule>,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Seconds.
    #[serde(default = "default_job_timeout")]
    pub default_job_timeout: u64,
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Cancel the run as soon as a job reports a critical finding.
    #[serde(default = "default_true")]
    pub halt_on_critical: bool,
    /// Opaque runner identity mixed into every cache key.
    #[serde(default)]
    pub runner_context: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_max_parallelism() -> usize {
    4
}
fn default_job_timeout() -> u64 {
    30 * 60
}
fn default_cancel_grace() -> u64 {
    10
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AreaConfig {
    /// Categories enabling this area. Empty means the category of the same name.
    #[serde(default)]
    pub triggers: Vec<String>,
}

/// Order in which simultaneously runnable jobs are dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    Declaration,
    Topological,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub id: JobId,
    #[serde(default)]
    pub needs: Vec<JobId>,
    #[serde(default)]
    pub when: Activation,
    /// Run types this job applies to. Empty means all.
    #[serde(default)]
    pub run_types: Vec<RunType>,
    /// Seconds; falls back to the pipeline default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retryable: bool,
    /// Job class matched against `retry.excluded_job_classes`.
    #[serde(default)]
    pub class: Option<String>,
    /// Informational sizing hint.
    #[serde(default = "default_resource_class")]
    pub resource_class: String,
    #[serde(default)]
    pub cache: Option<CacheSpec>,
    /// Opaque step description handed to the step runner.
    #[serde(default)]
    pub step: serde_json::Value,
}

fn default_resource_class() -> String {
    "small".to_string()
}

impl JobSpec {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            needs: vec![],
            when: Activation::Always,
            run_types: vec![],
            timeout_secs: None,
            retryable: false,
            class: None,
            resource_class: default_resource_class(),
            cache: None,
            step: serde_json::Value::Null,
        }
    }

    pub fn needs<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<JobId>,
    {
        self.needs = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn when_area(mut self, area: impl Into<AreaName>) -> Self {
        self.when = Activation::Area(area.into());
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn step(mut self, step: serde_json::Value) -> Self {
        self.step = step;
        self
    }

    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Condition deciding, once per run, whether a job executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Always,
    Area(AreaName),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CacheSpec {
    pub namespace: String,
    /// Workspace-relative files whose content keys the cache, in order.
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_excluded_classes")]
    pub excluded_job_classes: Vec<String>,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}
fn default_excluded_classes() -> Vec<String> {
    vec!["security-scan".to_string()]
}
fn default_base_delay() -> u64 {
    1000
}
fn default_multiplier() -> u32 {
    2
}
fn default_max_delay() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            excluded_job_classes: default_excluded_classes(),
            base_delay_ms: default_base_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct QualityGateRule {
    pub name: String,
    /// Jobs inspected by this rule. Empty means every job.
    #[serde(default)]
    pub jobs: Vec<JobId>,
    pub field: GateField,
    /// Violated when the inspected value is below this.
    #[serde(default)]
    pub min: Option<f64>,
    /// Violated when the inspected value is above this.
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub severity: GateSeverity,
    /// Treat a job that does not report the field as a violation.
    #[serde(default)]
    pub missing_is_violation: bool,
}

/// The JobResult field a quality gate inspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateField {
    /// A named numeric metric from the step output (e.g. coverage).
    Metric(String),
    /// Number of findings at or above a severity.
    Findings(FindingSeverity),
    RetryCount,
    DurationSecs,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateSeverity {
    #[default]
    Blocking,
    Advisory,
}

impl PipelineConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Areas with their trigger categories, after applying defaults.
    pub fn effective_areas(&self) -> BTreeMap<AreaName, Vec<String>> {
        if self.areas.is_empty() {
            return self
                .path_rules
                .keys()
                .map(|category| (AreaName::new(category.clone()), vec![category.clone()]))
                .collect();
        }
        self.areas
            .iter()
            .map(|(name, area)| {
                let triggers = if area.triggers.is_empty() {
                    vec![name.to_string()]
                } else {
                    area.triggers.clone()
                };
                (name.clone(), triggers)
            })
            .collect()
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_job_timeout)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    /// Check everything that can be checked without a change set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallelism == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_parallelism".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        for (category, patterns) in &self.path_rules {
            for pattern in patterns {
                GlobPattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    category: category.clone(),
                    source,
                })?;
            }
        }

        let areas = self.effective_areas();
        for (area, triggers) in &areas {
            for category in triggers {
                if !self.path_rules.contains_key(category) {
                    return Err(ConfigError::UnknownCategory {
                        area: area.to_string(),
                        category: category.clone(),
                    });
                }
            }
        }
        if let Some(fallback) = &self.fallback_area
            && !areas.contains_key(fallback)
        {
            return Err(ConfigError::UnknownFallbackArea(fallback.to_string()));
        }

        let mut ids = BTreeSet::new();
        for job in &self.jobs {
            if !is_valid_job_id(job.id.as_str()) {
                return Err(ConfigError::InvalidJobId(job.id.to_string()));
            }
            if !ids.insert(job.id.clone()) {
                return Err(ConfigError::DuplicateJob(job.id.to_string()));
            }
        }
        for job in &self.jobs {
            for dep in &job.needs {
                if !ids.contains(dep) {
                    return Err(ConfigError::UnknownDependency {
                        job: job.id.to_string(),
                        dependency: dep.to_string(),
                    });
                }
            }
            if let Activation::Area(area) = &job.when
                && !areas.contains_key(area)
            {
                return Err(ConfigError::UnknownArea {
                    job: job.id.to_string(),
                    area: area.to_string(),
                });
            }
        }

        for rule in &self.quality_gates {
            if rule.min.is_none() && rule.max.is_none() {
                return Err(ConfigError::EmptyGate(rule.name.clone()));
            }
            for threshold in [rule.min, rule.max].into_iter().flatten() {
                if !threshold.is_finite() {
                    return Err(ConfigError::InvalidValue {
                        field: format!("quality_gates.{}", rule.name),
                        message: "threshold must be finite".to_string(),
                    });
                }
            }
            for job in &rule.jobs {
                if !ids.contains(job) {
                    return Err(ConfigError::UnknownGateJob {
                        rule: rule.name.clone(),
                        job: job.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

// Job ids name files in the runner's state directory.
fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
