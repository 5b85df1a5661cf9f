//! CLI configuration management.

use anyhow::{Context, anyhow, bail};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-user CLI defaults, stored as YAML in the platform config directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Shell used to run job steps.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Cache metadata directory; the platform cache directory when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
}

fn default_shell() -> String {
    "sh".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            cache_dir: None,
            output_format: OutputFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

fn project_dirs() -> anyhow::Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "sluice", "sluice")
        .ok_or_else(|| anyhow!("Could not determine config directory"))
}

impl CliConfig {
    /// Load configuration from file.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Ok(serde_yaml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file.
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.yaml"))
    }

    /// Cache directory to use when none is given on the command line.
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir.clone().or_else(|| {
            project_dirs()
                .ok()
                .map(|dirs| dirs.cache_dir().join("entries"))
        })
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "shell" => {
                if value.trim().is_empty() {
                    bail!("shell must not be empty");
                }
                self.shell = value.to_string();
            }
            "cache_dir" => {
                self.cache_dir = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            "output_format" => {
                self.output_format = <OutputFormat as ValueEnum>::from_str(value, true)
                    .map_err(|_| anyhow!("Invalid output format: {}", value))?;
            }
            _ => bail!("Unknown config key: {}", key),
        }
        Ok(())
    }
}
