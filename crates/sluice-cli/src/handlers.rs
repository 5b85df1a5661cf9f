//! Command handlers.

use crate::commands::TriggerArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::report::{self, ConsoleSink, PlanView};
use anyhow::{Context, bail};
use console::style;
use sluice_cache::{CacheKeyResolver, CacheProvider, FilesystemProvider, hash_inputs};
use sluice_core::change::{ChangeSet, RunType, TriggerEvent};
use sluice_core::config::PipelineConfig;
use sluice_core::ids::RunId;
use sluice_core::run::Verdict;
use sluice_engine::Pipeline;
use sluice_runner::ShellRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

fn load_pipeline(path: &Path) -> anyhow::Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("invalid pipeline {}", path.display()))
}

/// Collect changed paths from repeated flags and an optional list file.
///
/// Blank lines are ignored. No paths at all means a full run.
pub fn read_changes(changed: &[String], changed_from: Option<&Path>) -> anyhow::Result<ChangeSet> {
    let mut paths: Vec<String> = changed.to_vec();
    if let Some(file) = changed_from {
        let content = std::fs::read_to_string(file)
            .with_context(|| format!("reading change list {}", file.display()))?;
        paths.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from),
        );
    }
    Ok(ChangeSet::new(paths))
}

fn trigger_event(args: &TriggerArgs) -> anyhow::Result<TriggerEvent> {
    let changes = read_changes(&args.changed, args.changed_from.as_deref())?;
    Ok(TriggerEvent::new(args.run_type.into(), changes))
}

/// Validate a pipeline configuration.
pub fn validate(path: &Path) -> anyhow::Result<()> {
    let config = load_pipeline(path)?;

    // A full run activates every job, so planning it checks the whole graph.
    let pipeline = Pipeline::new(config, Arc::new(ShellRunner::new()), ".")?;
    pipeline.plan(&TriggerEvent::new(RunType::Push, ChangeSet::default()))?;

    let config = pipeline.config();
    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        config.name.as_deref().unwrap_or("unnamed")
    );
    println!("  Path rules: {}", config.path_rules.len());
    println!("  Areas: {}", config.effective_areas().len());
    println!("  Jobs: {}", config.jobs.len());
    for job in &config.jobs {
        if job.needs.is_empty() {
            println!("    - {}", job.id);
        } else {
            let needs: Vec<_> = job.needs.iter().map(|n| n.as_str()).collect();
            println!("    - {} (needs {})", job.id, needs.join(", "));
        }
    }
    println!("  Quality gates: {}", config.quality_gates.len());

    Ok(())
}

/// Print what a change set would run.
pub fn plan(args: &TriggerArgs, format: OutputFormat) -> anyhow::Result<()> {
    let config = load_pipeline(&args.config)?;
    let pipeline = Pipeline::new(config, Arc::new(ShellRunner::new()), ".")?;
    let run_plan = pipeline.plan(&trigger_event(args)?)?;
    let view = PlanView::from(&run_plan);

    match format {
        OutputFormat::Table => println!("{}", report::render_plan_table(&view)),
        format => println!("{}", report::serialize(&view, format)?),
    }
    Ok(())
}

pub struct RunOptions {
    pub workspace: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub group: Option<String>,
    pub format: OutputFormat,
}

/// Run the pipeline once and return its verdict.
pub async fn run(
    cli_config: &CliConfig,
    args: &TriggerArgs,
    options: RunOptions,
) -> anyhow::Result<Verdict> {
    let config = load_pipeline(&args.config)?;
    let workspace = options
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace {}", options.workspace.display()))?;

    let runner = ShellRunner::new().with_shell(cli_config.shell.clone());
    let mut pipeline = Pipeline::new(config, Arc::new(runner), &workspace)?
        .with_sink(Arc::new(ConsoleSink::new(options.format)));

    if !options.no_cache {
        let cache_dir = options
            .cache_dir
            .or_else(|| cli_config.resolved_cache_dir())
            .unwrap_or_else(|| workspace.join(".sluice").join("cache"));
        info!(cache_dir = %cache_dir.display(), "Using filesystem cache");
        pipeline = pipeline.with_cache(Arc::new(FilesystemProvider::new(cache_dir)));
    }

    let mut event = trigger_event(args)?;
    if let Some(group) = options.group {
        event = event.with_concurrency_group(group);
    }

    let run_id = RunId::new();
    let supervisor = pipeline.supervisor().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(%run_id, "Interrupted, cancelling run");
            supervisor.cancel(run_id).await;
        }
    });

    let result = pipeline.run_as(run_id, event).await;
    interrupt.abort();
    Ok(result?.verdict())
}

/// Print the cache key for a namespace over the given input files.
pub async fn cache_key(
    namespace: &str,
    files: &[String],
    context: &str,
    workspace: &Path,
) -> anyhow::Result<()> {
    if namespace.is_empty() {
        bail!("namespace must not be empty");
    }
    let inputs = hash_inputs(workspace, files)
        .await
        .context("hashing cache inputs")?;
    println!("{}", CacheKeyResolver::new(context).resolve(namespace, &inputs));
    Ok(())
}

fn cache_provider(
    cli_config: &CliConfig,
    cache_dir: Option<PathBuf>,
) -> anyhow::Result<FilesystemProvider> {
    match cache_dir.or_else(|| cli_config.resolved_cache_dir()) {
        Some(dir) => Ok(FilesystemProvider::new(dir)),
        None => bail!("no cache directory; pass --cache-dir"),
    }
}

/// List cache entries.
pub async fn list_cache(
    cli_config: &CliConfig,
    prefix: &str,
    cache_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let provider = cache_provider(cli_config, cache_dir)?;
    let entries = provider.list(prefix).await?;

    if entries.is_empty() {
        println!("{} No cache entries", style("!").yellow());
        return Ok(());
    }
    for entry in &entries {
        println!(
            "  {}  {}  {}",
            style(&entry.key).bold(),
            entry.storage_path,
            style(entry.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
        );
    }
    println!("{} entries", entries.len());
    Ok(())
}

/// Delete cache entries whose key starts with `prefix`.
pub async fn clear_cache(
    cli_config: &CliConfig,
    prefix: &str,
    cache_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let provider = cache_provider(cli_config, cache_dir)?;
    let entries = provider.list(prefix).await?;
    for entry in &entries {
        provider.delete(&entry.key).await?;
    }
    println!("{} Cleared {} cache entries", style("✓").green(), entries.len());
    Ok(())
}

/// Print the JSON schema of the pipeline file.
pub fn schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(PipelineConfig);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show current configuration.
pub fn show_config(config: &CliConfig) -> anyhow::Result<()> {
    println!("{}", style("Configuration").bold());
    println!("  Shell: {}", config.shell);
    match config.resolved_cache_dir() {
        Some(dir) => println!("  Cache dir: {}", dir.display()),
        None => println!("  Cache dir: {}", style("(not set)").dim()),
    }
    println!("  Output format: {:?}", config.output_format);
    println!("  Config file: {}", CliConfig::config_path()?.display());
    Ok(())
}

/// Set a configuration value.
pub fn set_config(key: &str, value: &str) -> anyhow::Result<()> {
    let mut config = CliConfig::load()?;
    config.set(key, value)?;
    config.save()?;
    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}
