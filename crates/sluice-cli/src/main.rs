//! Sluice CLI entrypoint.

use clap::{Parser, ValueEnum};
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;
mod report;

use commands::{CacheCommands, Commands, ConfigCommands};
use config::CliConfig;

/// Exit code for errors that stop a run before it starts.
const EXIT_USAGE: u8 = 3;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about = "Change-aware CI pipeline runner", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(EXIT_USAGE)
        }
    }
}

async fn dispatch(command: Commands) -> anyhow::Result<ExitCode> {
    let config = CliConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Ignoring unreadable CLI configuration");
        CliConfig::default()
    });

    match command {
        Commands::Validate { path } => handlers::validate(&path)?,
        Commands::Plan { trigger, format } => {
            handlers::plan(&trigger, format.unwrap_or(config.output_format))?
        }
        Commands::Run {
            trigger,
            workspace,
            cache_dir,
            no_cache,
            group,
            format,
        } => {
            let options = handlers::RunOptions {
                workspace,
                cache_dir,
                no_cache,
                group,
                format: format.unwrap_or(config.output_format),
            };
            let verdict = handlers::run(&config, &trigger, options).await?;
            return Ok(ExitCode::from(verdict.exit_code() as u8));
        }
        Commands::CacheKey {
            namespace,
            files,
            context,
            workspace,
        } => handlers::cache_key(&namespace, &files, &context, &workspace).await?,
        Commands::Cache { command } => match command {
            CacheCommands::List { prefix, cache_dir } => {
                handlers::list_cache(&config, &prefix, cache_dir).await?
            }
            CacheCommands::Clear { prefix, cache_dir } => {
                handlers::clear_cache(&config, &prefix, cache_dir).await?
            }
        },
        Commands::Schema => handlers::schema()?,
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config)?,
            ConfigCommands::Set { key, value } => handlers::set_config(&key, &value)?,
        },
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::RunTypeArg;
    use config::OutputFormat;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "sluice",
            "run",
            "--config",
            "ci.yaml",
            "--changed",
            "web/app.ts",
            "--changed",
            "service/api.rs",
            "--run-type",
            "pull-request",
            "--format",
            "json",
            "--group",
            "main",
        ])
        .unwrap();

        let Commands::Run {
            trigger,
            format,
            group,
            no_cache,
            ..
        } = cli.command
        else {
            panic!("expected run command");
        };
        assert_eq!(trigger.config.to_str(), Some("ci.yaml"));
        assert_eq!(trigger.changed, vec!["web/app.ts", "service/api.rs"]);
        assert_eq!(trigger.run_type, RunTypeArg::PullRequest);
        assert_eq!(format, Some(OutputFormat::Json));
        assert_eq!(group.as_deref(), Some("main"));
        assert!(!no_cache);
    }

    #[test]
    fn test_no_cache_conflicts_with_cache_dir() {
        let result = Cli::try_parse_from([
            "sluice",
            "run",
            "--no-cache",
            "--cache-dir",
            "/tmp/cache",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_key_requires_files() {
        assert!(Cli::try_parse_from(["sluice", "cache-key", "deps"]).is_err());
        assert!(Cli::try_parse_from(["sluice", "cache-key", "deps", "Cargo.lock"]).is_ok());
    }
}
