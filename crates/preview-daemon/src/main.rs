//! preview-daemon - preview lifecycle tooling
//!
//! Inspects and validates configuration, runs the in-memory lifecycle
//! simulator, and runs the cleanup sweeper until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use preview_core::PreviewConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod serve;
mod simulate;
mod telemetry;

use simulate::{run_simulation, SimulationOptions};

/// Preview lifecycle daemon
#[derive(Parser, Debug)]
#[command(name = "preview-daemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an end-to-end lifecycle against in-memory collaborators
    Simulate {
        /// Sessions that provision normally
        #[arg(long, default_value_t = 12)]
        sessions: usize,

        /// Sessions held in provisioning past the stuck threshold
        #[arg(long, default_value_t = 1)]
        stuck: usize,

        /// Schema drops to fail at hard expiry
        #[arg(long, default_value_t = 1)]
        drop_failures: usize,

        /// Simulated latency per seeder, in milliseconds
        #[arg(long, default_value_t = 0)]
        seed_latency_ms: u64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the cleanup sweeper until ctrl-c
    Run {
        /// Override the configured sweep interval, in seconds
        #[arg(long)]
        interval_secs: Option<u64>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Validate a configuration file
    CheckConfig {
        /// File to validate
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<PreviewConfig> {
    match path {
        Some(path) => PreviewConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(PreviewConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(&cli.log_level, cli.json_logs)?;

    match cli.command {
        Commands::Simulate {
            sessions,
            stuck,
            drop_failures,
            seed_latency_ms,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let options = SimulationOptions {
                sessions,
                stuck,
                drop_failures,
                seed_latency: Duration::from_millis(seed_latency_ms),
            };
            tracing::info!(?options, "starting simulation");

            let report = run_simulation(config, options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.generate_text());
            }
            if !report.passed() {
                std::process::exit(1);
            }
        }
        Commands::Run { interval_secs } => {
            let config = load_config(cli.config.as_deref())?;
            let sweeper = serve::build_sweeper(config, interval_secs.map(Duration::from_secs))?;
            serve::run_until_ctrl_c(sweeper).await?;
        }
        Commands::Config => {
            let config = load_config(cli.config.as_deref())?;
            print!("{}", config.to_toml_string()?);
        }
        Commands::CheckConfig { path } => {
            let config = load_config(Some(&path))?;
            println!(
                "{}: ok (ttl {}s, idle {}s, stuck {}s, sweep every {}s)",
                path.display(),
                config.session_ttl_secs,
                config.idle_timeout_secs,
                config.stuck_threshold_secs,
                config.sweep_interval_secs,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn cli_parses_simulate_flags() {
        let cli = Cli::parse_from([
            "preview-daemon",
            "simulate",
            "--sessions",
            "4",
            "--drop-failures",
            "0",
            "--json",
        ]);
        match cli.command {
            Commands::Simulate {
                sessions,
                drop_failures,
                json,
                ..
            } => {
                assert_eq!(sessions, 4);
                assert_eq!(drop_failures, 0);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_parses_run_with_interval() {
        let cli = Cli::parse_from(["preview-daemon", "run", "--interval-secs", "60", "--json-logs"]);
        assert!(cli.json_logs);
        match cli.command {
            Commands::Run { interval_secs } => assert_eq!(interval_secs, Some(60)),
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::parse_from(["preview-daemon", "run"]);
        assert!(matches!(cli.command, Commands::Run { interval_secs: None }));
    }

    #[test]
    fn load_config_reports_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "idle_timeout_secs = 9000").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("idle_timeout_secs"));
    }

    #[test]
    fn missing_path_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), PreviewConfig::default());
    }
}
