use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use streamaggr_ingest::{check_config, IngestConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Stream aggregation ingest tooling
#[derive(Parser)]
#[command(name = "streamaggr-ingest")]
#[command(about = "Stream aggregation rule and configuration tooling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and validate a stream aggregation rule file, then exit
    CheckConfig {
        /// Rule file to check. Defaults to the configured rule file.
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Print the effective service configuration as YAML
    PrintConfig,
}

/// `RUST_LOG` when set and valid, otherwise `info` (`debug` with `--verbose`)
fn log_filter(verbose: bool, rust_log: Option<String>) -> EnvFilter {
    let default = if verbose { "debug" } else { "info" };
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, std::env::var("RUST_LOG").ok()))
        .init();

    let config = IngestConfig::load()?;

    match cli.command {
        Commands::CheckConfig { rules } => {
            let path = rules
                .or_else(|| config.stream_aggr.config_path.clone())
                .context("No rule file given and none configured")?;

            match check_config(&path, config.stream_aggr.aggregator_options()) {
                Ok(count) => {
                    info!("{}: {} stream aggregation rules are valid", path.display(), count);
                    Ok(())
                }
                Err(e) => {
                    error!("{}", e);
                    Err(e).with_context(|| format!("Invalid rule file {}", path.display()))
                }
            }
        }

        Commands::PrintConfig => {
            let yaml = serde_yaml::to_string(&config).context("Failed to render configuration")?;
            print!("{}", yaml);
            Ok(())
        }
    }
}
