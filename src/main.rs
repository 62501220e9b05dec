//! testd command-line interface.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use testd::ShutdownSignal;
use testd::config::{ConfigOverrides, SessionConfig};

#[derive(Parser)]
#[command(name = "testd", version, about = "Start test service daemons and wait until they are ready")]
struct Cli {
    /// Config file (default: ./testd.toml if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    service: ServiceArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Session settings that override the config file.
#[derive(Args)]
struct ServiceArgs {
    /// Service client timeout in seconds (0 = none)
    #[arg(long, global = true, value_name = "SECS")]
    service_timeout: Option<f64>,

    /// Do not spawn daemons; treat every daemon as ready
    #[arg(long, global = true)]
    service_disable: bool,

    /// Wait for a daemon started by hand instead of spawning it
    #[arg(long, global = true)]
    service_wait: bool,

    /// Seconds to wait after the shutdown signal before killing
    #[arg(long, global = true, value_name = "SECS")]
    service_shutdown_timeout: Option<f64>,

    /// Shutdown signal: SIGINT, SIGKILL, SIGQUIT or SIGTERM
    #[arg(long, global = true, value_name = "SIGNAL")]
    service_shutdown_signal: Option<ShutdownSignal>,
}

impl ServiceArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            service_timeout: self.service_timeout,
            service_disable: self.service_disable,
            service_wait: self.service_wait,
            shutdown_timeout: self.service_shutdown_timeout,
            shutdown_signal: self.service_shutdown_signal,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a daemon, wait until it is ready and keep it running until Ctrl+C
    Run {
        /// Scope name (default: the joined command line)
        #[arg(long)]
        name: Option<String>,

        #[command(flatten)]
        health: commands::HealthArgs,

        /// Extra environment variable for the daemon
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = commands::parse_env)]
        env: Vec<(String, String)>,

        /// Daemon command line
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Wait until a daemon started by hand answers its ping
    Wait {
        #[command(flatten)]
        health: commands::HealthArgs,

        /// Command to show in the instructions banner
        #[arg(last = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
}

fn load_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load_from(path)?,
        None => SessionConfig::load()?,
    };
    config.apply(&cli.service.overrides())?;

    let validation = config.validate()?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    commands::init_logging(cli.json_logs);

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run {
            name,
            health,
            env,
            command,
        } => {
            commands::run::execute(
                config,
                commands::run::RunOptions {
                    name,
                    health,
                    env,
                    command,
                },
            )
            .await
        },
        Commands::Wait { health, command } => commands::wait::execute(config, health, command).await,
    }
}
