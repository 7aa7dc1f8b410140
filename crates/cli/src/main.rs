//! toolloop CLI — the main entry point.
//!
//! Commands:
//! - `replay`  Run the tool loop against a scripted session file
//! - `config`  Show, validate or initialize configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod session;

#[derive(Parser)]
#[command(
    name = "toolloop",
    about = "toolloop: iterative tool-use execution loop for LLM agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Config file (defaults to ~/.toolloop/config.toml)
    #[arg(long, global = true, env = "TOOLLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the loop against a scripted session
    Replay {
        /// Session file (JSON)
        session: PathBuf,

        /// Accept the first text answer without a confirmation turn
        #[arg(long)]
        no_confirm: bool,

        /// Override agent_loop.max_iterations
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate the configuration and report warnings
    Validate,
    /// Print the config file path
    Path,
    /// Write the default configuration
    Init,
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Replay {
            session,
            no_confirm,
            max_iterations,
        } => {
            let config = commands::replay::load_config(config_path)?;
            commands::replay::run(
                config,
                commands::replay::ReplayOptions {
                    session,
                    no_confirm,
                    max_iterations,
                },
            )
            .await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Init => commands::config_cmd::init(config_path)?,
        },
    }

    Ok(())
}
