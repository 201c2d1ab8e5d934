mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{
    config::{init_config, show_config, show_config_path},
    daemon::{run_daemon_process, show_status, start_daemon, stop_daemon},
    learn::{start_learning, stop_learning},
    replay::{run_replay, ReplayOptions},
};
use signpal_core::config::get_data_dir;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "signpal")]
#[command(about = "Sign-language alphabet trainer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the learning daemon
    Start,
    /// (Internal) Run the daemon process
    #[command(hide = true)]
    DaemonInternalStart,
    /// Stop the learning daemon
    Stop,
    /// Show daemon and session status
    Status,
    /// Control the learning session in the running daemon
    Learn {
        #[command(subcommand)]
        action: LearnAction,
    },
    /// Play a recorded script through a learning session in the foreground
    Replay {
        /// Path to the replay script (JSON)
        script: PathBuf,
        /// Print events as JSON lines instead of text
        #[arg(long)]
        json: bool,
        /// Override the poll interval in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,
        /// Override the confirmation delay in milliseconds
        #[arg(long)]
        confirmation_delay_ms: Option<u64>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum LearnAction {
    /// Begin a session at "A" (restarts a running one)
    Start,
    /// End the current session
    Stop,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::DaemonInternalStart) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    let data_dir = get_data_dir()?;

    match cli.command {
        Commands::Start => start_daemon(&data_dir),
        Commands::DaemonInternalStart => run_daemon_process().await,
        Commands::Stop => stop_daemon(&data_dir).await,
        Commands::Status => show_status(&data_dir).await,
        Commands::Learn { action } => match action {
            LearnAction::Start => start_learning(&data_dir).await,
            LearnAction::Stop => stop_learning(&data_dir).await,
        },
        Commands::Replay {
            script,
            json,
            poll_interval_ms,
            confirmation_delay_ms,
        } => {
            let options = ReplayOptions {
                script,
                json,
                poll_interval_ms,
                confirmation_delay_ms,
            };
            run_replay(&data_dir, options).await
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => show_config(&data_dir),
            ConfigAction::Path => {
                show_config_path(&data_dir);
                Ok(())
            }
            ConfigAction::Init { force } => init_config(&data_dir, force),
        },
    }
}
