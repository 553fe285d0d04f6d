use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

use bridgeview::cli::handlers;
use bridgeview::cli::{Cli, Commands};
use bridgeview::core::{config::data_dir, Action};
use bridgeview::{Config, Result};

fn init_tracing(logfile: Option<PathBuf>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bridgeview=info"));

    match logfile {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Full-screen commands must not write logs over the UI
    let logfile = match cli.logfile {
        Some(path) => Some(path),
        None if cli.command.is_interactive() => Some(data_dir().join("bridgeview.log")),
        None => None,
    };
    init_tracing(logfile)?;

    let config = Config::load()?;

    match cli.command {
        Commands::Pair { key } => handlers::pair(config, key).await,
        Commands::Logout => handlers::logout(config).await,
        Commands::Status => handlers::status(config).await,
        Commands::Agents {
            active_only,
            follow,
        } => handlers::list_agents(config, active_only, follow).await,
        Commands::Show { id, system } => handlers::show_agent(config, id, system).await,
        Commands::Start { id } => handlers::perform_action(config, id, Action::Start).await,
        Commands::Stop { id } => handlers::perform_action(config, id, Action::Stop).await,
        Commands::Approve { id } => handlers::perform_action(config, id, Action::Approve).await,
        Commands::Send { id, message } => handlers::send_message(config, id, message).await,
        Commands::Watch { id } => handlers::watch_agent(config, id).await,
        Commands::Shell { git } => handlers::open_shell(config, git).await,
        Commands::Exec { cwd, command } => handlers::exec(config, cwd, command).await,
        Commands::Git { command } => handlers::git(config, command).await,
        Commands::Files { command } => handlers::files(config, command).await,
        Commands::Workspaces { command } => handlers::workspaces(config, command).await,
        Commands::Playground {
            model,
            system,
            prompt,
        } => handlers::playground(config, model, system, prompt).await,
    }
}
