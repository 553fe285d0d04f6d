use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{FileCommands, GitCommands, WorkspaceCommands};
use crate::client::{BridgeClient, RealtimeChannel};
use crate::core::agent::{chat_entries, system_entries};
use crate::core::ide::{FileKind, PlaygroundRequest};
use crate::core::{Action, Agent, Config, CredentialStore, LogLevel, SessionContext, ShellKind};
use crate::sync::{
    ActionDispatcher, AgentView, AgentWatch, CommandRunner, ListingWatch, Reconciler, SyncEvent,
};
use crate::tui::{AgentTui, ShellTui};
use crate::utils::display::{relative_time, shorten_cwd, status_label};

struct Connection {
    context: SessionContext,
    client: Arc<BridgeClient>,
}

fn connect(config: &Config) -> Result<Connection> {
    let store = CredentialStore::in_data_dir();
    let context = SessionContext::restore(config, &store)?;
    let client = Arc::new(BridgeClient::new(&context, config)?);
    Ok(Connection { context, client })
}

fn reconciler_for(config: &Config, connection: &Connection) -> Reconciler {
    Reconciler::new(connection.client.clone(), config.sync.apply_policy)
}

pub async fn pair(config: Config, key: String) -> Result<()> {
    let credential = BridgeClient::pair(&config, key.trim())
        .await
        .context("Pairing failed")?;
    let store = CredentialStore::in_data_dir();
    store.save(&config.server.api_url, &credential)?;
    tracing::info!("Paired with {}", config.server.api_url);
    println!("Paired with {}", config.server.api_url);
    Ok(())
}

pub async fn logout(config: Config) -> Result<()> {
    let store = CredentialStore::in_data_dir();
    match SessionContext::restore(&config, &store) {
        Ok(context) => {
            context.logout(&store)?;
            println!("Logged out");
        }
        Err(_) => {
            store.clear()?;
            println!("Not paired");
        }
    }
    Ok(())
}

pub async fn status(config: Config) -> Result<()> {
    let connection = connect(&config)?;
    if !connection.client.is_bridge_running().await {
        bail!("Bridge at {} is not reachable", connection.context.api_url());
    }
    let status = connection.client.system_status().await?;
    println!("Bridge:     {}", connection.context.api_url());
    println!("Workspace:  {}", status.workspace);
    println!("Uptime:     {}", status.uptime);
    println!(
        "Agents:     {} total, {} active, {} waiting for approval",
        status.total_agents, status.active_agents, status.waiting_approval
    );
    Ok(())
}

fn print_agents(agents: &[Agent]) {
    if agents.is_empty() {
        println!("No agents");
        return;
    }
    let now = Utc::now();
    println!("{:<14} {:<24} {:<16} {:<10} TASK", "ID", "NAME", "STATUS", "ACTIVE");
    for agent in agents {
        println!(
            "{:<14} {:<24} {:<16} {:<10} {}",
            agent.id,
            agent.display_name(),
            status_label(agent.status),
            relative_time(agent.last_active, now),
            agent.current_task.as_deref().unwrap_or("-")
        );
    }
}

pub async fn list_agents(config: Config, active_only: bool, follow: bool) -> Result<()> {
    let connection = connect(&config)?;
    let reconciler = reconciler_for(&config, &connection);
    let all = config.sync.list_all && !active_only;

    if !follow {
        reconciler.refresh_listing(all).await?;
        print_agents(&reconciler.listing().await.agents);
        return Ok(());
    }

    let mut events = reconciler.subscribe();
    let channel = RealtimeChannel::open(&connection.context, config.reconnect.clone());
    let watch = ListingWatch::activate(reconciler, channel, all);
    let mut connection_state = watch.watch_connection();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SyncEvent::Listing { stale, .. }) => {
                    let listing = watch.listing().await;
                    println!();
                    print_agents(&listing.agents);
                    if stale {
                        println!("(refresh failed; showing last known list)");
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            },
            Ok(()) = connection_state.changed() => {
                let state = *connection_state.borrow_and_update();
                tracing::info!("Realtime channel is {}", state);
            }
        }
    }

    watch.deactivate().await;
    Ok(())
}

fn print_view(view: &AgentView, include_system: bool) {
    if let Some(agent) = &view.snapshot {
        println!("{} ({})", agent.display_name(), agent.id);
        println!("Status:      {}", status_label(agent.status));
        println!("Last active: {}", relative_time(agent.last_active, Utc::now()));
        if let Some(task) = &agent.current_task {
            println!("Task:        {}", task);
        }
        if let Some(workspace) = &agent.workspace {
            println!("Workspace:   {}", workspace);
        }
        for (key, value) in &agent.meta {
            println!("  {}: {}", key, value);
        }
    }

    println!();
    let mut any = false;
    for entry in chat_entries(&view.transcript) {
        any = true;
        let who = if entry.level == LogLevel::User { "You" } else { "Agent" };
        println!("[{}] {}: {}", entry.timestamp.format("%H:%M"), who, entry.chat_text());
    }
    if !any {
        println!("No messages yet");
    }

    if include_system {
        println!();
        println!("System events:");
        for entry in system_entries(&view.transcript) {
            println!(
                "[{}] {:<7} {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.level.as_str(),
                entry.message
            );
        }
    }
}

pub async fn show_agent(config: Config, id: String, include_system: bool) -> Result<()> {
    let connection = connect(&config)?;
    let reconciler = reconciler_for(&config, &connection);
    reconciler.observe(&id);
    reconciler.refresh(&id).await?;

    let view = reconciler.view(&id).await.unwrap_or_default();
    print_view(&view, include_system);
    reconciler.release(&id);
    Ok(())
}

pub async fn perform_action(config: Config, id: String, action: Action) -> Result<()> {
    let connection = connect(&config)?;
    let reconciler = reconciler_for(&config, &connection);
    let dispatcher = ActionDispatcher::new(reconciler.clone());
    reconciler.observe(&id);

    let kind = action.kind();
    dispatcher.dispatch(&id, action).await?;

    match reconciler.status(&id).await {
        Some(status) => println!("{}: {} ({})", id, kind, status_label(status)),
        None => println!("{}: {}", id, kind),
    }
    reconciler.release(&id);
    Ok(())
}

pub async fn send_message(config: Config, id: String, words: Vec<String>) -> Result<()> {
    let connection = connect(&config)?;
    let reconciler = reconciler_for(&config, &connection);
    let dispatcher = ActionDispatcher::new(reconciler.clone());

    let mut draft = words.join(" ");
    dispatcher.send_message(&id, &mut draft).await?;
    println!("Message sent to {}", id);
    Ok(())
}

pub async fn watch_agent(config: Config, id: String) -> Result<()> {
    let connection = connect(&config)?;
    let reconciler = reconciler_for(&config, &connection);
    let dispatcher = ActionDispatcher::new(reconciler.clone());

    let channel = RealtimeChannel::open(&connection.context, config.reconnect.clone());
    let watch = AgentWatch::activate(
        reconciler.clone(),
        channel,
        &id,
        config.sync.poll_interval(),
    );

    AgentTui::new(watch, reconciler, dispatcher)?.run().await
}

pub async fn open_shell(config: Config, git: bool) -> Result<()> {
    let connection = connect(&config)?;
    let shell = if git { ShellKind::Git } else { ShellKind::Terminal };
    let runner = CommandRunner::new(connection.client.clone(), shell);
    ShellTui::new(runner)?.run().await
}

pub async fn exec(config: Config, cwd: Option<String>, command: Vec<String>) -> Result<()> {
    let connection = connect(&config)?;
    let command = command.join(" ");
    let output = connection
        .client
        .run_shell_command(ShellKind::Terminal, &command, cwd.as_deref())
        .await?;

    print!("{}", output.stdout);
    eprint!("{}", output.stderr);
    if let Some(cwd) = &output.cwd {
        tracing::debug!("Command finished in {}", shorten_cwd(cwd));
    }
    if output.exit_code != 0 {
        std::process::exit(output.exit_code);
    }
    Ok(())
}

pub async fn git(config: Config, command: GitCommands) -> Result<()> {
    let connection = connect(&config)?;
    match command {
        GitCommands::Status => {
            let status = connection.client.git_status().await?;
            let tracking = if status.remote.is_empty() {
                String::new()
            } else {
                format!(" -> {} (+{} -{})", status.remote, status.ahead, status.behind)
            };
            println!("On branch {}{}", status.branch, tracking);
            if status.is_clean {
                println!("Working tree clean");
            }
            for (label, files) in [
                ("Staged", &status.staged),
                ("Changed", &status.changed),
                ("Untracked", &status.untracked),
            ] {
                if !files.is_empty() {
                    println!("{}:", label);
                    for file in files {
                        println!("  {}", file);
                    }
                }
            }
            if !status.recent_commits.is_empty() {
                println!("Recent commits:");
                for commit in &status.recent_commits {
                    println!("  {} {}", commit.hash, commit.message);
                }
            }
        }
        GitCommands::Run { args } => {
            let mut runner = CommandRunner::new(connection.client.clone(), ShellKind::Git);
            let Some(result) = runner.run(&args.join(" ")).await else {
                bail!("Nothing to run");
            };
            print!("{}", result.stdout);
            eprint!("{}", result.stderr);
            if !result.succeeded() {
                std::process::exit(result.exit_code);
            }
        }
    }
    Ok(())
}

pub async fn files(config: Config, command: FileCommands) -> Result<()> {
    let connection = connect(&config)?;
    match command {
        FileCommands::Ls { path } => {
            let listing = connection.client.list_files(&path).await?;
            for entry in &listing.entries {
                match entry.kind {
                    FileKind::Directory => println!("{}/", entry.name),
                    FileKind::File => println!(
                        "{:<40} {:>10}",
                        entry.name,
                        entry.size.map(|size| size.to_string()).unwrap_or_default()
                    ),
                }
            }
        }
        FileCommands::Cat { path } => {
            let file = connection.client.read_file(&path).await?;
            print!("{}", file.content);
        }
        FileCommands::Write { path, input } => {
            let content = read_input(input)?;
            connection.client.write_file(&path, &content).await?;
            println!("Wrote {} bytes to {}", content.len(), path);
        }
    }
    Ok(())
}

fn read_input(input: Option<PathBuf>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read stdin")?;
            Ok(content)
        }
    }
}

pub async fn workspaces(config: Config, command: Option<WorkspaceCommands>) -> Result<()> {
    let connection = connect(&config)?;
    match command {
        None => {
            let list = connection.client.list_workspaces().await?;
            println!("Root: {}", list.root);
            for workspace in &list.workspaces {
                let marker = if workspace.is_current { "*" } else { " " };
                println!("{} {:<24} {}", marker, workspace.name, workspace.path);
            }
        }
        Some(WorkspaceCommands::Switch { path }) => {
            connection.client.switch_workspace(&path).await?;
            println!("Switched workspace to {}", path);
        }
    }
    Ok(())
}

pub async fn playground(
    config: Config,
    model: Option<String>,
    system: Option<String>,
    prompt: Vec<String>,
) -> Result<()> {
    let connection = connect(&config)?;
    let mut request = PlaygroundRequest::new(prompt.join(" "));
    if let Some(model) = model {
        request.model = model;
    }
    if let Some(system) = system {
        request.system_prompt = system;
    }

    let reply = connection.client.run_playground(&request).await?;
    println!("{}", reply.response);
    Ok(())
}
