use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bridgeview")]
#[command(about = "Watch and control remote coding agents through a mobile bridge", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to write logs to file
    #[arg(long, global = true)]
    pub logfile: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pair with the bridge using the key it displays
    Pair {
        /// Pairing key shown by the bridge
        key: String,
    },
    /// Forget the stored credential
    Logout,
    /// Show bridge and system status
    Status,
    /// List agents
    Agents {
        /// Only running and starting agents
        #[arg(long)]
        active_only: bool,
        /// Keep the list open and update it on every push message
        #[arg(short, long)]
        follow: bool,
    },
    /// Show one agent and its conversation
    Show {
        /// Agent ID
        id: String,
        /// Include system events
        #[arg(long)]
        system: bool,
    },
    /// Start an agent
    Start {
        /// Agent ID
        id: String,
    },
    /// Stop an agent
    Stop {
        /// Agent ID
        id: String,
    },
    /// Approve the action an agent is waiting on
    Approve {
        /// Agent ID
        id: String,
    },
    /// Send a chat message to an agent
    Send {
        /// Agent ID
        id: String,
        /// Message text
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Open a live view of one agent
    Watch {
        /// Agent ID
        id: String,
    },
    /// Open an interactive remote shell
    Shell {
        /// Run git subcommands instead of shell commands
        #[arg(long)]
        git: bool,
    },
    /// Run a single command in the bridge's terminal
    Exec {
        /// Working directory on the bridge
        #[arg(long)]
        cwd: Option<String>,
        /// Command line
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Git repository of the active workspace
    Git {
        #[command(subcommand)]
        command: GitCommands,
    },
    /// Browse and edit files in the active workspace
    Files {
        #[command(subcommand)]
        command: FileCommands,
    },
    /// List workspaces or switch the active one
    Workspaces {
        #[command(subcommand)]
        command: Option<WorkspaceCommands>,
    },
    /// Run a one-off prompt through the bridge's model playground
    Playground {
        /// Model name
        #[arg(long)]
        model: Option<String>,
        /// System prompt
        #[arg(long)]
        system: Option<String>,
        /// User prompt
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum GitCommands {
    /// Branch, tracking and working tree state
    Status,
    /// Run an allowed git subcommand (pull, push, commit, ...)
    Run {
        #[arg(required = true, trailing_var_arg = true)]
        args: Vec<String>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FileCommands {
    /// List a directory
    Ls {
        /// Path relative to the workspace root
        #[arg(default_value = "")]
        path: String,
    },
    /// Print a file
    Cat { path: String },
    /// Write a file from stdin or --input
    Write {
        path: String,
        /// Local file to upload instead of reading stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum WorkspaceCommands {
    /// Make another workspace the active one
    Switch { path: String },
}

impl Commands {
    /// Commands that take over the terminal
    pub fn is_interactive(&self) -> bool {
        matches!(self, Commands::Watch { .. } | Commands::Shell { .. })
    }
}
