//! taskhub - command line front end for the taskhub team and task services.
//!
//! The CLI keeps the bearer token between runs, derives the session from it
//! on startup and offers the admin, team leader and member operations the
//! services expose.

mod commands;
mod output;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use taskhub_core::{ApiClient, Config, SessionManager};

use commands::Context;

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "taskhub")]
#[command(about = "Manage teams and tasks from the terminal")]
#[command(version)]
struct Cli {
    /// Print results as JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and keep the session for later commands
    Login {
        /// Username (defaults to the last used username)
        #[arg(long, short, env = "TASKHUB_USERNAME")]
        username: Option<String>,
        /// Read from the environment only; prompted for otherwise
        #[arg(long, env = "TASKHUB_PASSWORD", hide = true, hide_env_values = true)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Show the current session
    Whoami,
    /// Register a new account (an admin must activate it)
    Signup {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },
    /// Account administration
    Users {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Team management
    Teams {
        #[command(subcommand)]
        command: TeamCommands,
    },
    /// Task management
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Task discussion
    Comments {
        #[command(subcommand)]
        command: CommentCommands,
    },
    /// Task attachments
    Attachments {
        #[command(subcommand)]
        command: AttachmentCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// List all accounts
    List,
    /// Show one account
    Show { username: String },
    /// Activate a pending account (admin)
    Activate { username: String },
    /// Deactivate an account (admin)
    Deactivate { username: String },
    /// Change an account's role: admin, team_leader or member (admin)
    Role { username: String, role: String },
    /// Delete an account (admin)
    Delete { username: String },
}

#[derive(Subcommand)]
pub enum TeamCommands {
    /// List teams visible to you
    List,
    /// Show one team
    Show { team_id: String },
    /// Create a team (admin)
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Username of the team leader
        #[arg(long)]
        leader: String,
    },
    /// Rename or describe a team (admin or leader)
    Update {
        team_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a team (admin)
    Delete { team_id: String },
    /// Add a member to a team (admin or leader)
    AddMember { team_id: String, username: String },
    /// Remove a member from a team (admin or leader)
    RemoveMember { team_id: String, username: String },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Tasks assigned to you
    Mine {
        /// Only tasks in this status (todo, in_progress, done)
        #[arg(long)]
        status: Option<String>,
        /// Sort by due date
        #[arg(long)]
        sort_by_due: bool,
    },
    /// Tasks of one team
    Team {
        team_id: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        sort_by_due: bool,
    },
    /// Tasks of every team you can see (admin or leader)
    All {
        #[arg(long)]
        status: Option<String>,
    },
    /// Show one task
    Show { task_id: String },
    /// Create a task (admin or leader)
    Create {
        #[arg(long)]
        team: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        assignee: String,
        /// Due date, RFC 3339 or YYYY-MM-DDTHH:MM:SS
        #[arg(long)]
        due: String,
        /// low, medium or urgent
        #[arg(long, default_value = "medium")]
        priority: String,
    },
    /// Change a task's status (assignee, leader or admin)
    Status { task_id: String, status: String },
    /// Edit a task (admin or leader)
    Update {
        task_id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long)]
        due: Option<String>,
        #[arg(long)]
        priority: Option<String>,
        #[arg(long)]
        status: Option<String>,
    },
    /// Delete a task (admin or leader)
    Delete { task_id: String },
}

#[derive(Subcommand)]
pub enum CommentCommands {
    List { task_id: String },
    Add { task_id: String, text: String },
    Delete { task_id: String, comment_id: String },
}

#[derive(Subcommand)]
pub enum AttachmentCommands {
    List { task_id: String },
    /// Upload a file to a task
    Upload {
        task_id: String,
        file: std::path::PathBuf,
    },
    /// Download an attachment to a file
    Download {
        task_id: String,
        attachment_id: String,
        /// Output path (defaults to the attachment's file name)
        #[arg(long, short)]
        output: Option<std::path::PathBuf>,
    },
    Delete { task_id: String, attachment_id: String },
}

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    init_tracing();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let tokens = config.token_store()?;
    let api = ApiClient::new(config.service_urls(), tokens.clone())?;
    let session = Arc::new(SessionManager::new(tokens, Arc::new(api.clone())));

    session.init().await;
    info!(authenticated = session.current().is_authenticated(), "Session initialized");

    let mut ctx = Context::new(config, api, session.clone(), cli.json);
    let result = run(&mut ctx, cli.command).await;

    session.teardown();
    result
}

async fn run(ctx: &mut Context, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => ctx.login(username, password).await,
        Commands::Logout => {
            ctx.logout();
            Ok(())
        }
        Commands::Whoami => ctx.whoami(),
        Commands::Signup {
            username,
            email,
            first_name,
            last_name,
        } => ctx.signup(username, email, first_name, last_name).await,
        Commands::Users { command } => ctx.users(command).await,
        Commands::Teams { command } => ctx.teams(command).await,
        Commands::Tasks { command } => ctx.tasks(command).await,
        Commands::Comments { command } => ctx.comments(command).await,
        Commands::Attachments { command } => ctx.attachments(command).await,
    }
}
