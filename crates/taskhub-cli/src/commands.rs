//! Command handlers. Each handler reads the derived session, checks the
//! role the command needs and calls the matching service endpoint.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context as _, Result};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use taskhub_core::auth::Session;
use taskhub_core::models::{
    NewTask, NewTeam, NewUser, Role, Task, TaskFilter, TaskPriority, TaskStatus, TaskUpdate,
    TeamUpdate,
};
use taskhub_core::{ApiClient, Config, SessionManager, SessionState};

use crate::output;
use crate::{AttachmentCommands, CommentCommands, TaskCommands, TeamCommands, UserCommands};

/// Maximum concurrent team task requests for `tasks all`.
const MAX_CONCURRENT_REQUESTS: usize = 8;

/// Role a command requires. `Leader` also admits admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Member,
    Leader,
    Admin,
}

impl Access {
    pub fn allows(&self, role: Role) -> bool {
        match self {
            Access::Member => true,
            Access::Leader => matches!(role, Role::TeamLeader | Role::Admin),
            Access::Admin => role == Role::Admin,
        }
    }
}

pub struct Context {
    config: Config,
    api: ApiClient,
    session: Arc<SessionManager>,
    json: bool,
}

impl Context {
    pub fn new(config: Config, api: ApiClient, session: Arc<SessionManager>, json: bool) -> Self {
        Self {
            config,
            api,
            session,
            json,
        }
    }

    /// Current session, if it grants `access`
    fn require(&self, access: Access) -> Result<Session> {
        let state = self.session.current();
        let session = state
            .session()
            .cloned()
            .ok_or_else(|| anyhow!("Not logged in. Run `taskhub login` first."))?;
        if !access.allows(session.role) {
            bail!(
                "This command requires {} access; you are logged in as {}",
                match access {
                    Access::Admin => "admin",
                    Access::Leader => "team leader",
                    Access::Member => "member",
                },
                session.role.display_name()
            );
        }
        Ok(session)
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    pub async fn login(&mut self, username: Option<String>, password: Option<String>) -> Result<()> {
        let username = match username.or_else(|| self.config.last_username.clone()) {
            Some(username) if !username.trim().is_empty() => username.trim().to_string(),
            _ => prompt_username()?,
        };
        let password = match password {
            Some(password) if !password.is_empty() => password,
            _ => rpassword::prompt_password("Password: ")?,
        };
        if username.is_empty() || password.is_empty() {
            bail!("Username and password required");
        }

        let state = match self.session.sign_in(&self.api, &username, &password).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Login failed");
                bail!(e.login_message());
            }
        };

        let Some(session) = state.session() else {
            bail!("Login failed: the issued token could not be used to start a session");
        };

        self.config.last_username = Some(username);
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        info!("Login successful");
        if self.json {
            output::print_json(&output::session_json(session))
        } else {
            println!("Logged in as {} ({})", session.username(), session.role.display_name());
            Ok(())
        }
    }

    pub fn logout(&self) {
        let was_authenticated = self.session.current().is_authenticated();
        self.session.logout();
        if was_authenticated {
            println!("Logged out");
        } else {
            println!("Not logged in");
        }
    }

    pub fn whoami(&self) -> Result<()> {
        match self.session.current() {
            SessionState::Authenticated(session) => {
                if self.json {
                    output::print_json(&output::session_json(&session))
                } else {
                    output::print_session(&session);
                    Ok(())
                }
            }
            _ => {
                println!("Not logged in");
                Ok(())
            }
        }
    }

    pub async fn signup(
        &self,
        username: String,
        email: String,
        first_name: String,
        last_name: String,
    ) -> Result<()> {
        let password = rpassword::prompt_password("Password: ")?;
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }

        let user = self
            .api
            .signup(&NewUser {
                username,
                email,
                password,
                first_name,
                last_name,
            })
            .await
            .context("Signup failed")?;

        if self.json {
            output::print_json(&user)
        } else {
            println!(
                "Account {} created. An admin must activate it before you can log in.",
                user.username
            );
            Ok(())
        }
    }

    // =========================================================================
    // Users
    // =========================================================================

    pub async fn users(&self, command: UserCommands) -> Result<()> {
        match command {
            UserCommands::List => {
                self.require(Access::Member)?;
                let users = self.api.fetch_users().await?;
                self.show(users.as_slice(), output::print_users)
            }
            UserCommands::Show { username } => {
                self.require(Access::Member)?;
                let user = self.api.fetch_user(&username).await?;
                self.show(&user, output::print_user)
            }
            UserCommands::Activate { username } => {
                self.require(Access::Admin)?;
                let user = self.api.activate_user(&username).await?;
                self.show(&user, output::print_user)
            }
            UserCommands::Deactivate { username } => {
                self.require(Access::Admin)?;
                let user = self.api.deactivate_user(&username).await?;
                self.show(&user, output::print_user)
            }
            UserCommands::Role { username, role } => {
                self.require(Access::Admin)?;
                let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
                let user = self.api.update_user_role(&username, role).await?;
                self.show(&user, output::print_user)
            }
            UserCommands::Delete { username } => {
                let session = self.require(Access::Admin)?;
                if session.username() == username {
                    bail!("Refusing to delete the account you are logged in with");
                }
                self.api.delete_user(&username).await?;
                println!("Deleted user {}", username);
                Ok(())
            }
        }
    }

    // =========================================================================
    // Teams
    // =========================================================================

    pub async fn teams(&self, command: TeamCommands) -> Result<()> {
        match command {
            TeamCommands::List => {
                self.require(Access::Member)?;
                let teams = self.api.fetch_teams().await?;
                self.show(teams.as_slice(), output::print_teams)
            }
            TeamCommands::Show { team_id } => {
                self.require(Access::Member)?;
                let team = self.api.fetch_team(&team_id).await?;
                self.show(&team, output::print_team)
            }
            TeamCommands::Create {
                name,
                description,
                leader,
            } => {
                self.require(Access::Admin)?;
                let team = self
                    .api
                    .create_team(&NewTeam {
                        name,
                        description,
                        leader_username: leader,
                    })
                    .await?;
                self.show(&team, output::print_team)
            }
            TeamCommands::Update {
                team_id,
                name,
                description,
            } => {
                self.require(Access::Leader)?;
                let update = TeamUpdate { name, description };
                if update.is_empty() {
                    bail!("Nothing to update: pass --name and/or --description");
                }
                let team = self.api.update_team(&team_id, &update).await?;
                self.show(&team, output::print_team)
            }
            TeamCommands::Delete { team_id } => {
                self.require(Access::Admin)?;
                self.api.delete_team(&team_id).await?;
                println!("Deleted team {}", team_id);
                Ok(())
            }
            TeamCommands::AddMember { team_id, username } => {
                self.require(Access::Leader)?;
                let team = self.api.add_team_member(&team_id, &username).await?;
                self.show(&team, output::print_team)
            }
            TeamCommands::RemoveMember { team_id, username } => {
                self.require(Access::Leader)?;
                let team = self.api.remove_team_member(&team_id, &username).await?;
                self.show(&team, output::print_team)
            }
        }
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    pub async fn tasks(&self, command: TaskCommands) -> Result<()> {
        match command {
            TaskCommands::Mine {
                status,
                sort_by_due,
            } => {
                self.require(Access::Member)?;
                let filter = task_filter(status.as_deref(), sort_by_due)?;
                let tasks = self.api.fetch_my_tasks(&filter).await?;
                self.show(tasks.as_slice(), output::print_tasks)
            }
            TaskCommands::Team {
                team_id,
                status,
                sort_by_due,
            } => {
                self.require(Access::Member)?;
                let filter = task_filter(status.as_deref(), sort_by_due)?;
                let tasks = self.api.fetch_team_tasks(&team_id, &filter).await?;
                self.show(tasks.as_slice(), output::print_tasks)
            }
            TaskCommands::All { status } => {
                self.require(Access::Leader)?;
                let filter = task_filter(status.as_deref(), true)?;
                let tasks = self.fetch_all_team_tasks(&filter).await?;
                self.show(tasks.as_slice(), output::print_tasks)
            }
            TaskCommands::Show { task_id } => {
                self.require(Access::Member)?;
                let task = self.api.fetch_task(&task_id).await?;
                self.show(&task, output::print_task)
            }
            TaskCommands::Create {
                team,
                title,
                description,
                assignee,
                due,
                priority,
            } => {
                self.require(Access::Leader)?;
                let task = self
                    .api
                    .create_task(&NewTask {
                        team_id: team,
                        title,
                        description,
                        assigned_to: assignee,
                        due_date: due,
                        status: TaskStatus::Todo,
                        priority: parse_priority(&priority)?,
                    })
                    .await?;
                self.show(&task, output::print_task)
            }
            TaskCommands::Status { task_id, status } => {
                self.require(Access::Member)?;
                let task = self
                    .api
                    .update_task_status(&task_id, parse_status(&status)?)
                    .await?;
                self.show(&task, output::print_task)
            }
            TaskCommands::Update {
                task_id,
                title,
                description,
                assignee,
                due,
                priority,
                status,
            } => {
                self.require(Access::Leader)?;
                let update = TaskUpdate {
                    title,
                    description,
                    assigned_to: assignee,
                    due_date: due,
                    priority: priority.as_deref().map(parse_priority).transpose()?,
                    status: status.as_deref().map(parse_status).transpose()?,
                };
                let task = self.api.update_task(&task_id, &update).await?;
                self.show(&task, output::print_task)
            }
            TaskCommands::Delete { task_id } => {
                self.require(Access::Leader)?;
                self.api.delete_task(&task_id).await?;
                println!("Deleted task {}", task_id);
                Ok(())
            }
        }
    }

    /// Fetch tasks for every visible team with bounded concurrency.
    /// Teams whose tasks cannot be read are skipped with a warning.
    async fn fetch_all_team_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let teams = self.api.fetch_teams().await?;
        debug!(teams = teams.len(), "Fetching tasks for all teams");

        let results: Vec<_> = stream::iter(teams.iter())
            .map(|team| async move { (team, self.api.fetch_team_tasks(&team.id, filter).await) })
            .buffer_unordered(MAX_CONCURRENT_REQUESTS)
            .collect()
            .await;

        let mut tasks = Vec::new();
        for (team, result) in results {
            match result {
                Ok(team_tasks) => tasks.extend(team_tasks),
                Err(e) => warn!(team = %team.name, error = %e, "Failed to fetch team tasks"),
            }
        }
        sort_by_due(&mut tasks);
        Ok(tasks)
    }

    // =========================================================================
    // Comments and attachments
    // =========================================================================

    pub async fn comments(&self, command: CommentCommands) -> Result<()> {
        self.require(Access::Member)?;
        match command {
            CommentCommands::List { task_id } => {
                let comments = self.api.fetch_comments(&task_id).await?;
                self.show(comments.as_slice(), output::print_comments)
            }
            CommentCommands::Add { task_id, text } => {
                let comment = self.api.add_comment(&task_id, &text).await?;
                self.show(std::slice::from_ref(&comment), output::print_comments)
            }
            CommentCommands::Delete {
                task_id,
                comment_id,
            } => {
                self.api.delete_comment(&task_id, &comment_id).await?;
                println!("Deleted comment {}", comment_id);
                Ok(())
            }
        }
    }

    pub async fn attachments(&self, command: AttachmentCommands) -> Result<()> {
        self.require(Access::Member)?;
        match command {
            AttachmentCommands::List { task_id } => {
                let attachments = self.api.fetch_attachments(&task_id).await?;
                self.show(attachments.as_slice(), output::print_attachments)
            }
            AttachmentCommands::Upload { task_id, file } => {
                let filename = file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| anyhow!("{} has no usable file name", file.display()))?
                    .to_string();
                let contents = std::fs::read(&file)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let attachment = self.api.upload_attachment(&task_id, &filename, contents).await?;
                if self.json {
                    output::print_json(&attachment)
                } else {
                    println!("Uploaded {} as attachment {}", attachment.filename, attachment.id);
                    Ok(())
                }
            }
            AttachmentCommands::Download {
                task_id,
                attachment_id,
                output,
            } => {
                let path = match output {
                    Some(path) => path,
                    None => self.attachment_filename(&task_id, &attachment_id).await?,
                };
                let bytes = self.api.download_attachment(&task_id, &attachment_id).await?;
                std::fs::write(&path, &bytes)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                println!("Saved {} bytes to {}", bytes.len(), path.display());
                Ok(())
            }
            AttachmentCommands::Delete {
                task_id,
                attachment_id,
            } => {
                self.api.delete_attachment(&task_id, &attachment_id).await?;
                println!("Deleted attachment {}", attachment_id);
                Ok(())
            }
        }
    }

    async fn attachment_filename(&self, task_id: &str, attachment_id: &str) -> Result<PathBuf> {
        let attachments = self.api.fetch_attachments(task_id).await?;
        let attachment = attachments
            .into_iter()
            .find(|a| a.id == attachment_id)
            .ok_or_else(|| anyhow!("Attachment {} not found on task {}", attachment_id, task_id))?;
        // Keep only the final path component of a server-supplied name
        let name = PathBuf::from(&attachment.filename)
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(attachment_id));
        Ok(name)
    }

    fn show<T, F>(&self, value: &T, print: F) -> Result<()>
    where
        T: serde::Serialize + ?Sized,
        F: FnOnce(&T),
    {
        if self.json {
            output::print_json(value)
        } else {
            print(value);
            Ok(())
        }
    }
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

fn parse_status(value: &str) -> Result<TaskStatus> {
    value.parse().map_err(|e: String| anyhow!(e))
}

fn parse_priority(value: &str) -> Result<TaskPriority> {
    value.parse().map_err(|e: String| anyhow!(e))
}

fn task_filter(status: Option<&str>, sort_by_due: bool) -> Result<TaskFilter> {
    Ok(TaskFilter {
        status: status.map(parse_status).transpose()?,
        sort_by_due,
    })
}

/// Sort by due date, tasks with unparseable dates last
fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by_key(|task| {
        let due = taskhub_core::utils::parse_timestamp(&task.due_date);
        (due.is_none(), due)
    });
}
