//! Plain-text and JSON rendering of service records.

use anyhow::Result;
use serde::Serialize;

use taskhub_core::auth::Session;
use taskhub_core::models::{Attachment, Comment, Task, Team, User};
use taskhub_core::utils::{format_optional, format_timestamp, truncate_string};

/// Column widths for list output
const NAME_WIDTH: usize = 24;
const TITLE_WIDTH: usize = 36;

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn session_json(session: &Session) -> serde_json::Value {
    serde_json::json!({
        "username": session.username(),
        "email": session.identity.email,
        "first_name": session.identity.first_name,
        "last_name": session.identity.last_name,
        "role": session.role,
        "is_admin": session.is_admin(),
        "is_leader": session.is_leader(),
        "expires_at": session.expires_at,
    })
}

pub fn print_session(session: &Session) {
    let expires = chrono::DateTime::from_timestamp(session.expires_at, 0)
        .map(|dt| dt.format("%b %d, %Y %H:%M UTC").to_string())
        .unwrap_or_else(|| session.expires_at.to_string());
    println!("{} <{}>", session.identity.full_name(), session.identity.email);
    println!("  username: {}", session.username());
    println!("  role:     {}", session.role.display_name());
    println!("  expires:  {}", expires);
}

pub fn print_users(users: &[User]) {
    if users.is_empty() {
        println!("No users");
        return;
    }
    println!("{:<NAME_WIDTH$} {:<NAME_WIDTH$} {:<12} STATUS", "USERNAME", "NAME", "ROLE");
    for user in users {
        println!(
            "{:<NAME_WIDTH$} {:<NAME_WIDTH$} {:<12} {}",
            truncate_string(&user.username, NAME_WIDTH),
            truncate_string(&user.full_name(), NAME_WIDTH),
            user.role.as_str(),
            user.status_display()
        );
    }
}

pub fn print_user(user: &User) {
    println!("{} ({})", user.full_name(), user.username);
    println!("  email:  {}", user.email);
    println!("  role:   {}", user.role.display_name());
    println!("  status: {}", user.status_display());
}

pub fn print_teams(teams: &[Team]) {
    if teams.is_empty() {
        println!("No teams");
        return;
    }
    println!("{:<26} {:<NAME_WIDTH$} {:<NAME_WIDTH$} MEMBERS", "ID", "NAME", "LEADER");
    for team in teams {
        println!(
            "{:<26} {:<NAME_WIDTH$} {:<NAME_WIDTH$} {}",
            team.id,
            truncate_string(&team.name, NAME_WIDTH),
            truncate_string(&team.leader_id, NAME_WIDTH),
            team.member_count()
        );
    }
}

pub fn print_team(team: &Team) {
    println!("{} ({})", team.name, team.id);
    println!("  description: {}", format_optional(&team.description, "-"));
    println!("  leader:      {}", team.leader_id);
    println!("  created:     {}", team.formatted_created_at());
    if team.member_ids.is_empty() {
        println!("  members:     none");
    } else {
        println!("  members:     {}", team.member_ids.join(", "));
    }
}

pub fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks");
        return;
    }
    println!(
        "{:<26} {:<TITLE_WIDTH$} {:<12} {:<8} {:<18} DUE",
        "ID", "TITLE", "STATUS", "PRIORITY", "ASSIGNEE"
    );
    for task in tasks {
        let status = task
            .status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| task.status.clone());
        let due = if task.is_overdue() {
            format!("{} (overdue)", task.formatted_due_date())
        } else {
            task.formatted_due_date()
        };
        println!(
            "{:<26} {:<TITLE_WIDTH$} {:<12} {:<8} {:<18} {}",
            task.id,
            truncate_string(&task.title, TITLE_WIDTH),
            status,
            task.priority,
            truncate_string(&task.assigned_to, 18),
            due
        );
    }
}

pub fn print_task(task: &Task) {
    println!("{} ({})", task.title, task.id);
    println!("  team:        {}", task.team_id);
    println!("  status:      {}", task.status);
    println!("  priority:    {}", task.priority);
    println!("  assigned to: {}", task.assigned_to);
    println!("  created by:  {}", task.created_by);
    println!("  due:         {}", task.formatted_due_date());
    println!("  created:     {}", format_timestamp(&task.created_at));
    if let Some(ref description) = task.description {
        println!();
        println!("{}", description);
    }
}

pub fn print_comments(comments: &[Comment]) {
    if comments.is_empty() {
        println!("No comments");
        return;
    }
    for comment in comments {
        println!(
            "[{}] {} ({}): {}",
            comment.id,
            comment.created_by,
            format_timestamp(&comment.created_at),
            comment.text
        );
    }
}

pub fn print_attachments(attachments: &[Attachment]) {
    if attachments.is_empty() {
        println!("No attachments");
        return;
    }
    for attachment in attachments {
        println!(
            "[{}] {} ({}) uploaded by {} on {}",
            attachment.id,
            attachment.filename,
            attachment.content_type,
            attachment.uploaded_by,
            format_timestamp(&attachment.uploaded_at)
        );
    }
}
