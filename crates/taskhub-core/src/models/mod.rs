//! Data models for taskhub entities.
//!
//! This module contains the records exchanged with the three services:
//!
//! - `Role`, `User`, `NewUser`: accounts and their permission level
//! - `Team`, `NewTeam`, `TeamUpdate`: teams and membership
//! - `Task`, `Comment`, `Attachment`: work items and their discussion

pub mod task;
pub mod team;
pub mod user;

pub use task::{
    Attachment, Comment, NewTask, Task, TaskFilter, TaskPriority, TaskStatus, TaskUpdate,
};
pub use team::{NewTeam, Team, TeamUpdate};
pub use user::{NewUser, Role, TokenResponse, User};
