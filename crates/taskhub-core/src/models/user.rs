use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Permission level of an account.
///
/// Serialized the way the user service writes it into tokens and profile
/// records (`admin`, `team_leader`, `member`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    TeamLeader,
    #[default]
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::TeamLeader => "team_leader",
            Role::Member => "member",
        }
    }

    /// Get the display name for this role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::TeamLeader => "Team Leader",
            Role::Member => "Member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "team_leader" | "leader" => Ok(Role::TeamLeader),
            "member" => Ok(Role::Member),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// A user profile as returned by `/users`, `/users/{username}` and `/users/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: Role,
    pub active: bool,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Status label shown next to the account in listings
    pub fn status_display(&self) -> &'static str {
        if self.active {
            "active"
        } else {
            "pending activation"
        }
    }
}

/// Signup payload for `POST /users`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Body returned by the `/users/token` login endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}
