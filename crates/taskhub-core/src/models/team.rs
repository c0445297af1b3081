use serde::{Deserialize, Serialize};

use crate::utils::format_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub leader_id: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
    pub created_at: String,
}

impl Team {
    /// Check whether a username leads or belongs to this team
    pub fn includes(&self, username: &str) -> bool {
        self.leader_id == username || self.member_ids.iter().any(|m| m == username)
    }

    pub fn is_led_by(&self, username: &str) -> bool {
        self.leader_id == username
    }

    pub fn member_count(&self) -> usize {
        self.member_ids.len()
    }

    pub fn formatted_created_at(&self) -> String {
        format_timestamp(&self.created_at)
    }
}

/// Payload for `POST /teams`.
#[derive(Debug, Clone, Serialize)]
pub struct NewTeam {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub leader_username: String,
}

/// Payload for `PATCH /teams/{id}`. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeamUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TeamUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none()
    }
}
