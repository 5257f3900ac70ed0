use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub school: Option<String>,
    pub price_per_eval_cents: Option<i64>,
    /// Connected payout account for scouts.
    pub payout_account_id: Option<String>,
    pub suspended_until: Option<DateTime<Utc>>,
    pub suspended_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn display_name(&self) -> &str {
        if self.full_name.trim().is_empty() {
            match self.role {
                Role::Scout => "Scout",
                Role::Player => "Player",
                _ => "User",
            }
        } else {
            &self.full_name
        }
    }

    pub fn is_suspended_at(&self, now: DateTime<Utc>) -> bool {
        self.suspended_until.map(|until| until > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    Scout,
    Parent,
    Admin,
    HighSchool,
    /// Basic account without player or scout capabilities.
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Player => "player",
            Role::Scout => "scout",
            Role::Parent => "parent",
            Role::Admin => "admin",
            Role::HighSchool => "high_school",
            Role::User => "user",
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
        match s {
            "player" => Ok(Role::Player),
            "scout" => Ok(Role::Scout),
            "parent" => Ok(Role::Parent),
            "admin" => Ok(Role::Admin),
            "high_school" => Ok(Role::HighSchool),
            "user" => Ok(Role::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileRequest {
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub school: Option<String>,
    pub password: Option<String>,
}

/// Who is performing an operation. Built per request from the session and
/// passed explicitly into every service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Profile { id: Uuid, role: Role },
    /// Scheduled or internal work such as the expiry sweep.
    System,
}

impl Actor {
    pub fn from_profile(profile: &Profile) -> Self {
        Actor::Profile {
            id: profile.id,
            role: profile.role,
        }
    }

    pub fn id(&self) -> Option<Uuid> {
        match self {
            Actor::Profile { id, .. } => Some(*id),
            Actor::System => None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            Actor::Profile { role, .. } => Some(*role),
            Actor::System => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Profile { role: Role::Admin, .. } | Actor::System)
    }

    pub fn is(&self, profile_id: Uuid) -> bool {
        self.id() == Some(profile_id)
    }
}
