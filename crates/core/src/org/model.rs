//! Organization, membership and subscription definitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Role of a user inside one organization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgRole {
    Owner,
    Editor,
    Viewer,
}

impl OrgRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Editor => "editor",
            Self::Viewer => "viewer",
        }
    }

    pub fn can_edit(self) -> bool {
        !matches!(self, Self::Viewer)
    }

    pub fn can_manage_members(self) -> bool {
        matches!(self, Self::Owner)
    }

    /// Billing tier the role occupies. Owners are billed as editors.
    pub fn seat_tier(self) -> SeatTier {
        match self {
            Self::Owner | Self::Editor => SeatTier::Editor,
            Self::Viewer => SeatTier::Viewer,
        }
    }
}

impl fmt::Display for OrgRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgRole {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "editor" => Ok(Self::Editor),
            "viewer" => Ok(Self::Viewer),
            _ => Err(Error::InvalidInput(format!("Unsupported role '{}'", value))),
        }
    }
}

/// Role that can be granted by invitation or direct add. Ownership is never granted that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteRole {
    Editor,
    Viewer,
}

impl InviteRole {
    pub fn as_org_role(self) -> OrgRole {
        match self {
            Self::Editor => OrgRole::Editor,
            Self::Viewer => OrgRole::Viewer,
        }
    }

    pub fn seat_tier(self) -> SeatTier {
        self.as_org_role().seat_tier()
    }
}

impl From<InviteRole> for OrgRole {
    fn from(value: InviteRole) -> Self {
        value.as_org_role()
    }
}

impl fmt::Display for InviteRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_org_role().as_str())
    }
}

impl FromStr for InviteRole {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match OrgRole::from_str(value)? {
            OrgRole::Editor => Ok(Self::Editor),
            OrgRole::Viewer => Ok(Self::Viewer),
            OrgRole::Owner => Err(Error::InvalidInput(
                "Invitations can only grant editor or viewer".to_string(),
            )),
        }
    }
}

/// Billing tier for seat counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatTier {
    Editor,
    Viewer,
}

impl fmt::Display for SeatTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Editor => f.write_str("editor"),
            Self::Viewer => f.write_str("viewer"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Membership of one user in one organization, unique per (org, user)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub role: OrgRole,
    pub can_edit: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Membership {
    pub fn new(org_id: Uuid, user_id: Uuid, email: impl Into<String>, role: OrgRole) -> Self {
        let now = Utc::now();
        Self {
            org_id,
            user_id,
            email: email.into(),
            role,
            can_edit: role.can_edit(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_role(&mut self, role: OrgRole) {
        self.role = role;
        self.can_edit = role.can_edit();
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Paused,
    Canceled,
    PastDue,
    Incomplete,
    Unpaid,
    #[serde(other)]
    Other,
}

impl SubscriptionStatus {
    /// Statuses under which seat limits are enforced.
    pub fn has_active_sub(self) -> bool {
        matches!(self, Self::Active | Self::Trialing | Self::Paused)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub org_id: Uuid,
    pub status: SubscriptionStatus,
    /// Owners and editors together
    pub seats_editor: u32,
    pub seats_viewer: u32,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(org_id: Uuid, status: SubscriptionStatus, seats_editor: u32, seats_viewer: u32) -> Self {
        Self {
            org_id,
            status,
            seats_editor,
            seats_viewer,
            updated_at: Utc::now(),
        }
    }

    pub fn limit(&self, tier: SeatTier) -> u32 {
        match tier {
            SeatTier::Editor => self.seats_editor,
            SeatTier::Viewer => self.seats_viewer,
        }
    }
}
