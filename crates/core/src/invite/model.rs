//! Invitation model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::org::InviteRole;
use crate::{Error, Result};

/// A pending or accepted invitation into an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    pub id: Uuid,
    pub org_id: Uuid,
    /// Always stored trimmed and lowercased
    pub email: String,
    pub role: InviteRole,
    pub invited_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub accepted_by: Option<Uuid>,
}

impl Invitation {
    pub fn new(org_id: Uuid, email: impl Into<String>, role: InviteRole, invited_by: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            email: email.into(),
            role,
            invited_by,
            created_at: Utc::now(),
            accepted_at: None,
            accepted_by: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.accepted_at.is_none()
    }
}

/// Result of `InvitationLedger::create`
#[derive(Debug, Clone)]
pub struct CreatedInvitation {
    pub invitation: Invitation,
    /// True when an existing pending invitation was returned instead of a new row
    pub duplicate: bool,
}

pub fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    let valid = normalized
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !valid || normalized.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput("Invalid email".to_string()));
    }
    Ok(normalized)
}
