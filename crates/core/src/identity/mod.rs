//! Identity service interface
//!
//! The identity provider owns users, passwords and sessions. This module
//! defines the operations the invitation flow needs from it, plus two
//! providers: a GoTrue-compatible HTTP client and a file-backed local one.

mod local;
mod remote;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::org::InviteRole;

pub use local::{pkce_challenge, LocalIdentity, LocalIdentityConfig};
pub use remote::{RemoteIdentity, RemoteIdentityConfig};

/// Kind of one-time email link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpType {
    Invite,
    Signup,
    Recovery,
    Magiclink,
    EmailChange,
}

impl OtpType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invite => "invite",
            Self::Signup => "signup",
            Self::Recovery => "recovery",
            Self::Magiclink => "magiclink",
            Self::EmailChange => "email_change",
        }
    }
}

impl fmt::Display for OtpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OtpType {
    type Err = IdentityError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "invite" => Ok(Self::Invite),
            "signup" => Ok(Self::Signup),
            "recovery" => Ok(Self::Recovery),
            "magiclink" => Ok(Self::Magiclink),
            "email_change" => Ok(Self::EmailChange),
            other => Err(IdentityError::InvalidCredentials(format!(
                "Unsupported link type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default)]
    pub has_password: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invited_role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityUser {
    pub id: Uuid,
    pub email: String,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: UserMetadata,
}

impl IdentityUser {
    pub fn has_password(&self) -> bool {
        self.metadata.has_password
    }

    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some()
    }
}

/// An authenticated session issued by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds the access token stays valid from issuance
    pub expires_in: i64,
    pub user: IdentityUser,
}

/// A link the provider issued (and, for remote providers, already emailed)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedLink {
    pub email: String,
    pub kind: OtpType,
    pub redirect_to: String,
    /// Present when the provider hands the link back instead of mailing it
    pub action_link: Option<String>,
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("link expired: {0}")]
    LinkExpired(String),
    #[error("user already registered")]
    AlreadyRegistered,
    #[error("user not found")]
    UserNotFound,
    #[error("rate limited by identity provider")]
    RateLimited,
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
    #[error("identity provider error ({status}): {message}")]
    Provider { status: u16, message: String },
}

impl IdentityError {
    /// Errors that mean the link is unusable and a fresh one should be offered.
    pub fn needs_new_link(&self) -> bool {
        matches!(self, Self::LinkExpired(_) | Self::InvalidCredentials(_))
    }
}

pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Issue an invitation link, creating the user if needed
    async fn invite_user(
        &self,
        email: &str,
        redirect_to: &str,
        role_hint: Option<InviteRole>,
    ) -> IdentityResult<IssuedLink>;

    async fn send_recovery(&self, email: &str, redirect_to: &str) -> IdentityResult<IssuedLink>;

    async fn send_magic_link(&self, email: &str, redirect_to: &str)
        -> IdentityResult<IssuedLink>;

    async fn verify_otp(
        &self,
        token: &str,
        kind: OtpType,
        email: Option<&str>,
    ) -> IdentityResult<Session>;

    async fn exchange_code(&self, code: &str, verifier: Option<&str>) -> IdentityResult<Session>;

    /// Re-establishing with a still-valid pair returns the same tokens
    async fn set_session(&self, access_token: &str, refresh_token: &str)
        -> IdentityResult<Session>;

    async fn get_user(&self, access_token: &str) -> IdentityResult<IdentityUser>;

    /// Sets the password and the `has_password` flag
    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> IdentityResult<IdentityUser>;

    async fn find_user_by_email(&self, email: &str) -> IdentityResult<Option<IdentityUser>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otp_type_parses_known_kinds_only() {
        for kind in [
            OtpType::Invite,
            OtpType::Signup,
            OtpType::Recovery,
            OtpType::Magiclink,
            OtpType::EmailChange,
        ] {
            assert_eq!(kind.as_str().parse::<OtpType>().unwrap(), kind);
        }
        assert!("pkce".parse::<OtpType>().is_err());
    }

    #[test]
    fn metadata_defaults_to_no_password() {
        let user: IdentityUser = serde_json::from_value(serde_json::json!({
            "id": Uuid::new_v4(),
            "email": "a@example.com",
            "emailConfirmedAt": null
        }))
        .unwrap();
        assert!(!user.has_password());
        assert!(!user.is_confirmed());
    }
}
