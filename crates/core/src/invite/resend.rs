//! Resend and escalation
//!
//! Picks the identity primitive for a fresh link from the invitee's account
//! state. The mode is reported back so callers can word the confirmation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::ledger::InvitationLedger;
use super::model::{normalize_email, Invitation};
use crate::identity::{IdentityError, IdentityService, IdentityUser, IssuedLink};
use crate::org::{InviteRole, OrgRepository};
use crate::{Error, Result};

/// Landing page every emailed link points at
pub const LANDING_PATH: &str = "/auth/accept";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountState {
    NewUser,
    Unconfirmed,
    NoPassword,
    HasPassword,
}

impl AccountState {
    pub fn of(user: Option<&IdentityUser>) -> Self {
        match user {
            None => Self::NewUser,
            Some(user) if !user.is_confirmed() => Self::Unconfirmed,
            Some(user) if !user.has_password() => Self::NoPassword,
            Some(_) => Self::HasPassword,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailMode {
    Invite,
    PasswordReset,
    MagicLink,
}

impl fmt::Display for EmailMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Invite => "invite",
            Self::PasswordReset => "password-reset",
            Self::MagicLink => "magic-link",
        })
    }
}

pub fn plan_resend(state: AccountState) -> EmailMode {
    match state {
        AccountState::NewUser | AccountState::Unconfirmed => EmailMode::Invite,
        AccountState::NoPassword => EmailMode::PasswordReset,
        AccountState::HasPassword => EmailMode::MagicLink,
    }
}

/// What a resend is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResendTarget {
    Invitation(Uuid),
    Email(String),
}

#[derive(Debug, Clone)]
pub struct ResendOutcome {
    pub state: AccountState,
    pub mode: EmailMode,
    pub link: IssuedLink,
}

#[derive(Clone)]
pub struct ResendService {
    identity: Arc<dyn IdentityService>,
    ledger: InvitationLedger,
    site_url: Url,
}

impl ResendService {
    pub fn new(
        repo: Arc<dyn OrgRepository>,
        identity: Arc<dyn IdentityService>,
        site_url: &str,
    ) -> Result<Self> {
        let site_url = Url::parse(site_url)
            .map_err(|e| Error::InvalidInput(format!("Invalid site URL '{}': {}", site_url, e)))?;
        Ok(Self {
            identity,
            ledger: InvitationLedger::new(repo),
            site_url,
        })
    }

    /// `{site}/auth/accept?em=<email>[&inviteId=<id>]`
    pub fn landing_url(&self, email: &str, invitation_id: Option<Uuid>) -> String {
        let mut url = self.site_url.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base, LANDING_PATH));
        url.set_fragment(None);
        {
            let mut query = url.query_pairs_mut();
            query.clear().append_pair("em", email);
            if let Some(id) = invitation_id {
                query.append_pair("inviteId", &id.to_string());
            }
        }
        url.to_string()
    }

    pub async fn resend(&self, target: &ResendTarget) -> Result<ResendOutcome> {
        match target {
            ResendTarget::Invitation(id) => {
                let invitation = self.ledger.lookup(*id).await?;
                if !invitation.is_pending() {
                    return Err(Error::Conflict("Invitation already accepted".to_string()));
                }
                self.dispatch(&invitation).await
            }
            ResendTarget::Email(email) => {
                let email = normalize_email(email)?;
                let user = self.identity.find_user_by_email(&email).await?;
                let state = AccountState::of(user.as_ref());
                let redirect = self.landing_url(&email, None);
                self.send_with_fallback(state, &email, &redirect, None).await
            }
        }
    }

    /// Send the link for an invitation, as on creation or resend.
    pub async fn dispatch(&self, invitation: &Invitation) -> Result<ResendOutcome> {
        let user = self.identity.find_user_by_email(&invitation.email).await?;
        let state = AccountState::of(user.as_ref());
        let redirect = self.landing_url(&invitation.email, Some(invitation.id));
        self.send_with_fallback(state, &invitation.email, &redirect, Some(invitation.role))
            .await
    }

    /// Always a recovery link; unknown emails report success too.
    pub async fn begin_password(&self, email: &str, invitation_id: Option<Uuid>) -> Result<EmailMode> {
        let email = normalize_email(email)?;
        let redirect = self.landing_url(&email, invitation_id);
        match self.identity.send_recovery(&email, &redirect).await {
            Ok(_) => info!("Sent password link to {}", email),
            Err(IdentityError::UserNotFound) => {
                warn!("Password link requested for unknown email {}", email)
            }
            Err(err) => return Err(err.into()),
        }
        Ok(EmailMode::PasswordReset)
    }

    async fn send_with_fallback(
        &self,
        state: AccountState,
        email: &str,
        redirect: &str,
        role: Option<InviteRole>,
    ) -> Result<ResendOutcome> {
        let mode = plan_resend(state);
        match self.send(mode, email, redirect, role).await {
            Ok(link) => {
                info!("Sent {} link to {} ({:?})", mode, email, state);
                Ok(ResendOutcome { state, mode, link })
            }
            Err(IdentityError::AlreadyRegistered) if mode == EmailMode::Invite => {
                warn!("{} registered meanwhile, falling back to password reset", email);
                let mode = EmailMode::PasswordReset;
                let link = self.send(mode, email, redirect, role).await?;
                Ok(ResendOutcome { state, mode, link })
            }
            Err(err) => {
                warn!("Failed to send {} link to {}: {}", mode, email, err);
                Err(err.into())
            }
        }
    }

    async fn send(
        &self,
        mode: EmailMode,
        email: &str,
        redirect: &str,
        role: Option<InviteRole>,
    ) -> std::result::Result<IssuedLink, IdentityError> {
        match mode {
            EmailMode::Invite => self.identity.invite_user(email, redirect, role).await,
            EmailMode::PasswordReset => self.identity.send_recovery(email, redirect).await,
            EmailMode::MagicLink => self.identity.send_magic_link(email, redirect).await,
        }
    }
}
