//! Invitation ledger
//!
//! At most one unaccepted invitation exists per (org, email). Creating a
//! second one hands back the first, marked as a duplicate.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::model::{normalize_email, CreatedInvitation, Invitation};
use crate::org::{ensure_seat_available, InviteRole, OrgRepository, SeatUsage};
use crate::{Error, Result};

#[derive(Clone)]
pub struct InvitationLedger {
    repo: Arc<dyn OrgRepository>,
}

impl InvitationLedger {
    pub fn new(repo: Arc<dyn OrgRepository>) -> Self {
        Self { repo }
    }

    pub async fn create(
        &self,
        org_id: Uuid,
        email: &str,
        role: InviteRole,
        inviter_id: Uuid,
    ) -> Result<CreatedInvitation> {
        let email = normalize_email(email)?;

        if let Some(existing) = self.repo.find_pending_invitation(org_id, &email).await? {
            debug!("Reusing pending invitation {} for {}", existing.id, email);
            return Ok(CreatedInvitation {
                invitation: existing,
                duplicate: true,
            });
        }

        let subscription = self.repo.get_subscription(org_id).await?;
        let members = self.repo.list_memberships(org_id).await?;
        let pending = self.repo.list_pending_invitations(org_id).await?;
        let usage = SeatUsage::with_pending(&members, &pending);
        if let Err(err) = ensure_seat_available(subscription.as_ref(), &usage, role.seat_tier()) {
            warn!("Rejected invitation of {} into {}: {}", email, org_id, err);
            return Err(err);
        }

        let invitation = Invitation::new(org_id, email, role, inviter_id);
        match self.repo.insert_invitation(invitation).await {
            Ok(invitation) => {
                info!(
                    "Created invitation {} for {} into {} as {}",
                    invitation.id, invitation.email, org_id, invitation.role
                );
                Ok(CreatedInvitation {
                    invitation,
                    duplicate: false,
                })
            }
            // Lost a race with a concurrent create for the same email.
            Err(Error::DuplicateInvitation(existing_id)) => {
                let invitation = self.lookup(existing_id).await?;
                Ok(CreatedInvitation {
                    invitation,
                    duplicate: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn lookup(&self, invitation_id: Uuid) -> Result<Invitation> {
        self.repo
            .get_invitation(invitation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Invitation {} not found", invitation_id)))
    }

    /// Safe to repeat; only the first call sets the marker.
    pub async fn mark_accepted(&self, invitation_id: Uuid, user_id: Uuid) -> Result<Invitation> {
        let invitation = self
            .repo
            .mark_invitation_accepted(invitation_id, user_id, Utc::now())
            .await?;
        debug!("Invitation {} accepted by {:?}", invitation.id, invitation.accepted_by);
        Ok(invitation)
    }

    pub async fn list_pending(&self, org_id: Uuid) -> Result<Vec<Invitation>> {
        self.repo.list_pending_invitations(org_id).await
    }
}
