//! Owner actions on memberships

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::model::{InviteRole, Membership, OrgRole};
use super::repository::OrgRepository;
use super::seats::{ensure_seat_available, SeatSummary, SeatUsage};
use crate::{Error, Result};

#[derive(Clone)]
pub struct MemberService {
    repo: Arc<dyn OrgRepository>,
}

fn require_owner(actor: &Membership) -> Result<()> {
    if !actor.role.can_manage_members() {
        return Err(Error::Forbidden("Only owners can manage members".to_string()));
    }
    Ok(())
}

impl MemberService {
    pub fn new(repo: Arc<dyn OrgRepository>) -> Self {
        Self { repo }
    }

    /// Add an already-registered user directly, superseding any pending invitation.
    pub async fn add_existing_user(
        &self,
        actor: &Membership,
        user_id: Uuid,
        email: &str,
        role: InviteRole,
    ) -> Result<Membership> {
        require_owner(actor)?;
        let org_id = actor.org_id;
        if self.repo.get_membership(org_id, user_id).await?.is_some() {
            return Err(Error::DuplicateMembership { org_id, user_id });
        }

        let subscription = self.repo.get_subscription(org_id).await?;
        let members = self.repo.list_memberships(org_id).await?;
        let mut pending = self.repo.list_pending_invitations(org_id).await?;
        let superseded: Vec<Uuid> = pending
            .iter()
            .filter(|inv| inv.email == email)
            .map(|inv| inv.id)
            .collect();
        pending.retain(|inv| inv.email != email);
        let usage = SeatUsage::with_pending(&members, &pending);
        ensure_seat_available(subscription.as_ref(), &usage, role.seat_tier())?;

        let membership = self
            .repo
            .insert_membership(Membership::new(org_id, user_id, email, role.into()))
            .await?;
        for invitation_id in superseded {
            self.repo.delete_invitation(invitation_id).await?;
        }
        info!(
            "Added {} to organization {} as {}",
            user_id, org_id, membership.role
        );
        Ok(membership)
    }

    pub async fn change_role(
        &self,
        actor: &Membership,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<Membership> {
        require_owner(actor)?;
        let org_id = actor.org_id;
        let target = self
            .repo
            .get_membership(org_id, user_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Member {} not found", user_id)))?;
        if target.role == role {
            return Ok(target);
        }

        if target.role.seat_tier() != role.seat_tier() {
            let subscription = self.repo.get_subscription(org_id).await?;
            let members = self.repo.list_memberships(org_id).await?;
            let usage = SeatUsage::from_members(&members);
            ensure_seat_available(subscription.as_ref(), &usage, role.seat_tier())?;
        }

        let updated = self.repo.update_membership_role(org_id, user_id, role).await?;
        info!(
            "Changed role of {} in organization {} from {} to {}",
            user_id, org_id, target.role, updated.role
        );
        Ok(updated)
    }

    pub async fn remove(&self, actor: &Membership, user_id: Uuid) -> Result<Membership> {
        require_owner(actor)?;
        let removed = self.repo.delete_membership(actor.org_id, user_id).await?;
        info!("Removed {} from organization {}", user_id, actor.org_id);
        Ok(removed)
    }

    pub async fn seat_summary(&self, org_id: Uuid) -> Result<SeatSummary> {
        let subscription = self.repo.get_subscription(org_id).await?;
        let members = self.repo.list_memberships(org_id).await?;
        let pending = self.repo.list_pending_invitations(org_id).await?;
        Ok(SeatSummary::build(
            org_id,
            subscription.as_ref(),
            &members,
            &pending,
        ))
    }
}
