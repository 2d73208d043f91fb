//! Invitation acceptance
//!
//! Turns an invitation into a membership for the authenticated user. Every
//! step is safe to repeat: a duplicate membership insert counts as success
//! and the acceptance marker is only set once.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::InvitationLedger;
use crate::identity::IdentityUser;
use crate::org::{
    ensure_seat_available, InviteRole, Membership, OrgRepository, OrgRole, SeatUsage,
};
use crate::{Error, Result};

/// What acceptance did to the membership table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    Created,
    Upgraded,
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Acceptance {
    pub org_id: Uuid,
    pub role: OrgRole,
    pub change: MembershipChange,
}

#[derive(Clone)]
pub struct AcceptanceEngine {
    repo: Arc<dyn OrgRepository>,
    ledger: InvitationLedger,
}

impl AcceptanceEngine {
    pub fn new(repo: Arc<dyn OrgRepository>) -> Self {
        Self {
            ledger: InvitationLedger::new(Arc::clone(&repo)),
            repo,
        }
    }

    pub async fn accept(&self, invitation_id: Uuid, user: &IdentityUser) -> Result<Acceptance> {
        let invitation = self.ledger.lookup(invitation_id).await?;

        if user.email.trim().to_lowercase() != invitation.email {
            warn!(
                "User {} tried to accept invitation {} addressed to another email",
                user.id, invitation.id
            );
            return Err(Error::EmailMismatch);
        }

        let org_id = invitation.org_id;
        let existing = self.repo.get_membership(org_id, user.id).await?;
        let subscription = self.repo.get_subscription(org_id).await?;
        let members = self.repo.list_memberships(org_id).await?;
        let usage = SeatUsage::from_members(&members);

        let (role, change) = match existing {
            Some(member) if member.role == OrgRole::Viewer && invitation.role == InviteRole::Editor => {
                ensure_seat_available(subscription.as_ref(), &usage, invitation.role.seat_tier())?;
                let updated = self
                    .repo
                    .update_membership_role(org_id, user.id, OrgRole::Editor)
                    .await?;
                (updated.role, MembershipChange::Upgraded)
            }
            Some(member) => (member.role, MembershipChange::Unchanged),
            None => {
                ensure_seat_available(subscription.as_ref(), &usage, invitation.role.seat_tier())?;
                let membership =
                    Membership::new(org_id, user.id, invitation.email.clone(), invitation.role.into());
                match self.repo.insert_membership(membership).await {
                    Ok(created) => (created.role, MembershipChange::Created),
                    Err(Error::DuplicateMembership { .. }) => {
                        debug!(
                            "Membership for {} in {} already created by a concurrent acceptance",
                            user.id, org_id
                        );
                        (invitation.role.as_org_role(), MembershipChange::Unchanged)
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        self.ledger.mark_accepted(invitation.id, user.id).await?;
        info!(
            "Invitation {} accepted by {} into {} as {} ({:?})",
            invitation.id, user.id, org_id, role, change
        );
        Ok(Acceptance {
            org_id,
            role,
            change,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::identity::UserMetadata;
    use crate::invite::Invitation;
    use crate::org::{FileOrgStore, SeatTier, Subscription, SubscriptionStatus};

    struct Fixture {
        repo: Arc<dyn OrgRepository>,
        engine: AcceptanceEngine,
        owner: Membership,
        _temp: TempDir,
    }

    async fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let repo: Arc<dyn OrgRepository> = Arc::new(FileOrgStore::new(temp.path()).await.unwrap());
        let (_, owner) = repo
            .create_organization("Acme", Uuid::new_v4(), "owner@example.com")
            .await
            .unwrap();
        Fixture {
            engine: AcceptanceEngine::new(Arc::clone(&repo)),
            repo,
            owner,
            _temp: temp,
        }
    }

    fn user(email: &str) -> IdentityUser {
        IdentityUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            email_confirmed_at: Some(chrono::Utc::now()),
            metadata: UserMetadata::default(),
        }
    }

    impl Fixture {
        async fn invite(&self, email: &str, role: InviteRole) -> Invitation {
            self.repo
                .insert_invitation(Invitation::new(
                    self.owner.org_id,
                    email,
                    role,
                    self.owner.user_id,
                ))
                .await
                .unwrap()
        }

        async fn add_member(&self, role: OrgRole) -> Membership {
            let id = Uuid::new_v4();
            self.repo
                .insert_membership(Membership::new(
                    self.owner.org_id,
                    id,
                    format!("{}@example.com", id),
                    role,
                ))
                .await
                .unwrap()
        }

        async fn subscribe(&self, status: SubscriptionStatus, editors: u32, viewers: u32) {
            self.repo
                .upsert_subscription(Subscription::new(self.owner.org_id, status, editors, viewers))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn accepting_twice_yields_one_membership() {
        let fx = fixture().await;
        let invitation = fx.invite("bob@example.com", InviteRole::Editor).await;
        let bob = user("Bob@Example.com");

        let first = fx.engine.accept(invitation.id, &bob).await.unwrap();
        assert_eq!(first.change, MembershipChange::Created);
        let second = fx.engine.accept(invitation.id, &bob).await.unwrap();
        assert_eq!(second.change, MembershipChange::Unchanged);

        let members = fx.repo.list_memberships(fx.owner.org_id).await.unwrap();
        assert_eq!(members.iter().filter(|m| m.user_id == bob.id).count(), 1);
        let stored = fx.repo.get_invitation(invitation.id).await.unwrap().unwrap();
        assert_eq!(stored.accepted_by, Some(bob.id));
        assert!(stored.accepted_at.is_some());
    }

    #[tokio::test]
    async fn concurrent_acceptances_both_succeed() {
        let fx = fixture().await;
        let invitation = fx.invite("bob@example.com", InviteRole::Viewer).await;
        let bob = user("bob@example.com");

        let (a, b) = tokio::join!(
            fx.engine.accept(invitation.id, &bob),
            fx.engine.accept(invitation.id, &bob)
        );
        a.unwrap();
        b.unwrap();
        let members = fx.repo.list_memberships(fx.owner.org_id).await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn wrong_account_is_rejected_even_with_free_seats() {
        let fx = fixture().await;
        let invitation = fx.invite("a@x.com", InviteRole::Viewer).await;

        let err = fx.engine.accept(invitation.id, &user("b@x.com")).await.unwrap_err();
        assert!(matches!(err, Error::EmailMismatch));
        let stored = fx.repo.get_invitation(invitation.id).await.unwrap().unwrap();
        assert!(stored.is_pending());
    }

    #[tokio::test]
    async fn editor_seat_boundary_is_exact() {
        let fx = fixture().await;
        fx.subscribe(SubscriptionStatus::Active, 2, 5).await;
        let invitation = fx.invite("bob@example.com", InviteRole::Editor).await;

        // Owner alone: one of two editor seats used.
        let ok = fx.engine.accept(invitation.id, &user("bob@example.com")).await;
        assert!(ok.is_ok());

        let invitation = fx.invite("carol@example.com", InviteRole::Editor).await;
        let err = fx
            .engine
            .accept(invitation.id, &user("carol@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SeatLimitExceeded(SeatTier::Editor)));
    }

    #[tokio::test]
    async fn no_active_subscription_skips_seat_checks() {
        let fx = fixture().await;
        for _ in 0..5 {
            fx.add_member(OrgRole::Editor).await;
        }
        let invitation = fx.invite("bob@example.com", InviteRole::Editor).await;
        fx.engine
            .accept(invitation.id, &user("bob@example.com"))
            .await
            .unwrap();

        fx.subscribe(SubscriptionStatus::Canceled, 1, 1).await;
        let invitation = fx.invite("carol@example.com", InviteRole::Editor).await;
        fx.engine
            .accept(invitation.id, &user("carol@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn viewer_upgrade_requires_editor_seat() {
        let fx = fixture().await;
        fx.subscribe(SubscriptionStatus::Trialing, 1, 5).await;
        let viewer = fx.add_member(OrgRole::Viewer).await;
        let invitation = fx.invite(&viewer.email, InviteRole::Editor).await;
        let identity = IdentityUser {
            id: viewer.user_id,
            ..user(&viewer.email)
        };

        let err = fx.engine.accept(invitation.id, &identity).await.unwrap_err();
        assert!(matches!(err, Error::SeatLimitExceeded(SeatTier::Editor)));

        fx.subscribe(SubscriptionStatus::Trialing, 2, 5).await;
        let accepted = fx.engine.accept(invitation.id, &identity).await.unwrap();
        assert_eq!(accepted.change, MembershipChange::Upgraded);
        let member = fx
            .repo
            .get_membership(fx.owner.org_id, viewer.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(member.role, OrgRole::Editor);
        assert!(member.can_edit);
    }

    #[tokio::test]
    async fn existing_editor_accepting_viewer_invite_keeps_role() {
        let fx = fixture().await;
        let editor = fx.add_member(OrgRole::Editor).await;
        let invitation = fx.invite(&editor.email, InviteRole::Viewer).await;
        let identity = IdentityUser {
            id: editor.user_id,
            ..user(&editor.email)
        };

        let accepted = fx.engine.accept(invitation.id, &identity).await.unwrap();
        assert_eq!(accepted.change, MembershipChange::Unchanged);
        assert_eq!(accepted.role, OrgRole::Editor);
    }

    #[tokio::test]
    async fn unknown_invitation_is_not_found() {
        let fx = fixture().await;
        let err = fx
            .engine
            .accept(Uuid::new_v4(), &user("bob@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
