//! Org store interface
//!
//! Write operations enforce the store's constraints atomically:
//! one membership per (org, user), one pending invitation per (org, email)
//! and at least one owner per organization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::model::{Membership, OrgRole, Organization, Subscription};
use crate::invite::Invitation;
use crate::Result;

#[async_trait]
pub trait OrgRepository: Send + Sync {
    /// Create an organization with `owner_id` as its first owner
    async fn create_organization(
        &self,
        name: &str,
        owner_id: Uuid,
        owner_email: &str,
    ) -> Result<(Organization, Membership)>;

    async fn get_organization(&self, org_id: Uuid) -> Result<Option<Organization>>;

    async fn get_subscription(&self, org_id: Uuid) -> Result<Option<Subscription>>;

    async fn upsert_subscription(&self, subscription: Subscription) -> Result<Subscription>;

    async fn get_membership(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Membership>>;

    async fn list_memberships(&self, org_id: Uuid) -> Result<Vec<Membership>>;

    /// Memberships of one user, oldest first
    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<Membership>>;

    /// Fails with `DuplicateMembership` when (org, user) already exists
    async fn insert_membership(&self, membership: Membership) -> Result<Membership>;

    /// Fails with `LastOwner` when the change would leave the org without an owner
    async fn update_membership_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<Membership>;

    /// Fails with `LastOwner` when removing the only owner
    async fn delete_membership(&self, org_id: Uuid, user_id: Uuid) -> Result<Membership>;

    /// Fails with `DuplicateInvitation` when a pending one exists for (org, email)
    async fn insert_invitation(&self, invitation: Invitation) -> Result<Invitation>;

    async fn get_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>>;

    async fn find_pending_invitation(&self, org_id: Uuid, email: &str)
        -> Result<Option<Invitation>>;

    async fn list_pending_invitations(&self, org_id: Uuid) -> Result<Vec<Invitation>>;

    /// Sets the acceptance marker once; later calls return the stored invitation unchanged
    async fn mark_invitation_accepted(
        &self,
        invitation_id: Uuid,
        user_id: Uuid,
        accepted_at: DateTime<Utc>,
    ) -> Result<Invitation>;

    async fn delete_invitation(&self, invitation_id: Uuid) -> Result<bool>;
}
