//! File-based org store implementation
//!
//! Keeps organizations, memberships, subscriptions and invitations in one
//! JSON document. Every mutation runs under the write lock on a copy of the
//! state, which replaces the in-memory state only once it is on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::model::{Membership, OrgRole, Organization, Subscription};
use super::repository::OrgRepository;
use crate::invite::Invitation;
use crate::{Error, Result};

#[derive(Debug, Default, Clone)]
struct OrgState {
    organizations: HashMap<Uuid, Organization>,
    memberships: HashMap<(Uuid, Uuid), Membership>,
    subscriptions: HashMap<Uuid, Subscription>,
    invitations: HashMap<Uuid, Invitation>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredOrgState {
    organizations: Vec<Organization>,
    memberships: Vec<Membership>,
    subscriptions: Vec<Subscription>,
    invitations: Vec<Invitation>,
}

impl From<StoredOrgState> for OrgState {
    fn from(value: StoredOrgState) -> Self {
        Self {
            organizations: value
                .organizations
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            memberships: value
                .memberships
                .into_iter()
                .map(|item| ((item.org_id, item.user_id), item))
                .collect(),
            subscriptions: value
                .subscriptions
                .into_iter()
                .map(|item| (item.org_id, item))
                .collect(),
            invitations: value
                .invitations
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
        }
    }
}

impl From<&OrgState> for StoredOrgState {
    fn from(value: &OrgState) -> Self {
        Self {
            organizations: value.organizations.values().cloned().collect(),
            memberships: value.memberships.values().cloned().collect(),
            subscriptions: value.subscriptions.values().cloned().collect(),
            invitations: value.invitations.values().cloned().collect(),
        }
    }
}

impl OrgState {
    fn owner_count(&self, org_id: Uuid) -> usize {
        self.memberships
            .values()
            .filter(|m| m.org_id == org_id && m.role == OrgRole::Owner)
            .count()
    }

    fn ensure_org(&self, org_id: Uuid) -> Result<()> {
        if !self.organizations.contains_key(&org_id) {
            return Err(Error::NotFound(format!("Organization {} not found", org_id)));
        }
        Ok(())
    }
}

/// JSON-file-backed org store
#[derive(Clone)]
pub struct FileOrgStore {
    state: Arc<RwLock<OrgState>>,
    file_path: PathBuf,
}

impl FileOrgStore {
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await?;

        let file_path = base_dir.join("orgs.json");
        let state = load_state(&file_path).await?;

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }
}

#[async_trait]
impl OrgRepository for FileOrgStore {
    async fn create_organization(
        &self,
        name: &str,
        owner_id: Uuid,
        owner_email: &str,
    ) -> Result<(Organization, Membership)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Organization name cannot be empty".to_string(),
            ));
        }

        let organization = Organization::new(name);
        let membership = Membership::new(organization.id, owner_id, owner_email, OrgRole::Owner);

        let mut state = self.state.write().await;
        commit(&self.file_path, &mut state, |next| {
            next.organizations
                .insert(organization.id, organization.clone());
            next.memberships
                .insert((organization.id, owner_id), membership.clone());
            Ok(())
        })
        .await?;
        Ok((organization, membership))
    }

    async fn get_organization(&self, org_id: Uuid) -> Result<Option<Organization>> {
        let state = self.state.read().await;
        Ok(state.organizations.get(&org_id).cloned())
    }

    async fn get_subscription(&self, org_id: Uuid) -> Result<Option<Subscription>> {
        let state = self.state.read().await;
        Ok(state.subscriptions.get(&org_id).cloned())
    }

    async fn upsert_subscription(&self, mut subscription: Subscription) -> Result<Subscription> {
        let mut state = self.state.write().await;
        state.ensure_org(subscription.org_id)?;
        subscription.updated_at = Utc::now();
        commit(&self.file_path, &mut state, |next| {
            next.subscriptions
                .insert(subscription.org_id, subscription.clone());
            Ok(())
        })
        .await?;
        Ok(subscription)
    }

    async fn get_membership(&self, org_id: Uuid, user_id: Uuid) -> Result<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state.memberships.get(&(org_id, user_id)).cloned())
    }

    async fn list_memberships(&self, org_id: Uuid) -> Result<Vec<Membership>> {
        let state = self.state.read().await;
        let mut members: Vec<Membership> = state
            .memberships
            .values()
            .filter(|m| m.org_id == org_id)
            .cloned()
            .collect();
        members.sort_by(|left, right| left.email.cmp(&right.email));
        Ok(members)
    }

    async fn list_memberships_for_user(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        let state = self.state.read().await;
        let mut members: Vec<Membership> = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        members.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(members)
    }

    async fn insert_membership(&self, membership: Membership) -> Result<Membership> {
        let key = (membership.org_id, membership.user_id);
        let mut state = self.state.write().await;
        state.ensure_org(membership.org_id)?;
        if state.memberships.contains_key(&key) {
            return Err(Error::DuplicateMembership {
                org_id: membership.org_id,
                user_id: membership.user_id,
            });
        }
        commit(&self.file_path, &mut state, |next| {
            next.memberships.insert(key, membership.clone());
            Ok(())
        })
        .await?;
        Ok(membership)
    }

    async fn update_membership_role(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        role: OrgRole,
    ) -> Result<Membership> {
        let mut state = self.state.write().await;
        let current = state
            .memberships
            .get(&(org_id, user_id))
            .map(|m| m.role)
            .ok_or_else(|| Error::NotFound(format!("Member {} not found", user_id)))?;
        if current == role {
            return Ok(state.memberships[&(org_id, user_id)].clone());
        }
        if current == OrgRole::Owner && state.owner_count(org_id) <= 1 {
            return Err(Error::LastOwner);
        }

        commit(&self.file_path, &mut state, |next| {
            let membership = next
                .memberships
                .get_mut(&(org_id, user_id))
                .ok_or_else(|| Error::NotFound(format!("Member {} not found", user_id)))?;
            membership.set_role(role);
            Ok(membership.clone())
        })
        .await
    }

    async fn delete_membership(&self, org_id: Uuid, user_id: Uuid) -> Result<Membership> {
        let mut state = self.state.write().await;
        let role = state
            .memberships
            .get(&(org_id, user_id))
            .map(|m| m.role)
            .ok_or_else(|| Error::NotFound(format!("Member {} not found", user_id)))?;
        if role == OrgRole::Owner && state.owner_count(org_id) <= 1 {
            return Err(Error::LastOwner);
        }

        commit(&self.file_path, &mut state, |next| {
            next.memberships
                .remove(&(org_id, user_id))
                .ok_or_else(|| Error::NotFound(format!("Member {} not found", user_id)))
        })
        .await
    }

    async fn insert_invitation(&self, invitation: Invitation) -> Result<Invitation> {
        let mut state = self.state.write().await;
        state.ensure_org(invitation.org_id)?;
        if let Some(existing) = state.invitations.values().find(|inv| {
            inv.is_pending() && inv.org_id == invitation.org_id && inv.email == invitation.email
        }) {
            return Err(Error::DuplicateInvitation(existing.id));
        }
        commit(&self.file_path, &mut state, |next| {
            next.invitations.insert(invitation.id, invitation.clone());
            Ok(())
        })
        .await?;
        Ok(invitation)
    }

    async fn get_invitation(&self, invitation_id: Uuid) -> Result<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state.invitations.get(&invitation_id).cloned())
    }

    async fn find_pending_invitation(
        &self,
        org_id: Uuid,
        email: &str,
    ) -> Result<Option<Invitation>> {
        let state = self.state.read().await;
        Ok(state
            .invitations
            .values()
            .find(|inv| inv.is_pending() && inv.org_id == org_id && inv.email == email)
            .cloned())
    }

    async fn list_pending_invitations(&self, org_id: Uuid) -> Result<Vec<Invitation>> {
        let state = self.state.read().await;
        let mut invitations: Vec<Invitation> = state
            .invitations
            .values()
            .filter(|inv| inv.is_pending() && inv.org_id == org_id)
            .cloned()
            .collect();
        invitations.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(invitations)
    }

    async fn mark_invitation_accepted(
        &self,
        invitation_id: Uuid,
        user_id: Uuid,
        accepted_at: DateTime<Utc>,
    ) -> Result<Invitation> {
        let mut state = self.state.write().await;
        let invitation = state
            .invitations
            .get(&invitation_id)
            .ok_or_else(|| Error::NotFound(format!("Invitation {} not found", invitation_id)))?;
        if !invitation.is_pending() {
            debug!("Invitation {} already accepted, leaving it unchanged", invitation_id);
            return Ok(invitation.clone());
        }
        commit(&self.file_path, &mut state, |next| {
            let invitation = next.invitations.get_mut(&invitation_id).ok_or_else(|| {
                Error::NotFound(format!("Invitation {} not found", invitation_id))
            })?;
            invitation.accepted_at = Some(accepted_at);
            invitation.accepted_by = Some(user_id);
            Ok(invitation.clone())
        })
        .await
    }

    async fn delete_invitation(&self, invitation_id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.invitations.contains_key(&invitation_id) {
            return Ok(false);
        }
        commit(&self.file_path, &mut state, |next| {
            next.invitations.remove(&invitation_id);
            Ok(true)
        })
        .await
    }
}

async fn load_state(path: &Path) -> Result<OrgState> {
    if !path.exists() {
        return Ok(OrgState::default());
    }
    let content = tokio::fs::read_to_string(path).await?;
    if content.trim().is_empty() {
        return Ok(OrgState::default());
    }
    let stored: StoredOrgState = serde_json::from_str(&content)?;
    Ok(stored.into())
}

/// Apply `change` to a copy of `state` and swap it in once persisted.
async fn commit<T>(
    path: &Path,
    state: &mut OrgState,
    change: impl FnOnce(&mut OrgState) -> Result<T>,
) -> Result<T> {
    let mut next = state.clone();
    let value = change(&mut next)?;
    persist_state(path, &next).await?;
    *state = next;
    Ok(value)
}

async fn persist_state(path: &Path, state: &OrgState) -> Result<()> {
    let content = serde_json::to_string_pretty(&StoredOrgState::from(state))?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write org state: {}", err)))?;
    Ok(())
}
