//! Seat counting and enforcement
//!
//! Counts are always computed from rows read at decision time. Seat limits
//! apply only while the organization's subscription is in an active status.

use serde::Serialize;
use uuid::Uuid;

use super::model::{Membership, SeatTier, Subscription};
use crate::invite::Invitation;
use crate::{Error, Result};

/// Seats in use per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeatUsage {
    pub editors: u32,
    pub viewers: u32,
}

impl SeatUsage {
    pub fn from_members(members: &[Membership]) -> Self {
        let mut usage = Self::default();
        for member in members {
            usage.add(member.role.seat_tier(), 1);
        }
        usage
    }

    /// Members plus pending invitations, as counted when a new invitation is created.
    pub fn with_pending(members: &[Membership], pending: &[Invitation]) -> Self {
        let mut usage = Self::from_members(members);
        for invitation in pending.iter().filter(|inv| inv.is_pending()) {
            usage.add(invitation.role.seat_tier(), 1);
        }
        usage
    }

    pub fn used(&self, tier: SeatTier) -> u32 {
        match tier {
            SeatTier::Editor => self.editors,
            SeatTier::Viewer => self.viewers,
        }
    }

    fn add(&mut self, tier: SeatTier, count: u32) {
        match tier {
            SeatTier::Editor => self.editors += count,
            SeatTier::Viewer => self.viewers += count,
        }
    }
}

pub fn has_active_sub(subscription: Option<&Subscription>) -> bool {
    subscription.is_some_and(|sub| sub.status.has_active_sub())
}

/// Fails with `SeatLimitExceeded` when one more seat of `tier` would exceed the limit.
pub fn ensure_seat_available(
    subscription: Option<&Subscription>,
    usage: &SeatUsage,
    tier: SeatTier,
) -> Result<()> {
    let Some(sub) = subscription.filter(|sub| sub.status.has_active_sub()) else {
        return Ok(());
    };
    if usage.used(tier) >= sub.limit(tier) {
        return Err(Error::SeatLimitExceeded(tier));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSummary {
    pub used: u32,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatSummary {
    pub org_id: Uuid,
    pub has_active_sub: bool,
    pub editors: TierSummary,
    pub viewers: TierSummary,
    pub pending_editors: u32,
    pub pending_viewers: u32,
}

impl SeatSummary {
    pub fn build(
        org_id: Uuid,
        subscription: Option<&Subscription>,
        members: &[Membership],
        pending: &[Invitation],
    ) -> Self {
        let active = has_active_sub(subscription);
        let usage = SeatUsage::from_members(members);
        let with_pending = SeatUsage::with_pending(members, pending);
        let limit = |tier| {
            subscription
                .filter(|_| active)
                .map(|sub| sub.limit(tier))
        };

        Self {
            org_id,
            has_active_sub: active,
            editors: TierSummary {
                used: usage.editors,
                limit: limit(SeatTier::Editor),
            },
            viewers: TierSummary {
                used: usage.viewers,
                limit: limit(SeatTier::Viewer),
            },
            pending_editors: with_pending.editors - usage.editors,
            pending_viewers: with_pending.viewers - usage.viewers,
        }
    }
}
