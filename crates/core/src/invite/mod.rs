//! Invitation module
//!
//! The invitation ledger, acceptance and link resending.

mod acceptance;
mod ledger;
mod model;
mod resend;

pub use acceptance::{Acceptance, AcceptanceEngine, MembershipChange};
pub use ledger::InvitationLedger;
pub use model::{normalize_email, CreatedInvitation, Invitation};
pub use resend::{
    plan_resend, AccountState, EmailMode, ResendOutcome, ResendService, ResendTarget,
    LANDING_PATH,
};
