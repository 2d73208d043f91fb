//! Organization module
//!
//! Organizations, memberships, subscriptions and seat enforcement.

mod file_store;
mod members;
mod model;
mod repository;
mod seats;

pub use file_store::FileOrgStore;
pub use members::MemberService;
pub use model::*;
pub use repository::OrgRepository;
pub use seats::{ensure_seat_available, has_active_sub, SeatSummary, SeatUsage, TierSummary};
