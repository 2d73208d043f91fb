//! Core library for First Process
//!
//! This crate contains the invitation and session reconciliation logic:
//! - Organizations, memberships and seat enforcement
//! - The invitation ledger, acceptance engine and resend planning
//! - The identity service interface and its providers
//! - Incoming auth link classification and session polling

pub mod error;
pub mod identity;
pub mod invite;
pub mod link;
pub mod org;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
