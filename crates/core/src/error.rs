//! Error types for the core library

use thiserror::Error;
use uuid::Uuid;

use crate::identity::IdentityError;
use crate::org::SeatTier;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invite email mismatch")]
    EmailMismatch,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No {0} seats available")]
    SeatLimitExceeded(SeatTier),

    #[error("Organization must keep at least one owner")]
    LastOwner,

    #[error("User {user_id} is already a member of organization {org_id}")]
    DuplicateMembership { org_id: Uuid, user_id: Uuid },

    #[error("Pending invitation {0} already exists")]
    DuplicateInvitation(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid password: {0}")]
    InvalidPassword(String),

    #[error("Identity service error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
