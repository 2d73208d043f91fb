//! Route handlers

pub mod auth;
pub mod error;
pub mod extract;
pub mod health;
pub mod invites;
pub mod orgs;
