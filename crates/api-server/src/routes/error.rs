//! Error responses shared by all route handlers

use axum::{http::StatusCode, Json};
use serde::Serialize;

use fp_core::identity::IdentityError;
use fp_core::Error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

pub fn route_error(status: StatusCode, error: impl Into<String>) -> RouteError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

pub fn unauthorized(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::UNAUTHORIZED, error)
}

pub fn forbidden(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::FORBIDDEN, error)
}

pub fn bad_request(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::BAD_REQUEST, error)
}

pub fn not_found(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::NOT_FOUND, error)
}

pub fn too_many_requests(error: impl Into<String>) -> RouteError {
    route_error(StatusCode::TOO_MANY_REQUESTS, error)
}

pub fn internal_error(error: impl std::fmt::Display) -> RouteError {
    route_error(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
}

pub fn map_error(err: Error) -> RouteError {
    match err {
        Error::Unauthorized => unauthorized(err.to_string()),
        Error::Forbidden(message) => forbidden(message),
        Error::EmailMismatch => forbidden("Invite email mismatch"),
        Error::NotFound(message) => not_found(message),
        Error::SeatLimitExceeded(tier) => route_error(
            StatusCode::CONFLICT,
            format!(
                "No {} seats available. Upgrade the plan or free a seat.",
                tier
            ),
        ),
        Error::LastOwner => route_error(
            StatusCode::CONFLICT,
            "Cannot remove or demote the last owner",
        ),
        Error::DuplicateMembership { .. }
        | Error::DuplicateInvitation(_)
        | Error::Conflict(_) => route_error(StatusCode::CONFLICT, err.to_string()),
        Error::InvalidInput(message) | Error::InvalidPassword(message) => bad_request(message),
        Error::Identity(err) => map_identity_error(err),
        Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => {
            tracing::error!("Storage failure: {}", err);
            internal_error("Internal storage error")
        }
    }
}

pub fn map_identity_error(err: IdentityError) -> RouteError {
    match err {
        IdentityError::InvalidCredentials(_) => unauthorized("Invalid or expired session"),
        IdentityError::LinkExpired(message) => bad_request(message),
        IdentityError::AlreadyRegistered => {
            route_error(StatusCode::CONFLICT, "User already registered")
        }
        IdentityError::UserNotFound => not_found("User not found"),
        IdentityError::RateLimited => too_many_requests("Too many requests. Try again shortly."),
        IdentityError::Unavailable(message) => {
            tracing::warn!("Identity provider unavailable: {}", message);
            route_error(StatusCode::BAD_GATEWAY, "Identity service unavailable")
        }
        IdentityError::Provider { message, .. } => bad_request(message),
    }
}

#[cfg(test)]
mod tests {
    use fp_core::org::SeatTier;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::EmailMismatch, StatusCode::FORBIDDEN),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::SeatLimitExceeded(SeatTier::Editor),
                StatusCode::CONFLICT,
            ),
            (Error::LastOwner, StatusCode::CONFLICT),
            (
                Error::DuplicateMembership {
                    org_id: Uuid::new_v4(),
                    user_id: Uuid::new_v4(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::InvalidPassword("short".into()), StatusCode::BAD_REQUEST),
            (
                Error::Identity(IdentityError::RateLimited),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                Error::Identity(IdentityError::Unavailable("down".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (Error::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(map_error(err).0, status);
        }
    }

    #[test]
    fn storage_details_are_not_exposed() {
        let (_, Json(body)) = map_error(Error::Storage("/var/data/orgs.json".into()));
        assert!(!body.error.contains("/var/data"));
    }
}
