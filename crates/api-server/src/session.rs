//! Session cookies and caller resolution
//!
//! Cookies are only written through `append_session_cookies` and
//! `append_cleared_cookies`, which the session bridge and sign-out use.

use axum::http::{
    header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use tracing::{debug, warn};

use fp_core::identity::{IdentityError, IdentityUser, Session};
use fp_core::org::Membership;

use crate::routes::error::{forbidden, map_error, map_identity_error, unauthorized, RouteError};
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "fp-access-token";
pub const REFRESH_COOKIE: &str = "fp-refresh-token";
pub const VERIFIER_COOKIE: &str = "fp-code-verifier";

const REFRESH_MAX_AGE_SECONDS: i64 = 60 * 60 * 24 * 30;

/// An authenticated request
#[derive(Debug, Clone)]
pub struct Caller {
    pub user: IdentityUser,
    pub access_token: String,
}

pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie(name: &str, value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        name, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn append_cookie(headers: &mut HeaderMap, cookie: String) {
    match HeaderValue::from_str(&cookie) {
        Ok(value) => {
            headers.append(SET_COOKIE, value);
        }
        Err(err) => warn!("Skipping unencodable cookie: {}", err),
    }
}

pub fn append_session_cookies(headers: &mut HeaderMap, session: &Session, secure: bool) {
    append_cookie(
        headers,
        cookie(
            ACCESS_COOKIE,
            &session.access_token,
            session.expires_in.max(0),
            secure,
        ),
    );
    append_cookie(
        headers,
        cookie(
            REFRESH_COOKIE,
            &session.refresh_token,
            REFRESH_MAX_AGE_SECONDS,
            secure,
        ),
    );
}

pub fn append_cleared_cookies(headers: &mut HeaderMap, names: &[&str], secure: bool) {
    for name in names {
        append_cookie(headers, cookie(name, "", 0, secure));
    }
}

/// The caller from the access-token cookie, falling back to a bearer token.
pub async fn resolve_caller(state: &AppState, headers: &HeaderMap) -> Result<Caller, RouteError> {
    let candidates = [
        ("cookie", read_cookie(headers, ACCESS_COOKIE)),
        ("bearer", bearer_token(headers)),
    ];
    let mut last_error = None;
    for (source, token) in candidates {
        let Some(token) = token else { continue };
        match state.identity().get_user(&token).await {
            Ok(user) => {
                return Ok(Caller {
                    user,
                    access_token: token,
                })
            }
            Err(IdentityError::InvalidCredentials(reason)) => {
                debug!("Rejected {} token: {}", source, reason);
            }
            Err(err) => last_error = Some(err),
        }
    }
    match last_error {
        Some(err) => Err(map_identity_error(err)),
        None => Err(unauthorized("Not authenticated")),
    }
}

/// The caller's organization membership; the earliest one when there are several.
pub async fn caller_membership(state: &AppState, caller: &Caller) -> Result<Membership, RouteError> {
    state
        .repo()
        .list_memberships_for_user(caller.user.id)
        .await
        .map_err(map_error)?
        .into_iter()
        .next()
        .ok_or_else(|| forbidden("Not a member of any organization"))
}
