//! Session bridge, password and sign-out routes

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use fp_core::identity::{IdentityError, IdentityResult, IdentityUser, OtpType, Session};
use fp_core::invite::{normalize_email, EmailMode, ResendTarget};
use fp_core::link::{next_step, sanitize_next, FlowStep, BRIDGE_PATH, DEFAULT_NEXT};

use super::error::{bad_request, map_error, map_identity_error, too_many_requests, RouteError};
use super::extract::{ApiJson, ApiQuery};
use crate::session::{
    append_cleared_cookies, append_session_cookies, read_cookie, resolve_caller, ACCESS_COOKIE,
    REFRESH_COOKIE, VERIFIER_COOKIE,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    token_hash: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    em: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetPasswordRequest {
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BeginPasswordRequest {
    email: String,
    #[serde(default)]
    invite_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailModeResponse {
    ok: bool,
    email_mode: EmailMode,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionQuery {
    #[serde(default)]
    invite_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    user: IdentityUser,
    next: FlowStep,
}

/// Which credential the bridge was handed
enum BridgeInput<'a> {
    Code(&'a str),
    Tokens { access: &'a str, refresh: &'a str },
    Otp {
        token: &'a str,
        kind: OtpType,
        email: Option<&'a str>,
    },
}

impl CallbackQuery {
    fn input(&self) -> Option<BridgeInput<'_>> {
        if let Some(code) = non_empty(&self.code) {
            return Some(BridgeInput::Code(code));
        }
        if let (Some(access), Some(refresh)) =
            (non_empty(&self.access_token), non_empty(&self.refresh_token))
        {
            return Some(BridgeInput::Tokens { access, refresh });
        }
        let kind = non_empty(&self.kind)?.parse::<OtpType>().ok()?;
        if let Some(token) = non_empty(&self.token_hash) {
            return Some(BridgeInput::Otp {
                token,
                kind,
                email: None,
            });
        }
        non_empty(&self.token).map(|token| BridgeInput::Otp {
            token,
            kind,
            email: non_empty(&self.em),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn bridge_error_code(err: &IdentityError) -> &'static str {
    match err {
        IdentityError::LinkExpired(_) => "link_expired",
        IdentityError::RateLimited | IdentityError::Unavailable(_) => "unavailable",
        _ => "invalid_link",
    }
}

fn with_auth_error(next: &str, code: &str) -> String {
    let (path, fragment) = match next.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (next, None),
    };
    let separator = if path.contains('?') { '&' } else { '?' };
    let mut location = format!("{}{}auth_error={}", path, separator, code);
    if let Some(fragment) = fragment {
        location.push('#');
        location.push_str(fragment);
    }
    location
}

fn redirect(location: &str, mut headers: HeaderMap) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            headers.insert(LOCATION, value);
        }
        Err(_) => {
            headers.insert(LOCATION, HeaderValue::from_static(DEFAULT_NEXT));
        }
    }
    (StatusCode::FOUND, headers).into_response()
}

async fn establish(
    state: &AppState,
    input: &BridgeInput<'_>,
    verifier: Option<&str>,
) -> IdentityResult<Session> {
    let identity = state.identity();
    match input {
        BridgeInput::Code(code) => identity.exchange_code(code, verifier).await,
        BridgeInput::Tokens { access, refresh } => identity.set_session(access, refresh).await,
        BridgeInput::Otp { token, kind, email } => identity.verify_otp(token, *kind, *email).await,
    }
}

/// Session bridge: turn link credentials into session cookies and continue at `next`.
async fn callback(
    State(state): State<AppState>,
    request_headers: HeaderMap,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Response {
    // An unparseable query carries no usable credentials either.
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let next = sanitize_next(query.next.as_deref(), DEFAULT_NEXT);
    let secure = state.config().cookie_secure;
    let mut headers = HeaderMap::new();

    let Some(input) = query.input() else {
        warn!("Session bridge called without usable credentials");
        return redirect(&with_auth_error(&next, "invalid_link"), headers);
    };

    let verifier = read_cookie(&request_headers, VERIFIER_COOKIE);
    let used_verifier = matches!(input, BridgeInput::Code(_)) && verifier.is_some();
    let result = establish(&state, &input, verifier.as_deref()).await;
    if used_verifier {
        append_cleared_cookies(&mut headers, &[VERIFIER_COOKIE], secure);
    }

    match result {
        Ok(session) => {
            info!("Session established for {}", session.user.id);
            append_session_cookies(&mut headers, &session, secure);
            redirect(&next, headers)
        }
        Err(err) => {
            warn!("Session bridge failed: {}", err);
            redirect(&with_auth_error(&next, bridge_error_code(&err)), headers)
        }
    }
}

async fn set_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SetPasswordRequest>,
) -> Result<Json<Value>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let Some(password) = req.password else {
        return Err(bad_request("Password is required"));
    };
    let min_len = state.config().min_password_len;
    if password.chars().count() < min_len {
        return Err(bad_request(format!(
            "Password must be at least {} characters",
            min_len
        )));
    }

    state
        .identity()
        .update_password(&caller.access_token, &password)
        .await
        .map_err(map_identity_error)?;
    info!("Password set for {}", caller.user.id);
    Ok(Json(json!({ "ok": true })))
}

async fn begin_password(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BeginPasswordRequest>,
) -> Result<Json<EmailModeResponse>, RouteError> {
    let email = normalize_email(&req.email).map_err(map_error)?;
    if let Err(remaining) = state
        .throttle()
        .lock()
        .await
        .try_acquire(&ResendTarget::Email(email.clone()))
    {
        return Err(too_many_requests(format!(
            "Wait {} seconds before requesting another link",
            remaining.as_secs().max(1)
        )));
    }

    let email_mode = state
        .resend()
        .begin_password(&email, req.invite_id)
        .await
        .map_err(map_error)?;
    Ok(Json(EmailModeResponse {
        ok: true,
        email_mode,
    }))
}

async fn logout(State(state): State<AppState>) -> (HeaderMap, Json<Value>) {
    let mut headers = HeaderMap::new();
    append_cleared_cookies(
        &mut headers,
        &[ACCESS_COOKIE, REFRESH_COOKIE],
        state.config().cookie_secure,
    );
    (headers, Json(json!({ "ok": true })))
}

/// The signed-in user and what the flow should do next.
async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<SessionQuery>,
) -> Result<Json<SessionResponse>, RouteError> {
    let caller = resolve_caller(&state, &headers).await?;
    let next = next_step(&caller.user, query.invite_id);
    Ok(Json(SessionResponse {
        user: caller.user,
        next,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(BRIDGE_PATH, get(callback))
        .route("/api/auth/password", post(set_password))
        .route("/api/auth/begin-password", post(begin_password))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/session", get(current_session))
}
