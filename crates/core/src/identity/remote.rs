//! GoTrue-compatible identity provider client
//!
//! Talks to the provider's `/auth/v1` REST API. Admin calls (invite, user
//! lookup) need the service key; everything else uses the anon key.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    IdentityError, IdentityResult, IdentityService, IdentityUser, IssuedLink, OtpType, Session,
    UserMetadata,
};
use crate::org::InviteRole;

const ADMIN_PAGE_SIZE: usize = 200;
const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Clone)]
pub struct RemoteIdentityConfig {
    /// Provider base URL, without the `/auth/v1` suffix
    pub base_url: String,
    pub anon_key: String,
    pub service_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    user_metadata: UserMetadata,
}

impl From<WireUser> for IdentityUser {
    fn from(value: WireUser) -> Self {
        Self {
            id: value.id,
            email: value.email.unwrap_or_default().to_lowercase(),
            email_confirmed_at: value.email_confirmed_at,
            metadata: value.user_metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSession {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: WireUser,
}

impl From<WireSession> for Session {
    fn from(value: WireSession) -> Self {
        Self {
            access_token: value.access_token,
            refresh_token: value.refresh_token,
            expires_in: value.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            user: value.user.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireUserList {
    #[serde(default)]
    users: Vec<WireUser>,
}

#[derive(Debug, Default, Deserialize)]
struct WireError {
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
}

pub struct RemoteIdentity {
    client: reqwest::Client,
    config: RemoteIdentityConfig,
}

impl RemoteIdentity {
    pub fn new(config: RemoteIdentityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn public(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.config.anon_key)
            .bearer_auth(&self.config.anon_key)
    }

    fn with_user(&self, builder: RequestBuilder, access_token: &str) -> RequestBuilder {
        builder
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
    }

    fn admin(&self, builder: RequestBuilder) -> IdentityResult<RequestBuilder> {
        let key = self.config.service_key.as_deref().ok_or_else(|| {
            IdentityError::Unavailable("Identity service key is not configured".to_string())
        })?;
        Ok(builder.header("apikey", key).bearer_auth(key))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> IdentityResult<T> {
        let resp = self.execute(builder).await?;
        resp.json::<T>()
            .await
            .map_err(|err| IdentityError::Unavailable(format!("Invalid provider response: {}", err)))
    }

    async fn execute(&self, builder: RequestBuilder) -> IdentityResult<reqwest::Response> {
        let resp = builder
            .send()
            .await
            .map_err(|err| IdentityError::Unavailable(err.to_string()))?;
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let err = map_provider_error(status, &body);
        debug!("Identity provider returned {}: {}", status, err);
        Err(err)
    }

    async fn send_link(
        &self,
        builder: RequestBuilder,
        email: &str,
        kind: OtpType,
        redirect_to: &str,
    ) -> IdentityResult<IssuedLink> {
        self.execute(builder.query(&[("redirect_to", redirect_to)]))
            .await?;
        Ok(IssuedLink {
            email: email.to_string(),
            kind,
            redirect_to: redirect_to.to_string(),
            action_link: None,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> IdentityResult<Session> {
        let request = self
            .client
            .post(self.endpoint("/token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&json!({ "refresh_token": refresh_token }));
        let session: WireSession = self.send_json(self.public(request)).await?;
        Ok(session.into())
    }
}

#[async_trait]
impl IdentityService for RemoteIdentity {
    async fn invite_user(
        &self,
        email: &str,
        redirect_to: &str,
        role_hint: Option<InviteRole>,
    ) -> IdentityResult<IssuedLink> {
        let data = match role_hint {
            Some(role) => json!({ "invited_role": role.as_org_role().as_str() }),
            None => json!({}),
        };
        let request = self
            .client
            .post(self.endpoint("/invite"))
            .json(&json!({ "email": email, "data": data }));
        self.send_link(self.admin(request)?, email, OtpType::Invite, redirect_to)
            .await
    }

    async fn send_recovery(&self, email: &str, redirect_to: &str) -> IdentityResult<IssuedLink> {
        let request = self
            .client
            .post(self.endpoint("/recover"))
            .json(&json!({ "email": email }));
        self.send_link(self.public(request), email, OtpType::Recovery, redirect_to)
            .await
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> IdentityResult<IssuedLink> {
        let request = self
            .client
            .post(self.endpoint("/otp"))
            .json(&json!({ "email": email, "create_user": false }));
        self.send_link(self.public(request), email, OtpType::Magiclink, redirect_to)
            .await
    }

    async fn verify_otp(
        &self,
        token: &str,
        kind: OtpType,
        email: Option<&str>,
    ) -> IdentityResult<Session> {
        // Without an email the token is a hashed link token.
        let body = match email {
            Some(email) => json!({ "type": kind.as_str(), "token": token, "email": email }),
            None => json!({ "type": kind.as_str(), "token_hash": token }),
        };
        let request = self.client.post(self.endpoint("/verify")).json(&body);
        let session: WireSession = self.send_json(self.public(request)).await?;
        Ok(session.into())
    }

    async fn exchange_code(&self, code: &str, verifier: Option<&str>) -> IdentityResult<Session> {
        let request = self
            .client
            .post(self.endpoint("/token"))
            .query(&[("grant_type", "pkce")])
            .json(&json!({ "auth_code": code, "code_verifier": verifier.unwrap_or_default() }));
        let session: WireSession = self.send_json(self.public(request)).await?;
        Ok(session.into())
    }

    async fn set_session(&self, access_token: &str, refresh_token: &str) -> IdentityResult<Session> {
        match jwt_expires_in(access_token) {
            Some(expires_in) if expires_in > 0 => match self.get_user(access_token).await {
                Ok(user) => {
                    return Ok(Session {
                        access_token: access_token.to_string(),
                        refresh_token: refresh_token.to_string(),
                        expires_in,
                        user,
                    })
                }
                Err(IdentityError::InvalidCredentials(reason)) => {
                    debug!("Access token rejected ({}), refreshing", reason)
                }
                Err(err) => return Err(err),
            },
            _ => debug!("Access token expired, refreshing"),
        }
        self.refresh(refresh_token).await
    }

    async fn get_user(&self, access_token: &str) -> IdentityResult<IdentityUser> {
        let request = self.with_user(self.client.get(self.endpoint("/user")), access_token);
        let user: WireUser = self.send_json(request).await?;
        Ok(user.into())
    }

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> IdentityResult<IdentityUser> {
        let request = self
            .client
            .put(self.endpoint("/user"))
            .json(&json!({ "password": password, "data": { "has_password": true } }));
        let user: WireUser = self
            .send_json(self.with_user(request, access_token))
            .await?;
        Ok(user.into())
    }

    async fn find_user_by_email(&self, email: &str) -> IdentityResult<Option<IdentityUser>> {
        let email = email.trim().to_lowercase();
        let mut page = 1;
        loop {
            let request = self.client.get(self.endpoint("/admin/users")).query(&[
                ("page", page.to_string()),
                ("per_page", ADMIN_PAGE_SIZE.to_string()),
            ]);
            let list: WireUserList = self.send_json(self.admin(request)?).await?;
            let count = list.users.len();
            if let Some(user) = list
                .users
                .into_iter()
                .map(IdentityUser::from)
                .find(|user| user.email == email)
            {
                return Ok(Some(user));
            }
            if count < ADMIN_PAGE_SIZE {
                return Ok(None);
            }
            page += 1;
        }
    }
}

fn map_provider_error(status: StatusCode, body: &str) -> IdentityError {
    let wire: WireError = serde_json::from_str(body).unwrap_or_default();
    let message = wire
        .msg
        .or(wire.message)
        .or(wire.error_description)
        .or(wire.error.clone())
        .unwrap_or_else(|| status.to_string());
    let code = wire.error_code.or(wire.error).unwrap_or_default();
    let lowered = message.to_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS || code == "over_email_send_rate_limit" {
        return IdentityError::RateLimited;
    }
    if status.is_server_error() {
        warn!("Identity provider failure {}: {}", status, message);
        return IdentityError::Unavailable(message);
    }
    if code == "email_exists" || code == "user_already_exists" || lowered.contains("already been registered") {
        return IdentityError::AlreadyRegistered;
    }
    if code == "user_not_found" || status == StatusCode::NOT_FOUND {
        return IdentityError::UserNotFound;
    }
    if code == "otp_expired"
        || code == "flow_state_expired"
        || code == "flow_state_not_found"
        || lowered.contains("expired")
    {
        return IdentityError::LinkExpired(message);
    }
    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || code == "invalid_grant"
        || code == "bad_jwt"
        || code == "bad_code_verifier"
    {
        return IdentityError::InvalidCredentials(message);
    }
    IdentityError::Provider {
        status: status.as_u16(),
        message,
    }
}

/// Seconds until a JWT's `exp`, read without verifying the signature.
fn jwt_expires_in(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Some(exp - Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn identity(server: &MockServer) -> RemoteIdentity {
        RemoteIdentity::new(RemoteIdentityConfig {
            base_url: server.uri(),
            anon_key: "anon-key".to_string(),
            service_key: Some("service-key".to_string()),
        })
    }

    fn user_json(id: Uuid, email: &str, has_password: bool) -> serde_json::Value {
        json!({
            "id": id,
            "email": email,
            "email_confirmed_at": "2024-05-01T10:00:00Z",
            "user_metadata": { "has_password": has_password }
        })
    }

    fn fake_jwt(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(json!({ "exp": exp }).to_string());
        format!("eyJhbGciOiJIUzI1NiJ9.{}.signature", payload)
    }

    #[tokio::test]
    async fn invite_uses_service_key_and_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/invite"))
            .and(header("apikey", "service-key"))
            .and(query_param("redirect_to", "https://app.example.com/auth/accept"))
            .and(body_partial_json(json!({
                "email": "bob@example.com",
                "data": { "invited_role": "editor" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let link = identity(&server)
            .invite_user(
                "bob@example.com",
                "https://app.example.com/auth/accept",
                Some(InviteRole::Editor),
            )
            .await
            .unwrap();
        assert_eq!(link.kind, OtpType::Invite);
        assert!(link.action_link.is_none());
    }

    #[tokio::test]
    async fn already_registered_is_recognized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/invite"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": 422,
                "msg": "A user with this email address has already been registered"
            })))
            .mount(&server)
            .await;

        let err = identity(&server)
            .invite_user("bob@example.com", "https://app.example.com/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn verify_returns_session() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/verify"))
            .and(body_partial_json(json!({ "type": "recovery", "token_hash": "abc" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "user": user_json(id, "Bob@Example.com", false)
            })))
            .mount(&server)
            .await;

        let session = identity(&server)
            .verify_otp("abc", OtpType::Recovery, None)
            .await
            .unwrap();
        assert_eq!(session.user.id, id);
        assert_eq!(session.user.email, "bob@example.com");
        assert!(!session.user.has_password());
    }

    #[tokio::test]
    async fn expired_otp_maps_to_link_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/verify"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error_code": "otp_expired",
                "msg": "Email link is invalid or has expired"
            })))
            .mount(&server)
            .await;

        let err = identity(&server)
            .verify_otp("abc", OtpType::Invite, None)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::LinkExpired(_)));
    }

    #[tokio::test]
    async fn rate_limit_and_outage_are_distinguished() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/recover"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/otp"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = identity(&server);
        let err = client
            .send_recovery("bob@example.com", "https://app.example.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::RateLimited));
        let err = client
            .send_magic_link("bob@example.com", "https://app.example.com/")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::Unavailable(_)));
    }

    #[tokio::test]
    async fn set_session_refreshes_expired_access_token() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_partial_json(json!({ "refresh_token": "old-refresh" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 3600,
                "user": user_json(id, "bob@example.com", true)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let expired = fake_jwt(Utc::now().timestamp() - 60);
        let session = identity(&server)
            .set_session(&expired, "old-refresh")
            .await
            .unwrap();
        assert_eq!(session.access_token, "new-access");
        assert_eq!(session.refresh_token, "new-refresh");
    }

    #[tokio::test]
    async fn set_session_keeps_valid_tokens() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        let access = fake_jwt(Utc::now().timestamp() + 600);
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("authorization", format!("Bearer {}", access).as_str()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(user_json(id, "bob@example.com", true)),
            )
            .mount(&server)
            .await;

        let session = identity(&server).set_session(&access, "refresh").await.unwrap();
        assert_eq!(session.access_token, access);
        assert_eq!(session.refresh_token, "refresh");
        assert!(session.expires_in > 0 && session.expires_in <= 600);
    }

    #[tokio::test]
    async fn find_user_by_email_scans_admin_list() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path("/auth/v1/admin/users"))
            .and(header("apikey", "service-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [
                    user_json(Uuid::new_v4(), "alice@example.com", true),
                    user_json(id, "bob@example.com", false)
                ]
            })))
            .mount(&server)
            .await;

        let client = identity(&server);
        let found = client.find_user_by_email(" BOB@example.com").await.unwrap();
        assert_eq!(found.map(|user| user.id), Some(id));
        assert!(client
            .find_user_by_email("carol@example.com")
            .await
            .unwrap()
            .is_none());
    }
}
