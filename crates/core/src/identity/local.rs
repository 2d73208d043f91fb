//! File-backed identity provider for development and tests
//!
//! Emails are not sent. Every issued link lands in an outbox that callers
//! can read back with [`LocalIdentity::issued_links`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::{
    IdentityError, IdentityResult, IdentityService, IdentityUser, IssuedLink, OtpType, Session,
    UserMetadata,
};
use crate::org::InviteRole;

const DEFAULT_JWT_SECRET: &str = "dev-jwt-secret-change-me";
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_LINK_TTL_SECONDS: i64 = 60 * 60 * 24;
const AUTH_CODE_TTL_SECONDS: i64 = 60 * 5;
const MIN_PROVIDER_PASSWORD_LEN: usize = 6;
const OUTBOX_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct LocalIdentityConfig {
    pub jwt_secret: String,
    pub access_ttl_seconds: i64,
    pub link_ttl_seconds: i64,
}

impl Default for LocalIdentityConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            link_ttl_seconds: DEFAULT_LINK_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    email: String,
    iat: usize,
    exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocalUser {
    id: Uuid,
    email: String,
    password_hash: Option<String>,
    email_confirmed_at: Option<DateTime<Utc>>,
    metadata: UserMetadata,
    created_at: DateTime<Utc>,
}

impl LocalUser {
    fn new(email: String, metadata: UserMetadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash: None,
            email_confirmed_at: None,
            metadata,
            created_at: Utc::now(),
        }
    }

    fn to_identity(&self) -> IdentityUser {
        IdentityUser {
            id: self.id,
            email: self.email.clone(),
            email_confirmed_at: self.email_confirmed_at,
            metadata: self.metadata.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OneTimeToken {
    token_hash: String,
    user_id: Uuid,
    kind: OtpType,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthCode {
    code_hash: String,
    user_id: Uuid,
    code_challenge: Option<String>,
    expires_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefreshToken {
    token_hash: String,
    user_id: Uuid,
    issued_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct IdentityState {
    users: HashMap<Uuid, LocalUser>,
    otp_tokens: Vec<OneTimeToken>,
    auth_codes: Vec<AuthCode>,
    refresh_tokens: HashMap<String, RefreshToken>,
    outbox: Vec<IssuedLink>,
}

impl IdentityState {
    fn find_by_email(&self, email: &str) -> Option<&LocalUser> {
        self.users.values().find(|user| user.email == email)
    }

    /// Drop tokens that can never verify again and the oldest outbox entries.
    fn prune(&mut self, now: DateTime<Utc>) {
        self.otp_tokens
            .retain(|token| token.consumed_at.is_none() && token.expires_at > now);
        self.auth_codes
            .retain(|code| code.consumed_at.is_none() && code.expires_at > now);
        self.refresh_tokens
            .retain(|_, record| record.revoked_at.is_none());
        if self.outbox.len() > OUTBOX_LIMIT {
            let excess = self.outbox.len() - OUTBOX_LIMIT;
            self.outbox.drain(..excess);
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredIdentityState {
    users: Vec<LocalUser>,
    otp_tokens: Vec<OneTimeToken>,
    auth_codes: Vec<AuthCode>,
    refresh_tokens: Vec<RefreshToken>,
    outbox: Vec<IssuedLink>,
}

impl From<StoredIdentityState> for IdentityState {
    fn from(value: StoredIdentityState) -> Self {
        Self {
            users: value
                .users
                .into_iter()
                .map(|item| (item.id, item))
                .collect(),
            otp_tokens: value.otp_tokens,
            auth_codes: value.auth_codes,
            refresh_tokens: value
                .refresh_tokens
                .into_iter()
                .map(|item| (item.token_hash.clone(), item))
                .collect(),
            outbox: value.outbox,
        }
    }
}

impl From<&IdentityState> for StoredIdentityState {
    fn from(value: &IdentityState) -> Self {
        Self {
            users: value.users.values().cloned().collect(),
            otp_tokens: value.otp_tokens.clone(),
            auth_codes: value.auth_codes.clone(),
            refresh_tokens: value.refresh_tokens.values().cloned().collect(),
            outbox: value.outbox.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LocalIdentity {
    state: Arc<RwLock<IdentityState>>,
    file_path: PathBuf,
    config: LocalIdentityConfig,
}

impl LocalIdentity {
    pub async fn new(base_dir: impl Into<PathBuf>, config: LocalIdentityConfig) -> IdentityResult<Self> {
        let base_dir = base_dir.into();
        tokio::fs::create_dir_all(&base_dir).await.map_err(|err| {
            IdentityError::Unavailable(format!("Failed to create identity directory: {}", err))
        })?;
        let file_path = base_dir.join("identity.json");
        let state = load_state(&file_path).await?;

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
            config,
        })
    }

    /// Create a confirmed user with a password.
    pub async fn create_user(&self, email: &str, password: &str) -> IdentityResult<IdentityUser> {
        let email = normalize_email(email);
        validate_password(password)?;
        let mut state = self.state.write().await;
        if state.find_by_email(&email).is_some() {
            return Err(IdentityError::AlreadyRegistered);
        }
        let mut user = LocalUser::new(
            email,
            UserMetadata {
                has_password: true,
                invited_role: None,
            },
        );
        user.password_hash = Some(hash_password(password));
        user.email_confirmed_at = Some(Utc::now());
        let identity = user.to_identity();
        state.users.insert(user.id, user);
        persist_state(&self.file_path, &mut state).await?;
        Ok(identity)
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> IdentityResult<Session> {
        let email = normalize_email(email);
        let mut state = self.state.write().await;
        let user_id = state
            .find_by_email(&email)
            .filter(|user| {
                user.password_hash
                    .as_deref()
                    .is_some_and(|hash| verify_password(hash, password))
            })
            .map(|user| user.id)
            .ok_or_else(|| IdentityError::InvalidCredentials("Invalid login credentials".to_string()))?;
        let session = self.issue_session(&mut state, user_id)?;
        persist_state(&self.file_path, &mut state).await?;
        Ok(session)
    }

    /// Issue a PKCE authorization code, as a provider does when a
    /// code-flow link is followed.
    pub async fn issue_auth_code(
        &self,
        email: &str,
        code_challenge: Option<&str>,
    ) -> IdentityResult<String> {
        let email = normalize_email(email);
        let mut state = self.state.write().await;
        let user_id = state
            .find_by_email(&email)
            .map(|user| user.id)
            .ok_or(IdentityError::UserNotFound)?;
        let code = generate_token();
        state.auth_codes.push(AuthCode {
            code_hash: hash_token(&code),
            user_id,
            code_challenge: code_challenge.map(str::to_string),
            expires_at: Utc::now() + Duration::seconds(AUTH_CODE_TTL_SECONDS),
            consumed_at: None,
        });
        persist_state(&self.file_path, &mut state).await?;
        Ok(code)
    }

    pub async fn issued_links(&self) -> Vec<IssuedLink> {
        self.state.read().await.outbox.clone()
    }

    pub async fn latest_link(&self, email: &str) -> Option<IssuedLink> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        state
            .outbox
            .iter()
            .rev()
            .find(|link| link.email == email)
            .cloned()
    }

    fn issue_link(
        &self,
        state: &mut IdentityState,
        user_id: Uuid,
        email: &str,
        kind: OtpType,
        redirect_to: &str,
    ) -> IdentityResult<IssuedLink> {
        let mut action_link = Url::parse(redirect_to).map_err(|err| IdentityError::Provider {
            status: 400,
            message: format!("Invalid redirect URL: {}", err),
        })?;
        let token = generate_token();
        action_link
            .query_pairs_mut()
            .append_pair("token", &token)
            .append_pair("type", kind.as_str());

        let now = Utc::now();
        // A new link supersedes older unused links of the same kind.
        for previous in state
            .otp_tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.kind == kind && t.consumed_at.is_none())
        {
            previous.consumed_at = Some(now);
        }
        state.otp_tokens.push(OneTimeToken {
            token_hash: hash_token(&token),
            user_id,
            kind,
            expires_at: now + Duration::seconds(self.config.link_ttl_seconds),
            consumed_at: None,
        });

        let link = IssuedLink {
            email: email.to_string(),
            kind,
            redirect_to: redirect_to.to_string(),
            action_link: Some(action_link.to_string()),
        };
        state.outbox.push(link.clone());
        info!("Issued {} link for {}", kind, email);
        Ok(link)
    }

    fn issue_session(&self, state: &mut IdentityState, user_id: Uuid) -> IdentityResult<Session> {
        let user = state
            .users
            .get(&user_id)
            .map(LocalUser::to_identity)
            .ok_or(IdentityError::UserNotFound)?;
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::seconds(self.config.access_ttl_seconds)).timestamp() as usize,
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|err| IdentityError::Unavailable(format!("Failed to sign token: {}", err)))?;

        let refresh_token = generate_token();
        let token_hash = hash_token(&refresh_token);
        state.refresh_tokens.insert(
            token_hash.clone(),
            RefreshToken {
                token_hash,
                user_id,
                issued_at: now,
                revoked_at: None,
            },
        );
        debug!("Issued session for {}", user.id);

        Ok(Session {
            access_token,
            refresh_token,
            expires_in: self.config.access_ttl_seconds,
            user,
        })
    }

    fn decode_access(&self, token: &str) -> IdentityResult<AccessClaims> {
        let decoded = decode::<AccessClaims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|err| IdentityError::InvalidCredentials(format!("Invalid token: {}", err)))?;
        Ok(decoded.claims)
    }

    fn user_id_from_claims(claims: &AccessClaims) -> IdentityResult<Uuid> {
        Uuid::parse_str(&claims.sub)
            .map_err(|_| IdentityError::InvalidCredentials("Invalid token subject".to_string()))
    }
}

#[async_trait]
impl IdentityService for LocalIdentity {
    async fn invite_user(
        &self,
        email: &str,
        redirect_to: &str,
        role_hint: Option<InviteRole>,
    ) -> IdentityResult<IssuedLink> {
        let email = normalize_email(email);
        let mut state = self.state.write().await;
        let user_id = match state.find_by_email(&email) {
            Some(user) if user.email_confirmed_at.is_some() => {
                return Err(IdentityError::AlreadyRegistered)
            }
            Some(user) => user.id,
            None => {
                let user = LocalUser::new(
                    email.clone(),
                    UserMetadata {
                        has_password: false,
                        invited_role: role_hint.map(|role| role.to_string()),
                    },
                );
                let id = user.id;
                state.users.insert(id, user);
                id
            }
        };
        let link = self.issue_link(&mut state, user_id, &email, OtpType::Invite, redirect_to)?;
        persist_state(&self.file_path, &mut state).await?;
        Ok(link)
    }

    async fn send_recovery(&self, email: &str, redirect_to: &str) -> IdentityResult<IssuedLink> {
        let email = normalize_email(email);
        let mut state = self.state.write().await;
        let user_id = state
            .find_by_email(&email)
            .map(|user| user.id)
            .ok_or(IdentityError::UserNotFound)?;
        let link = self.issue_link(&mut state, user_id, &email, OtpType::Recovery, redirect_to)?;
        persist_state(&self.file_path, &mut state).await?;
        Ok(link)
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> IdentityResult<IssuedLink> {
        let email = normalize_email(email);
        let mut state = self.state.write().await;
        let user_id = state
            .find_by_email(&email)
            .map(|user| user.id)
            .ok_or(IdentityError::UserNotFound)?;
        let link = self.issue_link(&mut state, user_id, &email, OtpType::Magiclink, redirect_to)?;
        persist_state(&self.file_path, &mut state).await?;
        Ok(link)
    }

    async fn verify_otp(
        &self,
        token: &str,
        kind: OtpType,
        email: Option<&str>,
    ) -> IdentityResult<Session> {
        let token_hash = hash_token(token);
        let now = Utc::now();
        let mut state = self.state.write().await;

        let record = state
            .otp_tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash && t.kind == kind && t.consumed_at.is_none())
            .ok_or_else(|| {
                IdentityError::LinkExpired("Email link is invalid or has expired".to_string())
            })?;
        if record.expires_at <= now {
            return Err(IdentityError::LinkExpired(
                "Email link is invalid or has expired".to_string(),
            ));
        }
        let user_id = record.user_id;

        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(IdentityError::UserNotFound)?;
        if let Some(email) = email {
            if normalize_email(email) != user.email {
                return Err(IdentityError::InvalidCredentials(
                    "Token does not belong to this email".to_string(),
                ));
            }
        }
        user.email_confirmed_at.get_or_insert(now);
        if let Some(record) = state
            .otp_tokens
            .iter_mut()
            .find(|t| t.token_hash == token_hash)
        {
            record.consumed_at = Some(now);
        }

        let session = self.issue_session(&mut state, user_id)?;
        persist_state(&self.file_path, &mut state).await?;
        info!("Verified {} link for {}", kind, session.user.email);
        Ok(session)
    }

    async fn exchange_code(&self, code: &str, verifier: Option<&str>) -> IdentityResult<Session> {
        let code_hash = hash_token(code);
        let now = Utc::now();
        let mut state = self.state.write().await;

        let record = state
            .auth_codes
            .iter_mut()
            .find(|c| c.code_hash == code_hash && c.consumed_at.is_none())
            .ok_or_else(|| {
                IdentityError::LinkExpired("Auth code is invalid or has expired".to_string())
            })?;
        if record.expires_at <= now {
            return Err(IdentityError::LinkExpired(
                "Auth code is invalid or has expired".to_string(),
            ));
        }
        if let Some(challenge) = record.code_challenge.as_deref() {
            let verifier = verifier.ok_or_else(|| {
                IdentityError::InvalidCredentials("Code verifier required".to_string())
            })?;
            if pkce_challenge(verifier) != challenge {
                return Err(IdentityError::InvalidCredentials(
                    "Code verifier does not match".to_string(),
                ));
            }
        }
        record.consumed_at = Some(now);
        let user_id = record.user_id;

        if let Some(user) = state.users.get_mut(&user_id) {
            user.email_confirmed_at.get_or_insert(now);
        }
        let session = self.issue_session(&mut state, user_id)?;
        persist_state(&self.file_path, &mut state).await?;
        Ok(session)
    }

    async fn set_session(&self, access_token: &str, refresh_token: &str) -> IdentityResult<Session> {
        let token_hash = hash_token(refresh_token);
        let mut state = self.state.write().await;
        let user_id = state
            .refresh_tokens
            .get(&token_hash)
            .filter(|record| record.revoked_at.is_none())
            .map(|record| record.user_id)
            .ok_or_else(|| IdentityError::InvalidCredentials("Invalid refresh token".to_string()))?;

        if let Ok(claims) = self.decode_access(access_token) {
            if Self::user_id_from_claims(&claims)? == user_id {
                let user = state
                    .users
                    .get(&user_id)
                    .map(LocalUser::to_identity)
                    .ok_or(IdentityError::UserNotFound)?;
                let expires_in = claims.exp as i64 - Utc::now().timestamp();
                return Ok(Session {
                    access_token: access_token.to_string(),
                    refresh_token: refresh_token.to_string(),
                    expires_in: expires_in.max(0),
                    user,
                });
            }
        }

        // Access token expired: rotate the refresh token.
        if let Some(record) = state.refresh_tokens.get_mut(&token_hash) {
            record.revoked_at = Some(Utc::now());
        }
        let session = self.issue_session(&mut state, user_id)?;
        persist_state(&self.file_path, &mut state).await?;
        Ok(session)
    }

    async fn get_user(&self, access_token: &str) -> IdentityResult<IdentityUser> {
        let claims = self.decode_access(access_token)?;
        let user_id = Self::user_id_from_claims(&claims)?;
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .map(LocalUser::to_identity)
            .ok_or_else(|| IdentityError::InvalidCredentials("User no longer exists".to_string()))
    }

    async fn update_password(
        &self,
        access_token: &str,
        password: &str,
    ) -> IdentityResult<IdentityUser> {
        let claims = self.decode_access(access_token)?;
        let user_id = Self::user_id_from_claims(&claims)?;
        validate_password(password)?;

        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| IdentityError::InvalidCredentials("User no longer exists".to_string()))?;
        user.password_hash = Some(hash_password(password));
        user.metadata.has_password = true;
        user.email_confirmed_at.get_or_insert_with(Utc::now);
        let identity = user.to_identity();
        persist_state(&self.file_path, &mut state).await?;
        info!("Password updated for {}", identity.id);
        Ok(identity)
    }

    async fn find_user_by_email(&self, email: &str) -> IdentityResult<Option<IdentityUser>> {
        let email = normalize_email(email);
        let state = self.state.read().await;
        Ok(state.find_by_email(&email).map(LocalUser::to_identity))
    }
}

async fn load_state(path: &Path) -> IdentityResult<IdentityState> {
    if !path.exists() {
        return Ok(IdentityState::default());
    }
    let content = tokio::fs::read_to_string(path).await.map_err(|err| {
        IdentityError::Unavailable(format!("Failed to read identity state: {}", err))
    })?;
    if content.trim().is_empty() {
        return Ok(IdentityState::default());
    }
    let stored: StoredIdentityState = serde_json::from_str(&content).map_err(|err| {
        IdentityError::Unavailable(format!("Failed to parse identity state: {}", err))
    })?;
    Ok(stored.into())
}

async fn persist_state(path: &Path, state: &mut IdentityState) -> IdentityResult<()> {
    state.prune(Utc::now());
    let content = serde_json::to_string_pretty(&StoredIdentityState::from(&*state)).map_err(|err| {
        IdentityError::Unavailable(format!("Failed to serialize identity state: {}", err))
    })?;
    tokio::fs::write(path, content).await.map_err(|err| {
        IdentityError::Unavailable(format!("Failed to write identity state: {}", err))
    })?;
    Ok(())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> IdentityResult<()> {
    if password.chars().count() < MIN_PROVIDER_PASSWORD_LEN {
        return Err(IdentityError::Provider {
            status: 422,
            message: format!(
                "Password should be at least {} characters",
                MIN_PROVIDER_PASSWORD_LEN
            ),
        });
    }
    Ok(())
}

fn hash_password(password: &str) -> String {
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());

    format!(
        "v1${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    )
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    let mut parts = stored_hash.split('$');
    let (Some("v1"), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (URL_SAFE_NO_PAD.decode(salt), URL_SAFE_NO_PAD.decode(digest))
    else {
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(password.as_bytes());
    expected == hasher.finalize().as_slice()
}

fn generate_token() -> String {
    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// S256 code challenge for a PKCE verifier
pub fn pkce_challenge(verifier: &str) -> String {
    hash_token(verifier)
}
