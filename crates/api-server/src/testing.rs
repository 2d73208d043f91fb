//! Fixtures shared by route tests

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use fp_core::identity::{IdentityService, LocalIdentity, LocalIdentityConfig, Session};
use fp_core::org::{FileOrgStore, OrgRepository, Organization, Subscription, SubscriptionStatus};

use crate::config::ServerConfig;
use crate::state::AppState;

pub struct TestApp {
    pub state: AppState,
    pub identity: Arc<LocalIdentity>,
    _temp_dir: TempDir,
}

pub async fn build_state() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().to_path_buf();

    let repo: Arc<dyn OrgRepository> = Arc::new(FileOrgStore::new(data_dir.clone()).await.unwrap());
    let identity = Arc::new(
        LocalIdentity::new(data_dir.join("identity"), LocalIdentityConfig::default())
            .await
            .unwrap(),
    );
    let state = AppState::with_services(
        ServerConfig::local(data_dir),
        repo,
        Arc::clone(&identity) as Arc<dyn IdentityService>,
    )
    .unwrap();

    TestApp {
        state,
        identity,
        _temp_dir: temp_dir,
    }
}

impl TestApp {
    /// A signed-in user who owns a fresh organization
    pub async fn owner(&self, email: &str) -> (Session, Organization) {
        let session = self.signed_in(email).await;
        let (org, _) = self
            .state
            .repo()
            .create_organization("Acme", session.user.id, &session.user.email)
            .await
            .unwrap();
        (session, org)
    }

    pub async fn signed_in(&self, email: &str) -> Session {
        self.identity.create_user(email, "password-123").await.unwrap();
        self.identity
            .sign_in_with_password(email, "password-123")
            .await
            .unwrap()
    }

    pub async fn subscribe(&self, org: &Organization, seats_editor: u32, seats_viewer: u32) {
        self.state
            .repo()
            .upsert_subscription(Subscription::new(
                org.id,
                SubscriptionStatus::Active,
                seats_editor,
                seats_viewer,
            ))
            .await
            .unwrap();
    }
}

pub fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request(method, uri, token, body))
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, payload)
}
