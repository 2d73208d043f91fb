//! Landing page resolution
//!
//! Decides what a landing page does with its URL and the current session:
//! hand credentials to the session bridge, continue the flow, or stop in a
//! conflict or need-session state.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use super::classify::{
    bridge_location, classify_incoming_url, relative_path, scrub_url, ArtifactKind,
    BridgeCredentials, TokenPair,
};
use super::redirect::DEFAULT_NEXT;
use crate::identity::{IdentityError, IdentityService, IdentityUser, Session};
use crate::invite::ResendTarget;

/// Business parameters carried by a landing URL
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LandingContext {
    /// Lowercased `em` parameter
    pub expected_email: Option<String>,
    pub invitation_id: Option<Uuid>,
}

impl LandingContext {
    pub fn from_url(url: &Url) -> Self {
        let mut ctx = Self::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "em" if !value.trim().is_empty() => {
                    ctx.expected_email = Some(value.trim().to_lowercase())
                }
                "inviteId" => ctx.invitation_id = Uuid::parse_str(value.trim()).ok(),
                _ => {}
            }
        }
        ctx
    }

    pub fn resend_target(&self) -> Option<ResendTarget> {
        match (self.invitation_id, &self.expected_email) {
            (Some(id), _) => Some(ResendTarget::Invitation(id)),
            (None, Some(email)) => Some(ResendTarget::Email(email.clone())),
            (None, None) => None,
        }
    }
}

/// What to do once a session exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum FlowStep {
    SetPassword,
    AcceptInvitation { invitation_id: Uuid },
    Continue { location: String },
}

pub fn next_step(user: &IdentityUser, invitation_id: Option<Uuid>) -> FlowStep {
    if !user.has_password() {
        return FlowStep::SetPassword;
    }
    match invitation_id {
        Some(invitation_id) => FlowStep::AcceptInvitation { invitation_id },
        None => FlowStep::Continue {
            location: DEFAULT_NEXT.to_string(),
        },
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    /// Navigate to the session bridge; tokens are gone from `cleaned_url`
    Bridge { location: String, cleaned_url: Url },
    Proceed { user: IdentityUser, step: FlowStep },
    /// Signed in as someone other than the link's addressee
    Conflict { signed_in_as: String, expected: String },
    NeedSession {
        reason: String,
        resend: Option<ResendTarget>,
    },
    Error { reason: String },
}

#[derive(Clone)]
pub struct LinkResolver {
    identity: Arc<dyn IdentityService>,
}

impl LinkResolver {
    pub fn new(identity: Arc<dyn IdentityService>) -> Self {
        Self { identity }
    }

    pub async fn resolve(&self, url: &Url, current: Option<&Session>) -> Resolution {
        let ctx = LandingContext::from_url(url);

        if let Some(conflict) = current.and_then(|session| email_conflict(&session.user, &ctx)) {
            return conflict;
        }

        let artifact = classify_incoming_url(url);
        let cleaned_url = scrub_url(url);
        let next = relative_path(&cleaned_url);
        debug!("Classified landing URL at {} as {}", url.path(), artifact_name(&artifact));

        match artifact {
            ArtifactKind::FragmentTokens(pair) | ArtifactKind::QueryTokens(pair) => Resolution::Bridge {
                location: bridge_location(&BridgeCredentials::Tokens(pair), &next),
                cleaned_url,
            },
            ArtifactKind::QueryCode(code) => Resolution::Bridge {
                location: bridge_location(&BridgeCredentials::Code(code), &next),
                cleaned_url,
            },
            ArtifactKind::Otp { token, kind } => {
                // A token hash identifies its user; only plain tokens need the email.
                let email = if token.is_hash() {
                    None
                } else {
                    ctx.expected_email.as_deref()
                };
                match self.identity.verify_otp(token.as_str(), kind, email).await {
                    Ok(session) => {
                        info!("Verified {} link for {}", kind, session.user.id);
                        let pair = TokenPair {
                            access_token: session.access_token,
                            refresh_token: session.refresh_token,
                            expires_in: Some(session.expires_in.to_string()),
                            kind: Some(kind.to_string()),
                        };
                        Resolution::Bridge {
                            location: bridge_location(&BridgeCredentials::Tokens(pair), &next),
                            cleaned_url,
                        }
                    }
                    Err(err) => verification_failed(err, &ctx),
                }
            }
            ArtifactKind::LinkError { code, description } => Resolution::NeedSession {
                reason: description.unwrap_or_else(|| describe_link_error(&code).to_string()),
                resend: ctx.resend_target(),
            },
            ArtifactKind::Malformed(reason) => Resolution::NeedSession {
                reason,
                resend: ctx.resend_target(),
            },
            ArtifactKind::None => match current {
                Some(session) => Resolution::Proceed {
                    user: session.user.clone(),
                    step: next_step(&session.user, ctx.invitation_id),
                },
                None => Resolution::NeedSession {
                    reason: "No active session. The link may be invalid, expired or already used."
                        .to_string(),
                    resend: ctx.resend_target(),
                },
            },
        }
    }
}

fn email_conflict(user: &IdentityUser, ctx: &LandingContext) -> Option<Resolution> {
    let expected = ctx.expected_email.as_deref()?;
    let signed_in_as = user.email.to_lowercase();
    if signed_in_as == expected {
        return None;
    }
    Some(Resolution::Conflict {
        signed_in_as,
        expected: expected.to_string(),
    })
}

fn verification_failed(err: IdentityError, ctx: &LandingContext) -> Resolution {
    warn!("Link verification failed: {}", err);
    if err.needs_new_link() || matches!(err, IdentityError::UserNotFound) {
        return Resolution::NeedSession {
            reason: "The link is invalid or has expired.".to_string(),
            resend: ctx.resend_target(),
        };
    }
    Resolution::Error {
        reason: match err {
            IdentityError::RateLimited => "Too many attempts. Wait a moment and try again.".to_string(),
            other => format!("Could not validate the link: {}", other),
        },
    }
}

/// Message for the `auth_error` codes the session bridge reports
pub fn describe_link_error(code: &str) -> &'static str {
    match code {
        "link_expired" | "otp_expired" | "flow_state_expired" => {
            "The link has expired. Request a new one."
        }
        "unavailable" => "The sign-in service is unavailable. Try again shortly.",
        _ => "The link is invalid or was already used.",
    }
}

fn artifact_name(artifact: &ArtifactKind) -> &'static str {
    match artifact {
        ArtifactKind::FragmentTokens(_) => "fragment tokens",
        ArtifactKind::QueryCode(_) => "query code",
        ArtifactKind::QueryTokens(_) => "query tokens",
        ArtifactKind::Otp { .. } => "otp token",
        ArtifactKind::LinkError { .. } => "link error",
        ArtifactKind::Malformed(_) => "malformed link",
        ArtifactKind::None => "no artifact",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::identity::{
        LocalIdentity, LocalIdentityConfig, RemoteIdentity, RemoteIdentityConfig, UserMetadata,
    };

    const LANDING: &str = "https://app.example.com/auth/accept";

    async fn resolver() -> (LinkResolver, Arc<LocalIdentity>, TempDir) {
        let temp = TempDir::new().unwrap();
        let identity = Arc::new(
            LocalIdentity::new(temp.path(), LocalIdentityConfig::default())
                .await
                .unwrap(),
        );
        (LinkResolver::new(identity.clone()), identity, temp)
    }

    fn session_for(email: &str, has_password: bool) -> Session {
        Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_in: 3600,
            user: IdentityUser {
                id: Uuid::new_v4(),
                email: email.to_string(),
                email_confirmed_at: Some(chrono::Utc::now()),
                metadata: UserMetadata {
                    has_password,
                    invited_role: None,
                },
            },
        }
    }

    #[test]
    fn flow_step_order() {
        let invitation_id = Uuid::new_v4();
        let fresh = session_for("a@x.com", false).user;
        assert_eq!(next_step(&fresh, Some(invitation_id)), FlowStep::SetPassword);
        let ready = session_for("a@x.com", true).user;
        assert_eq!(
            next_step(&ready, Some(invitation_id)),
            FlowStep::AcceptInvitation { invitation_id }
        );
        assert_eq!(
            next_step(&ready, None),
            FlowStep::Continue {
                location: "/org".to_string()
            }
        );
    }

    #[tokio::test]
    async fn fragment_tokens_route_to_bridge() {
        let (resolver, _identity, _temp) = resolver().await;
        let url = Url::parse(&format!(
            "{}?inviteId={}#access_token=at&refresh_token=rt",
            LANDING,
            Uuid::nil()
        ))
        .unwrap();

        let Resolution::Bridge { location, cleaned_url } = resolver.resolve(&url, None).await else {
            panic!("expected bridge navigation");
        };
        assert!(location.starts_with("/auth/callback?access_token=at&refresh_token=rt&next="));
        assert!(cleaned_url.fragment().is_none());
        assert_eq!(
            cleaned_url.query(),
            Some(format!("inviteId={}", Uuid::nil()).as_str())
        );
    }

    #[tokio::test]
    async fn otp_link_is_verified_then_bridged() {
        let (resolver, identity, _temp) = resolver().await;
        let invitation_id = Uuid::new_v4();
        let landing = format!("{}?em=bob%40example.com&inviteId={}", LANDING, invitation_id);
        let link = identity.invite_user("bob@example.com", &landing, None).await.unwrap();
        let url = Url::parse(link.action_link.as_deref().unwrap()).unwrap();

        let Resolution::Bridge { location, .. } = resolver.resolve(&url, None).await else {
            panic!("expected bridge navigation");
        };
        let bridge = Url::parse(&format!("https://app.example.com{}", location)).unwrap();
        let params: Vec<(String, String)> = bridge.query_pairs().into_owned().collect();
        assert!(params.iter().any(|(k, _)| k == "access_token"));
        assert!(params.iter().any(|(k, v)| k == "type" && v == "invite"));
        let next = params
            .iter()
            .find(|(k, _)| k == "next")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(
            next,
            format!("/auth/accept?em=bob%40example.com&inviteId={}", invitation_id)
        );

        // A second visit with the consumed token needs a fresh link.
        match resolver.resolve(&url, None).await {
            Resolution::NeedSession { resend, .. } => {
                assert_eq!(resend, Some(ResendTarget::Invitation(invitation_id)))
            }
            other => panic!("expected need-session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn hashed_link_with_email_verifies_by_hash_only() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/auth/v1/verify"))
            .and(body_partial_json(json!({ "type": "magiclink", "token_hash": "hashed-xyz" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access",
                "refresh_token": "refresh",
                "expires_in": 3600,
                "user": {
                    "id": id,
                    "email": "a@x.com",
                    "email_confirmed_at": "2024-05-01T10:00:00Z",
                    "user_metadata": { "has_password": true }
                }
            })))
            .expect(1)
            .mount(&server)
            .await;
        let resolver = LinkResolver::new(Arc::new(RemoteIdentity::new(RemoteIdentityConfig {
            base_url: server.uri(),
            anon_key: "anon-key".to_string(),
            service_key: None,
        })));

        let url = Url::parse(&format!(
            "{}?em=a%40x.com&token_hash=hashed-xyz&type=magiclink",
            LANDING
        ))
        .unwrap();
        let Resolution::Bridge { location, cleaned_url } = resolver.resolve(&url, None).await else {
            panic!("expected bridge navigation");
        };
        assert!(location.starts_with("/auth/callback?access_token=access&refresh_token=refresh"));
        assert_eq!(cleaned_url.query(), Some("em=a%40x.com"));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("email").is_none());
        assert!(body.get("token").is_none());
    }

    #[tokio::test]
    async fn signed_in_as_other_account_is_a_conflict() {
        let (resolver, _identity, _temp) = resolver().await;
        let url = Url::parse(&format!("{}?em=a%40x.com&token=xyz&type=invite", LANDING)).unwrap();
        let session = session_for("b@x.com", true);

        match resolver.resolve(&url, Some(&session)).await {
            Resolution::Conflict { signed_in_as, expected } => {
                assert_eq!(signed_in_as, "b@x.com");
                assert_eq!(expected, "a@x.com");
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn existing_session_proceeds_to_next_step() {
        let (resolver, _identity, _temp) = resolver().await;
        let invitation_id = Uuid::new_v4();
        let url = Url::parse(&format!("{}?em=A%40x.com&inviteId={}", LANDING, invitation_id)).unwrap();
        let session = session_for("a@x.com", true);

        match resolver.resolve(&url, Some(&session)).await {
            Resolution::Proceed { step, .. } => {
                assert_eq!(step, FlowStep::AcceptInvitation { invitation_id })
            }
            other => panic!("expected proceed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bridge_failure_offers_resend() {
        let (resolver, _identity, _temp) = resolver().await;
        let url = Url::parse(&format!("{}?em=a%40x.com&auth_error=link_expired", LANDING)).unwrap();

        match resolver.resolve(&url, None).await {
            Resolution::NeedSession { reason, resend } => {
                assert_eq!(reason, "The link has expired. Request a new one.");
                assert_eq!(resend, Some(ResendTarget::Email("a@x.com".to_string())));
            }
            other => panic!("expected need-session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_artifact_and_no_session_needs_session() {
        let (resolver, _identity, _temp) = resolver().await;
        let url = Url::parse(LANDING).unwrap();
        assert!(matches!(
            resolver.resolve(&url, None).await,
            Resolution::NeedSession { resend: None, .. }
        ));
    }

    #[test]
    fn context_ignores_garbage_invitation_ids() {
        let url = Url::parse(&format!("{}?inviteId=not-a-uuid&em=%20Bob%40X.com", LANDING)).unwrap();
        let ctx = LandingContext::from_url(&url);
        assert_eq!(ctx.invitation_id, None);
        assert_eq!(ctx.expected_email.as_deref(), Some("bob@x.com"));
    }
}
