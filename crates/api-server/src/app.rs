//! Router assembly

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::auth::router())
        .merge(routes::invites::router())
        .merge(routes::orgs::router())
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{
        header::{COOKIE, LOCATION, SET_COOKIE},
        HeaderValue, StatusCode,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use url::Url;
    use uuid::Uuid;

    use fp_core::identity::IdentityService;
    use fp_core::link::{FlowStep, LinkResolver, Resolution};
    use fp_core::org::OrgRole;

    use super::*;
    use crate::session::{read_cookie, ACCESS_COOKIE, REFRESH_COOKIE};
    use crate::testing::{build_state, request, send_json};

    const SITE: &str = "http://localhost:3000";

    fn cookie_value(set_cookies: &[String], name: &str) -> String {
        let mut headers = axum::http::HeaderMap::new();
        for cookie in set_cookies {
            let pair = cookie.split(';').next().unwrap();
            headers.append(COOKIE, HeaderValue::from_str(pair).unwrap());
        }
        read_cookie(&headers, name).unwrap()
    }

    async fn send_with_cookie(
        app: &Router,
        method: &str,
        uri: &str,
        access_token: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = request(method, uri, None, body);
        req.headers_mut().insert(
            COOKIE,
            HeaderValue::from_str(&format!("{}={}", ACCESS_COOKIE, access_token)).unwrap(),
        );
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn health_reports_identity_mode() {
        let test = build_state().await;
        let app = router(test.state.clone());
        let (status, body) = send_json(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["identityMode"], "local");
    }

    #[tokio::test]
    async fn invited_editor_follows_link_sets_password_and_joins() {
        let test = build_state().await;
        let (owner, org) = test.owner("owner@example.com").await;
        test.subscribe(&org, 5, 5).await;
        let app = router(test.state.clone());

        // Owner invites a brand-new user as editor.
        let (status, created) = send_json(
            &app,
            "POST",
            "/api/invites",
            Some(&owner.access_token),
            Some(json!({ "email": "new.editor@example.com", "role": "editor" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["emailMode"], "invite");
        let invite_id: Uuid = created["inviteId"].as_str().unwrap().parse().unwrap();

        // The emailed link lands on the accept page with an OTP token.
        let link = test
            .identity
            .latest_link("new.editor@example.com")
            .await
            .unwrap();
        let landing = Url::parse(link.action_link.as_deref().unwrap()).unwrap();
        let identity: Arc<dyn IdentityService> = Arc::clone(test.state.identity());
        let resolver = LinkResolver::new(Arc::clone(&identity));

        let Resolution::Bridge {
            location,
            cleaned_url,
        } = resolver.resolve(&landing, None).await
        else {
            panic!("expected the link to be handed to the session bridge");
        };
        assert!(cleaned_url.query_pairs().all(|(k, _)| k != "token"));
        assert!(location.starts_with("/auth/callback?"));

        // The bridge sets cookies and continues at the scrubbed landing page.
        let response = app
            .clone()
            .oneshot(request("GET", &location, None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        let next = response.headers().get(LOCATION).unwrap().to_str().unwrap();
        assert_eq!(
            next,
            format!(
                "/auth/accept?em=new.editor%40example.com&inviteId={}",
                invite_id
            )
        );
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        let access_token = cookie_value(&set_cookies, ACCESS_COOKIE);
        let refresh_token = cookie_value(&set_cookies, REFRESH_COOKIE);

        // Back on the landing page with a session, the user must set a password.
        let session = identity
            .set_session(&access_token, &refresh_token)
            .await
            .unwrap();
        let landing = Url::parse(&format!("{}{}", SITE, next)).unwrap();
        let Resolution::Proceed { step, .. } = resolver.resolve(&landing, Some(&session)).await
        else {
            panic!("expected the flow to proceed");
        };
        assert_eq!(step, FlowStep::SetPassword);

        let (status, _) = send_with_cookie(
            &app,
            "POST",
            "/api/auth/password",
            &access_token,
            Some(json!({ "password": "editor-pass-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, current) = send_with_cookie(
            &app,
            "GET",
            &format!("/api/auth/session?inviteId={}", invite_id),
            &access_token,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(current["next"]["step"], "accept-invitation");

        let (status, accepted) = send_with_cookie(
            &app,
            "POST",
            "/api/invites/accept",
            &access_token,
            Some(json!({ "inviteId": invite_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["role"], "editor");
        assert_eq!(accepted["change"], "created");
        assert_eq!(accepted["next"], "/org");

        let membership = test
            .state
            .repo()
            .get_membership(org.id, session.user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(membership.role, OrgRole::Editor);
        let invitation = test.state.ledger().lookup(invite_id).await.unwrap();
        assert!(invitation.accepted_at.is_some());
        assert_eq!(invitation.accepted_by, Some(session.user.id));
    }

    #[tokio::test]
    async fn signed_in_as_someone_else_is_a_conflict() {
        let test = build_state().await;
        let (owner, _) = test.owner("owner@example.com").await;
        let app = router(test.state.clone());
        send_json(
            &app,
            "POST",
            "/api/invites",
            Some(&owner.access_token),
            Some(json!({ "email": "invitee@example.com", "role": "viewer" })),
        )
        .await;
        let link = test.identity.latest_link("invitee@example.com").await.unwrap();
        let landing = Url::parse(link.action_link.as_deref().unwrap()).unwrap();
        let resolver = LinkResolver::new(Arc::clone(test.state.identity()));

        let resolution = resolver.resolve(&landing, Some(&owner)).await;
        assert!(matches!(
            resolution,
            Resolution::Conflict { ref signed_in_as, ref expected }
                if signed_in_as == "owner@example.com" && expected == "invitee@example.com"
        ));
    }
}
