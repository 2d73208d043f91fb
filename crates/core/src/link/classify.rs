//! Incoming link classification
//!
//! Pure functions over a landing URL: which authentication artifact it
//! carries, the URL with that artifact removed, and the session bridge
//! request that forwards it.

use url::form_urlencoded;
use url::Url;

use crate::identity::OtpType;

/// Path of the server-side session bridge
pub const BRIDGE_PATH: &str = "/auth/callback";

/// Parameters that carry credentials or link errors and must not survive
/// on the visible URL.
const ARTIFACT_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "expires_in",
    "expires_at",
    "token_type",
    "provider_token",
    "token",
    "token_hash",
    "type",
    "code",
    "error",
    "error_code",
    "error_description",
    "auth_error",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `#access_token=..&refresh_token=..`
    FragmentTokens(TokenPair),
    /// `?code=..`
    QueryCode(String),
    /// `?access_token=..&refresh_token=..`
    QueryTokens(TokenPair),
    /// `?token=..&type=..` or `?token_hash=..&type=..`
    Otp { token: OtpToken, kind: OtpType },
    /// The provider or the bridge reported a failure for this link
    LinkError { code: String, description: Option<String> },
    Malformed(String),
    None,
}

/// Shape of a one-time link token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpToken {
    /// `token_hash`, verified on its own
    Hash(String),
    /// `token`, verified together with the addressee's email
    Plain(String),
}

impl OtpToken {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Hash(token) | Self::Plain(token) => token,
        }
    }

    pub fn is_hash(&self) -> bool {
        matches!(self, Self::Hash(_))
    }
}

/// Credentials as the session bridge accepts them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCredentials {
    Code(String),
    Tokens(TokenPair),
}

struct Params(Vec<(String, String)>);

impl Params {
    fn parse(raw: &str) -> Self {
        Self(form_urlencoded::parse(raw.as_bytes()).into_owned().collect())
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    fn token_pair(&self) -> Result<Option<TokenPair>, String> {
        let Some(access_token) = self.get("access_token") else {
            return Ok(None);
        };
        let refresh_token = self
            .get("refresh_token")
            .ok_or_else(|| "Link is missing its refresh token".to_string())?;
        Ok(Some(TokenPair {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_in: self.get("expires_in").map(str::to_string),
            kind: self.get("type").map(str::to_string),
        }))
    }

    fn link_error(&self) -> Option<ArtifactKind> {
        let code = self
            .get("auth_error")
            .or_else(|| self.get("error_code"))
            .or_else(|| self.get("error"))?;
        Some(ArtifactKind::LinkError {
            code: code.to_string(),
            description: self.get("error_description").map(str::to_string),
        })
    }
}

/// Classify a landing URL. Checked in order: fragment tokens, query code or
/// token pair, OTP token, reported link errors.
pub fn classify_incoming_url(url: &Url) -> ArtifactKind {
    let fragment = Params::parse(url.fragment().unwrap_or_default());
    match fragment.token_pair() {
        Ok(Some(pair)) => return ArtifactKind::FragmentTokens(pair),
        Ok(None) => {}
        Err(reason) => return ArtifactKind::Malformed(reason),
    }

    let query = Params::parse(url.query().unwrap_or_default());
    if let Some(code) = query.get("code") {
        return ArtifactKind::QueryCode(code.to_string());
    }
    match query.token_pair() {
        Ok(Some(pair)) => return ArtifactKind::QueryTokens(pair),
        Ok(None) => {}
        Err(reason) => return ArtifactKind::Malformed(reason),
    }

    let token = query
        .get("token_hash")
        .map(|hash| OtpToken::Hash(hash.to_string()))
        .or_else(|| query.get("token").map(|token| OtpToken::Plain(token.to_string())));
    if let Some(token) = token {
        let Some(kind) = query.get("type") else {
            return ArtifactKind::Malformed("Link is missing its type".to_string());
        };
        return match kind.parse::<OtpType>() {
            Ok(kind) => ArtifactKind::Otp { token, kind },
            Err(_) => ArtifactKind::Malformed(format!("Unsupported link type '{}'", kind)),
        };
    }

    fragment
        .link_error()
        .or_else(|| query.link_error())
        .unwrap_or(ArtifactKind::None)
}

/// The URL without its fragment and artifact parameters; business
/// parameters such as `inviteId` and `em` are kept in order.
pub fn scrub_url(url: &Url) -> Url {
    let mut cleaned = url.clone();
    cleaned.set_fragment(None);
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .filter(|(key, _)| !ARTIFACT_PARAMS.contains(&key.as_str()))
        .collect();
    if kept.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(kept);
    }
    cleaned
}

/// Path plus query, for use as a same-origin `next` value
pub fn relative_path(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Session bridge location that establishes `credentials` and continues at `next`.
pub fn bridge_location(credentials: &BridgeCredentials, next: &str) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    match credentials {
        BridgeCredentials::Code(code) => {
            query.append_pair("code", code);
        }
        BridgeCredentials::Tokens(pair) => {
            query
                .append_pair("access_token", &pair.access_token)
                .append_pair("refresh_token", &pair.refresh_token);
            if let Some(expires_in) = &pair.expires_in {
                query.append_pair("expires_in", expires_in);
            }
            if let Some(kind) = &pair.kind {
                query.append_pair("type", kind);
            }
        }
    }
    query.append_pair("next", next);
    format!("{}?{}", BRIDGE_PATH, query.finish())
}
