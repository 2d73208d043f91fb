//! Server configuration from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use fp_core::org::OrgRole;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8081";
const DEFAULT_DATA_DIR: &str = ".fp-data";
const DEFAULT_SITE_URL: &str = "http://localhost:3000";
const DEFAULT_MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    Local,
    Remote,
}

impl FromStr for IdentityMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => bail!("Unsupported identity mode '{}'", other),
        }
    }
}

/// Who may create and resend invitations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitePolicy {
    Owners,
    OwnersAndEditors,
}

impl InvitePolicy {
    pub fn allows(self, role: OrgRole) -> bool {
        match self {
            Self::Owners => role == OrgRole::Owner,
            Self::OwnersAndEditors => role.can_edit(),
        }
    }
}

impl FromStr for InvitePolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owners" => Ok(Self::Owners),
            "owners-and-editors" => Ok(Self::OwnersAndEditors),
            other => bail!("Unsupported invite policy '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Base for links in outgoing email
    pub site_url: String,
    pub identity_mode: IdentityMode,
    pub identity_url: Option<String>,
    pub identity_anon_key: Option<String>,
    pub identity_service_key: Option<String>,
    /// Signing secret of the local identity provider
    pub jwt_secret: Option<String>,
    pub min_password_len: usize,
    pub invite_policy: InvitePolicy,
    pub cookie_secure: bool,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = env_string("FP_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("FP_BIND_ADDR is not a socket address")?;
        let site_url = env_string("FP_SITE_URL")
            .unwrap_or_else(|| DEFAULT_SITE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let identity_mode = match env_string("FP_IDENTITY_MODE") {
            Some(raw) => raw.parse()?,
            None => IdentityMode::Local,
        };
        let invite_policy = match env_string("FP_INVITE_POLICY") {
            Some(raw) => raw.parse()?,
            None => InvitePolicy::OwnersAndEditors,
        };
        let cookie_secure = env_flag("FP_COOKIE_SECURE", site_url.starts_with("https://"));

        Ok(Self {
            bind_addr,
            data_dir: env_string("FP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            site_url,
            identity_mode,
            identity_url: env_string("FP_IDENTITY_URL"),
            identity_anon_key: env_string("FP_IDENTITY_ANON_KEY"),
            identity_service_key: env_string("FP_IDENTITY_SERVICE_KEY"),
            jwt_secret: env_string("FP_JWT_SECRET"),
            min_password_len: parse_min_password_len(env_string("FP_MIN_PASSWORD_LEN").as_deref()),
            invite_policy,
            cookie_secure,
        })
    }

    /// Local-mode configuration rooted at `data_dir`
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8081)),
            data_dir: data_dir.into(),
            site_url: DEFAULT_SITE_URL.to_string(),
            identity_mode: IdentityMode::Local,
            identity_url: None,
            identity_anon_key: None,
            identity_service_key: None,
            jwt_secret: None,
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            invite_policy: InvitePolicy::OwnersAndEditors,
            cookie_secure: false,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_min_password_len(raw: Option<&str>) -> usize {
    raw.and_then(|raw| raw.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_MIN_PASSWORD_LEN)
        .clamp(6, 8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_length_is_clamped() {
        assert_eq!(parse_min_password_len(None), 8);
        assert_eq!(parse_min_password_len(Some("6")), 6);
        assert_eq!(parse_min_password_len(Some("2")), 6);
        assert_eq!(parse_min_password_len(Some("32")), 8);
        assert_eq!(parse_min_password_len(Some("abc")), 8);
    }

    #[test]
    fn invite_policy_gates_roles() {
        let strict: InvitePolicy = "owners".parse().unwrap();
        assert!(strict.allows(OrgRole::Owner));
        assert!(!strict.allows(OrgRole::Editor));

        let relaxed: InvitePolicy = "Owners-And-Editors".parse().unwrap();
        assert!(relaxed.allows(OrgRole::Editor));
        assert!(!relaxed.allows(OrgRole::Viewer));
        assert!("admins".parse::<InvitePolicy>().is_err());
    }

    #[test]
    fn identity_mode_parses() {
        assert_eq!("REMOTE".parse::<IdentityMode>().unwrap(), IdentityMode::Remote);
        assert!("ldap".parse::<IdentityMode>().is_err());
    }
}
