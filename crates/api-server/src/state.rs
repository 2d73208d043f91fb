//! Application state

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tokio::sync::Mutex;

use fp_core::identity::{
    IdentityService, LocalIdentity, LocalIdentityConfig, RemoteIdentity, RemoteIdentityConfig,
};
use fp_core::invite::{AcceptanceEngine, InvitationLedger, ResendService};
use fp_core::link::ResendThrottle;
use fp_core::org::{FileOrgStore, MemberService, OrgRepository};

use crate::config::{IdentityMode, ServerConfig};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServerConfig,
    repo: Arc<dyn OrgRepository>,
    identity: Arc<dyn IdentityService>,
    ledger: InvitationLedger,
    acceptance: AcceptanceEngine,
    members: MemberService,
    resend: ResendService,
    throttle: Mutex<ResendThrottle>,
}

impl AppState {
    /// Build the org store and identity provider named by `config`
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let repo: Arc<dyn OrgRepository> = Arc::new(
            FileOrgStore::new(config.data_dir.clone())
                .await
                .context("Failed to open org store")?,
        );
        let identity = build_identity(&config).await?;
        Self::with_services(config, repo, identity)
    }

    pub fn with_services(
        config: ServerConfig,
        repo: Arc<dyn OrgRepository>,
        identity: Arc<dyn IdentityService>,
    ) -> anyhow::Result<Self> {
        let resend = ResendService::new(Arc::clone(&repo), Arc::clone(&identity), &config.site_url)
            .context("Invalid FP_SITE_URL")?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                ledger: InvitationLedger::new(Arc::clone(&repo)),
                acceptance: AcceptanceEngine::new(Arc::clone(&repo)),
                members: MemberService::new(Arc::clone(&repo)),
                resend,
                throttle: Mutex::new(ResendThrottle::default()),
                config,
                repo,
                identity,
            }),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn repo(&self) -> &Arc<dyn OrgRepository> {
        &self.inner.repo
    }

    pub fn identity(&self) -> &Arc<dyn IdentityService> {
        &self.inner.identity
    }

    pub fn ledger(&self) -> &InvitationLedger {
        &self.inner.ledger
    }

    pub fn acceptance(&self) -> &AcceptanceEngine {
        &self.inner.acceptance
    }

    pub fn members(&self) -> &MemberService {
        &self.inner.members
    }

    pub fn resend(&self) -> &ResendService {
        &self.inner.resend
    }

    pub fn throttle(&self) -> &Mutex<ResendThrottle> {
        &self.inner.throttle
    }
}

async fn build_identity(config: &ServerConfig) -> anyhow::Result<Arc<dyn IdentityService>> {
    match config.identity_mode {
        IdentityMode::Local => {
            let mut local_config = LocalIdentityConfig::default();
            if let Some(secret) = &config.jwt_secret {
                local_config.jwt_secret = secret.clone();
            } else {
                tracing::warn!("FP_JWT_SECRET is not set; using the development signing secret");
            }
            let identity = LocalIdentity::new(config.data_dir.join("identity"), local_config)
                .await
                .context("Failed to open local identity store")?;
            tracing::info!("Using local identity provider");
            Ok(Arc::new(identity))
        }
        IdentityMode::Remote => {
            let base_url = config
                .identity_url
                .clone()
                .ok_or_else(|| anyhow!("FP_IDENTITY_URL is required in remote identity mode"))?;
            let anon_key = config
                .identity_anon_key
                .clone()
                .ok_or_else(|| anyhow!("FP_IDENTITY_ANON_KEY is required in remote identity mode"))?;
            if config.identity_service_key.is_none() {
                tracing::warn!("FP_IDENTITY_SERVICE_KEY is not set; invitations will fail");
            }
            tracing::info!("Using remote identity provider at {}", base_url);
            Ok(Arc::new(RemoteIdentity::new(RemoteIdentityConfig {
                base_url,
                anon_key,
                service_key: config.identity_service_key.clone(),
            })))
        }
    }
}
