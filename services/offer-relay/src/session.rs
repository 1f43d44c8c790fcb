//! Steam web session and re-authentication on expiry

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::RelayConfig;
use crate::notify::Notifier;
use crate::types::{RelayError, Result};

/// Authenticated Steam Community web session
#[derive(Clone, PartialEq, Eq)]
pub struct WebSession {
    pub steam_id: String,
    pub session_id: String,
    pub login_secure: String,
}

impl WebSession {
    pub fn cookie_header(&self) -> String {
        format!(
            "sessionid={}; steamLoginSecure={}",
            self.session_id, self.login_secure
        )
    }
}

impl fmt::Debug for WebSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSession")
            .field("steam_id", &self.steam_id)
            .field("session_id", &"<redacted>")
            .field("login_secure", &"<redacted>")
            .finish()
    }
}

/// Produces an authenticated session
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn login(&self) -> Result<WebSession>;
}

/// Anything that can take a freshly issued session
#[async_trait]
pub trait SessionHolder: Send + Sync {
    async fn set_session(&self, session: WebSession);
}

/// Builds a session from the configured web cookies
///
/// The `.env` file is re-read on every login so rotated cookies are picked up
/// without a restart.
#[derive(Debug, Clone, Default)]
pub struct CookieAuthenticator;

impl CookieAuthenticator {
    pub fn new() -> Self {
        Self
    }

    pub fn session_from_config(config: &RelayConfig) -> Result<WebSession> {
        if config.steam_session_id.is_empty() || config.steam_login_secure.is_empty() {
            return Err(RelayError::Config(
                "STEAM_SESSION_ID and STEAM_LOGIN_SECURE must be set".to_string(),
            ));
        }

        Ok(WebSession {
            steam_id: config.steam_id.clone(),
            session_id: config.steam_session_id.clone(),
            login_secure: config.steam_login_secure.clone(),
        })
    }
}

#[async_trait]
impl Authenticator for CookieAuthenticator {
    async fn login(&self) -> Result<WebSession> {
        if let Err(e) = dotenvy::dotenv_override() {
            warn!("No .env file reloaded: {}", e);
        }
        let config = RelayConfig::from_env()?;
        let session = Self::session_from_config(&config)?;
        info!("Steam web session loaded for {}", session.steam_id);
        Ok(session)
    }
}

/// Re-authenticate every time the platform client flags an expired session.
///
/// Runs until the expiry channel closes.
pub async fn watch_session_expiry(
    authenticator: Arc<dyn Authenticator>,
    holder: Arc<dyn SessionHolder>,
    notifier: Arc<dyn Notifier>,
    mut expired: mpsc::Receiver<()>,
) {
    while expired.recv().await.is_some() {
        notifier.notify("Steam session expired").await;

        match authenticator.login().await {
            Ok(session) => {
                holder.set_session(session).await;
                notifier.notify("Web cookies set").await;
            }
            Err(e) => {
                error!("Re-authentication failed: {}", e);
                notifier
                    .notify(&format!("Unable to refresh Steam session: {}", e))
                    .await;
            }
        }
    }

    warn!("Session expiry watcher exited");
}
