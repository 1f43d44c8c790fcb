//! Relay configuration loaded from the environment (and `.env`)

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

use crate::types::{RelayError, Result};

/// Default Waxpeer feed endpoint
pub const DEFAULT_FEED_URL: &str = "wss://wssex.waxpeer.com";

/// Relay configuration
///
/// Every field maps to the upper-cased environment variable of the same name,
/// e.g. `steam_id` <- `STEAM_ID`.
#[derive(Clone, Deserialize)]
pub struct RelayConfig {
    /// SteamID64 of the selling account
    pub steam_id: String,
    pub waxpeer_api_key: String,
    /// Our own trade link, announced to the feed on auth
    pub steam_trade_link: String,
    /// Base64 identity secret used to sign mobile confirmations
    pub steam_identity_secret: String,
    /// Steam Web API key (offer lookups)
    pub steam_api_key: String,
    #[serde(default)]
    pub steam_session_id: String,
    #[serde(default)]
    pub steam_login_secure: String,
    #[serde(default)]
    pub discord_webhook_url: Option<String>,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

impl RelayConfig {
    /// Load `.env` (if present) then read the process environment
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Self::build(config::Environment::default())
    }

    /// Build from an explicit variable map instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        Self::build(config::Environment::default().source(Some(vars)))
    }

    fn build(source: config::Environment) -> Result<Self> {
        let config: RelayConfig = config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RelayError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let required = [
            ("STEAM_ID", &self.steam_id),
            ("WAXPEER_API_KEY", &self.waxpeer_api_key),
            ("STEAM_TRADE_LINK", &self.steam_trade_link),
            ("STEAM_IDENTITY_SECRET", &self.steam_identity_secret),
            ("STEAM_API_KEY", &self.steam_api_key),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(RelayError::Config(format!("{} must not be empty", name)));
            }
        }

        if let Some(url) = &self.discord_webhook_url {
            url::Url::parse(url)
                .map_err(|e| RelayError::Config(format!("DISCORD_WEBHOOK_URL: {}", e)))?;
        }

        url::Url::parse(&self.feed_url)
            .map_err(|e| RelayError::Config(format!("FEED_URL: {}", e)))?;

        Ok(())
    }
}

impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("steam_id", &self.steam_id)
            .field("waxpeer_api_key", &"<redacted>")
            .field("steam_trade_link", &self.steam_trade_link)
            .field("steam_identity_secret", &"<redacted>")
            .field("steam_api_key", &"<redacted>")
            .field("steam_session_id", &"<redacted>")
            .field("steam_login_secure", &"<redacted>")
            .field("discord_webhook_url", &self.discord_webhook_url.is_some())
            .field("feed_url", &self.feed_url)
            .finish()
    }
}
