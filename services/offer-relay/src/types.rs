use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Single inventory item moved by an offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(deserialize_with = "number_or_string")]
    pub appid: String,
    #[serde(deserialize_with = "number_or_string")]
    pub contextid: String,
    #[serde(default = "default_amount", deserialize_with = "amount_from_any")]
    pub amount: u32,
    #[serde(deserialize_with = "number_or_string")]
    pub assetid: String,
}

fn default_amount() -> u32 {
    1
}

/// Feed payloads are inconsistent about quoting ids, so accept both forms.
pub(crate) fn number_or_string<'de, D>(
    deserializer: D,
) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Str(s) => Ok(s),
        Raw::Num(n) => Ok(n.to_string()),
    }
}

fn amount_from_any<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = number_or_string(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// Stage at which an offer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferStage {
    Send,
    Confirm,
}

/// Offer lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum OfferState {
    Created,
    AssetsAttached,
    Sent,
    PendingConfirmation,
    Confirmed,
    Rejected { reason: String },
    Failed { stage: OfferStage, error: String },
    CancelRequested,
    Cancelled,
}

impl OfferState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OfferState::Rejected { .. } | OfferState::Failed { .. } | OfferState::Cancelled
        )
    }
}

/// A trade offer this process built or located on the platform
#[derive(Debug, Clone, PartialEq)]
pub struct Offer {
    /// Assigned by the platform once the offer is created
    pub id: Option<String>,
    pub trade_link: String,
    pub assets: Vec<Asset>,
    pub state: OfferState,
}

impl Offer {
    pub fn new(trade_link: &str) -> Self {
        Self {
            id: None,
            trade_link: trade_link.to_string(),
            assets: Vec::new(),
            state: OfferState::Created,
        }
    }

    pub fn attach(&mut self, asset: Asset) {
        self.assets.push(asset);
        self.state = OfferState::AssetsAttached;
    }

    pub fn asset_ids(&self) -> String {
        self.assets
            .iter()
            .map(|a| a.assetid.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Status reported by the platform after a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    /// Mobile or email confirmation required before the partner sees it
    Pending,
    Sent,
    Accepted,
    Other(String),
}

impl SendStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => SendStatus::Pending,
            "sent" => SendStatus::Sent,
            "accepted" => SendStatus::Accepted,
            other => SendStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SendStatus::Pending => "pending",
            SendStatus::Sent => "sent",
            SendStatus::Accepted => "accepted",
            SendStatus::Other(s) => s,
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful platform send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub offer_id: String,
    pub status: SendStatus,
}

/// Error types for the relay
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Platform request failed: {0}")]
    Platform(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Feed channel error: {0}")]
    Channel(String),

    #[error("Malformed feed payload: {0}")]
    Schema(String),

    #[error("Steam session expired")]
    SessionExpired,

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
