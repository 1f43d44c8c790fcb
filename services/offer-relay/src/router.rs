//! Inbound feed frame decoding and routing

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::dispatcher::OfferDispatcher;
use crate::notify::Notifier;
use crate::supervisor::FrameHandler;
use crate::types::*;

/// `send-trade` payload
#[derive(Debug, Clone, Deserialize)]
pub struct SendTradePayload {
    pub tradelink: String,
    pub json_tradeoffer: JsonTradeOffer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonTradeOffer {
    pub me: TradeOfferSide,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradeOfferSide {
    pub assets: Vec<Asset>,
}

/// `cancel-trade` payload
#[derive(Debug, Clone, Deserialize)]
pub struct CancelTradePayload {
    #[serde(deserialize_with = "crate::types::number_or_string")]
    pub trade_id: String,
}

/// Decoded feed event
#[derive(Debug, Clone)]
pub enum FeedEvent {
    SendTrade(SendTradePayload),
    CancelTrade(CancelTradePayload),
    /// Any other event name, including frames without one
    Unknown(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    data: Value,
}

impl FeedEvent {
    /// Decode one text frame. Unknown names are not an error.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| RelayError::Schema(format!("invalid frame: {}", e)))?;

        let name = envelope.name.unwrap_or_default();
        match name.as_str() {
            "send-trade" => serde_json::from_value(envelope.data)
                .map(FeedEvent::SendTrade)
                .map_err(|e| RelayError::Schema(format!("send-trade: {}", e))),
            // older feed builds emit the camel-case name
            "cancel-trade" | "cancelTrade" => serde_json::from_value(envelope.data)
                .map(FeedEvent::CancelTrade)
                .map_err(|e| RelayError::Schema(format!("cancel-trade: {}", e))),
            _ => Ok(FeedEvent::Unknown(name)),
        }
    }
}

/// Routes decoded feed events to the offer dispatcher
pub struct EventRouter {
    dispatcher: OfferDispatcher,
    notifier: Arc<dyn Notifier>,
}

impl EventRouter {
    pub fn new(dispatcher: OfferDispatcher, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            dispatcher,
            notifier,
        }
    }

    pub fn dispatcher(&self) -> &OfferDispatcher {
        &self.dispatcher
    }

    /// Handle one event to completion, including every retry
    pub async fn route(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::SendTrade(payload) => {
                self.dispatcher
                    .send_trade(&payload.tradelink, payload.json_tradeoffer.me.assets)
                    .await;
            }
            FeedEvent::CancelTrade(payload) => {
                // failures are already reported by the dispatcher
                let _ = self.dispatcher.cancel_trade(&payload.trade_id).await;
            }
            FeedEvent::Unknown(name) => {
                debug!("Ignoring feed event: {:?}", name);
            }
        }
    }
}

#[async_trait]
impl FrameHandler for EventRouter {
    async fn handle(&mut self, frame: &str) {
        match FeedEvent::decode(frame) {
            Ok(event) => self.route(event).await,
            Err(e) => {
                warn!("Dropping feed frame: {}", e);
                self.notifier.notify(&e.to_string()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_send_trade() {
        let frame = r#"{
            "name": "send-trade",
            "data": {
                "tradelink": "https://steamcommunity.com/tradeoffer/new/?partner=1&token=t",
                "json_tradeoffer": {
                    "newversion": true,
                    "version": 2,
                    "me": {
                        "assets": [
                            {"appid": 730, "contextid": "2", "amount": 1, "assetid": "777"}
                        ],
                        "currency": [],
                        "ready": false
                    },
                    "them": {"assets": [], "currency": [], "ready": false}
                }
            }
        }"#;

        match FeedEvent::decode(frame).unwrap() {
            FeedEvent::SendTrade(payload) => {
                assert!(payload.tradelink.ends_with("token=t"));
                assert_eq!(payload.json_tradeoffer.me.assets.len(), 1);
                assert_eq!(payload.json_tradeoffer.me.assets[0].assetid, "777");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_cancel_trade_aliases() {
        for frame in [
            r#"{"name": "cancel-trade", "data": {"trade_id": "6001"}}"#,
            r#"{"name": "cancelTrade", "data": {"trade_id": 6001}}"#,
        ] {
            match FeedEvent::decode(frame).unwrap() {
                FeedEvent::CancelTrade(payload) => assert_eq!(payload.trade_id, "6001"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_unknown_event_is_not_an_error() {
        let event =
            FeedEvent::decode(r#"{"name": "steam-status", "data": {"up": true}}"#).unwrap();
        assert!(matches!(event, FeedEvent::Unknown(name) if name == "steam-status"));

        let event = FeedEvent::decode(r#"{"pong": 1}"#).unwrap();
        assert!(matches!(event, FeedEvent::Unknown(name) if name.is_empty()));
    }

    #[test]
    fn test_missing_field_is_schema_error() {
        let err = FeedEvent::decode(r#"{"name": "send-trade", "data": {"tradelink": "x"}}"#)
            .unwrap_err();
        assert!(matches!(err, RelayError::Schema(_)));

        let err = FeedEvent::decode(r#"{"name": "cancel-trade", "data": {}}"#).unwrap_err();
        assert!(matches!(err, RelayError::Schema(_)));

        let err = FeedEvent::decode("not json").unwrap_err();
        assert!(matches!(err, RelayError::Schema(_)));
    }
}
