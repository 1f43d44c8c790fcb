//! Steam Community trade-offer client
//!
//! Talks to the community web endpoints with session cookies for sending,
//! confirming and cancelling, and to the Web API for offer lookups.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{header, Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::platform::TradePlatform;
use crate::session::{SessionHolder, WebSession};
use crate::types::*;

pub const COMMUNITY_URL: &str = "https://steamcommunity.com";
pub const WEB_API_URL: &str = "https://api.steampowered.com";

/// Offset between a 32-bit account id and its SteamID64
const STEAM_ID64_BASE: u64 = 76_561_197_960_265_728;

/// `ETradeOfferState::CreatedNeedsConfirmation`
const OFFER_STATE_NEEDS_CONFIRMATION: u32 = 9;

type HmacSha1 = Hmac<Sha1>;

/// Parsed `https://steamcommunity.com/tradeoffer/new/?partner=..&token=..`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeLink {
    pub account_id: u32,
    pub token: Option<String>,
}

impl TradeLink {
    pub fn parse(link: &str) -> Result<Self> {
        let url = url::Url::parse(link).map_err(|e| {
            RelayError::PolicyViolation(format!("Invalid trade link {}: {}", link, e))
        })?;

        let mut account_id = None;
        let mut token = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "partner" => account_id = value.parse::<u32>().ok(),
                "token" => token = Some(value.into_owned()),
                _ => {}
            }
        }

        let account_id = account_id.ok_or_else(|| {
            RelayError::PolicyViolation(format!("Trade link has no partner: {}", link))
        })?;

        Ok(Self { account_id, token })
    }

    pub fn steam_id64(&self) -> u64 {
        STEAM_ID64_BASE + u64::from(self.account_id)
    }

    pub fn url(&self) -> String {
        match &self.token {
            Some(token) => format!(
                "{}/tradeoffer/new/?partner={}&token={}",
                COMMUNITY_URL, self.account_id, token
            ),
            None => format!("{}/tradeoffer/new/?partner={}", COMMUNITY_URL, self.account_id),
        }
    }
}

/// Mobile confirmation key: base64(HMAC-SHA1(identity_secret, time || tag))
pub fn confirmation_key(identity_secret: &str, time: i64, tag: &str) -> Result<String> {
    let secret = STANDARD
        .decode(identity_secret)
        .map_err(|e| RelayError::Config(format!("Identity secret is not base64: {}", e)))?;

    let mut mac = HmacSha1::new_from_slice(&secret)
        .map_err(|e| RelayError::Config(format!("Identity secret rejected: {}", e)))?;
    mac.update(&(time as u64).to_be_bytes());
    mac.update(tag.as_bytes());

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Device id Steam expects from the mobile authenticator for this account
pub fn device_id(steam_id: &str) -> String {
    let digest = hex::encode(Sha1::digest(steam_id.as_bytes()));
    format!(
        "android:{}-{}-{}-{}-{}",
        &digest[0..8],
        &digest[8..12],
        &digest[12..16],
        &digest[16..20],
        &digest[20..32]
    )
}

/// Steam wants numeric app ids; anything unparseable is passed through as text
fn appid_value(appid: &str) -> Value {
    appid
        .parse::<u64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(appid))
}

/// `json_tradeoffer` form field for an offer giving our assets away
pub fn json_tradeoffer(assets: &[Asset]) -> Value {
    let assets: Vec<Value> = assets
        .iter()
        .map(|a| {
            json!({
                "appid": appid_value(&a.appid),
                "contextid": a.contextid,
                "amount": a.amount,
                "assetid": a.assetid,
            })
        })
        .collect();

    json!({
        "newversion": true,
        "version": assets.len() + 1,
        "me": { "assets": assets, "currency": [], "ready": false },
        "them": { "assets": [], "currency": [], "ready": false },
    })
}

/// Steam Community client implementing the trade-offer capabilities
pub struct SteamCommunityClient {
    client: Client,
    community_url: String,
    web_api_url: String,
    api_key: String,
    session: RwLock<WebSession>,
    /// Signals the session watcher; capacity 1 so bursts coalesce
    expired_tx: mpsc::Sender<()>,
}

impl SteamCommunityClient {
    /// Create a client plus the receiver that fires when the session expires
    pub fn new(api_key: &str, session: WebSession) -> Result<(Self, mpsc::Receiver<()>)> {
        Self::with_base_urls(COMMUNITY_URL, WEB_API_URL, api_key, session)
    }

    pub fn with_base_urls(
        community_url: &str,
        web_api_url: &str,
        api_key: &str,
        session: WebSession,
    ) -> Result<(Self, mpsc::Receiver<()>)> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayError::Config(format!("HTTP client: {}", e)))?;

        let (expired_tx, expired_rx) = mpsc::channel(1);

        Ok((
            Self {
                client,
                community_url: community_url.trim_end_matches('/').to_string(),
                web_api_url: web_api_url.trim_end_matches('/').to_string(),
                api_key: api_key.to_string(),
                session: RwLock::new(session),
                expired_tx,
            },
            expired_rx,
        ))
    }

    async fn current_session(&self) -> WebSession {
        self.session.read().await.clone()
    }

    /// Fail with `SessionExpired` when a community response bounced us to login
    fn check_session(&self, response: &Response) -> Result<()> {
        let expired = matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) || response.url().path().starts_with("/login");

        if expired {
            warn!("Steam session rejected ({})", response.status());
            self.flag_expired();
            return Err(RelayError::SessionExpired);
        }
        Ok(())
    }

    fn flag_expired(&self) {
        // Full channel means a refresh is already queued
        let _ = self.expired_tx.try_send(());
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RelayError::Platform(format!("{} body: {}", what, e)))?;

        if !status.is_success() {
            return Err(RelayError::Platform(format!(
                "{} failed: {} - {}",
                what, status, body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| {
            RelayError::Platform(format!("{} returned invalid JSON: {}", what, e))
        })
    }

    async fn confirmation_list(
        &self,
        identity_secret: &str,
        session: &WebSession,
    ) -> Result<ConfirmationList> {
        let time = chrono::Utc::now().timestamp();
        let key = confirmation_key(identity_secret, time, "list")?;
        let url = format!("{}/mobileconf/getlist", self.community_url);

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, session.cookie_header())
            .query(&[
                ("p", device_id(&session.steam_id)),
                ("a", session.steam_id.clone()),
                ("k", key),
                ("t", time.to_string()),
                ("m", "react".to_string()),
                ("tag", "list".to_string()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Platform(format!("Confirmation list: {}", e)))?;

        self.check_session(&response)?;
        let list: ConfirmationList = Self::read_json(response, "Confirmation list").await?;

        if list.needauth.unwrap_or(false) {
            self.flag_expired();
            return Err(RelayError::SessionExpired);
        }
        if !list.success {
            return Err(RelayError::Platform(format!(
                "Confirmation list unavailable: {}",
                list.message.unwrap_or_default()
            )));
        }
        Ok(list)
    }
}

#[async_trait]
impl SessionHolder for SteamCommunityClient {
    async fn set_session(&self, session: WebSession) {
        let mut current = self.session.write().await;
        *current = session;
        info!("Steam web session replaced");
    }
}

#[async_trait]
impl TradePlatform for SteamCommunityClient {
    async fn send(&self, offer: &Offer) -> Result<SendReceipt> {
        let link = TradeLink::parse(&offer.trade_link)?;
        let session = self.current_session().await;

        let create_params = match &link.token {
            Some(token) => json!({ "trade_offer_access_token": token }),
            None => json!({}),
        };

        let form = [
            ("sessionid", session.session_id.clone()),
            ("serverid", "1".to_string()),
            ("partner", link.steam_id64().to_string()),
            ("tradeoffermessage", String::new()),
            ("json_tradeoffer", json_tradeoffer(&offer.assets).to_string()),
            ("captcha", String::new()),
            ("trade_offer_create_params", create_params.to_string()),
        ];

        let url = format!("{}/tradeoffer/new/send", self.community_url);
        let response = self
            .client
            .post(&url)
            .header(header::COOKIE, session.cookie_header())
            .header(header::REFERER, link.url())
            .form(&form)
            .send()
            .await
            .map_err(|e| RelayError::Platform(format!("Send offer: {}", e)))?;

        self.check_session(&response)?;
        let resp: SendOfferResponse = Self::read_json(response, "Send offer").await?;

        let offer_id = match (resp.tradeofferid, resp.str_error) {
            (Some(id), _) => id,
            (None, Some(err)) => return Err(RelayError::Platform(err)),
            (None, None) => {
                return Err(RelayError::Platform(
                    "Send offer returned no tradeofferid".to_string(),
                ))
            }
        };

        let status = if resp.needs_mobile_confirmation || resp.needs_email_confirmation {
            SendStatus::Pending
        } else {
            SendStatus::Sent
        };

        debug!("Steam created offer {} ({})", offer_id, status);
        Ok(SendReceipt { offer_id, status })
    }

    async fn confirm(&self, identity_secret: &str, offer_id: &str) -> Result<()> {
        let session = self.current_session().await;
        let list = self.confirmation_list(identity_secret, &session).await?;

        let conf = list
            .conf
            .into_iter()
            .find(|c| c.creator_id == offer_id)
            .ok_or_else(|| {
                RelayError::Platform(format!("No pending confirmation for offer {}", offer_id))
            })?;

        let time = chrono::Utc::now().timestamp();
        let key = confirmation_key(identity_secret, time, "accept")?;
        let url = format!("{}/mobileconf/ajaxop", self.community_url);

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, session.cookie_header())
            .query(&[
                ("op", "allow".to_string()),
                ("p", device_id(&session.steam_id)),
                ("a", session.steam_id.clone()),
                ("k", key),
                ("t", time.to_string()),
                ("m", "react".to_string()),
                ("tag", "accept".to_string()),
                ("cid", conf.id),
                ("ck", conf.nonce),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Platform(format!("Confirm offer: {}", e)))?;

        self.check_session(&response)?;
        let resp: AjaxOpResponse = Self::read_json(response, "Confirm offer").await?;

        if resp.success {
            Ok(())
        } else {
            Err(RelayError::Platform(format!(
                "Confirmation for offer {} refused: {}",
                offer_id,
                resp.message.unwrap_or_default()
            )))
        }
    }

    async fn get_offer(&self, offer_id: &str) -> Result<Option<Offer>> {
        let url = format!("{}/IEconService/GetTradeOffer/v1/", self.web_api_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("tradeofferid", offer_id),
                ("language", "en"),
            ])
            .send()
            .await
            .map_err(|e| RelayError::Platform(format!("Get offer: {}", e)))?;

        let resp: GetTradeOfferResponse = Self::read_json(response, "Get offer").await?;

        let Some(found) = resp.response.offer else {
            return Ok(None);
        };

        let link = TradeLink {
            account_id: found.accountid_other,
            token: None,
        };
        let state = if found.trade_offer_state == OFFER_STATE_NEEDS_CONFIRMATION {
            OfferState::PendingConfirmation
        } else {
            OfferState::Sent
        };

        Ok(Some(Offer {
            id: Some(found.tradeofferid),
            trade_link: link.url(),
            assets: found.items_to_give,
            state,
        }))
    }

    async fn cancel(&self, offer: &Offer) -> Result<()> {
        let offer_id = offer
            .id
            .as_deref()
            .ok_or_else(|| RelayError::Platform("Cannot cancel an unsent offer".to_string()))?;
        let session = self.current_session().await;

        let url = format!("{}/tradeoffer/{}/cancel", self.community_url, offer_id);
        let response = self
            .client
            .post(&url)
            .header(header::COOKIE, session.cookie_header())
            .form(&[("sessionid", session.session_id.as_str())])
            .send()
            .await
            .map_err(|e| RelayError::Platform(format!("Cancel offer: {}", e)))?;

        self.check_session(&response)?;
        let resp: CancelOfferResponse = Self::read_json(response, "Cancel offer").await?;

        match resp.tradeofferid {
            Some(id) if id == offer_id => Ok(()),
            _ => Err(RelayError::Platform(format!(
                "Steam did not cancel offer {}",
                offer_id
            ))),
        }
    }
}

// Response types

#[derive(Debug, Deserialize)]
struct SendOfferResponse {
    tradeofferid: Option<String>,
    #[serde(default)]
    needs_mobile_confirmation: bool,
    #[serde(default)]
    needs_email_confirmation: bool,
    #[serde(rename = "strError")]
    str_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfirmationList {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    conf: Vec<Confirmation>,
    message: Option<String>,
    needauth: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Confirmation {
    id: String,
    nonce: String,
    creator_id: String,
}

#[derive(Debug, Deserialize)]
struct AjaxOpResponse {
    #[serde(default)]
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetTradeOfferResponse {
    #[serde(default)]
    response: GetTradeOfferBody,
}

#[derive(Debug, Default, Deserialize)]
struct GetTradeOfferBody {
    offer: Option<TradeOfferInfo>,
}

#[derive(Debug, Deserialize)]
struct TradeOfferInfo {
    tradeofferid: String,
    accountid_other: u32,
    #[serde(default)]
    items_to_give: Vec<Asset>,
    trade_offer_state: u32,
}

#[derive(Debug, Deserialize)]
struct CancelOfferResponse {
    tradeofferid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_link_parse() {
        let link = TradeLink::parse(
            "https://steamcommunity.com/tradeoffer/new/?partner=39734273&token=xyz_12",
        )
        .unwrap();
        assert_eq!(link.account_id, 39734273);
        assert_eq!(link.token.as_deref(), Some("xyz_12"));
        assert_eq!(link.steam_id64(), 76561198000000001);
        assert_eq!(
            link.url(),
            "https://steamcommunity.com/tradeoffer/new/?partner=39734273&token=xyz_12"
        );
    }

    #[test]
    fn test_trade_link_without_partner() {
        let err = TradeLink::parse("https://steamcommunity.com/tradeoffer/new/?token=abc")
            .unwrap_err();
        assert!(matches!(err, RelayError::PolicyViolation(_)));

        assert!(TradeLink::parse("not a link").is_err());
    }

    #[test]
    fn test_confirmation_key() {
        // base64("secret"), t = 1700000000
        let key = confirmation_key("c2VjcmV0", 1_700_000_000, "list").unwrap();
        assert_eq!(key, "FqfnC4u7EGkKxlfD/+YW8UoEpo4=");

        let other = confirmation_key("c2VjcmV0", 1_700_000_000, "accept").unwrap();
        assert_ne!(key, other);

        assert!(confirmation_key("%%%", 0, "list").is_err());
    }

    #[test]
    fn test_device_id() {
        assert_eq!(
            device_id("76561198000000001"),
            "android:ca748b58-133d-73d0-adcd-109baa02c0fa"
        );
    }

    #[test]
    fn test_json_tradeoffer_shape() {
        let value = json_tradeoffer(&[Asset {
            appid: "730".to_string(),
            contextid: "2".to_string(),
            amount: 1,
            assetid: "123".to_string(),
        }]);

        assert_eq!(value["version"], 2);
        assert_eq!(value["me"]["assets"][0]["appid"], 730);
        assert_eq!(value["me"]["assets"][0]["contextid"], "2");
        assert_eq!(value["me"]["assets"][0]["assetid"], "123");
        assert_eq!(value["them"]["assets"].as_array().unwrap().len(), 0);
    }
}
