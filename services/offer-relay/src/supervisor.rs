//! Feed connection lifecycle: connect, authenticate, heartbeat, reconnect

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::notify::Notifier;
use crate::types::*;

/// Ping period while the feed is live
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(25_000);

/// Delay before each reconnect attempt, in order. Its length is the budget.
pub const RECONNECT_SCHEDULE_MS: [u64; 5] = [0, 5_000, 10_000, 20_000, 30_000];

const PING_FRAME: &str = r#"{"name":"ping"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Live,
}

/// Consecutive reconnect attempts left, with their delays
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBudget {
    schedule: Vec<Duration>,
    used: usize,
}

impl ReconnectBudget {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule, used: 0 }
    }

    /// Consume one attempt, returning its delay, or `None` once exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = self.schedule.get(self.used).copied()?;
        self.used += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }

    pub fn cap(&self) -> usize {
        self.schedule.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.cap() - self.used
    }
}

impl Default for ReconnectBudget {
    fn default() -> Self {
        Self::new(
            RECONNECT_SCHEDULE_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        )
    }
}

/// What the transport reports about an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(String),
    Error(String),
    Closed,
}

/// An open feed channel. Dropping `outbound` lets the writer shut down;
/// `inbound` ending is treated as closure.
pub struct FeedChannel {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Opens feed channels
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn open(&self, url: &str) -> Result<FeedChannel>;
}

/// Consumes inbound text frames, one at a time
#[async_trait]
pub trait FrameHandler: Send {
    async fn handle(&mut self, frame: &str);
}

/// Identity announced to the feed on every connect
#[derive(Clone)]
pub struct FeedCredentials {
    pub steam_id: String,
    pub api_key: String,
    pub trade_link: String,
}

impl FeedCredentials {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            steam_id: config.steam_id.clone(),
            api_key: config.waxpeer_api_key.clone(),
            trade_link: config.steam_trade_link.clone(),
        }
    }

    fn auth_frame(&self) -> Result<String> {
        let frame = AuthFrame {
            name: "auth",
            steamid: &self.steam_id,
            api_key: &self.api_key,
            tradelink: &self.trade_link,
        };
        serde_json::to_string(&frame).map_err(|e| RelayError::Channel(e.to_string()))
    }
}

#[derive(Serialize)]
struct AuthFrame<'a> {
    name: &'static str,
    steamid: &'a str,
    #[serde(rename = "apiKey")]
    api_key: &'a str,
    tradelink: &'a str,
}

/// Keeps exactly one feed connection alive and hands its frames to `H`
pub struct ConnectionSupervisor<H: FrameHandler> {
    transport: Arc<dyn FeedTransport>,
    handler: H,
    notifier: Arc<dyn Notifier>,
    feed_url: String,
    credentials: FeedCredentials,
    heartbeat_interval: Duration,
    budget: ReconnectBudget,
    state_tx: watch::Sender<ConnectionState>,
}

impl<H: FrameHandler> ConnectionSupervisor<H> {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        handler: H,
        notifier: Arc<dyn Notifier>,
        feed_url: &str,
        credentials: FeedCredentials,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            transport,
            handler,
            notifier,
            feed_url: feed_url.to_string(),
            credentials,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            budget: ReconnectBudget::default(),
            state_tx,
        }
    }

    /// Read-only view of the connection state
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Run until the reconnect budget is exhausted.
    ///
    /// Only ever returns `Err(ReconnectExhausted)`; the caller decides what
    /// a deaf relay does next.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.set_state(ConnectionState::Connecting);
            info!("Connecting to feed at {}", self.feed_url);

            match self.transport.open(&self.feed_url).await {
                Ok(channel) => self.serve(channel).await,
                Err(e) => {
                    error!("Feed connection failed: {}", e);
                    self.notifier
                        .notify(&format!("Feed connection error: {}", e))
                        .await;
                }
            }

            self.set_state(ConnectionState::Disconnected);

            let Some(delay) = self.budget.next_delay() else {
                let attempts = self.budget.cap() as u32;
                error!("Giving up on feed after {} reconnect attempts", attempts);
                self.notifier
                    .notify(&format!(
                        "Reconnection failed after {} attempts. The relay is no longer listening; restart it.",
                        attempts
                    ))
                    .await;
                return Err(RelayError::ReconnectExhausted { attempts });
            };

            warn!(
                "Feed disconnected, reconnect attempt {}/{} in {:?}",
                self.budget.used(),
                self.budget.cap(),
                delay
            );
            self.notifier
                .notify(&format!(
                    "Disconnected from Waxpeer WebSocket. Reconnecting in {}s (attempt {}/{}).",
                    delay.as_secs(),
                    self.budget.used(),
                    self.budget.cap()
                ))
                .await;

            tokio::time::sleep(delay).await;
        }
    }

    /// Authenticate, go live and pump frames until the channel closes
    async fn serve(&mut self, mut channel: FeedChannel) {
        self.set_state(ConnectionState::Authenticating);

        let auth = match self.credentials.auth_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Cannot build auth frame: {}", e);
                return;
            }
        };
        if channel.outbound.send(auth).await.is_err() {
            warn!("Feed channel closed before auth was sent");
            self.notifier
                .notify("Feed connection error: channel closed during auth")
                .await;
            return;
        }

        // The feed sends no auth ack
        self.set_state(ConnectionState::Live);
        self.budget.reset();
        info!("Feed live");
        self.notifier.notify("Connected to Waxpeer WebSocket").await;

        let heartbeat = tokio::spawn(heartbeat(
            channel.outbound.clone(),
            self.state_tx.subscribe(),
            self.heartbeat_interval,
        ));

        while let Some(event) = channel.inbound.recv().await {
            match event {
                ChannelEvent::Frame(text) => self.handler.handle(&text).await,
                ChannelEvent::Error(e) => {
                    warn!("Feed channel error: {}", e);
                    self.notifier
                        .notify(&format!("Feed connection error: {}", e))
                        .await;
                }
                ChannelEvent::Closed => break,
            }
        }

        heartbeat.abort();
        info!("Feed channel closed");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state: {:?} -> {:?}", previous, state);
        }
    }
}

/// Ping the feed every `period` while the connection is live
async fn heartbeat(
    outbound: mpsc::Sender<String>,
    state: watch::Receiver<ConnectionState>,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        if *state.borrow() != ConnectionState::Live {
            continue;
        }
        if outbound.send(PING_FRAME.to_string()).await.is_err() {
            debug!("Heartbeat stopped: channel writer gone");
            break;
        }
    }
}
