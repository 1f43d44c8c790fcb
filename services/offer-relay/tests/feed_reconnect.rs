//! Connection supervision against a scripted feed transport
//!
//! Time is paused, so reconnect delays and heartbeats run instantly while
//! keeping exact virtual timestamps.


use async_trait::async_trait;
use mock_platform::{CapturingNotifier, RecordingHandler};
use offer_relay::{
    ChannelEvent, ConnectionState, ConnectionSupervisor, FeedChannel, FeedCredentials,
    FeedTransport, RelayError, Result,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const FEED_URL: &str = "wss://feed.test";

enum Script {
    Fail,
    Open {
        events: Vec<ChannelEvent>,
        hold: Duration,
    },
}

fn open(events: Vec<ChannelEvent>, hold: Duration) -> Script {
    Script::Open { events, hold }
}

/// Plays one script entry per `open`; once the script runs out every open fails
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
    opened_at: Mutex<Vec<Instant>>,
    outbound: Mutex<Vec<mpsc::Receiver<String>>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn opens(&self) -> usize {
        self.opened_at.lock().unwrap().len()
    }

    /// Whole seconds between consecutive opens
    fn gaps(&self) -> Vec<u64> {
        let opened = self.opened_at.lock().unwrap();
        opened
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }

    /// Everything the supervisor wrote to connection `index`
    fn written(&self, index: usize) -> Vec<String> {
        let mut outbound = self.outbound.lock().unwrap();
        let rx = &mut outbound[index];
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn open(&self, _url: &str) -> Result<FeedChannel> {
        self.opened_at.lock().unwrap().push(Instant::now());

        let next = self.script.lock().unwrap().pop_front();
        let (events, hold) = match next {
            Some(Script::Open { events, hold }) => (events, hold),
            Some(Script::Fail) | None => {
                return Err(RelayError::Channel("connection refused".to_string()))
            }
        };

        let (out_tx, out_rx) = mpsc::channel(64);
        let (in_tx, in_rx) = mpsc::channel(64);
        self.outbound.lock().unwrap().push(out_rx);

        tokio::spawn(async move {
            for event in events {
                if in_tx.send(event).await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(hold).await;
            let _ = in_tx.send(ChannelEvent::Closed).await;
        });

        Ok(FeedChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn credentials() -> FeedCredentials {
    FeedCredentials {
        steam_id: "76561198000000001".to_string(),
        api_key: "wax-key".to_string(),
        trade_link: "https://steamcommunity.com/tradeoffer/new/?partner=39734273&token=t"
            .to_string(),
    }
}

fn supervisor(
    transport: &Arc<ScriptedTransport>,
    handler: RecordingHandler,
    notifier: &Arc<CapturingNotifier>,
) -> ConnectionSupervisor<RecordingHandler> {
    ConnectionSupervisor::new(
        transport.clone(),
        handler,
        notifier.clone(),
        FEED_URL,
        credentials(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_five_failed_reconnects() {
    let transport = Arc::new(ScriptedTransport::new(vec![]));
    let notifier = Arc::new(CapturingNotifier::new());
    let supervisor = supervisor(&transport, RecordingHandler::default(), &notifier);
    let state = supervisor.state();

    let result = supervisor.run().await;

    assert_eq!(result, Err(RelayError::ReconnectExhausted { attempts: 5 }));
    assert_eq!(transport.opens(), 6);
    assert_eq!(transport.gaps(), vec![0, 5, 10, 20, 30]);
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);

    let reconnects = notifier.matching("Reconnecting in");
    assert_eq!(reconnects.len(), 5);
    assert!(reconnects[0].contains("attempt 1/5"));
    assert!(reconnects[4].contains("Reconnecting in 30s (attempt 5/5)"));
    assert_eq!(notifier.matching("Feed connection error").len(), 6);

    let last = notifier.lines().pop().unwrap();
    assert!(last.starts_with("Reconnection failed after 5 attempts"));
}

#[tokio::test(start_paused = true)]
async fn test_live_session_resets_budget() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        open(vec![], Duration::from_secs(1)),
        Script::Fail,
        open(vec![], Duration::from_secs(1)),
    ]));
    let notifier = Arc::new(CapturingNotifier::new());
    let supervisor = supervisor(&transport, RecordingHandler::default(), &notifier);

    let result = supervisor.run().await;

    assert_eq!(result, Err(RelayError::ReconnectExhausted { attempts: 5 }));
    // live, fail, live, then five more failures to exhaust the fresh budget
    assert_eq!(transport.opens(), 8);

    let reconnects = notifier.matching("Reconnecting in");
    assert!(reconnects[0].contains("attempt 1/5"));
    assert!(reconnects[1].contains("attempt 2/5"));
    assert!(reconnects[2].contains("attempt 1/5"));
    assert_eq!(notifier.matching("Connected to Waxpeer WebSocket").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_frames_reach_handler_and_heartbeat_runs() {
    let transport = Arc::new(ScriptedTransport::new(vec![open(
        vec![
            ChannelEvent::Frame(r#"{"name":"send-trade"}"#.to_string()),
            ChannelEvent::Frame(r#"{"name":"cancel-trade"}"#.to_string()),
        ],
        Duration::from_secs(60),
    )]));
    let notifier = Arc::new(CapturingNotifier::new());
    let handler = RecordingHandler::default();
    let supervisor = supervisor(&transport, handler.clone(), &notifier);

    let _ = supervisor.run().await;

    assert_eq!(
        handler.frames(),
        vec![
            r#"{"name":"send-trade"}"#.to_string(),
            r#"{"name":"cancel-trade"}"#.to_string(),
        ]
    );

    let written = transport.written(0);
    assert_eq!(written.len(), 3);

    let auth: serde_json::Value = serde_json::from_str(&written[0]).unwrap();
    assert_eq!(auth["name"], "auth");
    assert_eq!(auth["steamid"], "76561198000000001");
    assert_eq!(auth["apiKey"], "wax-key");
    assert!(auth["tradelink"].as_str().unwrap().contains("partner=39734273"));

    assert_eq!(written[1], r#"{"name":"ping"}"#);
    assert_eq!(written[2], r#"{"name":"ping"}"#);
}

#[tokio::test(start_paused = true)]
async fn test_error_then_close_counts_one_attempt() {
    let transport = Arc::new(ScriptedTransport::new(vec![open(
        vec![
            ChannelEvent::Error("boom".to_string()),
            ChannelEvent::Closed,
        ],
        Duration::ZERO,
    )]));
    let notifier = Arc::new(CapturingNotifier::new());
    let handler = RecordingHandler::default();
    let supervisor = supervisor(&transport, handler.clone(), &notifier);

    let result = supervisor.run().await;

    assert_eq!(result, Err(RelayError::ReconnectExhausted { attempts: 5 }));
    assert_eq!(transport.opens(), 6);
    assert_eq!(notifier.matching("Feed connection error: boom").len(), 1);
    assert!(handler.frames().is_empty());
}
