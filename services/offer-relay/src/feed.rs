//! Waxpeer websocket transport

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::supervisor::{ChannelEvent, FeedChannel, FeedTransport};
use crate::types::*;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Buffered frames per direction
const CHANNEL_CAPACITY: usize = 256;

/// Opens feed channels over tokio-tungstenite
///
/// The socket is split so the writer (auth, pings, pongs) never waits on
/// the reader.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn open(&self, url: &str) -> Result<FeedChannel> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| RelayError::Channel(format!("WebSocket connection failed: {}", e)))?;

        info!("Connected to {}", url);

        let (ws_sink, ws_reader) = ws_stream.split();
        let ws_sink = Arc::new(Mutex::new(ws_sink));

        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(write_frames(Arc::clone(&ws_sink), out_rx));
        tokio::spawn(read_frames(ws_sink, ws_reader, in_tx));

        Ok(FeedChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Forward outbound text frames until every sender is dropped
async fn write_frames(ws_sink: Arc<Mutex<WsSink>>, mut out_rx: mpsc::Receiver<String>) {
    while let Some(text) = out_rx.recv().await {
        let mut sink = ws_sink.lock().await;
        if let Err(e) = sink.send(Message::Text(text)).await {
            error!("Failed to send feed frame: {}", e);
            break;
        }
    }

    let mut sink = ws_sink.lock().await;
    if let Err(e) = sink.close().await {
        debug!("Closing feed socket: {}", e);
    }
}

/// Translate socket messages into channel events; always ends with `Closed`
async fn read_frames(
    ws_sink: Arc<Mutex<WsSink>>,
    mut ws_reader: WsReader,
    in_tx: mpsc::Sender<ChannelEvent>,
) {
    loop {
        match ws_reader.next().await {
            Some(Ok(Message::Text(text))) => {
                if in_tx.send(ChannelEvent::Frame(text)).await.is_err() {
                    break;
                }
            }
            Some(Ok(Message::Ping(data))) => {
                let mut sink = ws_sink.lock().await;
                if let Err(e) = sink.send(Message::Pong(data)).await {
                    error!("Failed to send pong: {}", e);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!("Feed closed by server: {:?}", frame);
                break;
            }
            Some(Err(e)) => {
                warn!("Feed socket error: {}", e);
                let _ = in_tx.send(ChannelEvent::Error(e.to_string())).await;
                break;
            }
            None => {
                info!("Feed stream ended");
                break;
            }
            _ => {} // binary and pong frames carry nothing for us
        }
    }

    let _ = in_tx.send(ChannelEvent::Closed).await;
}
