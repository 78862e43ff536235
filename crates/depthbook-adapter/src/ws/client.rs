/*
[INPUT]:  Stream base URL, symbol and reconnect policy
[OUTPUT]: Raw diff-stream messages and connection events via channels
[POS]:    WebSocket layer - connection lifecycle, reconnect and backoff
[UPDATE]: When changing stream naming or connection logic
*/

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::backoff::backoff_delay;
use crate::http::{DepthError, Result};
use crate::transport::{StreamEvent, StreamHandle};
use crate::types::{Market, StreamSpeed};

const MESSAGE_SAMPLE_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static MESSAGE_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect and buffering policy for one stream
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Consecutive failed connects tolerated before the stream is closed.
    pub max_reconnects: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_reconnects: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            channel_capacity: 1024,
        }
    }
}

/// Per-symbol depth diff stream transport
#[derive(Debug, Clone)]
pub struct DepthWebSocket {
    base_url: String,
    speed: StreamSpeed,
    config: StreamConfig,
}

impl DepthWebSocket {
    /// Create a transport against the market's public stream endpoint
    pub fn new(market: Market, speed: StreamSpeed) -> Self {
        Self::with_base_url(market.stream_base_url(), speed, StreamConfig::default())
    }

    pub fn with_base_url(base_url: &str, speed: StreamSpeed, config: StreamConfig) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            speed,
            config,
        }
    }

    /// Stream URL for a symbol, e.g. `wss://.../ws/btcusdt@depth@100ms`
    pub fn stream_url(&self, symbol: &str) -> String {
        format!(
            "{}/{}{}",
            self.base_url,
            symbol.to_ascii_lowercase(),
            self.speed.stream_suffix()
        )
    }

    /// Spawn the connection task and return its receiving end
    pub fn open_stream(&self, symbol: &str) -> Result<StreamHandle> {
        if symbol.trim().is_empty() {
            return Err(DepthError::Config("stream symbol must not be empty".to_string()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DepthError::WebSocket(
                "stream opened outside a Tokio runtime".to_string(),
            ));
        }

        let url = self.stream_url(symbol);
        let config = self.config.clone();
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let task = tokio::spawn(run_stream(url, config, tx));
        Ok(StreamHandle::new(rx, task))
    }
}

#[derive(Debug)]
enum PumpExit {
    ReceiverGone,
    Disconnected(String),
}

async fn run_stream(url: String, config: StreamConfig, tx: mpsc::Sender<StreamEvent>) {
    let mut retry_count: u32 = 0;
    let mut connected_once = false;

    loop {
        if tx.is_closed() {
            return;
        }

        info!(%url, "connecting depth stream");
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _response)) => {
                let event = if connected_once {
                    StreamEvent::Reconnected {
                        attempts: retry_count + 1,
                    }
                } else {
                    StreamEvent::Connected
                };
                connected_once = true;
                retry_count = 0;
                if tx.send(event).await.is_err() {
                    return;
                }
                info!(%url, "depth stream connected");

                match pump(ws_stream, &tx).await {
                    PumpExit::ReceiverGone => return,
                    PumpExit::Disconnected(reason) => {
                        warn!(%url, %reason, "depth stream disconnected");
                        if tx
                            .send(StreamEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            return;
                        }
                        continue;
                    }
                }
            }
            Err(err) => {
                retry_count = retry_count.saturating_add(1);
                if retry_count >= config.max_reconnects {
                    warn!(
                        %url,
                        retry_count,
                        max_reconnects = config.max_reconnects,
                        error = %err,
                        "depth stream gave up reconnecting"
                    );
                    let _ = tx
                        .send(StreamEvent::Closed {
                            reason: err.to_string(),
                        })
                        .await;
                    return;
                }

                let backoff = backoff_delay(retry_count, config.initial_backoff, config.max_backoff);
                warn!(%url, retry_count, ?backoff, error = %err, "depth stream connect failed; retrying with backoff");
                tokio::select! {
                    _ = tx.closed() => return,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }
}

async fn pump(ws_stream: WsStream, tx: &mpsc::Sender<StreamEvent>) -> PumpExit {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            _ = tx.closed() => {
                let _ = write.send(WsMessage::Close(None)).await;
                return PumpExit::ReceiverGone;
            }
            incoming = read.next() => {
                match incoming {
                    Some(Ok(WsMessage::Close(frame))) => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        let reason = frame
                            .map(|frame| frame.reason.to_string())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return PumpExit::Disconnected(reason);
                    }
                    Some(Ok(WsMessage::Ping(payload))) => {
                        if write.send(WsMessage::Pong(payload)).await.is_err() {
                            return PumpExit::Disconnected("pong write failed".to_string());
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Ok(message)) => {
                        let Some(text) = message_text(message) else {
                            continue;
                        };
                        log_message_sample_once(&text);
                        if tx.send(StreamEvent::Message(text)).await.is_err() {
                            return PumpExit::ReceiverGone;
                        }
                    }
                    Some(Err(err)) => {
                        return PumpExit::Disconnected(err.to_string());
                    }
                    None => {
                        return PumpExit::Disconnected("stream ended".to_string());
                    }
                }
            }
        }
    }
}

fn message_text(message: WsMessage) -> Option<String> {
    match message {
        WsMessage::Text(text) => Some(text.to_string()),
        WsMessage::Binary(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        _ => None,
    }
}

fn log_message_sample_once(raw: &str) {
    let count = MESSAGE_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= MESSAGE_SAMPLE_LIMIT {
        return;
    }

    info!(
        sample_index = count + 1,
        sample_limit = MESSAGE_SAMPLE_LIMIT,
        bytes = raw.len(),
        "ws message sample"
    );
    let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
    debug!(
        sample_index = count + 1,
        sample_limit = MESSAGE_SAMPLE_LIMIT,
        message = %preview,
        "ws message sample"
    );
}

pub(crate) fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut cut = max_len;
    while !value.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 3);
    out.push_str(&value[..cut]);
    out.push_str("...");
    out
}
