//! Session manager - WebSocket connection lifecycle and event plumbing
//!
//! Owns the transport toward the hub: a reconnect-forever loop with a
//! flat delay, JSON event frames in both directions, and connection
//! lifecycle triggers for the reconciliation engine. All inbound events
//! are forwarded as triggers; the engine is the single consumer.

use crate::config::AgentConfig;
use crate::engine::{Command, CommandKind, Trigger};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

/// One outbound frame toward the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    pub event: String,
    #[serde(rename = "data")]
    pub payload: Value,
}

impl OutboundEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// One inbound frame from the hub
#[derive(Debug, Deserialize)]
struct InboundEvent {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Map an inbound hub event to a reconciliation trigger.
///
/// `music:control` and `music:cmd` are tolerant aliases; echo/debug
/// events map to nothing.
fn trigger_for_event(event: &str, data: Value) -> Option<Trigger> {
    match event {
        "state:apply" => Some(Trigger::Push(data)),
        "leds:update" => Some(Trigger::Command(Command::new(CommandKind::LedsUpdate, data))),
        "leds:state" => Some(Trigger::Command(Command::new(CommandKind::LedsPower, data))),
        "leds:style" => Some(Trigger::Command(Command::new(CommandKind::LedsStyle, data))),
        "music:cmd" | "music:control" => {
            Some(Trigger::Command(Command::new(CommandKind::MusicCmd, data)))
        }
        "agent:ack" | "presence" => {
            debug!("Hub echo {}: {}", event, data);
            None
        }
        other => {
            debug!("Ignoring unknown hub event {:?}", other);
            None
        }
    }
}

/// Derive the WebSocket endpoint from the hub's HTTP base URL
fn ws_url(cfg: &AgentConfig) -> String {
    let base = cfg.hub.url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("ws://{base}")
    };
    format!("{}{}", ws_base, cfg.hub.ws_path)
}

/// Connect to the hub and retry forever on failure.
///
/// Flat delay, no backoff growth, no retry limit. Each established
/// connection emits `Trigger::Connected`; each loss emits
/// `Trigger::Disconnected` (the engine's cue for the defensive
/// blackout) before the next attempt.
pub async fn run_session(
    cfg: AgentConfig,
    triggers: mpsc::Sender<Trigger>,
    mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
) {
    let url = ws_url(&cfg);
    let delay = Duration::from_secs(cfg.timers.reconnect_delay_secs);

    loop {
        match connect(&cfg, &url).await {
            Ok(stream) => {
                info!("✅ Connected to hub at {}", url);
                if triggers.send(Trigger::Connected).await.is_err() {
                    return;
                }
                drive_connection(stream, &triggers, &mut outbound).await;
                warn!("❌ Hub session closed");
                if triggers.send(Trigger::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("⚠️  Hub connection failed, retry in {:?}: {}", delay, e);
            }
        }
        tokio::time::sleep(delay).await;
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(cfg: &AgentConfig, url: &str) -> anyhow::Result<WsStream> {
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("ApiKey {}", cfg.hub.api_key))?,
    );
    headers.insert("x-device-id", HeaderValue::from_str(&cfg.hub.device_id)?);

    let (stream, _response) = connect_async(request).await?;
    Ok(stream)
}

/// Pump one established connection until it drops
async fn drive_connection(
    stream: WsStream,
    triggers: &mpsc::Sender<Trigger>,
    outbound: &mut mpsc::UnboundedReceiver<OutboundEvent>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&text, triggers).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("⚠️  Session read error: {}", e);
                        return;
                    }
                }
            }
            ev = outbound.recv() => {
                let Some(ev) = ev else { return };
                let frame = match serde_json::to_string(&ev) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("⚠️  Failed to encode {} frame: {}", ev.event, e);
                        continue;
                    }
                };
                debug!("📤 {} → hub", ev.event);
                if let Err(e) = write.send(Message::Text(frame)).await {
                    warn!("⚠️  Session write failed: {}", e);
                    return;
                }
            }
        }
    }
}

async fn handle_text(text: &str, triggers: &mpsc::Sender<Trigger>) {
    let inbound: InboundEvent = match serde_json::from_str(text) {
        Ok(ev) => ev,
        Err(e) => {
            warn!("⚠️  Unparseable hub frame ({}): {}", e, text);
            return;
        }
    };
    debug!("⬇️  {} ← hub", inbound.event);
    if let Some(trigger) = trigger_for_event(&inbound.event, inbound.data) {
        if triggers.send(trigger).await.is_err() {
            debug!("Trigger channel closed, dropping inbound event");
        }
    }
}
