//! Discord gateway session.
//!
//! The WebSocket gateway (v10) keeps the session alive and carries presence
//! updates; messages go out through the REST API. No Discord SDK, only
//! `tokio-tungstenite` and `reqwest`.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relaycell_core::config::{DiscordConfig, TOKEN_ENV};
use relaycell_core::{
    ActivityKind, Connection, Error, GatewayConnector, GatewaySession, PresenceSpec, Result,
    SessionEvent,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::rate_limit::ChannelRateLimiter;

/// Discord Gateway opcodes
mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const PRESENCE_UPDATE: u8 = 3;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Close codes after which reconnecting cannot succeed:
/// authentication failed, invalid shard, sharding required, invalid API
/// version, invalid intents, disallowed intents.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

const DEFAULT_HEARTBEAT_MS: u64 = 41250;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, WsMessage>;
type WsRead = SplitStream<WsStream>;

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Option<serde_json::Value>,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Serialize)]
struct GatewayFrame<T> {
    op: u8,
    d: T,
}

#[derive(Debug, Serialize)]
struct IdentifyData {
    token: String,
    intents: u64,
    properties: IdentifyProperties,
}

#[derive(Debug, Serialize)]
struct IdentifyProperties {
    os: String,
    browser: String,
    device: String,
}

#[derive(Debug, Serialize)]
struct ResumeData {
    token: String,
    session_id: String,
    seq: u64,
}

#[derive(Debug, Serialize)]
struct PresenceData {
    since: Option<u64>,
    activities: Vec<ActivityData>,
    status: &'static str,
    afk: bool,
}

#[derive(Debug, Serialize)]
struct ActivityData {
    name: String,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
    #[serde(default)]
    user: Option<ReadyUser>,
}

#[derive(Debug, Deserialize)]
struct ReadyUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

fn activity_type(kind: ActivityKind) -> u8 {
    match kind {
        ActivityKind::Playing => 0,
        ActivityKind::Streaming => 1,
        ActivityKind::Listening => 2,
        ActivityKind::Watching => 3,
        ActivityKind::Competing => 5,
    }
}

fn presence_frame(spec: &PresenceSpec) -> GatewayFrame<PresenceData> {
    GatewayFrame {
        op: opcode::PRESENCE_UPDATE,
        d: PresenceData {
            since: None,
            activities: spec
                .activity
                .iter()
                .map(|a| ActivityData {
                    name: a.name.clone(),
                    kind: activity_type(a.kind),
                })
                .collect(),
            status: spec.status.as_str(),
            afk: false,
        },
    }
}

fn heartbeat_frame(seq: Option<u64>) -> GatewayFrame<Option<u64>> {
    GatewayFrame {
        op: opcode::HEARTBEAT,
        d: seq,
    }
}

fn with_gateway_query(base: &str) -> String {
    format!("{}/?v=10&encoding=json", base.trim_end_matches('/'))
}

fn is_fatal_close(code: u16) -> bool {
    FATAL_CLOSE_CODES.contains(&code)
}

fn close_event(frame: Option<CloseFrame<'_>>) -> SessionEvent {
    match frame {
        Some(frame) => {
            let code = u16::from(frame.code);
            let reason = format!("gateway closed with {}: {}", code, frame.reason);
            if is_fatal_close(code) {
                SessionEvent::Fatal(reason)
            } else {
                SessionEvent::Disconnected(reason)
            }
        }
        None => SessionEvent::Disconnected("gateway closed without a close frame".to_string()),
    }
}

async fn send_frame<T: Serialize>(write: &mut WsWrite, frame: &T) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    write
        .send(WsMessage::Text(json))
        .await
        .map_err(|e| Error::Channel(format!("Failed to write to gateway: {}", e)))
}

/// State carried across connections so a dropped session can be resumed.
#[derive(Debug, Default)]
struct ResumeState {
    session_id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
}

impl ResumeState {
    fn resumable(&self) -> Option<(String, u64)> {
        match (&self.session_id, self.sequence) {
            (Some(id), Some(seq)) => Some((id.clone(), seq)),
            _ => None,
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Frames queued by session handles for the connection task.
#[derive(Debug)]
enum Outgoing {
    Frame(String),
    Close,
}

/// Opens Discord gateway sessions. Keeps resume state between connections.
pub struct DiscordConnector {
    config: DiscordConfig,
    client: Client,
    limiter: Arc<ChannelRateLimiter>,
    resume: Arc<Mutex<ResumeState>>,
}

impl DiscordConnector {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            limiter: Arc::new(ChannelRateLimiter::discord()),
            resume: Arc::new(Mutex::new(ResumeState::default())),
        })
    }

    fn token(&self) -> &str {
        self.config.bot_token.trim()
    }

    /// Get the Gateway WebSocket URL, from config or from Discord.
    async fn gateway_url(&self) -> Result<String> {
        if let Some(url) = self.config.gateway_url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(with_gateway_query(url));
        }

        let response = self
            .client
            .get(format!("{}/gateway/bot", self.config.api_base))
            .header("Authorization", format!("Bot {}", self.token()))
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Failed to get Discord gateway: {}", e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(Error::Auth("Discord rejected the bot token".to_string()))
            }
            status if !status.is_success() => {
                return Err(Error::Channel(format!("Gateway lookup failed: HTTP {}", status)))
            }
            _ => {}
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("Failed to parse gateway response: {}", e)))?;

        body.get("url")
            .and_then(|v| v.as_str())
            .map(with_gateway_query)
            .ok_or_else(|| Error::Channel("No gateway URL in response".to_string()))
    }

    /// Hello, then Identify or Resume, then wait for READY or RESUMED.
    async fn handshake(&self, write: &mut WsWrite, read: &mut WsRead) -> Result<Duration> {
        let heartbeat_interval = loop {
            let payload = next_payload(read).await?;
            if payload.op == opcode::HELLO {
                let interval = payload
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(DEFAULT_HEARTBEAT_MS);
                debug!(interval_ms = interval, "Received Hello with heartbeat interval");
                break Duration::from_millis(interval);
            }
        };

        let resumable = self.resume.lock().await.resumable();
        match resumable {
            Some((session_id, seq)) => {
                info!(session_id = %session_id, seq, "Sending Resume to Discord Gateway");
                let resume = GatewayFrame {
                    op: opcode::RESUME,
                    d: ResumeData {
                        token: self.token().to_string(),
                        session_id,
                        seq,
                    },
                };
                send_frame(write, &resume).await?;
            }
            None => {
                info!("Sending Identify to Discord Gateway");
                let identify = GatewayFrame {
                    op: opcode::IDENTIFY,
                    d: IdentifyData {
                        token: self.token().to_string(),
                        intents: self.config.intents,
                        properties: IdentifyProperties {
                            os: std::env::consts::OS.to_string(),
                            browser: "relaycell".to_string(),
                            device: "relaycell".to_string(),
                        },
                    },
                };
                send_frame(write, &identify).await?;
            }
        }

        loop {
            let payload = next_payload(read).await?;
            let mut resume = self.resume.lock().await;
            if let Some(s) = payload.s {
                resume.sequence = Some(s);
            }

            match payload.op {
                opcode::DISPATCH => match payload.t.as_deref() {
                    Some("READY") => {
                        let ready: ReadyData = serde_json::from_value(payload.d.unwrap_or_default())
                            .map_err(|e| Error::Channel(format!("Malformed READY: {}", e)))?;
                        if let Some(user) = &ready.user {
                            info!(
                                user_id = %user.id,
                                username = user.username.as_deref().unwrap_or("unknown"),
                                "Discord session ready"
                            );
                        }
                        resume.session_id = Some(ready.session_id);
                        resume.resume_url = ready.resume_gateway_url.filter(|u| !u.is_empty());
                        return Ok(heartbeat_interval);
                    }
                    Some("RESUMED") => {
                        info!("Discord session resumed");
                        return Ok(heartbeat_interval);
                    }
                    _ => {}
                },
                opcode::INVALID_SESSION => {
                    let resumable = payload.d.as_ref().and_then(|d| d.as_bool()).unwrap_or(false);
                    if !resumable {
                        resume.clear();
                    }
                    return Err(Error::Channel(format!(
                        "Invalid session (resumable: {})",
                        resumable
                    )));
                }
                opcode::RECONNECT => {
                    return Err(Error::Channel("Gateway requested reconnect during handshake".to_string()));
                }
                _ => {}
            }
        }
    }
    /// Dial the gateway and run the handshake under the configured timeout.
    async fn open(&self, gateway_url: &str) -> Result<(WsWrite, WsRead, Duration)> {
        let url = url::Url::parse(gateway_url)
            .map_err(|e| Error::Channel(format!("Invalid gateway URL: {}", e)))?;
        info!(url = %url, "Connecting to Discord Gateway");

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Channel(format!("WebSocket connection failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        let heartbeat_interval = tokio::time::timeout(
            self.config.handshake_timeout(),
            self.handshake(&mut write, &mut read),
        )
        .await
        .map_err(|_| Error::Timeout("Discord handshake did not complete".to_string()))??;

        Ok((write, read, heartbeat_interval))
    }
}

/// Read frames until a gateway payload arrives. Close frames end the handshake.
async fn next_payload(read: &mut WsRead) -> Result<GatewayPayload> {
    loop {
        match read.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<GatewayPayload>(&text) {
                Ok(payload) => return Ok(payload),
                Err(e) => debug!(error = %e, "Ignoring unparseable gateway frame"),
            },
            Some(Ok(WsMessage::Close(frame))) => {
                return Err(match close_event(frame) {
                    SessionEvent::Fatal(reason) => Error::Auth(reason),
                    SessionEvent::Disconnected(reason) => Error::Channel(reason),
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(Error::Channel(format!("WebSocket error: {}", e))),
            None => return Err(Error::Channel("WebSocket stream ended".to_string())),
        }
    }
}

#[async_trait]
impl GatewayConnector for DiscordConnector {
    async fn connect(&self) -> Result<Connection> {
        if self.token().is_empty() {
            return Err(Error::Auth(format!("{} is not set", TOKEN_ENV)));
        }

        let (resuming, resume_url) = {
            let resume = self.resume.lock().await;
            let resuming = resume.resumable().is_some();
            let url = resume
                .resume_url
                .as_deref()
                .filter(|_| resuming)
                .map(with_gateway_query);
            (resuming, url)
        };
        let gateway_url = match resume_url {
            Some(url) => url,
            None => self.gateway_url().await?,
        };

        let (write, read, heartbeat_interval) = match self.open(&gateway_url).await {
            Ok(opened) => opened,
            Err(e) => {
                // A resume that cannot complete falls back to a fresh Identify next time.
                if resuming {
                    warn!(error = %e, "Resume failed, discarding session state");
                    self.resume.lock().await.clear();
                }
                return Err(e);
            }
        };

        let (frames_tx, frames_rx) = mpsc::channel::<Outgoing>(16);
        let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(1);
        tokio::spawn(run_connection(
            write,
            read,
            frames_rx,
            events_tx,
            heartbeat_interval,
            Arc::clone(&self.resume),
        ));

        let session = DiscordSession {
            client: self.client.clone(),
            api_base: self.config.api_base.clone(),
            token: self.token().to_string(),
            limiter: Arc::clone(&self.limiter),
            frames: frames_tx,
        };

        Ok(Connection {
            handle: Arc::new(session),
            events: events_rx,
        })
    }
}

/// Heartbeat, drain queued frames, and watch the socket until it dies.
///
/// Exits silently when every session handle is gone or `close` was requested;
/// otherwise reports exactly one event.
async fn run_connection(
    mut write: WsWrite,
    mut read: WsRead,
    mut frames: mpsc::Receiver<Outgoing>,
    events: mpsc::Sender<SessionEvent>,
    interval: Duration,
    resume: Arc<Mutex<ResumeState>>,
) {
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    let mut awaiting_ack = false;

    let event = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if awaiting_ack {
                    break SessionEvent::Disconnected("Heartbeat ACK not received".to_string());
                }
                let seq = resume.lock().await.sequence;
                if let Err(e) = send_frame(&mut write, &heartbeat_frame(seq)).await {
                    break SessionEvent::Disconnected(e.to_string());
                }
                awaiting_ack = true;
            }
            outgoing = frames.recv() => match outgoing {
                Some(Outgoing::Frame(json)) => {
                    if let Err(e) = write.send(WsMessage::Text(json)).await {
                        break SessionEvent::Disconnected(format!("Failed to write to gateway: {}", e));
                    }
                }
                Some(Outgoing::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "".into(),
                    };
                    if let Err(e) = write.send(WsMessage::Close(Some(frame))).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    info!("Discord gateway connection closed");
                    return;
                }
            },
            msg = read.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let payload = match serde_json::from_str::<GatewayPayload>(&text) {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!(error = %e, "Ignoring unparseable gateway frame");
                            continue;
                        }
                    };
                    if let Some(s) = payload.s {
                        resume.lock().await.sequence = Some(s);
                    }

                    match payload.op {
                        opcode::HEARTBEAT_ACK => {
                            debug!("Heartbeat ACK received");
                            awaiting_ack = false;
                        }
                        opcode::HEARTBEAT => {
                            let seq = resume.lock().await.sequence;
                            if let Err(e) = send_frame(&mut write, &heartbeat_frame(seq)).await {
                                break SessionEvent::Disconnected(e.to_string());
                            }
                        }
                        opcode::RECONNECT => {
                            break SessionEvent::Disconnected("Gateway requested reconnect".to_string());
                        }
                        opcode::INVALID_SESSION => {
                            let resumable = payload.d.as_ref().and_then(|d| d.as_bool()).unwrap_or(false);
                            if !resumable {
                                resume.lock().await.clear();
                            }
                            break SessionEvent::Disconnected("Gateway invalidated the session".to_string());
                        }
                        opcode::DISPATCH => {
                            debug!(event = payload.t.as_deref().unwrap_or(""), "Gateway dispatch");
                        }
                        op => debug!(op, "Unhandled gateway opcode"),
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => break close_event(frame),
                Some(Ok(_)) => {}
                Some(Err(e)) => break SessionEvent::Disconnected(format!("WebSocket error: {}", e)),
                None => break SessionEvent::Disconnected("WebSocket stream ended".to_string()),
            }
        }
    };

    match &event {
        SessionEvent::Fatal(reason) => error!(reason = %reason, "Discord gateway refused the session"),
        SessionEvent::Disconnected(reason) => warn!(reason = %reason, "Discord gateway connection lost"),
    }
    let _ = events.send(event).await;
}

/// A live gateway connection plus the REST client used to send through it.
///
/// Dropping the last handle closes the gateway connection.
pub struct DiscordSession {
    client: Client,
    api_base: String,
    token: String,
    limiter: Arc<ChannelRateLimiter>,
    frames: mpsc::Sender<Outgoing>,
}

#[async_trait]
impl GatewaySession for DiscordSession {
    async fn send(&self, channel_id: u64, text: &str) -> Result<()> {
        #[derive(Serialize)]
        struct CreateMessage<'a> {
            content: &'a str,
        }

        self.limiter.acquire(channel_id).await;

        let response = self
            .client
            .post(format!("{}/channels/{}/messages", self.api_base, channel_id))
            .header("Authorization", format!("Bot {}", self.token))
            .json(&CreateMessage { content: text })
            .send()
            .await
            .map_err(|e| Error::Channel(format!("Failed to send Discord message: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!("Discord API error ({}): {}", status, body)));
        }
        Ok(())
    }

    async fn update_presence(&self, presence: &PresenceSpec) -> Result<()> {
        let json = serde_json::to_string(&presence_frame(presence))?;
        self.frames
            .send(Outgoing::Frame(json))
            .await
            .map_err(|_| Error::Channel("Gateway connection is closed".to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.frames
            .send(Outgoing::Close)
            .await
            .map_err(|_| Error::Channel("Gateway connection is closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::HeaderMap;
    use relaycell_core::{Activity, PresenceStatus};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type ServerWs = WebSocketStream<TcpStream>;

    fn config(gateway_url: String) -> DiscordConfig {
        DiscordConfig {
            bot_token: "test-token".to_string(),
            gateway_url: Some(gateway_url),
            handshake_timeout_secs: 5,
            ..DiscordConfig::default()
        }
    }

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> ServerWs {
        let (stream, _) = listener.accept().await.unwrap();
        accept_async(stream).await.unwrap()
    }

    async fn send_json(ws: &mut ServerWs, value: serde_json::Value) {
        ws.send(WsMessage::Text(value.to_string())).await.unwrap();
    }

    async fn recv_json(ws: &mut ServerWs) -> serde_json::Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn hello(ws: &mut ServerWs, interval_ms: u64) {
        send_json(ws, serde_json::json!({"op": 10, "d": {"heartbeat_interval": interval_ms}})).await;
    }

    async fn ready(ws: &mut ServerWs, resume_url: &str) {
        send_json(
            ws,
            serde_json::json!({
                "op": 0, "t": "READY", "s": 1,
                "d": {
                    "session_id": "session-abc",
                    "resume_gateway_url": resume_url,
                    "user": {"id": "1", "username": "relay"}
                }
            }),
        )
        .await;
    }

    async fn close_with(ws: &mut ServerWs, code: u16) {
        ws.close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: "bye".into(),
        }))
        .await
        .unwrap();
    }

    #[test]
    fn test_presence_frame_serialize() {
        let json = serde_json::to_value(presence_frame(&PresenceSpec::default())).unwrap();
        assert_eq!(json["op"], 3);
        assert_eq!(json["d"]["status"], "online");
        assert_eq!(json["d"]["afk"], false);
        assert_eq!(json["d"]["activities"][0]["type"], 3);
        assert_eq!(json["d"]["activities"][0]["name"], "you");

        let bare = PresenceSpec {
            status: PresenceStatus::Dnd,
            activity: None,
        };
        let json = serde_json::to_value(presence_frame(&bare)).unwrap();
        assert_eq!(json["d"]["activities"].as_array().unwrap().len(), 0);
        assert!(json["d"]["since"].is_null());
    }

    #[test]
    fn test_activity_type_codes() {
        assert_eq!(activity_type(ActivityKind::Playing), 0);
        assert_eq!(activity_type(ActivityKind::Listening), 2);
        assert_eq!(activity_type(ActivityKind::Competing), 5);
    }

    #[test]
    fn test_close_code_classification() {
        let fatal = close_event(Some(CloseFrame {
            code: CloseCode::from(4004u16),
            reason: "Authentication failed.".into(),
        }));
        assert!(matches!(fatal, SessionEvent::Fatal(_)));

        let transient = close_event(Some(CloseFrame {
            code: CloseCode::from(4000u16),
            reason: "Unknown error".into(),
        }));
        assert!(matches!(transient, SessionEvent::Disconnected(_)));
        assert!(matches!(close_event(None), SessionEvent::Disconnected(_)));
    }

    #[test]
    fn test_gateway_query() {
        assert_eq!(
            with_gateway_query("wss://gateway.discord.gg/"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
    }

    #[tokio::test]
    async fn test_missing_token_is_fatal() {
        let connector = DiscordConnector::new(DiscordConfig::default()).unwrap();
        let err = connector.connect().await.err().unwrap();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_identify_ready_presence_and_fatal_close() {
        let (listener, url) = listen().await;
        let server_url = url.clone();
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            hello(&mut ws, 45_000).await;

            let identify = recv_json(&mut ws).await;
            assert_eq!(identify["op"], 2);
            assert_eq!(identify["d"]["token"], "test-token");
            ready(&mut ws, &server_url).await;

            let presence = recv_json(&mut ws).await;
            assert_eq!(presence["op"], 3);
            assert_eq!(presence["d"]["activities"][0]["name"], "you");

            close_with(&mut ws, 4004).await;
        });

        let connector = DiscordConnector::new(config(url)).unwrap();
        let mut connection = connector.connect().await.unwrap();
        connection
            .handle
            .update_presence(&PresenceSpec::default())
            .await
            .unwrap();

        let event = connection.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Fatal(_)), "got {event:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_resumes_previous_session() {
        let (listener, url) = listen().await;
        let server_url = url.clone();
        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            hello(&mut first, 45_000).await;
            assert_eq!(recv_json(&mut first).await["op"], 2);
            ready(&mut first, &server_url).await;
            send_json(&mut first, serde_json::json!({"op": 0, "t": "GUILD_CREATE", "s": 2, "d": {}})).await;
            close_with(&mut first, 1001).await;

            let mut second = accept(&listener).await;
            hello(&mut second, 45_000).await;
            let resume = recv_json(&mut second).await;
            assert_eq!(resume["op"], 6);
            assert_eq!(resume["d"]["session_id"], "session-abc");
            assert_eq!(resume["d"]["seq"], 2);
            send_json(&mut second, serde_json::json!({"op": 0, "t": "RESUMED", "s": 3, "d": null})).await;
            // Keep the socket open until the client hangs up.
            while let Some(Ok(msg)) = second.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let connector = DiscordConnector::new(config(url)).unwrap();
        let mut first = connector.connect().await.unwrap();
        let event = first.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Disconnected(_)), "got {event:?}");

        let second = connector.connect().await.unwrap();
        second.handle.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_heartbeat_ack_disconnects() {
        let (listener, url) = listen().await;
        let server_url = url.clone();
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            hello(&mut ws, 50).await;
            recv_json(&mut ws).await;
            ready(&mut ws, &server_url).await;
            // Swallow heartbeats without acknowledging them.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let connector = DiscordConnector::new(config(url)).unwrap();
        let mut connection = connector.connect().await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), connection.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            SessionEvent::Disconnected("Heartbeat ACK not received".to_string())
        );
        drop(connection);
        server.abort();
    }

    #[tokio::test]
    async fn test_auth_close_during_handshake_is_fatal() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            hello(&mut ws, 45_000).await;
            recv_json(&mut ws).await;
            close_with(&mut ws, 4004).await;
        });

        let connector = DiscordConnector::new(config(url)).unwrap();
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Auth(_)), "got {err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_resumable_invalid_session_clears_state() {
        let (listener, url) = listen().await;
        let server = tokio::spawn(async move {
            let mut ws = accept(&listener).await;
            hello(&mut ws, 45_000).await;
            recv_json(&mut ws).await;
            send_json(&mut ws, serde_json::json!({"op": 9, "d": false})).await;
        });

        let connector = DiscordConnector::new(config(url)).unwrap();
        connector.resume.lock().await.session_id = Some("stale".to_string());
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, Error::Channel(_)));
        assert!(connector.resume.lock().await.session_id.is_none());
        server.await.unwrap();
    }

    async fn refused_url() -> String {
        let (listener, url) = listen().await;
        drop(listener);
        url
    }

    async fn seed_resume(connector: &DiscordConnector, resume_url: String) {
        let mut resume = connector.resume.lock().await;
        resume.session_id = Some("stale".to_string());
        resume.sequence = Some(7);
        resume.resume_url = Some(resume_url);
    }

    async fn serve_identify(listener: &TcpListener, resume_url: &str) -> ServerWs {
        let mut ws = accept(listener).await;
        hello(&mut ws, 45_000).await;
        let identify = recv_json(&mut ws).await;
        assert_eq!(identify["op"], 2, "expected a fresh Identify");
        ready(&mut ws, resume_url).await;
        ws
    }

    async fn wait_for_close(ws: &mut ServerWs) {
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_resume_url_falls_back_to_identify() {
        let (listener, url) = listen().await;
        let server_url = url.clone();
        let server = tokio::spawn(async move {
            let mut ws = serve_identify(&listener, &server_url).await;
            wait_for_close(&mut ws).await;
        });

        let connector = DiscordConnector::new(config(url)).unwrap();
        seed_resume(&connector, refused_url().await).await;

        assert!(connector.connect().await.is_err());
        assert!(connector.resume.lock().await.resumable().is_none());

        let connection = connector.connect().await.unwrap();
        assert_eq!(
            connector.resume.lock().await.session_id.as_deref(),
            Some("session-abc")
        );
        connection.handle.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_before_resumed_falls_back_to_identify() {
        let (listener, url) = listen().await;
        let server_url = url.clone();
        let server = tokio::spawn(async move {
            let mut first = accept(&listener).await;
            hello(&mut first, 45_000).await;
            let resume = recv_json(&mut first).await;
            assert_eq!(resume["op"], 6);
            close_with(&mut first, 4000).await;

            let mut second = serve_identify(&listener, &server_url).await;
            wait_for_close(&mut second).await;
        });

        let connector = DiscordConnector::new(config(url.clone())).unwrap();
        seed_resume(&connector, url).await;

        let err = connector.connect().await.err().unwrap();
        assert!(!err.is_fatal(), "got {err:?}");
        assert!(connector.resume.lock().await.resumable().is_none());

        let connection = connector.connect().await.unwrap();
        connection.handle.close().await.unwrap();
        server.await.unwrap();
    }

    type SeenRequests = Arc<std::sync::Mutex<Vec<(u64, Option<String>, serde_json::Value)>>>;

    async fn create_message(
        State(seen): State<SeenRequests>,
        Path(channel_id): Path<u64>,
        headers: HeaderMap,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> (StatusCode, String) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push((channel_id, auth, body));
        if channel_id == 403 {
            (
                StatusCode::FORBIDDEN,
                r#"{"message": "Missing Access", "code": 50001}"#.to_string(),
            )
        } else {
            (StatusCode::OK, r#"{"id": "1"}"#.to_string())
        }
    }

    async fn rest_stub() -> (String, SeenRequests) {
        let seen = SeenRequests::default();
        let app = axum::Router::new()
            .route("/channels/:channel_id/messages", axum::routing::post(create_message))
            .with_state(seen.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (base, seen)
    }

    fn rest_session(api_base: String) -> DiscordSession {
        let (frames, _rx) = mpsc::channel(1);
        DiscordSession {
            client: Client::builder().no_proxy().build().unwrap(),
            api_base,
            token: "test-token".to_string(),
            limiter: Arc::new(ChannelRateLimiter::discord()),
            frames,
        }
    }

    #[tokio::test]
    async fn test_send_posts_content_with_bot_auth() {
        let (base, seen) = rest_stub().await;
        let session = rest_session(base);

        session.send(42, "hello there").await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        let (channel_id, auth, body) = &seen[0];
        assert_eq!(*channel_id, 42);
        assert_eq!(auth.as_deref(), Some("Bot test-token"));
        assert_eq!(*body, serde_json::json!({"content": "hello there"}));
    }

    #[tokio::test]
    async fn test_send_rejection_carries_status_and_body() {
        let (base, seen) = rest_stub().await;
        let session = rest_session(base);

        match session.send(403, "hi").await {
            Err(Error::Channel(msg)) => {
                assert!(msg.contains("403"), "{msg}");
                assert!(msg.contains("Missing Access"), "{msg}");
            }
            other => panic!("expected a channel error, got {other:?}"),
        }
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_to_unreachable_api_is_channel_error() {
        let (listener, _) = listen().await;
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = rest_session(base).send(1, "hi").await.unwrap_err();
        assert!(matches!(err, Error::Channel(_)), "got {err:?}");
    }

    #[test]
    fn test_ready_payload_deserialize() {
        let raw = r#"{"session_id": "s1", "user": {"id": "9", "username": "bot"}, "guilds": []}"#;
        let ready: ReadyData = serde_json::from_str(raw).unwrap();
        assert_eq!(ready.session_id, "s1");
        assert!(ready.resume_gateway_url.is_none());
        assert_eq!(ready.user.unwrap().id, "9");
    }

    #[test]
    fn test_activity_in_frame_keeps_name() {
        let spec = PresenceSpec {
            status: PresenceStatus::Idle,
            activity: Some(Activity {
                kind: ActivityKind::Listening,
                name: "the queue".to_string(),
            }),
        };
        let json = serde_json::to_value(presence_frame(&spec)).unwrap();
        assert_eq!(json["d"]["status"], "idle");
        assert_eq!(json["d"]["activities"][0]["type"], 2);
        assert_eq!(json["d"]["activities"][0]["name"], "the queue");
    }
}
