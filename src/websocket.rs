//! # WebSocket Connection Handler
//!
//! One actor per connected client. The actor owns nothing but the socket:
//! it registers a session with the `ConnectionRegistry` when the connection
//! opens, forwards parsed envelopes to the `RelayPipeline`, and unregisters
//! on close. Outbound delivery flows back through the actor's mailbox via
//! `WsTransport`, so pipeline tasks never touch the socket directly.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: client connects to `/ws`
//! 2. **Greeting**: server sends `connection_established` with the session id
//! 3. **Streaming**: client sends `audio_chunk` messages (base64 PCM), then
//!    `audio_end`; or a single `complete_audio`
//! 4. **Replies**: server streams `transcription`, `ai_response`,
//!    `audio_response` as the pipeline produces them
//!
//! Every frame is UTF-8 JSON text. Malformed envelopes, unsupported types,
//! and binary frames are logged and dropped; the connection stays open.

use crate::error::{AppError, AppResult};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::relay::RelayPipeline;
use crate::session::registry::ConnectionRegistry;
use crate::session::ClientTransport;
use crate::state::AppState;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How often the server pings the client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long without any pong before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Mailbox message carrying one serialized envelope to the client socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct OutboundText(pub String);

/// `ClientTransport` backed by the connection actor's mailbox.
///
/// ## Implicit disconnect:
/// `try_send` fails once the actor is gone (socket closed) or its mailbox is
/// full; either way the registry treats the session as disconnected.
pub struct WsTransport {
    addr: Recipient<OutboundText>,
}

impl WsTransport {
    pub fn new(addr: Recipient<OutboundText>) -> Self {
        Self { addr }
    }
}

impl ClientTransport for WsTransport {
    fn deliver(&self, payload: String) -> AppResult<()> {
        self.addr
            .try_send(OutboundText(payload))
            .map_err(|_| AppError::TransportClosed("client mailbox closed".to_string()))
    }
}

/// WebSocket actor for one voice session.
pub struct VoiceWebSocket {
    /// Session id assigned at registration
    session_id: Option<String>,

    /// Session table shared with the pipeline
    registry: Arc<ConnectionRegistry>,

    /// The pipeline driver
    relay: Arc<RelayPipeline>,

    /// Shared metrics
    state: AppState,

    /// Last time the client showed signs of life
    last_heartbeat: Instant,
}

impl VoiceWebSocket {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        relay: Arc<RelayPipeline>,
        state: AppState,
    ) -> Self {
        Self {
            session_id: None,
            registry,
            relay,
            state,
            last_heartbeat: Instant::now(),
        }
    }

    /// Route one parsed envelope to the pipeline.
    ///
    /// ## Scheduling:
    /// Chunk and history events are handled inline (they only touch session
    /// state). The flush events spawn a task, so a slow collaborator call on
    /// this session never blocks frame ingestion for other sessions.
    fn dispatch(&self, message: ClientMessage) {
        let session_id = match &self.session_id {
            Some(id) => id.clone(),
            None => return,
        };

        match message {
            ClientMessage::AudioChunk { data } => match BASE64.decode(data.as_bytes()) {
                Ok(pcm) => self.relay.handle_chunk(&session_id, &pcm),
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "Dropping undecodable audio chunk");
                }
            },
            ClientMessage::AudioEnd {} => {
                let relay = self.relay.clone();
                tokio::spawn(async move {
                    relay.handle_audio_end(&session_id).await;
                });
            }
            ClientMessage::CompleteAudio { data } => match BASE64.decode(data.as_bytes()) {
                Ok(pcm) => {
                    let relay = self.relay.clone();
                    tokio::spawn(async move {
                        relay.handle_complete_audio(&session_id, pcm).await;
                    });
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "Dropping undecodable recording");
                }
            },
            ClientMessage::ClearHistory {} => self.relay.handle_clear_history(&session_id),
        }
    }
}

impl Actor for VoiceWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Register the session and start the heartbeat.
    fn started(&mut self, ctx: &mut Self::Context) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });

        let transport = WsTransport::new(ctx.address().recipient());
        let session = self.registry.register(Box::new(transport));
        self.session_id = Some(session.id.clone());
        self.state.increment_active_sessions();

        let _ = self.registry.send(
            &session.id,
            &ServerMessage::ConnectionEstablished {
                session_id: session.id.clone(),
                message: "Connected. Start speaking whenever you are ready.".to_string(),
            },
        );
    }

    /// Tear the session down. Unregistration is idempotent, so a session
    /// already dropped by an implicit disconnect is fine here.
    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session_id) = &self.session_id {
            self.registry.unregister(session_id);
            self.state.decrement_active_sessions();
            info!(session_id = %session_id, "WebSocket connection closed");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.state.record_message_received();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => self.dispatch(message),
                    Err(err) => {
                        // Malformed envelope or unsupported type: drop it,
                        // keep the connection open.
                        warn!(error = %err, "Dropping malformed message envelope");
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Dropping binary frame; the protocol carries JSON text only");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("WebSocket closed by client: {:?}", reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Dropping unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<OutboundText> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundText, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// WebSocket endpoint handler: upgrades the HTTP request and hands the
/// connection to a fresh `VoiceWebSocket` actor.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    registry: web::Data<ConnectionRegistry>,
    relay: web::Data<RelayPipeline>,
) -> ActixResult<HttpResponse> {
    info!(
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket connection request"
    );

    let websocket = VoiceWebSocket::new(
        registry.into_inner(),
        relay.into_inner(),
        state.get_ref().clone(),
    );

    ws::start(websocket, &req, stream)
}
