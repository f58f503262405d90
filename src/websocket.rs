//! # WebSocket Relay Handler
//!
//! One actor per streaming connection on `/ws`.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: the upgrade is refused with 503 when `performance.max_connections`
//!    sessions are already open; otherwise the actor starts and joins the registry
//! 2. **Text frames**: answered with `Echo: <text>`
//! 3. **Binary frames**: one audio chunk each, answered with exactly one text frame
//!    holding the transcript or an `[ERROR] ...` message
//! 4. **Liveness**: the server pings every `heartbeat_interval_secs` and drops clients
//!    silent for longer than `client_timeout_secs`
//!
//! ## Ordering:
//! Chunks are processed with `ctx.wait`, which suspends the actor's inbound stream until
//! the pipeline future resolves. Replies therefore leave in the order chunks arrived and
//! a connection never has two chunks in flight.
//!
//! ## Failure Isolation:
//! A failed chunk only produces an error frame. A panic inside the pipeline is caught at
//! this boundary, logged, and ends only this connection; registry cleanup still runs.

use crate::config::AppConfig;
use crate::error::AppError;
use crate::session::{reply_frame, ConnectionId, ConnectionInfo, RegistryLease, SessionState};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reply to a text frame.
pub fn echo_reply(text: &str) -> String {
    format!("Echo: {}", text)
}

/// Actor driving one WebSocket connection through `SessionState`.
pub struct RelaySocket {
    id: ConnectionId,
    peer_addr: Option<String>,
    state: SessionState,
    app_state: web::Data<AppState>,

    /// Registry membership; held exactly while the session is open
    lease: Option<RegistryLease>,

    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl RelaySocket {
    pub fn new(app_state: web::Data<AppState>, peer_addr: Option<String>, config: &AppConfig) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_addr,
            state: SessionState::Connecting,
            app_state,
            lease: None,
            last_heartbeat: Instant::now(),
            heartbeat_interval: Duration::from_secs(config.server.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.server.client_timeout_secs),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(connection_id = %self.id, from = %self.state, to = %next, "Session state change");
            self.state = next;
        }
    }

    /// Leave the registry. Safe to call more than once.
    fn release(&mut self) {
        self.lease.take();
        self.app_state.registry.remove(&self.id);
    }

    fn begin_close(&mut self, ctx: &mut ws::WebsocketContext<Self>, reason: Option<ws::CloseReason>) {
        if self.state == SessionState::Open {
            self.transition(SessionState::Closing);
            ctx.close(reason);
        }
        ctx.stop();
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(connection_id = %act.id, "WebSocket heartbeat timeout, closing connection");
                act.begin_close(ctx, Some(ws::CloseCode::Away.into()));
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Run one chunk through the pipeline and send its single reply.
    fn handle_chunk(&mut self, chunk: Bytes, ctx: &mut ws::WebsocketContext<Self>) {
        self.app_state.record_chunk_received();
        let pipeline = self.app_state.pipeline.clone();
        let bytes = chunk.len();
        debug!(connection_id = %self.id, bytes, "Received audio chunk");

        let work = async move { AssertUnwindSafe(pipeline.process(chunk.to_vec())).catch_unwind().await };

        ctx.wait(work.into_actor(self).map(move |outcome, act, ctx| {
            // the stream was paused while we waited, so pongs may be sitting unread
            act.last_heartbeat = Instant::now();

            match outcome {
                Ok(result) => {
                    act.app_state.record_chunk_outcome(result.is_ok());
                    if let Err(err) = &result {
                        info!(connection_id = %act.id, bytes, error = %err, "Chunk failed");
                    }
                    ctx.text(reply_frame(&result));
                }
                Err(_) => {
                    error!(connection_id = %act.id, bytes, "Audio pipeline panicked, dropping connection");
                    act.app_state.record_chunk_outcome(false);
                    act.transition(SessionState::Closed);
                    act.release();
                    ctx.close(Some(ws::CloseReason {
                        code: ws::CloseCode::Error,
                        description: Some("internal error".to_string()),
                    }));
                    ctx.stop();
                }
            }
        }));
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    /// Handshake done: the session is open and joins the registry.
    fn started(&mut self, ctx: &mut Self::Context) {
        let info = ConnectionInfo::new(self.id, self.peer_addr.clone());
        self.lease = Some(self.app_state.registry.register(info));
        self.app_state.record_connection_opened();
        self.transition(SessionState::Open);

        info!(
            connection_id = %self.id,
            peer = self.peer_addr.as_deref().unwrap_or("unknown"),
            active = self.app_state.active_connections(),
            "WebSocket connection opened"
        );

        self.start_heartbeat(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.transition(SessionState::Closed);
        self.release();
        info!(
            connection_id = %self.id,
            active = self.app_state.active_connections(),
            "WebSocket connection closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        if self.state != SessionState::Open {
            return;
        }
        self.last_heartbeat = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => {
                ctx.text(echo_reply(&text));
            }
            Ok(ws::Message::Binary(data)) => {
                self.handle_chunk(data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.id, ?reason, "Client closed connection");
                self.begin_close(ctx, reason);
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.id, error = %err, "WebSocket protocol error");
                self.begin_close(ctx, Some(ws::CloseCode::Protocol.into()));
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Checks capacity, then upgrades and hands the connection to a [`RelaySocket`] actor.
/// The capacity check and the registry insert in `started` are not atomic, so a burst of
/// simultaneous upgrades can overshoot the cap by the number of in-progress handshakes.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let config = app_state.get_config();
    let active = app_state.active_connections();
    let max_connections = config.performance.max_connections;

    if active >= max_connections {
        warn!(active, max_connections, "Refusing WebSocket upgrade, connection limit reached");
        return Err(AppError::ServiceUnavailable(format!("connection limit of {} reached", max_connections)).into());
    }

    let peer_addr = req.connection_info().peer_addr().map(str::to_string);
    debug!(peer = peer_addr.as_deref().unwrap_or("unknown"), "New WebSocket connection request");

    let socket = RelaySocket::new(app_state, peer_addr, &config);

    // oversized chunks up to twice the limit are still read so they get an inline error
    ws::WsResponseBuilder::new(socket, &req, stream)
        .frame_size(config.audio.max_chunk_bytes.saturating_mul(2))
        .start()
}
