//! # Voice WebSocket Handler
//!
//! One actor per `/ws` connection. The actor is the transport half of a
//! connection: it turns frames into [`ConnectionEvent`]s for the
//! connection's [`SessionMachine`] and carries out the actions the machine
//! returns.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: HTTP GET `/ws` is upgraded and the actor starts
//! 2. **Recording**: binary frames are buffered, `{"action": ...}` text frames control the session
//! 3. **Processing**: on stop, the response pipeline runs on a separate task and
//!    messages each result back to the actor, which writes it to the socket
//! 4. **Close**: client disconnect or idle timeout stops the actor; a pipeline
//!    still running finishes on its own, and its messages to the stopped actor are dropped
//!
//! ## Actor Model:
//! Actix delivers every frame and every internal message to the actor one at
//! a time, so the machine never needs a lock and events for one connection
//! are handled strictly in order.

use crate::audio::machine::{Action, ConnectionEvent, PipelineJob, SessionMachine};
use crate::audio::observer::EchoObserver;
use crate::audio::session::{SessionId, SessionState};
use crate::error::{ConnectionError, ProtocolError};
use crate::pipeline::ResultSink;
use crate::protocol::{ControlEvent, ProcessingResult};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket actor for one voice connection.
pub struct VoiceWebSocket {
    /// Unique id for logs and artifact names
    connection_id: Uuid,

    /// Session logic, owned exclusively by this actor
    machine: SessionMachine,

    /// Shared pipeline and metrics
    app_state: web::Data<AppState>,

    /// How often the idle timer is checked
    check_interval: Duration,

    /// Whether every fragment is echoed back as a binary frame
    echo_fragments: bool,
}

impl VoiceWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let connection_id = Uuid::new_v4();
        let session = app_state.config.session.clone();
        let machine = SessionMachine::new(
            connection_id.to_string(),
            session.max_session_bytes,
            session.idle_timeout(),
            Instant::now(),
        );

        Self {
            connection_id,
            machine,
            app_state,
            check_interval: session.timeout_check_interval(),
            echo_fragments: session.echo_fragments,
        }
    }

    /// Feed one event to the machine and carry out what it asks for.
    fn dispatch(&mut self, event: ConnectionEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let started_before = self.machine.sessions_started();
        let actions = self.machine.handle(event, Instant::now());
        for _ in started_before..self.machine.sessions_started() {
            self.app_state.record_session_started();
        }
        self.apply(actions, ctx);
    }

    fn apply(&mut self, actions: Vec<Action>, ctx: &mut ws::WebsocketContext<Self>) {
        for action in actions {
            match action {
                Action::Send(result) => self.send_result(&result, ctx),
                Action::Process(job) => self.spawn_pipeline(job, ctx),
                Action::Rejected(err) => {
                    match err {
                        ProtocolError::OutOfOrderFragment { .. } => self.app_state.record_rejected_fragment(),
                        _ => self.app_state.record_ignored_control(),
                    }
                    debug!(connection_id = %self.connection_id, error = %err, "client input ignored");
                }
                Action::Close(reason) => {
                    if let ConnectionError::Timeout(_) = reason {
                        self.app_state.record_connection_timeout();
                    }
                    ctx.close(close_reason(&reason));
                    ctx.stop();
                }
            }
        }
    }

    /// Write one result to the client as a JSON text frame.
    fn send_result(&self, result: &ProcessingResult, ctx: &mut ws::WebsocketContext<Self>) {
        match result.to_json() {
            Ok(json) => {
                debug!(connection_id = %self.connection_id, kind = result.kind(), "sending result");
                ctx.text(json);
            }
            Err(e) => error!(connection_id = %self.connection_id, error = %e, "could not serialize result"),
        }
    }

    /// Run the response pipeline off the actor so the connection keeps reading frames.
    fn spawn_pipeline(&self, job: PipelineJob, ctx: &mut ws::WebsocketContext<Self>) {
        let pipeline = self.app_state.pipeline.clone();
        let app_state = self.app_state.clone();
        let connection = self.connection_id.to_string();
        let addr = ctx.address();

        tokio::spawn(async move {
            let mut sink = ActorSink { addr: addr.clone() };
            let outcome = pipeline.process(&connection, &job, &mut sink).await;
            app_state.record_pipeline_outcome(outcome);
            addr.do_send(PipelineFinished {
                session_id: job.session_id,
            });
        });
    }
}

/// Close frame sent for each way a connection can end.
fn close_reason(reason: &ConnectionError) -> Option<ws::CloseReason> {
    match reason {
        ConnectionError::Timeout(_) => Some(ws::CloseReason {
            code: ws::CloseCode::Normal,
            description: Some("idle timeout".to_string()),
        }),
        ConnectionError::Disconnected => None,
    }
}

/// A pipeline result on its way back to the connection actor.
#[derive(Message)]
#[rtype(result = "()")]
struct PipelineOutput(ProcessingResult);

/// The pipeline run for a session has emitted everything.
#[derive(Message)]
#[rtype(result = "()")]
struct PipelineFinished {
    session_id: SessionId,
}

/// A fragment to echo back to the client.
#[derive(Message)]
#[rtype(result = "()")]
struct EchoFragment(Vec<u8>);

/// Forwards pipeline results to the connection actor.
struct ActorSink {
    addr: Addr<VoiceWebSocket>,
}

impl ResultSink for ActorSink {
    fn emit(&mut self, result: ProcessingResult) {
        self.addr.do_send(PipelineOutput(result));
    }
}

impl Actor for VoiceWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "voice connection opened");
        self.app_state.connection_opened();

        if self.echo_fragments {
            let addr = ctx.address();
            self.machine
                .add_observer(Box::new(EchoObserver::new(move |bytes| addr.do_send(EchoFragment(bytes)))));
        }

        ctx.run_interval(self.check_interval, |act, ctx| {
            if let Some(action) = act.machine.poll_timeout(Instant::now()) {
                warn!(connection_id = %act.connection_id, "idle timeout, closing connection");
                act.apply(vec![action], ctx);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Already Closed after a timeout; otherwise this discards the session
        let _ = self.machine.handle(ConnectionEvent::Disconnected, Instant::now());
        self.app_state.connection_closed();
        info!(connection_id = %self.connection_id, "voice connection closed");
    }
}

/// Handle incoming WebSocket frames.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for VoiceWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let control = ControlEvent::parse(&text);
                debug!(connection_id = %self.connection_id, action = control.name(), "control message");
                self.dispatch(ConnectionEvent::Control(control), ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.dispatch(ConnectionEvent::Fragment(data.to_vec()), ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                // Keepalive only; does not count as client activity
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, reason = ?reason, "client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<PipelineOutput> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: PipelineOutput, ctx: &mut Self::Context) {
        if self.machine.state() == SessionState::Closed {
            return;
        }
        self.send_result(&msg.0, ctx);
    }
}

impl Handler<PipelineFinished> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: PipelineFinished, _ctx: &mut Self::Context) {
        self.machine.finish_processing(msg.session_id);
    }
}

impl Handler<EchoFragment> for VoiceWebSocket {
    type Result = ();

    fn handle(&mut self, msg: EchoFragment, ctx: &mut Self::Context) {
        if self.machine.state() != SessionState::Closed {
            ctx.binary(msg.0);
        }
    }
}

/// WebSocket endpoint handler for `/ws`.
///
/// ## HTTP to WebSocket Upgrade:
/// Upgrades the request and hands the connection to a fresh [`VoiceWebSocket`]
/// actor. The frame size limit is raised to the session cap so one large
/// recorder chunk is not rejected by the codec.
pub async fn voice_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "new voice connection request");

    let frame_size = app_state.config.session.max_session_bytes;
    let actor = VoiceWebSocket::new(app_state);

    ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(frame_size)
        .start()
}
