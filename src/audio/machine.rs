//! # Session State Machine
//!
//! The per-connection control logic. It consumes transport events in order,
//! mutates the current session, and tells its driver (the WebSocket actor)
//! what to do next through a list of [`Action`]s. It performs no I/O and
//! never reads the clock itself, so every transition can be tested with a
//! simulated clock.
//!
//! ## Transitions:
//! | From       | Event                   | To         |
//! |------------|-------------------------|------------|
//! | Idle       | fragment                | Recording  |
//! | Idle       | start                   | Recording  |
//! | Idle       | stop                    | Idle (error: no audio) |
//! | Recording  | fragment                | Recording  |
//! | Recording  | start                   | Recording (fresh session) |
//! | Recording  | stop, has fragments     | Processing |
//! | Recording  | stop, no fragments      | Idle (error: no audio) |
//! | Processing | pipeline finished       | Idle       |
//! | Processing | fragment / start / stop | Processing (rejected, counted) |
//! | any        | idle timeout            | Closed     |
//! | any        | disconnect              | Closed     |
//!
//! Unknown and malformed control messages never change state.

use crate::audio::buffer::SessionBuffer;
use crate::audio::observer::FragmentObserver;
use crate::audio::session::{Session, SessionId, SessionState};
use crate::error::{ConnectionError, ProtocolError};
use crate::protocol::{ControlEvent, ErrorKind, ProcessingResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Something the transport delivered for this connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Fragment(Vec<u8>),
    Control(ControlEvent),
    Disconnected,
}

/// Work handed to the response pipeline when a recording stops.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineJob {
    pub session_id: SessionId,
    /// Shared with the artifact store and the decode task
    pub payload: Arc<Vec<u8>>,
    pub fragment_count: usize,
    pub started_at: DateTime<Utc>,
}

/// What the driver must do after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a result to the client
    Send(ProcessingResult),
    /// Run the response pipeline; report back with `finish_processing`
    Process(PipelineJob),
    /// Input was ignored; count it
    Rejected(ProtocolError),
    /// The connection is over
    Close(ConnectionError),
}

/// Sequential session logic for one connection.
pub struct SessionMachine {
    /// Label used in log lines (the connection id)
    connection: String,

    state: SessionState,

    /// Present in Recording and Processing, absent otherwise
    session: Option<Session>,

    /// Cleared buffer kept between sessions to reuse its allocation
    spare_buffer: Option<SessionBuffer>,

    max_session_bytes: usize,

    next_session_id: u64,

    /// Time of the last client event; drives the idle timeout
    last_activity: Instant,

    idle_timeout: Duration,

    observers: Vec<Box<dyn FragmentObserver>>,

    sessions_started: u64,
}

impl SessionMachine {
    pub fn new(
        connection: impl Into<String>,
        max_session_bytes: usize,
        idle_timeout: Duration,
        now: Instant,
    ) -> Self {
        Self {
            connection: connection.into(),
            state: SessionState::Idle,
            session: None,
            spare_buffer: None,
            max_session_bytes,
            next_session_id: 1,
            last_activity: now,
            idle_timeout,
            observers: Vec::new(),
            sessions_started: 0,
        }
    }

    /// Register an observer notified on every accepted fragment.
    pub fn add_observer(&mut self, observer: Box<dyn FragmentObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn current_session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[cfg(test)]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Sessions begun on this connection, including restarted ones.
    pub fn sessions_started(&self) -> u64 {
        self.sessions_started
    }

    /// Consume one transport event received at `now`.
    pub fn handle(&mut self, event: ConnectionEvent, now: Instant) -> Vec<Action> {
        if self.state == SessionState::Closed {
            debug!(connection_id = %self.connection, "event after close ignored");
            return Vec::new();
        }

        match event {
            ConnectionEvent::Disconnected => {
                info!(connection_id = %self.connection, state = %self.state, "client disconnected");
                self.close();
                vec![Action::Close(ConnectionError::Disconnected)]
            }
            ConnectionEvent::Fragment(fragment) => {
                self.last_activity = now;
                self.on_fragment(fragment)
            }
            ConnectionEvent::Control(control) => {
                self.last_activity = now;
                self.on_control(control)
            }
        }
    }

    /// Check the idle timer. Fires at most once; afterwards the machine is Closed.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<Action> {
        if self.state == SessionState::Closed {
            return None;
        }

        let idle_for = now.saturating_duration_since(self.last_activity);
        if idle_for < self.idle_timeout {
            return None;
        }

        warn!(
            connection_id = %self.connection,
            state = %self.state,
            idle_secs = idle_for.as_secs(),
            "no client activity, closing connection"
        );
        self.close();
        Some(Action::Close(ConnectionError::Timeout(self.idle_timeout)))
    }

    /// Called when the pipeline run for `session_id` has emitted everything.
    ///
    /// Returns `false` if the id does not match the session being processed
    /// (for example because the connection closed meanwhile).
    pub fn finish_processing(&mut self, session_id: SessionId) -> bool {
        let matches = self.state == SessionState::Processing
            && self.session.as_ref().map(Session::id) == Some(session_id);
        if !matches {
            debug!(connection_id = %self.connection, session_id = %session_id, "stale pipeline completion ignored");
            return false;
        }

        self.discard_session();
        self.state = SessionState::Idle;
        info!(connection_id = %self.connection, session_id = %session_id, "session finished, ready for next recording");
        true
    }

    fn on_fragment(&mut self, fragment: Vec<u8>) -> Vec<Action> {
        match self.state {
            SessionState::Idle => {
                self.begin_session();
                self.append(fragment)
            }
            SessionState::Recording => self.append(fragment),
            SessionState::Processing => {
                warn!(
                    connection_id = %self.connection,
                    bytes = fragment.len(),
                    "fragment received while processing, rejected"
                );
                vec![Action::Rejected(ProtocolError::OutOfOrderFragment {
                    state: self.state.as_str(),
                })]
            }
            SessionState::Closed => Vec::new(),
        }
    }

    fn on_control(&mut self, control: ControlEvent) -> Vec<Action> {
        match (self.state, control) {
            (SessionState::Idle, ControlEvent::Start) => {
                self.begin_session();
                Vec::new()
            }
            (SessionState::Recording, ControlEvent::Start) => {
                if let Some(old) = &self.session {
                    info!(
                        connection_id = %self.connection,
                        session_id = %old.id(),
                        dropped_fragments = old.fragment_count(),
                        "start while recording, restarting session"
                    );
                }
                self.discard_session();
                self.begin_session();
                Vec::new()
            }
            (SessionState::Idle, ControlEvent::Stop) => {
                warn!(connection_id = %self.connection, "stop without a recording");
                vec![Action::Send(ProcessingResult::Error(ErrorKind::NoAudioData))]
            }
            (SessionState::Recording, ControlEvent::Stop) => self.stop_recording(),
            (SessionState::Processing, control @ (ControlEvent::Start | ControlEvent::Stop)) => {
                warn!(connection_id = %self.connection, action = control.name(), "control received while processing, ignored");
                vec![Action::Rejected(ProtocolError::OutOfOrderControl {
                    action: control.name(),
                    state: self.state.as_str(),
                })]
            }
            (_, ControlEvent::Unknown(raw)) => {
                warn!(connection_id = %self.connection, message = %raw, "unknown control action ignored");
                vec![Action::Rejected(ProtocolError::UnknownAction(raw))]
            }
            (_, ControlEvent::Malformed(reason)) => {
                warn!(connection_id = %self.connection, error = %reason, "malformed control message ignored");
                vec![Action::Rejected(ProtocolError::MalformedControl(reason))]
            }
            (SessionState::Closed, _) => Vec::new(),
        }
    }

    fn stop_recording(&mut self) -> Vec<Action> {
        let Some(session) = self.session.as_ref() else {
            self.state = SessionState::Idle;
            return vec![Action::Send(ProcessingResult::Error(ErrorKind::NoAudioData))];
        };

        if !session.has_fragments() {
            warn!(connection_id = %self.connection, session_id = %session.id(), "stop with no audio data");
            self.discard_session();
            self.state = SessionState::Idle;
            return vec![Action::Send(ProcessingResult::Error(ErrorKind::NoAudioData))];
        }

        let job = PipelineJob {
            session_id: session.id(),
            payload: Arc::new(session.concatenate()),
            fragment_count: session.fragment_count(),
            started_at: session.started_at().unwrap_or_else(|| session.created_at()),
        };
        info!(
            connection_id = %self.connection,
            session_id = %job.session_id,
            fragments = job.fragment_count,
            bytes = job.payload.len(),
            "recording stopped, processing"
        );

        self.state = SessionState::Processing;
        vec![Action::Process(job)]
    }

    fn append(&mut self, fragment: Vec<u8>) -> Vec<Action> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };

        let session_id = session.id();
        let size = fragment.len();
        let observed = if self.observers.is_empty() { None } else { Some(fragment.clone()) };

        if let Err(err) = session.append(fragment) {
            warn!(
                connection_id = %self.connection,
                session_id = %session_id,
                limit = err.limit,
                attempted = err.attempted,
                "session too large, discarding recording"
            );
            self.discard_session();
            self.state = SessionState::Idle;
            return vec![Action::Send(ProcessingResult::Error(ErrorKind::SessionTooLarge))];
        }

        let index = session.fragment_count() - 1;
        debug!(
            connection_id = %self.connection,
            session_id = %session_id,
            index,
            bytes = size,
            total_bytes = session.byte_count(),
            "fragment buffered"
        );

        if let Some(bytes) = observed {
            for observer in &self.observers {
                observer.on_fragment(session_id, index, &bytes);
            }
        }

        Vec::new()
    }

    fn begin_session(&mut self) {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        self.sessions_started += 1;

        let buffer = self
            .spare_buffer
            .take()
            .unwrap_or_else(|| SessionBuffer::new(self.max_session_bytes));
        self.session = Some(Session::new(id, buffer));
        self.state = SessionState::Recording;

        info!(connection_id = %self.connection, session_id = %id, "recording started");
    }

    fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.spare_buffer = Some(session.into_buffer());
        }
    }

    fn close(&mut self) {
        self.session = None;
        self.spare_buffer = None;
        self.state = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::observer::EchoObserver;
    use std::sync::{Arc, Mutex};

    const TIMEOUT: Duration = Duration::from_secs(300);

    fn machine(now: Instant) -> SessionMachine {
        SessionMachine::new("test", 1024, TIMEOUT, now)
    }

    fn fragment(bytes: &[u8]) -> ConnectionEvent {
        ConnectionEvent::Fragment(bytes.to_vec())
    }

    fn control(event: ControlEvent) -> ConnectionEvent {
        ConnectionEvent::Control(event)
    }

    fn expect_job(actions: Vec<Action>) -> PipelineJob {
        match actions.as_slice() {
            [Action::Process(job)] => job.clone(),
            other => panic!("expected a pipeline job, got {:?}", other),
        }
    }

    #[test]
    fn test_first_fragment_starts_recording() {
        let now = Instant::now();
        let mut m = machine(now);
        assert_eq!(m.state(), SessionState::Idle);

        assert!(m.handle(fragment(b"ab"), now).is_empty());
        assert_eq!(m.state(), SessionState::Recording);
        assert_eq!(m.current_session().unwrap().fragment_count(), 1);
        assert_eq!(m.sessions_started(), 1);
    }

    #[test]
    fn test_start_creates_empty_session() {
        let now = Instant::now();
        let mut m = machine(now);

        assert!(m.handle(control(ControlEvent::Start), now).is_empty());
        assert_eq!(m.state(), SessionState::Recording);
        assert_eq!(m.current_session().unwrap().fragment_count(), 0);
    }

    #[test]
    fn test_stop_with_fragments_hands_off_concatenated_payload() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(control(ControlEvent::Start), now);
        m.handle(fragment(b"web"), now);
        m.handle(fragment(b""), now);
        m.handle(fragment(b"m!"), now);

        let job = expect_job(m.handle(control(ControlEvent::Stop), now));
        assert_eq!(*job.payload, b"webm!");
        assert_eq!(job.fragment_count, 3);
        assert_eq!(m.state(), SessionState::Processing);
    }

    #[test]
    fn test_stop_when_idle_reports_error_without_session() {
        let now = Instant::now();
        let mut m = machine(now);

        let actions = m.handle(control(ControlEvent::Stop), now);
        assert_eq!(actions, vec![Action::Send(ProcessingResult::Error(ErrorKind::NoAudioData))]);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.current_session().is_none());
        assert_eq!(m.sessions_started(), 0);
    }

    #[test]
    fn test_stop_after_empty_start_reports_error() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(control(ControlEvent::Start), now);

        let actions = m.handle(control(ControlEvent::Stop), now);
        assert_eq!(actions, vec![Action::Send(ProcessingResult::Error(ErrorKind::NoAudioData))]);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.current_session().is_none());
    }

    #[test]
    fn test_start_while_recording_resets_session() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(fragment(b"old-1"), now);
        m.handle(fragment(b"old-2"), now);
        let first_id = m.current_session().unwrap().id();

        m.handle(control(ControlEvent::Start), now);
        let session = m.current_session().unwrap();
        assert_ne!(session.id(), first_id);
        assert_eq!(session.fragment_count(), 0);
        assert_eq!(m.state(), SessionState::Recording);

        m.handle(fragment(b"new"), now);
        assert_eq!(m.current_session().unwrap().fragment_count(), 1);

        let job = expect_job(m.handle(control(ControlEvent::Stop), now));
        assert_eq!(*job.payload, b"new");
    }

    #[test]
    fn test_fragments_during_processing_are_rejected() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(fragment(b"first"), now);
        let job = expect_job(m.handle(control(ControlEvent::Stop), now));

        let actions = m.handle(fragment(b"late"), now);
        assert_eq!(
            actions,
            vec![Action::Rejected(ProtocolError::OutOfOrderFragment { state: "processing" })]
        );
        assert_eq!(m.current_session().unwrap().concatenate(), b"first");

        assert!(m.finish_processing(job.session_id));
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.current_session().is_none());

        // The late fragment did not leak into the next session
        m.handle(fragment(b"next"), now);
        let job = expect_job(m.handle(control(ControlEvent::Stop), now));
        assert_eq!(*job.payload, b"next");
    }

    #[test]
    fn test_controls_during_processing_are_ignored() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(fragment(b"a"), now);
        m.handle(control(ControlEvent::Stop), now);

        let actions = m.handle(control(ControlEvent::Start), now);
        assert!(matches!(actions.as_slice(), [Action::Rejected(ProtocolError::OutOfOrderControl { .. })]));
        let actions = m.handle(control(ControlEvent::Stop), now);
        assert!(matches!(actions.as_slice(), [Action::Rejected(ProtocolError::OutOfOrderControl { .. })]));

        assert_eq!(m.state(), SessionState::Processing);
    }

    #[test]
    fn test_unknown_and_malformed_controls_leave_state_unchanged() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(fragment(b"a"), now);

        let actions = m.handle(control(ControlEvent::parse(r#"{"action":"dance"}"#)), now);
        assert!(matches!(actions.as_slice(), [Action::Rejected(ProtocolError::UnknownAction(_))]));
        let actions = m.handle(control(ControlEvent::parse("{oops")), now);
        assert!(matches!(actions.as_slice(), [Action::Rejected(ProtocolError::MalformedControl(_))]));

        assert_eq!(m.state(), SessionState::Recording);
        assert_eq!(m.current_session().unwrap().fragment_count(), 1);
    }

    #[test]
    fn test_machine_is_reentrant_across_sessions() {
        let now = Instant::now();
        let mut m = machine(now);

        for round in 0..3u8 {
            m.handle(fragment(&[round]), now);
            let job = expect_job(m.handle(control(ControlEvent::Stop), now));
            assert_eq!(*job.payload, vec![round]);
            assert_eq!(job.session_id, SessionId(round as u64 + 1));
            assert!(m.finish_processing(job.session_id));
        }
        assert_eq!(m.sessions_started(), 3);
    }

    #[test]
    fn test_stale_completion_is_ignored() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(fragment(b"a"), now);

        assert!(!m.finish_processing(SessionId(1)));
        assert_eq!(m.state(), SessionState::Recording);
    }

    #[test]
    fn test_session_too_large_discards_recording() {
        let now = Instant::now();
        let mut m = SessionMachine::new("test", 8, TIMEOUT, now);
        m.handle(fragment(&[0; 6]), now);

        let actions = m.handle(fragment(&[0; 3]), now);
        assert_eq!(actions, vec![Action::Send(ProcessingResult::Error(ErrorKind::SessionTooLarge))]);
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.current_session().is_none());

        // Recoverable: the next recording works
        m.handle(fragment(&[1; 8]), now);
        assert_eq!(m.state(), SessionState::Recording);
    }

    #[test]
    fn test_idle_timeout_closes_in_every_state() {
        let start = Instant::now();

        for setup in 0..3 {
            let mut m = machine(start);
            match setup {
                1 => {
                    m.handle(fragment(b"a"), start);
                }
                2 => {
                    m.handle(fragment(b"a"), start);
                    m.handle(control(ControlEvent::Stop), start);
                }
                _ => {}
            }

            assert!(m.poll_timeout(start + Duration::from_secs(299)).is_none());
            let action = m.poll_timeout(start + TIMEOUT);
            assert_eq!(action, Some(Action::Close(ConnectionError::Timeout(TIMEOUT))));
            assert_eq!(m.state(), SessionState::Closed);
            assert!(m.current_session().is_none());

            // Fires only once
            assert!(m.poll_timeout(start + TIMEOUT * 2).is_none());
        }
    }

    #[test]
    fn test_client_events_reset_idle_timer() {
        let start = Instant::now();
        let mut m = machine(start);

        let later = start + Duration::from_secs(200);
        m.handle(fragment(b"a"), later);
        assert!(m.poll_timeout(start + Duration::from_secs(400)).is_none());
        assert!(m.poll_timeout(later + TIMEOUT).is_some());
    }

    #[test]
    fn test_pipeline_completion_does_not_reset_idle_timer() {
        let start = Instant::now();
        let mut m = machine(start);
        m.handle(fragment(b"a"), start);
        let job = expect_job(m.handle(control(ControlEvent::Stop), start));

        m.finish_processing(job.session_id);
        assert_eq!(m.last_activity(), start);
        assert!(m.poll_timeout(start + TIMEOUT).is_some());
    }

    #[test]
    fn test_disconnect_discards_session_and_ignores_later_events() {
        let now = Instant::now();
        let mut m = machine(now);
        m.handle(fragment(b"a"), now);
        let job = expect_job(m.handle(control(ControlEvent::Stop), now));

        let actions = m.handle(ConnectionEvent::Disconnected, now);
        assert_eq!(actions, vec![Action::Close(ConnectionError::Disconnected)]);
        assert_eq!(m.state(), SessionState::Closed);
        assert!(m.current_session().is_none());

        assert!(m.handle(fragment(b"b"), now).is_empty());
        assert!(!m.finish_processing(job.session_id));
        assert_eq!(m.state(), SessionState::Closed);
    }

    #[test]
    fn test_observers_see_every_accepted_fragment() {
        let now = Instant::now();
        let mut m = machine(now);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        m.add_observer(Box::new(EchoObserver::new(move |bytes| sink.lock().unwrap().push(bytes))));

        m.handle(fragment(b"one"), now);
        m.handle(fragment(b"two"), now);
        m.handle(control(ControlEvent::Stop), now);
        m.handle(fragment(b"rejected"), now);

        assert_eq!(*seen.lock().unwrap(), vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_connections_are_isolated() {
        let now = Instant::now();
        let mut a = SessionMachine::new("a", 1024, TIMEOUT, now);
        let mut b = SessionMachine::new("b", 1024, TIMEOUT, now);

        b.handle(fragment(b"b-only"), now);
        for _ in 0..5 {
            a.handle(fragment(b"a"), now);
        }

        assert_eq!(a.current_session().unwrap().fragment_count(), 5);
        assert_eq!(b.current_session().unwrap().fragment_count(), 1);

        a.handle(ConnectionEvent::Disconnected, now);
        assert_eq!(b.state(), SessionState::Recording);
        assert_eq!(b.current_session().unwrap().concatenate(), b"b-only");
    }
}
