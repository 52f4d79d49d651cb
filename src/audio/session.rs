//! # Audio Session
//!
//! One recording attempt within a connection's lifetime: an identifier, the
//! buffered fragments and a few timestamps. Sessions are owned exclusively by
//! the connection's [`SessionMachine`](crate::audio::machine::SessionMachine);
//! nothing else ever holds a reference to one, so no locking is needed.
//!
//! ## Session Lifecycle:
//! 1. **Created**: on the first binary fragment, or an explicit start
//! 2. **Recording**: fragments are appended
//! 3. **Processing**: the response pipeline runs over the concatenated audio
//! 4. **Discarded**: after processing, on timeout, or on disconnect

use crate::audio::buffer::{SessionBuffer, SessionTooLarge};
use chrono::{DateTime, Utc};
use std::fmt;

/// Per-connection monotonic session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a connection is in its record/respond cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No active recording
    Idle,
    /// Accumulating fragments
    Recording,
    /// Response pipeline running, no fragments accepted
    Processing,
    /// Terminal: timed out or disconnected
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Processing => "processing",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recording and its buffered audio.
#[derive(Debug)]
pub struct Session {
    id: SessionId,

    buffer: SessionBuffer,

    /// When the session object was created
    created_at: DateTime<Utc>,

    /// When the first fragment arrived (None for an explicit start with no audio yet)
    started_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a session around an (empty) buffer.
    ///
    /// The buffer is passed in rather than allocated so the machine can reuse
    /// one allocation across the sessions of a long-lived connection.
    pub fn new(id: SessionId, mut buffer: SessionBuffer) -> Self {
        buffer.clear();
        Self {
            id,
            buffer,
            created_at: Utc::now(),
            started_at: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Append a fragment, stamping `started_at` on the first one.
    pub fn append(&mut self, fragment: Vec<u8>) -> Result<(), SessionTooLarge> {
        self.buffer.append(fragment)?;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn concatenate(&self) -> Vec<u8> {
        self.buffer.concatenate()
    }

    pub fn byte_count(&self) -> usize {
        self.buffer.byte_count()
    }

    pub fn fragment_count(&self) -> usize {
        self.buffer.fragment_count()
    }

    pub fn has_fragments(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Release the session, handing back its buffer (cleared) for reuse.
    pub fn into_buffer(self) -> SessionBuffer {
        let mut buffer = self.buffer;
        buffer.clear();
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_at_set_on_first_fragment() {
        let mut session = Session::new(SessionId(1), SessionBuffer::new(64));
        assert!(session.started_at().is_none());
        assert!(!session.has_fragments());

        session.append(vec![1, 2]).unwrap();
        let started = session.started_at().unwrap();
        session.append(vec![3]).unwrap();

        assert_eq!(session.started_at(), Some(started));
        assert!(started >= session.created_at());
        assert_eq!(session.fragment_count(), 2);
        assert_eq!(session.byte_count(), 3);
    }

    #[test]
    fn test_new_session_clears_reused_buffer() {
        let mut buffer = SessionBuffer::new(64);
        buffer.append(vec![7; 10]).unwrap();

        let session = Session::new(SessionId(2), buffer);
        assert_eq!(session.byte_count(), 0);

        let buffer = session.into_buffer();
        assert!(buffer.is_empty());
        assert_eq!(buffer.max_bytes(), 64);
    }
}
