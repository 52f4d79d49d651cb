//! Fragment observers.
//!
//! Observers are told about every fragment the state machine accepts. They
//! are a side channel for diagnostics (the echo mode sends each fragment back
//! to the client) and can never influence session state.

use crate::audio::session::SessionId;

/// Receives a notification for each appended fragment.
pub trait FragmentObserver: Send {
    /// `index` is the fragment's zero-based position within the session.
    fn on_fragment(&self, session: SessionId, index: usize, fragment: &[u8]);
}

/// Sends every fragment back to the client unchanged.
///
/// Delivery is message passing: the observer hands a copy of the fragment to
/// whatever `send` forwards it to (the connection actor in production).
pub struct EchoObserver<F>
where
    F: Fn(Vec<u8>) + Send,
{
    send: F,
}

impl<F> EchoObserver<F>
where
    F: Fn(Vec<u8>) + Send,
{
    pub fn new(send: F) -> Self {
        Self { send }
    }
}

impl<F> FragmentObserver for EchoObserver<F>
where
    F: Fn(Vec<u8>) + Send,
{
    fn on_fragment(&self, session: SessionId, index: usize, fragment: &[u8]) {
        tracing::trace!(session_id = %session, index, bytes = fragment.len(), "echoing fragment");
        (self.send)(fragment.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_echo_observer_forwards_copy() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = sent.clone();
        let observer = EchoObserver::new(move |bytes| sink.lock().unwrap().push(bytes));

        observer.on_fragment(SessionId(1), 0, b"abc");
        observer.on_fragment(SessionId(1), 1, b"");

        assert_eq!(*sent.lock().unwrap(), vec![b"abc".to_vec(), Vec::new()]);
    }
}
