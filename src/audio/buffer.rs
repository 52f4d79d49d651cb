//! # Session Buffer
//!
//! Accumulates the binary fragments of one recording exactly as they arrive.
//! Fragments are compressed container data (e.g. WebM/Opus), so nothing is
//! interpreted here: the only job is to reproduce the original byte stream on
//! demand and to keep cheap counters for logging and metrics.
//!
//! ## Key Features:
//! - **Arrival order**: fragments are concatenated in the order they were appended
//! - **Zero-length fragments**: accepted and counted, contribute no bytes
//! - **Size cap**: appends past the configured cap fail instead of truncating
//! - **Reuse**: `clear()` keeps the allocation so a long-lived connection can
//!   record many sessions without regrowing the buffer each time

/// Returned when an append would push the buffer past its byte cap.
///
/// The rejected fragment is not stored; the buffer is left as it was.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTooLarge {
    pub limit: usize,
    pub attempted: usize,
}

/// Ordered store of binary fragments for the active recording.
///
/// ## Invariant:
/// `byte_count` always equals the sum of the stored fragment lengths and
/// `fragment_count` always equals the number of stored fragments.
#[derive(Debug)]
pub struct SessionBuffer {
    /// Raw fragments in arrival order
    fragments: Vec<Vec<u8>>,

    /// Cached total of all fragment lengths
    byte_count: usize,

    /// Maximum number of bytes one session may hold
    max_bytes: usize,
}

impl SessionBuffer {
    /// Create an empty buffer that refuses to grow beyond `max_bytes`.
    pub fn new(max_bytes: usize) -> Self {
        Self {
            fragments: Vec::new(),
            byte_count: 0,
            max_bytes,
        }
    }

    /// Append one fragment.
    ///
    /// ## Errors:
    /// Returns [`SessionTooLarge`] if the fragment would exceed the cap.
    pub fn append(&mut self, fragment: Vec<u8>) -> Result<(), SessionTooLarge> {
        let attempted = self.byte_count + fragment.len();
        if attempted > self.max_bytes {
            return Err(SessionTooLarge {
                limit: self.max_bytes,
                attempted,
            });
        }

        self.byte_count = attempted;
        self.fragments.push(fragment);
        Ok(())
    }

    /// Join all fragments in arrival order with nothing in between.
    ///
    /// Does not mutate the buffer; calling it twice returns the same bytes.
    pub fn concatenate(&self) -> Vec<u8> {
        let mut joined = Vec::with_capacity(self.byte_count);
        for fragment in &self.fragments {
            joined.extend_from_slice(fragment);
        }
        joined
    }

    /// Drop all fragments, ready for the next session.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.byte_count = 0;
    }

    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    #[cfg(test)]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenate_empty_buffer() {
        let buffer = SessionBuffer::new(1024);
        assert!(buffer.concatenate().is_empty());
        assert_eq!(buffer.byte_count(), 0);
        assert_eq!(buffer.fragment_count(), 0);
    }

    #[test]
    fn test_concatenate_preserves_arrival_order() {
        let mut buffer = SessionBuffer::new(1024);
        let fragments: Vec<Vec<u8>> = vec![
            vec![0x1a, 0x45, 0xdf, 0xa3],
            vec![],
            vec![0x00],
            vec![],
            (0u8..=200).collect(),
        ];

        let mut expected = Vec::new();
        for fragment in &fragments {
            expected.extend_from_slice(fragment);
            buffer.append(fragment.clone()).unwrap();
        }

        assert_eq!(buffer.concatenate(), expected);
        assert_eq!(buffer.fragment_count(), 5);
        assert_eq!(buffer.byte_count(), expected.len());
    }

    #[test]
    fn test_concatenate_is_idempotent() {
        let mut buffer = SessionBuffer::new(1024);
        buffer.append(b"abc".to_vec()).unwrap();
        buffer.append(b"def".to_vec()).unwrap();

        let first = buffer.concatenate();
        let second = buffer.concatenate();
        assert_eq!(first, b"abcdef");
        assert_eq!(first, second);
        assert_eq!(buffer.fragment_count(), 2);
    }

    #[test]
    fn test_only_zero_length_fragments() {
        let mut buffer = SessionBuffer::new(1024);
        buffer.append(Vec::new()).unwrap();
        buffer.append(Vec::new()).unwrap();

        assert!(!buffer.is_empty());
        assert_eq!(buffer.fragment_count(), 2);
        assert!(buffer.concatenate().is_empty());
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut buffer = SessionBuffer::new(1024);
        buffer.append(vec![1, 2, 3]).unwrap();
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.byte_count(), 0);

        buffer.append(vec![9]).unwrap();
        assert_eq!(buffer.concatenate(), vec![9]);
    }

    #[test]
    fn test_append_past_cap_is_rejected() {
        let mut buffer = SessionBuffer::new(4);
        buffer.append(vec![1, 2, 3]).unwrap();

        let err = buffer.append(vec![4, 5]).unwrap_err();
        assert_eq!(err, SessionTooLarge { limit: 4, attempted: 5 });

        // The rejected fragment was not stored
        assert_eq!(buffer.concatenate(), vec![1, 2, 3]);
        assert!(buffer.append(vec![4]).is_ok());
    }
}
