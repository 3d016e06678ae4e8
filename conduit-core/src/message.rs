//! An owned, immutable byte buffer passed through queues and callbacks.
//!
//! `Message` is intentionally a plain `Vec<u8>` wrapper rather than a
//! refcounted buffer: spec P4 requires that cloning a `Message` performs a
//! deep copy (a fresh allocation) while moving one leaves the source
//! empty, and `Vec<u8>`'s ordinary `Clone`/move semantics give us exactly
//! that for free.

use std::fmt;

/// An owned, immutable byte buffer.
///
/// Empty messages (zero length) are legal to construct but are never
/// transmitted by a [`Channel`](crate::channel::Channel) — `queue_write`
/// silently drops them.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Message {
    data: Vec<u8>,
}

impl Message {
    /// Construct a message from an owned byte vector (no copy).
    #[must_use]
    pub const fn from_vec(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Construct a message by copying a byte slice.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    /// Construct a message by copying a UTF-8 string slice.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        Self {
            data: s.as_bytes().to_vec(),
        }
    }

    /// Construct an uninitialized message of the given length.
    ///
    /// The contents are zero-filled (Rust has no sound uninitialized
    /// `Vec<u8>` without `unsafe`, and this module is safe code only); this
    /// matches the host-observable contract of the original API, which is
    /// "a buffer of this length that I will immediately overwrite."
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            data: vec![0u8; len],
        }
    }

    /// Number of bytes in the message.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the message holds zero bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the message contents as a byte slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the message contents as a mutable byte slice.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Borrow the message contents as a UTF-8 string view.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not valid UTF-8.
    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.data)
    }

    /// Consume the message and return the owned byte vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    /// Copy a sub-range of the message into a new message.
    ///
    /// `start` and `len` are clamped to the available data.
    #[must_use]
    pub fn substr(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.data.len());
        let end = (start + len).min(self.data.len());
        Self::from_slice(&self.data[start..end])
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for Message {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::from_str(s)
    }
}

impl From<Message> for Vec<u8> {
    fn from(msg: Message) -> Self {
        msg.data
    }
}

impl AsRef<[u8]> for Message {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl PartialEq<[u8]> for Message {
    fn eq(&self, other: &[u8]) -> bool {
        self.data == other
    }
}

impl PartialEq<&str> for Message {
    fn eq(&self, other: &&str) -> bool {
        self.data == other.as_bytes()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_then_deep_equal_preserves_bytes() {
        let original = Message::from_str("hi!");
        let copy = original.clone();
        assert_eq!(original, copy);
        assert_eq!(copy.as_slice(), b"hi!");
    }

    #[test]
    fn clone_is_a_deep_copy_not_a_shared_buffer() {
        let mut original = Message::from_str("hi!");
        let copy = original.clone();
        original.as_mut_slice()[0] = b'H';
        assert_eq!(original.as_slice(), b"Hi!");
        assert_eq!(copy.as_slice(), b"hi!");
    }

    #[test]
    fn move_leaves_no_trace_in_source_scope() {
        let original = Message::from_str("hi!");
        let moved = original;
        assert_eq!(moved.as_slice(), b"hi!");
    }

    #[test]
    fn empty_message_is_legal() {
        let empty = Message::from_vec(Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn substr_clamps_to_available_data() {
        let msg = Message::from_str("hello world");
        assert_eq!(msg.substr(0, 5).as_slice(), b"hello");
        assert_eq!(msg.substr(6, 100).as_slice(), b"world");
        assert_eq!(msg.substr(100, 5).as_slice(), b"");
    }

    #[test]
    fn as_str_round_trips_utf8() {
        let msg = Message::from_str("héllo");
        assert_eq!(msg.as_str().unwrap(), "héllo");
    }
}
