//! An append-only byte FIFO handed to listener callbacks for incremental
//! consumption.
//!
//! Internally this is a segmented buffer of `Bytes` chunks rather than one
//! contiguous `Vec<u8>`: a dequeue that fits entirely within the front
//! segment is a refcount bump, not a copy. Spanning multiple segments falls
//! back to a copy, same tradeoff as the teacher's `SegmentedBuffer`.
//!
//! `StreamQueue` has no internal locking — it is a per-[`Channel`]
//! inbound buffer, and the spec requires every operation to run under
//! whichever thread currently holds it (the channel's read-tick or the
//! caller draining it).
//!
//! [`Channel`]: crate::channel::Channel

use crate::message::Message;
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// An append-only FIFO of bytes.
#[derive(Debug, Default)]
pub struct StreamQueue {
    segments: VecDeque<Bytes>,
    len: usize,
}

impl StreamQueue {
    /// Create an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segments: VecDeque::new(),
            len: 0,
        }
    }

    /// Number of bytes currently queued.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True if the queue holds no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Drop all queued bytes.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
    }

    /// Append a byte slice (copies into an owned segment).
    pub fn enqueue(&mut self, data: &[u8]) {
        self.enqueue_bytes(Bytes::copy_from_slice(data));
    }

    /// Append an owned byte vector (no copy).
    pub fn enqueue_vec(&mut self, data: Vec<u8>) {
        self.enqueue_bytes(Bytes::from(data));
    }

    /// Append a [`Message`]'s contents (no copy).
    pub fn enqueue_message(&mut self, msg: Message) {
        self.enqueue_vec(msg.into_vec());
    }

    fn enqueue_bytes(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segments.push_back(bytes);
    }

    /// Remove and return at most `max_n` bytes from the front of the queue.
    pub fn dequeue(&mut self, max_n: usize) -> Vec<u8> {
        let n = max_n.min(self.len);
        self.take_front(n).to_vec()
    }

    /// Remove and return at most `max_n` bytes from the front of the queue
    /// as an owned [`Message`].
    pub fn dequeue_as_message(&mut self, max_n: usize) -> Message {
        Message::from_vec(self.dequeue(max_n))
    }

    /// Copy (without removing) at most `max_n` bytes from the front of the
    /// queue. Does not advance the queue.
    #[must_use]
    pub fn peek(&self, max_n: usize) -> Vec<u8> {
        let n = max_n.min(self.len);
        let mut out = Vec::with_capacity(n);
        let mut remaining = n;
        for seg in &self.segments {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(seg.len());
            out.extend_from_slice(&seg[..take]);
            remaining -= take;
        }
        out
    }

    /// Remove exactly `n` bytes from the front of the queue.
    ///
    /// `n` is already clamped by callers to `self.len`.
    fn take_front(&mut self, n: usize) -> Bytes {
        if n == 0 {
            return Bytes::new();
        }

        let Some(front) = self.segments.front_mut() else {
            return Bytes::new();
        };

        if front.len() >= n {
            self.len -= n;
            let out = front.split_to(n);
            if front.is_empty() {
                self.segments.pop_front();
            }
            return out;
        }

        // Spans multiple segments: fall back to a copy.
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let seg = self
                .segments
                .pop_front()
                .expect("len bookkeeping guarantees enough segments");
            let take = remaining.min(seg.len());
            out.extend_from_slice(&seg[..take]);
            remaining -= take;
            self.len -= take;
            if take < seg.len() {
                let mut rest = seg;
                rest.advance(take);
                self.segments.push_front(rest);
            }
        }
        out.freeze()
    }
}
