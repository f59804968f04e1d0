//! Outbound send lanes.
//!
//! Each connection keeps two of these: the proto lane (routing control,
//! pings) and the data lane (packets). A lane is an ordered queue of
//! already-encoded frames plus a byte counter for O(1) admission checks,
//! and a send offset into the front frame so a partially written frame
//! resumes exactly where it stopped. Frame bytes are never interleaved:
//! the writer finishes the front frame of one lane before switching to
//! the other.

use std::collections::VecDeque;

use bytes::Bytes;

/// One outbound lane: encoded frames, byte total, partial-send offset.
///
/// # Invariant
///
/// `size() == Σ frame.len()` over queued frames, including a front frame
/// that is partially on the wire; the total drops only when a frame
/// completes (or the lane is cleared by a reset, the one place a frame
/// may be cut mid-flight).
#[derive(Debug, Default)]
pub struct SendQueue {
    frames: VecDeque<Bytes>,
    size: usize,
    sent: usize,
}

impl SendQueue {
    /// An empty lane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued bytes across all frames.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// True when no frames are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// True while the front frame is partially written.
    #[must_use]
    pub fn mid_frame(&self) -> bool {
        self.sent > 0
    }

    /// Admission check: would a frame of `n` bytes keep the lane under
    /// `limit`? Strictly less-than, matching the drop policy.
    #[must_use]
    pub fn can_accept(&self, n: usize, limit: usize) -> bool {
        self.size + n < limit
    }

    /// Append an encoded frame.
    pub fn push(&mut self, frame: Bytes) {
        self.size += frame.len();
        self.frames.push_back(frame);
    }

    /// The unsent remainder of the front frame, if any.
    #[must_use]
    pub fn front_remaining(&self) -> Option<&[u8]> {
        self.frames.front().map(|f| &f[self.sent..])
    }

    /// Record `n` bytes of the front frame as written. Returns `true`
    /// when that completed the frame.
    pub fn advance(&mut self, n: usize) -> bool {
        let front_len = self.frames.front().map_or(0, Bytes::len);
        self.sent += n;
        debug_assert!(self.sent <= front_len);

        if self.sent == front_len && front_len > 0 {
            self.frames.pop_front();
            self.size -= front_len;
            self.sent = 0;
            return true;
        }
        false
    }

    /// Drop everything, including a partially sent frame. Reset only.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.size = 0;
        self.sent = 0;
    }
}
