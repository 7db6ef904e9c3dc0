//! Repeat state machine for the serial frame driver.
//!
//! The serial controller does not report repeat counts; it simply resends
//! the frame while the button is held.  Identity therefore drives the
//! logic: an identical composite key inside the confirmation window is
//! still the same physical press, after the window it becomes a repeat,
//! and a loop iteration with no frame ends a repeat run with a synthetic
//! release.

use std::time::Instant;

use crate::event::{KeyId, KeyPress};
use crate::protocol::frame::REPEAT_CONFIRM;

/// Held-key state between two driver-loop iterations.
#[derive(Debug, Default)]
pub struct FrameKeyTracker {
    last: Option<u64>,
    first_seen: Option<Instant>,
    repeating: bool,
}

impl FrameKeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one composite key; returns the event to emit, if any.
    pub fn on_key(&mut self, key: u64, now: Instant) -> Option<KeyPress> {
        if self.last != Some(key) {
            self.last = Some(key);
            self.first_seen = Some(now);
            self.repeating = false;
            return Some(KeyPress::fresh(KeyId::Code(key)));
        }
        let confirmed = self
            .first_seen
            .is_some_and(|t| now.duration_since(t) >= REPEAT_CONFIRM);
        if !confirmed {
            return None;
        }
        self.repeating = true;
        Some(KeyPress::repeat(KeyId::Code(key)))
    }

    /// Called when a loop iteration saw no frame.  Ends a live repeat run
    /// with a release; otherwise just forgets the last key, so the next
    /// frame is a fresh press even if it restates the same key.
    pub fn on_idle(&mut self) -> Option<KeyPress> {
        if self.repeating {
            self.repeating = false;
            self.first_seen = None;
            return self.last.take().map(|k| KeyPress::release(KeyId::Code(k)));
        }
        self.last = None;
        None
    }

    /// True while a repeat run is live (used to decide whether an idle
    /// iteration may apply pending display work).
    pub fn repeating(&self) -> bool {
        self.repeating
    }
}
