//! Repeat/debounce state machine for the socket (line protocol) driver.
//!
//! The decoder daemon already reports repeat ticks, but they need
//! conditioning before they are fit for the application:
//!
//! - fresh events restating the previous key inside the debounce window
//!   are contact bounce, not new presses;
//! - repeat ticks only count once the key has been held through the
//!   confirmation window;
//! - a repeat run that stops producing ticks must be closed with a
//!   synthetic release, which is what the driver's read timeout exists
//!   for.

use std::time::{Duration, Instant};

use crate::event::{KeyId, KeyPress};
use crate::protocol::lirc::{LircLine, KEYPRESS_DEBOUNCE, REPEAT_CONFIRM};

/// Conditioning state between two driver-loop iterations.
#[derive(Debug, Default)]
pub struct SocketKeyTracker {
    last_key: Option<String>,
    first_seen: Option<Instant>,
    last_emit: Option<Instant>,
    repeating: bool,
    read_timeout: Option<Duration>,
}

impl SocketKeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeout the driver should use for its next read: `None` while idle
    /// (wait indefinitely), shortened while a repeat run is live so the
    /// missing-tick release can be synthesized on time.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Feeds one decoded line; returns the events to emit, in order.
    ///
    /// At most two events result: a synthetic release closing a previous
    /// repeat run, then the fresh event for the new key.
    pub fn on_line(&mut self, line: &LircLine, now: Instant) -> Vec<KeyPress> {
        let mut out = Vec::new();

        if line.repeat == 0 {
            let bounced = self.last_key.as_deref() == Some(line.key.as_str())
                && self
                    .first_seen
                    .is_some_and(|t| now.duration_since(t) < KEYPRESS_DEBOUNCE);
            if bounced {
                return out;
            }
            if self.repeating {
                if let Some(prev) = self.last_key.take() {
                    out.push(KeyPress::release(KeyId::Name(prev)));
                }
            }
            self.last_key = Some(line.key.clone());
            self.repeating = false;
            self.first_seen = Some(now);
            self.last_emit = Some(now);
            self.read_timeout = None;
            out.push(KeyPress::fresh(KeyId::name(&line.key)));
        } else {
            let confirmed = self
                .first_seen
                .is_some_and(|t| now.duration_since(t) >= REPEAT_CONFIRM);
            if !confirmed {
                return out;
            }
            self.repeating = true;
            self.read_timeout = Some(REPEAT_CONFIRM);
            self.last_emit = Some(now);
            out.push(KeyPress::repeat(KeyId::name(&line.key)));
        }

        out
    }

    /// Called when the read timed out with no line; synthesizes the
    /// release ending a repeat run whose ticks stopped arriving.
    pub fn on_no_data(&mut self, now: Instant) -> Option<KeyPress> {
        if !self.repeating {
            return None;
        }
        let overdue = self
            .last_emit
            .is_some_and(|t| now.duration_since(t) >= REPEAT_CONFIRM);
        if !overdue {
            return None;
        }
        self.repeating = false;
        self.first_seen = None;
        self.read_timeout = None;
        self.last_key.take().map(|k| KeyPress::release(KeyId::Name(k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(repeat: u32, key: &str) -> LircLine {
        LircLine { scan_code: 0, repeat, key: key.to_string() }
    }

    fn ms(t0: Instant, ms: u64) -> Instant {
        t0 + Duration::from_millis(ms)
    }

    #[test]
    fn test_fresh_key_emits_single_event() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        let out = tracker.on_line(&line(0, "OK"), t0);

        assert_eq!(out, vec![KeyPress::fresh(KeyId::name("OK"))]);
        assert_eq!(tracker.read_timeout(), None);
    }

    #[test]
    fn test_duplicate_fresh_event_inside_debounce_window_is_dropped() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        let out = tracker.on_line(&line(0, "OK"), ms(t0, 100));

        assert!(out.is_empty(), "100ms duplicate must be treated as bounce");
    }

    #[test]
    fn test_duplicate_fresh_event_after_debounce_window_is_emitted() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        let out = tracker.on_line(&line(0, "OK"), ms(t0, 200));

        assert_eq!(out, vec![KeyPress::fresh(KeyId::name("OK"))]);
    }

    #[test]
    fn test_different_key_is_never_debounced() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        let out = tracker.on_line(&line(0, "Menu"), ms(t0, 10));

        assert_eq!(out, vec![KeyPress::fresh(KeyId::name("Menu"))]);
    }

    #[test]
    fn test_repeat_tick_before_confirmation_window_is_dropped() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        let out = tracker.on_line(&line(1, "OK"), ms(t0, 200));

        assert!(out.is_empty());
        assert_eq!(tracker.read_timeout(), None);
    }

    #[test]
    fn test_repeat_tick_after_confirmation_window_is_emitted() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        let out = tracker.on_line(&line(1, "OK"), ms(t0, 400));

        assert_eq!(out, vec![KeyPress::repeat(KeyId::name("OK"))]);
        assert_eq!(tracker.read_timeout(), Some(REPEAT_CONFIRM));
    }

    #[test]
    fn test_timeout_after_repeat_synthesizes_release() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        tracker.on_line(&line(1, "OK"), ms(t0, 400));
        let release = tracker.on_no_data(ms(t0, 750));

        assert_eq!(release, Some(KeyPress::release(KeyId::name("OK"))));
        assert_eq!(tracker.read_timeout(), None);
    }

    #[test]
    fn test_timeout_too_early_does_not_release() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        tracker.on_line(&line(1, "OK"), ms(t0, 400));

        assert_eq!(tracker.on_no_data(ms(t0, 500)), None);
    }

    #[test]
    fn test_timeout_without_repeat_does_nothing() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);

        assert_eq!(tracker.on_no_data(ms(t0, 1000)), None);
    }

    #[test]
    fn test_new_key_during_repeat_run_releases_previous_first() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        tracker.on_line(&line(1, "OK"), ms(t0, 400));
        let out = tracker.on_line(&line(0, "Menu"), ms(t0, 450));

        assert_eq!(
            out,
            vec![
                KeyPress::release(KeyId::name("OK")),
                KeyPress::fresh(KeyId::name("Menu")),
            ]
        );
    }

    #[test]
    fn test_same_key_pressed_again_after_release_is_fresh() {
        let mut tracker = SocketKeyTracker::new();
        let t0 = Instant::now();

        tracker.on_line(&line(0, "OK"), t0);
        tracker.on_line(&line(1, "OK"), ms(t0, 400));
        tracker.on_no_data(ms(t0, 750));
        let out = tracker.on_line(&line(0, "OK"), ms(t0, 760));

        assert_eq!(out, vec![KeyPress::fresh(KeyId::name("OK"))]);
    }
}
