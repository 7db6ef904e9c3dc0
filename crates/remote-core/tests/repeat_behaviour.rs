//! Integration tests for the repeat/debounce behaviour across the public
//! API: lines and frames go in, conditioned key events come out.

use std::time::{Duration, Instant};

use remote_core::protocol::display::{encode_string, DisplayMode};
use remote_core::protocol::frame::Frame;
use remote_core::{parse_event_line, FrameKeyTracker, KeyId, KeyPress, SocketKeyTracker};

fn at(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}

#[test]
fn test_socket_debounce_then_repeat_then_release_sequence() {
    let mut tracker = SocketKeyTracker::new();
    let t0 = Instant::now();

    // Fresh press at t=0.
    let l0 = parse_event_line("0 0 OK").unwrap();
    assert_eq!(
        tracker.on_line(&l0, t0),
        vec![KeyPress::fresh(KeyId::name("OK"))]
    );

    // Identical fresh event at t=100ms: inside the 150ms debounce window.
    let l1 = parse_event_line("0 0 OK").unwrap();
    assert!(tracker.on_line(&l1, at(t0, 100)).is_empty());

    // Repeat tick at t=400ms: confirmation window (350ms) has elapsed.
    let l2 = parse_event_line("0 1 OK").unwrap();
    assert_eq!(
        tracker.on_line(&l2, at(t0, 400)),
        vec![KeyPress::repeat(KeyId::name("OK"))]
    );

    // Silence until t=750ms: one synthetic release.
    assert_eq!(
        tracker.on_no_data(at(t0, 750)),
        Some(KeyPress::release(KeyId::name("OK")))
    );
    assert_eq!(tracker.on_no_data(at(t0, 800)), None);
}

#[test]
fn test_socket_driver_timeout_tracks_repeat_state() {
    let mut tracker = SocketKeyTracker::new();
    let t0 = Instant::now();

    assert_eq!(tracker.read_timeout(), None);
    tracker.on_line(&parse_event_line("0 0 Up").unwrap(), t0);
    assert_eq!(tracker.read_timeout(), None);

    tracker.on_line(&parse_event_line("0 1 Up").unwrap(), at(t0, 400));
    assert_eq!(tracker.read_timeout(), Some(Duration::from_millis(350)));

    tracker.on_no_data(at(t0, 800));
    assert_eq!(tracker.read_timeout(), None);
}

#[test]
fn test_frame_coalescing_matches_spaced_resends() {
    let mut tracker = FrameKeyTracker::new();
    let t0 = Instant::now();
    let frame = Frame::decode([0x00, 0x02, 0x00, 0x00, 0x12, 0x34]);
    let key = frame.composite();

    // Resent every 50ms: only the initial fresh event until 350ms.
    assert!(tracker.on_key(key, t0).is_some());
    for i in 1..7 {
        assert_eq!(tracker.on_key(key, at(t0, 50 * i)), None);
    }
    assert_eq!(
        tracker.on_key(key, at(t0, 350)),
        Some(KeyPress::repeat(KeyId::Code(key)))
    );

    // Gap with no frame after the repeat: exactly one release.
    assert_eq!(
        tracker.on_idle(),
        Some(KeyPress::release(KeyId::Code(key)))
    );
    assert_eq!(tracker.on_idle(), None);
}

#[test]
fn test_dbox_chatter_never_becomes_an_event() {
    let chatter = Frame::decode([0x00, 0x00, 0x00, 0x00, 0x40, 0x00]);
    assert!(chatter.is_dbox_chatter(Some(b'B')));

    // A driver under code 'B' drops the frame before the tracker sees it;
    // the equivalent here is asserting the filter matches, and that the
    // same payload under another code would pass through.
    assert!(!chatter.is_dbox_chatter(Some(b'C')));
}

#[test]
fn test_display_string_round_trip_nibbles() {
    let packed = encode_string("1234", DisplayMode::Numeric);
    let nibbles: Vec<u8> = (0..4).rev().map(|i| ((packed >> (i * 4)) & 0xF) as u8).collect();
    assert_eq!(nibbles, vec![0x1, 0x2, 0x3, 0x4]);
}
