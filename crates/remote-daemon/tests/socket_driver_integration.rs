//! Integration tests for the socket driver: scripted connections in,
//! normalized key events out.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use remote_core::{KeyId, KeySink};
use remote_daemon::drivers::socket::LircRemote;
use remote_daemon::drivers::Remote;
use remote_daemon::infrastructure::transport::mock::{
    ConnStep, ScriptedConnection, ScriptedConnector,
};

struct CollectingSink {
    events: Mutex<Vec<(KeyId, bool, bool)>>,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }

    fn events(&self) -> Vec<(KeyId, bool, bool)> {
        self.events.lock().unwrap().clone()
    }
}

impl KeySink for CollectingSink {
    fn put(&self, id: KeyId, repeat: bool, release: bool) {
        self.events.lock().unwrap().push((id, repeat, release));
    }
}

fn wait_for<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn test_event_line_becomes_fresh_key_event() {
    let connector = ScriptedConnector::new([Ok(ScriptedConnection::new([ConnStep::Data(
        b"00000000000017f5 00 KEY_OK remote\n".to_vec(),
    )]))]);
    let sink = CollectingSink::new();
    let mut driver = LircRemote::start(connector, Arc::clone(&sink) as _);

    assert!(driver.ready());
    assert!(wait_for(|| !sink.events().is_empty(), Duration::from_secs(2)));
    assert_eq!(
        sink.events()[0],
        (KeyId::name("KEY_OK"), false, false)
    );
    driver.stop();
}

#[test]
fn test_malformed_line_is_skipped_without_losing_later_events() {
    let connector = ScriptedConnector::new([Ok(ScriptedConnection::new([
        ConnStep::Data(b"not a valid line\n".to_vec()),
        ConnStep::Data(b"1a 00 KEY_MENU\n".to_vec()),
    ]))]);
    let sink = CollectingSink::new();
    let mut driver = LircRemote::start(connector, Arc::clone(&sink) as _);

    assert!(wait_for(|| !sink.events().is_empty(), Duration::from_secs(2)));
    let events = sink.events();
    assert_eq!(events.len(), 1, "the malformed line must not produce events");
    assert_eq!(events[0].0, KeyId::name("KEY_MENU"));
    driver.stop();
}

#[test]
fn test_split_line_across_reads_is_reassembled() {
    let connector = ScriptedConnector::new([Ok(ScriptedConnection::new([
        ConnStep::Data(b"1a 00 KEY".to_vec()),
        ConnStep::Data(b"_UP\n".to_vec()),
    ]))]);
    let sink = CollectingSink::new();
    let mut driver = LircRemote::start(connector, Arc::clone(&sink) as _);

    assert!(wait_for(|| !sink.events().is_empty(), Duration::from_secs(2)));
    assert_eq!(sink.events()[0].0, KeyId::name("KEY_UP"));
    driver.stop();
}

#[test]
fn test_failed_initial_connect_leaves_driver_not_ready() {
    let connector = ScriptedConnector::new([Err(std::io::ErrorKind::ConnectionRefused)]);
    let attempts = connector.attempt_counter();
    let sink = CollectingSink::new();
    let driver = LircRemote::start(connector, Arc::clone(&sink) as _);

    assert!(!driver.ready());
    assert_eq!(driver.name(), "LIRC");
    assert_eq!(*attempts.lock().unwrap(), 1, "no retry without a worker");
    // No worker was started, so no events can ever arrive.
    std::thread::sleep(Duration::from_millis(50));
    assert!(sink.events().is_empty());
}

#[test]
fn test_eof_triggers_reconnect_and_resumes_events() {
    let connector = ScriptedConnector::new([
        Ok(ScriptedConnection::new([
            ConnStep::Data(b"0 0 KEY_OK\n".to_vec()),
            ConnStep::Eof,
        ])),
        Ok(ScriptedConnection::new([ConnStep::Data(
            b"0 0 KEY_MENU\n".to_vec(),
        )])),
    ]);
    let attempts = connector.attempt_counter();
    let sink = CollectingSink::new();
    let mut driver = LircRemote::start(connector, Arc::clone(&sink) as _);

    // The reconnect cycle waits its full 3s interval before retrying.
    assert!(wait_for(
        || sink.events().len() >= 2,
        Duration::from_secs(8)
    ));
    let events = sink.events();
    assert_eq!(events[0].0, KeyId::name("KEY_OK"));
    assert_eq!(events[1].0, KeyId::name("KEY_MENU"));
    assert_eq!(*attempts.lock().unwrap(), 2);
    driver.stop();
}

#[test]
fn test_stop_interrupts_the_reconnect_wait() {
    // One connection that immediately EOFs puts the worker into its 3s
    // reconnect sleep; stop() must not wait that long.
    let connector = ScriptedConnector::new([Ok(ScriptedConnection::new([ConnStep::Eof]))]);
    let sink = CollectingSink::new();
    let mut driver = LircRemote::start(connector, Arc::clone(&sink) as _);

    std::thread::sleep(Duration::from_millis(100)); // let it reach the sleep
    let start = Instant::now();
    driver.stop();
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "cancellation must interrupt the reconnect sleep"
    );
}
