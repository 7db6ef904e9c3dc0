//! Socket driver: consumes the decoder daemon's line protocol.
//!
//! One worker thread reads event lines from the Unix socket, conditions
//! them through [`SocketKeyTracker`], and feeds the key sink.  A broken
//! connection switches the loop into a reconnect cycle that retries every
//! three seconds until the worker is stopped or the daemon is back.

use std::sync::Arc;
use std::time::Instant;

use remote_core::protocol::lirc::{parse_event_line, LINE_BUFFER_SIZE, RECONNECT_INTERVAL};
use remote_core::{KeySink, SocketKeyTracker};
use tracing::{error, info, warn};

use crate::drivers::Remote;
use crate::infrastructure::transport::{Connect, EventConnection, Readiness};
use crate::infrastructure::worker::{CancelToken, Worker};

pub const DRIVER_NAME: &str = "LIRC";

/// Grace granted to the worker on shutdown before it is detached.
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(3);

/// The socket remote-control driver.
pub struct LircRemote {
    worker: Worker,
    ready: bool,
}

impl LircRemote {
    /// Connects and starts the worker.  A failed initial connect leaves
    /// the driver not-ready; the worker is never started and the driver
    /// reports itself unusable.
    pub fn start<C>(mut connector: C, sink: Arc<dyn KeySink>) -> Self
    where
        C: Connect + 'static,
        C::Conn: 'static,
    {
        let mut worker = Worker::new("lirc-remote");

        let token = match CancelToken::new() {
            Ok(t) => t,
            Err(e) => {
                error!("{DRIVER_NAME}: cannot set up cancellation: {e}");
                return Self { worker, ready: false };
            }
        };
        connector.set_wake_fd(token.wake_fd());

        let connection = match connector.connect() {
            Ok(conn) => {
                info!("{DRIVER_NAME}: connected to {}", connector.peer());
                conn
            }
            Err(e) => {
                error!("{DRIVER_NAME}: cannot connect to {}: {e}", connector.peer());
                return Self { worker, ready: false };
            }
        };

        let started = worker.start_with(token, move |tok| {
            run_loop(connection, connector, sink, tok);
        });
        Self { worker, ready: started }
    }

    /// Stops the worker, granting the usual grace period.
    pub fn stop(&mut self) {
        self.worker.cancel(STOP_GRACE);
    }
}

impl Remote for LircRemote {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn ready(&self) -> bool {
        self.ready
    }
}

impl Drop for LircRemote {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<C: Connect>(
    conn: C::Conn,
    mut connector: C,
    sink: Arc<dyn KeySink>,
    token: CancelToken,
) {
    let mut tracker = SocketKeyTracker::new();
    let mut connection = Some(conn);
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = [0u8; LINE_BUFFER_SIZE];

    while token.is_running() {
        let Some(conn) = connection.as_mut() else {
            // Reconnect cycle: sleep first (cancellation-aware), then try.
            if !token.sleep(RECONNECT_INTERVAL) {
                continue;
            }
            match connector.connect() {
                Ok(c) => {
                    info!("{DRIVER_NAME}: reconnected to {}", connector.peer());
                    pending.clear();
                    connection = Some(c);
                }
                Err(_) => {}
            }
            continue;
        };

        match conn.wait_readable(tracker.read_timeout()) {
            Ok(Readiness::Ready) => match conn.read_bytes(&mut buf) {
                Ok(0) => {
                    error!(
                        "{DRIVER_NAME}: connection broken, trying to reconnect every {:?}",
                        RECONNECT_INTERVAL
                    );
                    connection = None;
                }
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    drain_lines(&mut pending, &mut tracker, sink.as_ref());
                }
                Err(e) => {
                    error!("{DRIVER_NAME}: read failed ({e}), reconnecting");
                    connection = None;
                }
            },
            Ok(Readiness::TimedOut) => {
                if let Some(release) = tracker.on_no_data(Instant::now()) {
                    sink.put(release.id, release.repeat, release.release);
                }
            }
            Ok(Readiness::Interrupted) => {
                token.drain_wake();
            }
            Err(e) => {
                error!("{DRIVER_NAME}: poll failed ({e}), reconnecting");
                connection = None;
            }
        }
    }
}

/// Parses every complete line in `pending` and feeds the tracker.
fn drain_lines(pending: &mut Vec<u8>, tracker: &mut SocketKeyTracker, sink: &dyn KeySink) {
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1]);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match parse_event_line(text) {
            Ok(event) => {
                for press in tracker.on_line(&event, Instant::now()) {
                    sink.put(press.id, press.repeat, press.release);
                }
            }
            Err(e) => error!("{DRIVER_NAME}: unparseable event line '{text}': {e}"),
        }
    }
    if pending.len() > LINE_BUFFER_SIZE {
        // A peer that never sends a newline is talking some other
        // protocol; drop the garbage instead of growing forever.
        warn!("{DRIVER_NAME}: discarding {} bytes without line ending", pending.len());
        pending.clear();
    }
}
