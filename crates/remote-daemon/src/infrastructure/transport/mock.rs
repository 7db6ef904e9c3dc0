//! Scripted transport doubles for unit and integration tests.
//!
//! Allows tests to drive the drivers without a decoder daemon or serial
//! hardware: connections follow a step script, the serial double records
//! every written byte and answers with a configurable echo behaviour.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{Connect, EventConnection, Readiness, SerialLink};

/// Pause used when a script runs dry, so a driver polling a silent mock
/// does not spin.
const IDLE_STEP: Duration = Duration::from_millis(5);

// ── Scripted event connection ─────────────────────────────────────────────────

/// One step of a scripted connection.
#[derive(Debug, Clone)]
pub enum ConnStep {
    /// Deliver these bytes on the next read.
    Data(Vec<u8>),
    /// Report one timed-out wait.
    Silence,
    /// Report EOF (peer closed).
    Eof,
}

/// [`EventConnection`] double replaying a fixed step script.
pub struct ScriptedConnection {
    steps: VecDeque<ConnStep>,
}

impl ScriptedConnection {
    pub fn new(steps: impl IntoIterator<Item = ConnStep>) -> Self {
        Self { steps: steps.into_iter().collect() }
    }
}

impl EventConnection for ScriptedConnection {
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        match self.steps.front() {
            Some(ConnStep::Data(_)) | Some(ConnStep::Eof) => Ok(Readiness::Ready),
            Some(ConnStep::Silence) => {
                self.steps.pop_front();
                Ok(Readiness::TimedOut)
            }
            None => {
                // Script exhausted: behave like a quiet line.
                std::thread::sleep(timeout.unwrap_or(IDLE_STEP).min(IDLE_STEP));
                Ok(Readiness::TimedOut)
            }
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            Some(ConnStep::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(ConnStep::Eof) | None => Ok(0),
            Some(step @ ConnStep::Silence) => {
                // Reads only follow a Ready wait; put the step back.
                self.steps.push_front(step);
                Ok(0)
            }
        }
    }
}

/// [`Connect`] double yielding a fixed sequence of connection attempts.
pub struct ScriptedConnector {
    attempts: VecDeque<Result<ScriptedConnection, io::ErrorKind>>,
    connects: Arc<Mutex<usize>>,
}

impl ScriptedConnector {
    pub fn new(attempts: impl IntoIterator<Item = Result<ScriptedConnection, io::ErrorKind>>) -> Self {
        Self {
            attempts: attempts.into_iter().collect(),
            connects: Arc::new(Mutex::new(0)),
        }
    }

    /// Shared counter of connection attempts, for assertions.
    pub fn attempt_counter(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.connects)
    }
}

impl Connect for ScriptedConnector {
    type Conn = ScriptedConnection;

    fn connect(&mut self) -> io::Result<ScriptedConnection> {
        *self
            .connects
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        match self.attempts.pop_front() {
            Some(Ok(conn)) => Ok(conn),
            Some(Err(kind)) => Err(io::Error::from(kind)),
            None => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
        }
    }

    fn peer(&self) -> String {
        "scripted".to_string()
    }
}

// ── Scripted serial link ──────────────────────────────────────────────────────

/// How the serial double answers a written byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    /// Well-behaved peer: every byte is echoed back.
    Echo,
    /// Protocol fault: always answer with this byte instead.
    Wrong(u8),
    /// Dead line: never answer.
    Silent,
}

/// Shared handle the test keeps to feed frames and inspect writes.
#[derive(Clone)]
pub struct SerialScriptHandle {
    rx: Arc<Mutex<VecDeque<u8>>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl SerialScriptHandle {
    /// Queues bytes as if the controller had sent them.
    pub fn feed(&self, bytes: &[u8]) {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        rx.extend(bytes.iter().copied());
    }

    /// Queues a full event frame (sentinel + 6 payload bytes).
    pub fn feed_frame(&self, address: u16, command: u32) {
        let mut bytes = vec![b'X'];
        bytes.extend_from_slice(&address.to_be_bytes());
        bytes.extend_from_slice(&command.to_be_bytes());
        self.feed(&bytes);
    }

    /// Everything the driver has written so far.
    pub fn sent(&self) -> Vec<u8> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True once the driver has drained every queued byte.
    pub fn drained(&self) -> bool {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

/// [`SerialLink`] double with scripted receive bytes and echo behaviour.
pub struct ScriptedSerial {
    rx: Arc<Mutex<VecDeque<u8>>>,
    sent: Arc<Mutex<Vec<u8>>>,
    echo: EchoMode,
}

impl ScriptedSerial {
    pub fn new(echo: EchoMode) -> (Self, SerialScriptHandle) {
        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let handle = SerialScriptHandle { rx: Arc::clone(&rx), sent: Arc::clone(&sent) };
        (Self { rx, sent, echo }, handle)
    }
}

impl SerialLink for ScriptedSerial {
    fn receive_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(byte) = rx.pop_front() {
                    return Ok(Some(byte));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn send_byte(&mut self, byte: u8) -> io::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(byte);
        match self.echo {
            EchoMode::Echo => {
                self.rx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(byte);
            }
            EchoMode::Wrong(answer) => {
                self.rx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_back(answer);
            }
            EchoMode::Silent => {}
        }
        Ok(())
    }
}
