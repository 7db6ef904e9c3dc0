//! Serial driver: speaks the controller unit's byte protocol.
//!
//! The controller is chatty in both directions: it reports keypresses as
//! 6-byte frames and expects every byte we send to be acknowledged by an
//! identical echo.  All outgoing traffic — digits, numbers, strings, the
//! access code — goes through the same handshake, and everything runs
//! under one re-entrant driver lock so the worker's receive loop and
//! external display updates can never interleave bytes on the line.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use remote_core::protocol::display::{
    command_byte, encode_number, encode_string, pack_digit, DisplayMode,
};
use remote_core::protocol::frame::{
    Frame, BYTE_TIMEOUT, CODE_REFRESH, FRAME_LEN, FRAME_SENTINEL, REPEAT_CONFIRM, SEND_RETRIES,
};
use remote_core::{FrameKeyTracker, KeySink};
use tracing::{debug, error, info};

use crate::drivers::{DeviceStatusListener, Remote};
use crate::infrastructure::storage::setup::SetupStore;
use crate::infrastructure::sync::{ReentrantMutex, ReentrantMutexGuard};
use crate::infrastructure::transport::SerialLink;
use crate::infrastructure::worker::{CancelToken, Worker};

pub const DRIVER_NAME: &str = "RCU";

/// Grace granted to the worker on shutdown before it is detached.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// Unlocked pause between worker iterations.  The loop holds the driver
/// lock for its whole 20ms byte poll; without this window a display call
/// from another thread could starve waiting for the lock.
const LOCK_YIELD: Duration = Duration::from_millis(1);

/// Shared driver state; every mutation happens under the driver lock.
struct RcuState<S: SerialLink> {
    port: S,
    code: Option<u8>,
    mode: DisplayMode,
    points: u8,
    last_number: u16,
    number_to_send: Option<u16>,
    received_command: bool,
}

type Shared<S> = Arc<ReentrantMutex<RefCell<RcuState<S>>>>;
type StateGuard<'a, S> = ReentrantMutexGuard<'a, RefCell<RcuState<S>>>;

/// One step of the access-code negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    /// The peer answered under the candidate code; it is now active.
    Confirmed,
    /// Nothing heard; `candidate` has been advanced, call again.
    TryNext,
    /// All codes tried without an answer; candidate reset to none.
    Exhausted,
}

/// The serial remote-control driver.
pub struct RcuRemote<S: SerialLink + 'static> {
    state: Shared<S>,
    worker: Worker,
    setup: Arc<dyn SetupStore>,
    ready: bool,
}

impl<S: SerialLink + 'static> RcuRemote<S> {
    /// Takes ownership of an opened serial port, performs the startup
    /// display, applies a stored access code, and starts the worker.
    pub fn start(mut port: S, sink: Arc<dyn KeySink>, setup: Arc<dyn SetupStore>) -> Self {
        let token = CancelToken::new();
        if let Ok(t) = &token {
            port.set_wake_fd(t.wake_fd());
        }

        let state: Shared<S> = Arc::new(ReentrantMutex::new(RefCell::new(RcuState {
            port,
            code: None,
            mode: DisplayMode::Numeric,
            points: 0,
            last_number: 0,
            number_to_send: None,
            received_command: false,
        })));

        let mut remote = Self {
            state: Arc::clone(&state),
            worker: Worker::new("rcu-remote"),
            setup: Arc::clone(&setup),
            ready: false,
        };

        let token = match token {
            Ok(t) => t,
            Err(e) => {
                error!("{DRIVER_NAME}: cannot set up cancellation: {e}");
                return remote;
            }
        };

        // Settle the display before the worker competes for the line.
        remote.set_number(0);
        if let Some(stored) = setup.get_setup(DRIVER_NAME) {
            if let Some(code) = stored.bytes().next() {
                info!(
                    "{DRIVER_NAME}: connecting to remote control using code {}",
                    code as char
                );
                remote.set_code(code);
            }
        }

        remote.ready = remote
            .worker
            .start_with(token, move |tok| run_loop(state, sink, tok));
        remote
    }

    /// True once the stored or negotiated access code is active.
    pub fn has_code(&self) -> bool {
        self.state.lock().borrow().code.is_some()
    }

    /// Sends one byte through the echo handshake.
    pub fn send_byte(&self, byte: u8) -> bool {
        let guard = self.state.lock();
        send_byte_locked(&guard, byte)
    }

    /// Activates `code` on the peer and remembers it for the resync.
    pub fn set_code(&self, code: u8) -> bool {
        let guard = self.state.lock();
        guard.borrow_mut().code = Some(code);
        send_command_locked(&guard, code)
    }

    /// Switches the display mode and commits it.
    pub fn set_mode(&self, mode: DisplayMode) -> bool {
        let guard = self.state.lock();
        guard.borrow_mut().mode = mode;
        send_command_locked(&guard, mode.value())
    }

    /// Writes one digit position.
    pub fn set_digit(&self, position: u8, value: u8) -> bool {
        let guard = self.state.lock();
        set_digit_locked(&guard, position, value)
    }

    /// Shows a decimal number, right-aligned with blank padding.
    pub fn set_number(&self, n: u16) -> bool {
        let guard = self.state.lock();
        display_number_locked(&guard, encode_number(n))
    }

    /// Shows a pre-packed nibble value verbatim.
    pub fn set_number_raw(&self, packed: u16) -> bool {
        let guard = self.state.lock();
        display_number_locked(&guard, packed)
    }

    /// Maps up to four characters through the current mode's character
    /// set and shows them.
    pub fn set_string(&self, s: &str) -> bool {
        let guard = self.state.lock();
        let mode = guard.borrow().mode;
        display_number_locked(&guard, encode_string(s, mode))
    }

    /// Switches decimal points on or off and re-renders the display.
    pub fn set_points(&self, mask: u8, on: bool) -> bool {
        let guard = self.state.lock();
        {
            let mut st = guard.borrow_mut();
            if on {
                st.points |= mask;
            } else {
                st.points &= !mask;
            }
        }
        let last = guard.borrow().last_number;
        display_number_locked(&guard, last)
    }

    /// One step of the code negotiation.
    ///
    /// Start with `candidate = None` and keep calling while `TryNext` is
    /// returned.  Each probing step shows `C0D<letter>` in hex mode, sets
    /// the candidate code, and listens for roughly twice the repeat
    /// window; an event frame in that window confirms the code.
    pub fn detect_code(&self, candidate: &mut Option<u8>) -> DetectOutcome {
        let code = match *candidate {
            Some(c) if (b'A'..=b'D').contains(&c) => c,
            _ => {
                *candidate = Some(b'A');
                return DetectOutcome::TryNext;
            }
        };

        self.set_mode(DisplayMode::Hex);
        self.set_string(&format!("C0D{}", code as char));
        self.set_code(code);
        self.state.lock().borrow_mut().received_command = false;

        // Listen without holding the lock: the worker needs it to
        // receive whatever the remote sends under the candidate code.
        std::thread::sleep(2 * REPEAT_CONFIRM);

        if self.state.lock().borrow().received_command {
            self.set_mode(DisplayMode::Numeric);
            self.set_string("----");
            return DetectOutcome::Confirmed;
        }

        if code < b'D' {
            *candidate = Some(code + 1);
            DetectOutcome::TryNext
        } else {
            // Nothing answered on any code: back to the codeless state so
            // the caller may restart the whole negotiation or give up.
            *candidate = None;
            self.state.lock().borrow_mut().code = None;
            DetectOutcome::Exhausted
        }
    }

    /// Runs one full negotiation round over codes `'A'..='D'` and
    /// persists a confirmed code for the next start.
    pub fn initialize(&self) -> bool {
        if !self.ready {
            return false;
        }
        info!("trying codes for {DRIVER_NAME} remote control...");
        let mut candidate = None;
        loop {
            match self.detect_code(&mut candidate) {
                DetectOutcome::Confirmed => {
                    let code = self.state.lock().borrow().code;
                    if let Some(code) = code {
                        info!(
                            "{DRIVER_NAME}: established connection using code {}",
                            code as char
                        );
                        self.setup.put_setup(DRIVER_NAME, &(code as char).to_string());
                    }
                    return true;
                }
                DetectOutcome::TryNext => {
                    if let Some(c) = candidate {
                        debug!("{DRIVER_NAME}: trying code {}", c as char);
                    }
                }
                DetectOutcome::Exhausted => {
                    error!("{DRIVER_NAME}: no access code answered");
                    return false;
                }
            }
        }
    }

    /// Stops the worker, granting the usual grace period.
    pub fn stop(&mut self) {
        self.worker.cancel(STOP_GRACE);
    }
}

impl<S: SerialLink + 'static> Remote for RcuRemote<S> {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn ready(&self) -> bool {
        self.ready
    }
}

impl<S: SerialLink + 'static> DeviceStatusListener for RcuRemote<S> {
    fn channel_switch(&self, device_is_primary: bool, channel_number: u16) {
        if device_is_primary && channel_number != 0 {
            let guard = self.state.lock();
            guard.borrow_mut().number_to_send = Some(channel_number);
        }
    }

    fn recording_state(&self, device_index: u8, receiving: bool) {
        self.set_points(1u8 << (device_index & 0x03), receiving);
    }
}

impl<S: SerialLink + 'static> Drop for RcuRemote<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Worker loop ───────────────────────────────────────────────────────────────

fn run_loop<S: SerialLink>(state: Shared<S>, sink: Arc<dyn KeySink>, token: CancelToken) {
    let mut tracker = FrameKeyTracker::new();
    let mut last_refresh = Instant::now();

    while token.is_running() {
        let guard = state.lock();

        let first = guard.borrow_mut().port.receive_byte(BYTE_TIMEOUT);
        match first {
            Ok(Some(FRAME_SENTINEL)) => {
                if let Some(payload) = read_frame_payload(&guard) {
                    let frame = Frame::decode(payload);
                    let code = guard.borrow().code;
                    if frame.is_dbox_chatter(code) {
                        debug!("{DRIVER_NAME}: dropping d-box chatter frame");
                    } else if let Some(press) = tracker.on_key(frame.composite(), Instant::now())
                    {
                        guard.borrow_mut().received_command = true;
                        sink.put(press.id, press.repeat, press.release);
                    }
                }
            }
            Ok(Some(stray)) => {
                debug!("{DRIVER_NAME}: stray byte {stray:#04X} outside handshake");
            }
            Ok(None) => {
                if let Some(release) = tracker.on_idle() {
                    sink.put(release.id, release.repeat, release.release);
                } else {
                    let pending = guard.borrow_mut().number_to_send.take();
                    if let Some(n) = pending {
                        display_number_locked(&guard, encode_number(n));
                    }
                }
            }
            Err(e) => {
                error!("{DRIVER_NAME}: serial read failed: {e}");
                drop(guard);
                token.sleep(BYTE_TIMEOUT);
                continue;
            }
        }

        // The peer occasionally drops back to its default code; resend
        // ours once a minute to pull it back.
        let code = guard.borrow().code;
        if let Some(code) = code {
            if last_refresh.elapsed() > CODE_REFRESH {
                send_command_locked(&guard, code);
                last_refresh = Instant::now();
            }
        }

        drop(guard);
        std::thread::sleep(LOCK_YIELD);
    }
}

/// Reads the 6 payload bytes following a sentinel.
fn read_frame_payload<S: SerialLink>(guard: &StateGuard<'_, S>) -> Option<[u8; FRAME_LEN]> {
    let mut st = guard.borrow_mut();
    let mut payload = [0u8; FRAME_LEN];
    for slot in payload.iter_mut() {
        match st.port.receive_byte(BYTE_TIMEOUT) {
            Ok(Some(b)) => *slot = b,
            Ok(None) => return None,
            Err(e) => {
                error!("{DRIVER_NAME}: frame read failed: {e}");
                return None;
            }
        }
    }
    Some(payload)
}

// ── Locked send helpers ───────────────────────────────────────────────────────
//
// All of these require the driver lock to be held (witnessed by the
// guard) and take care to drop any RefCell borrow before calling back
// into another helper.

fn send_byte_locked<S: SerialLink>(guard: &StateGuard<'_, S>, byte: u8) -> bool {
    for _ in 0..SEND_RETRIES {
        if handshake_once(guard, byte) {
            return true;
        }
    }
    error!("{DRIVER_NAME}: no echo for byte {byte:#04X} after {SEND_RETRIES} attempts");
    false
}

fn handshake_once<S: SerialLink>(guard: &StateGuard<'_, S>, byte: u8) -> bool {
    let mut st = guard.borrow_mut();
    if let Err(e) = st.port.send_byte(byte) {
        error!("{DRIVER_NAME}: serial write failed: {e}");
        return false;
    }
    loop {
        match st.port.receive_byte(BYTE_TIMEOUT) {
            Ok(Some(reply)) if reply == byte => return true,
            Ok(Some(FRAME_SENTINEL)) => {
                // An event frame beat the echo; skip it, it will come again.
                for _ in 0..FRAME_LEN {
                    match st.port.receive_byte(BYTE_TIMEOUT) {
                        Ok(Some(_)) => {}
                        _ => return false,
                    }
                }
            }
            Ok(Some(_)) | Ok(None) => return false,
            Err(e) => {
                error!("{DRIVER_NAME}: handshake read failed: {e}");
                return false;
            }
        }
    }
}

fn send_command_locked<S: SerialLink>(guard: &StateGuard<'_, S>, value: u8) -> bool {
    send_byte_locked(guard, command_byte(value))
}

fn set_digit_locked<S: SerialLink>(guard: &StateGuard<'_, S>, position: u8, value: u8) -> bool {
    let points = guard.borrow().points;
    send_byte_locked(guard, pack_digit(position, value, points))
}

/// Writes all four digits of a packed nibble value, then commits with
/// the current display mode.
fn display_number_locked<S: SerialLink>(guard: &StateGuard<'_, S>, packed: u16) -> bool {
    guard.borrow_mut().last_number = packed;
    let mut n = packed;
    for position in 0..4 {
        if !set_digit_locked(guard, position, (n & 0x0F) as u8) {
            return false;
        }
        n >>= 4;
    }
    let mode = guard.borrow().mode;
    send_command_locked(guard, mode.value())
}
