//! Worker-thread lifecycle: start, liveness, cooperative cancellation.
//!
//! Each driver owns one [`Worker`] running its blocking read loop.  The
//! worker publishes its own liveness through an atomic flag (cleared on
//! any exit path, panics included), and cancellation is a shared token
//! paired with a self-pipe so a worker blocked in `poll(2)` wakes up
//! immediately instead of after its next timeout.

use std::io;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::transport::{wait_readable, Readiness};

/// Poll interval while waiting for a cancelled worker to exit.
const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Settle time after spawning, so a caller probing liveness right after
/// `start` does not race the scheduler.
const START_SETTLE: Duration = Duration::from_millis(10);

// ── WakePipe ──────────────────────────────────────────────────────────────────

/// Self-pipe wake-up primitive.
///
/// `wake` writes one byte into a non-blocking socketpair; the read end is
/// handed to `poll(2)` alongside a transport descriptor, so any blocking
/// wait in this subsystem can be interrupted from another thread.
pub struct WakePipe {
    rx: Mutex<UnixStream>,
    tx: Mutex<UnixStream>,
    raw_rx: RawFd,
}

impl WakePipe {
    pub fn new() -> io::Result<Self> {
        let (rx, tx) = UnixStream::pair()?;
        rx.set_nonblocking(true)?;
        tx.set_nonblocking(true)?;
        let raw_rx = rx.as_raw_fd();
        Ok(Self { rx: Mutex::new(rx), tx: Mutex::new(tx), raw_rx })
    }

    /// Makes any poll on [`read_fd`](Self::read_fd) return.  A full pipe
    /// already counts as woken, so the write error is ignored.
    pub fn wake(&self) {
        let mut tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = tx.write(&[1u8]);
    }

    /// Consumes pending wake bytes so the next poll blocks again.
    pub fn drain(&self) {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buf = [0u8; 16];
        while matches!(rx.read(&mut buf), Ok(n) if n > 0) {}
    }

    /// Raw descriptor for the read end, valid for the pipe's lifetime.
    pub fn read_fd(&self) -> RawFd {
        self.raw_rx
    }
}

// ── CancelToken ───────────────────────────────────────────────────────────────

struct TokenInner {
    running: AtomicBool,
    wake: WakePipe,
}

/// Cooperative cancellation token shared between a [`Worker`] and its
/// loop body.  Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(TokenInner {
                running: AtomicBool::new(true),
                wake: WakePipe::new()?,
            }),
        })
    }

    /// Requested state: `true` until [`stop`](Self::stop) is called.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    /// Clears the run flag and wakes any blocked wait.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Relaxed);
        self.inner.wake.wake();
    }

    /// Interrupts a blocked wait without stopping the worker.
    pub fn wake(&self) {
        self.inner.wake.wake();
    }

    /// Descriptor transports poll alongside their own, so cancellation
    /// interrupts even an indefinite wait.
    pub fn wake_fd(&self) -> RawFd {
        self.inner.wake.read_fd()
    }

    /// Clears pending wake-ups after an interrupted wait, so the next
    /// poll blocks again.
    pub fn drain_wake(&self) {
        self.inner.wake.drain();
    }

    /// Cancellation-aware sleep.  Returns `true` if the full duration
    /// elapsed, `false` when stopped or woken early.
    pub fn sleep(&self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        match wait_readable(self.inner.wake.read_fd(), Some(duration), None) {
            Ok(Readiness::TimedOut) => true,
            Ok(_) => {
                self.inner.wake.drain();
                false
            }
            Err(_) => false,
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

/// Clears the liveness flag on every exit path of the worker body.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One worker thread with cooperative shutdown.
///
/// Lifecycle: `start` spawns the named thread and hands the body a
/// [`CancelToken`]; the body is expected to check `is_running` at the top
/// of its loop and to route blocking waits through the token's wake
/// descriptor.  `cancel` requests the stop, grants a bounded grace
/// period, then either reaps the thread or detaches it with an error —
/// shutdown always completes and repeating it is harmless.
pub struct Worker {
    name: &'static str,
    token: Option<CancelToken>,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    on_wake: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Worker {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: None,
            alive: Arc::new(AtomicBool::new(false)),
            handle: None,
            on_wake: None,
        }
    }

    /// Registers the creator's wake callback, fired by
    /// [`wake_parent`](Self::wake_parent) to interrupt a blocking wait in
    /// the context that owns this worker (typically the key-queue drain).
    pub fn wake_with(&mut self, f: impl Fn() + Send + Sync + 'static) {
        self.on_wake = Some(Arc::new(f));
    }

    /// Spawns the worker thread.  No-op returning `true` when already
    /// running; returns `false` only if the thread could not be created.
    pub fn start<F>(&mut self, body: F) -> bool
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let token = match CancelToken::new() {
            Ok(t) => t,
            Err(e) => {
                error!("cannot create cancel token for '{}': {e}", self.name);
                return false;
            }
        };
        self.start_with(token, body)
    }

    /// Like [`start`](Self::start) but with a caller-created token, for
    /// drivers that wire the token's wake descriptor into their transport
    /// before the worker exists.
    pub fn start_with<F>(&mut self, token: CancelToken, body: F) -> bool
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        if self.is_active() {
            return true;
        }

        self.alive.store(true, Ordering::Release);
        let alive = Arc::clone(&self.alive);
        let worker_token = token.clone();
        let name = self.name;

        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = AliveGuard(alive);
                debug!("worker '{name}' started");
                body(worker_token);
                debug!("worker '{name}' ended");
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.alive.store(false, Ordering::Release);
                error!("failed to spawn worker '{}': {e}", self.name);
                return false;
            }
        };

        request_round_robin(&handle, self.name);
        self.token = Some(token);
        self.handle = Some(handle);

        std::thread::sleep(START_SETTLE);
        true
    }

    /// Requested state: `true` between `start` and `cancel`.
    pub fn is_running(&self) -> bool {
        self.token.as_ref().is_some_and(CancelToken::is_running)
    }

    /// Actual state, as published by the worker itself.
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Token handed to the current worker body, while one is running.
    pub fn token(&self) -> Option<&CancelToken> {
        self.token.as_ref()
    }

    /// Requests the stop, waits up to `grace` in 10ms steps, then reaps
    /// the worker — or detaches it with an error if it refuses to die.
    pub fn cancel(&mut self, grace: Duration) {
        if let Some(token) = self.token.take() {
            token.stop();
        }

        if !grace.is_zero() {
            let deadline = Instant::now() + grace;
            while self.is_active() && Instant::now() < deadline {
                std::thread::sleep(CANCEL_POLL);
            }
        }

        if self.is_active() {
            error!(
                "worker '{}' won't end (waited {:?}) - detaching it",
                self.name, grace
            );
            // Detached: the thread keeps its stopped token and exits on
            // its own; nothing may block shutdown on it.
            self.handle.take();
        } else if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("worker '{}' panicked", self.name);
            }
        }
    }

    /// Fires the wake callback registered by the creating context.
    pub fn wake_parent(&self) {
        if let Some(f) = &self.on_wake {
            f();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel(Duration::ZERO);
    }
}

/// Best-effort round-robin scheduling hint for a freshly spawned worker.
#[cfg(unix)]
fn request_round_robin(handle: &JoinHandle<()>, name: &str) {
    use std::os::unix::thread::JoinHandleExt;

    let param = libc::sched_param { sched_priority: 1 };
    let rc = unsafe { libc::pthread_setschedparam(handle.as_pthread_t(), libc::SCHED_RR, &param) };
    if rc != 0 {
        debug!("SCHED_RR not granted for '{name}' (rc={rc})");
    }
}

#[cfg(not(unix))]
fn request_round_robin(_handle: &JoinHandle<()>, _name: &str) {}

// ── Emergency exit ────────────────────────────────────────────────────────────

static EMERGENCY_EXIT: AtomicBool = AtomicBool::new(false);
static EMERGENCY_LOG: Once = Once::new();

/// Process-wide emergency-exit flag.
///
/// Querying (`request == false`) returns the current state.  Requesting
/// sets the flag permanently for the life of the process and logs once;
/// acting on it is the surrounding application's business.
pub fn emergency_exit(request: bool) -> bool {
    if !request {
        return EMERGENCY_EXIT.load(Ordering::Relaxed);
    }
    EMERGENCY_LOG.call_once(|| info!("emergency exit requested"));
    EMERGENCY_EXIT.store(true, Ordering::Relaxed);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wake_pipe_round_trip() {
        let pipe = WakePipe::new().expect("pipe");
        pipe.wake();
        let ready = wait_readable(pipe.read_fd(), Some(Duration::from_millis(200)), None).unwrap();
        assert_eq!(ready, Readiness::Ready);

        pipe.drain();
        let ready = wait_readable(pipe.read_fd(), Some(Duration::from_millis(20)), None).unwrap();
        assert_eq!(ready, Readiness::TimedOut);
    }

    #[test]
    fn test_token_sleep_completes_when_undisturbed() {
        let token = CancelToken::new().expect("token");
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_token_stop_interrupts_sleep() {
        let token = CancelToken::new().expect("token");
        let sleeper = token.clone();
        let handle = std::thread::spawn(move || {
            let start = Instant::now();
            let completed = sleeper.sleep(Duration::from_secs(5));
            (completed, start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(30));
        token.stop();

        let (completed, elapsed) = handle.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
        assert!(!token.is_running());
    }

    #[test]
    fn test_worker_start_and_cancel() {
        let mut worker = Worker::new("test-loop");
        assert!(!worker.is_active());

        worker.start(|token| {
            while token.is_running() {
                token.sleep(Duration::from_millis(10));
            }
        });
        assert!(worker.is_active());
        assert!(worker.is_running());

        worker.cancel(Duration::from_secs(2));
        assert!(!worker.is_active());
        assert!(!worker.is_running());
    }

    #[test]
    fn test_worker_start_is_idempotent_while_running() {
        let mut worker = Worker::new("test-idempotent");
        worker.start(|token| {
            while token.is_running() {
                token.sleep(Duration::from_millis(10));
            }
        });

        // A second start must not replace the running body.
        let started_again = worker.start(|_| panic!("second body must not run"));
        assert!(started_again);

        worker.cancel(Duration::from_secs(2));
    }

    #[test]
    fn test_worker_liveness_clears_after_natural_exit() {
        let mut worker = Worker::new("test-short");
        worker.start(|_| {});

        let deadline = Instant::now() + Duration::from_secs(2);
        while worker.is_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!worker.is_active());

        // Cancel after natural death is harmless.
        worker.cancel(Duration::from_millis(100));
    }

    #[test]
    fn test_worker_liveness_clears_after_panic() {
        let mut worker = Worker::new("test-panic");
        worker.start(|_| panic!("deliberate"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while worker.is_active() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!worker.is_active(), "alive flag must clear on panic");
        worker.cancel(Duration::ZERO);
    }

    #[test]
    fn test_wake_parent_fires_registered_callback() {
        let fired = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&fired);

        let mut worker = Worker::new("test-wake");
        worker.wake_with(move || observed.store(true, Ordering::Relaxed));
        worker.wake_parent();

        assert!(fired.load(Ordering::Relaxed));
    }

    #[test]
    fn test_emergency_exit_latches() {
        assert!(emergency_exit(true));
        assert!(emergency_exit(false), "flag must stay set once requested");
        assert!(emergency_exit(true));
    }
}
