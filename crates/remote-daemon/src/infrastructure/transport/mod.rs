//! Byte transports for the two remote-control drivers.
//!
//! The drivers only ever see the traits defined here, so the integration
//! tests can substitute scripted doubles (see [`mock`]) the same way the
//! real daemon plugs in the Unix-socket and tty implementations.

use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

pub mod mock;
pub mod tty;
pub mod unix_socket;

/// Outcome of waiting for a descriptor to become readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Data (or EOF) is available.
    Ready,
    /// The timeout elapsed with nothing to read.
    TimedOut,
    /// A wake-up fired (cancellation pipe or EINTR); re-check the run flag.
    Interrupted,
}

/// Poll `fd` for readability, optionally watching a wake-up descriptor at
/// the same time so a blocked wait can be interrupted from outside.
///
/// `timeout` of `None` waits indefinitely — which is exactly why the wake
/// descriptor exists.
pub fn wait_readable(
    fd: RawFd,
    timeout: Option<Duration>,
    wake_fd: Option<RawFd>,
) -> io::Result<Readiness> {
    // SAFETY: callers own the descriptors for the duration of the call.
    let main = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = Vec::with_capacity(2);
    fds.push(PollFd::new(main, PollFlags::POLLIN));
    let wake = wake_fd.map(|w| unsafe { BorrowedFd::borrow_raw(w) });
    if let Some(w) = wake {
        fds.push(PollFd::new(w, PollFlags::POLLIN));
    }

    let poll_timeout = match timeout {
        None => PollTimeout::NONE,
        Some(d) => {
            let ms = d.as_millis().min(u128::from(u16::MAX)) as u16;
            PollTimeout::from(ms)
        }
    };

    match poll(&mut fds, poll_timeout) {
        Ok(0) => Ok(Readiness::TimedOut),
        Ok(_) => {
            if fds.len() > 1
                && fds[1]
                    .revents()
                    .is_some_and(|r| r.intersects(PollFlags::POLLIN))
            {
                return Ok(Readiness::Interrupted);
            }
            if fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
            {
                return Ok(Readiness::Ready);
            }
            Ok(Readiness::TimedOut)
        }
        Err(nix::errno::Errno::EINTR) => Ok(Readiness::Interrupted),
        Err(e) => Err(io::Error::from(e)),
    }
}

/// Connection carrying the line-oriented event protocol.
pub trait EventConnection: Send {
    /// Waits for data; `None` timeout blocks until data or a wake-up.
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<Readiness>;

    /// Reads available bytes.  Returning `Ok(0)` means the peer closed
    /// the connection.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Factory producing [`EventConnection`]s, so the reconnect loop is
/// testable without a live daemon socket.
pub trait Connect: Send {
    type Conn: EventConnection;

    fn connect(&mut self) -> io::Result<Self::Conn>;

    /// Peer description for log messages.
    fn peer(&self) -> String;

    /// Attaches a wake-up descriptor that subsequently produced
    /// connections poll alongside their own, so cancellation interrupts
    /// an indefinite wait.  The descriptor must outlive the connector;
    /// doubles that never block may ignore it.
    fn set_wake_fd(&mut self, _fd: RawFd) {}
}

/// Byte-at-a-time serial line with the controller peer.
pub trait SerialLink: Send {
    /// Returns one byte if it arrives within `timeout`, `None` otherwise.
    fn receive_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>>;

    /// Writes one byte to the peer.
    fn send_byte(&mut self, byte: u8) -> io::Result<()>;

    /// Same contract as [`Connect::set_wake_fd`].
    fn set_wake_fd(&mut self, _fd: RawFd) {}
}
