//! Serial-line transport for the controller unit.
//!
//! The device is opened read-write, non-blocking, without becoming the
//! controlling terminal, and switched to 9600 baud raw mode — the
//! controller PIC speaks nothing else.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::sys::termios::{cfmakeraw, cfsetspeed, tcgetattr, tcsetattr, BaudRate, SetArg};

use super::{wait_readable, Readiness, SerialLink};

/// Retry window for a non-blocking write that momentarily returns
/// `WouldBlock`; a single byte never takes longer on a sane line.
const WRITE_RETRY: Duration = Duration::from_millis(20);

/// Serial device in 9600-baud raw mode.
pub struct TtySerial {
    file: File,
    wake_fd: Option<RawFd>,
}

impl TtySerial {
    /// Opens and configures the device.
    ///
    /// # Errors
    ///
    /// Any open or termios failure is returned as `io::Error`; the caller
    /// treats it as "driver not ready".
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?;

        let mut attrs = tcgetattr(file.as_fd())?;
        cfmakeraw(&mut attrs);
        cfsetspeed(&mut attrs, BaudRate::B9600)?;
        tcsetattr(file.as_fd(), SetArg::TCSAFLUSH, &attrs)?;

        Ok(Self { file, wake_fd: None })
    }
}

impl SerialLink for TtySerial {
    fn receive_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        match wait_readable(self.file.as_raw_fd(), Some(timeout), self.wake_fd)? {
            Readiness::Ready => {}
            Readiness::TimedOut | Readiness::Interrupted => return Ok(None),
        }
        let mut byte = [0u8; 1];
        match self.file.read(&mut byte) {
            Ok(1) => Ok(Some(byte[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_wake_fd(&mut self, fd: RawFd) {
        self.wake_fd = Some(fd);
    }

    fn send_byte(&mut self, byte: u8) -> io::Result<()> {
        let deadline = Instant::now() + WRITE_RETRY;
        loop {
            match self.file.write(&[byte]) {
                Ok(1) => return Ok(()),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "serial write stalled",
                ));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_fails_for_missing_device() {
        assert!(TtySerial::open("/dev/does-not-exist-ttyS99").is_err());
    }

    #[test]
    fn test_open_fails_for_non_tty_file() {
        // A regular file opens but has no terminal attributes.
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        assert!(TtySerial::open(file.path()).is_err());
    }
}
