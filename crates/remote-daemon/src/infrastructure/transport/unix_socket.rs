//! Unix-domain socket transport for the line-protocol driver.
//!
//! The decoder daemon listens on a well-known socket path; the driver
//! connects as a plain stream client and reads event lines.  Reconnection
//! policy lives in the driver — this module only supplies connections.

use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{wait_readable, Connect, EventConnection, Readiness};

/// Connects to the event socket at a fixed path.
///
/// The optional wake descriptor (the owning worker's cancellation pipe)
/// is attached to every produced connection; it must outlive the
/// connector, which holds for the driver's worker that owns both.
pub struct UnixConnector {
    path: PathBuf,
    wake_fd: Option<RawFd>,
}

impl UnixConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), wake_fd: None }
    }
}

impl Connect for UnixConnector {
    type Conn = UnixSocketConnection;

    fn connect(&mut self) -> io::Result<UnixSocketConnection> {
        let stream = UnixStream::connect(&self.path)?;
        Ok(UnixSocketConnection { stream, wake_fd: self.wake_fd })
    }

    fn peer(&self) -> String {
        self.path.display().to_string()
    }

    fn set_wake_fd(&mut self, fd: RawFd) {
        self.wake_fd = Some(fd);
    }
}

/// One established event-socket connection.
pub struct UnixSocketConnection {
    stream: UnixStream,
    wake_fd: Option<RawFd>,
}

impl EventConnection for UnixSocketConnection {
    fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        wait_readable(self.stream.as_raw_fd(), timeout, self.wake_fd)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixListener;

    #[test]
    fn test_connect_fails_for_missing_socket() {
        let mut connector = UnixConnector::new("/nonexistent/lircd-test-socket");
        assert!(connector.connect().is_err());
    }

    #[test]
    fn test_peer_reports_the_path() {
        let connector = UnixConnector::new("/var/run/lirc/lircd");
        assert_eq!(connector.peer(), "/var/run/lirc/lircd");
    }

    #[test]
    fn test_read_line_through_live_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("eventsock");
        let listener = UnixListener::bind(&path).expect("bind");

        let server = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().expect("accept");
            peer.write_all(b"0 0 KEY_OK remote\n").expect("write");
        });

        let mut connector = UnixConnector::new(&path);
        let mut conn = connector.connect().expect("connect");

        let ready = conn
            .wait_readable(Some(Duration::from_millis(2000)))
            .expect("poll");
        assert_eq!(ready, Readiness::Ready);

        let mut buf = [0u8; 64];
        let n = conn.read_bytes(&mut buf).expect("read");
        assert_eq!(&buf[..n], b"0 0 KEY_OK remote\n");
        server.join().unwrap();
    }

    #[test]
    fn test_eof_reads_as_zero_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("eventsock");
        let listener = UnixListener::bind(&path).expect("bind");

        let server = std::thread::spawn(move || {
            let (peer, _) = listener.accept().expect("accept");
            drop(peer); // immediate close
        });

        let mut connector = UnixConnector::new(&path);
        let mut conn = connector.connect().expect("connect");
        server.join().unwrap();

        let ready = conn
            .wait_readable(Some(Duration::from_millis(2000)))
            .expect("poll");
        assert_eq!(ready, Readiness::Ready);
        assert_eq!(conn.read_bytes(&mut [0u8; 16]).expect("read"), 0);
    }
}
