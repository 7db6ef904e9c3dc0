//! Subprocess plumbing: a unidirectional command pipe and a synchronous
//! run-to-completion helper.
//!
//! Both run their command through `/bin/sh -c`, the same contract the
//! rest of the platform's recording hooks expect.  Descriptor hygiene
//! (close-on-exec on everything beyond the standard three) comes with the
//! standard library's spawn path.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::{error, warn};

/// Attempts before a lingering child is force-killed on close.
const REAP_ATTEMPTS: u32 = 5;

/// Pause between reap attempts.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

/// Which way bytes flow through the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeDirection {
    /// Parent reads the child's stdout.
    ReadFromChild,
    /// Parent writes the child's stdin.
    WriteToChild,
}

enum PipeStream {
    Reader(BufReader<std::process::ChildStdout>),
    Writer(BufWriter<std::process::ChildStdin>),
}

/// A child process connected through one buffered byte stream.
///
/// Exists from spawn to reap; [`close`](Self::close) bounds the reap and
/// escalates to a kill, so dropping the pipe can never hang the caller.
pub struct CommandPipe {
    child: Child,
    stream: Option<PipeStream>,
}

impl CommandPipe {
    /// Spawns `command` under `/bin/sh -c` with the requested stream
    /// direction.
    ///
    /// # Errors
    ///
    /// Returns the spawn error if the shell could not be started or the
    /// pipe not created.
    pub fn open(command: &str, direction: PipeDirection) -> io::Result<Self> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        match direction {
            PipeDirection::ReadFromChild => {
                cmd.stdout(Stdio::piped()).stdin(Stdio::null());
            }
            PipeDirection::WriteToChild => {
                cmd.stdin(Stdio::piped()).stdout(Stdio::inherit());
            }
        }

        let mut child = cmd.spawn()?;
        let stream = match direction {
            PipeDirection::ReadFromChild => {
                let stdout = child.stdout.take().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "child stdout missing")
                })?;
                PipeStream::Reader(BufReader::new(stdout))
            }
            PipeDirection::WriteToChild => {
                let stdin = child.stdin.take().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::BrokenPipe, "child stdin missing")
                })?;
                PipeStream::Writer(BufWriter::new(stdin))
            }
        };

        Ok(Self { child, stream: Some(stream) })
    }

    /// Closes the stream, waits briefly for the child to exit, and
    /// force-kills it if it lingers.
    ///
    /// Returns the child's exit code, or -1 when it was killed, died on a
    /// signal, or its status could not be determined.
    pub fn close(&mut self) -> i32 {
        // Dropping the stream delivers EOF to a child reading stdin and
        // releases the read end; flushing happens in the BufWriter drop.
        self.stream.take();

        for _ in 0..REAP_ATTEMPTS {
            match self.child.try_wait() {
                Ok(Some(status)) => return status.code().unwrap_or(-1),
                Ok(None) => {}
                Err(e) => {
                    error!("waiting for piped child failed: {e}");
                    break;
                }
            }
            std::thread::sleep(REAP_INTERVAL);
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            return status.code().unwrap_or(-1);
        }

        warn!("piped child pid {} won't exit - killing it", self.child.id());
        if let Err(e) = self.child.kill() {
            error!("killing piped child failed: {e}");
        }
        // Reap so no zombie is left behind; the result is -1 regardless.
        let _ = self.child.wait();
        -1
    }
}

impl Read for CommandPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(PipeStream::Reader(r)) => r.read(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "pipe opened write-only",
            )),
        }
    }
}

impl Write for CommandPipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(PipeStream::Writer(w)) => w.write(buf),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "pipe opened read-only",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.stream.as_mut() {
            Some(PipeStream::Writer(w)) => w.flush(),
            _ => Ok(()),
        }
    }
}

impl Drop for CommandPipe {
    fn drop(&mut self) {
        if self.stream.is_some() || matches!(self.child.try_wait(), Ok(None)) {
            self.close();
        }
    }
}

/// Runs `command` under `/bin/sh -c` and blocks until it exits.
///
/// Returns the exit code, or -1 on spawn/wait failure or signal death.
pub fn run_to_completion(command: &str) -> i32 {
    match Command::new("/bin/sh").arg("-c").arg(command).status() {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            error!("running '{command}' failed: {e}");
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_read_pipe_captures_child_output() {
        let mut pipe = CommandPipe::open("echo hello", PipeDirection::ReadFromChild)
            .expect("spawn echo");
        let mut output = String::new();
        pipe.read_to_string(&mut output).expect("read");
        assert_eq!(output, "hello\n");
        assert_eq!(pipe.close(), 0);
    }

    #[test]
    fn test_write_pipe_feeds_child_stdin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("sink");
        let mut pipe = CommandPipe::open(
            &format!("cat > {}", out.display()),
            PipeDirection::WriteToChild,
        )
        .expect("spawn cat");

        pipe.write_all(b"key data\n").expect("write");
        assert_eq!(pipe.close(), 0);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "key data\n");
    }

    #[test]
    fn test_close_reports_real_exit_status() {
        let mut pipe =
            CommandPipe::open("exit 3", PipeDirection::ReadFromChild).expect("spawn");
        assert_eq!(pipe.close(), 3);
    }

    #[test]
    fn test_close_force_kills_lingering_child() {
        let mut pipe =
            CommandPipe::open("sleep 5", PipeDirection::ReadFromChild).expect("spawn");
        let start = Instant::now();
        let status = pipe.close();
        let elapsed = start.elapsed();

        assert_eq!(status, -1, "killed child must report -1");
        assert!(elapsed >= Duration::from_millis(450), "reap poll must run");
        assert!(elapsed < Duration::from_secs(3), "close must not wait for sleep");
    }

    #[test]
    fn test_wrong_direction_read_is_rejected() {
        let mut pipe =
            CommandPipe::open("cat > /dev/null", PipeDirection::WriteToChild).expect("spawn");
        let mut buf = [0u8; 4];
        assert!(pipe.read(&mut buf).is_err());
        pipe.close();
    }

    #[test]
    fn test_run_to_completion_returns_exit_codes() {
        assert_eq!(run_to_completion("true"), 0);
        assert_eq!(run_to_completion("exit 7"), 7);
        assert_eq!(run_to_completion("false"), 1);
    }

    #[test]
    fn test_run_to_completion_missing_command_is_shell_127() {
        assert_eq!(run_to_completion("definitely-not-a-command-xyz"), 127);
    }
}
