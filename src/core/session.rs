//! Session driver
//!
//! Pumps the child's terminal output through the dual-sink writer until the
//! pty hangs up, then collects the child's exit status.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::annotate::Annotator;
use super::sink::DualSink;

/// Size of a single read from the pty
const READ_CHUNK: usize = 4096;

/// How the child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExitStatus {
    /// Normal exit with a code
    Exited(i32),
    /// Terminated by a signal
    Signaled(i32),
}

impl ChildExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ChildExitStatus::Exited(0))
    }

    /// Exit code to propagate, shell style for signals
    pub fn exit_code(&self) -> i32 {
        match *self {
            ChildExitStatus::Exited(code) => code,
            ChildExitStatus::Signaled(signal) => 128 + signal,
        }
    }
}

impl fmt::Display for ChildExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExitStatus::Exited(code) => write!(f, "exited with code {}", code),
            ChildExitStatus::Signaled(signal) => write!(f, "terminated by signal {}", signal),
        }
    }
}

/// The supervised child, as far as the driver is concerned
pub trait ChildProcess {
    /// Forcibly terminate the child
    fn kill(&mut self) -> io::Result<()>;

    /// Block until the child has exited
    fn wait(&mut self) -> io::Result<ChildExitStatus>;
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to read from pty: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write output: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to collect child exit status: {0}")]
    Wait(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Result of a completed session
#[derive(Debug)]
pub struct SessionOutcome {
    /// How the child ended
    pub status: ChildExitStatus,
    /// Error that cut the read loop short, if any
    pub interrupted: Option<SessionError>,
}

/// Drives one child from first byte to exit status
pub struct Session<C: ChildProcess> {
    child: C,
    /// `None` when coloring is disabled
    annotator: Option<Annotator>,
}

impl<C: ChildProcess> Session<C> {
    pub fn new(child: C, color: bool) -> Self {
        Self {
            child,
            annotator: color.then(Annotator::new),
        }
    }

    /// Read until end of stream, then wait for the child.
    ///
    /// A read or write failure kills the child; it is returned in
    /// [`SessionOutcome::interrupted`] alongside the collected status.
    pub fn run<R, L, W>(mut self, mut reader: R, sink: &mut DualSink<L, W>) -> Result<SessionOutcome>
    where
        R: Read,
        L: Write,
        W: Write,
    {
        let interrupted = match self.pump(&mut reader, sink) {
            Ok(()) => None,
            Err(err) => {
                error!("{}; killing child", err);
                if let Err(kill_err) = self.child.kill() {
                    warn!("Failed to kill child: {}", kill_err);
                }
                Some(err)
            }
        };

        // Release the pty master before blocking on the child
        drop(reader);

        let status = self.child.wait().map_err(SessionError::Wait)?;
        info!("Child {}", status);

        Ok(SessionOutcome {
            status,
            interrupted,
        })
    }

    fn pump<R, L, W>(&mut self, reader: &mut R, sink: &mut DualSink<L, W>) -> Result<()>
    where
        R: Read,
        L: Write,
        W: Write,
    {
        let mut buffer = [0u8; READ_CHUNK];
        let mut total = 0usize;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => {
                    debug!("Pty reached end of file");
                    break;
                }
                Ok(n) => n,
                Err(e) if is_hangup(&e) => {
                    debug!("Pty hung up");
                    break;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(SessionError::Read(e)),
            };

            let chunk = &buffer[..n];
            let written = match self.annotator.as_mut() {
                Some(annotator) => sink.annotate(annotator, chunk),
                None => sink.copy_verbatim(chunk),
            };
            written.map_err(SessionError::Write)?;
            sink.flush_live().map_err(SessionError::Write)?;
            total += n;
        }

        // Don't leave the terminal colored if the last line never ended
        if let Some(annotator) = self.annotator.as_mut() {
            if annotator.close() {
                sink.reset_color().map_err(SessionError::Write)?;
                sink.flush_live().map_err(SessionError::Write)?;
            }
        }

        debug!("Read {} bytes from pty", total);
        Ok(())
    }
}

/// The pty master reports EIO once the child side has closed
#[cfg(unix)]
fn is_hangup(err: &io::Error) -> bool {
    err.raw_os_error() == Some(nix::errno::Errno::EIO as i32)
}

#[cfg(not(unix))]
fn is_hangup(_err: &io::Error) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::core::annotate::Palette;

    /// Reader that replays a fixed script of read results
    struct ScriptedReader {
        steps: VecDeque<io::Result<Vec<u8>>>,
        reads: usize,
    }

    impl ScriptedReader {
        fn new(steps: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                steps: steps.into(),
                reads: 0,
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            match self.steps.pop_front() {
                Some(Ok(data)) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                }
                Some(Err(e)) => Err(e),
                None => panic!("read past the end of the script"),
            }
        }
    }

    #[derive(Default)]
    struct FakeChild {
        status: Option<ChildExitStatus>,
        killed: bool,
    }

    impl ChildProcess for &mut FakeChild {
        fn kill(&mut self) -> io::Result<()> {
            self.killed = true;
            self.status = Some(ChildExitStatus::Signaled(9));
            Ok(())
        }

        fn wait(&mut self) -> io::Result<ChildExitStatus> {
            self.status
                .ok_or_else(|| io::Error::new(ErrorKind::Other, "no status"))
        }
    }

    fn hangup() -> io::Error {
        io::Error::from_raw_os_error(nix::errno::Errno::EIO as i32)
    }

    fn sink(palette: Palette) -> DualSink<Vec<u8>, Vec<u8>> {
        DualSink::new(Vec::new(), Vec::new(), palette)
    }

    #[test]
    fn test_hangup_ends_stream_normally() {
        let mut child = FakeChild {
            status: Some(ChildExitStatus::Exited(3)),
            ..Default::default()
        };
        let reader = ScriptedReader::new(vec![
            Ok(b"hello\r\n".to_vec()),
            Ok(b"<x>\r\n".to_vec()),
            Err(hangup()),
        ]);
        let mut sink = sink(Palette::Plain);

        let outcome = Session::new(&mut child, true).run(reader, &mut sink).unwrap();

        assert_eq!(outcome.status, ChildExitStatus::Exited(3));
        assert!(outcome.interrupted.is_none());
        assert!(!child.killed);
        assert_eq!(sink.live(), b"hello\r\n<x>\r\n");
        assert_eq!(sink.capture(), b"hello\n<x>\n");
    }

    #[test]
    fn test_end_of_file_ends_stream() {
        let mut child = FakeChild {
            status: Some(ChildExitStatus::Exited(0)),
            ..Default::default()
        };
        let reader = ScriptedReader::new(vec![Ok(b"done\n".to_vec()), Ok(Vec::new())]);
        let mut sink = sink(Palette::Plain);

        let outcome = Session::new(&mut child, true).run(reader, &mut sink).unwrap();

        assert!(outcome.status.success());
        assert_eq!(sink.capture(), b"done\n");
    }

    #[test]
    fn test_read_error_kills_child() {
        let mut child = FakeChild::default();
        let reader = ScriptedReader::new(vec![
            Ok(b"partial".to_vec()),
            Err(io::Error::new(ErrorKind::Other, "disk on fire")),
            Ok(b"never read".to_vec()),
        ]);
        let mut sink = sink(Palette::Plain);

        let outcome = Session::new(&mut child, true).run(reader, &mut sink).unwrap();

        assert!(child.killed);
        assert_eq!(outcome.status, ChildExitStatus::Signaled(9));
        assert!(matches!(outcome.interrupted, Some(SessionError::Read(_))));
        assert_eq!(sink.live(), b"partial");
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let mut child = FakeChild {
            status: Some(ChildExitStatus::Exited(0)),
            ..Default::default()
        };
        let reader = ScriptedReader::new(vec![
            Ok(b"a".to_vec()),
            Err(io::Error::from(ErrorKind::Interrupted)),
            Ok(b"b".to_vec()),
            Err(hangup()),
        ]);
        let mut sink = sink(Palette::Plain);

        let outcome = Session::new(&mut child, true).run(reader, &mut sink).unwrap();

        assert!(outcome.interrupted.is_none());
        assert!(!child.killed);
        assert_eq!(sink.live(), b"ab");
    }

    #[test]
    fn test_no_color_copies_verbatim() {
        let mut child = FakeChild {
            status: Some(ChildExitStatus::Exited(1)),
            ..Default::default()
        };
        let reader = ScriptedReader::new(vec![Ok(b"<a>\r\n".to_vec()), Err(hangup())]);
        let mut sink = sink(Palette::Hue);

        Session::new(&mut child, false).run(reader, &mut sink).unwrap();

        assert_eq!(sink.live(), b"<a>\r\n");
        assert_eq!(sink.capture(), b"<a>\r\n");
    }

    #[test]
    fn test_open_color_is_closed_at_end_of_stream() {
        let mut child = FakeChild {
            status: Some(ChildExitStatus::Exited(0)),
            ..Default::default()
        };
        let reader = ScriptedReader::new(vec![Ok(b"<a".to_vec()), Err(hangup())]);
        let mut sink = sink(Palette::Hue);

        Session::new(&mut child, true).run(reader, &mut sink).unwrap();

        assert!(sink.live().ends_with(b"a\x1b[0m"));
        assert!(sink.capture().ends_with(b"a\x1b[0m"));
    }

    #[test]
    fn test_wait_failure_is_an_error() {
        let mut child = FakeChild::default();
        let reader = ScriptedReader::new(vec![Err(hangup())]);
        let mut sink = sink(Palette::Plain);

        let result = Session::new(&mut child, true).run(reader, &mut sink);

        assert!(matches!(result, Err(SessionError::Wait(_))));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ChildExitStatus::Exited(3).exit_code(), 3);
        assert_eq!(ChildExitStatus::Exited(0).exit_code(), 0);
        assert_eq!(ChildExitStatus::Signaled(9).exit_code(), 137);
        assert!(ChildExitStatus::Exited(0).success());
        assert!(!ChildExitStatus::Exited(1).success());
        assert!(!ChildExitStatus::Signaled(15).success());
    }
}
