//! Unix pseudo-terminal host
//!
//! Allocates a pty, starts the child command on its slave side and hands
//! the master back to the caller as a plain reader.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};

use nix::pty::{openpty, Winsize};
use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::{info, warn};

use super::session::{ChildExitStatus, ChildProcess};

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("No command given")]
    EmptyCommand,

    #[error("Failed to create pseudo terminal: {0}")]
    Open(#[source] nix::Error),

    #[error("Failed to duplicate pty handle: {0}")]
    Duplicate(#[source] io::Error),

    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl PtyError {
    /// Underlying spawn failure kind, if this is a spawn error
    pub fn spawn_error_kind(&self) -> Option<io::ErrorKind> {
        match self {
            PtyError::Spawn { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Child process attached to a pty
pub struct PtyChild {
    child: Child,
}

impl ChildProcess for PtyChild {
    fn kill(&mut self) -> io::Result<()> {
        // SIGKILL
        self.child.kill()
    }

    fn wait(&mut self) -> io::Result<ChildExitStatus> {
        let status = self.child.wait()?;
        convert_status(status)
    }
}

/// Spawn `argv` on a new pty of the given size.
///
/// Returns the master side as a reader together with the child. The
/// parent's copies of the slave are closed before returning, so reading the
/// master ends with EIO (or EOF) once the child side is gone.
pub fn spawn(argv: &[String], cols: u16, rows: u16) -> Result<(File, PtyChild)> {
    let (program, args) = argv.split_first().ok_or(PtyError::EmptyCommand)?;

    let winsize = Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let pty = openpty(&winsize, None).map_err(PtyError::Open)?;

    let master_fd = pty.master.as_raw_fd();
    let slave_fd = pty.slave.as_raw_fd();
    let stdin = pty.slave.try_clone().map_err(PtyError::Duplicate)?;
    let stdout = pty.slave.try_clone().map_err(PtyError::Duplicate)?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(pty.slave));

    // SAFETY: runs in the forked child before exec and only makes
    // async-signal-safe calls. The descriptors are plain integers copied in.
    unsafe {
        command.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            libc::close(master_fd);
            if slave_fd > libc::STDERR_FILENO {
                libc::close(slave_fd);
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|source| PtyError::Spawn {
        command: program.clone(),
        source,
    })?;

    // Dropping the command closes the parent's slave descriptors
    drop(command);

    info!("Spawned {} (pid {}) on {}x{} pty", program, child.id(), cols, rows);

    Ok((File::from(pty.master), PtyChild { child }))
}

fn convert_status(status: ExitStatus) -> io::Result<ChildExitStatus> {
    if let Some(code) = status.code() {
        return Ok(ChildExitStatus::Exited(code));
    }
    if let Some(signal) = status.signal() {
        match Signal::try_from(signal) {
            Ok(name) => info!("Child killed by {}", name),
            Err(_) => warn!("Child killed by unknown signal {}", signal),
        }
        return Ok(ChildExitStatus::Signaled(signal));
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        format!("Unrecognized child status: {}", status),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::annotate::Palette;
    use crate::core::session::Session;
    use crate::core::sink::DualSink;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn test_pty_output_and_exit_code() {
        let (master, child) = spawn(&sh("printf '<a>\\n'; exit 3"), 80, 24).unwrap();
        let mut sink = DualSink::new(Vec::new(), Vec::new(), Palette::Plain);

        let outcome = Session::new(child, true).run(master, &mut sink).unwrap();

        assert_eq!(outcome.status, ChildExitStatus::Exited(3));
        assert!(outcome.interrupted.is_none());
        // The tty turns LF into CRLF; the capture keeps a single newline
        let (live, capture) = sink.into_parts();
        assert_eq!(live, b"<a>\r\n");
        assert_eq!(capture, b"<a>\n");
    }

    #[test]
    fn test_child_sees_a_terminal() {
        let (master, child) = spawn(&sh("test -t 0 && test -t 1 && test -t 2"), 80, 24).unwrap();
        let mut sink = DualSink::new(Vec::new(), Vec::new(), Palette::Plain);

        let outcome = Session::new(child, false).run(master, &mut sink).unwrap();

        assert_eq!(outcome.status, ChildExitStatus::Exited(0));
    }

    #[test]
    fn test_signal_termination() {
        let (master, child) = spawn(&sh("kill -9 $$"), 80, 24).unwrap();
        let mut sink = DualSink::new(Vec::new(), Vec::new(), Palette::Plain);

        let outcome = Session::new(child, true).run(master, &mut sink).unwrap();

        assert_eq!(outcome.status, ChildExitStatus::Signaled(9));
        assert_eq!(outcome.status.exit_code(), 137);
    }

    #[test]
    fn test_missing_command() {
        let argv = vec!["/nonexistent/msoak-test-binary".to_string()];
        let err = spawn(&argv, 80, 24).err().unwrap();
        assert_eq!(err.spawn_error_kind(), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(spawn(&[], 80, 24), Err(PtyError::EmptyCommand)));
    }
}
