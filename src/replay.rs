//! Transcript replay
//!
//! Once the child has exited, decides whether the captured transcript is
//! worth showing and, if so, streams it into the pager.

use std::fmt;
use std::io::{self, ErrorKind, Read, Seek, Write};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::session::ChildExitStatus;

/// Pager used when neither the environment nor the settings file name one
pub const DEFAULT_PAGER: &str = "less --raw-control-chars";

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to rewind capture buffer: {0}")]
    Rewind(#[source] io::Error),

    #[error("Failed to start pager {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to stream transcript to pager: {0}")]
    Stream(#[source] io::Error),

    #[error("Failed to wait for pager: {0}")]
    Wait(#[source] io::Error),

    #[error("Pager {pager} {status}")]
    Exited { pager: String, status: ExitStatus },
}

pub type Result<T> = std::result::Result<T, ReplayError>;

/// Shell used to run the pager command line
const SHELL: &str = "sh";

/// Pager command line, run through the shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerCommand {
    line: String,
}

impl PagerCommand {
    /// Trim a command line. `None` if it is blank.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(Self {
            line: line.to_string(),
        })
    }

    fn command(&self) -> Command {
        let mut command = Command::new(SHELL);
        command.arg("-c").arg(&self.line);
        command
    }
}

impl Default for PagerCommand {
    fn default() -> Self {
        Self {
            line: DEFAULT_PAGER.to_string(),
        }
    }
}

impl fmt::Display for PagerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// Whether a run with this outcome should be replayed
pub fn should_replay(status: &ChildExitStatus, force: bool) -> bool {
    force || !status.success()
}

/// Post-exit replay decision and pager plumbing
#[derive(Debug, Clone)]
pub struct ReplayController {
    pager: PagerCommand,
    force: bool,
}

impl ReplayController {
    pub fn new(pager: PagerCommand, force: bool) -> Self {
        Self { pager, force }
    }

    pub fn pager(&self) -> &PagerCommand {
        &self.pager
    }

    /// Replay `capture` if `status` calls for it. Returns whether the pager ran.
    pub fn finish<F>(&self, status: &ChildExitStatus, capture: &mut F) -> Result<bool>
    where
        F: Read + Write + Seek,
    {
        if !should_replay(status, self.force) {
            debug!("Child succeeded, skipping replay");
            return Ok(false);
        }
        info!("Replaying transcript ({}, forced: {})", status, self.force);
        self.replay(capture)?;
        Ok(true)
    }

    /// Flush and rewind `capture`, then stream all of it into the pager and
    /// wait for the pager to exit.
    pub fn replay<F>(&self, capture: &mut F) -> Result<()>
    where
        F: Read + Write + Seek,
    {
        capture.flush().map_err(ReplayError::Rewind)?;
        capture.rewind().map_err(ReplayError::Rewind)?;

        let mut pager = self
            .pager
            .command()
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|source| ReplayError::Spawn {
                program: SHELL.to_string(),
                source,
            })?;

        let streamed = match pager.stdin.take() {
            // Dropping stdin at the end of the arm closes the pipe
            Some(mut stdin) => io::copy(capture, &mut stdin),
            None => Ok(0),
        };

        let status = pager.wait().map_err(ReplayError::Wait)?;

        match streamed {
            Ok(bytes) => debug!("Streamed {} bytes to pager", bytes),
            // The user quit the pager before reaching the end
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                debug!("Pager closed its input early")
            }
            Err(e) => return Err(ReplayError::Stream(e)),
        }

        if !status.success() {
            // sh exits 127 when the pager program is missing
            warn!("Pager {} {}", self.pager, status);
            return Err(ReplayError::Exited {
                pager: self.pager.to_string(),
                status,
            });
        }
        Ok(())
    }
}
