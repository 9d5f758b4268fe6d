//! Core output pipeline.
//!
//! - **annotate**: per-byte nesting-depth state machine and color palettes
//! - **sink**: writer feeding the live terminal and the capture buffer
//! - **pty**: Unix pseudo-terminal host for the child command
//! - **session**: read loop tying the pty to the sinks
//!
//! # Architecture
//!
//! ```text
//! Session
//! ├── pty master (child output)
//! ├── Annotator (depth + pending CR)
//! └── DualSink
//!     ├── live (stderr, flushed per chunk)
//!     └── capture (temp file, replayed on failure)
//! ```

pub mod annotate;
#[cfg(unix)]
pub mod pty;
pub mod session;
pub mod sink;
