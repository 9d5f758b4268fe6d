//! Dual-sink writer
//!
//! Applies annotator transitions to the live terminal and to the capture
//! buffer. The two sinks only differ where the transition says so (CR
//! conversion and the suppressed LF after it).

use std::io::{self, Write};
use std::slice;

use super::annotate::{Annotator, Palette, Transition};

/// Live and capture outputs driven in lockstep
pub struct DualSink<L: Write, C: Write> {
    live: L,
    capture: C,
    palette: Palette,
}

impl<L: Write, C: Write> DualSink<L, C> {
    pub fn new(live: L, capture: C, palette: Palette) -> Self {
        Self {
            live,
            capture,
            palette,
        }
    }

    /// Write one transition to both sinks
    pub fn apply(&mut self, t: &Transition) -> io::Result<()> {
        if let Some(depth) = t.color_before {
            self.recolor(depth)?;
        }
        self.live.write_all(slice::from_ref(&t.live))?;
        if let Some(byte) = t.capture {
            self.capture.write_all(slice::from_ref(&byte))?;
        }
        if let Some(depth) = t.color_after {
            self.recolor(depth)?;
        }
        Ok(())
    }

    /// Run a chunk through the annotator
    pub fn annotate(&mut self, annotator: &mut Annotator, chunk: &[u8]) -> io::Result<()> {
        for &byte in chunk {
            let t = annotator.feed(byte);
            self.apply(&t)?;
        }
        Ok(())
    }

    /// Copy a chunk to both sinks unchanged
    pub fn copy_verbatim(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.live.write_all(chunk)?;
        self.capture.write_all(chunk)
    }

    /// Emit the default-foreground escape to both sinks
    pub fn reset_color(&mut self) -> io::Result<()> {
        self.recolor(0)
    }

    pub fn flush_live(&mut self) -> io::Result<()> {
        self.live.flush()
    }

    #[cfg(test)]
    pub fn live(&self) -> &L {
        &self.live
    }

    #[cfg(test)]
    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn into_parts(self) -> (L, C) {
        (self.live, self.capture)
    }

    fn recolor(&mut self, depth: usize) -> io::Result<()> {
        self.palette.write_escape(depth, &mut self.live)?;
        self.palette.write_escape(depth, &mut self.capture)
    }
}
