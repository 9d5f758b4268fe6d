//! Depth-tracking color annotator
//!
//! Counts `<` / `>` nesting within a line and decides which color escape
//! surrounds each byte. The transition is a pure function of the byte and
//! the previous [`AnnotatorState`]; [`Annotator`] only threads that state
//! from one byte to the next.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use crossterm::style::{Color, ResetColor, SetForegroundColor};
use crossterm::QueueableCommand;
use serde::{Deserialize, Serialize};

/// Byte that opens a nesting level
pub const OPEN: u8 = b'<';
/// Byte that closes a nesting level
pub const CLOSE: u8 = b'>';

const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// Colors cycled through by [`Palette::Fixed`]
const FIXED_COLORS: [Color; 6] = [
    Color::DarkRed,
    Color::DarkGreen,
    Color::DarkYellow,
    Color::DarkBlue,
    Color::DarkMagenta,
    Color::DarkCyan,
];

const HUE_STEP: f64 = 60.0;
const HUE_SATURATION: f64 = 0.76;
const HUE_VALUE: f64 = 1.0;

/// State carried from one byte to the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotatorState {
    /// Current nesting depth, never negative
    pub depth: usize,
    /// Whether the previous byte was a carriage return
    pub prev_was_cr: bool,
}

/// What to emit for a single input byte.
///
/// Color changes are expressed as the depth whose color should be
/// emitted; depth 0 means "reset". The same escape goes to both sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Color to emit before the byte
    pub color_before: Option<usize>,
    /// Byte for the live sink
    pub live: u8,
    /// Byte for the capture sink, `None` when suppressed
    pub capture: Option<u8>,
    /// Color to emit after the byte
    pub color_after: Option<usize>,
    /// State after this byte
    pub state: AnnotatorState,
}

/// Advance the annotator by one byte.
pub fn step(byte: u8, state: AnnotatorState) -> Transition {
    let mut t = Transition {
        color_before: None,
        live: byte,
        capture: Some(byte),
        color_after: None,
        state: AnnotatorState {
            depth: state.depth,
            prev_was_cr: byte == CR,
        },
    };

    match byte {
        LF => {
            t.state.depth = 0;
            t.color_before = Some(0);
            // The preceding CR already produced the capture's line break
            if state.prev_was_cr {
                t.capture = None;
            }
        }
        OPEN => {
            t.state.depth = state.depth.saturating_add(1);
            t.color_before = Some(t.state.depth);
        }
        CLOSE if state.depth > 0 => {
            t.state.depth = state.depth - 1;
            t.color_after = Some(t.state.depth);
        }
        CR => {
            // Pagers show a bare CR literally; terminals return the cursor
            t.capture = Some(LF);
        }
        _ => {}
    }

    t
}

/// Stateful wrapper around [`step`]
#[derive(Debug, Default)]
pub struct Annotator {
    state: AnnotatorState,
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte and return what to emit for it
    pub fn feed(&mut self, byte: u8) -> Transition {
        let t = step(byte, self.state);
        self.state = t.state;
        t
    }

    #[cfg(test)]
    pub fn state(&self) -> AnnotatorState {
        self.state
    }

    /// Close any color left open at end of stream.
    ///
    /// Returns `true` if a reset should be emitted.
    pub fn close(&mut self) -> bool {
        let open = self.state.depth > 0;
        self.state = AnnotatorState::default();
        open
    }
}

/// Color strategy, selected once at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Palette {
    /// Cycle through six ANSI colors
    Fixed,
    /// 24-bit color, one hue step per depth
    #[default]
    Hue,
    /// Track depth but emit no escapes
    Plain,
}

impl Palette {
    /// Foreground color for `depth`, `None` for the default foreground
    pub fn color(&self, depth: usize) -> Option<Color> {
        if depth == 0 {
            return None;
        }
        match self {
            Palette::Fixed => Some(FIXED_COLORS[depth % FIXED_COLORS.len()]),
            Palette::Hue => {
                let (r, g, b) = depth_rgb(depth);
                Some(Color::Rgb { r, g, b })
            }
            Palette::Plain => None,
        }
    }

    /// Write the escape that selects the color for `depth`
    pub fn write_escape<W: Write + ?Sized>(&self, depth: usize, out: &mut W) -> io::Result<()> {
        if *self == Palette::Plain {
            return Ok(());
        }
        match self.color(depth) {
            // crossterm renders named colors as 256-color escapes
            Some(color) if *self == Palette::Fixed => {
                write!(out, "\x1b[{}m", sgr_foreground(color))
            }
            Some(color) => out.queue(SetForegroundColor(color)).map(drop),
            None => out.queue(ResetColor).map(drop),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Palette::Fixed => "fixed",
            Palette::Hue => "hue",
            Palette::Plain => "plain",
        }
    }
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Palette {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" | "ansi" => Ok(Palette::Fixed),
            "hue" | "rgb" => Ok(Palette::Hue),
            "plain" | "none" => Ok(Palette::Plain),
            other => Err(format!("Unknown palette: {}. Expected fixed, hue or plain", other)),
        }
    }
}

/// 16-color SGR foreground code for the colors [`Palette::Fixed`] cycles through
fn sgr_foreground(color: Color) -> u8 {
    match color {
        Color::DarkRed => 31,
        Color::DarkGreen => 32,
        Color::DarkYellow => 33,
        Color::DarkBlue => 34,
        Color::DarkMagenta => 35,
        Color::DarkCyan => 36,
        _ => 39,
    }
}

/// RGB for a depth in the hue palette
fn depth_rgb(depth: usize) -> (u8, u8, u8) {
    let hue = (depth as f64 - 0.5) * HUE_STEP;
    hsv_to_rgb(hue, HUE_SATURATION, HUE_VALUE)
}

/// Convert HSV (hue in degrees, saturation and value in 0..=1) to RGB.
///
/// Hue wraps around at 360 degrees, so the hue palette repeats every six
/// depths instead of settling on the last sector. Channels are truncated,
/// not rounded.
fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> (u8, u8, u8) {
    let h = hue.rem_euclid(360.0) / 60.0;
    let sector = h.floor();
    let f = h - sector;

    let p = value * (1.0 - saturation);
    let q = value * (1.0 - saturation * f);
    let t = value * (1.0 - saturation * (1.0 - f));

    let (r, g, b) = match sector as u8 {
        0 => (value, t, p),
        1 => (q, value, p),
        2 => (p, value, t),
        3 => (p, q, value),
        4 => (t, p, value),
        _ => (value, p, q),
    };

    (channel(r), channel(g), channel(b))
}

fn channel(x: f64) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0) as u8
}
