//! msoak - soak up a command's output, page it when the command fails
//!
//! msoak runs a command on a pseudo-terminal, mirrors its output live and
//! keeps a copy. If the command fails, the copy is replayed through a
//! pager so the whole transcript can be read back.
//!
//! While mirroring, every `<` ... `>` nesting level is drawn in its own
//! color, which makes deeply nested output (template errors, XML) easier
//! to follow.
//!
//! # Quick Start
//!
//! ```text
//! msoak make                  # Page the build log only if make fails
//! msoak -y cargo build        # Always page
//! msoak -n -- ./run.sh -x     # No coloring, pass -x to the script
//! msoak -p fixed g++ main.cpp # ANSI colors instead of 24-bit
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | N | Command exited with N |
//! | 128+N | Command killed by signal N |
//! | 125 | msoak itself failed |
//! | 126 | Command not executable |
//! | 127 | Command not found |

mod config;
mod core;
mod replay;

use std::env;
use std::fmt;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::config::{Config, LOG_ENV};
use crate::core::annotate::Palette;

/// msoak itself failed
const EXIT_INTERNAL_FAILURE: i32 = 125;
/// Command found but could not be executed
#[cfg(unix)]
const EXIT_NOT_EXECUTABLE: i32 = 126;
/// Command not found
#[cfg(unix)]
const EXIT_NOT_FOUND: i32 = 127;

/// Pty size when the invoking terminal's size is unknown
#[cfg(unix)]
const DEFAULT_SIZE: (u16, u16) = (80, 24);

/// Command line options
#[derive(Debug, Default, PartialEq)]
struct Options {
    /// Replay even if the command succeeds
    always: bool,
    /// Skip the annotator
    no_color: bool,
    /// Palette override
    palette: Option<Palette>,
    /// Command and its arguments
    command: Vec<String>,
}

/// What the command line asks for
#[derive(Debug, PartialEq)]
enum Invocation {
    Help,
    Version,
    Run(Options),
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("msoak {}", VERSION);
}

fn print_help() {
    eprintln!("msoak {} - page a command's output when it fails", VERSION);
    eprintln!();
    eprintln!("Usage: msoak [OPTIONS] [--] <command> [args...]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -y, --always            Page the output even if the command succeeds");
    eprintln!("  -n, --no-color          Don't color nesting depth");
    eprintln!("  -p, --palette <NAME>    Palette: hue (24-bit, default) or fixed (ANSI)");
    eprintln!("  -v, --version           Show version");
    eprintln!("  -h, --help              Show this help");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  MSOAK_PAGER             Pager command (default: less --raw-control-chars)");
    eprintln!("  MSOAK_LOG               Log filter (default: info)");
    eprintln!("  NO_COLOR                Same as --no-color when set and non-empty");
    eprintln!();
    eprintln!("Configuration: ~/.msoak/config.toml");
    eprintln!("Log file:      ~/.msoak/msoak.log");
}

fn parse_args(args: &[String]) -> Result<Invocation, String> {
    let mut options = Options::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(Invocation::Help),
            "-v" | "--version" => return Ok(Invocation::Version),
            "-y" | "--always" => {
                options.always = true;
            }
            "-n" | "--no-color" => {
                options.no_color = true;
            }
            "-p" | "--palette" => {
                i += 1;
                let name = args.get(i).ok_or("Missing palette argument")?;
                options.palette = Some(name.parse()?);
            }
            "--" => {
                i += 1;
                break;
            }
            arg if arg.len() > 1 && arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            // First non-flag starts the command
            _ => break,
        }
        i += 1;
    }

    options.command = args[i..].to_vec();
    if options.command.is_empty() {
        return Err("Missing command. Usage: msoak [OPTIONS] [--] <command> [args...]".to_string());
    }

    Ok(Invocation::Run(options))
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let options = match parse_args(&args) {
        Ok(Invocation::Run(options)) => options,
        Ok(Invocation::Help) => {
            print_help();
            return;
        }
        Ok(Invocation::Version) => {
            print_version();
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(EXIT_INTERNAL_FAILURE);
        }
    };

    init_logging();
    info!("msoak starting...");

    let code = run(options);

    info!("Exiting with code {}", code);
    std::process::exit(code);
}

/// Log to `~/.msoak/msoak.log`; the terminal is reserved for the child
fn init_logging() {
    let Some(log_dir) = config::msoak_dir() else {
        return;
    };
    let _ = std::fs::create_dir_all(&log_dir);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("msoak.log"))
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// Tell the user, and the log
fn report(err: &dyn fmt::Display) {
    eprintln!("msoak: {:#}", err);
    error!("{:#}", err);
}

#[cfg(unix)]
fn run(options: Options) -> i32 {
    match soak(options) {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            failure_code(&e)
        }
    }
}

#[cfg(not(unix))]
fn run(_options: Options) -> i32 {
    eprintln!("msoak currently only supports Unix-like systems.");
    EXIT_INTERNAL_FAILURE
}

/// Run the command and replay it if needed. Returns the exit code to use.
#[cfg(unix)]
fn soak(options: Options) -> anyhow::Result<i32> {
    use std::io::{self, BufWriter};

    use anyhow::Context;

    use crate::core::pty;
    use crate::core::session::Session;
    use crate::core::sink::DualSink;
    use crate::replay::ReplayController;

    let settings = Config::load();
    let no_color_env = env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
    let color = settings.color && !options.no_color && !no_color_env;
    let palette = options.palette.unwrap_or(settings.palette);
    let controller = ReplayController::new(
        settings.pager_command(),
        options.always || settings.always,
    );

    info!("Command: {:?}", options.command);
    info!("Color: {} (palette: {})", color, palette);
    info!("Pager: {}", controller.pager());

    // Setup failures end the run before any child starts
    let capture = tempfile::tempfile().context("Failed to create capture buffer")?;
    let (cols, rows) = terminal_size();
    let (master, child) = pty::spawn(&options.command, cols, rows)?;

    let mut sink = DualSink::new(
        BufWriter::new(io::stderr()),
        BufWriter::new(capture),
        palette,
    );
    let outcome = Session::new(child, color).run(master, &mut sink)?;
    if let Some(err) = &outcome.interrupted {
        report(err);
    }

    let (mut live, capture) = sink.into_parts();
    flush_terminal(&mut live);
    drop(live);

    // Replay problems are reported but never change the exit code
    match capture.into_inner() {
        Ok(mut capture) => {
            if let Err(e) = controller.finish(&outcome.status, &mut capture) {
                report(&e);
            }
        }
        Err(e) => report(&format!("Failed to flush capture buffer: {}", e.error())),
    }

    Ok(outcome.status.exit_code())
}

/// Flush the last of the terminal output. Returns `false` if that failed;
/// the failure is logged but does not affect the exit code.
#[cfg(unix)]
fn flush_terminal<W: std::io::Write>(live: &mut W) -> bool {
    match live.flush() {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to flush terminal output: {}", e);
            false
        }
    }
}

#[cfg(unix)]
fn failure_code(err: &anyhow::Error) -> i32 {
    use std::io::ErrorKind;

    use crate::core::pty::PtyError;

    match err.downcast_ref::<PtyError>().and_then(PtyError::spawn_error_kind) {
        Some(ErrorKind::NotFound) => EXIT_NOT_FOUND,
        Some(ErrorKind::PermissionDenied) => EXIT_NOT_EXECUTABLE,
        _ => EXIT_INTERNAL_FAILURE,
    }
}

/// Size of the invoking terminal, for the child's pty
#[cfg(unix)]
fn terminal_size() -> (u16, u16) {
    match crossterm::terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => DEFAULT_SIZE,
    }
}
