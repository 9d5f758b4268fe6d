//! Settings for msoak.
//!
//! Settings come from, in increasing priority:
//! - built-in defaults
//! - the TOML settings file at `~/.msoak/config.toml`
//! - environment variables (`MSOAK_PAGER`)
//! - command line flags (applied in `main`)
//!
//! # Settings File
//!
//! ```toml
//! # Pager command line, split on whitespace
//! pager = "less --raw-control-chars"
//!
//! # Colorize nesting depth
//! color = true
//!
//! # Palette: "hue" (24-bit) or "fixed" (ANSI colors)
//! palette = "hue"
//!
//! # Page the transcript even when the command succeeds
//! always = false
//! ```

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::annotate::Palette;
use crate::replay::PagerCommand;

/// Environment variable overriding the pager command line
pub const PAGER_ENV: &str = "MSOAK_PAGER";

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "MSOAK_LOG";

/// Settings file contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pager command line
    pub pager: Option<String>,
    /// Colorize nesting depth
    pub color: bool,
    /// Palette strategy
    pub palette: Palette,
    /// Replay even on success
    pub always: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pager: None,
            color: true,
            palette: Palette::default(),
            always: false,
        }
    }
}

impl Config {
    /// Load settings from file, falling back to defaults
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                match fs::read_to_string(&path) {
                    Ok(content) => match Self::from_toml(&content) {
                        Ok(config) => {
                            debug!("Loaded settings from {}", path.display());
                            return config;
                        }
                        Err(e) => warn!("Ignoring {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("Failed to read {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Pager to use, taking `MSOAK_PAGER` into account
    pub fn pager_command(&self) -> PagerCommand {
        resolve_pager(std::env::var(PAGER_ENV).ok().as_deref(), self.pager.as_deref())
    }

    /// Get settings file path
    fn get_config_path() -> Option<PathBuf> {
        msoak_dir().map(|dir| dir.join("config.toml"))
    }
}

/// Pick the pager: environment first, then settings file, then default.
/// Blank values are skipped.
pub fn resolve_pager(env: Option<&str>, file: Option<&str>) -> PagerCommand {
    for (source, line) in [(PAGER_ENV, env), ("settings file", file)] {
        if let Some(line) = line {
            match PagerCommand::parse(line) {
                Some(pager) => return pager,
                None => warn!("Empty pager from {}, ignoring", source),
            }
        }
    }
    PagerCommand::default()
}

/// Per-user directory holding the settings file and the log
pub fn msoak_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".msoak"))
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_full_file() {
        let config = Config::from_toml(
            r#"
            pager = "most"
            color = false
            palette = "fixed"
            always = true
            "#,
        )
        .unwrap();

        assert_eq!(config.pager.as_deref(), Some("most"));
        assert!(!config.color);
        assert_eq!(config.palette, Palette::Fixed);
        assert!(config.always);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::from_toml("palette = \"fixed\"").unwrap();
        assert_eq!(config.palette, Palette::Fixed);
        assert!(config.color);
        assert!(!config.always);
        assert_eq!(config.pager, None);
    }

    #[test]
    fn test_bad_palette_is_rejected() {
        assert!(Config::from_toml("palette = \"rainbow\"").is_err());
    }

    #[test]
    fn test_pager_precedence() {
        assert_eq!(
            resolve_pager(Some("more"), Some("most")),
            PagerCommand::parse("more").unwrap()
        );
        assert_eq!(
            resolve_pager(None, Some("most -s")),
            PagerCommand::parse("most -s").unwrap()
        );
        assert_eq!(resolve_pager(None, None), PagerCommand::default());
        // Blank values fall through
        assert_eq!(
            resolve_pager(Some(" "), Some("most")),
            PagerCommand::parse("most").unwrap()
        );
        assert_eq!(resolve_pager(Some(""), None), PagerCommand::default());
    }
}
