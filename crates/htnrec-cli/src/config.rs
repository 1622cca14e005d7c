//! Configuration file management for htnrec.
//!
//! Provides a TOML-based config file at `~/.config/htnrec/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use htnrec_core::{InsertionMode, RecognizerConfig};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub recognizer: RecognizerSection,
}

/// The `[recognizer]` section. Missing keys fall back to the defaults.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecognizerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_level: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insertion: Option<InsertionMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hypotheses_per_position: Option<usize>,
}

impl RecognizerSection {
    /// Every key spelled out with its default value.
    pub fn defaults() -> Self {
        let config = RecognizerConfig::default();
        Self {
            max_level: Some(config.max_level),
            insertion: Some(config.insertion),
            max_hypotheses_per_position: Some(config.max_hypotheses_per_position),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the htnrec config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/htnrec` or `~/.config/htnrec`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("htnrec");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("htnrec")
}

/// Return the path to the htnrec config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns `Ok(None)` if it does not exist.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Resolve the recognizer configuration using the chain: CLI flag > env
/// var > config file > default.
///
/// - Max level: `cli_max_level` > `HTNREC_MAX_LEVEL` > `recognizer.max_level` > 4
/// - Insertion: `cli_insertion` > `HTNREC_INSERTION` > `recognizer.insertion` > suffix
/// - Hypothesis cap: `recognizer.max_hypotheses_per_position` > 256
pub fn resolve(
    cli_max_level: Option<usize>,
    cli_insertion: Option<InsertionMode>,
) -> Result<RecognizerConfig> {
    let file = load_config()?.unwrap_or_default().recognizer;
    let defaults = RecognizerConfig::default();

    let max_level = if let Some(level) = cli_max_level {
        level
    } else if let Ok(raw) = std::env::var("HTNREC_MAX_LEVEL") {
        raw.parse()
            .with_context(|| format!("HTNREC_MAX_LEVEL is not a number: {raw:?}"))?
    } else {
        file.max_level.unwrap_or(defaults.max_level)
    };

    let insertion = if let Some(mode) = cli_insertion {
        mode
    } else if let Ok(raw) = std::env::var("HTNREC_INSERTION") {
        raw.parse::<InsertionMode>()
            .map_err(anyhow::Error::msg)
            .context("invalid HTNREC_INSERTION")?
    } else {
        file.insertion.unwrap_or(defaults.insertion)
    };

    Ok(RecognizerConfig {
        insertion,
        max_level,
        max_hypotheses_per_position: file
            .max_hypotheses_per_position
            .unwrap_or(defaults.max_hypotheses_per_position),
    })
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Point XDG_CONFIG_HOME at a fresh temp dir and clear the overrides.
    fn isolated_env() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", tmp.path()) };
        unsafe { std::env::remove_var("HTNREC_MAX_LEVEL") };
        unsafe { std::env::remove_var("HTNREC_INSERTION") };
        tmp
    }

    fn restore_env() {
        unsafe { std::env::remove_var("XDG_CONFIG_HOME") };
        unsafe { std::env::remove_var("HTNREC_MAX_LEVEL") };
        unsafe { std::env::remove_var("HTNREC_INSERTION") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        let config = resolve(None, None).unwrap();
        restore_env();
        assert_eq!(config, RecognizerConfig::default());
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = isolated_env();

        let original = ConfigFile {
            recognizer: RecognizerSection::defaults(),
        };
        save_config(&original).unwrap();
        let written = tmp.path().join("htnrec").join("config.toml");
        let loaded = load_config().unwrap();
        restore_env();

        assert!(written.exists());
        let loaded = loaded.expect("config should exist");
        assert_eq!(loaded.recognizer.max_level, Some(4));
        assert_eq!(loaded.recognizer.insertion, Some(InsertionMode::Suffix));
        assert_eq!(loaded.recognizer.max_hypotheses_per_position, Some(256));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let _lock = lock_env();
        let tmp = isolated_env();

        let dir = tmp.path().join("htnrec");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("config.toml"),
            "[recognizer]\ninsertion = \"anywhere\"\nmax_hypotheses_per_position = 8\n",
        )
        .unwrap();

        let config = resolve(None, None).unwrap();
        restore_env();
        assert_eq!(config.insertion, InsertionMode::Anywhere);
        assert_eq!(config.max_hypotheses_per_position, 8);
        assert_eq!(config.max_level, 4);
    }

    #[test]
    fn env_var_overrides_config_file_and_cli_overrides_env() {
        let _lock = lock_env();
        let tmp = isolated_env();

        let dir = tmp.path().join("htnrec");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), "[recognizer]\nmax_level = 1\n").unwrap();
        unsafe { std::env::set_var("HTNREC_MAX_LEVEL", "3") };
        unsafe { std::env::set_var("HTNREC_INSERTION", "anywhere") };

        let from_env = resolve(None, None).unwrap();
        let from_cli = resolve(Some(7), Some(InsertionMode::Suffix)).unwrap();
        restore_env();

        assert_eq!(from_env.max_level, 3);
        assert_eq!(from_env.insertion, InsertionMode::Anywhere);
        assert_eq!(from_cli.max_level, 7);
        assert_eq!(from_cli.insertion, InsertionMode::Suffix);
    }

    #[test]
    fn invalid_env_values_are_errors() {
        let _lock = lock_env();
        let _tmp = isolated_env();

        unsafe { std::env::set_var("HTNREC_MAX_LEVEL", "lots") };
        let level = resolve(None, None);
        unsafe { std::env::remove_var("HTNREC_MAX_LEVEL") };
        unsafe { std::env::set_var("HTNREC_INSERTION", "middle") };
        let insertion = resolve(None, None);
        restore_env();

        let msg = level.unwrap_err().to_string();
        assert!(msg.contains("HTNREC_MAX_LEVEL"), "unexpected error: {msg}");
        let msg = format!("{:#}", insertion.unwrap_err());
        assert!(msg.contains("HTNREC_INSERTION"), "unexpected error: {msg}");
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let _lock = lock_env();
        let tmp = isolated_env();

        let dir = tmp.path().join("htnrec");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), "[recognizer]\nmax_level = \"x\"\n").unwrap();

        let result = resolve(None, None);
        restore_env();
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("failed to parse config file"), "unexpected error: {msg}");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("htnrec/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
