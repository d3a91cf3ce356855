//! # gitbin-config
//!
//! Configuration management for git-bin.
//!
//! Loads configuration from, in increasing priority:
//! 1. Built-in defaults
//! 2. `~/.gitbin/config.toml` (global)
//! 3. The repository's git config (`git-bin.*` keys)
//! 4. Environment variables

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default number of concurrent chunk transfers
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Cache directory name inside the git directory
pub const CACHE_DIRNAME: &str = "git-bin";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
    pub transfer: TransferConfig,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // 1. Global config (~/.gitbin/config.toml)
        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::from_file(&global_path)?;
            }
        }

        // 2. Repository git config
        if let Some(entries) = git_output(&["config", "--get-regexp", r"^git-bin\."]) {
            config.apply_git_config(&entries)?;
        }

        // 3. Environment variable overrides
        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.gitbin/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".gitbin/config.toml"))
    }

    /// Apply `git config --get-regexp` output (`key value` per line).
    ///
    /// Git lowercases key names, so matching is case-insensitive.
    pub fn apply_git_config(&mut self, entries: &str) -> Result<(), ConfigError> {
        for line in entries.lines() {
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((key, value)) => (key, value.trim()),
                None => (line, ""),
            };
            let lowered = key.to_ascii_lowercase();
            let Some(name) = lowered.strip_prefix("git-bin.") else {
                continue;
            };

            match name {
                "chunksize" => self.cache.chunk_size = parse_size(key, value)?,
                "cachedirectory" => self.cache.directory = Some(normalize_path(value)),
                "remotepath" => self.remote.path = Some(normalize_path(value)),
                "concurrency" => self.transfer.concurrency = parse_number(key, value)?,
                "maxintegritypasses" => {
                    self.transfer.max_integrity_passes = Some(parse_number(key, value)?)
                }
                _ => debug!(key, "ignoring unknown git-bin config key"),
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GITBIN_CACHE_DIR") {
            self.cache.directory = Some(normalize_path(&path));
        }
        if let Some(size) = lookup("GITBIN_CHUNK_SIZE") {
            self.cache.chunk_size = parse_size("GITBIN_CHUNK_SIZE", &size)?;
        }
        if let Some(path) = lookup("GITBIN_REMOTE_PATH") {
            self.remote.path = Some(normalize_path(&path));
        }
        Ok(())
    }

    /// Reject values the filters cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "cache.chunk_size".to_string(),
                value: "0".to_string(),
            });
        }
        if self.transfer.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "transfer.concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Resolved cache directory: configured, else `<git-dir>/git-bin`.
    pub fn cache_directory(&self) -> PathBuf {
        match &self.cache.directory {
            Some(dir) => dir.clone(),
            None => {
                let git_dir = git_output(&["rev-parse", "--git-dir"])
                    .map(|out| PathBuf::from(out.trim()))
                    .unwrap_or_else(|| PathBuf::from(".git"));
                git_dir.join(CACHE_DIRNAME)
            }
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Chunk cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (None = `<git-dir>/git-bin`)
    pub directory: Option<PathBuf>,
    /// Chunk size in bytes
    pub chunk_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Remote store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Directory remote root (local path or mounted share)
    pub path: Option<PathBuf>,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum concurrent chunk transfers
    pub concurrency: usize,
    /// Cap on smudge verify-and-refetch passes (None = retry until clean)
    pub max_integrity_passes: Option<u32>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_integrity_passes: None,
        }
    }
}

/// Parse a byte size with an optional `k`, `m` or `g` suffix.
pub fn parse_size(key: &str, value: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    };

    let trimmed = value.trim().to_ascii_lowercase();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed.as_str(), 1),
    };

    let n: usize = digits.trim().parse().map_err(|_| invalid())?;
    n.checked_mul(multiplier).ok_or_else(invalid)
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Expand a leading `~/` to the home directory
pub fn normalize_path(p: &str) -> PathBuf {
    if let Some(stripped) = p.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(p)
}

/// Run git and return its stdout, or None if git is missing or fails.
fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}
