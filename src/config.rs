use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Expand tilde (~) in path to user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(stripped) = s.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(stripped);
            }
        } else if s == "~" {
            if let Some(home) = dirs::home_dir() {
                return home;
            }
        }
    }
    path.to_path_buf()
}

/// Configuration for git-remote-rclone
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HelperConfig {
    /// rclone executable
    #[serde(default = "defaults::rclone_binary")]
    pub rclone_binary: PathBuf,
    /// Extra flags passed to every rclone invocation (e.g. `--config`)
    #[serde(default)]
    pub rclone_flags: Vec<String>,
    /// git executable used for the mirror repository
    #[serde(default = "defaults::git_binary")]
    pub git_binary: PathBuf,
    /// gzip level for the uploaded archive, 0-9
    #[serde(default = "defaults::compression_level")]
    pub compression_level: u32,
    /// Run `git gc` on the mirror before each upload
    #[serde(default = "defaults::compact")]
    pub compact: bool,
    /// tracing filter used when GIT_REMOTE_RCLONE_LOG is unset
    #[serde(default = "defaults::log_filter")]
    pub log_filter: String,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            rclone_binary: defaults::rclone_binary(),
            rclone_flags: Vec::new(),
            git_binary: defaults::git_binary(),
            compression_level: defaults::compression_level(),
            compact: defaults::compact(),
            log_filter: defaults::log_filter(),
        }
    }
}

impl HelperConfig {
    /// Load configuration from the config file (if any) and environment
    pub fn load() -> Result<Self> {
        let config_path = match env::var("GIT_REMOTE_RCLONE_CONFIG") {
            Ok(path) => Some(expand_tilde(&PathBuf::from(path))),
            Err(_) => Self::config_file_path(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => Self::load_from_file(&path)?,
            _ => Self::default(),
        };

        config.apply_overrides(|key| env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `GIT_REMOTE_RCLONE_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("GIT_REMOTE_RCLONE_RCLONE") {
            self.rclone_binary = expand_tilde(&PathBuf::from(path));
        }

        if let Some(path) = lookup("GIT_REMOTE_RCLONE_GIT") {
            self.git_binary = expand_tilde(&PathBuf::from(path));
        }

        if let Some(flags) = lookup("GIT_REMOTE_RCLONE_FLAGS") {
            self.rclone_flags = flags.split_whitespace().map(str::to_string).collect();
        }

        if let Some(level) = lookup("GIT_REMOTE_RCLONE_COMPRESSION") {
            self.compression_level = level
                .parse()
                .context("Failed to parse GIT_REMOTE_RCLONE_COMPRESSION as u32")?;
        }

        if let Some(compact) = lookup("GIT_REMOTE_RCLONE_COMPACT") {
            self.compact = match compact.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => anyhow::bail!("Invalid GIT_REMOTE_RCLONE_COMPACT value '{}'", other),
            };
        }

        self.compression_level = self.compression_level.min(9);
        Ok(())
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: HelperConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.rclone_binary = expand_tilde(&config.rclone_binary);
        config.git_binary = expand_tilde(&config.git_binary);

        Ok(config)
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Default config file path
    pub fn config_file_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/git-remote-rclone/config.yaml"))
    }
}

mod defaults {
    use std::path::PathBuf;

    pub(crate) fn rclone_binary() -> PathBuf {
        PathBuf::from("rclone")
    }

    pub(crate) fn git_binary() -> PathBuf {
        PathBuf::from("git")
    }

    pub(crate) fn compression_level() -> u32 {
        6
    }

    pub(crate) fn compact() -> bool {
        true
    }

    pub(crate) fn log_filter() -> String {
        "warn".to_string()
    }
}
