use std::path::PathBuf;

use crate::error::{Error, Result};

/// Where the snapshot lives, parsed from the URL git hands to the helper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUrl {
    /// An rclone location such as `gdrive:backups/project`
    Rclone(String),
    /// A directory on the local filesystem
    Local(PathBuf),
}

impl RemoteUrl {
    /// Git may hand over the URL as written (`rclone://target/path`) or, for
    /// `rclone::<address>`, just the address:
    /// - `rclone://<target>/<path>` -> rclone location `<target>:<path>`
    /// - `file://<path>`, absolute or `./`-relative paths -> local directory
    /// - `<target>:<path>` -> rclone location, verbatim
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.strip_prefix("rclone::").unwrap_or(url);

        if let Some(rest) = url.strip_prefix("rclone://") {
            let (target, path) = rest.split_once('/').unwrap_or((rest, ""));
            if target.is_empty() {
                return Err(Error::InvalidUrl(url.to_string()));
            }
            return Ok(RemoteUrl::Rclone(format!("{}:{}", target, path)));
        }

        if let Some(path) = url.strip_prefix("file://") {
            if path.is_empty() {
                return Err(Error::InvalidUrl(url.to_string()));
            }
            return Ok(RemoteUrl::Local(PathBuf::from(path)));
        }

        if url.starts_with('/') || url.starts_with("./") || url.starts_with("../") {
            return Ok(RemoteUrl::Local(PathBuf::from(url)));
        }

        match url.split_once(':') {
            Some((target, _)) if !target.is_empty() && !target.contains('/') => {
                Ok(RemoteUrl::Rclone(url.to_string()))
            }
            _ => Err(Error::InvalidUrl(url.to_string())),
        }
    }
}
