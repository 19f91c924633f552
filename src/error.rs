use std::{path::PathBuf, process::ExitStatus};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures reported by the collaborators (git, rclone, the archiver) and by
/// the protocol layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("git {command} failed ({status}): {stderr}")]
    Git {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("rclone {command} failed ({status}): {stderr}")]
    Rclone {
        command: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("mirror repository missing at {0:?}")]
    MissingMirror(PathBuf),

    #[error("invalid remote URL '{0}'")]
    InvalidUrl(String),
}
