use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::state::{RetrySet, SyncStamp};

/// Namespace used both under `$GIT_DIR` and for the private fetch refs
pub const NAMESPACE: &str = "rclone";

/// Per-remote working directory: `$GIT_DIR/rclone/<label>`.
///
/// Every path the helper touches locally is derived from here:
/// - `repo/`          bare mirror repository
/// - `sync/`          scratch staging area for archive transfer
/// - `git.marks`      marks of the invoking git
/// - `rclone.marks`   marks of the mirror side
/// - `synced`         [`SyncStamp`] of the last synchronized archive
/// - `upload_failed`  [`RetrySet`] left by a failed upload
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: PathBuf,
    label: String,
}

impl WorkDir {
    pub fn new(git_dir: &Path, remote_label: &str) -> Self {
        let label = sanitize_label(remote_label);
        Self {
            root: git_dir.join(NAMESPACE).join(&label),
            label,
        }
    }

    /// Use `root` directly as the work directory
    #[cfg(test)]
    pub fn at(root: &Path, remote_label: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            label: sanitize_label(remote_label),
        }
    }

    /// Create the directory and empty mark files if missing
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create work directory {:?}", self.root))?;
        for marks in [self.git_marks(), self.rclone_marks()] {
            if !marks.exists() {
                fs::write(&marks, b"")
                    .with_context(|| format!("Failed to create marks file {:?}", marks))?;
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[cfg(test)]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Refspec mapping the remote's branches into the private namespace
    pub fn refspec(&self) -> String {
        format!("refs/heads/*:refs/{}/{}/*", NAMESPACE, self.label)
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.root.join("repo")
    }

    pub fn sync_dir(&self) -> PathBuf {
        self.root.join("sync")
    }

    pub fn git_marks(&self) -> PathBuf {
        self.root.join("git.marks")
    }

    pub fn rclone_marks(&self) -> PathBuf {
        self.root.join("rclone.marks")
    }

    fn stamp_path(&self) -> PathBuf {
        self.root.join("synced")
    }

    fn retry_path(&self) -> PathBuf {
        self.root.join("upload_failed")
    }

    /// Remove any leftover staging area and return a fresh, empty one
    pub fn reset_sync_dir(&self) -> Result<PathBuf> {
        let dir = self.sync_dir();
        self.discard_sync_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create staging area {:?}", dir))?;
        Ok(dir)
    }

    pub fn discard_sync_dir(&self) -> Result<()> {
        let dir = self.sync_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove staging area {:?}", dir))?;
        }
        Ok(())
    }

    pub fn load_stamp(&self) -> Result<Option<SyncStamp>> {
        load_yaml(&self.stamp_path())
    }

    pub fn save_stamp(&self, stamp: &SyncStamp) -> Result<()> {
        save_yaml(&self.stamp_path(), stamp)
    }

    pub fn clear_stamp(&self) -> Result<()> {
        remove_if_exists(&self.stamp_path())
    }

    /// Refs left by an upload that was not confirmed. The marker stays on
    /// disk until [`WorkDir::clear_retry`].
    pub fn load_retry(&self) -> Result<RetrySet> {
        Ok(load_yaml(&self.retry_path())?.unwrap_or_default())
    }

    pub fn save_retry(&self, set: &RetrySet) -> Result<()> {
        if set.is_empty() {
            return self.clear_retry();
        }
        save_yaml(&self.retry_path(), set)
    }

    pub fn clear_retry(&self) -> Result<()> {
        remove_if_exists(&self.retry_path())
    }
}

/// Reduce a remote label to something usable as a path component and ref
/// name. Git passes the URL itself when pushing to an unnamed remote.
fn sanitize_label(label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "_".to_string()
    } else {
        sanitized
    }
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let value =
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;
    Ok(Some(value))
}

/// Write through a temp file in the same directory, then rename into place
fn save_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{:?} has no parent directory", path))?;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {:?}", dir))?;

    let content = serde_yaml::to_string(value).context("Failed to serialize state")?;
    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
    temp.write_all(content.as_bytes())?;
    temp.persist(path)
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", path)),
    }
}
