use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};

use serde::Deserialize;

use super::traits::{RemoteSnapshot, ARCHIVE_NAME, LISTING_NAME};
use crate::{
    error::{Error, Result},
    state::ArchiveHashes,
};

/// rclone exit code for "directory not found"
const EXIT_DIR_NOT_FOUND: i32 = 3;
/// rclone exit code for "file not found"
const EXIT_FILE_NOT_FOUND: i32 = 4;

/// One entry of `rclone lsjson` output
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    name: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    hashes: Option<ArchiveHashes>,
}

/// Remote snapshot stored wherever rclone can reach, driven through the
/// rclone CLI
#[derive(Debug, Clone)]
pub struct RcloneRemote {
    binary: PathBuf,
    flags: Vec<String>,
    /// rclone location, e.g. `gdrive:backups/project`
    location: String,
}

impl RcloneRemote {
    pub fn new(binary: impl Into<PathBuf>, flags: Vec<String>, location: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            flags,
            location: location.into(),
        }
    }

    /// Location of a file directly inside the remote directory
    fn object_path(&self, name: &str) -> String {
        if self.location.ends_with(':') || self.location.ends_with('/') {
            format!("{}{}", self.location, name)
        } else {
            format!("{}/{}", self.location, name)
        }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.flags).args(args).stdin(Stdio::null());
        cmd
    }

    fn run(&self, mut cmd: Command, command: &str) -> Result<Output> {
        tracing::debug!("Running {:?}", cmd);
        let output = cmd.output()?;
        tracing::trace!(
            "rclone {} exited with {}: {}",
            command,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(output)
    }
}

impl RemoteSnapshot for RcloneRemote {
    fn archive_hashes(&self) -> Result<Option<ArchiveHashes>> {
        let cmd = self.command(["lsjson", "--hash", "--files-only", self.location.as_str()]);
        let output = self.run(cmd, "lsjson")?;
        if is_not_found(&output) {
            return Ok(None);
        }
        check(&output, "lsjson")?;
        parse_archive_hashes(&String::from_utf8_lossy(&output.stdout))
    }

    fn fetch_archive(&self, dest_dir: &Path) -> Result<PathBuf> {
        let dest = dest_dir.join(ARCHIVE_NAME);
        let mut cmd = self.command(["copyto".to_string(), self.object_path(ARCHIVE_NAME)]);
        cmd.arg(&dest);
        let output = self.run(cmd, "copyto")?;
        check(&output, "copyto")?;
        Ok(dest)
    }

    fn upload(&self, staging_dir: &Path) -> Result<()> {
        let mut cmd = self.command(["sync"]);
        cmd.arg(staging_dir).arg(&self.location);
        let output = self.run(cmd, "sync")?;
        check(&output, "sync")
    }

    fn read_listing(&self) -> Result<Option<String>> {
        let cmd = self.command(["cat".to_string(), self.object_path(LISTING_NAME)]);
        let output = self.run(cmd, "cat")?;
        if is_not_found(&output) {
            return Ok(None);
        }
        check(&output, "cat")?;
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }
}

fn is_not_found(output: &Output) -> bool {
    matches!(
        output.status.code(),
        Some(EXIT_DIR_NOT_FOUND) | Some(EXIT_FILE_NOT_FOUND)
    )
}

fn check(output: &Output, command: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(Error::Rclone {
        command: command.to_string(),
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Pick the archive's hashes out of `rclone lsjson --hash` output
fn parse_archive_hashes(json: &str) -> Result<Option<ArchiveHashes>> {
    let entries: Vec<ListEntry> = serde_json::from_str(json)?;
    let Some(entry) = entries
        .into_iter()
        .find(|entry| !entry.is_dir && entry.name == ARCHIVE_NAME)
    else {
        return Ok(None);
    };

    let hashes: ArchiveHashes = entry
        .hashes
        .unwrap_or_default()
        .into_iter()
        .filter(|(_, digest)| !digest.is_empty())
        .map(|(algorithm, digest)| (algorithm.to_ascii_lowercase(), digest))
        .collect();
    if hashes.is_empty() {
        tracing::warn!(
            "Remote reports no hashes for {}; every fetch will re-download it",
            ARCHIVE_NAME
        );
    }
    Ok(Some(hashes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_archive_hashes() -> Result<()> {
        let json = r#"[
            {"Path":"refs","Name":"refs","Size":120,"MimeType":"application/octet-stream","ModTime":"2024-01-01T00:00:00Z","IsDir":false,"Hashes":{"md5":"111","sha1":"222"}},
            {"Path":"repo.tar.gz","Name":"repo.tar.gz","Size":4096,"MimeType":"application/gzip","ModTime":"2024-01-01T00:00:00Z","IsDir":false,"Hashes":{"MD5":"abc","sha1":"def","dropbox":""}}
        ]"#;
        let hashes = parse_archive_hashes(json)?.expect("archive listed");
        assert_eq!(hashes.get("md5").map(String::as_str), Some("abc"));
        assert_eq!(hashes.get("sha1").map(String::as_str), Some("def"));
        assert!(!hashes.contains_key("dropbox"));
        Ok(())
    }

    #[test]
    fn test_missing_archive_is_none() -> Result<()> {
        assert!(parse_archive_hashes("[]")?.is_none());
        let only_refs = r#"[{"Path":"refs","Name":"refs","IsDir":false}]"#;
        assert!(parse_archive_hashes(only_refs)?.is_none());
        Ok(())
    }

    #[test]
    fn test_archive_without_hashes() -> Result<()> {
        let json = r#"[{"Path":"repo.tar.gz","Name":"repo.tar.gz","IsDir":false}]"#;
        assert_eq!(parse_archive_hashes(json)?, Some(ArchiveHashes::new()));
        Ok(())
    }

    #[test]
    fn test_object_path() {
        let remote = |loc: &str| RcloneRemote::new("rclone", Vec::new(), loc);
        assert_eq!(remote("gdrive:").object_path("refs"), "gdrive:refs");
        assert_eq!(remote("gdrive:backup").object_path("refs"), "gdrive:backup/refs");
        assert_eq!(remote("s3:bucket/").object_path("refs"), "s3:bucket/refs");
    }

    #[test]
    fn test_missing_binary_is_io_error() {
        let remote = RcloneRemote::new("/nonexistent/rclone-binary", Vec::new(), "x:");
        assert!(matches!(remote.archive_hashes(), Err(Error::Io(_))));
    }
}
