use std::{
    collections::HashSet,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::traits::{RemoteSnapshot, ARCHIVE_NAME, LISTING_NAME};
use crate::{error::Result, state::ArchiveHashes};

/// Remote snapshot kept in a plain local directory
pub struct FilesystemRemote {
    base_path: PathBuf,
}

impl FilesystemRemote {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        FilesystemRemote {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    #[cfg(test)]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn archive_path(&self) -> PathBuf {
        self.base_path.join(ARCHIVE_NAME)
    }

    /// Compute SHA-1 and SHA-256 of a file in one pass
    fn compute_hashes(path: &Path) -> Result<ArchiveHashes> {
        let mut file = fs::File::open(path)?;
        let mut sha1 = Sha1::new();
        let mut sha256 = Sha256::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            sha1.update(&buffer[..read]);
            sha256.update(&buffer[..read]);
        }

        let mut hashes = ArchiveHashes::new();
        hashes.insert("sha1".to_string(), hex::encode(sha1.finalize()));
        hashes.insert("sha256".to_string(), hex::encode(sha256.finalize()));
        Ok(hashes)
    }
}

impl RemoteSnapshot for FilesystemRemote {
    fn archive_hashes(&self) -> Result<Option<ArchiveHashes>> {
        let path = self.archive_path();
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Self::compute_hashes(&path)?))
    }

    fn fetch_archive(&self, dest_dir: &Path) -> Result<PathBuf> {
        let dest = dest_dir.join(ARCHIVE_NAME);
        fs::copy(self.archive_path(), &dest)?;
        Ok(dest)
    }

    fn upload(&self, staging_dir: &Path) -> Result<()> {
        fs::create_dir_all(&self.base_path)?;

        let mut staged = HashSet::new();
        for entry in fs::read_dir(staging_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            // Copy next to the target, then rename, so readers never see a
            // half-written file
            let temp = self
                .base_path
                .join(format!(".{}.tmp", name.to_string_lossy()));
            fs::copy(entry.path(), &temp)?;
            fs::rename(&temp, self.base_path.join(&name))?;
            staged.insert(name);
        }

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if staged.contains(&entry.file_name()) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(entry.path())?;
            } else {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }

    fn read_listing(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.base_path.join(LISTING_NAME)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_empty_remote() -> Result<()> {
        let temp = TempDir::new()?;
        let remote = FilesystemRemote::new(temp.path().join("missing"));
        assert!(remote.archive_hashes()?.is_none());
        assert!(remote.read_listing()?.is_none());
        Ok(())
    }

    #[test]
    fn test_upload_mirrors_staging() -> Result<()> {
        let temp = TempDir::new()?;
        let staging = temp.path().join("staging");
        fs::create_dir_all(&staging)?;
        fs::write(staging.join(ARCHIVE_NAME), b"archive v1")?;
        fs::write(staging.join(LISTING_NAME), "abc refs/heads/main\n")?;

        let remote = FilesystemRemote::new(temp.path().join("remote"));
        fs::create_dir_all(remote.base_path())?;
        fs::write(remote.base_path().join("stale"), b"old")?;

        remote.upload(&staging)?;
        assert!(!remote.base_path().join("stale").exists());
        assert_eq!(remote.read_listing()?.as_deref(), Some("abc refs/heads/main\n"));

        let hashes = remote.archive_hashes()?.expect("archive uploaded");
        assert_eq!(
            hashes.get("sha256").map(String::as_str),
            Some(hex::encode(Sha256::digest(b"archive v1")).as_str())
        );
        assert!(hashes.contains_key("sha1"));

        let dest = temp.path().join("download");
        fs::create_dir_all(&dest)?;
        let fetched = remote.fetch_archive(&dest)?;
        assert_eq!(fs::read(fetched)?, b"archive v1");
        Ok(())
    }

    #[test]
    fn test_hashes_change_with_content() -> Result<()> {
        let temp = TempDir::new()?;
        let remote = FilesystemRemote::new(temp.path());
        fs::write(temp.path().join(ARCHIVE_NAME), b"one")?;
        let first = remote.archive_hashes()?;
        fs::write(temp.path().join(ARCHIVE_NAME), b"two")?;
        let second = remote.archive_hashes()?;
        assert_ne!(first, second);
        Ok(())
    }
}
