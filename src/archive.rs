use std::{fs::File, io::BufReader, path::Path};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::error::{Error, Result};

/// Name of the single top-level entry holding the mirror inside an archive
pub const MIRROR_ENTRY: &str = "repo";

/// Packs a directory into a single-file archive and back
pub trait Archiver {
    /// Write `src_dir` into `archive` under [`MIRROR_ENTRY`]
    fn compress(&self, src_dir: &Path, archive: &Path) -> Result<()>;

    /// Unpack `archive` into `dest_dir`, which must not exist yet
    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()>;
}

/// gzip-compressed tar
#[derive(Debug, Clone, Copy)]
pub struct TarGzArchiver {
    level: Compression,
}

impl TarGzArchiver {
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Default for TarGzArchiver {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Archiver for TarGzArchiver {
    fn compress(&self, src_dir: &Path, archive: &Path) -> Result<()> {
        let file = File::create(archive)?;
        let mut builder = tar::Builder::new(GzEncoder::new(file, self.level));
        builder.follow_symlinks(false);
        builder.append_dir_all(MIRROR_ENTRY, src_dir)?;
        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;

        tracing::debug!(
            "Compressed {:?} into {:?} ({} bytes)",
            src_dir,
            archive,
            file.metadata().map(|m| m.len()).unwrap_or(0)
        );
        Ok(())
    }

    fn extract(&self, archive: &Path, dest_dir: &Path) -> Result<()> {
        if dest_dir.exists() {
            return Err(Error::Archive(format!(
                "extraction target {:?} already exists",
                dest_dir
            )));
        }
        std::fs::create_dir_all(dest_dir)?;

        let file = BufReader::new(File::open(archive)?);
        let mut unpacker = tar::Archive::new(GzDecoder::new(file));
        unpacker.set_preserve_permissions(true);
        unpacker.unpack(dest_dir).map_err(|e| {
            Error::Archive(format!("failed to unpack {:?}: {}", archive, e))
        })?;

        if !dest_dir.join(MIRROR_ENTRY).is_dir() {
            return Err(Error::Archive(format!(
                "{:?} does not contain a '{}' directory",
                archive, MIRROR_ENTRY
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_compress_and_extract_tree() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("mirror");
        fs::create_dir_all(src.join("objects/ab"))?;
        fs::write(src.join("HEAD"), "ref: refs/heads/main\n")?;
        fs::write(src.join("objects/ab/cdef"), [0u8, 1, 2, 255])?;

        let archive = temp.path().join("repo.tar.gz");
        let archiver = TarGzArchiver::new(9);
        archiver.compress(&src, &archive)?;
        assert!(archive.is_file());

        let dest = temp.path().join("unpacked");
        archiver.extract(&archive, &dest)?;
        let repo = dest.join(MIRROR_ENTRY);
        assert_eq!(fs::read_to_string(repo.join("HEAD"))?, "ref: refs/heads/main\n");
        assert_eq!(fs::read(repo.join("objects/ab/cdef"))?, vec![0u8, 1, 2, 255]);
        Ok(())
    }

    #[test]
    fn test_extract_refuses_existing_target() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let src = temp.path().join("mirror");
        fs::create_dir_all(&src)?;
        let archive = temp.path().join("repo.tar.gz");
        let archiver = TarGzArchiver::default();
        archiver.compress(&src, &archive)?;

        let result = archiver.extract(&archive, temp.path());
        assert!(matches!(result, Err(Error::Archive(_))));
        Ok(())
    }

    #[test]
    fn test_extract_rejects_garbage() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let archive = temp.path().join("repo.tar.gz");
        fs::write(&archive, b"not an archive")?;
        let result = TarGzArchiver::default().extract(&archive, &temp.path().join("out"));
        assert!(result.is_err());
        Ok(())
    }
}
