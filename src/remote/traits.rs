use std::path::{Path, PathBuf};

use crate::{error::Result, state::ArchiveHashes};

/// File name of the compressed mirror at the remote
pub const ARCHIVE_NAME: &str = "repo.tar.gz";

/// File name of the plain-text ref listing at the remote
pub const LISTING_NAME: &str = "refs";

/// The remote location holding the archive and the ref listing.
///
/// "Nothing there yet" is not an error: it is reported as `None`.
pub trait RemoteSnapshot {
    /// Hashes of the stored archive, keyed by algorithm name
    fn archive_hashes(&self) -> Result<Option<ArchiveHashes>>;

    /// Download the archive into `dest_dir` and return its local path
    fn fetch_archive(&self, dest_dir: &Path) -> Result<PathBuf>;

    /// Make the remote hold exactly the files in `staging_dir`, removing
    /// anything else, in one transfer
    fn upload(&self, staging_dir: &Path) -> Result<()>;

    /// The stored ref listing
    fn read_listing(&self) -> Result<Option<String>>;
}
