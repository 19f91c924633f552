//! Keeps the local mirror and the remote snapshot in step.
//!
//! Two operations drive everything:
//! - [`SyncEngine::pull_if_stale`] refreshes the mirror when the remote
//!   archive changed since the last sync, and never discards a mirror whose
//!   remote copy disappeared.
//! - [`SyncEngine::push_if_changed`] integrates an incoming stream and
//!   uploads a new archive only when refs actually moved, retrying refs left
//!   over from a failed upload.

mod lock;

use std::{
    fs,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

pub use lock::{NoLock, SyncLock};

use crate::{
    archive::{Archiver, TarGzArchiver, MIRROR_ENTRY},
    error::Error,
    git::{changed_refs, render_listing, MirrorStore, RefState},
    progress::with_spinner,
    remote::{RemoteSnapshot, ARCHIVE_NAME, LISTING_NAME},
    state::{RetrySet, SyncStamp},
    workdir::WorkDir,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The stamp matches the remote archive; nothing transferred
    UpToDate,
    /// The remote holds no archive; the local mirror was left as is
    RemoteEmpty,
    /// The mirror was replaced by the remote archive
    Refreshed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// No ref moved and nothing was pending; no upload
    Unchanged,
    /// These refs are now present at the remote
    Uploaded(Vec<String>),
    /// Upload failed; these refs are recorded for the next push
    UploadFailed(Vec<String>),
}

impl PushOutcome {
    /// Refs confirmed present at the remote
    pub fn confirmed(&self) -> &[String] {
        match self {
            PushOutcome::Uploaded(refs) => refs,
            PushOutcome::Unchanged | PushOutcome::UploadFailed(_) => &[],
        }
    }
}

pub struct SyncEngine<R> {
    workdir: WorkDir,
    mirror: MirrorStore,
    remote: R,
    archiver: Box<dyn Archiver>,
    lock: Box<dyn SyncLock>,
    compact: bool,
}

impl<R: RemoteSnapshot> SyncEngine<R> {
    /// Set up the work directory and an engine with the default archiver,
    /// no lock and compaction enabled
    pub fn new(workdir: WorkDir, git_binary: impl Into<PathBuf>, remote: R) -> Result<Self> {
        workdir.ensure()?;
        let mirror = MirrorStore::new(git_binary, workdir.repo_dir());
        Ok(Self {
            workdir,
            mirror,
            remote,
            archiver: Box::new(TarGzArchiver::default()),
            lock: Box::new(NoLock),
            compact: true,
        })
    }

    pub fn with_archiver(mut self, archiver: impl Archiver + 'static) -> Self {
        self.archiver = Box::new(archiver);
        self
    }

    #[allow(dead_code)]
    pub fn with_lock(mut self, lock: impl SyncLock + 'static) -> Self {
        self.lock = Box::new(lock);
        self
    }

    pub fn with_compaction(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    #[cfg(test)]
    pub fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }

    #[cfg(test)]
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// The ref listing stored at the remote; empty when there is none
    pub fn remote_listing(&self) -> Result<String> {
        let listing = self
            .remote
            .read_listing()
            .context("Failed to read remote ref listing")?;
        Ok(listing.unwrap_or_default())
    }

    pub fn pull_if_stale(&self) -> Result<PullOutcome> {
        self.guarded(|| self.pull())
    }

    /// Integrate a fast-import stream into the mirror and upload a fresh
    /// snapshot if any ref changed
    pub fn push_if_changed<In: BufRead>(&self, input: &mut In) -> Result<PushOutcome> {
        self.guarded(|| self.push(input))
    }

    /// Stream `refs` out of the mirror, renamed into the private namespace
    pub fn export_refs<W: Write>(&self, refs: &[String], output: &mut W) -> Result<()> {
        if !self.mirror.exists() {
            return Err(Error::MissingMirror(self.workdir.repo_dir()).into());
        }
        self.mirror
            .export_stream(
                &self.workdir.rclone_marks(),
                &self.workdir.refspec(),
                refs,
                output,
            )
            .context("Failed to export refs from mirror")?;
        Ok(())
    }

    fn guarded<T>(&self, op: impl FnOnce() -> Result<T>) -> Result<T> {
        self.lock
            .acquire(&self.workdir)
            .context("Failed to acquire sync lock")?;
        let result = op();
        match (result, self.lock.release(&self.workdir)) {
            (result, Ok(())) => result,
            (Ok(_), Err(e)) => Err(e.context("Failed to release sync lock")),
            (Err(e), Err(release)) => {
                tracing::warn!("Failed to release sync lock: {:#}", release);
                Err(e)
            }
        }
    }

    fn pull(&self) -> Result<PullOutcome> {
        let stamp = self.workdir.load_stamp()?;
        let remote_hashes = self
            .remote
            .archive_hashes()
            .context("Failed to list remote archive")?;

        let Some(remote_hashes) = remote_hashes else {
            if stamp.is_some() {
                tracing::warn!(
                    "Remote archive disappeared; keeping local mirror {:?} as the only copy",
                    self.workdir.repo_dir()
                );
                self.workdir.clear_stamp()?;
            }
            return Ok(PullOutcome::RemoteEmpty);
        };

        if let Some(stamp) = &stamp {
            if stamp.matches(&remote_hashes) {
                tracing::debug!("Mirror is up to date with remote archive");
                return Ok(PullOutcome::UpToDate);
            }
        }

        tracing::info!("Remote archive changed, refreshing local mirror");
        let staging = self.workdir.reset_sync_dir()?;
        let archive = with_spinner("Downloading remote archive", || {
            self.remote.fetch_archive(&staging)
        })
        .context("Failed to download remote archive")?;

        let unpacked = staging.join("unpacked");
        with_spinner("Extracting remote archive", || {
            self.archiver.extract(&archive, &unpacked)
        })
        .context("Failed to extract remote archive")?;
        self.replace_mirror(&unpacked.join(MIRROR_ENTRY))?;

        self.workdir.discard_sync_dir()?;
        // Written last: a crash above leaves the old stamp (or none), which
        // forces another download instead of a false "up to date"
        self.workdir.save_stamp(&SyncStamp::new(remote_hashes))?;
        Ok(PullOutcome::Refreshed)
    }

    /// Swap a fully extracted repository into the mirror location
    fn replace_mirror(&self, extracted: &Path) -> Result<()> {
        let repo = self.workdir.repo_dir();
        if repo.exists() {
            fs::remove_dir_all(&repo)
                .with_context(|| format!("Failed to remove stale mirror {:?}", repo))?;
        }
        fs::rename(extracted, &repo)
            .with_context(|| format!("Failed to move extracted mirror into {:?}", repo))?;
        Ok(())
    }

    fn push<In: BufRead>(&self, input: &mut In) -> Result<PushOutcome> {
        if !self.mirror.exists() {
            self.mirror
                .create_bare()
                .context("Failed to create mirror repository")?;
        }

        let before = self.mirror.list_refs()?;
        let summary = self
            .mirror
            .import_stream(&self.workdir.rclone_marks(), input)
            .context("Failed to import stream into mirror")?;
        if !summary.done {
            tracing::warn!("Incoming stream ended without 'done'");
        }
        if !self.mirror.exists() {
            return Err(Error::MissingMirror(self.workdir.repo_dir()).into());
        }

        let after = self.mirror.list_refs()?;
        self.mirror.repair_head(&after)?;

        let mut updated = RetrySet::new(changed_refs(&before, &after));
        let leftover = self.workdir.load_retry()?;
        if !leftover.is_empty() {
            tracing::info!(
                "Retrying {} ref(s) left over from a failed upload",
                leftover.refs().len()
            );
        }
        updated.extend(leftover.into_refs());

        if updated.is_empty() {
            tracing::info!("No refs changed, skipping upload");
            return Ok(PushOutcome::Unchanged);
        }

        // Recorded before the upload starts; only a confirmed upload clears it
        self.workdir.save_retry(&updated)?;

        if self.compact {
            if let Err(e) = self.mirror.compact() {
                tracing::warn!("Repository compaction failed: {}", e);
            }
        }

        if let Err(e) = self.upload_snapshot(&after) {
            tracing::error!(
                "Upload failed, {} ref(s) will be retried on the next push: {:#}",
                updated.refs().len(),
                e
            );
            return Ok(PushOutcome::UploadFailed(updated.into_refs()));
        }

        if let Err(e) = self.workdir.clear_retry() {
            tracing::warn!("{:#}", e);
        }

        if let Err(e) = self.workdir.discard_sync_dir() {
            tracing::warn!("{:#}", e);
        }
        self.refresh_stamp();

        Ok(PushOutcome::Uploaded(updated.into_refs()))
    }

    fn upload_snapshot(&self, refs: &[RefState]) -> Result<()> {
        let staging = self.workdir.reset_sync_dir()?;

        with_spinner("Compressing mirror", || {
            self.archiver
                .compress(self.mirror.repo_dir(), &staging.join(ARCHIVE_NAME))
        })
        .context("Failed to compress mirror")?;

        let head = self.mirror.symbolic_head()?;
        let listing = render_listing(refs, head.as_deref());
        fs::write(staging.join(LISTING_NAME), listing).context("Failed to write ref listing")?;

        with_spinner("Uploading snapshot", || self.remote.upload(&staging))
            .context("Failed to upload snapshot")?;
        Ok(())
    }

    /// Record the hashes of the archive just uploaded. Best effort: without a
    /// stamp the next pull downloads the archive once more.
    fn refresh_stamp(&self) {
        let recorded = match self.remote.archive_hashes() {
            Ok(Some(hashes)) => self.workdir.save_stamp(&SyncStamp::new(hashes)),
            Ok(None) => Err(anyhow::anyhow!("uploaded archive is not listed at the remote")),
            Err(e) => Err(anyhow::Error::from(e).context("Failed to list remote archive")),
        };
        if let Err(e) = recorded {
            tracing::warn!("Could not record sync stamp: {:#}", e);
            if let Err(e) = self.workdir.clear_stamp() {
                tracing::warn!("{:#}", e);
            }
        }
    }
}
