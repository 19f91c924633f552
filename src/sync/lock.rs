use anyhow::Result;

use crate::workdir::WorkDir;

/// Hook around every pull and push against one remote.
///
/// Nothing prevents two invocations from pushing to the same remote at once;
/// a racing pair can leave the remote archive inconsistent. An implementation
/// of this trait (an advisory lock file, a lock object at the remote) is the
/// place to close that gap.
pub trait SyncLock {
    fn acquire(&self, workdir: &WorkDir) -> Result<()>;

    /// Called after the guarded operation, whether it succeeded or not
    fn release(&self, workdir: &WorkDir) -> Result<()>;
}

/// No mutual exclusion at all
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl SyncLock for NoLock {
    fn acquire(&self, _workdir: &WorkDir) -> Result<()> {
        Ok(())
    }

    fn release(&self, _workdir: &WorkDir) -> Result<()> {
        Ok(())
    }
}
