use std::io::Write;

use anyhow::Result;

use crate::{remote::RemoteSnapshot, sync::SyncEngine};

/// Handle a batch of import commands (fetch)
/// Refresh the mirror if needed, then write a fast-import stream of the
/// requested refs to stdout
pub fn handle<R: RemoteSnapshot, W: Write>(
    engine: &SyncEngine<R>,
    output: &mut W,
    refs: &[String],
) -> Result<()> {
    tracing::info!("Import requested for refs: {:?}", refs);

    engine.pull_if_stale()?;

    let marks = engine.workdir().git_marks();
    writeln!(output, "feature import-marks={}", marks.display())?;
    writeln!(output, "feature export-marks={}", marks.display())?;
    writeln!(output, "feature done")?;

    engine.export_refs(refs, output)?;

    // 'done' ends the fast-import stream
    writeln!(output, "done")?;

    Ok(())
}
