use std::io::{BufRead, Write};

use anyhow::Result;

use crate::{remote::RemoteSnapshot, sync::SyncEngine};

/// Handle the export command (push)
/// Feed git's fast-export stream into the mirror and upload the result
pub fn handle<R: RemoteSnapshot, W: Write, In: BufRead>(
    engine: &SyncEngine<R>,
    output: &mut W,
    input: &mut In,
) -> Result<()> {
    engine.pull_if_stale()?;

    let outcome = engine.push_if_changed(input)?;
    tracing::info!("Export finished: {:?}", outcome);

    // Report success only for refs the remote now holds
    for refname in outcome.confirmed() {
        writeln!(output, "ok {}", refname)?;
    }

    // Empty line signals completion
    writeln!(output)?;

    Ok(())
}
