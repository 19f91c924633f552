use std::io::Write;

use anyhow::Result;

use crate::{remote::RemoteSnapshot, sync::SyncEngine};

/// Handle the list command
/// Echo the ref listing stored next to the remote archive; no download
pub fn handle<R: RemoteSnapshot, W: Write>(engine: &SyncEngine<R>, output: &mut W) -> Result<()> {
    let listing = engine.remote_listing()?;
    tracing::debug!("Remote lists {} ref line(s)", listing.lines().count());

    output.write_all(listing.as_bytes())?;
    if !listing.is_empty() && !listing.ends_with('\n') {
        writeln!(output)?;
    }

    // Empty line signals completion
    writeln!(output)?;

    Ok(())
}
