use std::io::Write;

use anyhow::Result;

use crate::workdir::WorkDir;

/// Handle the capabilities command
/// Advertise fast-import based transport with persistent marks
pub fn handle<W: Write>(workdir: &WorkDir, output: &mut W) -> Result<()> {
    let marks = workdir.git_marks();

    writeln!(output, "import")?;
    writeln!(output, "export")?;
    writeln!(output, "refspec {}", workdir.refspec())?;
    // '*' marks capabilities git may ignore
    writeln!(output, "*import-marks {}", marks.display())?;
    writeln!(output, "*export-marks {}", marks.display())?;
    writeln!(output, "signed-tags")?;
    writeln!(output)?; // Empty line signals completion

    Ok(())
}
