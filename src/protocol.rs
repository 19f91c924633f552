use std::io::{BufRead, Write};

use anyhow::Result;

use crate::{commands, error::Error, remote::RemoteSnapshot, sync::SyncEngine};

/// Main protocol handler - reads commands from `input` and dispatches them
/// until end of input or a blank line
pub fn handle_commands<R, In, Out>(
    engine: &SyncEngine<R>,
    input: &mut In,
    output: &mut Out,
) -> Result<()>
where
    R: RemoteSnapshot,
    In: BufRead,
    Out: Write,
{
    while let Some(line) = read_line(input)? {
        if line.is_empty() {
            // Empty line ends the session
            break;
        }

        tracing::debug!("Received command: {}", line);

        let (command, argument) = match line.split_once(' ') {
            Some((command, argument)) => (command, Some(argument)),
            None => (line.as_str(), None),
        };

        match (command, argument) {
            ("capabilities", None) => {
                commands::capabilities::handle(engine.workdir(), output)?;
            }
            ("list", None) | ("list", Some("for-push")) => {
                commands::list::handle(engine, output)?;
            }
            ("import", Some(refname)) => {
                let mut refs = vec![refname.to_string()];
                refs.extend(read_import_batch(input)?);
                commands::import::handle(engine, output, &refs)?;
            }
            ("export", None) => {
                commands::export::handle(engine, output, input)?;
            }
            _ => {
                tracing::error!("Unknown command: {}", line);
                return Err(Error::Protocol(format!("unknown command '{}'", line)).into());
            }
        }

        output.flush()?;
    }

    Ok(())
}

/// Read one line without its terminator; `None` at end of input
fn read_line<R: BufRead>(input: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()))
}

/// Read the remaining `import <ref>` lines of a batch, up to the blank line
fn read_import_batch<R: BufRead>(input: &mut R) -> Result<Vec<String>> {
    let mut refs = Vec::new();

    while let Some(line) = read_line(input)? {
        if line.is_empty() {
            break;
        }
        match line.strip_prefix("import ") {
            Some(refname) if !refname.is_empty() => refs.push(refname.to_string()),
            _ => {
                tracing::error!("Unexpected line in import batch: {}", line);
                return Err(
                    Error::Protocol(format!("unexpected '{}' in import batch", line)).into(),
                );
            }
        }
    }

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        git::{commit_block, commit_stream},
        remote::FilesystemRemote,
        workdir::WorkDir,
    };

    fn engine(temp: &TempDir, name: &str) -> Result<SyncEngine<FilesystemRemote>> {
        let workdir = WorkDir::at(&temp.path().join(name), "origin");
        let remote = FilesystemRemote::new(temp.path().join("remote"));
        Ok(SyncEngine::new(workdir, "git", remote)?.with_compaction(false))
    }

    fn run(engine: &SyncEngine<FilesystemRemote>, input: Vec<u8>) -> Result<String> {
        let mut output = Vec::new();
        handle_commands(engine, &mut Cursor::new(input), &mut output)?;
        Ok(String::from_utf8(output)?)
    }

    #[test]
    fn test_list_on_empty_remote() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = engine(&temp, "a")?;
        assert_eq!(run(&engine, b"list\n\n".to_vec())?, "\n");
        assert_eq!(run(&engine, b"list for-push\n".to_vec())?, "\n");
        Ok(())
    }

    #[test]
    fn test_unknown_command_is_fatal() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = engine(&temp, "a")?;
        let mut output = Vec::new();
        let err = handle_commands(
            &engine,
            &mut Cursor::new(b"option verbosity 1\nlist\n".to_vec()),
            &mut output,
        )
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Protocol(_))));
        assert!(output.is_empty());
        Ok(())
    }

    #[test]
    fn test_blank_line_ends_session() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = engine(&temp, "a")?;
        let output = run(&engine, b"\nbogus\n".to_vec())?;
        assert!(output.is_empty());
        Ok(())
    }

    #[test]
    fn test_export_then_list_and_import() -> Result<()> {
        let temp = TempDir::new()?;
        let writer = engine(&temp, "a")?;

        let mut input = b"export\n".to_vec();
        input.extend_from_slice(commit_block("refs/heads/main", "m").as_bytes());
        input.extend_from_slice(commit_block("refs/heads/dev", "d").as_bytes());
        input.extend_from_slice(b"done\n");
        input.extend_from_slice(b"\n");
        let output = run(&writer, input)?;
        assert_eq!(output, "ok refs/heads/dev\nok refs/heads/main\n\n");

        let reader = engine(&temp, "b")?;
        let listing = run(&reader, b"list\n".to_vec())?;
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with(" refs/heads/dev"));
        assert!(lines[1].ends_with(" refs/heads/main"));
        assert_eq!(lines[2], "@refs/heads/main HEAD");
        assert_eq!(lines[3], "");

        let output = run(&reader, b"import refs/heads/main\nimport refs/heads/dev\n\n".to_vec())?;
        let marks = reader.workdir().git_marks();
        assert!(output.starts_with(&format!(
            "feature import-marks={}\nfeature export-marks={}\nfeature done\n",
            marks.display(),
            marks.display()
        )));
        assert!(output.contains("commit refs/rclone/origin/main\n"));
        assert!(output.contains("commit refs/rclone/origin/dev\n"));
        assert!(output.ends_with("done\n"));
        Ok(())
    }

    #[test]
    fn test_noop_export_reports_nothing() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = engine(&temp, "a")?;
        run(&engine, [b"export\n".to_vec(), commit_stream("refs/heads/main", "m")].concat())?;

        let output = run(&engine, b"export\ndone\n".to_vec())?;
        assert_eq!(output, "\n");
        Ok(())
    }

    #[test]
    fn test_import_batch_rejects_other_commands() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = engine(&temp, "a")?;
        let mut output = Vec::new();
        let result = handle_commands(
            &engine,
            &mut Cursor::new(b"import refs/heads/main\nlist\n".to_vec()),
            &mut output,
        );
        assert!(result.is_err());
        Ok(())
    }
}
