use std::{
    collections::BTreeSet,
    io::{self, BufRead, Read, Write},
};

use crate::error::{Error, Result};

/// What passed through [`relay`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    /// Refs named by `commit`, `reset` or `tag` commands
    pub refs: BTreeSet<String>,
    pub commits: usize,
    /// Whether the stream ended with an explicit `done`
    pub done: bool,
}

/// Copy a fast-import stream from `input` to `output`, stopping right after
/// the `done` command (or at end of input).
///
/// `data` payloads are copied byte-exactly, so payload content that looks
/// like a command is never interpreted. Anything after `done` is left unread
/// in `input`.
pub fn relay<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<StreamSummary> {
    let mut summary = StreamSummary::default();
    let mut line = Vec::new();

    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        output.write_all(&line)?;

        let text = String::from_utf8_lossy(&line);
        let command = text.trim_end_matches(['\n', '\r']);

        if command == "done" {
            summary.done = true;
            break;
        }

        if let Some(spec) = command.strip_prefix("data ") {
            copy_data(spec, input, output)?;
        } else if let Some(name) = command.strip_prefix("commit ") {
            summary.commits += 1;
            summary.refs.insert(name.to_string());
        } else if let Some(name) = command.strip_prefix("reset ") {
            summary.refs.insert(name.to_string());
        } else if let Some(name) = command.strip_prefix("tag ") {
            summary.refs.insert(format!("refs/tags/{}", name));
        }
    }

    output.flush()?;
    Ok(summary)
}

/// Copy the payload of a `data` command, either `<count>` bytes or a
/// `<<delimiter` block
fn copy_data<R: BufRead, W: Write>(spec: &str, input: &mut R, output: &mut W) -> Result<()> {
    if let Some(delimiter) = spec.strip_prefix("<<") {
        let mut line = Vec::new();
        loop {
            line.clear();
            if input.read_until(b'\n', &mut line)? == 0 {
                return Err(Error::Parse(format!(
                    "stream ended inside data block delimited by '{}'",
                    delimiter
                )));
            }
            output.write_all(&line)?;
            if line.strip_suffix(b"\n").unwrap_or(&line) == delimiter.as_bytes() {
                return Ok(());
            }
        }
    }

    let size: u64 = spec
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("invalid data size '{}'", spec)))?;
    let copied = io::copy(&mut input.by_ref().take(size), output)?;
    if copied != size {
        return Err(Error::Parse(format!(
            "stream ended after {} of {} data bytes",
            copied, size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_stops_after_done() -> Result<()> {
        let stream = b"commit refs/heads/main\nmark :1\ndata 3\nabc\ndone\nlist\n";
        let mut input = Cursor::new(&stream[..]);
        let mut output = Vec::new();

        let summary = relay(&mut input, &mut output)?;
        assert!(summary.done);
        assert_eq!(summary.commits, 1);
        assert!(summary.refs.contains("refs/heads/main"));
        assert_eq!(output, b"commit refs/heads/main\nmark :1\ndata 3\nabc\ndone\n");

        let mut rest = String::new();
        input.read_to_string(&mut rest)?;
        assert_eq!(rest, "list\n");
        Ok(())
    }

    #[test]
    fn test_payload_is_not_interpreted() -> Result<()> {
        let payload = b"done\n\x00\xffcommit x\n";
        let mut stream = format!("data {}\n", payload.len()).into_bytes();
        stream.extend_from_slice(payload);
        stream.extend_from_slice(b"\nreset refs/heads/dev\ndone\n");

        let mut output = Vec::new();
        let summary = relay(&mut Cursor::new(&stream[..]), &mut output)?;
        assert_eq!(output, stream);
        assert_eq!(summary.commits, 0);
        assert_eq!(summary.refs.iter().collect::<Vec<_>>(), ["refs/heads/dev"]);
        Ok(())
    }

    #[test]
    fn test_delimited_data() -> Result<()> {
        let stream = b"tag v1\ndata <<EOT\ndone\nEOT\ndone\n";
        let mut output = Vec::new();
        let summary = relay(&mut Cursor::new(&stream[..]), &mut output)?;
        assert!(summary.done);
        assert!(summary.refs.contains("refs/tags/v1"));
        assert_eq!(output, stream);
        Ok(())
    }

    #[test]
    fn test_end_of_input_without_done() -> Result<()> {
        let mut output = Vec::new();
        let summary = relay(&mut Cursor::new(&b"progress hi\n"[..]), &mut output)?;
        assert!(!summary.done);
        assert_eq!(output, b"progress hi\n");
        Ok(())
    }

    #[test]
    fn test_truncated_payload_fails() {
        let mut output = Vec::new();
        let result = relay(&mut Cursor::new(&b"data 10\nabc"[..]), &mut output);
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
