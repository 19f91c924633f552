use std::{
    ffi::OsStr,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use super::{
    refs::{parse_for_each_ref, RefState},
    stream::{relay, StreamSummary},
};
use crate::error::{Error, Result};

/// The bare mirror repository inside the work directory.
///
/// Every git invocation is pinned to the mirror with `--git-dir`, and the
/// `GIT_DIR`/`GIT_WORK_TREE` the invoking git exported are stripped, so the
/// caller's repository is never touched.
#[derive(Debug, Clone)]
pub struct MirrorStore {
    git_binary: PathBuf,
    repo_dir: PathBuf,
}

impl MirrorStore {
    pub fn new(git_binary: impl Into<PathBuf>, repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_binary: git_binary.into(),
            repo_dir: repo_dir.into(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    pub fn exists(&self) -> bool {
        self.repo_dir.is_dir()
    }

    pub fn create_bare(&self) -> Result<()> {
        tracing::info!("Creating mirror repository at {:?}", self.repo_dir);
        let mut cmd = self.base_command();
        cmd.arg("init").arg("--bare").arg("--quiet").arg(&self.repo_dir);
        run(cmd, "init")?;
        Ok(())
    }

    /// All refs in for-each-ref order; empty when the mirror does not exist
    pub fn list_refs(&self) -> Result<Vec<RefState>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let mut cmd = self.git();
        cmd.arg("for-each-ref")
            .arg("--format=%(objectname) %(refname)");
        let stdout = run(cmd, "for-each-ref")?;
        parse_for_each_ref(&String::from_utf8_lossy(&stdout))
    }

    /// Target of the symbolic HEAD, if the mirror exists and HEAD is symbolic
    pub fn symbolic_head(&self) -> Result<Option<String>> {
        if !self.exists() {
            return Ok(None);
        }
        let mut cmd = self.git();
        cmd.arg("symbolic-ref").arg("--quiet").arg("HEAD");
        let output = cmd.output()?;
        if !output.status.success() {
            return Ok(None);
        }
        let target = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!target.is_empty()).then_some(target))
    }

    pub fn set_symbolic_head(&self, target: &str) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("symbolic-ref").arg("HEAD").arg(target);
        run(cmd, "symbolic-ref")?;
        Ok(())
    }

    /// Point a dangling HEAD at an existing branch: `main`, then `master`,
    /// then the first branch listed
    pub fn repair_head(&self, refs: &[RefState]) -> Result<()> {
        let head = self.symbolic_head()?;
        if head
            .as_deref()
            .is_some_and(|target| refs.iter().any(|r| r.name == target))
        {
            return Ok(());
        }

        let branches: Vec<&str> = refs
            .iter()
            .map(|r| r.name.as_str())
            .filter(|name| name.starts_with("refs/heads/"))
            .collect();
        let candidate = ["refs/heads/main", "refs/heads/master"]
            .into_iter()
            .find(|name| branches.contains(name))
            .or_else(|| branches.first().copied());

        if let Some(target) = candidate {
            tracing::debug!("Repointing mirror HEAD from {:?} to {}", head, target);
            self.set_symbolic_head(target)?;
        }
        Ok(())
    }

    /// Feed a fast-import stream into the mirror, reusing and extending `marks`
    pub fn import_stream<R: BufRead>(&self, marks: &Path, input: &mut R) -> Result<StreamSummary> {
        let mut cmd = self.git();
        cmd.arg("fast-import")
            .arg("--quiet")
            .arg(flag("--import-marks-if-exists", marks))
            .arg(flag("--export-marks", marks))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let relayed = match child.stdin.take() {
            Some(mut stdin) => relay(input, &mut stdin),
            None => Err(Error::Io(io::Error::other("fast-import stdin unavailable"))),
        };
        // stdin is closed at this point, so fast-import can finish
        let output = child.wait_with_output()?;
        check(&output, "fast-import")?;
        let summary = relayed?;

        tracing::debug!(
            "fast-import consumed {} commit(s) touching {:?}",
            summary.commits,
            summary.refs
        );
        Ok(summary)
    }

    /// Write a fast-export stream of `refs` to `output`, rewriting ref names
    /// with `refspec`
    pub fn export_stream<W: Write>(
        &self,
        marks: &Path,
        refspec: &str,
        refs: &[String],
        output: &mut W,
    ) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("fast-export")
            .arg(flag("--import-marks", marks))
            .arg(flag("--export-marks", marks))
            .arg("--refspec")
            .arg(refspec)
            .arg("--signed-tags=verbatim")
            .args(refs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            // Not captured: nothing drains it while stdout is being copied
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, output).map_err(Error::from),
            None => Err(Error::Io(io::Error::other("fast-export stdout unavailable"))),
        };
        let result = child.wait_with_output()?;
        check(&result, "fast-export")?;
        let bytes = copied?;
        tracing::debug!("fast-export wrote {} bytes for {:?}", bytes, refs);
        Ok(())
    }

    /// Repository compaction
    pub fn compact(&self) -> Result<()> {
        let mut cmd = self.git();
        cmd.arg("gc").arg("--quiet");
        run(cmd, "gc")?;
        Ok(())
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.git_binary);
        cmd.env_remove("GIT_DIR").env_remove("GIT_WORK_TREE");
        cmd
    }

    fn git(&self) -> Command {
        let mut cmd = self.base_command();
        cmd.arg(flag("--git-dir", &self.repo_dir));
        cmd
    }
}

fn flag(name: &str, path: &Path) -> std::ffi::OsString {
    let mut arg = OsStr::new(name).to_os_string();
    arg.push("=");
    arg.push(path);
    arg
}

fn run(mut cmd: Command, command: &str) -> Result<Vec<u8>> {
    tracing::trace!("Running {:?}", cmd);
    let output = cmd.stdin(Stdio::null()).output()?;
    check(&output, command)?;
    Ok(output.stdout)
}

fn check(output: &std::process::Output, command: &str) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    Err(Error::Git {
        command: command.to_string(),
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
