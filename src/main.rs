#![deny(clippy::mod_module_files)]
use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod archive;
mod commands;
mod config;
mod error;
mod git;
mod progress;
mod protocol;
mod remote;
mod state;
mod sync;
mod workdir;

use archive::TarGzArchiver;
use config::HelperConfig;
use remote::{FilesystemRemote, RcloneRemote, RemoteSnapshot, RemoteUrl};
use state::ArchiveHashes;
use sync::SyncEngine;
use workdir::WorkDir;

/// Environment variable holding the tracing filter
const LOG_ENV: &str = "GIT_REMOTE_RCLONE_LOG";

/// Git remote helper that keeps a repository snapshot in rclone storage.
///
/// Invoked by git as `git-remote-rclone <remote> <url>` for remotes whose URL
/// starts with `rclone::` or `rclone://`.
#[derive(Parser, Debug)]
#[command(name = "git-remote-rclone", version)]
struct Cli {
    /// Name of the remote (e.g. "origin"), or the URL for anonymous remotes
    remote_label: String,
    /// Remote URL (e.g. "rclone::gdrive:backups/project")
    remote_url: String,
}

/// Wrapper enum for the supported snapshot backends
/// This allows the sync engine to be generic over one concrete type
enum Remote {
    Rclone(RcloneRemote),
    Filesystem(FilesystemRemote),
}

// Implement RemoteSnapshot for Remote by delegating to inner types
impl RemoteSnapshot for Remote {
    fn archive_hashes(&self) -> error::Result<Option<ArchiveHashes>> {
        match self {
            Remote::Rclone(r) => r.archive_hashes(),
            Remote::Filesystem(r) => r.archive_hashes(),
        }
    }

    fn fetch_archive(&self, dest_dir: &Path) -> error::Result<PathBuf> {
        match self {
            Remote::Rclone(r) => r.fetch_archive(dest_dir),
            Remote::Filesystem(r) => r.fetch_archive(dest_dir),
        }
    }

    fn upload(&self, staging_dir: &Path) -> error::Result<()> {
        match self {
            Remote::Rclone(r) => r.upload(staging_dir),
            Remote::Filesystem(r) => r.upload(staging_dir),
        }
    }

    fn read_listing(&self) -> error::Result<Option<String>> {
        match self {
            Remote::Rclone(r) => r.read_listing(),
            Remote::Filesystem(r) => r.read_listing(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HelperConfig::load()?;
    init_tracing(&config);

    // Git sets GIT_DIR for the helper process; all local state lives below it
    let git_dir = env::var_os("GIT_DIR")
        .map(PathBuf::from)
        .context("GIT_DIR is not set; git-remote-rclone must be run by git")?;
    // Mark file paths are handed to git, so they must not depend on cwd
    let git_dir = std::fs::canonicalize(&git_dir)
        .with_context(|| format!("GIT_DIR {:?} is not accessible", git_dir))?;

    let workdir = WorkDir::new(&git_dir, &cli.remote_label);
    tracing::debug!(
        "Remote '{}' -> '{}', state in {:?}",
        cli.remote_label,
        cli.remote_url,
        workdir.root()
    );

    let remote = match RemoteUrl::parse(&cli.remote_url)? {
        RemoteUrl::Rclone(location) => {
            tracing::info!("Using rclone location: {}", location);
            Remote::Rclone(RcloneRemote::new(
                &config.rclone_binary,
                config.rclone_flags.clone(),
                location,
            ))
        }
        RemoteUrl::Local(path) => {
            tracing::info!("Using local directory: {:?}", path);
            Remote::Filesystem(FilesystemRemote::new(path))
        }
    };

    let engine = SyncEngine::new(workdir, &config.git_binary, remote)?
        .with_archiver(TarGzArchiver::new(config.compression_level))
        .with_compaction(config.compact);

    let stdin = io::stdin();
    let stdout = io::stdout();
    protocol::handle_commands(&engine, &mut stdin.lock(), &mut stdout.lock())?;

    Ok(())
}

/// Logs go to stderr; stdout belongs to the protocol
fn init_tracing(config: &HelperConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .init();
}
