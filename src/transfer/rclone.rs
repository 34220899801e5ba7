//! rclone-backed transfer engine
//!
//! Each pair gets a private rclone config with two remotes, `src` and `dst`,
//! written to a temporary file that lives exactly as long as the session.
//! Buckets are copied with `rclone copy --update`, never `rclone sync`, so
//! destination-only objects survive.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{TransferEngine, TransferOptions, TransferSession};
use crate::config::ConfigSource;
use crate::error::{Result, SyncError};
use crate::types::{BucketLocation, ProviderConfig, SyncPair};

/// Key naming the rclone binary
pub const RCLONE_BIN_KEY: &str = "SYNC_RCLONE_BIN";
const SOURCE_REMOTE: &str = "src";
const DESTINATION_REMOTE: &str = "dst";
/// Bytes of stderr kept in a transfer error
const STDERR_TAIL: usize = 2048;

/// Runs the `rclone` binary
#[derive(Debug, Clone)]
pub struct RcloneEngine {
    binary: PathBuf,
}

impl Default for RcloneEngine {
    fn default() -> Self {
        Self::new("rclone")
    }
}

impl RcloneEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Binary from `SYNC_RCLONE_BIN`, defaulting to `rclone` on `PATH`
    pub fn from_source(source: &dyn ConfigSource) -> Self {
        source
            .get(RCLONE_BIN_KEY)
            .map(|bin| Self::new(shellexpand::tilde(&bin).to_string()))
            .unwrap_or_default()
    }

    /// Write the pair's config file and return the owning session
    pub fn open(&self, pair: &SyncPair) -> Result<RcloneSession> {
        let mut config = tempfile::Builder::new()
            .prefix("bucketsync-")
            .suffix(".conf")
            .tempfile()?;
        config.write_all(render_config(pair).as_bytes())?;
        config.flush()?;

        debug!(
            "Opened transfer session for {} ({})",
            pair.id(),
            config.path().display()
        );

        Ok(RcloneSession {
            binary: self.binary.clone(),
            pair_id: pair.id(),
            config,
        })
    }
}

#[async_trait]
impl TransferEngine for RcloneEngine {
    async fn open_session(&self, pair: &SyncPair) -> Result<Box<dyn TransferSession>> {
        Ok(Box::new(self.open(pair)?))
    }
}

/// One pair's rclone config; the file is deleted on drop
#[derive(Debug)]
pub struct RcloneSession {
    binary: PathBuf,
    pair_id: String,
    config: NamedTempFile,
}

impl RcloneSession {
    pub fn config_path(&self) -> &Path {
        self.config.path()
    }
}

impl Drop for RcloneSession {
    fn drop(&mut self) {
        debug!("Releasing transfer session for {}", self.pair_id);
    }
}

#[async_trait]
impl TransferSession for RcloneSession {
    async fn sync(
        &self,
        source: &BucketLocation,
        destination: &BucketLocation,
        options: &TransferOptions,
    ) -> Result<()> {
        let args = copy_args(self.config.path(), source, destination, options);
        debug!("{} {:?}", self.binary.display(), args);

        // kill_on_drop: a pair that times out takes its child process with it
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SyncError::Transfer {
                bucket: source.bucket.clone(),
                message: format!("failed to run {}: {}", self.binary.display(), e),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if output.status.success() {
            if options.verbose && !stderr.trim().is_empty() {
                info!("{} -> {}: {}", source, destination, stderr.trim());
            }
            return Ok(());
        }

        warn!("rclone exited with {} for {}", output.status, source);
        Err(SyncError::Transfer {
            bucket: source.bucket.clone(),
            message: format!("{}: {}", output.status, tail(&stderr, STDERR_TAIL)),
        })
    }
}

/// rclone config with the pair's source as `src` and destination as `dst`
pub(crate) fn render_config(pair: &SyncPair) -> String {
    let mut out = String::new();
    for (remote, provider) in [
        (SOURCE_REMOTE, &pair.source),
        (DESTINATION_REMOTE, &pair.destination),
    ] {
        out.push_str(&render_remote(remote, provider));
    }
    out
}

fn render_remote(remote: &str, provider: &ProviderConfig) -> String {
    format!(
        "[{}]\ntype = s3\nprovider = Other\nenv_auth = false\naccess_key_id = {}\nsecret_access_key = {}\nendpoint = {}\nregion = {}\n\n",
        remote,
        provider.access_key().expose(),
        provider.secret_key().expose(),
        provider.endpoint(),
        provider.region(),
    )
}

/// Arguments of `rclone copy` for one bucket
pub(crate) fn copy_args(
    config: &Path,
    source: &BucketLocation,
    destination: &BucketLocation,
    options: &TransferOptions,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "copy".into(),
        format!("{}:{}", SOURCE_REMOTE, source.bucket).into(),
        format!("{}:{}", DESTINATION_REMOTE, destination.bucket).into(),
        "--config".into(),
        config.as_os_str().to_os_string(),
        "--transfers".into(),
        options.transfers.to_string().into(),
        "--checkers".into(),
        options.checkers.to_string().into(),
    ];
    if options.update_only() {
        args.push("--update".into());
    }
    if options.dry_run {
        args.push("--dry-run".into());
    }
    if options.verbose {
        args.push("-v".into());
    }
    args
}

fn tail(s: &str, max: usize) -> &str {
    let s = s.trim();
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
