//! Per-project advisory file lock guarding filesystem and systemd-unit
//! mutations.
//!
//! The lock file lives at `<project_home>/.hostkit/lock` and holds JSON
//! metadata about the holder (PID, hostname, timestamp, the operation in
//! progress). HostKit invocations are short-lived OS processes, not a
//! daemon, so this lock — not an in-process mutex — is what keeps two
//! concurrent `hostkit deploy` runs against the same project from
//! corrupting its release tree or unit files.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LOCK_FILE: &str = "lock";

/// Information stored in the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: DateTime<Utc>,
    /// Free-text description of the in-progress operation, e.g. `"deploy"`
    /// or `"rollback"`. Set after acquisition via [`LockFile::set_operation`].
    pub operation: Option<String>,
}

/// Lock file handle that releases automatically on drop.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    /// Acquires a lock in the given project state directory.
    ///
    /// Fails if a lock already exists and isn't stale. Use [`Self::is_locked`]
    /// first to check, or [`Self::acquire_with_timeout`] for automatic stale
    /// lock handling.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        let lock_path = state_dir.join(LOCK_FILE);

        fs::create_dir_all(state_dir)
            .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;

        if lock_path.exists() {
            let existing = Self::read_lock_info(state_dir)?;
            bail!(
                "lock already held by pid {} on {} since {} (operation: {:?})",
                existing.pid,
                existing.hostname,
                existing.acquired_at,
                existing.operation
            );
        }

        let info = LockInfo {
            pid: std::process::id(),
            hostname: gethostname::gethostname().to_string_lossy().to_string(),
            acquired_at: Utc::now(),
            operation: None,
        };

        write_lock_info(&lock_path, &info)?;

        Ok(Self {
            path: lock_path,
            file: None,
        })
    }

    /// Acquires a lock, removing a stale one (older than `timeout`) first.
    pub fn acquire_with_timeout(state_dir: &Path, timeout: Duration) -> Result<Self> {
        let lock_path = state_dir.join(LOCK_FILE);

        if lock_path.exists() {
            if let Ok(info) = Self::read_lock_info(state_dir) {
                let age = Utc::now() - info.acquired_at;
                if age.num_seconds().unsigned_abs() > timeout.as_secs() {
                    fs::remove_file(&lock_path).with_context(|| {
                        format!("failed to remove stale lock file {}", lock_path.display())
                    })?;
                } else {
                    bail!(
                        "lock already held by pid {} on {} since {} (age: {:?})",
                        info.pid,
                        info.hostname,
                        info.acquired_at,
                        age
                    );
                }
            } else {
                fs::remove_file(&lock_path).with_context(|| {
                    format!("failed to remove corrupt lock file {}", lock_path.display())
                })?;
            }
        }

        Self::acquire(state_dir)
    }

    pub fn release(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove lock file {}", self.path.display()))?;
        }
        self.file = None;
        Ok(())
    }

    /// Records which operation is holding the lock, for diagnostics when a
    /// stale lock is encountered later.
    pub fn set_operation(&self, operation: &str) -> Result<()> {
        if !self.path.exists() {
            bail!("lock file does not exist at {}", self.path.display());
        }
        let mut info = read_lock_info_from_path(&self.path)?;
        info.operation = Some(operation.to_string());
        write_lock_info(&self.path, &info)
    }

    pub fn is_locked(state_dir: &Path) -> Result<bool> {
        Ok(state_dir.join(LOCK_FILE).exists())
    }

    pub fn read_lock_info(state_dir: &Path) -> Result<LockInfo> {
        read_lock_info_from_path(&state_dir.join(LOCK_FILE))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn write_lock_info(lock_path: &Path, info: &LockInfo) -> Result<()> {
    let tmp_path = lock_path.with_extension("tmp");
    let json = serde_json::to_string_pretty(info).context("failed to serialize lock info")?;
    {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create lock tmp file {}", tmp_path.display()))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("failed to write lock tmp file {}", tmp_path.display()))?;
        file.sync_all().context("failed to sync lock file")?;
    }
    fs::rename(&tmp_path, lock_path)
        .with_context(|| format!("failed to rename lock file to {}", lock_path.display()))?;
    Ok(())
}

fn read_lock_info_from_path(path: &Path) -> Result<LockInfo> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read lock file {}", path.display()))?;
    let info: LockInfo = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lock JSON from {}", path.display()))?;
    Ok(info)
}

pub fn lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(LOCK_FILE)
}
