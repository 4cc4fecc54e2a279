//! Filesystem Layout Manager: the on-disk tree HostKit maintains per project.
//!
//! ```text
//! <home_dir>/
//!   releases/<release_id>/       materialized source for one release
//!   app -> releases/<id>         symlink, atomically repointed on activate
//!   checkpoints/<label>.tar      tar archives written by hostkit-core
//!   shared/.env                  persistent env file, survives releases
//!   .hostkit/lock                advisory lock (see hostkit-lock)
//! ```
//!
//! Activation never mutates a live `app` symlink in place — it builds a
//! new symlink under a temp name and `rename`s it over, the same atomic-swap
//! idiom `hostkit-lock` uses for its lock file, so a reader never observes a
//! missing or half-written symlink.

use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

pub const RELEASES_DIR: &str = "releases";
pub const CHECKPOINTS_DIR: &str = "checkpoints";
pub const SHARED_DIR: &str = "shared";
pub const CURRENT_LINK: &str = "app";
pub const STATE_DIR: &str = ".hostkit";
pub const ENV_FILE: &str = ".env";

/// Paths into a single project's home directory tree.
pub struct ProjectLayout {
    home_dir: PathBuf,
}

impl ProjectLayout {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
        }
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn releases_dir(&self) -> PathBuf {
        self.home_dir.join(RELEASES_DIR)
    }

    pub fn release_dir(&self, release_id: &str) -> PathBuf {
        self.releases_dir().join(release_id)
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.home_dir.join(CHECKPOINTS_DIR)
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.home_dir.join(SHARED_DIR)
    }

    pub fn env_path(&self) -> PathBuf {
        self.shared_dir().join(ENV_FILE)
    }

    pub fn current_link(&self) -> PathBuf {
        self.home_dir.join(CURRENT_LINK)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.home_dir.join(STATE_DIR)
    }

    /// Creates the full directory skeleton for a brand-new project. Safe to
    /// call more than once — every directory is created with `create_dir_all`.
    pub fn provision(&self) -> Result<()> {
        for dir in [
            self.home_dir.clone(),
            self.releases_dir(),
            self.checkpoints_dir(),
            self.shared_dir(),
            self.state_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create directory {}", dir.display()))?;
        }
        if !self.env_path().exists() {
            fs::write(self.env_path(), "").with_context(|| {
                format!("failed to create empty env file {}", self.env_path().display())
            })?;
        }
        Ok(())
    }

    /// Creates `releases/<release_id>`, failing if it already exists — a
    /// release directory is written once and never reused.
    pub fn create_release_dir(&self, release_id: &str) -> Result<PathBuf> {
        let dir = self.release_dir(release_id);
        if dir.exists() {
            bail!("release directory already exists: {}", dir.display());
        }
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create release directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Atomically repoints `app` at `releases/<release_id>`.
    ///
    /// Builds the new symlink at a temp path under the project home (so the
    /// rename stays on the same filesystem) and renames it over `app` in
    /// one syscall — a reader can never observe `app` absent or pointing
    /// at a partially-built symlink.
    pub fn activate_release(&self, release_id: &str) -> Result<()> {
        let target = self.release_dir(release_id);
        if !target.is_dir() {
            bail!("cannot activate missing release directory {}", target.display());
        }

        let link_path = self.current_link();
        let tmp_link = self.home_dir.join(format!(".current.tmp.{}", std::process::id()));
        if tmp_link.exists() {
            fs::remove_file(&tmp_link).ok();
        }

        let relative_target = Path::new(RELEASES_DIR).join(release_id);
        unix_fs::symlink(&relative_target, &tmp_link).with_context(|| {
            format!(
                "failed to create temp symlink {} -> {}",
                tmp_link.display(),
                relative_target.display()
            )
        })?;

        fs::rename(&tmp_link, &link_path).with_context(|| {
            format!(
                "failed to activate release: rename {} -> {}",
                tmp_link.display(),
                link_path.display()
            )
        })?;
        Ok(())
    }

    /// Reads which release `app` points at, if any.
    pub fn current_release_id(&self) -> Result<Option<String>> {
        let link_path = self.current_link();
        if !link_path.exists() {
            return Ok(None);
        }
        let target = fs::read_link(&link_path)
            .with_context(|| format!("failed to read symlink {}", link_path.display()))?;
        let release_id = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(release_id)
    }

    /// Removes a release directory. Refuses to remove the currently-active
    /// release — callers must `activate_release` elsewhere first.
    pub fn remove_release_dir(&self, release_id: &str) -> Result<()> {
        if self.current_release_id()?.as_deref() == Some(release_id) {
            bail!("refusing to remove the currently active release: {release_id}");
        }
        let dir = self.release_dir(release_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("failed to remove release directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn read_env(&self) -> Result<String> {
        let path = self.env_path();
        fs::read_to_string(&path).with_context(|| format!("failed to read env file {}", path.display()))
    }

    /// Overwrites the shared env file atomically (`.tmp` + `rename`), the
    /// same pattern `hostkit-lock` uses for its lock file.
    pub fn write_env(&self, contents: &str) -> Result<()> {
        let path = self.env_path();
        fs::create_dir_all(self.shared_dir())
            .with_context(|| format!("failed to create shared dir {}", self.shared_dir().display()))?;
        let tmp_path = path.with_extension("env.tmp");
        fs::write(&tmp_path, contents)
            .with_context(|| format!("failed to write temp env file {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to activate env file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn provision_creates_full_skeleton() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path().join("blog"));
        layout.provision().expect("provision");

        assert!(layout.releases_dir().is_dir());
        assert!(layout.checkpoints_dir().is_dir());
        assert!(layout.shared_dir().is_dir());
        assert!(layout.state_dir().is_dir());
        assert!(layout.env_path().is_file());
    }

    #[test]
    fn create_release_dir_rejects_duplicate() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path());
        layout.provision().expect("provision");

        layout.create_release_dir("20260101-1").expect("first create");
        let result = layout.create_release_dir("20260101-1");
        assert!(result.is_err());
    }

    #[test]
    fn activate_release_points_current_at_target() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path());
        layout.provision().expect("provision");
        layout.create_release_dir("20260101-1").expect("create release");

        layout.activate_release("20260101-1").expect("activate");

        assert_eq!(
            layout.current_release_id().expect("current").as_deref(),
            Some("20260101-1")
        );
    }

    #[test]
    fn activate_release_can_be_repointed_without_leaving_dangling_link() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path());
        layout.provision().expect("provision");
        layout.create_release_dir("20260101-1").expect("create release 1");
        layout.create_release_dir("20260102-1").expect("create release 2");

        layout.activate_release("20260101-1").expect("activate 1");
        layout.activate_release("20260102-1").expect("activate 2");

        assert_eq!(
            layout.current_release_id().expect("current").as_deref(),
            Some("20260102-1")
        );
        assert!(layout.current_link().is_symlink());
    }

    #[test]
    fn activate_release_rejects_missing_directory() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path());
        layout.provision().expect("provision");

        let result = layout.activate_release("does-not-exist");
        assert!(result.is_err());
    }

    #[test]
    fn remove_release_dir_refuses_the_active_release() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path());
        layout.provision().expect("provision");
        layout.create_release_dir("20260101-1").expect("create");
        layout.activate_release("20260101-1").expect("activate");

        let result = layout.remove_release_dir("20260101-1");
        assert!(result.is_err());
        assert!(layout.release_dir("20260101-1").exists());
    }

    #[test]
    fn write_env_then_read_env_round_trips() {
        let td = tempdir().expect("tempdir");
        let layout = ProjectLayout::new(td.path());
        layout.provision().expect("provision");

        layout.write_env("DATABASE_URL=postgres://localhost/blog\n").expect("write env");
        let contents = layout.read_env().expect("read env");
        assert_eq!(contents, "DATABASE_URL=postgres://localhost/blog\n");
    }
}
