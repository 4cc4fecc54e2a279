//! Git source ingestion for the Deploy Pipeline's source materialization step:
//! validating a project's remote URL, and cloning or fetching+checking-out
//! a ref into a release directory.

use std::env;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, bail};
use hostkit_types::{ErrorCode, HostKitError};

/// Rejects URLs that aren't plausibly a git remote before handing them to a
/// subprocess — `git clone` itself would reject these too, but failing fast
/// with a typed [`ErrorCode::InvalidGitUrl`] avoids a confusing subprocess
/// error for the common case of a pasted-wrong URL.
pub fn validate_git_url(url: &str) -> Result<(), HostKitError> {
    let looks_like_git_url = url.starts_with("git@")
        || url.starts_with("ssh://")
        || url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("git://");
    if url.trim().is_empty() || !looks_like_git_url {
        return Err(HostKitError::new(
            ErrorCode::InvalidGitUrl,
            format!("not a recognizable git remote URL: {url:?}"),
        ));
    }
    Ok(())
}

/// Clones `url` at `git_ref` into `dest_dir`, which must not already exist.
/// Used for a project's first deploy from a git source, and for any deploy
/// where the project has no existing git checkout to fetch into.
pub fn clone(url: &str, git_ref: &str, dest_dir: &Path) -> Result<()> {
    validate_git_url(url).map_err(|e| anyhow::anyhow!("{e}"))?;
    let output = Command::new(git_program())
        .args(["clone", "--branch", git_ref, "--depth", "1", url])
        .arg(dest_dir)
        .output()
        .context("failed to execute git clone; is git installed?")?;
    if !output.status.success() {
        bail!(
            "git clone failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Fetches and checks out `git_ref` in an existing checkout at `repo_root`,
/// used when a project redeploys from the same git source it was last
/// deployed from.
pub fn fetch_and_checkout(repo_root: &Path, git_ref: &str) -> Result<()> {
    let fetch = Command::new(git_program())
        .args(["fetch", "--depth", "1", "origin", git_ref])
        .current_dir(repo_root)
        .output()
        .context("failed to execute git fetch; is git installed?")?;
    if !fetch.status.success() {
        bail!(
            "git fetch failed: {}",
            String::from_utf8_lossy(&fetch.stderr).trim()
        );
    }

    let checkout = Command::new(git_program())
        .args(["checkout", "FETCH_HEAD"])
        .current_dir(repo_root)
        .output()
        .context("failed to execute git checkout")?;
    if !checkout.status.success() {
        bail!(
            "git checkout failed: {}",
            String::from_utf8_lossy(&checkout.stderr).trim()
        );
    }
    Ok(())
}

/// Returns the commit SHA currently checked out at `repo_root`.
pub fn current_commit(repo_root: &Path) -> Option<String> {
    let output = Command::new(git_program())
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output()
        .ok()?;
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        None
    }
}

pub fn is_git_clean(repo_root: &Path) -> Result<bool> {
    let out = Command::new(git_program())
        .args(["status", "--porcelain"])
        .current_dir(repo_root)
        .output()
        .context("failed to execute git status; is git installed?")?;
    if !out.status.success() {
        bail!(
            "git status failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().is_empty())
}

pub fn ensure_git_clean(repo_root: &Path) -> Result<()> {
    if !is_git_clean(repo_root)? {
        bail!("git working tree is not clean");
    }
    Ok(())
}

fn git_program() -> String {
    env::var("HOSTKIT_GIT_BIN").unwrap_or_else(|_| "git".to_string())
}
