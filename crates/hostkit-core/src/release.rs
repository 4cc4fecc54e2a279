//! Release Engine: materialized-copy releases under `releases/<id>/`, an
//! atomic `current` symlink switch, and retention cleanup.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use hostkit_fs::ProjectLayout;
use hostkit_store::{NewRelease, Store};
use hostkit_types::{ErrorCode, HostKitError, Project, Release, ReleaseSource};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const MAX_COLLISION_RETRIES: u32 = 5;
pub const DEFAULT_KEEP_RELEASES: usize = 5;

/// One-time conversion for a project whose `current` path predates the
/// Release Engine (a plain directory written to directly, not a symlink):
/// moves it into `releases/<timestamp>` and registers it as the current
/// release. A no-op for any project already on the release-based layout.
pub fn migrate_to_releases(
    store: &mut Store,
    layout: &ProjectLayout,
    project: &Project,
) -> anyhow::Result<Option<Release>> {
    let legacy = layout.current_link();
    let is_legacy_dir = std::fs::symlink_metadata(&legacy)
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_legacy_dir {
        return Ok(None);
    }

    let release_id = Utc::now().format(TIMESTAMP_FORMAT).to_string();
    let release_dir = layout.release_dir(&release_id);
    std::fs::create_dir_all(layout.releases_dir())
        .with_context(|| format!("failed to create releases dir for {}", project.name))?;
    std::fs::rename(&legacy, &release_dir)
        .with_context(|| format!("failed to migrate legacy directory for {}", project.name))?;

    let release = store.create_release(&NewRelease {
        project_id: project.id,
        release_id: release_id.clone(),
        release_path: release_dir.to_string_lossy().into_owned(),
        source: ReleaseSource::LocalPath {
            path: release_dir.to_string_lossy().into_owned(),
        },
    })?;
    layout
        .activate_release(&release_id)
        .with_context(|| format!("failed to activate migrated release for {}", project.name))?;
    store.activate_release(project.id, release.id)?;
    store
        .get_release(release.id)?
        .context("release vanished immediately after migration")
        .map(Some)
}

/// Creates a new, empty release directory and its store row. Timestamps
/// collide at most once a second; a collision is resolved by sleeping past
/// the current second and retrying, bounded by `MAX_COLLISION_RETRIES`.
pub fn create_release(
    store: &Store,
    layout: &ProjectLayout,
    project: &Project,
    source: &ReleaseSource,
) -> Result<Release, HostKitError> {
    let mut last_err = None;
    for attempt in 0..MAX_COLLISION_RETRIES {
        let release_id = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        match layout.create_release_dir(&release_id) {
            Ok(release_dir) => {
                return store
                    .create_release(&NewRelease {
                        project_id: project.id,
                        release_id,
                        release_path: release_dir.to_string_lossy().into_owned(),
                        source: source.clone(),
                    })
                    .map_err(|e| {
                        HostKitError::new(
                            ErrorCode::DeployFailed,
                            format!("failed to record release: {e}"),
                        )
                    });
            }
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 < MAX_COLLISION_RETRIES {
                    thread::sleep(Duration::from_millis(1100));
                }
            }
        }
    }
    Err(HostKitError::new(
        ErrorCode::DeployFailed,
        format!(
            "failed to create a release directory after {MAX_COLLISION_RETRIES} attempts: {}",
            last_err.expect("loop always sets last_err before exhausting retries")
        ),
    ))
}

/// Atomically switches `current` to `release` on disk, then in the store.
/// Ordering matters: if the store update fails after the symlink already
/// moved, the caller still has an accurate on-disk `current` and an
/// [`ErrorCode::ActivateFailed`] to act on, not a silently stale record.
pub fn activate_release(
    store: &mut Store,
    layout: &ProjectLayout,
    project: &Project,
    release: &Release,
) -> Result<(), HostKitError> {
    layout.activate_release(&release.release_id).map_err(|e| {
        HostKitError::new(
            ErrorCode::ActivateFailed,
            format!("failed to activate release {}: {e}", release.release_id),
        )
    })?;
    store
        .activate_release(project.id, release.id)
        .map_err(|e| {
            HostKitError::new(
                ErrorCode::ActivateFailed,
                format!(
                    "release {} switched on disk but the store update failed: {e}",
                    release.release_id
                ),
            )
        })
}

pub fn list_releases(
    store: &Store,
    project_id: i64,
    limit: Option<usize>,
) -> anyhow::Result<Vec<Release>> {
    let mut releases = store.list_releases(project_id)?;
    if let Some(limit) = limit {
        releases.truncate(limit);
    }
    Ok(releases)
}

/// The release immediately behind the current one, or `None` if there isn't
/// one (either nothing is current, or the current release is the oldest).
pub fn get_previous_release(store: &Store, project_id: i64) -> anyhow::Result<Option<Release>> {
    let releases = store.list_releases(project_id)?;
    let current_index = releases.iter().position(|r| r.is_current);
    Ok(current_index.and_then(|idx| releases.get(idx + 1).cloned()))
}

/// Records the checkpoint and/or env snapshot a release was deployed with,
/// consulted later by `full` rollback.
pub fn update_release_snapshot(
    store: &Store,
    release_id: i64,
    checkpoint_id: Option<i64>,
    env_snapshot: Option<&str>,
) -> anyhow::Result<()> {
    store.update_release_snapshot(release_id, checkpoint_id, env_snapshot)
}

/// Removes every release past the most recent `keep`, skipping the current
/// release even if it would otherwise fall outside the keep window. A
/// failure removing one release doesn't stop the others from being cleaned
/// up; every failure is collected and returned to the caller to log.
pub fn cleanup_old_releases(
    store: &Store,
    layout: &ProjectLayout,
    project_id: i64,
    keep: usize,
) -> Vec<(String, String)> {
    let releases = match store.list_releases(project_id) {
        Ok(r) => r,
        Err(e) => return vec![("list_releases".to_string(), e.to_string())],
    };

    let mut errors = Vec::new();
    for release in releases.into_iter().skip(keep) {
        if release.is_current {
            continue;
        }
        if let Err(e) = layout.remove_release_dir(&release.release_id) {
            errors.push((release.release_id.clone(), e.to_string()));
            continue;
        }
        if let Err(e) = store.delete_release(release.id) {
            errors.push((release.release_id, e.to_string()));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit_store::NewProject;
    use hostkit_types::Runtime;
    use tempfile::tempdir;

    fn project_with_layout() -> (Store, Project, ProjectLayout, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let store = Store::open_in_memory().expect("open store");
        let project = store
            .create_project(&NewProject {
                name: "blog".into(),
                runtime: Runtime::Python,
                linux_username: "blog".into(),
                home_dir: dir.path().to_string_lossy().into_owned(),
                port: 4100,
            })
            .expect("create project");
        let layout = ProjectLayout::new(dir.path());
        layout.provision().expect("provision layout");
        (store, project, layout, dir)
    }

    #[test]
    fn create_release_populates_store_and_disk() {
        let (store, project, layout, _dir) = project_with_layout();
        let release = create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/src".into() },
        )
        .expect("create release");
        assert!(layout.release_dir(&release.release_id).is_dir());
        assert!(!release.is_current);
    }

    #[test]
    fn activate_release_updates_symlink_and_store() {
        let (mut store, project, layout, _dir) = project_with_layout();
        let release = create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/src".into() },
        )
        .expect("create release");
        activate_release(&mut store, &layout, &project, &release).expect("activate");

        let current_id = layout.current_release_id().expect("current id");
        assert_eq!(current_id, Some(release.release_id.clone()));
        let stored = store.get_release(release.id).expect("get").expect("present");
        assert!(stored.is_current);
    }

    #[test]
    fn get_previous_release_skips_current() {
        let (mut store, project, layout, _dir) = project_with_layout();
        let first = create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/a".into() },
        )
        .expect("release 1");
        thread::sleep(Duration::from_millis(1100));
        let second = create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/b".into() },
        )
        .expect("release 2");
        activate_release(&mut store, &layout, &project, &first).expect("activate first");
        activate_release(&mut store, &layout, &project, &second).expect("activate second");

        let previous = get_previous_release(&store, project.id)
            .expect("previous")
            .expect("present");
        assert_eq!(previous.id, first.id);
    }

    #[test]
    fn cleanup_old_releases_keeps_current_and_recent() {
        let (mut store, project, layout, _dir) = project_with_layout();
        let mut releases = Vec::new();
        for _ in 0..3 {
            let release = create_release(
                &store,
                &layout,
                &project,
                &ReleaseSource::LocalPath { path: "/tmp/src".into() },
            )
            .expect("create release");
            releases.push(release);
            thread::sleep(Duration::from_millis(1100));
        }
        activate_release(&mut store, &layout, &project, &releases[0]).expect("activate oldest");

        let errors = cleanup_old_releases(&store, &layout, project.id, 1);
        assert!(errors.is_empty());

        let remaining = store.list_releases(project.id).expect("list");
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|r| r.is_current));
    }
}
