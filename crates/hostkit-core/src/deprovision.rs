//! Deprovisioning: the inverse of [`crate::provision::provision_project`].
//! Tears a project down in the order that keeps every step safe to retry —
//! services first (so nothing keeps running against a half-deleted
//! project), then the sudoers grant, then the filesystem, and only then the
//! store rows, which cascade-delete everything the project owned.

use std::path::Path;

use hostkit_store::{NewEvent, Store};
use hostkit_supervisor::UnitKind;
use hostkit_types::{ErrorCode, EventCategory, EventLevel, HostKitError, Project};

use crate::reporter::Reporter;
use crate::sudoers;

/// One unit that failed to stop/remove cleanly. Deprovisioning keeps going
/// past these — a stuck unit should never block reclaiming the rest of a
/// project.
pub struct DeprovisionReport {
    pub unit_errors: Vec<(String, String)>,
    pub linux_user_removed: bool,
}

/// Stops and removes every systemd unit the project owns (main, workers,
/// scheduled tasks), removes its sudoers drop-in, deletes its home
/// directory and Linux user, then deletes its store rows. Unit-removal
/// failures are collected rather than aborting — partial teardown is still
/// forward progress, and the caller can retry.
pub fn deprovision_project(
    store: &mut Store,
    unit_dir: &Path,
    sudoers_dir: &Path,
    project: &Project,
    reporter: &mut dyn Reporter,
) -> Result<DeprovisionReport, HostKitError> {
    reporter.info(&format!("deprovisioning {}", project.name));
    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Project,
        event_type: "deprovision_started".into(),
        level: EventLevel::Info,
        message: format!("deprovisioning {}", project.name),
        data: None,
        created_by: None,
    });

    let mut unit_errors = Vec::new();
    remove_unit_checked(unit_dir, project, UnitKind::Main, None, &mut unit_errors);

    let workers = store.list_workers(project.id).unwrap_or_default();
    for worker in &workers {
        remove_unit_checked(unit_dir, project, UnitKind::Worker, Some(worker.name.as_str()), &mut unit_errors);
    }

    let tasks = store.list_scheduled_tasks(project.id).unwrap_or_default();
    for task in &tasks {
        remove_unit_checked(unit_dir, project, UnitKind::Cron, Some(task.name.as_str()), &mut unit_errors);
        remove_unit_checked(unit_dir, project, UnitKind::CronTimer, Some(task.name.as_str()), &mut unit_errors);
    }

    let _ = hostkit_supervisor::reload_init_system();

    if let Err(e) = sudoers::remove_sudoers_dropin(sudoers_dir, &project.name) {
        unit_errors.push(("sudoers".to_string(), e.message));
    }

    let linux_user_removed = remove_linux_user(&project.linux_username);
    let _ = std::fs::remove_dir_all(&project.home_dir);

    store
        .delete_project(project.id)
        .map_err(|e| HostKitError::new(ErrorCode::DeprovisionFailed, format!("failed to delete project rows: {e}")))?;

    reporter.info(&format!("deprovisioned {}", project.name));

    Ok(DeprovisionReport {
        unit_errors,
        linux_user_removed,
    })
}

fn remove_unit_checked(
    unit_dir: &Path,
    project: &Project,
    kind: UnitKind,
    task_name: Option<&str>,
    errors: &mut Vec<(String, String)>,
) {
    let unit = hostkit_supervisor::unit_name(project, kind, task_name);
    let extension = if matches!(kind, UnitKind::CronTimer) { "timer" } else { "service" };
    if let Err(e) = hostkit_supervisor::remove_unit(unit_dir, &unit, extension) {
        errors.push((unit, e.message));
    }
}

fn remove_linux_user(username: &str) -> bool {
    hostkit_process::run_command_with_timeout("userdel", &["--remove", username], Path::new("/"), None)
        .map(|output| output.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit_store::NewProject;
    use hostkit_types::Runtime;
    use tempfile::tempdir;

    fn project() -> (Store, Project) {
        let store = Store::open_in_memory().expect("open store");
        let project = store
            .create_project(&NewProject {
                name: "blog".into(),
                runtime: Runtime::Python,
                linux_username: "blog".into(),
                home_dir: "/tmp/hostkit-deprovision-test-blog".into(),
                port: 4100,
            })
            .expect("create project");
        (store, project)
    }

    #[test]
    fn deprovision_removes_project_row_even_when_units_never_existed() {
        let (mut store, project) = project();
        let unit_dir = tempdir().expect("unit tempdir");
        let sudoers_dir = tempdir().expect("sudoers tempdir");

        let report = deprovision_project(
            &mut store,
            unit_dir.path(),
            sudoers_dir.path(),
            &project,
            &mut crate::reporter::NullReporter,
        )
        .expect("deprovision succeeds");

        assert!(report.unit_errors.is_empty());
        assert!(store.get_project(project.id).expect("lookup").is_none());
    }

    #[test]
    fn deprovision_removes_home_directory() {
        let (mut store, project) = project();
        std::fs::create_dir_all(&project.home_dir).expect("create home dir");
        let unit_dir = tempdir().expect("unit tempdir");
        let sudoers_dir = tempdir().expect("sudoers tempdir");

        deprovision_project(
            &mut store,
            unit_dir.path(),
            sudoers_dir.path(),
            &project,
            &mut crate::reporter::NullReporter,
        )
        .expect("deprovision succeeds");

        assert!(!Path::new(&project.home_dir).exists());
    }
}
