//! Scheduled-Task Manager: cron-driven one-shot commands, rendered as a
//! paired systemd `.service`+`.timer` unit via `hostkit-supervisor`.

use std::path::Path;

use hostkit_store::{NewEvent, Store};
use hostkit_supervisor::{self, cron::cron_to_on_calendar, UnitKind, UnitParams};
use hostkit_types::{ErrorCode, EventCategory, EventLevel, HostKitError, Project, ResourceLimits, ScheduledTask};

pub struct ScheduledTaskSpec<'a> {
    pub name: &'a str,
    pub cron_expression: &'a str,
    pub command: &'a str,
}

/// Validates the cron expression, renders the unit+timer pair, and records
/// the task row. The task starts disabled on disk until [`enable`] is
/// called, matching how a newly-created worker or project unit behaves.
pub fn create_scheduled_task(
    store: &Store,
    unit_dir: &Path,
    project: &Project,
    spec: &ScheduledTaskSpec,
) -> Result<ScheduledTask, HostKitError> {
    let on_calendar = cron_to_on_calendar(spec.cron_expression)?;

    let params = UnitParams {
        description: format!("{} scheduled task: {}", project.name, spec.name),
        working_dir: project.home_dir.clone(),
        exec_start: spec.command.to_string(),
        user: project.linux_username.clone(),
        env_file: None,
        resource_limits: ResourceLimits::default(),
        on_calendar: Some(on_calendar),
    };
    hostkit_supervisor::render_unit(unit_dir, project, UnitKind::Cron, Some(spec.name), &params)?;
    hostkit_supervisor::render_unit(unit_dir, project, UnitKind::CronTimer, Some(spec.name), &params)?;
    hostkit_supervisor::reload_init_system()?;

    let task = store
        .create_scheduled_task(project.id, spec.name, spec.cron_expression, spec.command)
        .map_err(|e| HostKitError::new(ErrorCode::DeployFailed, format!("failed to record scheduled task: {e}")))?;

    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Cron,
        event_type: "created".into(),
        level: EventLevel::Info,
        message: format!("scheduled task {} created for {}", spec.name, project.name),
        data: None,
        created_by: None,
    });

    Ok(task)
}

pub fn list_scheduled_tasks(store: &Store, project_id: i64) -> anyhow::Result<Vec<ScheduledTask>> {
    store.list_scheduled_tasks(project_id)
}

pub fn enable_scheduled_task(store: &Store, project: &Project, task: &ScheduledTask) -> Result<(), HostKitError> {
    let timer = hostkit_supervisor::unit_name(project, UnitKind::CronTimer, Some(&task.name));
    hostkit_supervisor::enable(&timer)?;
    hostkit_supervisor::start(&timer)?;
    store
        .set_scheduled_task_enabled(task.id, true)
        .map_err(|e| HostKitError::new(ErrorCode::SystemdError, e.to_string()))?;
    emit_task_event(store, project, task, "enabled");
    Ok(())
}

pub fn disable_scheduled_task(store: &Store, project: &Project, task: &ScheduledTask) -> Result<(), HostKitError> {
    let timer = hostkit_supervisor::unit_name(project, UnitKind::CronTimer, Some(&task.name));
    hostkit_supervisor::stop(&timer)?;
    hostkit_supervisor::disable(&timer)?;
    store
        .set_scheduled_task_enabled(task.id, false)
        .map_err(|e| HostKitError::new(ErrorCode::SystemdError, e.to_string()))?;
    emit_task_event(store, project, task, "disabled");
    Ok(())
}

pub fn delete_scheduled_task(store: &Store, project: &Project, task: &ScheduledTask) -> Result<(), HostKitError> {
    let timer = hostkit_supervisor::unit_name(project, UnitKind::CronTimer, Some(&task.name));
    let _ = hostkit_supervisor::stop(&timer);
    let _ = hostkit_supervisor::disable(&timer);
    store
        .delete_scheduled_task(task.id)
        .map_err(|e| HostKitError::new(ErrorCode::SystemdError, e.to_string()))?;
    emit_task_event(store, project, task, "deleted");
    Ok(())
}

fn emit_task_event(store: &Store, project: &Project, task: &ScheduledTask, event_type: &str) {
    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Cron,
        event_type: event_type.to_string(),
        level: EventLevel::Info,
        message: format!("scheduled task {} {event_type} for {}", task.name, project.name),
        data: None,
        created_by: None,
    });
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
                home_dir: "/home/blog".into(),
                port: 4100,
            })
            .expect("create project");
        (store, project)
    }

    #[test]
    fn create_scheduled_task_rejects_invalid_cron() {
        let (store, project) = project();
        let dir = tempdir().expect("tempdir");
        let err = create_scheduled_task(
            &store,
            dir.path(),
            &project,
            &ScheduledTaskSpec {
                name: "nightly-digest",
                cron_expression: "not a cron expression",
                command: "/usr/bin/digest.sh",
            },
        )
        .expect_err("invalid cron rejected");
        assert_eq!(err.code, ErrorCode::InvalidCronExpression);
    }

    #[test]
    fn create_scheduled_task_records_row_and_renders_units() {
        let (store, project) = project();
        let dir = tempdir().expect("tempdir");
        let task = create_scheduled_task(
            &store,
            dir.path(),
            &project,
            &ScheduledTaskSpec {
                name: "nightly-digest",
                cron_expression: "0 3 * * *",
                command: "/usr/bin/digest.sh",
            },
        )
        .expect("create task");

        assert_eq!(task.name, "nightly-digest");
        assert!(dir
            .path()
            .join(format!("hostkit-{}-cron-nightly-digest.service", project.name))
            .exists());
        assert!(dir
            .path()
            .join(format!("hostkit-{}-cron-nightly-digest.timer", project.name))
            .exists());

        let listed = list_scheduled_tasks(&store, project.id).expect("list");
        assert_eq!(listed.len(), 1);
    }
}
