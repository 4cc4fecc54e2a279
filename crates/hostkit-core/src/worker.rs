//! Worker Manager: long-running background processes (queue consumers,
//! websocket relays, etc.) supervised as a plain systemd service unit,
//! distinct from the project's main unit and from scheduled tasks.

use std::path::Path;

use hostkit_store::{NewEvent, Store};
use hostkit_supervisor::{self, UnitKind, UnitParams};
use hostkit_types::{ErrorCode, EventCategory, EventLevel, HostKitError, Project, ResourceLimits, Worker};

pub struct WorkerSpec<'a> {
    pub name: &'a str,
    pub command: &'a str,
}

pub fn create_worker(
    store: &Store,
    unit_dir: &Path,
    project: &Project,
    spec: &WorkerSpec,
) -> Result<Worker, HostKitError> {
    let params = UnitParams {
        description: format!("{} worker: {}", project.name, spec.name),
        working_dir: project.home_dir.clone(),
        exec_start: spec.command.to_string(),
        user: project.linux_username.clone(),
        env_file: None,
        resource_limits: ResourceLimits::default(),
        on_calendar: None,
    };
    hostkit_supervisor::render_unit(unit_dir, project, UnitKind::Worker, Some(spec.name), &params)?;
    hostkit_supervisor::reload_init_system()?;

    let worker = store
        .create_worker(project.id, spec.name, spec.command)
        .map_err(|e| HostKitError::new(ErrorCode::DeployFailed, format!("failed to record worker: {e}")))?;
    emit_worker_event(store, project, &worker, "created");
    Ok(worker)
}

pub fn list_workers(store: &Store, project_id: i64) -> anyhow::Result<Vec<Worker>> {
    store.list_workers(project_id)
}

pub fn start_worker(store: &Store, project: &Project, worker: &Worker) -> Result<(), HostKitError> {
    let unit = hostkit_supervisor::unit_name(project, UnitKind::Worker, Some(&worker.name));
    hostkit_supervisor::enable(&unit)?;
    hostkit_supervisor::start(&unit)?;
    emit_worker_event(store, project, worker, "started");
    Ok(())
}

pub fn stop_worker(store: &Store, project: &Project, worker: &Worker) -> Result<(), HostKitError> {
    let unit = hostkit_supervisor::unit_name(project, UnitKind::Worker, Some(&worker.name));
    hostkit_supervisor::stop(&unit)?;
    emit_worker_event(store, project, worker, "stopped");
    Ok(())
}

pub fn restart_worker(store: &Store, project: &Project, worker: &Worker) -> Result<(), HostKitError> {
    let unit = hostkit_supervisor::unit_name(project, UnitKind::Worker, Some(&worker.name));
    hostkit_supervisor::restart(&unit)?;
    emit_worker_event(store, project, worker, "restarted");
    Ok(())
}

pub fn worker_status(project: &Project, worker: &Worker) -> Result<bool, HostKitError> {
    let unit = hostkit_supervisor::unit_name(project, UnitKind::Worker, Some(&worker.name));
    hostkit_supervisor::is_active(&unit)
}

pub fn delete_worker(store: &Store, project: &Project, worker: &Worker) -> Result<(), HostKitError> {
    let unit = hostkit_supervisor::unit_name(project, UnitKind::Worker, Some(&worker.name));
    let _ = hostkit_supervisor::stop(&unit);
    let _ = hostkit_supervisor::disable(&unit);
    store
        .delete_worker(worker.id)
        .map_err(|e| HostKitError::new(ErrorCode::SystemdError, e.to_string()))?;
    emit_worker_event(store, project, worker, "deleted");
    Ok(())
}

fn emit_worker_event(store: &Store, project: &Project, worker: &Worker, event_type: &str) {
    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Worker,
        event_type: event_type.to_string(),
        level: EventLevel::Info,
        message: format!("worker {} {event_type} for {}", worker.name, project.name),
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
    fn create_worker_renders_unit_and_records_row() {
        let (store, project) = project();
        let dir = tempdir().expect("tempdir");
        let worker = create_worker(
            &store,
            dir.path(),
            &project,
            &WorkerSpec {
                name: "queue-consumer",
                command: "/usr/bin/python3 worker.py",
            },
        )
        .expect("create worker");

        assert_eq!(worker.name, "queue-consumer");
        assert!(dir
            .path()
            .join(format!("hostkit-{}-worker-queue-consumer.service", project.name))
            .exists());

        let listed = list_workers(&store, project.id).expect("list");
        assert_eq!(listed.len(), 1);
    }
}
