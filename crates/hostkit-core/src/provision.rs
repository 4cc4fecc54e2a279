//! Provisioning Orchestrator: builds a project from nothing — row, Linux
//! user, home tree, main unit — then layers on optional sidecars. Steps 1-3
//! are rolled back best-effort on failure since nothing external depends on
//! them yet; sidecar failures in step 4 are recorded but don't abort the
//! provision, since the core project is already usable.

use std::ops::RangeInclusive;
use std::path::Path;

use hostkit_fs::ProjectLayout;
use hostkit_process::run_command_with_timeout;
use hostkit_store::{NewProject, Store};
use hostkit_supervisor::{self, UnitKind, UnitParams};
use hostkit_types::{
    validate_project_name, Domain, ErrorCode, EventCategory, EventLevel, HostKitError, Project,
    ResourceLimits, Runtime,
};

use crate::reporter::Reporter;
use crate::sudoers;

pub struct ProvisionSpec<'a> {
    pub name: &'a str,
    pub runtime: Runtime,
    pub domain: Option<&'a str>,
    pub git_url: Option<&'a str>,
    pub git_branch: Option<&'a str>,
}

pub struct SidecarOutcome {
    pub name: String,
    pub succeeded: bool,
    pub detail: String,
}

pub struct ProvisionReport {
    pub project: Project,
    pub domain: Option<Domain>,
    pub sidecars: Vec<SidecarOutcome>,
}

/// Picks the lowest free port in `range` across every project row. O(n) in
/// the number of projects, which on a single-host control plane is never
/// large enough to matter.
fn allocate_port(store: &Store, range: RangeInclusive<u16>) -> Result<u16, HostKitError> {
    let projects = store
        .list_projects()
        .map_err(|e| HostKitError::new(ErrorCode::PortExhausted, e.to_string()))?;
    let taken: std::collections::HashSet<u16> = projects.iter().map(|p| p.port).collect();
    range
        .clone()
        .find(|p| !taken.contains(p))
        .ok_or_else(|| {
            HostKitError::new(
                ErrorCode::PortExhausted,
                format!("no free port in range {}-{}", range.start(), range.end()),
            )
        })
}

fn linux_username_for(project_name: &str) -> String {
    project_name.to_string()
}

fn create_linux_user(username: &str, home_dir: &Path) -> Result<(), HostKitError> {
    let home = home_dir.to_string_lossy();
    let output = run_command_with_timeout(
        "useradd",
        &["--system", "--create-home", "--home-dir", &home, "--shell", "/usr/sbin/nologin", username],
        Path::new("/"),
        None,
    )?;
    if !output.success() {
        return Err(HostKitError::new(
            ErrorCode::DeployFailed,
            format!("useradd failed for {username}: {}", output.stderr.trim()),
        ));
    }
    Ok(())
}

fn remove_linux_user(username: &str) {
    let _ = run_command_with_timeout("userdel", &["--remove", username], Path::new("/"), None);
}

fn entrypoint_for(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Python => "venv/bin/python app.py",
        Runtime::Node => "node server.js",
        Runtime::Nextjs => "node_modules/.bin/next start",
        Runtime::Static => "/usr/bin/busybox httpd -f -p $PORT",
    }
}

/// Runs the full provisioning flow for `spec`: allocates a port, creates
/// the project row, the Linux user and home tree, and the main systemd
/// unit, then layers on a domain binding and a first deploy if requested.
/// A failure in steps 1-3 triggers best-effort cleanup of whatever
/// completed; step 4 failures are recorded in the report but do not unwind
/// the project.
pub fn provision_project(
    store: &mut Store,
    unit_dir: &Path,
    sudoers_dir: &Path,
    port_range: RangeInclusive<u16>,
    spec: &ProvisionSpec,
    reporter: &mut dyn Reporter,
) -> Result<ProvisionReport, HostKitError> {
    validate_project_name(spec.name)?;
    if store
        .find_project_by_name(spec.name)
        .map_err(|e| HostKitError::new(ErrorCode::ProjectExists, e.to_string()))?
        .is_some()
    {
        return Err(HostKitError::new(
            ErrorCode::ProjectExists,
            format!("project {} already exists", spec.name),
        ));
    }

    let port = allocate_port(store, port_range)?;
    let username = linux_username_for(spec.name);
    let home_dir = Path::new("/home").join(&username);

    reporter.info(&format!("provisioning {} on port {port}", spec.name));
    let _ = store.emit_event(&hostkit_store::NewEvent {
        project_id: None,
        category: EventCategory::Project,
        event_type: "provision_started".into(),
        level: EventLevel::Info,
        message: format!("provisioning {}", spec.name),
        data: None,
        created_by: None,
    });

    let project = store
        .create_project(&NewProject {
            name: spec.name.to_string(),
            runtime: spec.runtime,
            linux_username: username.clone(),
            home_dir: home_dir.to_string_lossy().into_owned(),
            port,
        })
        .map_err(|e| HostKitError::new(ErrorCode::DeployFailed, format!("failed to create project row: {e}")))?;

    if let Err(e) = create_linux_user(&username, &home_dir) {
        rollback_core_steps(store, &project, &home_dir, sudoers_dir, false);
        return Err(e);
    }

    let layout = ProjectLayout::new(&home_dir);
    if let Err(e) = layout.provision() {
        rollback_core_steps(store, &project, &home_dir, sudoers_dir, true);
        return Err(HostKitError::new(
            ErrorCode::DeployFailed,
            format!("failed to provision home tree for {}: {e}", spec.name),
        ));
    }

    let params = UnitParams {
        description: format!("{} main process", spec.name),
        working_dir: layout.current_link(),
        exec_start: entrypoint_for(spec.runtime).to_string(),
        user: username.clone(),
        env_file: Some(layout.env_path()),
        resource_limits: ResourceLimits::default(),
        on_calendar: None,
    };
    if let Err(e) = hostkit_supervisor::render_unit(unit_dir, &project, UnitKind::Main, None, &params)
        .and_then(|_| hostkit_supervisor::reload_init_system())
        .and_then(|_| {
            let unit = hostkit_supervisor::unit_name(&project, UnitKind::Main, None);
            hostkit_supervisor::enable(&unit)
        })
    {
        rollback_core_steps(store, &project, &home_dir, sudoers_dir, true);
        return Err(e);
    }

    if let Err(e) = sudoers::write_sudoers_dropin(sudoers_dir, &project) {
        rollback_core_steps(store, &project, &home_dir, sudoers_dir, true);
        return Err(e);
    }

    let mut sidecars = Vec::new();
    let domain = spec.domain.and_then(|hostname| {
        match store.add_domain(project.id, hostname) {
            Ok(domain) => {
                sidecars.push(SidecarOutcome {
                    name: "domain".to_string(),
                    succeeded: true,
                    detail: hostname.to_string(),
                });
                Some(domain)
            }
            Err(e) => {
                record_step_failure(store, &project, "domain", &e.to_string());
                sidecars.push(SidecarOutcome {
                    name: "domain".to_string(),
                    succeeded: false,
                    detail: e.to_string(),
                });
                None
            }
        }
    });

    if let (Some(url), Some(branch)) = (spec.git_url, spec.git_branch) {
        match hostkit_git::validate_git_url(url) {
            Ok(()) => {
                if let Err(e) = store.set_git_config(&hostkit_types::GitConfigRow {
                    project_id: project.id,
                    remote_url: url.to_string(),
                    default_branch: branch.to_string(),
                    deploy_key_path: None,
                }) {
                    record_step_failure(store, &project, "git_config", &e.to_string());
                    sidecars.push(SidecarOutcome {
                        name: "git_config".to_string(),
                        succeeded: false,
                        detail: e.to_string(),
                    });
                } else {
                    sidecars.push(SidecarOutcome {
                        name: "git_config".to_string(),
                        succeeded: true,
                        detail: url.to_string(),
                    });
                }
            }
            Err(e) => {
                record_step_failure(store, &project, "git_config", &e.to_string());
                sidecars.push(SidecarOutcome {
                    name: "git_config".to_string(),
                    succeeded: false,
                    detail: e.to_string(),
                });
            }
        }
    }

    reporter.info(&format!("provisioned {} on port {}", project.name, project.port));
    let _ = store.emit_event(&hostkit_store::NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Project,
        event_type: "provision_completed".into(),
        level: EventLevel::Info,
        message: format!("provisioned {} on port {}", project.name, project.port),
        data: None,
        created_by: None,
    });

    Ok(ProvisionReport {
        project,
        domain,
        sidecars,
    })
}

fn record_step_failure(store: &Store, project: &Project, step: &str, detail: &str) {
    let _ = store.emit_event(&hostkit_store::NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Project,
        event_type: "provision_step_failed".into(),
        level: EventLevel::Warning,
        message: format!("{step} failed during provisioning of {}: {detail}", project.name),
        data: None,
        created_by: None,
    });
}

/// Best-effort unwind for steps 1-3: removes the Linux user (if it was
/// created), the sudoers drop-in, the home directory, and the project row
/// (cascading to any release/event rows it owns). Errors here are
/// swallowed — there is no further fallback, and the caller already has the
/// original error to report.
fn rollback_core_steps(
    store: &mut Store,
    project: &Project,
    home_dir: &Path,
    sudoers_dir: &Path,
    remove_user: bool,
) {
    if remove_user {
        remove_linux_user(&project.linux_username);
    }
    let _ = sudoers::remove_sudoers_dropin(sudoers_dir, &project.name);
    let _ = std::fs::remove_dir_all(home_dir);
    let _ = store.delete_project(project.id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_invalid_project_name() {
        let mut store = Store::open_in_memory().expect("open store");
        let dir = tempdir().expect("tempdir");
        let err = provision_project(
            &mut store,
            dir.path(),
            dir.path(),
            4000..=4999,
            &ProvisionSpec {
                name: "Invalid Name",
                runtime: Runtime::Python,
                domain: None,
                git_url: None,
                git_branch: None,
            },
            &mut crate::reporter::NullReporter,
        )
        .expect_err("invalid name rejected");
        assert_eq!(err.code, ErrorCode::InvalidProjectName);
    }

    #[test]
    fn allocate_port_skips_taken_ports() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create_project(&NewProject {
                name: "blog".into(),
                runtime: Runtime::Python,
                linux_username: "blog".into(),
                home_dir: "/home/blog".into(),
                port: 4000,
            })
            .expect("create project");
        let port = allocate_port(&store, 4000..=4001).expect("allocate");
        assert_eq!(port, 4001);
    }

    #[test]
    fn allocate_port_exhaustion_is_typed_error() {
        let store = Store::open_in_memory().expect("open store");
        store
            .create_project(&NewProject {
                name: "blog".into(),
                runtime: Runtime::Python,
                linux_username: "blog".into(),
                home_dir: "/home/blog".into(),
                port: 4000,
            })
            .expect("create project");
        let err = allocate_port(&store, 4000..=4000).expect_err("exhausted");
        assert_eq!(err.code, ErrorCode::PortExhausted);
    }

    #[test]
    fn duplicate_project_name_is_rejected() {
        let mut store = Store::open_in_memory().expect("open store");
        store
            .create_project(&NewProject {
                name: "blog".into(),
                runtime: Runtime::Python,
                linux_username: "blog".into(),
                home_dir: "/home/blog".into(),
                port: 4000,
            })
            .expect("create project");
        let dir = tempdir().expect("tempdir");
        let err = provision_project(
            &mut store,
            dir.path(),
            dir.path(),
            4001..=4999,
            &ProvisionSpec {
                name: "blog",
                runtime: Runtime::Python,
                domain: None,
                git_url: None,
                git_branch: None,
            },
            &mut crate::reporter::NullReporter,
        )
        .expect_err("duplicate rejected");
        assert_eq!(err.code, ErrorCode::ProjectExists);
    }
}
