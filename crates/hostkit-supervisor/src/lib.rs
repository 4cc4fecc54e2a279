//! Service Supervisor Interface: wraps the host init system (systemd) behind
//! a narrow interface, plus the cron-expression-to-`OnCalendar` translator
//! used by the Scheduled-Task and Worker managers.
//!
//! Every `systemctl`/`journalctl` invocation goes through
//! [`hostkit_process::run_command_with_timeout`], the same subprocess
//! gateway the rest of the workspace uses for external commands.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use hostkit_process::run_command_with_timeout;
use hostkit_types::{ErrorCode, HostKitError, Project, ResourceLimits};
use serde::{Deserialize, Serialize};

mod cron;
pub use cron::cron_to_on_calendar;

/// Written at the top of every generated unit file so an operator can tell
/// a HostKit-managed unit from a hand-edited one at a glance.
const MANAGED_MARKER: &str = "# Managed by HostKit. Changes will be overwritten on the next deploy.\n";

pub const UNIT_DIR: &str = "/etc/systemd/system";

/// Which kind of unit `render_unit` produces, driving the `hostkit-{project}
/// {-suffix}` unit name and the template filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Main,
    Worker,
    Cron,
    CronTimer,
    Auth,
    Chatbot,
    Sms,
    Booking,
    Payments,
    Vector,
}

impl UnitKind {
    fn suffix(self) -> &'static str {
        match self {
            UnitKind::Main => "",
            UnitKind::Worker => "-worker",
            UnitKind::Cron => "-cron",
            UnitKind::CronTimer => "-cron",
            UnitKind::Auth => "-auth",
            UnitKind::Chatbot => "-chatbot",
            UnitKind::Sms => "-sms",
            UnitKind::Booking => "-booking",
            UnitKind::Payments => "-payments",
            UnitKind::Vector => "-vector",
        }
    }

    fn extension(self) -> &'static str {
        match self {
            UnitKind::CronTimer => "timer",
            _ => "service",
        }
    }
}

/// Parameters filled into a rendered unit file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitParams {
    pub description: String,
    pub working_dir: PathBuf,
    pub exec_start: String,
    pub user: String,
    pub env_file: Option<PathBuf>,
    pub resource_limits: ResourceLimits,
    /// Only used for `UnitKind::CronTimer`: the `OnCalendar=` value.
    pub on_calendar: Option<String>,
}

/// Builds the unit name (without extension) for `project`/`kind`, optionally
/// qualified by `name` (worker/cron task name).
pub fn unit_name(project: &Project, kind: UnitKind, name: Option<&str>) -> String {
    let project = project.name.as_str();
    match (kind, name) {
        (UnitKind::Worker, Some(n)) => format!("hostkit-{project}-worker-{n}"),
        (UnitKind::Cron, Some(n)) | (UnitKind::CronTimer, Some(n)) => {
            format!("hostkit-{project}-cron-{n}")
        }
        _ => format!("hostkit-{project}{}", kind.suffix()),
    }
}

/// Renders a unit file to `unit_dir` (normally [`UNIT_DIR`], overridable in
/// tests) and writes it with the same atomic `.tmp` + `rename` pattern used
/// elsewhere in the workspace.
pub fn render_unit(
    unit_dir: &std::path::Path,
    project: &Project,
    kind: UnitKind,
    task_name: Option<&str>,
    params: &UnitParams,
) -> Result<PathBuf, HostKitError> {
    let unit = unit_name(project, kind, task_name);
    let path = unit_dir.join(format!("{unit}.{}", kind.extension()));

    let contents = if kind.extension() == "timer" {
        render_timer_unit(params)
    } else {
        render_service_unit(params)
    };

    let tmp_path = path.with_extension(format!("{}.tmp", kind.extension()));
    fs::write(&tmp_path, &contents).map_err(|e| {
        HostKitError::new(
            ErrorCode::SystemdError,
            format!("failed to write unit file {}: {e}", tmp_path.display()),
        )
    })?;
    fs::rename(&tmp_path, &path).map_err(|e| {
        HostKitError::new(
            ErrorCode::SystemdError,
            format!("failed to activate unit file {}: {e}", path.display()),
        )
    })?;
    Ok(path)
}

fn render_service_unit(params: &UnitParams) -> String {
    let mut out = String::new();
    out.push_str(MANAGED_MARKER);
    out.push_str("[Unit]\n");
    out.push_str(&format!("Description={}\n", params.description));
    out.push_str("After=network.target\n\n");
    out.push_str("[Service]\n");
    out.push_str("Type=simple\n");
    out.push_str(&format!("User={}\n", params.user));
    out.push_str(&format!("WorkingDirectory={}\n", params.working_dir.display()));
    out.push_str(&format!("ExecStart={}\n", params.exec_start));
    if let Some(env_file) = &params.env_file {
        out.push_str(&format!("EnvironmentFile=-{}\n", env_file.display()));
    }
    out.push_str("Restart=on-failure\n");
    out.push_str("RestartSec=2\n");

    let limits = &params.resource_limits;
    if limits.enabled {
        if let Some(cpu) = limits.cpu_quota_percent {
            out.push_str(&format!("CPUQuota={cpu}%\n"));
        }
        if let Some(mem) = limits.memory_max_mb {
            out.push_str(&format!("MemoryMax={mem}M\n"));
        }
        if let Some(high) = limits.memory_high_mb {
            out.push_str(&format!("MemoryHigh={high}M\n"));
        }
        if let Some(tasks) = limits.tasks_max {
            out.push_str(&format!("TasksMax={tasks}\n"));
        }
    }

    out.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    out
}

fn render_timer_unit(params: &UnitParams) -> String {
    let on_calendar = params.on_calendar.as_deref().unwrap_or("*-*-* *:*:00");
    format!(
        "{MANAGED_MARKER}[Unit]\nDescription={}\n\n[Timer]\nOnCalendar={on_calendar}\nPersistent=true\n\n[Install]\nWantedBy=timers.target\n",
        params.description
    )
}

fn systemctl(args: &[&str]) -> Result<hostkit_process::CommandOutput, HostKitError> {
    run_command_with_timeout("systemctl", args, std::path::Path::new("/"), Some(Duration::from_secs(30)))
}

fn require_success(
    output: hostkit_process::CommandOutput,
    action: &str,
    unit: &str,
) -> Result<(), HostKitError> {
    if output.success() {
        Ok(())
    } else {
        Err(HostKitError::new(
            ErrorCode::ServiceStartFailed,
            format!("{action} failed for {unit}: {}", output.stderr.trim()),
        ))
    }
}

pub fn reload_init_system() -> Result<(), HostKitError> {
    let output = systemctl(&["daemon-reload"])?;
    require_success(output, "daemon-reload", "-")
}

pub fn start(unit: &str) -> Result<(), HostKitError> {
    require_success(systemctl(&["start", unit])?, "start", unit)
}

pub fn stop(unit: &str) -> Result<(), HostKitError> {
    require_success(systemctl(&["stop", unit])?, "stop", unit)
}

pub fn restart(unit: &str) -> Result<(), HostKitError> {
    require_success(systemctl(&["restart", unit])?, "restart", unit)
}

pub fn enable(unit: &str) -> Result<(), HostKitError> {
    require_success(systemctl(&["enable", unit])?, "enable", unit)
}

pub fn disable(unit: &str) -> Result<(), HostKitError> {
    require_success(systemctl(&["disable", unit])?, "disable", unit)
}

/// Stops, disables, and removes the unit file for `unit` in `unit_dir`
/// (normally [`UNIT_DIR`]). Used by deprovisioning, where a project's units
/// must disappear along with its filesystem and database rows. Missing
/// units are not an error — deprovisioning must be idempotent across retries.
pub fn remove_unit(unit_dir: &std::path::Path, unit: &str, extension: &str) -> Result<(), HostKitError> {
    let _ = stop(unit);
    let _ = disable(unit);
    let path = unit_dir.join(format!("{unit}.{extension}"));
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HostKitError::new(
            ErrorCode::SystemdError,
            format!("failed to remove unit file {}: {e}", path.display()),
        )),
    }
}

pub fn is_active(unit: &str) -> Result<bool, HostKitError> {
    let output = systemctl(&["is-active", unit])?;
    Ok(output.stdout.trim() == "active")
}

pub fn is_enabled(unit: &str) -> Result<bool, HostKitError> {
    let output = systemctl(&["is-enabled", unit])?;
    Ok(output.stdout.trim() == "enabled")
}

/// Main PID of a running unit, or `None` if it isn't active.
pub fn main_pid(unit: &str) -> Result<Option<u32>, HostKitError> {
    let output = systemctl(&["show", unit, "--property=MainPID", "--value"])?;
    let pid: u32 = output.stdout.trim().parse().unwrap_or(0);
    Ok(if pid == 0 { None } else { Some(pid) })
}

/// Captured (non-follow) log lines for `unit` from the journal.
pub fn get_logs(unit: &str, lines: u32, error_only: bool) -> Result<String, HostKitError> {
    let lines_arg = lines.to_string();
    let mut args = vec!["-u", unit, "-n", lines_arg.as_str(), "--no-pager"];
    if error_only {
        args.extend_from_slice(&["-p", "err"]);
    }
    let output = run_command_with_timeout(
        "journalctl",
        &args,
        std::path::Path::new("/"),
        Some(Duration::from_secs(15)),
    )?;
    if !output.success() {
        return Err(HostKitError::new(
            ErrorCode::SystemdError,
            format!("journalctl failed for {unit}: {}", output.stderr.trim()),
        ));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit_types::{AutoPauseConfig, RateLimitConfig, Runtime};
    use tempfile::tempdir;

    fn sample_project(name: &str) -> Project {
        Project {
            id: 1,
            name: name.to_string(),
            runtime: Runtime::Python,
            linux_username: name.to_string(),
            home_dir: format!("/home/{name}"),
            port: 4100,
            paused: false,
            resource_limits: ResourceLimits::default(),
            rate_limit_config: RateLimitConfig::default(),
            auto_pause_config: AutoPauseConfig::default(),
            created_at: chrono::Utc::now(),
        }
    }

    fn sample_params() -> UnitParams {
        UnitParams {
            description: "blog web service".into(),
            working_dir: PathBuf::from("/home/blog/current"),
            exec_start: "/home/blog/current/bin/start".into(),
            user: "blog".into(),
            env_file: Some(PathBuf::from("/home/blog/shared/.env")),
            resource_limits: ResourceLimits {
                cpu_quota_percent: Some(50),
                memory_max_mb: Some(512),
                memory_high_mb: Some(400),
                tasks_max: Some(100),
                disk_quota_mb: Some(2048),
                enabled: true,
            },
            on_calendar: None,
        }
    }

    #[test]
    fn unit_name_applies_expected_suffixes() {
        let project = sample_project("blog");
        assert_eq!(unit_name(&project, UnitKind::Main, None), "hostkit-blog");
        assert_eq!(unit_name(&project, UnitKind::Auth, None), "hostkit-blog-auth");
        assert_eq!(
            unit_name(&project, UnitKind::Worker, Some("mailer")),
            "hostkit-blog-worker-mailer"
        );
        assert_eq!(
            unit_name(&project, UnitKind::Cron, Some("nightly")),
            "hostkit-blog-cron-nightly"
        );
    }

    #[test]
    fn render_service_unit_includes_resource_limits() {
        let contents = render_service_unit(&sample_params());
        assert!(contents.contains("CPUQuota=50%"));
        assert!(contents.contains("MemoryMax=512M"));
        assert!(contents.contains("MemoryHigh=400M"));
        assert!(contents.contains("TasksMax=100"));
        assert!(contents.contains("User=blog"));
    }

    #[test]
    fn render_service_unit_omits_directives_when_limits_disabled() {
        let mut params = sample_params();
        params.resource_limits.enabled = false;
        let contents = render_service_unit(&params);
        assert!(!contents.contains("CPUQuota="));
        assert!(!contents.contains("MemoryMax="));
    }

    #[test]
    fn remove_unit_is_idempotent_when_file_absent() {
        let td = tempdir().expect("tempdir");
        let result = remove_unit(td.path(), "hostkit-ghost", "service");
        assert!(result.is_ok());
    }

    #[test]
    fn render_unit_writes_file_atomically() {
        let td = tempdir().expect("tempdir");
        let params = sample_params();
        let project = sample_project("blog");
        let path = render_unit(td.path(), &project, UnitKind::Main, None, &params).expect("render");
        assert!(path.exists());
        assert!(!path.with_extension("service.tmp").exists());
        let contents = fs::read_to_string(&path).expect("read");
        assert!(contents.contains("ExecStart=/home/blog/current/bin/start"));
        assert!(contents.starts_with("# Managed by HostKit"));
    }

    #[test]
    fn render_timer_unit_uses_on_calendar() {
        let mut params = sample_params();
        params.on_calendar = Some("*-*-* 03:00:00".into());
        let contents = render_timer_unit(&params);
        assert!(contents.contains("OnCalendar=*-*-* 03:00:00"));
        assert!(contents.contains("[Timer]"));
    }
}
