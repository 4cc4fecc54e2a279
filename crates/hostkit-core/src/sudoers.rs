//! Sudoers Drop-in Writer: grants a project's Linux user exactly the
//! `systemctl`/`journalctl` privileges it needs over its own units, nothing
//! more. Every drop-in is validated with `visudo -c` before it is moved into
//! place, so a malformed file can never reach `/etc/sudoers.d`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hostkit_process::run_command_with_timeout;
use hostkit_types::{ErrorCode, HostKitError, Project};

const MANAGED_MARKER: &str = "# Managed by HostKit. Changes will be overwritten on the next deploy.\n";

pub const SUDOERS_DIR: &str = "/etc/sudoers.d";

fn dropin_path(sudoers_dir: &Path, project_name: &str) -> PathBuf {
    sudoers_dir.join(format!("hostkit-{project_name}"))
}

fn render_dropin(project: &Project) -> String {
    let user = &project.linux_username;
    let name = &project.name;
    format!(
        "{MANAGED_MARKER}{user} ALL=(root) NOPASSWD: \
         /usr/bin/systemctl start hostkit-{name}*, \
         /usr/bin/systemctl stop hostkit-{name}*, \
         /usr/bin/systemctl restart hostkit-{name}*, \
         /usr/bin/systemctl status hostkit-{name}*, \
         /usr/bin/journalctl -u hostkit-{name}*\n"
    )
}

/// Writes and validates the sudoers drop-in granting `project`'s Linux user
/// service-control privileges over its own units. The file is written to a
/// sibling temp path first, validated via `visudo -c -f`, and only then
/// renamed into place at mode 0440 — a file that fails validation never
/// lands at its final path.
pub fn write_sudoers_dropin(sudoers_dir: &Path, project: &Project) -> Result<PathBuf, HostKitError> {
    let final_path = dropin_path(sudoers_dir, &project.name);
    let tmp_path = sudoers_dir.join(format!(".hostkit-{}.tmp", project.name));
    let contents = render_dropin(project);

    std::fs::write(&tmp_path, &contents).map_err(|e| {
        HostKitError::new(
            ErrorCode::SudoersValidationFailed,
            format!("failed to write sudoers drop-in for {}: {e}", project.name),
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o440));
    }

    let validation = run_command_with_timeout(
        "visudo",
        &["-c", "-f", tmp_path.to_string_lossy().as_ref()],
        Path::new("/"),
        Some(Duration::from_secs(10)),
    );
    match validation {
        Ok(output) if output.success() => {}
        Ok(output) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(HostKitError::new(
                ErrorCode::SudoersValidationFailed,
                format!("visudo rejected sudoers drop-in for {}: {}", project.name, output.stderr.trim()),
            ));
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
    }

    std::fs::rename(&tmp_path, &final_path).map_err(|e| {
        HostKitError::new(
            ErrorCode::SudoersValidationFailed,
            format!("failed to activate sudoers drop-in for {}: {e}", project.name),
        )
    })?;
    Ok(final_path)
}

/// Removes the sudoers drop-in for `project_name`, if present. Missing
/// files are not an error — deprovisioning must be idempotent across
/// retries.
pub fn remove_sudoers_dropin(sudoers_dir: &Path, project_name: &str) -> Result<(), HostKitError> {
    match std::fs::remove_file(dropin_path(sudoers_dir, project_name)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(HostKitError::new(
            ErrorCode::SudoersValidationFailed,
            format!("failed to remove sudoers drop-in for {project_name}: {e}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit_types::{AutoPauseConfig, RateLimitConfig, ResourceLimits, Runtime};
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

    #[test]
    fn dropin_content_scopes_commands_to_the_project() {
        let project = sample_project("blog");
        let contents = render_dropin(&project);
        assert!(contents.contains("blog ALL=(root) NOPASSWD:"));
        assert!(contents.contains("hostkit-blog*"));
        assert!(contents.starts_with("# Managed by HostKit"));
    }

    #[test]
    fn remove_sudoers_dropin_is_idempotent_when_absent() {
        let td = tempdir().expect("tempdir");
        let result = remove_sudoers_dropin(td.path(), "ghost");
        assert!(result.is_ok());
    }
}
