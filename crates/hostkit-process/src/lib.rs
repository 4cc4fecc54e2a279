//! Subprocess Gateway: every external command HostKit runs (`git`, `systemctl`,
//! package manager installs, build commands, startup-test probes) goes
//! through [`run_command_with_timeout`] so timeout enforcement and output
//! capture are handled in exactly one place.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use hostkit_types::{ErrorCode, HostKitError};

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Runs `program` with `args` in `working_dir`, optionally bounded by `timeout`.
///
/// A missing binary (spawn failure) is reported as [`ErrorCode::CommandNotFound`]
/// rather than a generic error, so callers can distinguish "not installed"
/// from "ran and failed".
pub fn run_command_with_timeout(
    program: &str,
    args: &[&str],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<CommandOutput, HostKitError> {
    let start = Instant::now();
    let mut command = Command::new(program);
    command.args(args).current_dir(working_dir);

    let (exit_code, stdout, stderr, timed_out) = if let Some(timeout_dur) = timeout {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| spawn_error(program, &source))?;

        let deadline = Instant::now() + timeout_dur;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let (out, err) = drain(&mut child);
                    break (status.code().unwrap_or(-1), out, err, false);
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        let (out, mut err) = drain(&mut child);
                        err.push_str(&format!(
                            "\ncommand timed out after {}",
                            humantime::format_duration(timeout_dur)
                        ));
                        break (-1, out, err, true);
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(_) => {
                    let (out, err) = drain(&mut child);
                    break (-1, out, err, false);
                }
            }
        }
    } else {
        let output = command
            .output()
            .map_err(|source| spawn_error(program, &source))?;
        (
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            false,
        )
    };

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
        timed_out,
        duration: start.elapsed(),
    })
}

fn drain(child: &mut std::process::Child) -> (String, String) {
    let mut stdout_bytes = Vec::new();
    let mut stderr_bytes = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_end(&mut stdout_bytes);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_end(&mut stderr_bytes);
    }
    (
        String::from_utf8_lossy(&stdout_bytes).to_string(),
        String::from_utf8_lossy(&stderr_bytes).to_string(),
    )
}

fn spawn_error(program: &str, source: &std::io::Error) -> HostKitError {
    if source.kind() == std::io::ErrorKind::NotFound || which::which(program).is_err() {
        HostKitError::new(
            ErrorCode::CommandNotFound,
            format!("command not found: {program}"),
        )
        .with_suggestion(format!("install {program} or add it to PATH"))
    } else {
        HostKitError::new(
            ErrorCode::CommandNotFound,
            format!("failed to spawn {program}: {source}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_successful_command() {
        let output =
            run_command_with_timeout("true", &[], Path::new("."), None).expect("run true");
        assert!(output.success());
        assert!(!output.timed_out);
    }

    #[test]
    fn captures_nonzero_exit_code() {
        let output =
            run_command_with_timeout("sh", &["-c", "exit 7"], Path::new("."), None)
                .expect("run sh");
        assert_eq!(output.exit_code, 7);
        assert!(!output.success());
    }

    #[test]
    fn enforces_timeout() {
        let output = run_command_with_timeout(
            "sleep",
            &["5"],
            Path::new("."),
            Some(Duration::from_millis(200)),
        )
        .expect("run sleep");
        assert!(output.timed_out);
        assert!(output.stderr.contains("timed out"));
    }

    #[test]
    fn missing_binary_reports_command_not_found() {
        let err = run_command_with_timeout(
            "hostkit-definitely-not-a-real-binary",
            &[],
            Path::new("."),
            None,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::CommandNotFound);
    }
}
