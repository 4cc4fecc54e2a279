//! Deploy Pipeline: the staged sequence behind `hostkit deploy`, composing
//! the Release Engine, Checkpoint Engine, Rate-Limit/Auto-Pause gates, git/
//! local source materialization, the supervisor, and the health probe.
//!
//! Every step's outcome is an event in the journal: a
//! `deploy.started`/`deploy.completed`/`deploy.failed` bracket around the
//! whole run. Failures from step 5 onward record a rate-limit
//! history entry and run the auto-pause check; gate failures (rate limit,
//! paused) do not, since they never represent an attempted deploy.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use hostkit_fs::ProjectLayout;
use hostkit_store::{NewEvent, Store};
use hostkit_types::{
    CheckpointKind, DeployOutcome, ErrorCode, EventCategory, EventLevel, HostKitError, Project,
    ReleaseSource, Release,
};

use crate::checkpoint::{self, DumpCommand};
use crate::ratelimit::{self, RateLimitDecision};
use crate::release;
use crate::reporter::Reporter;

/// Where a release's source comes from for this particular deploy
/// invocation — distinct from [`ReleaseSource`], which is what gets
/// recorded after materialization (it may carry a resolved commit SHA the
/// caller didn't supply).
pub enum SourceSpec {
    LocalPath { path: PathBuf },
    Git { url: String, git_ref: String },
}

impl SourceSpec {
    fn describe(&self) -> serde_json::Value {
        match self {
            SourceSpec::LocalPath { path } => {
                serde_json::json!({ "kind": "local_path", "path": path.to_string_lossy() })
            }
            SourceSpec::Git { url, git_ref } => {
                serde_json::json!({ "kind": "git", "url": url, "ref": git_ref })
            }
        }
    }
}

pub struct DeployOptions {
    pub build_command: Option<Vec<String>>,
    pub install_command: Option<Vec<String>>,
    /// Key/value pairs merged into the project's `.env`. Only counts are
    /// ever logged or returned — values never leave this process.
    pub secrets: Vec<(String, String)>,
    pub restart: bool,
    pub override_ratelimit: bool,
    /// If set, takes a `pre_deploy` checkpoint before materializing the new
    /// release. `None` means the project has no database to checkpoint.
    pub dump_command: Option<DumpCommand>,
    /// Database name recorded on the pre-deploy checkpoint. Required when
    /// `dump_command` is set; ignored otherwise.
    pub database_name: Option<String>,
    pub health_endpoint: Option<String>,
    pub health_timeout: Duration,
    pub expected_content: Option<String>,
    pub keep_releases: usize,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            build_command: None,
            install_command: None,
            secrets: Vec::new(),
            restart: true,
            override_ratelimit: false,
            dump_command: None,
            database_name: None,
            health_endpoint: None,
            health_timeout: Duration::from_secs(10),
            expected_content: None,
            keep_releases: release::DEFAULT_KEEP_RELEASES,
        }
    }
}

pub struct DeployReport {
    pub release: Release,
    pub files_synced: u64,
    pub duration: Duration,
    pub health: Option<hostkit_health::HealthReport>,
    pub cleanup_errors: Vec<(String, String)>,
}

/// Runs the full pipeline for `project`: rate-limit and pause gates, then
/// release creation, pre-deploy checkpoint, env snapshot, source
/// materialization, build/install, secret injection, atomic activation,
/// optional restart, a best-effort health probe, and retention cleanup.
///
/// `store` must be the same handle the caller holds the project's advisory
/// lock for — this function performs no locking of its own (see
/// `hostkit-lock`, acquired by the CLI before calling in).
pub fn run_deploy(
    store: &mut Store,
    layout: &ProjectLayout,
    unit: &str,
    project: &Project,
    source: SourceSpec,
    options: &DeployOptions,
    reporter: &mut dyn Reporter,
) -> Result<DeployReport, HostKitError> {
    if !options.override_ratelimit {
        if let RateLimitDecision::Blocked(reason) = ratelimit::check_allowed(store, project)
            .map_err(|e| HostKitError::new(ErrorCode::DeployFailed, e.to_string()))?
        {
            let message = ratelimit::describe_block_reason(reason);
            reporter.warn(&message);
            let _ = store.emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Deploy,
                event_type: "rate_limited".into(),
                level: EventLevel::Warning,
                message: message.clone(),
                data: None,
                created_by: None,
            });
            return Err(HostKitError::new(ErrorCode::RateLimited, message));
        }
    }

    if project.paused {
        return Err(HostKitError::new(
            ErrorCode::ProjectPaused,
            format!("project {} is paused; resume it before deploying", project.name),
        )
        .with_suggestion("run `hostkit resume <project>`"));
    }

    let started_at = Utc::now();
    let start = Instant::now();
    reporter.info(&format!("deploying {}", project.name));
    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Deploy,
        event_type: "started".into(),
        level: EventLevel::Info,
        message: format!("deploying {}", project.name),
        data: Some(source.describe()),
        created_by: None,
    });

    match deploy_steps(store, layout, unit, project, &source, options) {
        Ok((release, files_synced)) => {
            let health = probe_health(unit, options);
            if let Some(report) = &health {
                if report.status != hostkit_health::HealthStatus::Healthy {
                    let message = format!(
                        "post-deploy health check reported {:?} for {}",
                        report.status, project.name
                    );
                    reporter.warn(&message);
                    let _ = store.emit_event(&NewEvent {
                        project_id: Some(project.id),
                        category: EventCategory::Health,
                        event_type: "degraded".into(),
                        level: EventLevel::Warning,
                        message,
                        data: None,
                        created_by: None,
                    });
                }
            }
            reporter.info(&format!("deploy completed for release {}", release.release_id));
            let _ = store.emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Deploy,
                event_type: "completed".into(),
                level: EventLevel::Info,
                message: format!("deploy completed for release {}", release.release_id),
                data: Some(serde_json::json!({
                    "files_synced": files_synced,
                    "duration_ms": start.elapsed().as_millis() as u64,
                    "release": release.release_id,
                })),
                created_by: None,
            });
            let _ = ratelimit::record_outcome(store, project.id, started_at, DeployOutcome::Success);
            let cleanup_errors =
                release::cleanup_old_releases(store, layout, project.id, options.keep_releases);
            Ok(DeployReport {
                release,
                files_synced,
                duration: start.elapsed(),
                health,
                cleanup_errors,
            })
        }
        Err(e) => {
            reporter.error(&e.message);
            let _ = store.emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Deploy,
                event_type: "failed".into(),
                level: EventLevel::Error,
                message: e.message.clone(),
                data: Some(serde_json::json!({ "code": e.code.as_str() })),
                created_by: None,
            });
            let _ = ratelimit::record_outcome(store, project.id, started_at, DeployOutcome::Failure);
            if ratelimit::check_and_maybe_pause(store, project).unwrap_or(false) {
                reporter.warn(&format!("{} auto-paused after repeated deploy failures", project.name));
            }
            Err(e)
        }
    }
}

fn deploy_steps(
    store: &mut Store,
    layout: &ProjectLayout,
    unit: &str,
    project: &Project,
    source: &SourceSpec,
    options: &DeployOptions,
) -> Result<(Release, u64), HostKitError> {
    let release_source = to_release_source(source);
    let release = release::create_release(store, layout, project, &release_source)?;
    let release_dir = layout.release_dir(&release.release_id);

    let checkpoint_id = match &options.dump_command {
        Some(dump) => {
            let database_name = options.database_name.as_deref().unwrap_or(&project.name);
            Some(
                checkpoint::create_checkpoint(
                    store,
                    layout,
                    project,
                    dump,
                    database_name,
                    None,
                    Some(release.id),
                    CheckpointKind::PreDeploy,
                    Some("deploy"),
                )?
                .id,
            )
        }
        None => None,
    };

    let env_snapshot = layout.read_env().ok();
    release::update_release_snapshot(store, release.id, checkpoint_id, env_snapshot.as_deref())
        .map_err(|e| {
            HostKitError::new(
                ErrorCode::DeployFailed,
                format!("failed to record release snapshot: {e}"),
            )
        })?;

    let files_synced = materialize_source(source, &release_dir)?;

    if let Some(build) = &options.build_command {
        run_lifecycle_command(build, &release_dir, ErrorCode::BuildFailed)?;
    }
    if let Some(install) = &options.install_command {
        run_lifecycle_command(install, &release_dir, ErrorCode::InstallFailed)?;
    }
    if !options.secrets.is_empty() {
        inject_secrets(layout, &options.secrets)?;
    }

    release::activate_release(store, layout, project, &release)?;

    if options.restart {
        hostkit_supervisor::restart(unit)?;
    }

    Ok((release, files_synced))
}

fn to_release_source(source: &SourceSpec) -> ReleaseSource {
    match source {
        SourceSpec::LocalPath { path } => ReleaseSource::LocalPath {
            path: path.to_string_lossy().into_owned(),
        },
        SourceSpec::Git { url, git_ref } => ReleaseSource::Git {
            url: url.clone(),
            git_ref: git_ref.clone(),
            commit: None,
        },
    }
}

const EXCLUDED_DIRS: [&str; 3] = [".git", ".hg", ".svn"];

fn materialize_source(source: &SourceSpec, release_dir: &Path) -> Result<u64, HostKitError> {
    match source {
        SourceSpec::LocalPath { path } => copy_tree_excluding_vcs(path, release_dir).map_err(|e| {
            HostKitError::new(
                ErrorCode::SourceNotFound,
                format!("failed to copy source from {}: {e}", path.display()),
            )
        }),
        SourceSpec::Git { url, git_ref } => {
            hostkit_git::validate_git_url(url)?;
            hostkit_git::clone(url, git_ref, release_dir).map_err(|e| {
                HostKitError::new(ErrorCode::SourceNotFound, format!("git clone failed: {e}"))
            })?;
            Ok(count_files(release_dir))
        }
    }
}

fn copy_tree_excluding_vcs(src: &Path, dst: &Path) -> std::io::Result<u64> {
    let mut count = 0;
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if EXCLUDED_DIRS.iter().any(|d| name == std::ffi::OsStr::new(d)) {
            continue;
        }
        let file_type = entry.file_type()?;
        let dst_path = dst.join(&name);
        if file_type.is_dir() {
            count += copy_tree_excluding_vcs(&entry.path(), &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &dst_path)?;
            count += 1;
        }
    }
    Ok(count)
}

fn count_files(dir: &Path) -> u64 {
    let mut count = 0;
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                count += count_files(&entry.path());
            } else {
                count += 1;
            }
        }
    }
    count
}

fn run_lifecycle_command(
    command: &[String],
    working_dir: &Path,
    error_code: ErrorCode,
) -> Result<(), HostKitError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(());
    };
    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = hostkit_process::run_command_with_timeout(
        program,
        &arg_refs,
        working_dir,
        Some(Duration::from_secs(600)),
    )?;
    if !output.success() {
        return Err(HostKitError::new(
            error_code,
            format!("{program} failed: {}", output.stderr.trim()),
        ));
    }
    Ok(())
}

/// Merges `secrets` into the project's persistent `.env`, overwriting
/// existing keys in place and appending new ones. Only key names are ever
/// logged by the caller — this function itself never logs at all.
fn inject_secrets(layout: &ProjectLayout, secrets: &[(String, String)]) -> Result<(), HostKitError> {
    let existing = layout.read_env().unwrap_or_default();
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();
    for (key, value) in secrets {
        let prefix = format!("{key}=");
        let line = format!("{key}={value}");
        match lines.iter().position(|l| l.starts_with(&prefix)) {
            Some(pos) => lines[pos] = line,
            None => lines.push(line),
        }
    }
    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    layout.write_env(&contents).map_err(|e| {
        HostKitError::new(ErrorCode::DeployFailed, format!("failed to inject secrets: {e}"))
    })
}

/// A failed probe is a warning, never a deploy failure — the release is
/// already active by the time this runs, so failing it here would report
/// success as an error without undoing anything.
fn probe_health(unit: &str, options: &DeployOptions) -> Option<hostkit_health::HealthReport> {
    let endpoint = options.health_endpoint.as_deref()?;
    let request = hostkit_health::HealthCheckRequest {
        unit,
        base_url: endpoint,
        endpoint: "/health",
        timeout: options.health_timeout,
        expected_content: options.expected_content.as_deref(),
        database_url: None,
        auth_unit: None,
    };
    hostkit_health::check_health(&request).ok()
}
