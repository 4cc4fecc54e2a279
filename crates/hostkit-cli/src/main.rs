use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use hostkit_config::{CliOverrides, HostKitConfig, RuntimeConfig};
use hostkit_core::checkpoint::{self, DumpCommand, RestoreCommand};
use hostkit_core::deploy::{self, DeployOptions, SourceSpec};
use hostkit_core::deprovision;
use hostkit_core::provision::{self, ProvisionSpec};
use hostkit_core::ratelimit::{self, BlockReason, RateLimitDecision};
use hostkit_core::release;
use hostkit_core::rollback::{self, RollbackOptions};
use hostkit_core::scheduled_task::{self, ScheduledTaskSpec};
use hostkit_core::sudoers;
use hostkit_core::worker::{self, WorkerSpec};
use hostkit_core::Reporter;
use hostkit_fs::ProjectLayout;
use hostkit_lock::LockFile;
use hostkit_store::{EventFilter, Store};
use hostkit_types::{
    CheckpointKind, ErrorCode, EventCategory, EventLevel, HostKitError, Project, ResourceLimits, Runtime,
};

/// How long a CLI invocation will wait to acquire a project's operation lock
/// before giving up. Long enough to outlast another deploy/rollback already
/// in flight, short enough that a genuinely stuck lock still surfaces.
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Parser, Debug)]
#[command(name = "hostkit", version)]
#[command(about = "Single-host deployment control plane")]
struct Cli {
    /// Emit machine-readable JSON on stdout instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to hostkit.toml (default: ./hostkit.toml, then /etc/hostkit/hostkit.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the metadata database path.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Override the systemd unit directory (used by tests).
    #[arg(long, global = true)]
    unit_dir: Option<PathBuf>,

    /// Override the sudoers.d directory (used by tests).
    #[arg(long, global = true)]
    sudoers_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision a new project: Linux user, home tree, and main service unit.
    Provision(ProvisionArgs),
    /// Inspect and manage projects.
    #[command(subcommand)]
    Project(ProjectCmd),
    /// Deploy a new release.
    Deploy(DeployArgs),
    /// Roll back to a previous release.
    Rollback(RollbackArgs),
    /// Inspect a project's releases.
    #[command(subcommand)]
    Release(ReleaseCmd),
    /// Create, list, restore, and delete database checkpoints.
    #[command(subcommand)]
    Checkpoint(CheckpointCmd),
    /// Control a project's main service unit.
    #[command(subcommand)]
    Service(ServiceCmd),
    /// Manage background worker units.
    #[command(subcommand)]
    Worker(WorkerCmd),
    /// Manage cron-scheduled task units.
    #[command(subcommand)]
    Cron(CronCmd),
    /// Configure resource, rate, and auto-pause limits.
    #[command(subcommand)]
    Limits(LimitsCmd),
    /// Inspect or reset a project's deploy rate limit state.
    #[command(subcommand)]
    Ratelimit(RatelimitCmd),
    /// Run a one-off health check against a project.
    #[command(subcommand)]
    Health(HealthCmd),
    /// Diagnose recent failures from logs or deploy history.
    #[command(subcommand)]
    Diagnose(DiagnoseCmd),
    /// Tail a project's service logs.
    #[command(subcommand)]
    Log(LogCmd),
    /// Inspect or edit a project's environment file.
    #[command(subcommand)]
    Env(EnvCmd),
    /// Query or clean up the event journal.
    #[command(subcommand)]
    Event(EventCmd),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RuntimeArg {
    Python,
    Node,
    Nextjs,
    Static,
}

impl From<RuntimeArg> for Runtime {
    fn from(value: RuntimeArg) -> Self {
        match value {
            RuntimeArg::Python => Runtime::Python,
            RuntimeArg::Node => Runtime::Node,
            RuntimeArg::Nextjs => Runtime::Nextjs,
            RuntimeArg::Static => Runtime::Static,
        }
    }
}

#[derive(Parser, Debug)]
struct ProvisionArgs {
    name: String,
    #[arg(long, value_enum, default_value = "python")]
    runtime: RuntimeArg,
    #[arg(long)]
    domain: Option<String>,
    #[arg(long)]
    git_url: Option<String>,
    #[arg(long)]
    git_branch: Option<String>,
}

#[derive(Subcommand, Debug)]
enum ProjectCmd {
    List,
    Show { name: String },
    Pause { name: String },
    Resume { name: String },
    /// Tear down a project: services, sudoers grant, filesystem, and rows.
    Deprovision { name: String },
}

#[derive(Parser, Debug)]
struct DeployArgs {
    project: String,
    /// Deploy from a local directory instead of git.
    #[arg(long, conflicts_with = "git_url")]
    source: Option<PathBuf>,
    #[arg(long)]
    git_url: Option<String>,
    #[arg(long, default_value = "main")]
    git_ref: String,
    #[arg(long)]
    build: Option<String>,
    #[arg(long)]
    install: Option<String>,
    /// KEY=VALUE, repeatable.
    #[arg(long = "secret")]
    secrets: Vec<String>,
    #[arg(long)]
    no_restart: bool,
    #[arg(long)]
    override_ratelimit: bool,
    #[arg(long)]
    dump_program: Option<String>,
    #[arg(long = "dump-arg")]
    dump_args: Vec<String>,
    #[arg(long)]
    database_name: Option<String>,
    #[arg(long)]
    health_endpoint: Option<String>,
    #[arg(long, default_value = "10s")]
    health_timeout: String,
    #[arg(long)]
    expected_content: Option<String>,
    #[arg(long)]
    keep: Option<usize>,
}

#[derive(Parser, Debug)]
struct RollbackArgs {
    project: String,
    /// Target release id; defaults to the previous release.
    #[arg(long)]
    release: Option<i64>,
    /// Also restore the checkpoint and env snapshot taken before that release.
    #[arg(long)]
    full: bool,
    #[arg(long)]
    no_restart: bool,
    #[arg(long)]
    dry_run: bool,
    #[arg(long, required_unless_present = "dry_run")]
    restore_program: Option<String>,
    #[arg(long = "restore-arg")]
    restore_args: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum ReleaseCmd {
    List {
        project: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointCmd {
    Create {
        project: String,
        dump_program: String,
        #[arg(long = "dump-arg")]
        dump_args: Vec<String>,
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        database_name: Option<String>,
    },
    List {
        project: String,
    },
    Restore {
        project: String,
        checkpoint_id: i64,
        restore_program: String,
        #[arg(long = "restore-arg")]
        restore_args: Vec<String>,
    },
    Delete {
        project: String,
        checkpoint_id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ServiceCmd {
    Start { project: String },
    Stop { project: String },
    Restart { project: String },
    Status { project: String },
    Logs {
        project: String,
        #[arg(long, default_value_t = 100)]
        lines: u32,
        #[arg(long)]
        errors_only: bool,
    },
}

#[derive(Subcommand, Debug)]
enum WorkerCmd {
    Create {
        project: String,
        name: String,
        command: String,
    },
    List {
        project: String,
    },
    Start {
        project: String,
        name: String,
    },
    Stop {
        project: String,
        name: String,
    },
    Restart {
        project: String,
        name: String,
    },
    Status {
        project: String,
        name: String,
    },
    Delete {
        project: String,
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum CronCmd {
    Create {
        project: String,
        name: String,
        cron_expression: String,
        command: String,
    },
    List {
        project: String,
    },
    Enable {
        project: String,
        name: String,
    },
    Disable {
        project: String,
        name: String,
    },
    Delete {
        project: String,
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum LimitsCmd {
    SetResource {
        project: String,
        #[arg(long)]
        cpu_percent: Option<u32>,
        #[arg(long)]
        memory_max_mb: Option<u32>,
        #[arg(long)]
        memory_high_mb: Option<u32>,
        #[arg(long)]
        disk_quota_mb: Option<u32>,
        #[arg(long)]
        tasks_max: Option<u32>,
        #[arg(long, default_value_t = true)]
        enabled: bool,
    },
    SetRateLimit {
        project: String,
        #[arg(long)]
        max_deploys: u32,
        #[arg(long)]
        window_minutes: u32,
        #[arg(long)]
        failure_cooldown_minutes: u32,
        #[arg(long)]
        consecutive_failure_limit: u32,
    },
    SetAutoPause {
        project: String,
        #[arg(long)]
        enabled: bool,
        #[arg(long)]
        failure_threshold: u32,
        #[arg(long)]
        window_minutes: u32,
    },
}

#[derive(Subcommand, Debug)]
enum RatelimitCmd {
    Status { project: String },
    Resume { project: String },
}

#[derive(Subcommand, Debug)]
enum HealthCmd {
    Check {
        project: String,
        #[arg(long, default_value = "/")]
        endpoint: String,
        #[arg(long, default_value = "10s")]
        timeout: String,
        #[arg(long)]
        expected_content: Option<String>,
        #[arg(long)]
        database_url: Option<String>,
        #[arg(long)]
        auth_unit: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DiagnoseCmd {
    Logs {
        project: String,
        #[arg(long, default_value_t = 200)]
        lines: u32,
    },
    CrashLoop {
        project: String,
        #[arg(long, default_value = "30m")]
        window: String,
        #[arg(long, default_value_t = 3)]
        threshold: u32,
    },
}

#[derive(Subcommand, Debug)]
enum LogCmd {
    Tail {
        project: String,
        #[arg(long, default_value_t = 100)]
        lines: u32,
        #[arg(long)]
        errors_only: bool,
    },
}

#[derive(Subcommand, Debug)]
enum EnvCmd {
    Show { project: String },
    /// KEY=VALUE pairs, repeatable.
    Set { project: String, pairs: Vec<String> },
}

#[derive(Subcommand, Debug)]
enum EventCmd {
    Query {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        level: Option<String>,
        /// ISO-8601 timestamp, or a relative form like "1h", "24h", "7d", "2 days ago".
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    /// Deletes journal entries older than `older_than_days`.
    Cleanup {
        #[arg(long)]
        older_than_days: i64,
    },
}

/// Reports pipeline progress the way every HostKit engine expects: `info`
/// lines go quiet under `--json` so stdout stays a single payload, `warn`/
/// `error` always reach stderr.
struct CliReporter {
    json: bool,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        if !self.json {
            eprintln!("[info] {msg}");
        }
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

enum CliError {
    Typed(HostKitError),
    Other(anyhow::Error),
}

impl From<HostKitError> for CliError {
    fn from(err: HostKitError) -> Self {
        CliError::Typed(err)
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Other(err)
    }
}

/// A successful command's result: a human-readable message plus whatever
/// structured payload `--json` should surface in `data`.
struct Outcome {
    message: String,
    data: serde_json::Value,
}

impl Outcome {
    fn new(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }

    fn plain(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: serde_json::Value::Null,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    match dispatch(&cli) {
        Ok(outcome) => {
            if json {
                let payload = json!({
                    "success": true,
                    "message": outcome.message,
                    "data": outcome.data,
                });
                println!("{payload}");
            } else {
                println!("{}", outcome.message);
            }
            std::process::exit(0);
        }
        Err(CliError::Typed(err)) => {
            if json {
                let payload = json!({
                    "success": false,
                    "code": err.code.as_str(),
                    "message": err.message,
                    "suggestion": err.suggestion,
                });
                println!("{payload}");
            } else {
                eprintln!("error: {}", err.message);
                if let Some(suggestion) = &err.suggestion {
                    eprintln!("hint: {suggestion}");
                }
            }
            std::process::exit(1);
        }
        Err(CliError::Other(err)) => {
            if json {
                let payload = json!({
                    "success": false,
                    "code": "INTERNAL",
                    "message": err.to_string(),
                });
                println!("{payload}");
            } else {
                eprintln!("error: {err:#}");
            }
            std::process::exit(1);
        }
    }
}

fn load_runtime_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let config = match &cli.config {
        Some(path) => HostKitConfig::load_from_file(path)?,
        None => HostKitConfig::discover()?.unwrap_or_default(),
    };
    let overrides = CliOverrides {
        db_path: cli.db_path.clone(),
        ..Default::default()
    };
    Ok(config.build_runtime_config(overrides))
}

fn unit_dir(cli: &Cli) -> PathBuf {
    cli.unit_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(hostkit_supervisor::UNIT_DIR))
}

fn sudoers_dir(cli: &Cli) -> PathBuf {
    cli.sudoers_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(sudoers::SUDOERS_DIR))
}

fn open_store(cli: &Cli, runtime: &RuntimeConfig) -> anyhow::Result<Store> {
    let _ = cli;
    Store::open(&runtime.db_path)
}

fn layout_for(project: &Project) -> ProjectLayout {
    ProjectLayout::new(&project.home_dir)
}

fn main_unit(project: &Project) -> String {
    hostkit_supervisor::unit_name(project, hostkit_supervisor::UnitKind::Main, None)
}

fn with_project_lock<T>(
    project: &Project,
    operation: &str,
    f: impl FnOnce() -> Result<T, CliError>,
) -> Result<T, CliError> {
    let layout = layout_for(project);
    let mut lock = LockFile::acquire_with_timeout(&layout.state_dir(), DEFAULT_LOCK_TIMEOUT)?;
    lock.set_operation(operation)?;
    f()
}

fn parse_duration(raw: &str) -> Result<Duration, CliError> {
    hostkit_duration::parse_duration(raw).map_err(|e| {
        CliError::Typed(HostKitError::new(ErrorCode::InvalidDuration, e.to_string()))
    })
}

fn parse_kv(raw: &str) -> Result<(String, String), CliError> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| {
            CliError::Typed(HostKitError::new(
                ErrorCode::InvalidKey,
                format!("expected KEY=VALUE, got {raw:?}"),
            ))
        })
}

fn dispatch(cli: &Cli) -> Result<Outcome, CliError> {
    let runtime = load_runtime_config(cli)?;
    let mut reporter = CliReporter { json: cli.json };

    match &cli.command {
        Commands::Provision(args) => cmd_provision(cli, &runtime, args, &mut reporter),
        Commands::Project(cmd) => cmd_project(cli, &runtime, cmd),
        Commands::Deploy(args) => cmd_deploy(cli, &runtime, args, &mut reporter),
        Commands::Rollback(args) => cmd_rollback(cli, &runtime, args, &mut reporter),
        Commands::Release(cmd) => cmd_release(cli, &runtime, cmd),
        Commands::Checkpoint(cmd) => cmd_checkpoint(cli, &runtime, cmd),
        Commands::Service(cmd) => cmd_service(cli, &runtime, cmd),
        Commands::Worker(cmd) => cmd_worker(cli, &runtime, cmd),
        Commands::Cron(cmd) => cmd_cron(cli, &runtime, cmd),
        Commands::Limits(cmd) => cmd_limits(cli, &runtime, cmd),
        Commands::Ratelimit(cmd) => cmd_ratelimit(cli, &runtime, cmd),
        Commands::Health(cmd) => cmd_health(cli, &runtime, cmd),
        Commands::Diagnose(cmd) => cmd_diagnose(cli, &runtime, cmd),
        Commands::Log(cmd) => cmd_log(cli, &runtime, cmd),
        Commands::Env(cmd) => cmd_env(cli, &runtime, cmd),
        Commands::Event(cmd) => cmd_event(cli, &runtime, cmd),
    }
}

fn cmd_provision(
    cli: &Cli,
    runtime: &RuntimeConfig,
    args: &ProvisionArgs,
    reporter: &mut dyn Reporter,
) -> Result<Outcome, CliError> {
    let mut store = open_store(cli, runtime)?;
    let spec = ProvisionSpec {
        name: &args.name,
        runtime: args.runtime.into(),
        domain: args.domain.as_deref(),
        git_url: args.git_url.as_deref(),
        git_branch: args.git_branch.as_deref(),
    };
    let report = provision::provision_project(
        &mut store,
        &unit_dir(cli),
        &sudoers_dir(cli),
        runtime.port_range.clone(),
        &spec,
        reporter,
    )?;

    let project_name = report.project.name.clone();
    let port = report.project.port;
    let data = json!({
        "project": project_name,
        "port": port,
        "home_dir": report.project.home_dir,
        "domain": report.domain.as_ref().map(|d| &d.hostname),
        "sidecars": report.sidecars.iter().map(|s| json!({
            "name": s.name,
            "succeeded": s.succeeded,
            "detail": s.detail,
        })).collect::<Vec<_>>(),
    });
    Ok(Outcome::new(
        format!("provisioned {project_name} on port {port}"),
        data,
    ))
}

fn cmd_project(cli: &Cli, runtime: &RuntimeConfig, cmd: &ProjectCmd) -> Result<Outcome, CliError> {
    let mut store = open_store(cli, runtime)?;
    match cmd {
        ProjectCmd::List => {
            let projects = store.list_projects()?;
            let data = json!(projects
                .iter()
                .map(|p| json!({
                    "name": p.name,
                    "runtime": p.runtime,
                    "port": p.port,
                    "paused": p.paused,
                }))
                .collect::<Vec<_>>());
            Ok(Outcome::new(format!("{} project(s)", projects.len()), data))
        }
        ProjectCmd::Show { name } => {
            let project = store.require_project_by_name(name)?;
            let data = serde_json::to_value(&project).map_err(anyhow::Error::from)?;
            Ok(Outcome::new(format!("project {name}"), data))
        }
        ProjectCmd::Pause { name } => {
            let project = store.require_project_by_name(name)?;
            with_project_lock(&project, "project.pause", || {
                store.set_paused(project.id, true)?;
                hostkit_supervisor::stop(&main_unit(&project))?;
                Ok(())
            })?;
            Ok(Outcome::plain(format!("paused {name}")))
        }
        ProjectCmd::Resume { name } => {
            let project = store.require_project_by_name(name)?;
            with_project_lock(&project, "project.resume", || {
                store.set_paused(project.id, false)?;
                ratelimit::resume(&store, project.id)?;
                hostkit_supervisor::start(&main_unit(&project))?;
                Ok(())
            })?;
            Ok(Outcome::plain(format!("resumed {name}")))
        }
        ProjectCmd::Deprovision { name } => {
            let project = store.require_project_by_name(name)?;
            let mut reporter = CliReporter { json: cli.json };
            let report = deprovision::deprovision_project(
                &mut store,
                &unit_dir(cli),
                &sudoers_dir(cli),
                &project,
                &mut reporter,
            )?;
            let data = json!({
                "unit_errors": report.unit_errors,
                "linux_user_removed": report.linux_user_removed,
            });
            Ok(Outcome::new(format!("deprovisioned {name}"), data))
        }
    }
}

fn cmd_deploy(
    cli: &Cli,
    runtime: &RuntimeConfig,
    args: &DeployArgs,
    reporter: &mut dyn Reporter,
) -> Result<Outcome, CliError> {
    let mut store = open_store(cli, runtime)?;
    let project = store.require_project_by_name(&args.project)?;
    let layout = layout_for(&project);
    let unit = main_unit(&project);

    let source = match (&args.source, &args.git_url) {
        (Some(path), _) => SourceSpec::LocalPath { path: path.clone() },
        (None, Some(url)) => SourceSpec::Git {
            url: url.clone(),
            git_ref: args.git_ref.clone(),
        },
        (None, None) => {
            return Err(CliError::Typed(HostKitError::new(
                ErrorCode::SourceNotFound,
                "either --source or --git-url is required",
            )))
        }
    };

    let secrets = args
        .secrets
        .iter()
        .map(|s| parse_kv(s))
        .collect::<Result<Vec<_>, _>>()?;

    let dump_command = args.dump_program.as_ref().map(|program| DumpCommand {
        program: program.clone(),
        args: args.dump_args.clone(),
    });

    let options = DeployOptions {
        build_command: args.build.as_ref().map(|c| shell_words(c)),
        install_command: args.install.as_ref().map(|c| shell_words(c)),
        secrets,
        restart: !args.no_restart,
        override_ratelimit: args.override_ratelimit,
        dump_command,
        database_name: args.database_name.clone(),
        health_endpoint: args.health_endpoint.clone(),
        health_timeout: parse_duration(&args.health_timeout)?,
        expected_content: args.expected_content.clone(),
        keep_releases: args.keep.unwrap_or(release::DEFAULT_KEEP_RELEASES),
    };

    let report = with_project_lock(&project, "deploy", || {
        deploy::run_deploy(&mut store, &layout, &unit, &project, source, &options, reporter)
            .map_err(CliError::from)
    })?;

    let release_id = report.release.release_id.clone();
    let data = json!({
        "release_id": release_id.clone(),
        "files_synced": report.files_synced,
        "duration_ms": report.duration.as_millis(),
        "health": report.health.as_ref().map(|h| json!({ "status": h.status })),
        "cleanup_errors": report.cleanup_errors,
    });
    Ok(Outcome::new(
        format!("deployed {} as release {}", args.project, release_id),
        data,
    ))
}

fn cmd_rollback(
    cli: &Cli,
    runtime: &RuntimeConfig,
    args: &RollbackArgs,
    reporter: &mut dyn Reporter,
) -> Result<Outcome, CliError> {
    let mut store = open_store(cli, runtime)?;
    let project = store.require_project_by_name(&args.project)?;
    let layout = layout_for(&project);
    let unit = main_unit(&project);

    let options = RollbackOptions {
        target_release_id: args.release,
        full: args.full,
        restart: !args.no_restart,
        dry_run: args.dry_run,
    };

    let restore_command = args.restore_program.as_ref().map(|program| RestoreCommand {
        program: program.clone(),
        args: args.restore_args.clone(),
    });

    let report = with_project_lock(&project, "rollback", || {
        rollback::run_rollback(
            &mut store,
            &layout,
            &unit,
            &project,
            &options,
            restore_command.as_ref(),
            reporter,
        )
        .map_err(CliError::from)
    })?;

    let target_release_id = report.plan.target.release_id.clone();
    let data = json!({
        "target_release_id": target_release_id.clone(),
        "restored_checkpoint": report.restored_checkpoint,
        "restored_env": report.restored_env,
        "dry_run": args.dry_run,
    });
    Ok(Outcome::new(
        format!("rolled back {} to release {}", args.project, target_release_id),
        data,
    ))
}

fn cmd_release(cli: &Cli, runtime: &RuntimeConfig, cmd: &ReleaseCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        ReleaseCmd::List { project, limit } => {
            let project = store.require_project_by_name(project)?;
            let releases = release::list_releases(&store, project.id, *limit)?;
            let data = json!(releases
                .iter()
                .map(|r| json!({
                    "release_id": r.release_id,
                    "is_current": r.is_current,
                    "source": r.source,
                    "created_at": r.created_at,
                }))
                .collect::<Vec<_>>());
            Ok(Outcome::new(format!("{} release(s)", releases.len()), data))
        }
    }
}

fn cmd_checkpoint(
    cli: &Cli,
    runtime: &RuntimeConfig,
    cmd: &CheckpointCmd,
) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        CheckpointCmd::Create {
            project,
            dump_program,
            dump_args,
            label,
            database_name,
        } => {
            let project = store.require_project_by_name(project)?;
            let layout = layout_for(&project);
            let dump = DumpCommand {
                program: dump_program.clone(),
                args: dump_args.clone(),
            };
            let database_name = database_name.clone().unwrap_or_else(|| project.name.clone());
            let checkpoint = with_project_lock(&project, "checkpoint.create", || {
                checkpoint::create_checkpoint(
                    &store,
                    &layout,
                    &project,
                    &dump,
                    &database_name,
                    label.as_deref(),
                    None,
                    CheckpointKind::Manual,
                    Some("manual"),
                )
                .map_err(CliError::from)
            })?;
            let data = serde_json::to_value(&checkpoint).map_err(anyhow::Error::from)?;
            Ok(Outcome::new(format!("created checkpoint {}", checkpoint.label), data))
        }
        CheckpointCmd::List { project } => {
            let project = store.require_project_by_name(project)?;
            let checkpoints = store.list_checkpoints(project.id)?;
            let data = json!(checkpoints);
            Ok(Outcome::new(format!("{} checkpoint(s)", checkpoints.len()), data))
        }
        CheckpointCmd::Restore {
            project,
            checkpoint_id,
            restore_program,
            restore_args,
        } => {
            let project = store.require_project_by_name(project)?;
            let layout = layout_for(&project);
            let restore = RestoreCommand {
                program: restore_program.clone(),
                args: restore_args.clone(),
            };
            let pre_restore = with_project_lock(&project, "checkpoint.restore", || {
                checkpoint::restore_checkpoint(&store, &layout, &project, *checkpoint_id, &restore, true, None)
                    .map_err(CliError::from)
            })?;
            let data = json!({
                "restored_from": checkpoint_id,
                "pre_restore_checkpoint": pre_restore.map(|c| c.id),
            });
            Ok(Outcome::new(format!("restored checkpoint {checkpoint_id}"), data))
        }
        CheckpointCmd::Delete { project, checkpoint_id } => {
            let project = store.require_project_by_name(project)?;
            checkpoint::delete_checkpoint(&store, &project, *checkpoint_id)?;
            Ok(Outcome::plain(format!("deleted checkpoint {checkpoint_id}")))
        }
    }
}

fn cmd_service(cli: &Cli, runtime: &RuntimeConfig, cmd: &ServiceCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        ServiceCmd::Start { project } => {
            let project = store.require_project_by_name(project)?;
            hostkit_supervisor::start(&main_unit(&project))?;
            Ok(Outcome::plain(format!("started {}", project.name)))
        }
        ServiceCmd::Stop { project } => {
            let project = store.require_project_by_name(project)?;
            hostkit_supervisor::stop(&main_unit(&project))?;
            Ok(Outcome::plain(format!("stopped {}", project.name)))
        }
        ServiceCmd::Restart { project } => {
            let project = store.require_project_by_name(project)?;
            hostkit_supervisor::restart(&main_unit(&project))?;
            Ok(Outcome::plain(format!("restarted {}", project.name)))
        }
        ServiceCmd::Status { project } => {
            let project = store.require_project_by_name(project)?;
            let unit = main_unit(&project);
            let active = hostkit_supervisor::is_active(&unit)?;
            let pid = hostkit_supervisor::main_pid(&unit)?;
            let data = json!({ "active": active, "pid": pid });
            Ok(Outcome::new(
                format!("{} is {}", project.name, if active { "active" } else { "inactive" }),
                data,
            ))
        }
        ServiceCmd::Logs {
            project,
            lines,
            errors_only,
        } => {
            let project = store.require_project_by_name(project)?;
            let logs = hostkit_supervisor::get_logs(&main_unit(&project), *lines, *errors_only)?;
            Ok(Outcome::new(logs.clone(), json!({ "logs": logs })))
        }
    }
}

fn cmd_worker(cli: &Cli, runtime: &RuntimeConfig, cmd: &WorkerCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        WorkerCmd::Create {
            project,
            name,
            command,
        } => {
            let project = store.require_project_by_name(project)?;
            let spec = WorkerSpec { name, command };
            let created = worker::create_worker(&store, &unit_dir(cli), &project, &spec)?;
            let data = serde_json::to_value(&created).map_err(anyhow::Error::from)?;
            Ok(Outcome::new(format!("created worker {name}"), data))
        }
        WorkerCmd::List { project } => {
            let project = store.require_project_by_name(project)?;
            let workers = worker::list_workers(&store, project.id)?;
            let data = json!(workers);
            Ok(Outcome::new(format!("{} worker(s)", workers.len()), data))
        }
        WorkerCmd::Start { project, name } => with_worker(&store, project, name, worker::start_worker, "started"),
        WorkerCmd::Stop { project, name } => with_worker(&store, project, name, worker::stop_worker, "stopped"),
        WorkerCmd::Restart { project, name } => {
            with_worker(&store, project, name, worker::restart_worker, "restarted")
        }
        WorkerCmd::Status { project, name } => {
            let project = store.require_project_by_name(project)?;
            let target = find_worker(&store, project.id, name)?;
            let active = worker::worker_status(&project, &target)?;
            Ok(Outcome::new(
                format!("{name} is {}", if active { "active" } else { "inactive" }),
                json!({ "active": active }),
            ))
        }
        WorkerCmd::Delete { project, name } => {
            let project = store.require_project_by_name(project)?;
            let target = find_worker(&store, project.id, name)?;
            worker::delete_worker(&store, &project, &target)?;
            Ok(Outcome::plain(format!("deleted worker {name}")))
        }
    }
}

fn find_worker(
    store: &Store,
    project_id: i64,
    name: &str,
) -> Result<hostkit_types::Worker, CliError> {
    worker::list_workers(store, project_id)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| {
            CliError::Typed(HostKitError::new(
                ErrorCode::ServiceNotFound,
                format!("no such worker: {name}"),
            ))
        })
}

fn with_worker(
    store: &Store,
    project: &str,
    name: &str,
    op: fn(&Store, &Project, &hostkit_types::Worker) -> Result<(), HostKitError>,
    verb: &str,
) -> Result<Outcome, CliError> {
    let project = store.require_project_by_name(project)?;
    let target = find_worker(store, project.id, name)?;
    op(store, &project, &target)?;
    Ok(Outcome::plain(format!("{verb} worker {name}")))
}

fn cmd_cron(cli: &Cli, runtime: &RuntimeConfig, cmd: &CronCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        CronCmd::Create {
            project,
            name,
            cron_expression,
            command,
        } => {
            let project = store.require_project_by_name(project)?;
            let spec = ScheduledTaskSpec {
                name,
                cron_expression,
                command,
            };
            let task = scheduled_task::create_scheduled_task(&store, &unit_dir(cli), &project, &spec)?;
            let data = serde_json::to_value(&task).map_err(anyhow::Error::from)?;
            Ok(Outcome::new(format!("created cron task {name}"), data))
        }
        CronCmd::List { project } => {
            let project = store.require_project_by_name(project)?;
            let tasks = scheduled_task::list_scheduled_tasks(&store, project.id)?;
            let data = json!(tasks);
            Ok(Outcome::new(format!("{} cron task(s)", tasks.len()), data))
        }
        CronCmd::Enable { project, name } => {
            let project = store.require_project_by_name(project)?;
            let task = find_task(&store, project.id, name)?;
            scheduled_task::enable_scheduled_task(&store, &project, &task)?;
            Ok(Outcome::plain(format!("enabled cron task {name}")))
        }
        CronCmd::Disable { project, name } => {
            let project = store.require_project_by_name(project)?;
            let task = find_task(&store, project.id, name)?;
            scheduled_task::disable_scheduled_task(&store, &project, &task)?;
            Ok(Outcome::plain(format!("disabled cron task {name}")))
        }
        CronCmd::Delete { project, name } => {
            let project = store.require_project_by_name(project)?;
            let task = find_task(&store, project.id, name)?;
            scheduled_task::delete_scheduled_task(&store, &project, &task)?;
            Ok(Outcome::plain(format!("deleted cron task {name}")))
        }
    }
}

fn find_task(
    store: &Store,
    project_id: i64,
    name: &str,
) -> Result<hostkit_types::ScheduledTask, CliError> {
    scheduled_task::list_scheduled_tasks(store, project_id)?
        .into_iter()
        .find(|t| t.name == name)
        .ok_or_else(|| {
            CliError::Typed(HostKitError::new(
                ErrorCode::ServiceNotFound,
                format!("no such cron task: {name}"),
            ))
        })
}

fn cmd_limits(cli: &Cli, runtime: &RuntimeConfig, cmd: &LimitsCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        LimitsCmd::SetResource {
            project,
            cpu_percent,
            memory_max_mb,
            memory_high_mb,
            disk_quota_mb,
            tasks_max,
            enabled,
        } => {
            let project = store.require_project_by_name(project)?;
            let limits = ResourceLimits {
                cpu_quota_percent: *cpu_percent,
                memory_max_mb: *memory_max_mb,
                memory_high_mb: *memory_high_mb,
                tasks_max: *tasks_max,
                disk_quota_mb: *disk_quota_mb,
                enabled: *enabled,
            };
            store.set_resource_limits(project.id, &limits)?;
            Ok(Outcome::plain(format!("updated resource limits for {}", project.name)))
        }
        LimitsCmd::SetRateLimit {
            project,
            max_deploys,
            window_minutes,
            failure_cooldown_minutes,
            consecutive_failure_limit,
        } => {
            let project = store.require_project_by_name(project)?;
            let config = hostkit_types::RateLimitConfig {
                max_deploys: *max_deploys,
                window_minutes: *window_minutes,
                failure_cooldown_minutes: *failure_cooldown_minutes,
                consecutive_failure_limit: *consecutive_failure_limit,
            };
            store.set_rate_limit_config(project.id, &config)?;
            Ok(Outcome::plain(format!("updated rate limit for {}", project.name)))
        }
        LimitsCmd::SetAutoPause {
            project,
            enabled,
            failure_threshold,
            window_minutes,
        } => {
            let project = store.require_project_by_name(project)?;
            let config = hostkit_types::AutoPauseConfig {
                enabled: *enabled,
                failure_threshold: *failure_threshold,
                window_minutes: *window_minutes,
            };
            store.set_auto_pause_config(project.id, &config)?;
            Ok(Outcome::plain(format!("updated auto-pause config for {}", project.name)))
        }
    }
}

fn cmd_ratelimit(cli: &Cli, runtime: &RuntimeConfig, cmd: &RatelimitCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        RatelimitCmd::Status { project } => {
            let project = store.require_project_by_name(project)?;
            let decision = ratelimit::check_allowed(&store, &project)?;
            let (allowed, detail) = match decision {
                RateLimitDecision::Allowed => (true, "allowed".to_string()),
                RateLimitDecision::Blocked(reason) => (false, describe_reason(reason)),
            };
            Ok(Outcome::new(detail.clone(), json!({ "allowed": allowed, "detail": detail })))
        }
        RatelimitCmd::Resume { project } => {
            let project = store.require_project_by_name(project)?;
            ratelimit::resume(&store, project.id)?;
            Ok(Outcome::plain(format!("resumed deploys for {}", project.name)))
        }
    }
}

fn describe_reason(reason: BlockReason) -> String {
    ratelimit::describe_block_reason(reason)
}

fn cmd_health(cli: &Cli, runtime: &RuntimeConfig, cmd: &HealthCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        HealthCmd::Check {
            project,
            endpoint,
            timeout,
            expected_content,
            database_url,
            auth_unit,
        } => {
            let project = store.require_project_by_name(project)?;
            let unit = main_unit(&project);
            let base_url = format!("http://127.0.0.1:{}", project.port);
            let req = hostkit_health::HealthCheckRequest {
                unit: &unit,
                base_url: &base_url,
                endpoint,
                timeout: parse_duration(timeout)?,
                expected_content: expected_content.as_deref(),
                database_url: database_url.as_deref(),
                auth_unit: auth_unit.as_deref(),
            };
            let report = hostkit_health::check_health(&req)?;
            let data = serde_json::to_value(&report).map_err(anyhow::Error::from)?;
            Ok(Outcome::new(format!("{} is {:?}", project.name, report.status), data))
        }
    }
}

fn cmd_diagnose(cli: &Cli, runtime: &RuntimeConfig, cmd: &DiagnoseCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        DiagnoseCmd::Logs { project, lines } => {
            let project = store.require_project_by_name(project)?;
            let logs = hostkit_supervisor::get_logs(&main_unit(&project), *lines, false)?;
            let findings = hostkit_health::diagnose_logs(&logs);
            let data = json!(findings
                .iter()
                .map(|f| json!({
                    "pattern": f.pattern,
                    "severity": f.severity,
                    "remedy": f.remedy,
                    "evidence": f.evidence,
                }))
                .collect::<Vec<_>>());
            Ok(Outcome::new(format!("{} finding(s)", findings.len()), data))
        }
        DiagnoseCmd::CrashLoop {
            project,
            window,
            threshold,
        } => {
            let project = store.require_project_by_name(project)?;
            let window = parse_duration(window)?;
            let since = chrono::Utc::now() - chrono::Duration::from_std(window).map_err(anyhow::Error::from)?;
            let history = store.deploy_history_since(project.id, since)?;
            let failed = history
                .iter()
                .filter(|h| h.outcome == hostkit_types::DeployOutcome::Failure)
                .count() as u32;
            let finding = hostkit_health::detect_crash_loop(failed, window, *threshold);
            match finding {
                Some(f) => Ok(Outcome::new(
                    format!("crash loop detected: {}", f.evidence),
                    json!({ "pattern": f.pattern, "remedy": f.remedy, "evidence": f.evidence }),
                )),
                None => Ok(Outcome::plain("no crash loop detected")),
            }
        }
    }
}

fn cmd_log(cli: &Cli, runtime: &RuntimeConfig, cmd: &LogCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        LogCmd::Tail {
            project,
            lines,
            errors_only,
        } => {
            let project = store.require_project_by_name(project)?;
            let logs = hostkit_supervisor::get_logs(&main_unit(&project), *lines, *errors_only)?;
            Ok(Outcome::new(logs.clone(), json!({ "logs": logs })))
        }
    }
}

fn cmd_env(cli: &Cli, runtime: &RuntimeConfig, cmd: &EnvCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        EnvCmd::Show { project } => {
            let project = store.require_project_by_name(project)?;
            let layout = layout_for(&project);
            let contents = layout.read_env()?;
            Ok(Outcome::new(contents.clone(), json!({ "env": contents })))
        }
        EnvCmd::Set { project, pairs } => {
            let project = store.require_project_by_name(project)?;
            let layout = layout_for(&project);
            let updates = pairs
                .iter()
                .map(|p| parse_kv(p))
                .collect::<Result<Vec<_>, _>>()?;
            with_project_lock(&project, "env.set", || {
                let existing = layout.read_env()?;
                let merged = merge_env(&existing, &updates);
                layout.write_env(&merged)?;
                Ok(())
            })?;
            Ok(Outcome::plain(format!("updated {} key(s)", updates.len())))
        }
    }
}

fn parse_category(raw: &str) -> Result<EventCategory, CliError> {
    let category = match raw {
        "deploy" => EventCategory::Deploy,
        "health" => EventCategory::Health,
        "auth" => EventCategory::Auth,
        "migrate" => EventCategory::Migrate,
        "cron" => EventCategory::Cron,
        "worker" => EventCategory::Worker,
        "service" => EventCategory::Service,
        "checkpoint" => EventCategory::Checkpoint,
        "alert" => EventCategory::Alert,
        "project" => EventCategory::Project,
        "git" => EventCategory::Git,
        other => {
            return Err(CliError::Typed(HostKitError::new(
                ErrorCode::InvalidKey,
                format!("unknown event category: {other}"),
            )))
        }
    };
    Ok(category)
}

fn parse_level(raw: &str) -> Result<EventLevel, CliError> {
    let level = match raw {
        "debug" => EventLevel::Debug,
        "info" => EventLevel::Info,
        "warning" => EventLevel::Warning,
        "error" => EventLevel::Error,
        "critical" => EventLevel::Critical,
        other => {
            return Err(CliError::Typed(HostKitError::new(
                ErrorCode::InvalidKey,
                format!("unknown event level: {other}"),
            )))
        }
    };
    Ok(level)
}

fn cmd_event(cli: &Cli, runtime: &RuntimeConfig, cmd: &EventCmd) -> Result<Outcome, CliError> {
    let store = open_store(cli, runtime)?;
    match cmd {
        EventCmd::Query {
            project,
            category,
            level,
            since,
            until,
            limit,
            offset,
        } => {
            let project_id = match project {
                Some(name) => Some(store.require_project_by_name(name)?.id),
                None => None,
            };
            let filter = EventFilter {
                project_id,
                category: category.as_deref().map(parse_category).transpose()?,
                level: level.as_deref().map(parse_level).transpose()?,
                since: since
                    .as_deref()
                    .map(hostkit_store::parse_time_filter)
                    .transpose()
                    .map_err(anyhow::Error::from)?,
                until: until
                    .as_deref()
                    .map(hostkit_store::parse_time_filter)
                    .transpose()
                    .map_err(anyhow::Error::from)?,
                limit: Some(*limit),
                offset: Some(*offset),
            };
            let events = store.query_events(&filter)?;
            let data = json!(events);
            Ok(Outcome::new(format!("{} event(s)", events.len()), data))
        }
        EventCmd::Cleanup { older_than_days } => {
            let deleted = store.cleanup_events(*older_than_days)?;
            Ok(Outcome::new(
                format!("deleted {deleted} event(s) older than {older_than_days} day(s)"),
                json!({ "deleted": deleted }),
            ))
        }
    }
}

/// Merges `updates` into an existing `.env` file's contents, overwriting
/// keys that already exist and appending the rest.
fn merge_env(existing: &str, updates: &[(String, String)]) -> String {
    let mut lines: Vec<String> = existing.lines().map(|l| l.to_string()).collect();
    for (key, value) in updates {
        let prefix = format!("{key}=");
        if let Some(line) = lines.iter_mut().find(|l| l.starts_with(&prefix)) {
            *line = format!("{key}={value}");
        } else {
            lines.push(format!("{key}={value}"));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Minimal shell-word split for `--build`/`--install` commands: splits on
/// whitespace, no quoting support. Good enough for the simple build/install
/// one-liners runtimes actually use (`npm run build`, `pip install -r ...`).
fn shell_words(command: &str) -> Vec<String> {
    command.split_whitespace().map(|w| w.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kv_splits_on_first_equals() {
        let (k, v) = parse_kv("DATABASE_URL=postgres://x=y").expect("parse");
        assert_eq!(k, "DATABASE_URL");
        assert_eq!(v, "postgres://x=y");
    }

    #[test]
    fn parse_kv_rejects_missing_equals() {
        assert!(parse_kv("NO_EQUALS_HERE").is_err());
    }

    #[test]
    fn shell_words_splits_on_whitespace() {
        assert_eq!(
            shell_words("npm run build"),
            vec!["npm".to_string(), "run".to_string(), "build".to_string()]
        );
    }

    #[test]
    fn merge_env_overwrites_existing_key_in_place() {
        let existing = "FOO=old\nBAR=keep\n";
        let merged = merge_env(existing, &[("FOO".to_string(), "new".to_string())]);
        assert!(merged.contains("FOO=new"));
        assert!(merged.contains("BAR=keep"));
        assert!(!merged.contains("FOO=old"));
    }

    #[test]
    fn merge_env_appends_new_key() {
        let merged = merge_env("FOO=old\n", &[("BAZ".to_string(), "1".to_string())]);
        assert!(merged.contains("FOO=old"));
        assert!(merged.contains("BAZ=1"));
    }

    #[test]
    fn cli_reporter_suppresses_info_in_json_mode() {
        let mut reporter = CliReporter { json: true };
        reporter.info("should not panic");
        reporter.warn("still goes to stderr");
    }

    #[test]
    fn cli_parses_provision_subcommand() {
        let cli = Cli::parse_from(["hostkit", "provision", "blog", "--runtime", "node"]);
        match cli.command {
            Commands::Provision(args) => {
                assert_eq!(args.name, "blog");
                assert!(matches!(args.runtime, RuntimeArg::Node));
            }
            _ => panic!("expected provision command"),
        }
    }

    #[test]
    fn cli_parses_deploy_with_repeated_secrets() {
        let cli = Cli::parse_from([
            "hostkit",
            "deploy",
            "blog",
            "--git-url",
            "https://example.com/blog.git",
            "--secret",
            "A=1",
            "--secret",
            "B=2",
        ]);
        match cli.command {
            Commands::Deploy(args) => assert_eq!(args.secrets, vec!["A=1", "B=2"]),
            _ => panic!("expected deploy command"),
        }
    }
}
