//! Domain entities and the typed error model shared across HostKit crates.
//!
//! Every entity here maps to a table in the metadata store (`hostkit-store`)
//! and is the unit of data passed between the CLI, the core engines, and the
//! supervisor/health layers. Nothing in this crate talks to a filesystem,
//! database, or subprocess — it's pure data plus the small amount of
//! validation logic (project name rules, error codes) that every other
//! crate needs to agree on.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub use error::{ErrorCode, HostKitError};

/// A deployed application and everything HostKit knows about hosting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub runtime: Runtime,
    pub linux_username: String,
    pub home_dir: String,
    pub port: u16,
    pub paused: bool,
    pub resource_limits: ResourceLimits,
    pub rate_limit_config: RateLimitConfig,
    pub auto_pause_config: AutoPauseConfig,
    pub created_at: DateTime<Utc>,
}

/// Closed set of application runtimes HostKit knows how to build, install,
/// and start. Drives the runtime-appropriate build/install commands the
/// Deploy Pipeline invokes (see `hostkit-core`'s deploy module) — there is
/// no stored per-project command string, just this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Runtime {
    Python,
    Node,
    Nextjs,
    Static,
}

/// A project's current operational state. Always derived from the
/// supervisor unit's live status plus the `paused` flag, never its own
/// persisted column — storing it redundantly would let it drift from the
/// process the supervisor actually controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Running,
    Stopped,
    Paused,
    Failed,
}

/// Project name rules from the data model's boundary tests: 3-32 characters,
/// lowercase alphanumeric plus `-`, must start with a letter.
pub fn validate_project_name(name: &str) -> Result<(), HostKitError> {
    let len = name.chars().count();
    if !(3..=32).contains(&len) {
        return Err(HostKitError::new(
            ErrorCode::InvalidProjectName,
            format!("project name must be 3-32 characters, got {len}"),
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().expect("length checked above");
    if !first.is_ascii_lowercase() {
        return Err(HostKitError::new(
            ErrorCode::InvalidProjectName,
            "project name must start with a lowercase letter",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(HostKitError::new(
            ErrorCode::InvalidProjectName,
            "project name may only contain lowercase letters, digits, and '-'",
        ));
    }
    Ok(())
}

/// A materialized copy of a project's source under `releases/<release_id>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: i64,
    pub project_id: i64,
    pub release_id: String,
    pub release_path: String,
    pub is_current: bool,
    pub source: ReleaseSource,
    /// The checkpoint taken just before this release was deployed, if any —
    /// consulted by `full` rollback to restore the database alongside the
    /// files.
    pub checkpoint_id: Option<i64>,
    /// JSON-serialized `.env` contents at deploy time, restored by `full`
    /// rollback alongside the checkpoint.
    pub env_snapshot: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Where a release's files came from, recorded for forensics and re-deploys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReleaseSource {
    LocalPath {
        path: String,
    },
    Git {
        url: String,
        #[serde(rename = "ref")]
        git_ref: String,
        commit: Option<String>,
    },
}

/// A point-in-time snapshot of a release's files and env, restorable later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub project_id: i64,
    pub release_id: Option<i64>,
    pub label: String,
    /// What triggered this checkpoint, e.g. `"deploy"`, `"restore"`,
    /// `"cron:nightly-digest"`, or `None` for a bare manual call.
    pub trigger_source: Option<String>,
    pub database_name: String,
    pub backup_path: String,
    pub size_bytes: i64,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    /// `None` for [`CheckpointKind::Manual`], which never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Manual,
    PreMigration,
    PreDeploy,
    PreRestore,
    /// Taken by a scheduled (cron) checkpoint task rather than a deploy/
    /// restore gate.
    Scheduled,
    /// Taken automatically outside any of the above triggers (e.g. a
    /// periodic background snapshot).
    Auto,
}

impl CheckpointKind {
    /// Manual checkpoints are exempt from `cleanup_expired` per the data model's invariants.
    pub fn is_expirable(self) -> bool {
        !matches!(self, CheckpointKind::Manual)
    }

    /// Retention window before `cleanup_expired_checkpoints` removes this
    /// checkpoint, or `None` for "never" (manual).
    pub fn retention_days(self) -> Option<i64> {
        match self {
            CheckpointKind::Manual => None,
            CheckpointKind::PreMigration => Some(30),
            CheckpointKind::PreDeploy => Some(14),
            CheckpointKind::PreRestore => Some(7),
            CheckpointKind::Scheduled => Some(7),
            CheckpointKind::Auto => Some(7),
        }
    }
}

/// A hostname routed to a project, with its SSL provisioning state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub project_id: i64,
    pub hostname: String,
    pub ssl_enabled: bool,
    pub ssl_last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// systemd resource controls applied to a project's service unit. Any field
/// left `None` means "unlimited on that axis". `disk_quota_mb` is advisory
/// only — nothing in `hostkit-supervisor` enforces it at the systemd level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_quota_percent: Option<u32>,
    pub memory_max_mb: Option<u32>,
    pub memory_high_mb: Option<u32>,
    pub tasks_max: Option<u32>,
    pub disk_quota_mb: Option<u32>,
    pub enabled: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_quota_percent: None,
            memory_max_mb: None,
            memory_high_mb: None,
            tasks_max: None,
            disk_quota_mb: None,
            enabled: true,
        }
    }
}

impl ResourceLimits {
    /// Checks the one cross-field invariant the data model names: when both
    /// a high and a max memory watermark are set, high must not exceed max.
    pub fn validate(&self) -> Result<(), HostKitError> {
        if let (Some(high), Some(max)) = (self.memory_high_mb, self.memory_max_mb) {
            if high > max {
                return Err(HostKitError::new(
                    ErrorCode::InvalidResourceLimits,
                    format!("memory_high_mb ({high}) must not exceed memory_max_mb ({max})"),
                ));
            }
        }
        Ok(())
    }
}

/// Sliding-window deploy rate limit for a project. See `hostkit-core`'s
/// rate-limit engine for `check_allowed`'s use of these fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_deploys: u32,
    pub window_minutes: u32,
    pub failure_cooldown_minutes: u32,
    pub consecutive_failure_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_deploys: 10,
            window_minutes: 60,
            failure_cooldown_minutes: 5,
            consecutive_failure_limit: 3,
        }
    }
}

/// One row of a project's deploy attempt history, consulted by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeployHistoryEntry {
    pub id: i64,
    pub project_id: i64,
    pub started_at: DateTime<Utc>,
    pub outcome: DeployOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoPauseConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub window_minutes: u32,
}

impl Default for AutoPauseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            window_minutes: 10,
        }
    }
}

/// An append-only row in the Event Journal. Rows are never updated or deleted;
/// `id` is monotonic within a store (see the data model's invariants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub project_id: Option<i64>,
    pub category: EventCategory,
    /// The specific thing that happened within `category`, e.g.
    /// `"started"`, `"rate_limited"`, `"step_failed"`. Free text rather than
    /// its own closed enum — new event types shouldn't require a crate-wide
    /// schema bump.
    pub event_type: String,
    pub level: EventLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Closed set of event categories the journal groups by. Paired with a free-
/// text `event_type` on [`Event`] for the specific thing that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Deploy,
    Health,
    Auth,
    Migrate,
    Cron,
    Worker,
    Service,
    Checkpoint,
    Alert,
    Project,
    Git,
}

impl EventCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::Deploy => "deploy",
            EventCategory::Health => "health",
            EventCategory::Auth => "auth",
            EventCategory::Migrate => "migrate",
            EventCategory::Cron => "cron",
            EventCategory::Worker => "worker",
            EventCategory::Service => "service",
            EventCategory::Checkpoint => "checkpoint",
            EventCategory::Alert => "alert",
            EventCategory::Project => "project",
            EventCategory::Git => "git",
        }
    }
}

/// A recurring cron-scheduled command run under a systemd timer unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub cron_expression: String,
    pub command: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A long-running background process managed alongside the project's web service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub command: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// A human or automation identity permitted to invoke HostKit operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    pub username: String,
    pub role: OperatorRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Admin,
    Deployer,
    ReadOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertChannel {
    pub id: i64,
    pub project_id: i64,
    pub kind: AlertChannelKind,
    pub target: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannelKind {
    Webhook,
    Email,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertHistoryEntry {
    pub id: i64,
    pub project_id: i64,
    pub channel_kind: AlertChannelKind,
    pub event_category: EventCategory,
    pub sent_at: DateTime<Utc>,
    pub success: bool,
}

/// One attempt to provision or renew a domain's TLS certificate, recorded
/// regardless of outcome so the rate limit on attempts-per-day can be
/// enforced without re-parsing CA logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SslAttempt {
    pub id: i64,
    pub project_id: i64,
    pub domain: String,
    pub succeeded: bool,
    pub error_message: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// One image generated through the shared image-generation capability,
/// recorded for per-project usage/cost tracking and rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRecord {
    pub id: i64,
    pub project_id: i64,
    pub model: String,
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub image_url: String,
    pub cost: f64,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// A project's git remote configuration, used by the Deploy Pipeline's source
/// materialization step when a release isn't sourced from a local path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitConfigRow {
    pub project_id: i64,
    pub remote_url: String,
    pub default_branch: String,
    pub deploy_key_path: Option<String>,
}

/// Wall-clock window helper shared by the rate-limit and auto-pause engines:
/// both ask "how many rows in the trailing N minutes".
pub fn window_start(now: DateTime<Utc>, window_minutes: u32) -> DateTime<Utc> {
    now - chrono::Duration::minutes(window_minutes as i64)
}

/// Converts a `hostkit-duration`-parsed `Duration` to whole minutes, rounding
/// down, for config fields that accept `"10m"` but store `u32` minutes.
pub fn duration_to_minutes(duration: Duration) -> u32 {
    (duration.as_secs() / 60) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_name_length_boundaries() {
        assert!(validate_project_name("ab").is_err());
        assert!(validate_project_name("abc").is_ok());
        assert!(validate_project_name(&"a".repeat(32)).is_ok());
        assert!(validate_project_name(&"a".repeat(33)).is_err());
    }

    #[test]
    fn project_name_must_start_with_letter() {
        assert!(validate_project_name("1abc").is_err());
    }

    #[test]
    fn project_name_rejects_uppercase_and_symbols() {
        assert!(validate_project_name("MyApp").is_err());
        assert!(validate_project_name("my_app").is_err());
        assert!(validate_project_name("my.app").is_err());
    }

    #[test]
    fn manual_checkpoints_are_not_expirable() {
        assert!(!CheckpointKind::Manual.is_expirable());
        assert!(CheckpointKind::PreDeploy.is_expirable());
        assert!(CheckpointKind::Scheduled.is_expirable());
    }

    #[test]
    fn event_category_strings_are_stable() {
        assert_eq!(EventCategory::Deploy.as_str(), "deploy");
        assert_eq!(EventCategory::Project.as_str(), "project");
    }

    #[test]
    fn resource_limits_reject_high_above_max() {
        let limits = ResourceLimits {
            memory_high_mb: Some(600),
            memory_max_mb: Some(512),
            ..Default::default()
        };
        let err = limits.validate().expect_err("high exceeds max");
        assert_eq!(err.code, ErrorCode::InvalidResourceLimits);
    }

    #[test]
    fn release_source_tags_round_trip_through_json() {
        let source = ReleaseSource::Git {
            url: "git@example.com:org/app.git".into(),
            git_ref: "main".into(),
            commit: Some("abc123".into()),
        };
        let json = serde_json::to_string(&source).unwrap();
        assert!(json.contains("\"kind\":\"git\""));
        let round_tripped: ReleaseSource = serde_json::from_str(&json).unwrap();
        assert_eq!(round_tripped, source);
    }

    proptest::proptest! {
        #[test]
        fn valid_names_never_panic(name in "[a-z][a-z0-9-]{2,31}") {
            let _ = validate_project_name(&name);
        }
    }
}
