//! The Metadata Store: a single SQLite file holding every HostKit entity,
//! plus the append-only Event Journal queried out of the same connection.
//!
//! HostKit invocations are short-lived processes, not a daemon, so there is
//! no in-process connection pool to manage — [`Store::open`] opens (and, on
//! first run, migrates) the file, and every operation runs inside its own
//! transaction via [`Store::transaction`].

use std::path::Path;

use chrono::{DateTime, Utc};
use hostkit_types::{
    AlertChannel, AlertChannelKind, AlertHistoryEntry, AutoPauseConfig, Checkpoint,
    CheckpointKind, DeployHistoryEntry, DeployOutcome, Domain, ErrorCode, Event, EventCategory,
    EventLevel, GitConfigRow, HostKitError, ImageGenerationRecord, Operator, OperatorRole,
    Project, RateLimitConfig, Release, ReleaseSource, ResourceLimits, Runtime, ScheduledTask,
    SslAttempt, Worker,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

mod timeparse;
pub use timeparse::parse_time_filter;

mod migrations;

/// Current schema version, tracked via `PRAGMA user_version`. Bump this and
/// add a branch to [`migrations::migrate`] when changing the schema —
/// version-gated the same way a JSON document format would be, just
/// pointed at schema DDL instead.
pub const SCHEMA_VERSION: i64 = 1;

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating if absent) the metadata store at `path`, applying any
    /// pending migrations.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        migrations::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store, used by tests and by callers that only need a
    /// scratch database for a single operation (e.g. dry-run validation).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err`. Every multi-row mutation in `hostkit-core` goes through this so
    /// a deploy step that writes a release row and an event row can't leave
    /// the store with one but not the other.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let tx = self.conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    // ---- Project ----

    pub fn create_project(&self, project: &NewProject) -> anyhow::Result<Project> {
        let rl = RateLimitConfig::default();
        let ap = AutoPauseConfig::default();
        let limits = ResourceLimits::default();
        self.conn.execute(
            "INSERT INTO projects (name, runtime, linux_username, home_dir, port, paused,
                cpu_quota_percent, memory_max_mb, memory_high_mb, tasks_max, disk_quota_mb,
                resource_limits_enabled,
                max_deploys, window_minutes, failure_cooldown_minutes, consecutive_failure_limit,
                auto_pause_enabled, auto_pause_failure_threshold, auto_pause_window_minutes,
                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                project.name,
                runtime_to_str(project.runtime),
                project.linux_username,
                project.home_dir,
                project.port,
                limits.cpu_quota_percent,
                limits.memory_max_mb,
                limits.memory_high_mb,
                limits.tasks_max,
                limits.disk_quota_mb,
                limits.enabled,
                rl.max_deploys,
                rl.window_minutes,
                rl.failure_cooldown_minutes,
                rl.consecutive_failure_limit,
                ap.enabled,
                ap.failure_threshold,
                ap.window_minutes,
                Utc::now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_project(id)?
            .ok_or_else(|| anyhow::anyhow!("project vanished immediately after insert"))
    }

    /// Cascading delete per the ownership invariant: releases, checkpoints,
    /// domains, resource-limit/rate-limit/auto-pause state (columns on the
    /// project row itself), scheduled tasks, workers, deploy history,
    /// events, alert channels/history, and git config all disappear with
    /// the project row. Callers are responsible for the out-of-store side
    /// (stopping/removing units, dropping the database, removing the home
    /// directory) before calling this — see `hostkit-core`'s deprovision
    /// operation.
    pub fn delete_project(&mut self, project_id: i64) -> anyhow::Result<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM checkpoints WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM releases WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM domains WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM scheduled_tasks WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM workers WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM deploy_history WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM events WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM ssl_attempts WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM image_generations WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM alert_history WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM alert_channels WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM git_config WHERE project_id = ?1", params![project_id])?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![project_id])?;
            Ok(())
        })
    }

    pub fn get_project(&self, id: i64) -> anyhow::Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT * FROM projects WHERE id = ?1",
                params![id],
                row_to_project,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn find_project_by_name(&self, name: &str) -> anyhow::Result<Option<Project>> {
        self.conn
            .query_row(
                "SELECT * FROM projects WHERE name = ?1",
                params![name],
                row_to_project,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn require_project_by_name(&self, name: &str) -> Result<Project, HostKitError> {
        self.find_project_by_name(name)
            .map_err(|e| HostKitError::new(ErrorCode::ProjectNotFound, e.to_string()))?
            .ok_or_else(|| {
                HostKitError::new(ErrorCode::ProjectNotFound, format!("no such project: {name}"))
            })
    }

    pub fn list_projects(&self) -> anyhow::Result<Vec<Project>> {
        let mut stmt = self.conn.prepare("SELECT * FROM projects ORDER BY id")?;
        let rows = stmt.query_map([], row_to_project)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_paused(&self, project_id: i64, paused: bool) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE projects SET paused = ?1 WHERE id = ?2",
            params![paused, project_id],
        )?;
        Ok(())
    }

    pub fn set_resource_limits(&self, project_id: i64, limits: &ResourceLimits) -> anyhow::Result<()> {
        limits
            .validate()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        self.conn.execute(
            "UPDATE projects SET cpu_quota_percent = ?1, memory_max_mb = ?2, memory_high_mb = ?3,
                tasks_max = ?4, disk_quota_mb = ?5, resource_limits_enabled = ?6
             WHERE id = ?7",
            params![
                limits.cpu_quota_percent,
                limits.memory_max_mb,
                limits.memory_high_mb,
                limits.tasks_max,
                limits.disk_quota_mb,
                limits.enabled,
                project_id
            ],
        )?;
        Ok(())
    }

    pub fn set_rate_limit_config(
        &self,
        project_id: i64,
        config: &RateLimitConfig,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE projects SET max_deploys = ?1, window_minutes = ?2,
                failure_cooldown_minutes = ?3, consecutive_failure_limit = ?4
             WHERE id = ?5",
            params![
                config.max_deploys,
                config.window_minutes,
                config.failure_cooldown_minutes,
                config.consecutive_failure_limit,
                project_id
            ],
        )?;
        Ok(())
    }

    pub fn set_auto_pause_config(
        &self,
        project_id: i64,
        config: &AutoPauseConfig,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE projects SET auto_pause_enabled = ?1, auto_pause_failure_threshold = ?2,
                auto_pause_window_minutes = ?3
             WHERE id = ?4",
            params![
                config.enabled,
                config.failure_threshold,
                config.window_minutes,
                project_id
            ],
        )?;
        Ok(())
    }

    // ---- Releases ----

    pub fn create_release(&self, release: &NewRelease) -> anyhow::Result<Release> {
        let source_json = serde_json::to_string(&release.source)?;
        self.conn.execute(
            "INSERT INTO releases (project_id, release_id, release_path, is_current, source, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                release.project_id,
                release.release_id,
                release.release_path,
                source_json,
                Utc::now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_release(id)?
            .ok_or_else(|| anyhow::anyhow!("release vanished immediately after insert"))
    }

    /// Associates a database checkpoint and/or a JSON env snapshot with a
    /// release, consulted later by `full` rollback.
    pub fn update_release_snapshot(
        &self,
        release_id: i64,
        checkpoint_id: Option<i64>,
        env_snapshot: Option<&str>,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE releases SET checkpoint_id = ?1, env_snapshot = ?2 WHERE id = ?3",
            params![checkpoint_id, env_snapshot, release_id],
        )?;
        Ok(())
    }

    /// Deletes a release row. Callers must remove the release directory and
    /// confirm it isn't the active one first (see `hostkit-fs::ProjectLayout::remove_release_dir`).
    pub fn delete_release(&self, id: i64) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM releases WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn get_release(&self, id: i64) -> anyhow::Result<Option<Release>> {
        self.conn
            .query_row("SELECT * FROM releases WHERE id = ?1", params![id], row_to_release)
            .optional()
            .map_err(Into::into)
    }

    pub fn current_release(&self, project_id: i64) -> anyhow::Result<Option<Release>> {
        self.conn
            .query_row(
                "SELECT * FROM releases WHERE project_id = ?1 AND is_current = 1",
                params![project_id],
                row_to_release,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_releases(&self, project_id: i64) -> anyhow::Result<Vec<Release>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM releases WHERE project_id = ?1 ORDER BY id DESC")?;
        let rows = stmt.query_map(params![project_id], row_to_release)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Atomically moves the `is_current` flag to `release_id` within
    /// `project_id`, enforcing the invariant that at most one release per
    /// project is current.
    pub fn activate_release(&mut self, project_id: i64, release_id: i64) -> anyhow::Result<()> {
        self.transaction(|tx| {
            tx.execute(
                "UPDATE releases SET is_current = 0 WHERE project_id = ?1",
                params![project_id],
            )?;
            tx.execute(
                "UPDATE releases SET is_current = 1 WHERE id = ?1 AND project_id = ?2",
                params![release_id, project_id],
            )?;
            Ok(())
        })
    }

    // ---- Checkpoints ----

    pub fn create_checkpoint(&self, checkpoint: &NewCheckpoint) -> anyhow::Result<Checkpoint> {
        self.conn.execute(
            "INSERT INTO checkpoints (project_id, release_id, label, trigger_source, database_name,
                backup_path, size_bytes, kind, created_at, created_by, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                checkpoint.project_id,
                checkpoint.release_id,
                checkpoint.label,
                checkpoint.trigger_source,
                checkpoint.database_name,
                checkpoint.backup_path,
                checkpoint.size_bytes,
                kind_to_str(checkpoint.kind),
                Utc::now(),
                checkpoint.created_by,
                checkpoint.expires_at,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_checkpoint(id)?
            .ok_or_else(|| anyhow::anyhow!("checkpoint vanished immediately after insert"))
    }

    pub fn get_checkpoint(&self, id: i64) -> anyhow::Result<Option<Checkpoint>> {
        self.conn
            .query_row(
                "SELECT * FROM checkpoints WHERE id = ?1",
                params![id],
                row_to_checkpoint,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_checkpoints(&self, project_id: i64) -> anyhow::Result<Vec<Checkpoint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM checkpoints WHERE project_id = ?1 ORDER BY id DESC")?;
        let rows = stmt.query_map(params![project_id], row_to_checkpoint)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Checkpoints eligible for `cleanup_expired`: everything except manual
    /// ones, per the data model's invariant that manual checkpoints are
    /// never auto-deleted.
    pub fn list_expirable_checkpoints(
        &self,
        project_id: i64,
        older_than: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT * FROM checkpoints WHERE project_id = ?1 AND kind != 'manual' AND created_at < ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id, older_than], row_to_checkpoint)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn delete_checkpoint(&self, id: i64) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM checkpoints WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ---- SSL attempts ----

    pub fn record_ssl_attempt(
        &self,
        project_id: i64,
        domain: &str,
        succeeded: bool,
        error_message: Option<&str>,
    ) -> anyhow::Result<SslAttempt> {
        self.conn.execute(
            "INSERT INTO ssl_attempts (project_id, domain, succeeded, error_message, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project_id, domain, succeeded, error_message, Utc::now()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT * FROM ssl_attempts WHERE id = ?1",
                params![id],
                row_to_ssl_attempt,
            )
            .map_err(Into::into)
    }

    /// Count of SSL attempts for `domain` within the trailing `since` window,
    /// the daily-rate-limit check issuers run before requesting a cert.
    pub fn ssl_attempts_count_since(
        &self,
        project_id: i64,
        domain: &str,
        since: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM ssl_attempts WHERE project_id = ?1 AND domain = ?2 AND attempted_at >= ?3",
                params![project_id, domain, since],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn list_ssl_attempts(&self, project_id: i64) -> anyhow::Result<Vec<SslAttempt>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM ssl_attempts WHERE project_id = ?1 ORDER BY id DESC")?;
        let rows = stmt.query_map(params![project_id], row_to_ssl_attempt)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Image generation ----

    pub fn record_image_generation(
        &self,
        record: &NewImageGeneration,
    ) -> anyhow::Result<ImageGenerationRecord> {
        self.conn.execute(
            "INSERT INTO image_generations (project_id, model, prompt, width, height, image_url,
                cost, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.project_id,
                record.model,
                record.prompt,
                record.width,
                record.height,
                record.image_url,
                record.cost,
                record.duration_ms,
                Utc::now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT * FROM image_generations WHERE id = ?1",
                params![id],
                row_to_image_generation,
            )
            .map_err(Into::into)
    }

    /// Count of image generations within the trailing `since` window, used
    /// for the hourly/daily rate limits.
    pub fn image_generations_count_since(
        &self,
        project_id: i64,
        since: DateTime<Utc>,
    ) -> anyhow::Result<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM image_generations WHERE project_id = ?1 AND created_at >= ?2",
                params![project_id, since],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    /// Total spend within the trailing `since` window, used to surface a
    /// running cost summary.
    pub fn image_generation_cost_since(
        &self,
        project_id: i64,
        since: DateTime<Utc>,
    ) -> anyhow::Result<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(cost), 0.0) FROM image_generations WHERE project_id = ?1 AND created_at >= ?2",
                params![project_id, since],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn list_image_generations(&self, project_id: i64) -> anyhow::Result<Vec<ImageGenerationRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM image_generations WHERE project_id = ?1 ORDER BY id DESC")?;
        let rows = stmt.query_map(params![project_id], row_to_image_generation)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Deploy history / rate limiting ----

    pub fn record_deploy_attempt(
        &self,
        project_id: i64,
        started_at: DateTime<Utc>,
        outcome: DeployOutcome,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO deploy_history (project_id, started_at, outcome) VALUES (?1, ?2, ?3)",
            params![project_id, started_at, outcome_to_str(outcome)],
        )?;
        Ok(())
    }

    /// Deploy history rows within the trailing window, most recent first —
    /// exactly the shape `check_allowed` and the auto-pause engine need.
    pub fn deploy_history_since(
        &self,
        project_id: i64,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<DeployHistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, started_at, outcome FROM deploy_history
             WHERE project_id = ?1 AND started_at >= ?2 ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map(params![project_id, since], |row| {
            Ok(DeployHistoryEntry {
                id: row.get(0)?,
                project_id: row.get(1)?,
                started_at: row.get(2)?,
                outcome: str_to_outcome(&row.get::<_, String>(3)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Events (append-only journal) ----

    pub fn emit_event(&self, event: &NewEvent) -> anyhow::Result<Event> {
        self.conn.execute(
            "INSERT INTO events (project_id, category, event_type, level, message, data, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                event.project_id,
                event.category.as_str(),
                event.event_type,
                level_to_str(event.level),
                event.message,
                event.data.as_ref().map(|d| d.to_string()),
                Utc::now(),
                event.created_by,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row("SELECT * FROM events WHERE id = ?1", params![id], row_to_event)
            .map_err(Into::into)
    }

    /// Events for a project, optionally filtered by category/level/time
    /// window, newest first, bounded by `limit` and paged by `offset`.
    pub fn query_events(&self, filter: &EventFilter) -> anyhow::Result<Vec<Event>> {
        let mut sql = String::from("SELECT * FROM events WHERE 1=1");
        if filter.project_id.is_some() {
            sql.push_str(" AND project_id = :project_id");
        }
        if filter.category.is_some() {
            sql.push_str(" AND category = :category");
        }
        if filter.level.is_some() {
            sql.push_str(" AND level = :level");
        }
        if filter.since.is_some() {
            sql.push_str(" AND created_at >= :since");
        }
        if filter.until.is_some() {
            sql.push_str(" AND created_at <= :until");
        }
        sql.push_str(" ORDER BY id DESC LIMIT :limit OFFSET :offset");

        let mut stmt = self.conn.prepare(&sql)?;
        let category_str = filter.category.map(|c| c.as_str());
        let level_str = filter.level.map(level_to_str);
        let rows = stmt.query_map(
            rusqlite::named_params! {
                ":project_id": filter.project_id,
                ":category": category_str,
                ":level": level_str,
                ":since": filter.since,
                ":until": filter.until,
                ":limit": filter.limit.unwrap_or(100),
                ":offset": filter.offset.unwrap_or(0),
            },
            row_to_event,
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Deletes events older than `older_than_days`, the Event Journal's
    /// retention sweep. Returns the number of rows removed.
    pub fn cleanup_events(&self, older_than_days: i64) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(older_than_days);
        self.conn
            .execute("DELETE FROM events WHERE created_at < ?1", params![cutoff])
            .map_err(Into::into)
    }

    // ---- Domains ----

    pub fn add_domain(&self, project_id: i64, hostname: &str) -> anyhow::Result<Domain> {
        self.conn.execute(
            "INSERT INTO domains (project_id, hostname, ssl_enabled, ssl_last_attempt, created_at)
             VALUES (?1, ?2, 0, NULL, ?3)",
            params![project_id, hostname, Utc::now()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row("SELECT * FROM domains WHERE id = ?1", params![id], row_to_domain)
            .map_err(Into::into)
    }

    pub fn list_domains(&self, project_id: i64) -> anyhow::Result<Vec<Domain>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM domains WHERE project_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![project_id], row_to_domain)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_ssl_state(&self, domain_id: i64, enabled: bool) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE domains SET ssl_enabled = ?1, ssl_last_attempt = ?2 WHERE id = ?3",
            params![enabled, Utc::now(), domain_id],
        )?;
        Ok(())
    }

    // ---- Scheduled tasks & workers ----

    pub fn create_scheduled_task(
        &self,
        project_id: i64,
        name: &str,
        cron_expression: &str,
        command: &str,
    ) -> anyhow::Result<ScheduledTask> {
        self.conn.execute(
            "INSERT INTO scheduled_tasks (project_id, name, cron_expression, command, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![project_id, name, cron_expression, command, Utc::now()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT * FROM scheduled_tasks WHERE id = ?1",
                params![id],
                row_to_scheduled_task,
            )
            .map_err(Into::into)
    }

    pub fn list_scheduled_tasks(&self, project_id: i64) -> anyhow::Result<Vec<ScheduledTask>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM scheduled_tasks WHERE project_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![project_id], row_to_scheduled_task)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_scheduled_task_enabled(&self, id: i64, enabled: bool) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE scheduled_tasks SET enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        Ok(())
    }

    pub fn delete_scheduled_task(&self, id: i64) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn create_worker(
        &self,
        project_id: i64,
        name: &str,
        command: &str,
    ) -> anyhow::Result<Worker> {
        self.conn.execute(
            "INSERT INTO workers (project_id, name, command, enabled, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![project_id, name, command, Utc::now()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row("SELECT * FROM workers WHERE id = ?1", params![id], row_to_worker)
            .map_err(Into::into)
    }

    pub fn list_workers(&self, project_id: i64) -> anyhow::Result<Vec<Worker>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM workers WHERE project_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![project_id], row_to_worker)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn set_worker_enabled(&self, id: i64, enabled: bool) -> anyhow::Result<()> {
        self.conn
            .execute("UPDATE workers SET enabled = ?1 WHERE id = ?2", params![enabled, id])?;
        Ok(())
    }

    pub fn delete_worker(&self, id: i64) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM workers WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ---- Operators ----

    pub fn create_operator(&self, username: &str, role: OperatorRole) -> anyhow::Result<Operator> {
        self.conn.execute(
            "INSERT INTO operators (username, role, created_at) VALUES (?1, ?2, ?3)",
            params![username, role_to_str(role), Utc::now()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row("SELECT * FROM operators WHERE id = ?1", params![id], row_to_operator)
            .map_err(Into::into)
    }

    pub fn list_operators(&self) -> anyhow::Result<Vec<Operator>> {
        let mut stmt = self.conn.prepare("SELECT * FROM operators ORDER BY id")?;
        let rows = stmt.query_map([], row_to_operator)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Alert channels & history ----

    pub fn add_alert_channel(
        &self,
        project_id: i64,
        kind: AlertChannelKind,
        target: &str,
    ) -> anyhow::Result<AlertChannel> {
        self.conn.execute(
            "INSERT INTO alert_channels (project_id, kind, target, enabled) VALUES (?1, ?2, ?3, 1)",
            params![project_id, channel_kind_to_str(kind), target],
        )?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT * FROM alert_channels WHERE id = ?1",
                params![id],
                row_to_alert_channel,
            )
            .map_err(Into::into)
    }

    pub fn list_alert_channels(&self, project_id: i64) -> anyhow::Result<Vec<AlertChannel>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM alert_channels WHERE project_id = ?1 AND enabled = 1 ORDER BY id")?;
        let rows = stmt.query_map(params![project_id], row_to_alert_channel)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn record_alert_delivery(
        &self,
        project_id: i64,
        channel_kind: AlertChannelKind,
        event_category: EventCategory,
        success: bool,
    ) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO alert_history (project_id, channel_kind, event_category, sent_at, success)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project_id,
                channel_kind_to_str(channel_kind),
                event_category.as_str(),
                Utc::now(),
                success,
            ],
        )?;
        Ok(())
    }

    pub fn list_alert_history(&self, project_id: i64) -> anyhow::Result<Vec<AlertHistoryEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM alert_history WHERE project_id = ?1 ORDER BY id DESC")?;
        let rows = stmt.query_map(params![project_id], row_to_alert_history)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ---- Git config ----

    pub fn set_git_config(&self, config: &GitConfigRow) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO git_config (project_id, remote_url, default_branch, deploy_key_path)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id) DO UPDATE SET
                remote_url = excluded.remote_url,
                default_branch = excluded.default_branch,
                deploy_key_path = excluded.deploy_key_path",
            params![
                config.project_id,
                config.remote_url,
                config.default_branch,
                config.deploy_key_path
            ],
        )?;
        Ok(())
    }

    pub fn get_git_config(&self, project_id: i64) -> anyhow::Result<Option<GitConfigRow>> {
        self.conn
            .query_row(
                "SELECT * FROM git_config WHERE project_id = ?1",
                params![project_id],
                row_to_git_config,
            )
            .optional()
            .map_err(Into::into)
    }
}

/// Fields needed to insert a new project; everything else (rate-limit/
/// auto-pause defaults, `paused = false`) is filled in by the store.
pub struct NewProject {
    pub name: String,
    pub runtime: Runtime,
    pub linux_username: String,
    pub home_dir: String,
    pub port: u16,
}

pub struct NewRelease {
    pub project_id: i64,
    pub release_id: String,
    pub release_path: String,
    pub source: ReleaseSource,
}

pub struct NewCheckpoint {
    pub project_id: i64,
    pub release_id: Option<i64>,
    pub label: String,
    pub trigger_source: Option<String>,
    pub database_name: String,
    pub backup_path: String,
    pub size_bytes: i64,
    pub kind: CheckpointKind,
    pub created_by: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct NewEvent {
    pub project_id: Option<i64>,
    pub category: EventCategory,
    pub event_type: String,
    pub level: EventLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub created_by: Option<String>,
}

pub struct NewImageGeneration {
    pub project_id: i64,
    pub model: String,
    pub prompt: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub image_url: String,
    pub cost: f64,
    pub duration_ms: i64,
}

#[derive(Default)]
pub struct EventFilter {
    pub project_id: Option<i64>,
    pub category: Option<EventCategory>,
    pub level: Option<EventLevel>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get("id")?,
        name: row.get("name")?,
        runtime: str_to_runtime(&row.get::<_, String>("runtime")?),
        linux_username: row.get("linux_username")?,
        home_dir: row.get("home_dir")?,
        port: row.get("port")?,
        paused: row.get("paused")?,
        resource_limits: ResourceLimits {
            cpu_quota_percent: row.get("cpu_quota_percent")?,
            memory_max_mb: row.get("memory_max_mb")?,
            memory_high_mb: row.get("memory_high_mb")?,
            tasks_max: row.get("tasks_max")?,
            disk_quota_mb: row.get("disk_quota_mb")?,
            enabled: row.get("resource_limits_enabled")?,
        },
        rate_limit_config: RateLimitConfig {
            max_deploys: row.get("max_deploys")?,
            window_minutes: row.get("window_minutes")?,
            failure_cooldown_minutes: row.get("failure_cooldown_minutes")?,
            consecutive_failure_limit: row.get("consecutive_failure_limit")?,
        },
        auto_pause_config: AutoPauseConfig {
            enabled: row.get("auto_pause_enabled")?,
            failure_threshold: row.get("auto_pause_failure_threshold")?,
            window_minutes: row.get("auto_pause_window_minutes")?,
        },
        created_at: row.get("created_at")?,
    })
}

fn row_to_release(row: &Row) -> rusqlite::Result<Release> {
    let source_json: String = row.get("source")?;
    let source: ReleaseSource = serde_json::from_str(&source_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Release {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        release_id: row.get("release_id")?,
        release_path: row.get("release_path")?,
        is_current: row.get("is_current")?,
        source,
        checkpoint_id: row.get("checkpoint_id")?,
        env_snapshot: row.get("env_snapshot")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_checkpoint(row: &Row) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        release_id: row.get("release_id")?,
        label: row.get("label")?,
        trigger_source: row.get("trigger_source")?,
        database_name: row.get("database_name")?,
        backup_path: row.get("backup_path")?,
        size_bytes: row.get("size_bytes")?,
        kind: str_to_kind(&row.get::<_, String>("kind")?),
        created_at: row.get("created_at")?,
        created_by: row.get("created_by")?,
        expires_at: row.get("expires_at")?,
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let data: Option<String> = row.get("data")?;
    Ok(Event {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        category: str_to_category(&row.get::<_, String>("category")?),
        event_type: row.get("event_type")?,
        level: str_to_level(&row.get::<_, String>("level")?),
        message: row.get("message")?,
        data: data.and_then(|d| serde_json::from_str(&d).ok()),
        created_at: row.get("created_at")?,
        created_by: row.get("created_by")?,
    })
}

fn row_to_ssl_attempt(row: &Row) -> rusqlite::Result<SslAttempt> {
    Ok(SslAttempt {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        domain: row.get("domain")?,
        succeeded: row.get("succeeded")?,
        error_message: row.get("error_message")?,
        attempted_at: row.get("attempted_at")?,
    })
}

fn row_to_image_generation(row: &Row) -> rusqlite::Result<ImageGenerationRecord> {
    Ok(ImageGenerationRecord {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        model: row.get("model")?,
        prompt: row.get("prompt")?,
        width: row.get("width")?,
        height: row.get("height")?,
        image_url: row.get("image_url")?,
        cost: row.get("cost")?,
        duration_ms: row.get("duration_ms")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_domain(row: &Row) -> rusqlite::Result<Domain> {
    Ok(Domain {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        hostname: row.get("hostname")?,
        ssl_enabled: row.get("ssl_enabled")?,
        ssl_last_attempt: row.get("ssl_last_attempt")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_scheduled_task(row: &Row) -> rusqlite::Result<ScheduledTask> {
    Ok(ScheduledTask {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        cron_expression: row.get("cron_expression")?,
        command: row.get("command")?,
        enabled: row.get("enabled")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_worker(row: &Row) -> rusqlite::Result<Worker> {
    Ok(Worker {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        name: row.get("name")?,
        command: row.get("command")?,
        enabled: row.get("enabled")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_operator(row: &Row) -> rusqlite::Result<Operator> {
    Ok(Operator {
        id: row.get("id")?,
        username: row.get("username")?,
        role: str_to_role(&row.get::<_, String>("role")?),
        created_at: row.get("created_at")?,
    })
}

fn row_to_alert_channel(row: &Row) -> rusqlite::Result<AlertChannel> {
    Ok(AlertChannel {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        kind: str_to_channel_kind(&row.get::<_, String>("kind")?),
        target: row.get("target")?,
        enabled: row.get("enabled")?,
    })
}

fn row_to_alert_history(row: &Row) -> rusqlite::Result<AlertHistoryEntry> {
    Ok(AlertHistoryEntry {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        channel_kind: str_to_channel_kind(&row.get::<_, String>("channel_kind")?),
        event_category: str_to_category(&row.get::<_, String>("event_category")?),
        sent_at: row.get("sent_at")?,
        success: row.get("success")?,
    })
}

fn row_to_git_config(row: &Row) -> rusqlite::Result<GitConfigRow> {
    Ok(GitConfigRow {
        project_id: row.get("project_id")?,
        remote_url: row.get("remote_url")?,
        default_branch: row.get("default_branch")?,
        deploy_key_path: row.get("deploy_key_path")?,
    })
}

fn kind_to_str(kind: CheckpointKind) -> &'static str {
    match kind {
        CheckpointKind::Manual => "manual",
        CheckpointKind::PreMigration => "pre_migration",
        CheckpointKind::PreDeploy => "pre_deploy",
        CheckpointKind::PreRestore => "pre_restore",
        CheckpointKind::Scheduled => "scheduled",
        CheckpointKind::Auto => "auto",
    }
}

fn str_to_kind(s: &str) -> CheckpointKind {
    match s {
        "pre_migration" => CheckpointKind::PreMigration,
        "pre_deploy" => CheckpointKind::PreDeploy,
        "pre_restore" => CheckpointKind::PreRestore,
        "scheduled" => CheckpointKind::Scheduled,
        "auto" => CheckpointKind::Auto,
        _ => CheckpointKind::Manual,
    }
}

fn runtime_to_str(runtime: Runtime) -> &'static str {
    match runtime {
        Runtime::Python => "python",
        Runtime::Node => "node",
        Runtime::Nextjs => "nextjs",
        Runtime::Static => "static",
    }
}

fn str_to_runtime(s: &str) -> Runtime {
    match s {
        "python" => Runtime::Python,
        "node" => Runtime::Node,
        "nextjs" => Runtime::Nextjs,
        _ => Runtime::Static,
    }
}

fn outcome_to_str(outcome: DeployOutcome) -> &'static str {
    match outcome {
        DeployOutcome::Success => "success",
        DeployOutcome::Failure => "failure",
    }
}

fn str_to_outcome(s: &str) -> DeployOutcome {
    if s == "success" {
        DeployOutcome::Success
    } else {
        DeployOutcome::Failure
    }
}

fn level_to_str(level: EventLevel) -> &'static str {
    match level {
        EventLevel::Debug => "debug",
        EventLevel::Info => "info",
        EventLevel::Warning => "warning",
        EventLevel::Error => "error",
        EventLevel::Critical => "critical",
    }
}

fn str_to_level(s: &str) -> EventLevel {
    match s {
        "debug" => EventLevel::Debug,
        "warning" => EventLevel::Warning,
        "error" => EventLevel::Error,
        "critical" => EventLevel::Critical,
        _ => EventLevel::Info,
    }
}

fn str_to_category(s: &str) -> EventCategory {
    match s {
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
        _ => EventCategory::Deploy,
    }
}

fn role_to_str(role: OperatorRole) -> &'static str {
    match role {
        OperatorRole::Admin => "admin",
        OperatorRole::Deployer => "deployer",
        OperatorRole::ReadOnly => "read_only",
    }
}

fn str_to_role(s: &str) -> OperatorRole {
    match s {
        "admin" => OperatorRole::Admin,
        "deployer" => OperatorRole::Deployer,
        _ => OperatorRole::ReadOnly,
    }
}

fn channel_kind_to_str(kind: AlertChannelKind) -> &'static str {
    match kind {
        AlertChannelKind::Webhook => "webhook",
        AlertChannelKind::Email => "email",
    }
}

fn str_to_channel_kind(s: &str) -> AlertChannelKind {
    if s == "email" {
        AlertChannelKind::Email
    } else {
        AlertChannelKind::Webhook
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_project() -> (Store, Project) {
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
    fn create_and_find_project_round_trips() {
        let (store, project) = store_with_project();
        let found = store.find_project_by_name("blog").expect("find").expect("present");
        assert_eq!(found.id, project.id);
        assert!(!found.paused);
        assert_eq!(found.rate_limit_config.max_deploys, 10);
    }

    #[test]
    fn activate_release_enforces_single_current_invariant() {
        let (mut store, project) = store_with_project();
        let first = store
            .create_release(&NewRelease {
                project_id: project.id,
                release_id: "20260101-1".into(),
                release_path: "/home/blog/releases/20260101-1".into(),
                source: ReleaseSource::LocalPath { path: "/tmp/src".into() },
            })
            .expect("create release 1");
        let second = store
            .create_release(&NewRelease {
                project_id: project.id,
                release_id: "20260102-1".into(),
                release_path: "/home/blog/releases/20260102-1".into(),
                source: ReleaseSource::LocalPath { path: "/tmp/src".into() },
            })
            .expect("create release 2");

        store.activate_release(project.id, first.id).expect("activate first");
        store.activate_release(project.id, second.id).expect("activate second");

        let current = store.current_release(project.id).expect("current").expect("present");
        assert_eq!(current.id, second.id);

        let all = store.list_releases(project.id).expect("list");
        assert_eq!(all.iter().filter(|r| r.is_current).count(), 1);
    }

    #[test]
    fn manual_checkpoints_excluded_from_expirable_list() {
        let (store, project) = store_with_project();
        store
            .create_checkpoint(&NewCheckpoint {
                project_id: project.id,
                release_id: None,
                label: "manual-backup".into(),
                trigger_source: None,
                database_name: "blog".into(),
                backup_path: "/home/blog/checkpoints/manual-backup.tar".into(),
                size_bytes: 1024,
                kind: CheckpointKind::Manual,
                created_by: None,
                expires_at: None,
            })
            .expect("create manual checkpoint");
        store
            .create_checkpoint(&NewCheckpoint {
                project_id: project.id,
                release_id: None,
                label: "pre-deploy".into(),
                trigger_source: Some("deploy".into()),
                database_name: "blog".into(),
                backup_path: "/home/blog/checkpoints/pre-deploy.tar".into(),
                size_bytes: 2048,
                kind: CheckpointKind::PreDeploy,
                created_by: None,
                expires_at: Some(Utc::now() + chrono::Duration::days(14)),
            })
            .expect("create pre-deploy checkpoint");

        let expirable = store
            .list_expirable_checkpoints(project.id, Utc::now() + chrono::Duration::days(1))
            .expect("list expirable");
        assert_eq!(expirable.len(), 1);
        assert_eq!(expirable[0].kind, CheckpointKind::PreDeploy);
    }

    #[test]
    fn events_are_append_only_and_monotonic() {
        let (store, project) = store_with_project();
        let e1 = store
            .emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Deploy,
                event_type: "started".into(),
                level: EventLevel::Info,
                message: "deploy started".into(),
                data: None,
                created_by: None,
            })
            .expect("emit 1");
        let e2 = store
            .emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Deploy,
                event_type: "started".into(),
                level: EventLevel::Info,
                message: "deploy started".into(),
                data: None,
                created_by: None,
            })
            .expect("emit 2 (same message, no dedup)");
        assert!(e2.id > e1.id);

        let events = store
            .query_events(&EventFilter {
                project_id: Some(project.id),
                ..Default::default()
            })
            .expect("query");
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn deploy_history_since_filters_by_window() {
        let (store, project) = store_with_project();
        store
            .record_deploy_attempt(project.id, Utc::now() - chrono::Duration::hours(2), DeployOutcome::Success)
            .expect("record old");
        store
            .record_deploy_attempt(project.id, Utc::now(), DeployOutcome::Failure)
            .expect("record recent");

        let recent = store
            .deploy_history_since(project.id, Utc::now() - chrono::Duration::minutes(30))
            .expect("query");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, DeployOutcome::Failure);
    }

    #[test]
    fn query_events_respects_until_and_offset() {
        let (store, project) = store_with_project();
        for i in 0..3 {
            store
                .emit_event(&NewEvent {
                    project_id: Some(project.id),
                    category: EventCategory::Deploy,
                    event_type: format!("step-{i}"),
                    level: EventLevel::Info,
                    message: "progress".into(),
                    data: None,
                    created_by: None,
                })
                .expect("emit");
        }
        let page = store
            .query_events(&EventFilter {
                project_id: Some(project.id),
                limit: Some(1),
                offset: Some(1),
                ..Default::default()
            })
            .expect("query page");
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event_type, "step-1");

        let future_only = store
            .query_events(&EventFilter {
                project_id: Some(project.id),
                until: Some(Utc::now() - chrono::Duration::days(1)),
                ..Default::default()
            })
            .expect("query until");
        assert!(future_only.is_empty());
    }

    #[test]
    fn cleanup_events_deletes_only_stale_rows() {
        let (store, project) = store_with_project();
        store
            .emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Deploy,
                event_type: "started".into(),
                level: EventLevel::Info,
                message: "recent".into(),
                data: None,
                created_by: None,
            })
            .expect("emit recent");

        let removed = store.cleanup_events(30).expect("cleanup");
        assert_eq!(removed, 0);
        let events = store
            .query_events(&EventFilter { project_id: Some(project.id), ..Default::default() })
            .expect("query");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn ssl_attempt_count_since_reflects_recent_failures() {
        let (store, project) = store_with_project();
        store
            .record_ssl_attempt(project.id, "example.com", false, Some("dns mismatch"))
            .expect("record failed attempt");
        store
            .record_ssl_attempt(project.id, "example.com", true, None)
            .expect("record success");

        let count = store
            .ssl_attempts_count_since(project.id, "example.com", Utc::now() - chrono::Duration::hours(24))
            .expect("count");
        assert_eq!(count, 2);
    }

    #[test]
    fn image_generation_cost_accumulates_across_records() {
        let (store, project) = store_with_project();
        store
            .record_image_generation(&NewImageGeneration {
                project_id: project.id,
                model: "flux-pro".into(),
                prompt: "a lighthouse at dusk".into(),
                width: Some(1024),
                height: Some(1024),
                image_url: "https://example.com/a.png".into(),
                cost: 0.04,
                duration_ms: 2200,
            })
            .expect("record generation");
        store
            .record_image_generation(&NewImageGeneration {
                project_id: project.id,
                model: "flux-pro".into(),
                prompt: "a second render".into(),
                width: Some(512),
                height: Some(512),
                image_url: "https://example.com/b.png".into(),
                cost: 0.02,
                duration_ms: 1800,
            })
            .expect("record generation 2");

        let count = store
            .image_generations_count_since(project.id, Utc::now() - chrono::Duration::hours(1))
            .expect("count");
        assert_eq!(count, 2);
        let cost = store
            .image_generation_cost_since(project.id, Utc::now() - chrono::Duration::hours(1))
            .expect("cost");
        assert!((cost - 0.06).abs() < 1e-9);
    }

    #[test]
    fn delete_project_cascades_to_owned_rows() {
        let (mut store, project) = store_with_project();
        store
            .create_checkpoint(&NewCheckpoint {
                project_id: project.id,
                release_id: None,
                label: "manual".into(),
                trigger_source: None,
                database_name: "blog".into(),
                backup_path: "/home/blog/checkpoints/manual.tar".into(),
                size_bytes: 10,
                kind: CheckpointKind::Manual,
                created_by: None,
                expires_at: None,
            })
            .expect("create checkpoint");
        store
            .emit_event(&NewEvent {
                project_id: Some(project.id),
                category: EventCategory::Project,
                event_type: "provisioned".into(),
                level: EventLevel::Info,
                message: "provisioned".into(),
                data: None,
                created_by: None,
            })
            .expect("emit event");

        store.delete_project(project.id).expect("delete project");

        assert!(store.get_project(project.id).expect("get").is_none());
        assert!(store.list_checkpoints(project.id).expect("list checkpoints").is_empty());
        let events = store
            .query_events(&EventFilter { project_id: Some(project.id), ..Default::default() })
            .expect("query events");
        assert!(events.is_empty());
    }

    #[test]
    fn set_resource_limits_rejects_high_above_max() {
        let (store, project) = store_with_project();
        let result = store.set_resource_limits(
            project.id,
            &ResourceLimits {
                memory_high_mb: Some(600),
                memory_max_mb: Some(512),
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn port_uniqueness_is_enforced_at_the_schema_level() {
        let (store, _project) = store_with_project();
        let result = store.create_project(&NewProject {
            name: "other".into(),
            runtime: Runtime::Python,
            linux_username: "other".into(),
            home_dir: "/home/other".into(),
            port: 4100,
        });
        assert!(result.is_err());
    }
}
