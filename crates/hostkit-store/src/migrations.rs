//! Schema migrations, gated on `PRAGMA user_version` the same way the
//! store's version number gates on-disk format changes elsewhere in the
//! stack — one upward-only step per schema version, no down-migrations.

use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current < 1 {
        apply_v1(conn)?;
        conn.pragma_update(None, "user_version", crate::SCHEMA_VERSION)?;
    }
    Ok(())
}

fn apply_v1(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE projects (
            id                          INTEGER PRIMARY KEY AUTOINCREMENT,
            name                        TEXT NOT NULL UNIQUE,
            runtime                     TEXT NOT NULL DEFAULT 'static',
            linux_username              TEXT NOT NULL UNIQUE,
            home_dir                    TEXT NOT NULL,
            port                        INTEGER NOT NULL UNIQUE,
            paused                      INTEGER NOT NULL DEFAULT 0,
            cpu_quota_percent           INTEGER,
            memory_max_mb               INTEGER,
            memory_high_mb              INTEGER,
            tasks_max                   INTEGER,
            disk_quota_mb               INTEGER,
            resource_limits_enabled     INTEGER NOT NULL DEFAULT 1,
            max_deploys                 INTEGER NOT NULL,
            window_minutes              INTEGER NOT NULL,
            failure_cooldown_minutes    INTEGER NOT NULL,
            consecutive_failure_limit   INTEGER NOT NULL,
            auto_pause_enabled          INTEGER NOT NULL,
            auto_pause_failure_threshold INTEGER NOT NULL,
            auto_pause_window_minutes   INTEGER NOT NULL,
            created_at                  TEXT NOT NULL
        );

        CREATE TABLE releases (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            release_id      TEXT NOT NULL,
            release_path    TEXT NOT NULL,
            is_current      INTEGER NOT NULL DEFAULT 0,
            source          TEXT NOT NULL,
            checkpoint_id   INTEGER REFERENCES checkpoints(id),
            env_snapshot    TEXT,
            created_at      TEXT NOT NULL,
            UNIQUE(project_id, release_id)
        );
        CREATE INDEX idx_releases_project ON releases(project_id);

        CREATE TABLE checkpoints (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            release_id      INTEGER REFERENCES releases(id),
            label           TEXT NOT NULL,
            trigger_source  TEXT,
            database_name   TEXT NOT NULL DEFAULT '',
            backup_path     TEXT NOT NULL,
            size_bytes      INTEGER NOT NULL DEFAULT 0,
            kind            TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            created_by      TEXT,
            expires_at      TEXT
        );
        CREATE INDEX idx_checkpoints_project ON checkpoints(project_id);

        CREATE TABLE deploy_history (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            started_at      TEXT NOT NULL,
            outcome         TEXT NOT NULL
        );
        CREATE INDEX idx_deploy_history_project_time ON deploy_history(project_id, started_at);

        CREATE TABLE events (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER REFERENCES projects(id),
            category        TEXT NOT NULL,
            event_type      TEXT NOT NULL DEFAULT '',
            level           TEXT NOT NULL,
            message         TEXT NOT NULL,
            data            TEXT,
            created_at      TEXT NOT NULL,
            created_by      TEXT
        );
        CREATE INDEX idx_events_project ON events(project_id);
        CREATE INDEX idx_events_category ON events(category);

        CREATE TABLE ssl_attempts (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            domain          TEXT NOT NULL,
            succeeded       INTEGER NOT NULL,
            error_message   TEXT,
            attempted_at    TEXT NOT NULL
        );
        CREATE INDEX idx_ssl_attempts_project_time ON ssl_attempts(project_id, attempted_at);

        CREATE TABLE image_generations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            model           TEXT NOT NULL,
            prompt          TEXT NOT NULL,
            width           INTEGER,
            height          INTEGER,
            image_url       TEXT NOT NULL,
            cost            REAL NOT NULL,
            duration_ms     INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX idx_image_generations_project_time ON image_generations(project_id, created_at);

        CREATE TABLE domains (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            hostname        TEXT NOT NULL UNIQUE,
            ssl_enabled     INTEGER NOT NULL DEFAULT 0,
            ssl_last_attempt TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX idx_domains_project ON domains(project_id);

        CREATE TABLE scheduled_tasks (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            name            TEXT NOT NULL,
            cron_expression TEXT NOT NULL,
            command         TEXT NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            UNIQUE(project_id, name)
        );

        CREATE TABLE workers (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            name            TEXT NOT NULL,
            command         TEXT NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL,
            UNIQUE(project_id, name)
        );

        CREATE TABLE operators (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            role            TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE alert_channels (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            kind            TEXT NOT NULL,
            target          TEXT NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX idx_alert_channels_project ON alert_channels(project_id);

        CREATE TABLE alert_history (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id      INTEGER NOT NULL REFERENCES projects(id),
            channel_kind    TEXT NOT NULL,
            event_category  TEXT NOT NULL,
            sent_at         TEXT NOT NULL,
            success         INTEGER NOT NULL
        );
        CREATE INDEX idx_alert_history_project ON alert_history(project_id);

        CREATE TABLE git_config (
            project_id      INTEGER PRIMARY KEY REFERENCES projects(id),
            remote_url      TEXT NOT NULL,
            default_branch  TEXT NOT NULL,
            deploy_key_path TEXT
        );
        "#,
    )?;
    Ok(())
}
