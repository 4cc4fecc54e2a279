//! Checkpoint Engine: database dumps taken around deploys/restores/on a
//! schedule, compressed in-process and tracked with a retention policy per
//! [`CheckpointKind`].
//!
//! HostKit has no database driver of its own — the caller supplies the dump
//! and restore commands (e.g. `pg_dump`/`psql`, `mysqldump`/`mysql`) for
//! whatever engine the project actually uses. This mirrors the health
//! probe's stance in `hostkit-health`: HostKit orchestrates, it doesn't
//! reimplement a database client.

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use chrono::Utc;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use hostkit_fs::ProjectLayout;
use hostkit_store::{NewCheckpoint, NewEvent, Store};
use hostkit_types::{Checkpoint, CheckpointKind, ErrorCode, EventCategory, EventLevel, HostKitError, Project};

/// An external command that writes a database dump to stdout, e.g.
/// `{program: "pg_dump", args: ["--no-owner", "blog"]}`.
pub struct DumpCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// An external command that reads a decompressed dump from stdin, e.g.
/// `{program: "psql", args: ["blog"]}`.
pub struct RestoreCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Runs `dump`, compresses its stdout, and records a checkpoint row. On any
/// failure the partially-written backup file is removed so a later listing
/// never shows a checkpoint with no usable backup behind it.
pub fn create_checkpoint(
    store: &Store,
    layout: &ProjectLayout,
    project: &Project,
    dump: &DumpCommand,
    database_name: &str,
    label: Option<&str>,
    release_id: Option<i64>,
    kind: CheckpointKind,
    trigger_source: Option<&str>,
) -> Result<Checkpoint, HostKitError> {
    let label = label
        .map(str::to_string)
        .unwrap_or_else(|| format!("checkpoint_{}", Utc::now().format("%Y%m%d_%H%M%S")));

    std::fs::create_dir_all(layout.checkpoints_dir()).map_err(|e| {
        HostKitError::new(
            ErrorCode::CheckpointFailed,
            format!("failed to create checkpoints directory: {e}"),
        )
    })?;
    let backup_path = layout.checkpoints_dir().join(format!("{label}.sql.gz"));

    let output = Command::new(&dump.program)
        .args(&dump.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            HostKitError::new(
                ErrorCode::CommandNotFound,
                format!("failed to run dump command {}: {e}", dump.program),
            )
        })?;

    if !output.status.success() {
        return Err(HostKitError::new(
            ErrorCode::CheckpointFailed,
            format!(
                "dump command {} exited with {:?}: {}",
                dump.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    if let Err(e) = write_compressed(&backup_path, &output.stdout) {
        let _ = std::fs::remove_file(&backup_path);
        return Err(HostKitError::new(
            ErrorCode::CheckpointFailed,
            format!("failed to write compressed dump: {e}"),
        ));
    }

    let size_bytes = std::fs::metadata(&backup_path).map(|m| m.len() as i64).unwrap_or(0);
    let expires_at = kind.retention_days().map(|days| Utc::now() + chrono::Duration::days(days));

    let checkpoint = store
        .create_checkpoint(&NewCheckpoint {
            project_id: project.id,
            release_id,
            label: label.clone(),
            trigger_source: trigger_source.map(str::to_string),
            database_name: database_name.to_string(),
            backup_path: backup_path.to_string_lossy().into_owned(),
            size_bytes,
            kind,
            created_by: None,
            expires_at,
        })
        .map_err(|e| {
            HostKitError::new(
                ErrorCode::CheckpointFailed,
                format!("failed to record checkpoint: {e}"),
            )
        })?;

    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Checkpoint,
        event_type: "created".into(),
        level: EventLevel::Info,
        message: format!("checkpoint {label} created for {}", project.name),
        data: None,
        created_by: None,
    });

    Ok(checkpoint)
}

fn write_compressed(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

/// Restores `checkpoint_id` by decompressing its backup and piping it into
/// `restore`. When `create_pre_restore` is set, takes a
/// [`CheckpointKind::PreRestore`] checkpoint first (via `pre_restore_dump`,
/// which must be supplied in that case) so the restore itself can be undone.
pub fn restore_checkpoint(
    store: &Store,
    layout: &ProjectLayout,
    project: &Project,
    checkpoint_id: i64,
    restore: &RestoreCommand,
    create_pre_restore: bool,
    pre_restore_dump: Option<&DumpCommand>,
) -> Result<Option<Checkpoint>, HostKitError> {
    let checkpoint = store
        .get_checkpoint(checkpoint_id)
        .map_err(|e| HostKitError::new(ErrorCode::CheckpointNotFound, e.to_string()))?
        .ok_or_else(|| {
            HostKitError::new(
                ErrorCode::CheckpointNotFound,
                format!("no such checkpoint: {checkpoint_id}"),
            )
        })?;

    let backup_path = PathBuf::from(&checkpoint.backup_path);
    if !backup_path.is_file() {
        return Err(HostKitError::new(
            ErrorCode::BackupFileMissing,
            format!("backup file missing: {}", backup_path.display()),
        ));
    }

    let pre_restore = if create_pre_restore {
        let dump = pre_restore_dump.ok_or_else(|| {
            HostKitError::new(
                ErrorCode::CheckpointFailed,
                "create_pre_restore was requested but no dump command was supplied",
            )
        })?;
        Some(create_checkpoint(
            store,
            layout,
            project,
            dump,
            &checkpoint.database_name,
            None,
            None,
            CheckpointKind::PreRestore,
            Some("restore"),
        )?)
    } else {
        None
    };

    let mut dump_bytes = Vec::new();
    File::open(&backup_path)
        .and_then(|file| GzDecoder::new(file).read_to_end(&mut dump_bytes))
        .map_err(|e| {
            HostKitError::new(
                ErrorCode::RestoreFailed,
                format!("failed to decompress backup: {e}"),
            )
        })?;

    let mut child = Command::new(&restore.program)
        .args(&restore.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            HostKitError::new(
                ErrorCode::CommandNotFound,
                format!("failed to run restore command {}: {e}", restore.program),
            )
        })?;

    let mut stdin = child.stdin.take().expect("stdin was piped at spawn");
    let writer = std::thread::spawn(move || stdin.write_all(&dump_bytes));
    let output = child.wait_with_output().map_err(|e| {
        HostKitError::new(
            ErrorCode::RestoreFailed,
            format!("failed to wait for restore command: {e}"),
        )
    })?;
    let _ = writer.join();

    if !output.status.success() {
        return Err(HostKitError::new(
            ErrorCode::RestoreFailed,
            format!(
                "restore command {} exited with {:?}: {}",
                restore.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }

    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Checkpoint,
        event_type: "restored".into(),
        level: EventLevel::Info,
        message: format!("checkpoint {} restored for {}", checkpoint.label, project.name),
        data: None,
        created_by: None,
    });

    Ok(pre_restore)
}

pub fn delete_checkpoint(store: &Store, project: &Project, checkpoint_id: i64) -> Result<(), HostKitError> {
    let checkpoint = store
        .get_checkpoint(checkpoint_id)
        .map_err(|e| HostKitError::new(ErrorCode::CheckpointNotFound, e.to_string()))?
        .ok_or_else(|| {
            HostKitError::new(
                ErrorCode::CheckpointNotFound,
                format!("no such checkpoint: {checkpoint_id}"),
            )
        })?;
    let _ = std::fs::remove_file(&checkpoint.backup_path);
    store
        .delete_checkpoint(checkpoint.id)
        .map_err(|e| HostKitError::new(ErrorCode::CheckpointFailed, e.to_string()))?;

    let _ = store.emit_event(&NewEvent {
        project_id: Some(project.id),
        category: EventCategory::Checkpoint,
        event_type: "deleted".into(),
        level: EventLevel::Info,
        message: format!("checkpoint {} deleted for {}", checkpoint.label, project.name),
        data: None,
        created_by: None,
    });
    Ok(())
}

pub struct CleanupSummary {
    pub deleted: u32,
    pub reclaimed_bytes: u64,
    pub errors: Vec<(i64, String)>,
}

/// Scans every checkpoint for `project_id` and deletes the ones past their
/// kind's retention window (manual checkpoints never expire, see
/// [`CheckpointKind::retention_days`]). Per-checkpoint failures are
/// collected rather than aborting the sweep.
pub fn cleanup_expired_checkpoints(store: &Store, project_id: i64) -> anyhow::Result<CleanupSummary> {
    let now = Utc::now();
    let checkpoints = store.list_checkpoints(project_id)?;
    let mut summary = CleanupSummary {
        deleted: 0,
        reclaimed_bytes: 0,
        errors: Vec::new(),
    };

    for checkpoint in checkpoints {
        let Some(days) = checkpoint.kind.retention_days() else {
            continue;
        };
        if now - checkpoint.created_at < chrono::Duration::days(days) {
            continue;
        }
        let size = std::fs::metadata(&checkpoint.backup_path)
            .map(|m| m.len())
            .unwrap_or(0);
        let _ = std::fs::remove_file(&checkpoint.backup_path);
        match store.delete_checkpoint(checkpoint.id) {
            Ok(()) => {
                summary.deleted += 1;
                summary.reclaimed_bytes += size;
            }
            Err(e) => summary.errors.push((checkpoint.id, e.to_string())),
        }
    }
    Ok(summary)
}

pub fn get_latest_checkpoint(
    store: &Store,
    project_id: i64,
    kind: Option<CheckpointKind>,
) -> anyhow::Result<Option<Checkpoint>> {
    let checkpoints = store.list_checkpoints(project_id)?;
    Ok(checkpoints
        .into_iter()
        .find(|c| kind.map(|k| k == c.kind).unwrap_or(true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostkit_store::NewProject;
    use hostkit_types::Runtime;
    use tempfile::tempdir;

    fn project_with_layout() -> (Store, Project, ProjectLayout, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let store = Store::open_in_memory().expect("open store");
        let project = store
            .create_project(&NewProject {
                name: "blog".into(),
                runtime: Runtime::Python,
                linux_username: "blog".into(),
                home_dir: dir.path().to_string_lossy().into_owned(),
                port: 4100,
            })
            .expect("create project");
        let layout = ProjectLayout::new(dir.path());
        layout.provision().expect("provision layout");
        (store, project, layout, dir)
    }

    #[test]
    fn create_checkpoint_compresses_dump_and_records_row() {
        let (store, project, layout, _dir) = project_with_layout();
        let dump = DumpCommand {
            program: "printf".into(),
            args: vec!["some database contents".into()],
        };
        let checkpoint = create_checkpoint(
            &store,
            &layout,
            &project,
            &dump,
            "blog",
            Some("nightly"),
            None,
            CheckpointKind::Manual,
            None,
        )
        .expect("create checkpoint");

        assert!(checkpoint.backup_path.ends_with("nightly.sql.gz"));
        assert!(std::path::Path::new(&checkpoint.backup_path).is_file());
        assert!(checkpoint.size_bytes > 0);
        assert!(checkpoint.expires_at.is_none());
    }

    #[test]
    fn create_checkpoint_fails_typed_when_dump_command_fails() {
        let (store, project, layout, _dir) = project_with_layout();
        let dump = DumpCommand {
            program: "false".into(),
            args: vec![],
        };
        let err = create_checkpoint(
            &store,
            &layout,
            &project,
            &dump,
            "blog",
            Some("failing"),
            None,
            CheckpointKind::Manual,
            None,
        )
        .expect_err("dump command fails");
        assert_eq!(err.code, ErrorCode::CheckpointFailed);
        assert!(!layout.checkpoints_dir().join("failing.sql.gz").exists());
    }

    #[test]
    fn restore_checkpoint_pipes_decompressed_dump_to_restore_command() {
        let (store, project, layout, dir) = project_with_layout();
        let dump = DumpCommand {
            program: "printf".into(),
            args: vec!["select 1;".into()],
        };
        let checkpoint = create_checkpoint(
            &store,
            &layout,
            &project,
            &dump,
            "blog",
            Some("before-restore"),
            None,
            CheckpointKind::Manual,
            None,
        )
        .expect("create checkpoint");

        let captured = dir.path().join("restored.sql");
        let restore = RestoreCommand {
            program: "tee".into(),
            args: vec![captured.to_string_lossy().into_owned()],
        };
        restore_checkpoint(&store, &layout, &project, checkpoint.id, &restore, false, None)
            .expect("restore");

        let contents = std::fs::read_to_string(&captured).expect("read restored file");
        assert_eq!(contents, "select 1;");
    }

    #[test]
    fn restore_checkpoint_rejects_missing_backup_file() {
        let (store, project, layout, _dir) = project_with_layout();
        let checkpoint = store
            .create_checkpoint(&hostkit_store::NewCheckpoint {
                project_id: project.id,
                release_id: None,
                label: "gone".into(),
                trigger_source: None,
                database_name: "blog".into(),
                backup_path: "/nonexistent/gone.sql.gz".into(),
                size_bytes: 0,
                kind: CheckpointKind::Manual,
                created_by: None,
                expires_at: None,
            })
            .expect("insert checkpoint row");
        let restore = RestoreCommand {
            program: "cat".into(),
            args: vec![],
        };
        let err = restore_checkpoint(&store, &layout, &project, checkpoint.id, &restore, false, None)
            .expect_err("missing backup file");
        assert_eq!(err.code, ErrorCode::BackupFileMissing);
    }

    #[test]
    fn cleanup_expired_checkpoints_skips_manual_and_fresh() {
        let (store, project, layout, _dir) = project_with_layout();
        let dump = DumpCommand {
            program: "printf".into(),
            args: vec!["data".into()],
        };
        create_checkpoint(&store, &layout, &project, &dump, "blog", Some("manual"), None, CheckpointKind::Manual, None)
            .expect("manual checkpoint");
        create_checkpoint(&store, &layout, &project, &dump, "blog", Some("fresh-predeploy"), None, CheckpointKind::PreDeploy, None)
            .expect("fresh pre-deploy checkpoint");

        let summary = cleanup_expired_checkpoints(&store, project.id).expect("cleanup");
        assert_eq!(summary.deleted, 0);
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn get_latest_checkpoint_filters_by_kind() {
        let (store, project, layout, _dir) = project_with_layout();
        let dump = DumpCommand {
            program: "printf".into(),
            args: vec!["data".into()],
        };
        create_checkpoint(&store, &layout, &project, &dump, "blog", Some("a-manual"), None, CheckpointKind::Manual, None)
            .expect("manual");
        let predeploy = create_checkpoint(&store, &layout, &project, &dump, "blog", Some("b-predeploy"), None, CheckpointKind::PreDeploy, None)
            .expect("predeploy");

        let latest = get_latest_checkpoint(&store, project.id, Some(CheckpointKind::PreDeploy))
            .expect("query")
            .expect("present");
        assert_eq!(latest.id, predeploy.id);
    }
}
