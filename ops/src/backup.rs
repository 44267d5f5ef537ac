//! World snapshot pipeline.
//!
//! A run walks the configured directories on the shared filesystem, uploads
//! every file under a key namespaced by the run's timestamp, and tells the
//! players before and after. Individual failures are collected into the
//! summary; only configuration and deadline problems fail the whole run.

use crate::cloud::{OpsContext, PutObject};
use crate::error::OpsError;
use crate::notify::notify_players;
use crate::pool::WorkerPool;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use shared::config::BackupConfig;
use shared::{
    backup_complete_notice, BackupFailure, BackupSummary, FailureKind, UploadTask,
    BACKUP_CONTENT_TYPE, BACKUP_STARTING_NOTICE,
};
use std::fs::{self, ReadDir};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const RUN_KEY_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// Result of walking the configured directories.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// `(relative path with '/' separators, absolute source path)`.
    pub files: Vec<(String, PathBuf)>,
    pub failures: Vec<BackupFailure>,
}

pub fn run_key_at(at: DateTime<Utc>) -> String {
    at.format(RUN_KEY_FORMAT).to_string()
}

pub fn current_run_key() -> String {
    run_key_at(Utc::now())
}

pub fn object_key(run_key: &str, relative_path: &str) -> String {
    format!("{}/{}", run_key, relative_path)
}

fn enumeration_failure(path: &str, error: impl ToString) -> BackupFailure {
    BackupFailure {
        path: path.to_string(),
        kind: FailureKind::Enumeration,
        error: error.to_string(),
    }
}

/// Rebuilds `name` from its plain components, so `./world//region/` becomes
/// `world/region`. `None` for names that would leave the mount, such as `/etc`
/// or `../x`, and for names that point at the mount itself.
fn normalized(name: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            _ => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Lists every regular file under each configured name, relative to `root`.
///
/// Directories are expanded depth-first in listing order. Blocking; run it
/// off the async workers.
pub fn discover_files(root: &Path, directories: &[String]) -> Discovery {
    let mut discovery = Discovery::default();

    for name in directories {
        let relative = match normalized(name) {
            Some(relative) => relative,
            None => {
                let reason = "path must name an entry inside the shared filesystem";
                discovery.failures.push(enumeration_failure(name, reason));
                continue;
            }
        };

        let path = root.join(&relative);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {}", relative, e);
                discovery.failures.push(enumeration_failure(&relative, e));
                continue;
            }
        };

        if metadata.is_dir() {
            match fs::read_dir(&path) {
                Ok(entries) => walk(entries, relative, &mut discovery),
                Err(e) => discovery.failures.push(enumeration_failure(&relative, e)),
            }
        } else {
            discovery.files.push((relative, path));
        }
    }

    discovery
}

fn walk(entries: ReadDir, prefix: String, discovery: &mut Discovery) {
    let mut stack: Vec<(ReadDir, String)> = vec![(entries, prefix)];

    while let Some((entries, prefix)) = stack.last_mut() {
        let entry = match entries.next() {
            None => {
                stack.pop();
                continue;
            }
            Some(Err(e)) => {
                discovery.failures.push(enumeration_failure(prefix, e));
                continue;
            }
            Some(Ok(entry)) => entry,
        };

        let relative = format!("{}/{}", prefix, entry.file_name().to_string_lossy());
        let path = entry.path();

        match is_directory(&entry) {
            Ok(true) => match fs::read_dir(&path) {
                Ok(children) => stack.push((children, relative)),
                Err(e) => {
                    warn!("Cannot list {}: {}", relative, e);
                    discovery.failures.push(enumeration_failure(&relative, e));
                }
            },
            Ok(false) => discovery.files.push((relative, path)),
            Err(e) => discovery.failures.push(enumeration_failure(&relative, e)),
        }
    }
}

// Symlinked directories are followed, like the top-level names.
fn is_directory(entry: &fs::DirEntry) -> io::Result<bool> {
    let file_type = entry.file_type()?;
    if file_type.is_symlink() {
        return Ok(fs::metadata(entry.path())?.is_dir());
    }
    Ok(file_type.is_dir())
}

pub fn upload_tasks(run_key: &str, files: &[(String, PathBuf)]) -> Vec<UploadTask> {
    files
        .iter()
        .map(|(relative, source)| UploadTask {
            object_key: object_key(run_key, relative),
            relative_path: relative.clone(),
            source_path: source.clone(),
        })
        .collect()
}

/// Uploads every task through the pool and reports `(uploaded, failures)`.
async fn upload_all(
    ctx: &OpsContext,
    config: &BackupConfig,
    tasks: &[UploadTask],
) -> (usize, Vec<BackupFailure>) {
    let pool = WorkerPool::new(config.concurrency);
    let store = Arc::clone(&ctx.store);

    let results = pool
        .run(tasks.iter().cloned(), |task| {
            let store = Arc::clone(&store);
            let request = PutObject {
                bucket: config.bucket_name.clone(),
                key: task.object_key,
                source: task.source_path,
                content_type: BACKUP_CONTENT_TYPE,
                storage_class: config.storage_class,
            };
            async move { store.put_object(request).await }
        })
        .await;

    let mut uploaded = 0;
    let mut failures = Vec::new();
    for (task, result) in tasks.iter().zip(results) {
        let error = match result {
            Ok(Ok(())) => {
                uploaded += 1;
                debug!("Uploaded {}", task.object_key);
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("upload task for {} failed: {}", task.object_key, e),
        };
        warn!("{}", error);
        failures.push(BackupFailure {
            path: task.relative_path.clone(),
            kind: FailureKind::Upload,
            error,
        });
    }

    (uploaded, failures)
}

/// Runs one snapshot of the shared filesystem.
pub async fn run_backup(
    ctx: &OpsContext,
    config: &BackupConfig,
) -> Result<BackupSummary, OpsError> {
    notify_players(ctx, &config.console, BACKUP_STARTING_NOTICE).await;

    let root = config.mount_path.clone();
    let directories = config.directories.clone();
    let discovery = tokio::task::spawn_blocking(move || discover_files(&root, &directories))
        .await
        .map_err(|e| OpsError::Task(e.to_string()))?;

    let run_key = current_run_key();
    let tasks = upload_tasks(&run_key, &discovery.files);
    info!(
        "Backup {}: uploading {} file(s) to {} with {} worker(s)",
        run_key,
        tasks.len(),
        config.bucket_name,
        config.concurrency
    );

    let (uploaded, upload_failures) = upload_all(ctx, config, &tasks).await;

    let mut failures = discovery.failures;
    failures.extend(upload_failures);

    let summary = BackupSummary {
        run_key,
        file_count: tasks.len(),
        uploaded,
        failures,
    };

    if summary.is_success() {
        info!(
            "Backup {} complete: {} file(s)",
            summary.run_key, summary.uploaded
        );
    } else {
        warn!(
            "Backup {} finished with {} failure(s), {} of {} file(s) uploaded",
            summary.run_key,
            summary.failures.len(),
            summary.uploaded,
            summary.file_count
        );
    }

    let notice = backup_complete_notice(&summary.run_key);
    notify_players(ctx, &config.console, &notice).await;

    Ok(summary)
}

/// [`run_backup`] bounded by `deadline`. Uploads still running at the
/// deadline are aborted.
pub async fn run_backup_within(
    ctx: &OpsContext,
    config: &BackupConfig,
    deadline: Duration,
) -> Result<BackupSummary, OpsError> {
    match tokio::time::timeout(deadline, run_backup(ctx, config)).await {
        Ok(result) => result,
        Err(_) => Err(OpsError::DeadlineExceeded {
            operation: "backup",
            deadline,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryObjectStore, RecordingDns, StaticCompute, StaticFleet};
    use chrono::TimeZone;
    use shared::config::{ConsoleConfig, StorageClass};
    use tempfile::TempDir;

    fn world(dir: &TempDir) {
        let root = dir.path();
        fs::create_dir_all(root.join("world/region")).unwrap();
        fs::create_dir_all(root.join("world_nether")).unwrap();
        fs::write(root.join("world/level.dat"), b"level").unwrap();
        fs::write(root.join("world/region/r.0.0.mca"), b"chunk").unwrap();
        fs::write(root.join("world/region/r.0.1.mca"), b"chunk").unwrap();
        fs::write(root.join("server.properties"), b"motd=hi").unwrap();
    }

    fn sorted(discovery: &Discovery) -> Vec<String> {
        let mut paths: Vec<String> = discovery.files.iter().map(|(p, _)| p.clone()).collect();
        paths.sort();
        paths
    }

    fn config(root: &Path, directories: &[&str]) -> BackupConfig {
        BackupConfig {
            console: ConsoleConfig {
                scaling_group_name: "minecraft-asg".to_string(),
                port: 25575,
                credential: "secret".to_string(),
                connect_timeout: Duration::from_millis(50),
                read_timeout: Duration::from_millis(50),
                idle_timeout: Duration::from_millis(10),
            },
            bucket_name: "world-backups".to_string(),
            mount_path: root.to_path_buf(),
            directories: directories.iter().map(|d| d.to_string()).collect(),
            concurrency: 2,
            storage_class: StorageClass::Glacier,
        }
    }

    // An empty fleet: notices are skipped without touching the network.
    fn context(store: Arc<MemoryObjectStore>) -> OpsContext {
        OpsContext::new(
            Arc::new(StaticFleet::new()),
            Arc::new(StaticCompute::new()),
            store,
            Arc::new(RecordingDns::new()),
        )
    }

    #[test]
    fn test_run_key_format() {
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 9, 5, 3).unwrap();
        assert_eq!(run_key_at(at), "2026-10-16-09-05-03");
        assert_eq!(
            object_key("2026-10-16-09-05-03", "world/level.dat"),
            "2026-10-16-09-05-03/world/level.dat"
        );
    }

    #[test]
    fn test_discovers_nested_files() {
        let dir = TempDir::new().unwrap();
        world(&dir);

        let names = ["world".to_string(), "server.properties".to_string()];
        let discovery = discover_files(dir.path(), &names);

        assert_eq!(
            sorted(&discovery),
            vec![
                "server.properties",
                "world/level.dat",
                "world/region/r.0.0.mca",
                "world/region/r.0.1.mca",
            ]
        );
        assert!(discovery.failures.is_empty());
        for (relative, source) in &discovery.files {
            assert_eq!(source, &dir.path().join(relative));
        }
    }

    #[test]
    fn test_directory_contents_stay_together() {
        let dir = TempDir::new().unwrap();
        world(&dir);
        fs::write(dir.path().join("world_nether/level.dat"), b"nether").unwrap();

        let names = ["world".to_string(), "world_nether".to_string()];
        let discovery = discover_files(dir.path(), &names);
        let paths: Vec<&str> = discovery.files.iter().map(|(p, _)| p.as_str()).collect();

        let first_nether = paths
            .iter()
            .position(|p| p.starts_with("world_nether/"))
            .unwrap();
        let before = &paths[..first_nether];
        assert!(before.iter().all(|p| p.starts_with("world/")));

        let region: Vec<usize> = paths
            .iter()
            .enumerate()
            .filter(|(_, p)| p.starts_with("world/region/"))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(region[1], region[0] + 1);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = TempDir::new().unwrap();
        world(&dir);

        let discovery = discover_files(dir.path(), &["world_nether".to_string()]);

        assert!(discovery.files.is_empty());
        assert!(discovery.failures.is_empty());
    }

    #[test]
    fn test_missing_name_is_recorded_and_walk_continues() {
        let dir = TempDir::new().unwrap();
        world(&dir);

        let names = ["world_the_end".to_string(), "world".to_string()];
        let discovery = discover_files(dir.path(), &names);

        assert_eq!(discovery.files.len(), 3);
        assert_eq!(discovery.failures.len(), 1);
        assert_eq!(discovery.failures[0].path, "world_the_end");
        assert_eq!(discovery.failures[0].kind, FailureKind::Enumeration);
    }

    #[test]
    fn test_names_outside_root_are_refused() {
        let dir = TempDir::new().unwrap();
        world(&dir);

        let names = ["/etc".to_string(), "../world".to_string()];
        let discovery = discover_files(dir.path(), &names);

        assert!(discovery.files.is_empty());
        assert_eq!(discovery.failures.len(), 2);

        let mount_itself = discover_files(dir.path(), &[".".to_string()]);
        assert!(mount_itself.files.is_empty());
        assert_eq!(mount_itself.failures.len(), 1);
    }

    #[test]
    fn test_trailing_slash_is_normalized() {
        let dir = TempDir::new().unwrap();
        world(&dir);

        let discovery = discover_files(dir.path(), &["world/region/".to_string()]);

        assert_eq!(
            sorted(&discovery),
            vec!["world/region/r.0.0.mca", "world/region/r.0.1.mca"]
        );
    }

    #[test]
    fn test_dot_and_doubled_separators_are_normalized() {
        let dir = TempDir::new().unwrap();
        world(&dir);

        let discovery = discover_files(dir.path(), &["./world//region/".to_string()]);

        assert_eq!(
            sorted(&discovery),
            vec!["world/region/r.0.0.mca", "world/region/r.0.1.mca"]
        );
        let tasks = upload_tasks("2026-10-16-09-05-03", &discovery.files);
        let prefix = "2026-10-16-09-05-03/world/region/";
        for task in &tasks {
            assert!(task.object_key.starts_with(prefix));
        }
    }

    #[test]
    fn test_missing_normalized_name_is_reported_normalized() {
        let dir = TempDir::new().unwrap();

        let discovery = discover_files(dir.path(), &["./world_the_end/".to_string()]);

        assert_eq!(discovery.failures.len(), 1);
        assert_eq!(discovery.failures[0].path, "world_the_end");
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_subdirectory_is_recorded() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        world(&dir);
        let locked = dir.path().join("world/locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("secret.dat"), b"x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Privileged users can read it anyway.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let discovery = discover_files(dir.path(), &["world".to_string()]);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(discovery.files.len(), 3);
        assert_eq!(discovery.failures.len(), 1);
        assert_eq!(discovery.failures[0].path, "world/locked");
    }

    #[test]
    fn test_upload_tasks_namespace_by_run_key() {
        let files = vec![(
            "world/level.dat".to_string(),
            PathBuf::from("/mnt/efs/world/level.dat"),
        )];

        let tasks = upload_tasks("2026-10-16-09-05-03", &files);

        assert_eq!(tasks[0].object_key, "2026-10-16-09-05-03/world/level.dat");
        assert_eq!(tasks[0].relative_path, "world/level.dat");
    }

    #[tokio::test]
    async fn test_run_backup_uploads_every_file() {
        let dir = TempDir::new().unwrap();
        world(&dir);
        let store = Arc::new(MemoryObjectStore::new());
        let ctx = context(Arc::clone(&store));

        let summary = run_backup(&ctx, &config(dir.path(), &["world", "server.properties"]))
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.file_count, 4);
        assert_eq!(summary.uploaded, 4);

        let key = object_key(&summary.run_key, "world/level.dat");
        let (request, bytes) = store.object(&key).unwrap();
        assert_eq!(bytes, b"level");
        assert_eq!(request.bucket, "world-backups");
        assert_eq!(request.content_type, "application/octet-stream");
        assert_eq!(request.storage_class, StorageClass::Glacier);
    }

    #[tokio::test]
    async fn test_run_backup_collects_upload_failures() {
        let dir = TempDir::new().unwrap();
        world(&dir);
        let store = Arc::new(
            MemoryObjectStore::new()
                .rejecting("world/level.dat")
                .with_latency(Duration::from_millis(5)),
        );
        let ctx = context(Arc::clone(&store));

        let config = config(dir.path(), &["world"]);
        let summary = run_backup(&ctx, &config).await.unwrap();

        assert_eq!(summary.file_count, 3);
        assert_eq!(summary.uploaded, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, "world/level.dat");
        assert_eq!(summary.failures[0].kind, FailureKind::Upload);
        assert!(summary.failures[0].error.contains("AccessDenied"));
        assert_eq!(store.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_run_backup_with_no_directories() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let ctx = context(Arc::clone(&store));

        let summary = run_backup(&ctx, &config(dir.path(), &[])).await.unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.file_count, 0);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_aborts_uploads() {
        let dir = TempDir::new().unwrap();
        world(&dir);
        let store = Arc::new(MemoryObjectStore::new().with_latency(Duration::from_millis(500)));
        let ctx = context(Arc::clone(&store));

        let config = config(dir.path(), &["world"]);
        let result = run_backup_within(&ctx, &config, Duration::from_millis(50)).await;

        assert!(matches!(
            result,
            Err(OpsError::DeadlineExceeded {
                operation: "backup",
                ..
            })
        ));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(store.keys().is_empty());
    }
}
