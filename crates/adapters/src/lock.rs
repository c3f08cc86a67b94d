//! Filesystem-backed exclusive lock adapter (spec.md §4.3 step 1, §4.6).
//!
//! Net-new — the teacher has no lock-file concept; grounded directly on
//! spec.md's lock contract (`<root>/.file_watcher.lock`, JSON body
//! `{pid, timestamp, worker_name, hostname}`, stale-when-pid-not-alive)
//! and on `crates/adapters/src/vector_index.rs`'s `spawn_blocking` pattern
//! for wrapping blocking filesystem calls in an async port. Uses `fs2`
//! (already a teacher workspace dependency, declared in `crates/infra`'s
//! `Cargo.toml` but unused in the retrieved corpus) for the actual
//! advisory exclusive lock.

use fs2::FileExt;
use pyindex_ports::{BoxFuture, LockGuard, LockPort};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// JSON body written into a held lock file (spec.md §6 "Worker lock
/// file").
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockBody {
    pid: u32,
    timestamp: f64,
    worker_name: String,
    hostname: String,
}

/// Acquires exclusive locks as files under a base directory, one file per
/// key (`<base_dir>/<key>.lock`).
pub struct FileLockPort {
    base_dir: PathBuf,
    worker_name: Box<str>,
}

impl FileLockPort {
    /// `worker_name` is recorded in every lock body this instance writes
    /// (the watcher tag for FW's watch-root lock, or the role name for
    /// WO's per-role worker locks).
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, worker_name: impl Into<Box<str>>) -> Self {
        Self {
            base_dir: base_dir.into(),
            worker_name: worker_name.into(),
        }
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{key}.lock"))
    }
}

impl LockPort for FileLockPort {
    fn try_acquire(
        &self,
        ctx: &RequestContext,
        key: &str,
    ) -> BoxFuture<'_, Result<Option<Box<dyn LockGuard>>>> {
        let ctx = ctx.clone();
        let path = self.lock_path(key);
        let worker_name = self.worker_name.to_string();
        Box::pin(async move {
            ctx.ensure_not_cancelled("file_lock.try_acquire")?;
            tokio::task::spawn_blocking(move || acquire_blocking(&path, &worker_name))
                .await
                .map_err(|error| {
                    ErrorEnvelope::unexpected(
                        ErrorCode::internal(),
                        format!("lock acquire task failed: {error}"),
                        ErrorClass::NonRetriable,
                    )
                })?
        })
    }
}

fn acquire_blocking(path: &Path, worker_name: &str) -> Result<Option<Box<dyn LockGuard>>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(filesystem_error)?;
    }

    reclaim_if_stale(path)?;

    let mut file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(filesystem_error)?;

    if file.try_lock_exclusive().is_err() {
        return Ok(None);
    }

    let body = LockBody {
        pid: std::process::id(),
        timestamp: now_seconds(),
        worker_name: worker_name.to_owned(),
        hostname: hostname(),
    };
    write_body(&mut file, &body)?;

    Ok(Some(Box::new(FileLockGuard {
        path: path.to_path_buf(),
        file: Some(file),
    })))
}

/// Removes `path` first if it holds a lock body whose pid is no longer
/// alive (spec.md §4.3 step 1: "A pre-existing lock whose pid is not
/// alive is stale and removed").
fn reclaim_if_stale(path: &Path) -> Result<()> {
    let Ok(mut file) = File::open(path) else {
        return Ok(());
    };
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_err() {
        return Ok(());
    }
    let Ok(body) = serde_json::from_str::<LockBody>(&contents) else {
        return Ok(());
    };
    if !process_is_alive(body.pid) {
        let _ = fs::remove_file(path);
    }
    Ok(())
}

/// True when a process with this pid exists. Linux-specific (`/proc`
/// existence check) rather than an FFI `kill(pid, 0)` probe, since this
/// workspace denies `unsafe_code`.
fn process_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn write_body(file: &mut File, body: &LockBody) -> Result<()> {
    use std::io::{Seek, SeekFrom};
    let payload = serde_json::to_vec(body).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::internal(),
            format!("failed to encode lock body: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    file.set_len(0).map_err(filesystem_error)?;
    file.seek(SeekFrom::Start(0)).map_err(filesystem_error)?;
    file.write_all(&payload).map_err(filesystem_error)?;
    file.sync_all().map_err(filesystem_error)?;
    Ok(())
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs_f64())
        .unwrap_or_default()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| fs::read_to_string("/proc/sys/kernel/hostname").ok().map(|s| s.trim().to_owned()))
        .unwrap_or_else(|| "unknown".to_owned())
}

fn filesystem_error(error: std::io::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::filesystem_error(),
        format!("lock file I/O failed: {error}"),
        ErrorClass::Retriable,
    )
}

struct FileLockGuard {
    path: PathBuf,
    file: Option<File>,
}

impl LockGuard for FileLockGuard {
    fn release(mut self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let path = self.path.clone();
        let file = self.file.take();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                if let Some(file) = file {
                    let _ = file.unlock();
                }
                let _ = fs::remove_file(&path);
                Ok(())
            })
            .await
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::internal(),
                    format!("lock release task failed: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?
        })
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_shared::RequestContext;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pyindex-lock-test-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir
    }

    #[tokio::test]
    async fn acquires_and_releases_a_fresh_lock() {
        let dir = scratch_dir("fresh");
        let port = FileLockPort::new(dir.clone(), "file_watcher");
        let ctx = RequestContext::new_request();

        let guard = port
            .try_acquire(&ctx, "watch_root")
            .await
            .expect("acquire succeeds")
            .expect("lock is free");
        assert!(dir.join("watch_root.lock").exists());
        guard.release().await.expect("release succeeds");
        assert!(!dir.join("watch_root.lock").exists());
    }

    #[tokio::test]
    async fn second_acquire_while_held_returns_none() {
        let dir = scratch_dir("contended");
        let port = FileLockPort::new(dir, "file_watcher");
        let ctx = RequestContext::new_request();

        let guard = port
            .try_acquire(&ctx, "watch_root")
            .await
            .expect("first acquire succeeds")
            .expect("lock is free");
        let second = port
            .try_acquire(&ctx, "watch_root")
            .await
            .expect("second attempt does not error");
        assert!(second.is_none());
        guard.release().await.expect("release succeeds");
    }

    #[tokio::test]
    async fn reclaims_lock_left_by_a_dead_pid() {
        let dir = scratch_dir("stale");
        fs::create_dir_all(&dir).expect("scratch dir exists");
        let stale_body = LockBody {
            pid: 999_999,
            timestamp: 0.0,
            worker_name: "file_watcher".to_owned(),
            hostname: "old-host".to_owned(),
        };
        fs::write(
            dir.join("watch_root.lock"),
            serde_json::to_vec(&stale_body).expect("serializes"),
        )
        .expect("writes stale lock file");

        let port = FileLockPort::new(dir, "file_watcher");
        let ctx = RequestContext::new_request();
        let guard = port
            .try_acquire(&ctx, "watch_root")
            .await
            .expect("acquire succeeds")
            .expect("stale lock is reclaimed");
        guard.release().await.expect("release succeeds");
    }
}
