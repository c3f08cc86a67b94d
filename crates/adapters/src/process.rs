//! OS process supervision adapter (spec.md §4.6).
//!
//! Net-new — the teacher has no child-process concept. Spawns via
//! `tokio::process::Command`, tracked in a map keyed by pid. `terminate`
//! shells out to the `kill` utility for `SIGTERM` rather than an FFI
//! signal call, since this workspace denies `unsafe_code`; `kill` uses
//! `Child::start_kill` (`SIGKILL`), which `tokio::process` exposes safely.

use pyindex_ports::{BoxFuture, ProcessHandle, ProcessPort, ProcessStatus, SpawnProcessRequest};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// Supervises child processes started via `tokio::process::Command`.
#[derive(Default)]
pub struct OsProcessSupervisor {
    children: Mutex<HashMap<u32, Child>>,
}

impl OsProcessSupervisor {
    /// Construct a supervisor with no tracked children.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessPort for OsProcessSupervisor {
    fn spawn(&self, ctx: &RequestContext, request: SpawnProcessRequest) -> BoxFuture<'_, Result<ProcessHandle>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("process.spawn")?;

            let mut command = Command::new(&request.program);
            command.args(&request.args);
            if let Some(working_dir) = &request.working_dir {
                command.current_dir(working_dir);
            }
            command.stdout(redirect(request.stdout_log_path.as_deref()).await?);
            command.stderr(redirect(request.stderr_log_path.as_deref()).await?);
            command.stdin(Stdio::null());

            let child = command.spawn().map_err(|error| {
                ErrorEnvelope::unexpected(ErrorCode::internal(), format!("failed to spawn {}: {error}", request.program), ErrorClass::Retriable)
            })?;
            let pid = child.id().ok_or_else(|| {
                ErrorEnvelope::unexpected(ErrorCode::internal(), "spawned child has no pid", ErrorClass::NonRetriable)
            })?;

            self.children.lock().await.insert(pid, child);
            Ok(ProcessHandle(pid))
        })
    }

    fn poll(&self, ctx: &RequestContext, handle: ProcessHandle) -> BoxFuture<'_, Result<ProcessStatus>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("process.poll")?;
            let mut children = self.children.lock().await;
            let child = children
                .get_mut(&handle.0)
                .ok_or_else(|| ErrorEnvelope::expected(ErrorCode::not_found(), format!("no tracked process with pid {}", handle.0)))?;

            match child.try_wait().map_err(|error| filesystem_error(&error))? {
                None => Ok(ProcessStatus::Running),
                Some(status) => {
                    children.remove(&handle.0);
                    Ok(exit_status_to_process_status(status))
                },
            }
        })
    }

    fn terminate(&self, ctx: &RequestContext, handle: ProcessHandle) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("process.terminate")?;
            let status = Command::new("kill")
                .args(["-TERM", &handle.0.to_string()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map_err(|error| filesystem_error(&error))?;
            if status.success() {
                Ok(())
            } else {
                Err(ErrorEnvelope::expected(ErrorCode::internal(), format!("kill -TERM {} failed", handle.0)))
            }
        })
    }

    fn kill(&self, ctx: &RequestContext, handle: ProcessHandle) -> BoxFuture<'_, Result<()>> {
        let ctx = ctx.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("process.kill")?;
            let mut children = self.children.lock().await;
            if let Some(child) = children.get_mut(&handle.0) {
                child.start_kill().map_err(|error| filesystem_error(&error))?;
                children.remove(&handle.0);
                Ok(())
            } else {
                let status = Command::new("kill")
                    .args(["-KILL", &handle.0.to_string()])
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status()
                    .await
                    .map_err(|error| filesystem_error(&error))?;
                if status.success() {
                    Ok(())
                } else {
                    Err(ErrorEnvelope::expected(ErrorCode::internal(), format!("kill -KILL {} failed", handle.0)))
                }
            }
        })
    }
}

async fn redirect(path: Option<&std::path::Path>) -> Result<Stdio> {
    let Some(path) = path else {
        return Ok(Stdio::null());
    };
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|error| filesystem_error(&error))?;
    Ok(Stdio::from(file.into_std().await))
}

fn exit_status_to_process_status(status: std::process::ExitStatus) -> ProcessStatus {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ProcessStatus::Exited(code),
        None => ProcessStatus::Signaled(status.signal().unwrap_or(0)),
    }
}

fn filesystem_error(error: &std::io::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(ErrorCode::filesystem_error(), format!("process I/O failed: {error}"), ErrorClass::Retriable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn spawns_polls_and_observes_exit() {
        let supervisor = OsProcessSupervisor::new();
        let ctx = RequestContext::new_request();

        let handle = supervisor
            .spawn(&ctx, SpawnProcessRequest { program: "true".to_owned(), args: Vec::new(), working_dir: None, stdout_log_path: None, stderr_log_path: None })
            .await
            .expect("spawn succeeds");

        let mut status = supervisor.poll(&ctx, handle).await.expect("poll succeeds");
        let mut attempts = 0;
        while status == ProcessStatus::Running && attempts < 50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = supervisor.poll(&ctx, handle).await.expect("poll succeeds");
            attempts += 1;
        }
        assert_eq!(status, ProcessStatus::Exited(0));
    }

    #[tokio::test]
    async fn kill_stops_a_long_running_child() {
        let supervisor = OsProcessSupervisor::new();
        let ctx = RequestContext::new_request();

        let handle = supervisor
            .spawn(&ctx, SpawnProcessRequest { program: "sleep".to_owned(), args: vec!["30".to_owned()], working_dir: None, stdout_log_path: None, stderr_log_path: None })
            .await
            .expect("spawn succeeds");

        supervisor.kill(&ctx, handle).await.expect("kill succeeds");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
