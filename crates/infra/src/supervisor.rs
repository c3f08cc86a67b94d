//! Single-worker restart supervision (spec.md §4.6).
//!
//! Net-new — the teacher has no child-process concept. Grounded on
//! `pyindex_shared::concurrency`'s `RequestContext`/`CancellationToken`
//! pattern for cooperative shutdown, wrapping a `ProcessPort` handle with
//! exponential backoff restart bookkeeping.

use pyindex_ports::{ProcessHandle, ProcessPort, ProcessStatus, SpawnProcessRequest};
use pyindex_shared::{RequestContext, Result};
use std::sync::Arc;
use std::time::Duration;

/// Backoff policy applied between restarts of a crashed worker.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    initial_ms: u64,
    max_ms: u64,
}

impl BackoffPolicy {
    /// Construct a policy starting at 1 second, capped at `max_ms`.
    #[must_use]
    pub const fn new(max_ms: u64) -> Self {
        Self { initial_ms: 1_000, max_ms }
    }

    fn delay_for(self, consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.min(20);
        let scaled = self.initial_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(scaled.min(self.max_ms))
    }
}

/// One supervised worker's state: its spawn template, current handle (if
/// running), and restart bookkeeping.
pub struct SupervisedWorker {
    name: Box<str>,
    request: SpawnProcessRequest,
    handle: Option<ProcessHandle>,
    consecutive_failures: u32,
    backoff: BackoffPolicy,
    restart_not_before: Option<f64>,
}

impl SupervisedWorker {
    /// Construct a worker definition that has not been started yet.
    #[must_use]
    pub fn new(name: impl Into<Box<str>>, request: SpawnProcessRequest, backoff: BackoffPolicy) -> Self {
        Self {
            name: name.into(),
            request,
            handle: None,
            consecutive_failures: 0,
            backoff,
            restart_not_before: None,
        }
    }

    /// Whether enough backoff time has elapsed (or the worker has never
    /// failed) for `ensure_started` to be attempted again.
    #[must_use]
    pub fn ready_to_restart(&self, now: f64) -> bool {
        self.restart_not_before.is_none_or(|not_before| now >= not_before)
    }

    /// The worker's display name (matches its `workers.*` config key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this worker currently has a live process handle.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the worker if it is not already running.
    pub async fn ensure_started(&mut self, ctx: &RequestContext, process: &dyn ProcessPort) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let handle = process.spawn(ctx, self.request.clone()).await?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Poll the worker's process status. If it has exited, clears the
    /// handle and returns `Some(status)` so the caller can decide whether
    /// to restart (respecting backoff).
    pub async fn poll(&mut self, ctx: &RequestContext, process: &dyn ProcessPort) -> Result<Option<ProcessStatus>> {
        let Some(handle) = self.handle else {
            return Ok(None);
        };
        match process.poll(ctx, handle).await? {
            ProcessStatus::Running => Ok(None),
            exited => {
                self.handle = None;
                Ok(Some(exited))
            },
        }
    }

    /// Record that the worker just exited, scheduling the earliest time
    /// `ensure_started` should be attempted again.
    pub fn record_exit_and_schedule_restart(&mut self, now: f64) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let delay = self.backoff.delay_for(self.consecutive_failures - 1);
        self.restart_not_before = Some(now + delay.as_secs_f64());
    }

    /// Reset restart backoff after a sustained healthy run.
    pub fn reset_backoff(&mut self) {
        self.consecutive_failures = 0;
        self.restart_not_before = None;
    }

    /// Gracefully stop the worker: `terminate`, then `kill` if it hasn't
    /// exited within `shutdown_timeout`.
    pub async fn stop(&mut self, ctx: &RequestContext, process: &dyn ProcessPort, shutdown_timeout: Duration) -> Result<()> {
        let Some(handle) = self.handle else {
            return Ok(());
        };

        process.terminate(ctx, handle).await?;

        let deadline = tokio::time::Instant::now() + shutdown_timeout;
        loop {
            match process.poll(ctx, handle).await? {
                ProcessStatus::Running => {
                    if tokio::time::Instant::now() >= deadline {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                },
                _ => {
                    self.handle = None;
                    return Ok(());
                },
            }
        }

        process.kill(ctx, handle).await?;
        self.handle = None;
        Ok(())
    }
}

/// Group of supervised workers managed together (one per enabled
/// `workers.*` flag).
pub struct WorkerGroup {
    workers: Vec<SupervisedWorker>,
}

impl WorkerGroup {
    /// Construct a group from already-built worker definitions.
    #[must_use]
    pub fn new(workers: Vec<SupervisedWorker>) -> Self {
        Self { workers }
    }

    /// Start every worker that is not yet running.
    pub async fn start_all(&mut self, ctx: &RequestContext, process: &Arc<dyn ProcessPort>) -> Result<()> {
        for worker in &mut self.workers {
            worker.ensure_started(ctx, process.as_ref()).await?;
        }
        Ok(())
    }

    /// Stop every worker, tolerating individual failures so the rest still
    /// get a shutdown attempt; returns the first error seen, if any.
    pub async fn stop_all(&mut self, ctx: &RequestContext, process: &Arc<dyn ProcessPort>, shutdown_timeout: Duration) -> Result<()> {
        let mut first_error = None;
        for worker in &mut self.workers {
            if let Err(error) = worker.stop(ctx, process.as_ref(), shutdown_timeout).await {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Iterate over the group's workers.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SupervisedWorker> {
        self.workers.iter_mut()
    }
}
