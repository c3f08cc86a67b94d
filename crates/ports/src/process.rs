//! Process-supervision boundary contract (spec.md §4.6).
//!
//! Net-new — the teacher has no child-process concept; grounded on
//! spec.md §4.6's "Worker Orchestrator starts/supervises/stops FW, IW, and
//! CVW as separate OS processes" requirement, exposed as a port so WO's
//! supervision logic can be exercised against a fake in tests rather than
//! real `fork`/`exec`.

use crate::BoxFuture;
use pyindex_shared::{RequestContext, Result};
use std::path::PathBuf;

/// Everything needed to launch one supervised worker process.
#[derive(Debug, Clone)]
pub struct SpawnProcessRequest {
    /// Executable to run (the pyindex CLI binary, re-invoked with a
    /// worker role argument).
    pub program: String,
    /// Arguments passed to `program`.
    pub args: Vec<String>,
    /// Working directory for the child process.
    pub working_dir: Option<PathBuf>,
    /// File the child's stdout is redirected to, if any.
    pub stdout_log_path: Option<PathBuf>,
    /// File the child's stderr is redirected to, if any.
    pub stderr_log_path: Option<PathBuf>,
}

/// Opaque handle to a spawned process, stable across `poll`/`terminate`/
/// `kill` calls for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle(pub u32);

/// Observed state of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running.
    Running,
    /// Exited on its own with this status code.
    Exited(i32),
    /// Terminated by a signal with this signal number.
    Signaled(i32),
}

/// Boundary contract for spawning and supervising child OS processes
/// (spec.md §4.6).
pub trait ProcessPort: Send + Sync {
    /// Launch a new child process and return a handle to it.
    fn spawn(&self, ctx: &RequestContext, request: SpawnProcessRequest) -> BoxFuture<'_, Result<ProcessHandle>>;

    /// Check whether `handle` is still running, without blocking.
    fn poll(&self, ctx: &RequestContext, handle: ProcessHandle) -> BoxFuture<'_, Result<ProcessStatus>>;

    /// Request a graceful shutdown (SIGTERM on Unix).
    fn terminate(&self, ctx: &RequestContext, handle: ProcessHandle) -> BoxFuture<'_, Result<()>>;

    /// Force an immediate shutdown (SIGKILL on Unix).
    fn kill(&self, ctx: &RequestContext, handle: ProcessHandle) -> BoxFuture<'_, Result<()>>;
}
