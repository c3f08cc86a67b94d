//! Storage Engine request broker wiring (spec.md §4.1, §6 "Storage request
//! socket").
//!
//! Net-new — binds the Unix domain socket `storage.request_socket` names
//! and serves it with `pyindex_adapters::storage::socket::serve` over a
//! freshly opened [`SqliteStorageEngine`]. This is the composition-root
//! half of the broker; the wire protocol itself lives in `pyindex-adapters`.

use pyindex_adapters::storage::SqliteStorageEngine;
use pyindex_adapters::storage::socket::serve;
use pyindex_config::StorageConfig;
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use std::sync::Arc;
use tokio::net::UnixListener;

/// Open the storage engine and bind its request socket, removing any
/// stale socket file left behind by a prior unclean shutdown.
///
/// Returns the bound listener and the engine it serves, so the caller
/// (the `serve-storage` CLI command) can log the bound path before
/// blocking on [`run`].
pub fn bind(storage: &StorageConfig) -> Result<(UnixListener, Arc<SqliteStorageEngine>)> {
    let engine = Arc::new(SqliteStorageEngine::open(storage.path.clone(), storage.backup_dir.clone())?);

    if let Some(parent) = storage.request_socket.parent() {
        std::fs::create_dir_all(parent).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::storage_error(),
                format!("failed to create storage socket directory: {error}"),
                ErrorClass::NonRetriable,
            )
            .with_metadata("path", parent.to_string_lossy().to_string())
        })?;
    }
    // A leftover socket file from a process that didn't clean up on exit
    // makes `bind` fail with `AddrInUse`; nothing else can be listening
    // on it once we get here, so clear it first.
    let _ = std::fs::remove_file(&storage.request_socket);

    let listener = UnixListener::bind(&storage.request_socket).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::storage_error(),
            format!("failed to bind storage request socket: {error}"),
            ErrorClass::NonRetriable,
        )
        .with_metadata("path", storage.request_socket.to_string_lossy().to_string())
    })?;

    Ok((listener, engine))
}

/// Serve the broker until the listener errors or the process is killed.
/// Intended to run for the lifetime of the `serve-storage` process.
pub async fn run(listener: UnixListener, engine: Arc<SqliteStorageEngine>) -> Result<()> {
    serve(listener, engine).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join("pyindex_storage_broker_test").join(name);
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).expect("create scratch dir");
        root
    }

    #[test]
    fn bind_creates_socket_directory_and_removes_stale_socket() {
        let dir = scratch_dir("bind_creates_socket_directory_and_removes_stale_socket");
        let socket_path = dir.join("sockets").join("storage.sock");
        std::fs::create_dir_all(socket_path.parent().expect("has parent")).expect("create socket dir");
        std::fs::write(&socket_path, b"stale").expect("write stale file");

        let storage = StorageConfig {
            path: dir.join("pyindex.db"),
            backup_dir: dir.join("backups"),
            request_socket: socket_path.clone(),
        };

        let (listener, _engine) = bind(&storage).expect("binds broker");
        drop(listener);
        assert!(socket_path.exists());
    }
}
