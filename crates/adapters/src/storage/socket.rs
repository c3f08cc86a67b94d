//! Storage Engine request-broker wire protocol (spec.md §4.1, §6).
//!
//! Net-new — grounded on `embedder_http.rs`'s client conventions
//! (timeout-bounded, error-mapped, cancellation-aware calls) but over a
//! Unix domain socket instead of HTTP, carrying length-prefixed JSON
//! frames (one request/response per frame) instead of a REST body. SE is
//! specified as a single-threaded writer serving one request queue; FW,
//! IW, and CVW run as separate OS processes (`pyindex_infra::orchestrator`)
//! so they cannot share one in-process `SqliteStorageEngine`, and instead
//! each hold a [`StorageSocketClient`] that serializes through this
//! broker's listener.

use crate::storage::SqliteStorageEngine;
use pyindex_ports::{
    BoxFuture, ExecuteResult, IndexFileRequest, SqlValue, StoragePort, TransactionId,
};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
enum StorageRequest {
    Execute { tx: Option<TransactionId>, sql: String, params: Vec<SqlValue> },
    ExecuteBatch { tx: Option<TransactionId>, statements: Vec<(String, Vec<SqlValue>)> },
    BeginTransaction,
    Commit { tx: TransactionId },
    Rollback { tx: TransactionId },
    IndexFile { request: IndexFileRequest },
    SyncSchema,
    GetSchemaVersion,
}

#[derive(Debug, Serialize, Deserialize)]
enum StorageResponse {
    Execute(ExecuteResult),
    ExecuteBatch(Vec<ExecuteResult>),
    Transaction(TransactionId),
    Unit,
    SchemaVersion(u32),
    Error(ErrorEnvelope),
}

async fn write_frame(stream: &mut UnixStream, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_error| ErrorEnvelope::invariant(ErrorCode::storage_error(), "storage socket frame too large"))?;
    stream.write_all(&len.to_be_bytes()).await.map_err(io_error)?;
    stream.write_all(payload).await.map_err(io_error)?;
    stream.flush().await.map_err(io_error)
}

async fn read_frame(stream: &mut UnixStream) -> Result<Option<Vec<u8>>> {
    let mut len_bytes = [0_u8; 4];
    match stream.read_exact(&mut len_bytes).await {
        Ok(_) => {},
        Err(error) if error.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(error) => return Err(io_error(error)),
    }
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(ErrorEnvelope::invariant(ErrorCode::storage_error(), "storage socket frame exceeds limit"));
    }
    let mut payload = vec![0_u8; len as usize];
    stream.read_exact(&mut payload).await.map_err(io_error)?;
    Ok(Some(payload))
}

fn io_error(error: std::io::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(ErrorCode::storage_error(), format!("storage socket I/O failed: {error}"), ErrorClass::Retriable)
}

fn decode_error(error: &serde_json::Error) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::storage_error(),
        format!("storage socket frame decode failed: {error}"),
        ErrorClass::NonRetriable,
    )
}

fn encode(value: &impl Serialize) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|error| decode_error(&error))
}

/// Client-side [`StoragePort`] implementation: one persistent connection
/// to the broker, held behind a mutex so requests are sent and their
/// responses read in lockstep (no correlation ids needed).
pub struct StorageSocketClient {
    path: std::path::PathBuf,
    conn: Mutex<Option<UnixStream>>,
}

impl StorageSocketClient {
    /// Build a client for the broker listening at `path`. The connection
    /// is established lazily on first use.
    #[must_use]
    pub const fn new(path: std::path::PathBuf) -> Self {
        Self { path, conn: Mutex::new(None) }
    }

    async fn call(&self, request: &StorageRequest) -> Result<StorageResponse> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            let stream = UnixStream::connect(&self.path).await.map_err(io_error)?;
            *guard = Some(stream);
        }
        let Some(stream) = guard.as_mut() else {
            return Err(ErrorEnvelope::invariant(ErrorCode::internal(), "storage socket connection missing after connect"));
        };

        let payload = encode(request)?;
        if write_frame(stream, &payload).await.is_err() {
            *guard = None;
            return Err(ErrorEnvelope::unexpected(ErrorCode::storage_error(), "storage broker connection lost", ErrorClass::Retriable));
        }

        let response_bytes = match read_frame(stream).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) | Err(_) => {
                *guard = None;
                return Err(ErrorEnvelope::unexpected(
                    ErrorCode::storage_error(),
                    "storage broker closed the connection",
                    ErrorClass::Retriable,
                ));
            },
        };
        serde_json::from_slice(&response_bytes).map_err(|error| decode_error(&error))
    }
}

impl StoragePort for StorageSocketClient {
    fn execute(&self, _ctx: &RequestContext, tx: Option<TransactionId>, sql: &str, params: Vec<SqlValue>) -> BoxFuture<'_, Result<ExecuteResult>> {
        let request = StorageRequest::Execute { tx, sql: sql.to_owned(), params };
        Box::pin(async move {
            match self.call(&request).await? {
                StorageResponse::Execute(result) => Ok(result),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn execute_batch(
        &self,
        _ctx: &RequestContext,
        tx: Option<TransactionId>,
        statements: Vec<(Box<str>, Vec<SqlValue>)>,
    ) -> BoxFuture<'_, Result<Vec<ExecuteResult>>> {
        let statements = statements.into_iter().map(|(sql, params)| (String::from(sql), params)).collect();
        let request = StorageRequest::ExecuteBatch { tx, statements };
        Box::pin(async move {
            match self.call(&request).await? {
                StorageResponse::ExecuteBatch(results) => Ok(results),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn begin_transaction(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<TransactionId>> {
        Box::pin(async move {
            match self.call(&StorageRequest::BeginTransaction).await? {
                StorageResponse::Transaction(id) => Ok(id),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn commit(&self, _ctx: &RequestContext, tx: TransactionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.call(&StorageRequest::Commit { tx }).await? {
                StorageResponse::Unit => Ok(()),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn rollback(&self, _ctx: &RequestContext, tx: TransactionId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            match self.call(&StorageRequest::Rollback { tx }).await? {
                StorageResponse::Unit => Ok(()),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn index_file(&self, _ctx: &RequestContext, request: IndexFileRequest) -> BoxFuture<'_, Result<()>> {
        let request = StorageRequest::IndexFile { request };
        Box::pin(async move {
            match self.call(&request).await? {
                StorageResponse::Unit => Ok(()),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn sync_schema(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            match self.call(&StorageRequest::SyncSchema).await? {
                StorageResponse::SchemaVersion(version) => Ok(version),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }

    fn get_schema_version(&self, _ctx: &RequestContext) -> BoxFuture<'_, Result<u32>> {
        Box::pin(async move {
            match self.call(&StorageRequest::GetSchemaVersion).await? {
                StorageResponse::SchemaVersion(version) => Ok(version),
                StorageResponse::Error(error) => Err(error),
                _ => Err(unexpected_response()),
            }
        })
    }
}

fn unexpected_response() -> ErrorEnvelope {
    ErrorEnvelope::invariant(ErrorCode::internal(), "storage broker returned a mismatched response variant")
}

/// Run the broker's accept loop against `engine`, serving connections
/// until the listener errors or is dropped. Each connection is served on
/// its own task; `engine` (typically a [`SqliteStorageEngine`]) already
/// serializes concurrent callers behind its own connection mutex.
pub async fn serve(listener: UnixListener, engine: Arc<SqliteStorageEngine>) -> Result<()> {
    loop {
        let (stream, _addr) = listener.accept().await.map_err(io_error)?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let _ = serve_connection(stream, engine).await;
        });
    }
}

async fn serve_connection(mut stream: UnixStream, engine: Arc<SqliteStorageEngine>) -> Result<()> {
    loop {
        let Some(payload) = read_frame(&mut stream).await? else {
            return Ok(());
        };
        let request: StorageRequest = match serde_json::from_slice(&payload) {
            Ok(request) => request,
            Err(error) => {
                let response = encode(&StorageResponse::Error(decode_error(&error)))?;
                write_frame(&mut stream, &response).await?;
                continue;
            },
        };

        let response = dispatch(&engine, request).await;
        let bytes = encode(&response)?;
        write_frame(&mut stream, &bytes).await?;
    }
}

async fn dispatch(engine: &Arc<SqliteStorageEngine>, request: StorageRequest) -> StorageResponse {
    let ctx = RequestContext::new_request();
    let outcome: Result<StorageResponse> = async {
        match request {
            StorageRequest::Execute { tx, sql, params } => {
                Ok(StorageResponse::Execute(engine.execute(&ctx, tx, &sql, params).await?))
            },
            StorageRequest::ExecuteBatch { tx, statements } => {
                let statements = statements.into_iter().map(|(sql, params)| (sql.into_boxed_str(), params)).collect();
                Ok(StorageResponse::ExecuteBatch(engine.execute_batch(&ctx, tx, statements).await?))
            },
            StorageRequest::BeginTransaction => Ok(StorageResponse::Transaction(engine.begin_transaction(&ctx).await?)),
            StorageRequest::Commit { tx } => {
                engine.commit(&ctx, tx).await?;
                Ok(StorageResponse::Unit)
            },
            StorageRequest::Rollback { tx } => {
                engine.rollback(&ctx, tx).await?;
                Ok(StorageResponse::Unit)
            },
            StorageRequest::IndexFile { request } => {
                engine.index_file(&ctx, request).await?;
                Ok(StorageResponse::Unit)
            },
            StorageRequest::SyncSchema => Ok(StorageResponse::SchemaVersion(engine.sync_schema(&ctx).await?)),
            StorageRequest::GetSchemaVersion => Ok(StorageResponse::SchemaVersion(engine.get_schema_version(&ctx).await?)),
        }
    }
    .await;

    outcome.unwrap_or_else(StorageResponse::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyindex_shared::RequestContext;

    fn scratch(name: &str) -> std::path::PathBuf {
        let root = std::env::temp_dir().join("pyindex_storage_socket_test").join(name);
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).expect("create scratch dir");
        root
    }

    #[tokio::test]
    async fn round_trips_an_execute_call_over_the_socket() {
        let root = scratch("round_trips_an_execute_call_over_the_socket");
        let engine = Arc::new(SqliteStorageEngine::open(root.join("pyindex.db"), root.join("backups")).expect("open storage"));
        let socket_path = root.join("pyindex.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind socket");

        let server = tokio::spawn(serve(listener, Arc::clone(&engine)));
        let client = StorageSocketClient::new(socket_path);
        let ctx = RequestContext::new_request();

        let version = client.get_schema_version(&ctx).await.expect("get schema version over socket");
        assert_eq!(version, engine.get_schema_version(&ctx).await.expect("direct schema version"));

        server.abort();
    }
}
