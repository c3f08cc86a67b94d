//! HTTP Embedder client adapter (spec.md §4.5, §6).
//!
//! Grounded on `crates/adapters/src/embedding/openai.rs`'s `reqwest`
//! client conventions (timeout-bounded client, `tokio::select!` against
//! cancellation, status-code error mapping) adapted to the single
//! `get_chunks` call spec.md §6 defines for EE instead of a multi-provider
//! embed/embed_batch/detect_dimension surface.

use pyindex_config::EmbedderConfig;
use pyindex_domain::Language;
use pyindex_ports::{BoxFuture, EmbedChunksRequest, EmbedChunksResponse, EmbedKind, EmbedderPort, EmbeddedChunk};
use pyindex_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Talks to the out-of-process Embedder over HTTP.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: Box<str>,
}

impl HttpEmbedder {
    /// Build an HTTP embedder client from `embedder.*` connection settings
    /// and the `vectorizer.request_timeout` (ms) per-call budget.
    ///
    /// Mutual TLS (`embedder.tls.{cert,key,ca}`) is rejected here rather
    /// than silently ignored: wiring it up needs reqwest's
    /// `native-tls`/`rustls-tls` feature, which this build doesn't enable.
    pub fn new(config: &EmbedderConfig, request_timeout_ms: u64) -> Result<Self> {
        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "embedder.endpoint must be non-empty",
            ));
        }
        if config.tls.cert.is_some() || config.tls.key.is_some() || config.tls.ca.is_some() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::config_error(),
                "embedder.tls.* is configured but this build's reqwest client lacks TLS \
                 identity support (native-tls/rustls-tls feature not enabled)",
            ));
        }
        if request_timeout_ms == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "vectorizer.request_timeout must be greater than zero",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms))
            .build()
            .map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::new("embedder", "client_init_failed"),
                    format!("failed to build embedder client: {error}"),
                    ErrorClass::NonRetriable,
                )
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned().into_boxed_str(),
        })
    }
}

impl EmbedderPort for HttpEmbedder {
    fn get_chunks(
        &self,
        ctx: &RequestContext,
        request: EmbedChunksRequest,
    ) -> BoxFuture<'_, Result<EmbedChunksResponse>> {
        let ctx = ctx.clone();
        let endpoint = self.endpoint.clone();
        let client = self.client.clone();
        Box::pin(async move {
            ctx.ensure_not_cancelled("embedder_http.get_chunks")?;

            let body = GetChunksRequestBody {
                text: request.text,
                kind: wire_kind(request.kind),
                language: request.language.map(Language::as_str),
            };

            let response = tokio::select! {
                () = ctx.cancelled() => return Err(cancelled_error("embedder_http.get_chunks")),
                result = client.post(endpoint.as_ref()).json(&body).send() => {
                    result.map_err(|error| map_reqwest_error(&error))?
                }
            };

            let status = response.status();
            let payload = tokio::select! {
                () = ctx.cancelled() => return Err(cancelled_error("embedder_http.get_chunks")),
                result = response.bytes() => result.map_err(|error| map_reqwest_error(&error))?,
            };

            if !status.is_success() {
                return Err(map_http_error(status, &payload));
            }

            let decoded: GetChunksResponseBody = serde_json::from_slice(&payload).map_err(|error| {
                ErrorEnvelope::unexpected(
                    ErrorCode::embed_transient_error(),
                    format!("failed to decode embedder response: {error}"),
                    ErrorClass::Retriable,
                )
            })?;

            Ok(EmbedChunksResponse {
                chunks: decoded
                    .chunks
                    .into_iter()
                    .map(|chunk| EmbeddedChunk {
                        text: chunk.text,
                        embedding: chunk.embedding,
                        token_count: chunk.token_count,
                    })
                    .collect(),
                processing_time: decoded.processing_time,
            })
        })
    }
}

const fn wire_kind(kind: EmbedKind) -> &'static str {
    match kind {
        EmbedKind::DocBlock => "DocBlock",
        EmbedKind::Code => "Code",
    }
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

fn map_reqwest_error(error: &reqwest::Error) -> ErrorEnvelope {
    if error.is_timeout() {
        return ErrorEnvelope::unexpected(
            ErrorCode::embed_transient_error(),
            "embedder request timed out",
            ErrorClass::Retriable,
        );
    }
    if error.is_connect() {
        return ErrorEnvelope::unexpected(
            ErrorCode::embed_transient_error(),
            format!("embedder connection failed: {error}"),
            ErrorClass::Retriable,
        );
    }
    ErrorEnvelope::unexpected(
        ErrorCode::embed_transient_error(),
        format!("embedder request failed: {error}"),
        ErrorClass::Retriable,
    )
}

/// Maps EE's HTTP status to the transient/fatal split spec.md §7 draws
/// between `EmbedTransientError` (retry next cycle, breaker increments)
/// and `EmbedFatalError` (abandon this file's chunking).
fn map_http_error(status: StatusCode, payload: &[u8]) -> ErrorEnvelope {
    let message = serde_json::from_slice::<ErrorResponseBody>(payload)
        .map(|body| body.message)
        .unwrap_or_else(|_| format!("embedder returned HTTP {status}"));

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        return ErrorEnvelope::unexpected(ErrorCode::embed_transient_error(), message, ErrorClass::Retriable);
    }
    ErrorEnvelope::unexpected(ErrorCode::embed_fatal_error(), message, ErrorClass::NonRetriable)
}

#[derive(Debug, Serialize)]
struct GetChunksRequestBody {
    text: Box<str>,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct GetChunksResponseBody {
    chunks: Vec<ChunkBody>,
    processing_time: f64,
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    text: Box<str>,
    #[serde(default)]
    embedding: Vec<f32>,
    token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponseBody {
    message: String,
}
