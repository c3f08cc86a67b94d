// HTTP embedder adapter integration tests, run against a mock server.
#![allow(missing_docs)]

use pyindex_adapters::embedder_http::HttpEmbedder;
use pyindex_config::{EmbedderConfig, EmbedderTlsConfig};
use pyindex_domain::Language;
use pyindex_ports::{EmbedChunksRequest, EmbedKind, EmbedderPort};
use pyindex_shared::{RequestContext, Result};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(endpoint: String) -> EmbedderConfig {
    EmbedderConfig {
        endpoint,
        tls: EmbedderTlsConfig::default(),
    }
}

#[tokio::test]
async fn get_chunks_decodes_a_successful_response() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .and(body_json(json!({
            "text": "say hello",
            "kind": "DocBlock",
            "language": "python"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chunks": [
                {"text": "say hello", "embedding": [0.1, 0.2], "token_count": 3}
            ],
            "processing_time": 0.01
        })))
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(&config(server.uri()), 5_000)?;
    let ctx = RequestContext::new_request();
    let response = embedder
        .get_chunks(
            &ctx,
            EmbedChunksRequest {
                text: "say hello".into(),
                kind: EmbedKind::DocBlock,
                language: Some(Language::Python),
            },
        )
        .await?;

    assert_eq!(response.chunks.len(), 1);
    assert_eq!(response.chunks[0].token_count, 3);
    assert_eq!(response.chunks[0].embedding, vec![0.1, 0.2]);
    Ok(())
}

#[tokio::test]
async fn get_chunks_treats_empty_docstring_response_as_zero_chunks() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chunks": [],
            "processing_time": 0.0
        })))
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(&config(server.uri()), 5_000)?;
    let ctx = RequestContext::new_request();
    let response = embedder
        .get_chunks(
            &ctx,
            EmbedChunksRequest {
                text: "   ".into(),
                kind: EmbedKind::DocBlock,
                language: None,
            },
        )
        .await?;

    assert!(response.chunks.is_empty());
    Ok(())
}

#[tokio::test]
async fn get_chunks_surfaces_server_outage_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let embedder = HttpEmbedder::new(&config(server.uri()), 5_000).expect("valid config");
    let ctx = RequestContext::new_request();
    let error = embedder
        .get_chunks(
            &ctx,
            EmbedChunksRequest {
                text: "hello".into(),
                kind: EmbedKind::Code,
                language: None,
            },
        )
        .await
        .expect_err("server outage surfaces as an error");
    assert!(error.class.is_retriable());
}
