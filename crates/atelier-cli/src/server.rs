use std::sync::Arc;

use anyhow::{Context, Result};
use atelier_contracts::wire::proxy::{ProxyResponse, GENERATE_PATH};
use atelier_engine::config::ProxyConfig;
use atelier_engine::ProxyHandler;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Hosts the proxy handler until the process is stopped.
///
/// Upstream transports use blocking HTTP clients, so the handler is built
/// before the runtime starts and released after it shuts down.
pub fn serve(config: ProxyConfig) -> Result<()> {
    let bind = config.bind.clone();
    if config.shared_credential().is_err() {
        warn!("shared key is not configured; every request will be answered with 500");
    }
    let handler = Arc::new(ProxyHandler::new(config));
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let result = runtime.block_on(listen(bind, Arc::clone(&handler)));
    drop(runtime);
    drop(handler);
    result
}

async fn listen(bind: String, handler: Arc<ProxyHandler>) -> Result<()> {
    let upstream = handler.upstream_name().to_string();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(%bind, %upstream, "proxy listening on {GENERATE_PATH}");
    axum::serve(listener, router(handler))
        .await
        .context("proxy server stopped unexpectedly")
}

pub fn router(handler: Arc<ProxyHandler>) -> Router {
    Router::new()
        .route(GENERATE_PATH, post(generate))
        .with_state(handler)
}

async fn generate(
    State(handler): State<Arc<ProxyHandler>>,
    body: Bytes,
) -> (StatusCode, Json<ProxyResponse>) {
    match tokio::task::spawn_blocking(move || handler.handle(&body)).await {
        Ok(reply) => (
            StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(reply.body),
        ),
        Err(err) => {
            error!(error = %err, "proxy worker failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ProxyResponse::error("Internal server error.")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use atelier_contracts::wire::gemini::InlineData;
    use atelier_engine::composer::GenerationRequest;
    use atelier_engine::config::{ProxyConfig, UpstreamConfig};
    use atelier_engine::transport::UpstreamTransport;
    use atelier_engine::{GenerationError, ProxyHandler};
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::StatusCode;

    use super::generate;

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    impl UpstreamTransport for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn generate(
            &self,
            _credential: &str,
            _request: &GenerationRequest,
        ) -> Result<Vec<InlineData>, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![InlineData::png("RUNITw==")])
        }

        fn check_key(&self, _credential: &str) -> Result<(), GenerationError> {
            Ok(())
        }
    }

    fn handler(shared_key: Option<&str>) -> anyhow::Result<Arc<ProxyHandler>> {
        let config = ProxyConfig {
            shared_key: shared_key.map(str::to_string),
            bind: "127.0.0.1:0".to_string(),
            upstream: UpstreamConfig::from_lookup(|_| None)?,
        };
        Ok(Arc::new(ProxyHandler::with_transport(
            config,
            Box::new(Echo::default()),
        )))
    }

    fn call(handler: Arc<ProxyHandler>, body: &'static [u8]) -> anyhow::Result<(StatusCode, serde_json::Value)> {
        let runtime = tokio::runtime::Runtime::new()?;
        let (status, body) = runtime.block_on(generate(State(handler), Bytes::from_static(body)));
        Ok((status, serde_json::to_value(body.0)?))
    }

    #[test]
    fn replies_with_images_and_200() -> anyhow::Result<()> {
        let (status, body) = call(
            handler(Some("shared"))?,
            br#"{"finalPrompt":"a coat in the rain","count":2}"#,
        )?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"images": [
                "data:image/png;base64,RUNITw==",
                "data:image/png;base64,RUNITw=="
            ]})
        );
        Ok(())
    }

    #[test]
    fn maps_handler_status_codes() -> anyhow::Result<()> {
        let (status, body) = call(handler(None)?, br#"{"finalPrompt":"p"}"#)?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());

        let (status, _) = call(handler(Some("shared"))?, br#"{"count":1}"#)?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        Ok(())
    }
}
