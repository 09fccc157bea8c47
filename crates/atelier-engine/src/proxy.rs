//! Server side of `POST /api/generate`.
//!
//! The handler owns the shared credential and forwards validated requests to
//! the configured upstream. Every outcome is a status code plus either
//! `{images}` or `{error}`; nothing here knows about HTTP framing.

use atelier_contracts::wire::proxy::{ProxyRequest, ProxyResponse};
use tracing::{error, info};

use crate::composer::{GenerationRequest, MAX_IMAGE_COUNT, MIN_IMAGE_COUNT};
use crate::config::ProxyConfig;
use crate::error::GenerationError;
use crate::transport::UpstreamTransport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyReply {
    pub status: u16,
    pub body: ProxyResponse,
}

impl ProxyReply {
    fn ok(images: Vec<String>) -> Self {
        Self {
            status: 200,
            body: ProxyResponse::images(images),
        }
    }

    fn failure(err: &GenerationError) -> Self {
        Self {
            status: err.status_code(),
            body: ProxyResponse::error(err.to_string()),
        }
    }
}

pub struct ProxyHandler {
    config: ProxyConfig,
    transport: Box<dyn UpstreamTransport>,
}

impl ProxyHandler {
    pub fn new(config: ProxyConfig) -> Self {
        let transport = config.upstream.proxy_transport();
        Self { config, transport }
    }

    pub fn with_transport(config: ProxyConfig, transport: Box<dyn UpstreamTransport>) -> Self {
        Self { config, transport }
    }

    pub fn upstream_name(&self) -> &str {
        self.transport.name()
    }

    /// Handles one raw request body.
    pub fn handle(&self, body: &[u8]) -> ProxyReply {
        match self.run(body) {
            Ok(images) => {
                info!(
                    upstream = self.transport.name(),
                    images = images.len(),
                    "proxy generation completed"
                );
                ProxyReply::ok(images)
            }
            Err(err) => {
                error!(
                    upstream = self.transport.name(),
                    kind = err.kind(),
                    status = err.status_code(),
                    detail = %err.log_text(),
                    "proxy generation failed"
                );
                ProxyReply::failure(&err)
            }
        }
    }

    fn run(&self, body: &[u8]) -> Result<Vec<String>, GenerationError> {
        let credential = self.config.shared_credential()?;
        let request = parse_request(body)?;
        if request
            .final_prompt
            .as_deref()
            .map(|prompt| prompt.trim().is_empty())
            .unwrap_or(true)
        {
            return Err(GenerationError::Validation(
                "finalPrompt is required.".to_string(),
            ));
        }
        let count = validated_count(request.count)?;
        let request = GenerationRequest::from_proxy_request(request, count);
        info!(
            upstream = self.transport.name(),
            count,
            references = request.images.ordered().count(),
            "proxy generation started"
        );

        let mut images = Vec::new();
        for _ in 0..count {
            let batch = self.transport.generate(credential, &request)?;
            images.extend(batch.iter().map(|inline| inline.to_png_data_uri()));
        }
        Ok(images)
    }
}

fn parse_request(body: &[u8]) -> Result<ProxyRequest, GenerationError> {
    serde_json::from_slice(body)
        .map_err(|err| GenerationError::Validation(format!("Invalid request body: {err}")))
}

fn validated_count(count: Option<u32>) -> Result<u32, GenerationError> {
    match count {
        None => Ok(MIN_IMAGE_COUNT),
        Some(value) if (MIN_IMAGE_COUNT..=MAX_IMAGE_COUNT).contains(&value) => Ok(value),
        Some(value) => Err(GenerationError::Validation(format!(
            "count must be between {MIN_IMAGE_COUNT} and {MAX_IMAGE_COUNT}, got {value}."
        ))),
    }
}
