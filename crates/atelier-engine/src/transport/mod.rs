//! Upstream generation transports.
//!
//! Every transport takes the same composed request and yields the inline
//! images of one upstream call. Which one the proxy uses is a configuration
//! choice ([`UpstreamKind`]); direct mode always talks to Gemini.

mod gemini;
mod openrouter;
mod script_bridge;

use std::fmt;
use std::str::FromStr;

use atelier_contracts::wire::gemini::{GenerateContentResponse, InlineData};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::composer::GenerationRequest;
use crate::error::{clip, GenerationError};

pub use gemini::GeminiTransport;
pub use openrouter::OpenRouterTransport;
pub use script_bridge::ScriptBridgeTransport;

pub trait UpstreamTransport: Send + Sync {
    fn name(&self) -> &str;

    /// One upstream call. Succeeds only when at least one inline image came
    /// back.
    fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<Vec<InlineData>, GenerationError>;

    /// Minimal text-only call used to check that a credential works.
    fn check_key(&self, credential: &str) -> Result<(), GenerationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpstreamKind {
    #[default]
    Gemini,
    Script,
    OpenRouter,
}

impl UpstreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UpstreamKind::Gemini => "gemini",
            UpstreamKind::Script => "script",
            UpstreamKind::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpstreamKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "direct" => Ok(UpstreamKind::Gemini),
            "script" | "script-bridge" => Ok(UpstreamKind::Script),
            "openrouter" => Ok(UpstreamKind::OpenRouter),
            other => Err(format!(
                "unknown upstream '{other}' (expected gemini, script or openrouter)"
            )),
        }
    }
}

/// Reads a response body as JSON. Non-success statuses become rejections
/// carrying the upstream message; unreadable or non-JSON bodies become
/// transport errors.
pub(crate) fn response_json(label: &str, response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        GenerationError::transport(
            &anyhow::Error::new(err.without_url())
                .context(format!("{label} response body read failed")),
        )
    })?;
    if !status.is_success() {
        let message = upstream_error_message(&body).unwrap_or_else(|| clip(&body, 512));
        return Err(GenerationError::UpstreamRejection(format!(
            "{label} request failed ({code}): {message}"
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        GenerationError::transport(
            &anyhow::Error::new(err).context(format!("{label} returned invalid JSON payload")),
        )
    })
}

pub(crate) fn send_error(label: &str, err: reqwest::Error) -> GenerationError {
    GenerationError::transport(
        &anyhow::Error::new(err.without_url()).context(format!("{label} request failed")),
    )
}

/// `error` field of an upstream body, as a plain string or `{message}`.
pub(crate) fn upstream_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    error_field_message(&parsed)
}

pub(crate) fn error_field_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    let message = match error {
        Value::String(text) => text.clone(),
        Value::Object(body) => body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        Value::Null => return None,
        other => other.to_string(),
    };
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

/// Inline images of the first candidate. Responses without image-bearing
/// content (usually a safety block) are rejections explaining why.
pub fn extract_inline_images(
    label: &str,
    response: &GenerateContentResponse,
) -> Result<Vec<InlineData>, GenerationError> {
    let Some(candidate) = response.candidates.first() else {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
            .map(|reason| format!(" (blocked: {reason})"))
            .unwrap_or_default();
        return Err(GenerationError::UpstreamRejection(format!(
            "{label} returned no candidates{reason}. The request may have been rejected by the safety filter."
        )));
    };

    let parts = candidate
        .content
        .as_ref()
        .and_then(|content| content.parts.as_ref());
    let images: Vec<InlineData> = parts
        .into_iter()
        .flatten()
        .filter_map(|part| part.inline_data.clone())
        .filter(|inline| !inline.data.trim().is_empty())
        .collect();
    if !images.is_empty() {
        return Ok(images);
    }

    let text_reply = parts
        .into_iter()
        .flatten()
        .filter_map(|part| part.text.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<&str>>()
        .join(" ");
    let detail = if !text_reply.is_empty() {
        format!(": {}", clip(&text_reply, 400))
    } else if let Some(reason) = candidate.finish_reason.as_deref() {
        format!(" (finish reason: {reason})")
    } else {
        String::new()
    };
    Err(GenerationError::UpstreamRejection(format!(
        "{label} returned no image{detail}"
    )))
}

/// Typed view of a Gemini-shaped JSON document.
pub(crate) fn parse_generate_response(
    label: &str,
    payload: Value,
) -> Result<GenerateContentResponse, GenerationError> {
    serde_json::from_value(payload).map_err(|err| {
        GenerationError::transport(
            &anyhow::Error::new(err).context(format!("{label} returned an unexpected response shape")),
        )
    })
}
