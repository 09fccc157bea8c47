use std::time::Duration;

use atelier_contracts::wire::gemini::{GenerateContentRequest, InlineData, Part};
use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::Value;

use super::{
    error_field_message, extract_inline_images, parse_generate_response, response_json,
    send_error, UpstreamTransport,
};
use crate::composer::GenerationRequest;
use crate::error::GenerationError;

const LABEL: &str = "Script bridge";

/// Relays the Gemini request through a hosted script endpoint. The bridge
/// answers 200 even on failure, with `{error}` in the body.
pub struct ScriptBridgeTransport {
    url: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

#[derive(Serialize)]
struct BridgeEnvelope<'a> {
    key: &'a str,
    model: &'a str,
    request: &'a GenerateContentRequest,
}

impl ScriptBridgeTransport {
    pub fn new(url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            url: url.trim().to_string(),
            model: model.trim().to_string(),
            timeout,
            http: HttpClient::new(),
        }
    }

    fn post(&self, credential: &str, body: &GenerateContentRequest) -> Result<Value, GenerationError> {
        let envelope = BridgeEnvelope {
            key: credential,
            model: &self.model,
            request: body,
        };
        let response = self
            .http
            .post(&self.url)
            .timeout(self.timeout)
            .json(&envelope)
            .send()
            .map_err(|err| send_error(LABEL, err))?;
        let payload = response_json(LABEL, response)?;
        if let Some(message) = error_field_message(&payload) {
            return Err(GenerationError::UpstreamRejection(format!(
                "{LABEL} request failed: {message}"
            )));
        }
        Ok(payload)
    }
}

impl UpstreamTransport for ScriptBridgeTransport {
    fn name(&self) -> &str {
        "script"
    }

    fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<Vec<InlineData>, GenerationError> {
        let payload = self.post(credential, &request.upstream_body())?;
        let parsed = parse_generate_response(LABEL, payload)?;
        extract_inline_images(LABEL, &parsed)
    }

    fn check_key(&self, credential: &str) -> Result<(), GenerationError> {
        let body = GenerateContentRequest::new(vec![Part::Text("test".to_string())], None);
        self.post(credential, &body).map(|_| ())
    }
}
