use std::time::Duration;

use atelier_contracts::wire::gemini::{GenerateContentRequest, InlineData, Part};
use reqwest::blocking::Client as HttpClient;
use serde_json::Value;

use super::{extract_inline_images, parse_generate_response, response_json, send_error};
use super::UpstreamTransport;
use crate::composer::GenerationRequest;
use crate::error::GenerationError;

const LABEL: &str = "Gemini";

/// `models/{model}:generateContent` with the key as a query parameter.
pub struct GeminiTransport {
    api_base: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiTransport {
    pub fn new(api_base: &str, model: &str, timeout: Duration) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, credential: &str, body: &GenerateContentRequest) -> Result<Value, GenerationError> {
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", credential)])
            .timeout(self.timeout)
            .json(body)
            .send()
            .map_err(|err| send_error(LABEL, err))?;
        response_json(LABEL, response)
    }
}

impl UpstreamTransport for GeminiTransport {
    fn name(&self) -> &str {
        "gemini"
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
