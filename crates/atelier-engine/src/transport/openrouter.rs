use std::time::Duration;

use atelier_contracts::wire::gemini::InlineData;
use atelier_contracts::wire::AspectRatio;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{response_json, send_error, UpstreamTransport};
use crate::composer::{strip_data_uri, GenerationRequest};
use crate::error::{clip, GenerationError};

const LABEL: &str = "OpenRouter";

/// Chat-completions gateway with image output, bearer-authenticated.
pub struct OpenRouterTransport {
    api_base: String,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    modalities: [&'static str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ChatImageConfig>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentItem>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    ImageUrl { image_url: ImageUrl },
    Text { text: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatImageConfig {
    aspect_ratio: AspectRatio,
}

#[derive(Debug, Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChoiceMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    images: Vec<ChoiceImage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceImage {
    image_url: ImageUrl,
}

impl OpenRouterTransport {
    pub fn new(api_base: &str, model: &str, timeout: Duration) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            model: model.trim().to_string(),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    fn chat_request<'a>(&'a self, request: &GenerationRequest) -> ChatRequest<'a> {
        let mut content: Vec<ContentItem> = request
            .images
            .ordered()
            .map(|image| ContentItem::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{}", strip_data_uri(image)),
                },
            })
            .collect();
        content.push(ContentItem::Text {
            text: request.final_prompt.clone(),
        });
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            modalities: ["image", "text"],
            image_config: request
                .aspect_ratio
                .map(|aspect_ratio| ChatImageConfig { aspect_ratio }),
        }
    }

    fn post(&self, credential: &str, body: &ChatRequest<'_>) -> Result<Value, GenerationError> {
        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(credential)
            .header("accept", "application/json")
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.timeout)
            .json(body)
            .send()
            .map_err(|err| send_error(LABEL, err))?;
        response_json(LABEL, response)
    }
}

impl UpstreamTransport for OpenRouterTransport {
    fn name(&self) -> &str {
        "openrouter"
    }

    fn generate(
        &self,
        credential: &str,
        request: &GenerationRequest,
    ) -> Result<Vec<InlineData>, GenerationError> {
        let payload = self.post(credential, &self.chat_request(request))?;
        let parsed: ChatResponse = serde_json::from_value(payload).map_err(|err| {
            GenerationError::transport(
                &anyhow::Error::new(err).context("OpenRouter returned an unexpected response shape"),
            )
        })?;
        extract_chat_images(&parsed)
    }

    fn check_key(&self, credential: &str) -> Result<(), GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![ContentItem::Text {
                    text: "test".to_string(),
                }],
            }],
            modalities: ["image", "text"],
            image_config: None,
        };
        self.post(credential, &body).map(|_| ())
    }
}

fn extract_chat_images(response: &ChatResponse) -> Result<Vec<InlineData>, GenerationError> {
    let Some(choice) = response.choices.first() else {
        return Err(GenerationError::UpstreamRejection(format!(
            "{LABEL} returned no choices."
        )));
    };
    let images: Vec<InlineData> = choice
        .message
        .iter()
        .flat_map(|message| message.images.iter())
        .filter_map(|image| inline_from_data_uri(&image.image_url.url))
        .collect();
    if !images.is_empty() {
        return Ok(images);
    }
    let text = choice
        .message
        .as_ref()
        .and_then(|message| message.content.as_ref())
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty());
    let detail = match (text, choice.finish_reason.as_deref()) {
        (Some(text), _) => format!(": {}", clip(text, 400)),
        (None, Some(reason)) => format!(" (finish reason: {reason})"),
        (None, None) => String::new(),
    };
    Err(GenerationError::UpstreamRejection(format!(
        "{LABEL} returned no image{detail}"
    )))
}

fn inline_from_data_uri(url: &str) -> Option<InlineData> {
    let trimmed = url.trim();
    let (meta, data) = trimmed.strip_prefix("data:")?.split_once(',')?;
    if data.is_empty() {
        return None;
    }
    let mime_type = meta.split(';').next().unwrap_or("image/png");
    Some(InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}
