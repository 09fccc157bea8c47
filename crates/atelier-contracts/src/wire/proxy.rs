//! `POST /api/generate` request and response bodies.

use serde::{Deserialize, Serialize};

use super::AspectRatio;

pub const GENERATE_PATH: &str = "/api/generate";
pub const SOURCE_HEADER: &str = "X-Source-Request";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfit_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_base64: Option<String>,
    #[serde(default)]
    pub final_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

/// Either `{images}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProxyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProxyResponse {
    pub fn images(images: Vec<String>) -> Self {
        Self {
            images: Some(images),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            images: None,
            error: Some(message.into()),
        }
    }
}
