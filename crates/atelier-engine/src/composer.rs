use atelier_contracts::wire::gemini::{GenerateContentRequest, InlineData, Part};
use atelier_contracts::wire::proxy::ProxyRequest;
use atelier_contracts::wire::AspectRatio;

use crate::error::GenerationError;
use crate::prompt::compose_prompt;

pub const MIN_IMAGE_COUNT: u32 = 1;
pub const MAX_IMAGE_COUNT: u32 = 4;

/// Reference images as embedded `data:` URIs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceImages {
    pub character: Option<String>,
    pub outfit: Option<String>,
    pub context: Option<String>,
}

impl ReferenceImages {
    /// Images in their fixed send order; absent ones are skipped.
    pub fn ordered(&self) -> impl Iterator<Item = &str> {
        [&self.character, &self.outfit, &self.context]
            .into_iter()
            .filter_map(|image| image.as_deref())
    }
}

/// A fully composed generation: references, final prompt, ratio and count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub images: ReferenceImages,
    pub final_prompt: String,
    pub aspect_ratio: Option<AspectRatio>,
    pub count: u32,
}

impl GenerationRequest {
    /// Validates client-side inputs and assembles the final prompt. Character
    /// and outfit images are required; context is optional.
    pub fn compose(
        images: ReferenceImages,
        scene: &str,
        aspect_ratio: AspectRatio,
        count: u32,
    ) -> Result<Self, GenerationError> {
        if is_blank(images.character.as_deref()) || is_blank(images.outfit.as_deref()) {
            return Err(GenerationError::MissingInput(
                "Please upload at least a character image and an outfit image.".to_string(),
            ));
        }
        let final_prompt = compose_prompt(scene, !is_blank(images.context.as_deref()));
        Ok(Self {
            images,
            final_prompt,
            aspect_ratio: Some(aspect_ratio),
            count: clamp_count(count),
        })
    }

    /// One inline-image part per present reference, then the prompt text.
    pub fn parts(&self) -> Vec<Part> {
        let mut parts: Vec<Part> = self
            .images
            .ordered()
            .map(|image| Part::InlineData(InlineData::png(strip_data_uri(image))))
            .collect();
        parts.push(Part::Text(self.final_prompt.clone()));
        parts
    }

    pub fn upstream_body(&self) -> GenerateContentRequest {
        GenerateContentRequest::new(self.parts(), self.aspect_ratio)
    }

    pub fn to_proxy_request(&self) -> ProxyRequest {
        ProxyRequest {
            character_base64: self.images.character.clone(),
            outfit_base64: self.images.outfit.clone(),
            context_base64: self.images.context.clone(),
            final_prompt: Some(self.final_prompt.clone()),
            aspect_ratio: self.aspect_ratio,
            count: Some(self.count),
        }
    }

    /// Rebuilds a request from a proxy body. Only the prompt is required
    /// here; the count must already be validated.
    pub fn from_proxy_request(request: ProxyRequest, count: u32) -> Self {
        Self {
            images: ReferenceImages {
                character: request.character_base64,
                outfit: request.outfit_base64,
                context: request.context_base64,
            },
            final_prompt: request.final_prompt.unwrap_or_default(),
            aspect_ratio: request.aspect_ratio,
            count,
        }
    }
}

pub fn clamp_count(count: u32) -> u32 {
    count.clamp(MIN_IMAGE_COUNT, MAX_IMAGE_COUNT)
}

/// Raw base64 payload of a `data:` URI: everything after the first comma.
/// Strings without a `data:` prefix are taken as raw base64 already.
pub fn strip_data_uri(value: &str) -> &str {
    let trimmed = value.trim();
    if !trimmed.starts_with("data:") {
        return trimmed;
    }
    trimmed
        .split_once(',')
        .map(|(_, payload)| payload)
        .unwrap_or_default()
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|raw| raw.trim().is_empty()).unwrap_or(true)
}
