//! Final prompt assembly.
//!
//! Clause order is fixed: each fidelity clause names its reference image by
//! position, and images are sent in the same order (character, outfit,
//! context), so reordering either side breaks the pairing.

use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PROMPT: &str =
    "Front-facing camera angle at eye level, capturing the character's full body.";

pub const STYLE_PREFIX: &str = "Realistic photograph. ";
pub const QUALITY_KEYWORDS: &str = "hyper-realistic, sharp focus. ";
pub const CHARACTER_CLAUSE: &str = "Character at the center, keeping the facial features, build and presence of reference image 1. ";
pub const OUTFIT_CLAUSE: &str =
    "Detailed outfit with colors and materials faithful to reference image 2. ";
pub const CONTEXT_CLAUSE: &str = "Setting and lighting inspired by reference image 3. ";

pub const EXCLUSIONS: &str = ". Ensure a clean composition with no visual artifacts or unrelated objects. Scene requirements: Photorealistic, highly detailed, No blurry details, no distorted perspective, no cartoon style, no messy electrical wires. Exclude the following: worst quality, low resolution, blurry, distorted perspective, cartoon style, sketch, 3d model look, plastic surface, wax texture, flat lighting, bad composition, watermark, unrealistic scale, deformed structure, overexposed.";

/// Builds the prompt sent alongside the reference images.
pub fn compose_prompt(scene: &str, has_context: bool) -> String {
    let context = if has_context { CONTEXT_CLAUSE } else { "" };
    format!(
        "{STYLE_PREFIX}{QUALITY_KEYWORDS}{CHARACTER_CLAUSE}{OUTFIT_CLAUSE}{context}{scene}{EXCLUSIONS}"
    )
}

/// Canned scene descriptions that replace the prompt text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenePreset {
    Hanoi,
    Studio,
}

impl ScenePreset {
    pub const ALL: [ScenePreset; 2] = [ScenePreset::Hanoi, ScenePreset::Studio];

    pub fn key(self) -> &'static str {
        match self {
            ScenePreset::Hanoi => "hanoi",
            ScenePreset::Studio => "studio",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScenePreset::Hanoi => "On a quiet Hanoi street in autumn",
            ScenePreset::Studio => "In a studio with cinematic lighting",
        }
    }

    pub fn prompt(self) -> &'static str {
        match self {
            ScenePreset::Hanoi => "Set on a street in Hanoi. Soft sunlight filtering through the tree canopy. Front-facing camera angle at eye level, capturing the character's full body.",
            ScenePreset::Studio => "Set inside a photo studio. Soft, artificial cinematic lighting. Artistic camera angle at eye level, capturing the character's full body.",
        }
    }
}

impl fmt::Display for ScenePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ScenePreset {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        ScenePreset::ALL
            .into_iter()
            .find(|preset| preset.key() == normalized)
            .ok_or_else(|| format!("unknown preset '{}' (expected hanoi or studio)", raw.trim()))
    }
}
