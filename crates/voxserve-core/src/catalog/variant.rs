//! Model variants, size tiers and identifier parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

const TOKENIZER_REPO: &str = "Qwen/Qwen3-TTS-Tokenizer-12Hz";

/// Parameter-count tier applied process-wide to the size-dependent variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelSize {
    #[serde(rename = "0.6B")]
    Small,
    #[serde(rename = "1.7B")]
    Large,
}

impl ModelSize {
    pub fn all() -> &'static [ModelSize] {
        &[ModelSize::Small, ModelSize::Large]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Small => "0.6B",
            Self::Large => "1.7B",
        }
    }
}

impl Default for ModelSize {
    fn default() -> Self {
        Self::Large
    }
}

impl fmt::Display for ModelSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ModelSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0.6b" | "0.6" | "06b" | "small" => Ok(Self::Small),
            "1.7b" | "1.7" | "17b" | "large" => Ok(Self::Large),
            _ => Err(Error::UnknownVariant(format!(
                "model size '{}' (expected 0.6B or 1.7B)",
                s.trim()
            ))),
        }
    }
}

/// One of the four loadable model units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Synthesizer with pre-built speaker voices
    CustomVoice,
    /// Synthesizer driven by a natural-language voice description
    VoiceDesign,
    /// Base synthesizer used for cloning from reference audio
    VoiceClone,
    /// Shared 12Hz speech tokenizer
    Tokenizer,
}

impl ModelVariant {
    pub fn all() -> &'static [ModelVariant] {
        &[
            ModelVariant::CustomVoice,
            ModelVariant::VoiceDesign,
            ModelVariant::VoiceClone,
            ModelVariant::Tokenizer,
        ]
    }

    /// Variants that can produce speech.
    pub fn synthesizers() -> &'static [ModelVariant] {
        &[
            ModelVariant::CustomVoice,
            ModelVariant::VoiceDesign,
            ModelVariant::VoiceClone,
        ]
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::CustomVoice => "custom_voice",
            Self::VoiceDesign => "voice_design",
            Self::VoiceClone => "voice_clone",
            Self::Tokenizer => "tokenizer",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::CustomVoice => "Custom Voice",
            Self::VoiceDesign => "Voice Design",
            Self::VoiceClone => "Voice Clone",
            Self::Tokenizer => "Speech Tokenizer 12Hz",
        }
    }

    /// Whether the checkpoint depends on the configured size tier.
    pub fn is_sized(&self) -> bool {
        !matches!(self, Self::Tokenizer)
    }

    pub fn is_tokenizer(&self) -> bool {
        matches!(self, Self::Tokenizer)
    }

    /// Hugging Face repository holding the weights for this variant at `size`.
    pub fn repo_id(&self, size: ModelSize) -> &'static str {
        match (self, size) {
            (Self::CustomVoice, ModelSize::Small) => "Qwen/Qwen3-TTS-12Hz-0.6B-CustomVoice",
            (Self::CustomVoice, ModelSize::Large) => "Qwen/Qwen3-TTS-12Hz-1.7B-CustomVoice",
            (Self::VoiceDesign, ModelSize::Small) => "Qwen/Qwen3-TTS-12Hz-0.6B-VoiceDesign",
            (Self::VoiceDesign, ModelSize::Large) => "Qwen/Qwen3-TTS-12Hz-1.7B-VoiceDesign",
            (Self::VoiceClone, ModelSize::Small) => "Qwen/Qwen3-TTS-12Hz-0.6B-Base",
            (Self::VoiceClone, ModelSize::Large) => "Qwen/Qwen3-TTS-12Hz-1.7B-Base",
            (Self::Tokenizer, _) => TOKENIZER_REPO,
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_model_variant(s)
    }
}

pub fn parse_model_variant(input: &str) -> Result<ModelVariant, Error> {
    let normalized = normalize_identifier(input);
    if normalized.is_empty() {
        return Err(Error::UnknownVariant("<empty>".to_string()));
    }

    let found = match normalized.as_str() {
        "customvoice" | "custom" => Some(ModelVariant::CustomVoice),
        "voicedesign" | "design" => Some(ModelVariant::VoiceDesign),
        "voiceclone" | "clone" | "base" => Some(ModelVariant::VoiceClone),
        "tokenizer" | "speechtokenizer" => Some(ModelVariant::Tokenizer),
        _ => resolve_by_repo_id(&normalized),
    };

    found.ok_or_else(|| Error::UnknownVariant(input.trim().to_string()))
}

fn resolve_by_repo_id(normalized: &str) -> Option<ModelVariant> {
    ModelSize::all().iter().find_map(|size| {
        ModelVariant::all()
            .iter()
            .copied()
            .find(|variant| normalize_identifier(variant.repo_id(*size)) == normalized)
    })
}

fn normalize_identifier(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '/' || *c == '.')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
