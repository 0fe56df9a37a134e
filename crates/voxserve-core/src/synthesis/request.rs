//! Synthesis requests and their validation.

use crate::audio::duration_secs;
use crate::catalog::{canonical_language, find_voice, ModelVariant, AUTO_LANGUAGE};
use crate::config::EngineConfig;
use crate::error::{Error, Result};

pub const MIN_FACTOR: f32 = 0.5;
pub const MAX_FACTOR: f32 = 2.0;
pub const MAX_INSTRUCTION_CHARS: usize = 500;
pub const MIN_DESCRIPTION_CHARS: usize = 10;
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Decoded mono reference clip for voice cloning.
#[derive(Debug, Clone)]
pub struct ReferenceAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl ReferenceAudio {
    pub fn duration_secs(&self) -> f32 {
        duration_secs(self.samples.len(), self.sample_rate)
    }
}

#[derive(Debug, Clone)]
pub enum SynthesisRequest {
    CustomVoice {
        text: String,
        language: String,
        voice: String,
        instruction: Option<String>,
        speed: f32,
        pitch: f32,
    },
    VoiceDesign {
        text: String,
        language: String,
        voice_description: String,
        speed: f32,
        pitch: f32,
    },
    VoiceClone {
        text: String,
        language: String,
        reference: ReferenceAudio,
        reference_text: String,
        x_vector_only: bool,
        speed: f32,
        pitch: f32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationLimits {
    pub max_text_chars: usize,
    pub min_reference_secs: f32,
    pub max_reference_secs: f32,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_text_chars: 1000,
            min_reference_secs: 1.0,
            max_reference_secs: 60.0,
        }
    }
}

impl ValidationLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_text_chars: config.max_text_chars,
            min_reference_secs: config.min_reference_secs,
            max_reference_secs: config.max_reference_secs,
        }
    }
}

impl SynthesisRequest {
    pub fn variant(&self) -> ModelVariant {
        match self {
            Self::CustomVoice { .. } => ModelVariant::CustomVoice,
            Self::VoiceDesign { .. } => ModelVariant::VoiceDesign,
            Self::VoiceClone { .. } => ModelVariant::VoiceClone,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::CustomVoice { text, .. }
            | Self::VoiceDesign { text, .. }
            | Self::VoiceClone { text, .. } => text,
        }
    }

    pub fn language(&self) -> &str {
        match self {
            Self::CustomVoice { language, .. }
            | Self::VoiceDesign { language, .. }
            | Self::VoiceClone { language, .. } => language,
        }
    }

    /// Canonical spelling of the requested language, `Auto` if unknown.
    pub fn canonical_language(&self) -> &'static str {
        canonical_language(self.language()).unwrap_or(AUTO_LANGUAGE)
    }

    pub fn speed(&self) -> f32 {
        match self {
            Self::CustomVoice { speed, .. }
            | Self::VoiceDesign { speed, .. }
            | Self::VoiceClone { speed, .. } => *speed,
        }
    }

    pub fn pitch(&self) -> f32 {
        match self {
            Self::CustomVoice { pitch, .. }
            | Self::VoiceDesign { pitch, .. }
            | Self::VoiceClone { pitch, .. } => *pitch,
        }
    }

    /// Check every field; nothing here touches a model.
    pub fn validate(&self, limits: &ValidationLimits) -> Result<()> {
        let text = self.text().trim();
        if text.is_empty() {
            return Err(invalid("text must not be empty"));
        }
        let chars = text.chars().count();
        if chars > limits.max_text_chars {
            return Err(invalid(format!(
                "text is {} characters long, the maximum is {}",
                chars, limits.max_text_chars
            )));
        }

        if canonical_language(self.language()).is_none() {
            return Err(invalid(format!(
                "Unsupported language '{}'",
                self.language().trim()
            )));
        }

        check_factor("speed", self.speed())?;
        check_factor("pitch", self.pitch())?;

        match self {
            Self::CustomVoice {
                voice, instruction, ..
            } => {
                if find_voice(voice).is_none() {
                    return Err(invalid(format!("Invalid voice: {voice}")));
                }
                if let Some(instruction) = instruction {
                    if instruction.chars().count() > MAX_INSTRUCTION_CHARS {
                        return Err(invalid(format!(
                            "instruction must be at most {MAX_INSTRUCTION_CHARS} characters"
                        )));
                    }
                }
            }
            Self::VoiceDesign {
                voice_description, ..
            } => {
                let len = voice_description.trim().chars().count();
                if !(MIN_DESCRIPTION_CHARS..=MAX_DESCRIPTION_CHARS).contains(&len) {
                    return Err(invalid(format!(
                        "voice_description must be {MIN_DESCRIPTION_CHARS}-{MAX_DESCRIPTION_CHARS} characters, got {len}"
                    )));
                }
            }
            Self::VoiceClone {
                reference,
                reference_text,
                ..
            } => {
                if reference_text.trim().is_empty() {
                    return Err(invalid("reference_text must not be empty"));
                }
                if reference.samples.is_empty() || reference.sample_rate == 0 {
                    return Err(invalid("reference audio is empty"));
                }
                let secs = reference.duration_secs();
                if secs < limits.min_reference_secs {
                    return Err(invalid(format!(
                        "Reference audio too short ({secs:.2}s). Minimum {:.0} second required (3+ seconds recommended)",
                        limits.min_reference_secs
                    )));
                }
                if secs > limits.max_reference_secs {
                    return Err(invalid(format!(
                        "Reference audio too long ({secs:.1}s). Maximum is {:.0} seconds",
                        limits.max_reference_secs
                    )));
                }
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidRequest(message.into())
}

fn check_factor(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(MIN_FACTOR..=MAX_FACTOR).contains(&value) {
        return Err(invalid(format!(
            "{name} must be between {MIN_FACTOR} and {MAX_FACTOR}, got {value}"
        )));
    }
    Ok(())
}
