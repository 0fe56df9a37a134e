//! Model catalog: variants, size tiers, resource identifiers, voices and languages.

mod variant;
mod voices;

pub use variant::{parse_model_variant, ModelSize, ModelVariant};
pub use voices::{
    canonical_language, find_voice, VoiceProfile, AUTO_LANGUAGE, SUPPORTED_LANGUAGES, VOICES,
};
