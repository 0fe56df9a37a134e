//! Pre-built speaker voices and supported languages.

use serde::Serialize;

/// A speaker shipped with the custom-voice checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VoiceProfile {
    pub id: &'static str,
    pub description: &'static str,
    pub native_language: &'static str,
}

pub const VOICES: &[VoiceProfile] = &[
    VoiceProfile {
        id: "Vivian",
        description: "Bright, slightly edgy young female voice",
        native_language: "Chinese",
    },
    VoiceProfile {
        id: "Serena",
        description: "Warm, gentle young female voice",
        native_language: "Chinese",
    },
    VoiceProfile {
        id: "Uncle_Fu",
        description: "Seasoned male voice with a low, mellow timbre",
        native_language: "Chinese",
    },
    VoiceProfile {
        id: "Dylan",
        description: "Youthful Beijing male voice with a clear, natural timbre",
        native_language: "Chinese (Beijing Dialect)",
    },
    VoiceProfile {
        id: "Eric",
        description: "Lively Chengdu male voice with a slightly husky brightness",
        native_language: "Chinese (Sichuan Dialect)",
    },
    VoiceProfile {
        id: "Ryan",
        description: "Dynamic male voice with strong rhythmic drive",
        native_language: "English",
    },
    VoiceProfile {
        id: "Aiden",
        description: "Sunny American male voice with a clear midrange",
        native_language: "English",
    },
    VoiceProfile {
        id: "Ono_Anna",
        description: "Playful Japanese female voice with a light, nimble timbre",
        native_language: "Japanese",
    },
    VoiceProfile {
        id: "Sohee",
        description: "Warm Korean female voice with rich emotion",
        native_language: "Korean",
    },
];

pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "Chinese",
    "English",
    "Japanese",
    "Korean",
    "German",
    "French",
    "Russian",
    "Portuguese",
    "Spanish",
    "Italian",
];

/// Language value that lets the model detect the language itself.
pub const AUTO_LANGUAGE: &str = "Auto";

/// Exact (case-sensitive) lookup, matching the speaker names the model expects.
pub fn find_voice(id: &str) -> Option<&'static VoiceProfile> {
    VOICES.iter().find(|voice| voice.id == id)
}

/// Resolve a language name case-insensitively to its canonical spelling.
pub fn canonical_language(input: &str) -> Option<&'static str> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case(AUTO_LANGUAGE) {
        return Some(AUTO_LANGUAGE);
    }
    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|lang| lang.eq_ignore_ascii_case(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_lookup_is_exact() {
        assert!(find_voice("Vivian").is_some());
        assert!(find_voice("vivian").is_none());
        assert_eq!(VOICES.len(), 9);
    }

    #[test]
    fn languages_resolve_case_insensitively() {
        assert_eq!(canonical_language("english"), Some("English"));
        assert_eq!(canonical_language("AUTO"), Some("Auto"));
        assert_eq!(canonical_language("Klingon"), None);
    }
}
