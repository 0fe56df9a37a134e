//! Error types for the synthesis core.

use thiserror::Error;

use crate::catalog::ModelVariant;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or out-of-range request fields. Raised before any model work.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown model identifier: {0}")]
    UnknownVariant(String),

    /// Fetching or initializing a model failed. The registry holds no entry afterwards.
    #[error("Failed to load {variant} model: {reason}")]
    ModelLoad {
        variant: ModelVariant,
        reason: String,
    },

    /// Generation failed after a successful load. The cached model stays usable.
    #[error("Speech synthesis with {variant} model failed: {reason}")]
    Synthesis {
        variant: ModelVariant,
        reason: String,
    },

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn model_load(variant: ModelVariant, reason: impl ToString) -> Self {
        Self::ModelLoad {
            variant,
            reason: reason.to_string(),
        }
    }

    pub fn synthesis(variant: ModelVariant, reason: impl ToString) -> Self {
        Self::Synthesis {
            variant,
            reason: reason.to_string(),
        }
    }

    /// True for failures caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_) | Self::UnknownVariant(_))
    }
}
