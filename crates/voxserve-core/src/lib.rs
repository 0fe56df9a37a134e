//! Voxserve Core - model lifecycle and synthesis dispatch for Qwen3-TTS
//!
//! The neural network runs in a Python worker process; this crate owns
//! everything around it:
//! - one-time compute device selection
//! - lazy, deduplicated checkpoint loading with an explicit cache
//! - request validation and dispatch to the right checkpoint
//! - audio post-processing and encoding
//!
//! # Example
//!
//! ```ignore
//! use voxserve_core::{EngineConfig, SynthesisRequest, TtsService};
//!
//! let service = TtsService::new(EngineConfig::default());
//! let output = service
//!     .synthesize(SynthesisRequest::CustomVoice {
//!         text: "Hello".into(),
//!         language: "English".into(),
//!         voice: "Vivian".into(),
//!         instruction: None,
//!         speed: 1.0,
//!         pitch: 1.0,
//!     })
//!     .await?;
//! ```

pub mod audio;
pub mod catalog;
pub mod config;
pub mod device;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod synthesis;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;

pub use audio::{AudioEncoder, AudioFormat, AudioMetadata};
pub use catalog::{parse_model_variant, ModelSize, ModelVariant, VoiceProfile};
pub use config::{EngineConfig, ServerConfig};
pub use device::{ComputeDtype, DeviceKind, DeviceProfile, DeviceSelector};
pub use error::{Error, Result};
pub use registry::{ModelHandle, ModelLoader, ModelRegistry, RegistryEntry, SpeechModel};
pub use runtime::{HealthReport, ModelInfoReport, TtsService};
pub use synthesis::{ReferenceAudio, SynthesisOutput, SynthesisRequest, Synthesizer};
