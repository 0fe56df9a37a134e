use std::time::Instant;
use tracing::{debug, info};

use crate::audio::{self, AudioEncoder, AudioFormat};
use crate::catalog::ModelVariant;
use crate::error::{Error, Result};
use crate::registry::{GeneratedAudio, GenerationMode, GenerationParams, ModelRegistry};

use super::request::{SynthesisRequest, ValidationLimits};

/// Factors this close to 1.0 skip post-processing.
const UNITY_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub variant: ModelVariant,
    pub generation_time_ms: f64,
}

impl SynthesisOutput {
    pub fn duration_secs(&self) -> f32 {
        audio::duration_secs(self.samples.len(), self.sample_rate)
    }

    /// Real-time factor: generation time over audio duration.
    pub fn rtf(&self) -> f64 {
        let duration = self.duration_secs() as f64;
        if duration > 0.0 {
            self.generation_time_ms / 1000.0 / duration
        } else {
            0.0
        }
    }

    pub fn encode(&self, format: AudioFormat) -> Result<Vec<u8>> {
        AudioEncoder::new(self.sample_rate, 1).encode(&self.samples, format)
    }
}

/// Post-processing applied after generation.
#[derive(Debug, Clone, Copy)]
struct PostProcess {
    /// Applied by time-stretching when the model has no native speed control.
    speed: Option<f32>,
    pitch: f32,
    normalize_target_db: Option<f32>,
}

impl PostProcess {
    fn apply(&self, audio: GeneratedAudio) -> Result<GeneratedAudio> {
        let GeneratedAudio {
            mut samples,
            sample_rate,
        } = audio;

        if let Some(speed) = self.speed.filter(|s| (s - 1.0).abs() >= UNITY_EPSILON) {
            samples = audio::time_stretch(&samples, sample_rate, speed);
        }
        if (self.pitch - 1.0).abs() >= UNITY_EPSILON {
            samples = audio::pitch_shift(&samples, sample_rate, self.pitch)?;
        }
        if let Some(target_db) = self.normalize_target_db {
            samples = audio::normalize(&samples, target_db);
        }

        Ok(GeneratedAudio {
            samples,
            sample_rate,
        })
    }
}

/// Validates requests, obtains the right model and runs generation.
#[derive(Clone)]
pub struct Synthesizer {
    registry: ModelRegistry,
    limits: ValidationLimits,
    normalize_target_db: Option<f32>,
}

impl Synthesizer {
    pub fn new(
        registry: ModelRegistry,
        limits: ValidationLimits,
        normalize_target_db: Option<f32>,
    ) -> Self {
        Self {
            registry,
            limits,
            normalize_target_db,
        }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisOutput> {
        request.validate(&self.limits)?;

        let variant = request.variant();
        info!(
            "Synthesizing {} characters with {} model",
            request.text().trim().chars().count(),
            variant
        );

        let model = self.registry.get_or_load(variant).await?;
        let native_speed = model.supports_native_speed();
        let post = PostProcess {
            speed: (!native_speed).then(|| request.speed()),
            pitch: request.pitch(),
            normalize_target_db: self.normalize_target_db,
        };
        let params = generation_params(request, native_speed);

        let started = Instant::now();
        let audio = tokio::task::spawn_blocking(move || {
            let generated = model.generate(&params).map_err(|e| match e {
                err @ Error::Synthesis { .. } => err,
                other => Error::synthesis(variant, other),
            })?;
            if generated.samples.is_empty() {
                return Err(Error::synthesis(variant, "model produced no audio"));
            }
            post.apply(generated)
        })
        .await
        .map_err(|e| Error::synthesis(variant, e))??;
        let generation_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let output = SynthesisOutput {
            samples: audio.samples,
            sample_rate: audio.sample_rate,
            variant,
            generation_time_ms,
        };
        debug!(
            "Generated {:.2}s of audio in {:.0} ms (RTF {:.2})",
            output.duration_secs(),
            generation_time_ms,
            output.rtf()
        );
        Ok(output)
    }
}

fn generation_params(request: SynthesisRequest, native_speed: bool) -> GenerationParams {
    let language = request.canonical_language().to_string();
    let speed = native_speed.then(|| request.speed());

    let (text, mode) = match request {
        SynthesisRequest::CustomVoice {
            text,
            voice,
            instruction,
            ..
        } => (
            text,
            GenerationMode::CustomVoice {
                speaker: voice,
                instruct: instruction.filter(|i| !i.trim().is_empty()),
            },
        ),
        SynthesisRequest::VoiceDesign {
            text,
            voice_description,
            ..
        } => (
            text,
            GenerationMode::VoiceDesign {
                instruct: voice_description,
            },
        ),
        SynthesisRequest::VoiceClone {
            text,
            reference,
            reference_text,
            x_vector_only,
            ..
        } => (
            text,
            GenerationMode::VoiceClone {
                reference_samples: reference.samples,
                reference_sample_rate: reference.sample_rate,
                reference_text,
                x_vector_only,
            },
        ),
    };

    GenerationParams {
        text: text.trim().to_string(),
        language,
        mode,
        speed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelSize;
    use crate::device::DeviceProfile;
    use crate::synthesis::ReferenceAudio;
    use crate::testing::{FakeLoader, FakeModel};
    use std::sync::Arc;

    fn synthesizer(loader: Arc<FakeLoader>) -> (Synthesizer, ModelRegistry) {
        let registry =
            ModelRegistry::new(loader, Arc::new(DeviceProfile::cpu()), ModelSize::Large);
        (
            Synthesizer::new(registry.clone(), ValidationLimits::default(), None),
            registry,
        )
    }

    fn custom(text: &str, speed: f32, pitch: f32) -> SynthesisRequest {
        SynthesisRequest::CustomVoice {
            text: text.to_string(),
            language: "English".to_string(),
            voice: "Vivian".to_string(),
            instruction: None,
            speed,
            pitch,
        }
    }

    fn design(speed: f32) -> SynthesisRequest {
        SynthesisRequest::VoiceDesign {
            text: "Hello".to_string(),
            language: "Auto".to_string(),
            voice_description: "A warm, low storyteller voice".to_string(),
            speed,
            pitch: 1.0,
        }
    }

    #[tokio::test]
    async fn test_custom_voice_uses_configured_tier() {
        let loader = Arc::new(FakeLoader::new());
        let (synth, _) = synthesizer(loader.clone());

        let output = synth.synthesize(custom("Hello", 1.0, 1.0)).await.unwrap();

        assert_eq!(output.variant, ModelVariant::CustomVoice);
        assert_eq!(output.sample_rate, FakeModel::SAMPLE_RATE);
        assert!(!output.samples.is_empty());
        assert_eq!(
            loader.specs()[0].resource_id,
            "Qwen/Qwen3-TTS-12Hz-1.7B-CustomVoice"
        );
    }

    #[tokio::test]
    async fn test_invalid_requests_never_load() {
        let loader = Arc::new(FakeLoader::new());
        let (synth, _) = synthesizer(loader.clone());

        let too_long = synth.synthesize(custom(&"a".repeat(1001), 1.0, 1.0)).await;
        assert!(matches!(too_long, Err(Error::InvalidRequest(_))));

        let no_transcript = synth
            .synthesize(SynthesisRequest::VoiceClone {
                text: "Hello".into(),
                language: "English".into(),
                reference: ReferenceAudio {
                    samples: vec![0.1; 48_000],
                    sample_rate: 16_000,
                },
                reference_text: String::new(),
                x_vector_only: false,
                speed: 1.0,
                pitch: 1.0,
            })
            .await;
        assert!(matches!(no_transcript, Err(Error::InvalidRequest(_))));

        assert_eq!(loader.load_count(), 0);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_cached_model() {
        let loader = Arc::new(FakeLoader::new());
        let (synth, registry) = synthesizer(loader.clone());

        loader.set_models_failing(true);
        let err = synth.synthesize(design(1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Synthesis {
                variant: ModelVariant::VoiceDesign,
                ..
            }
        ));
        assert!(registry.is_loaded(ModelVariant::VoiceDesign).await);

        loader.set_models_failing(false);
        synth.synthesize(design(1.0)).await.unwrap();
        assert_eq!(loader.load_count(), 1);
        assert_eq!(loader.generation_count(), 2);
    }

    #[tokio::test]
    async fn test_speed_is_native_or_stretched() {
        let loader = Arc::new(FakeLoader::new());
        let (synth, _) = synthesizer(loader);

        // Custom voice handles speed itself; the fake shortens its output.
        let native = synth.synthesize(custom("Hello", 2.0, 1.0)).await.unwrap();
        assert_eq!(native.samples.len(), FakeModel::OUTPUT_LEN / 2);

        // Voice design gets time-stretched afterwards.
        let stretched = synth.synthesize(design(2.0)).await.unwrap();
        assert_eq!(stretched.samples.len(), FakeModel::OUTPUT_LEN / 2);
    }

    #[tokio::test]
    async fn test_pitch_keeps_duration() {
        let loader = Arc::new(FakeLoader::new());
        let (synth, _) = synthesizer(loader);

        let output = synth.synthesize(custom("Hello", 1.0, 1.5)).await.unwrap();
        assert_eq!(output.samples.len(), FakeModel::OUTPUT_LEN);
        assert!(output.rtf() >= 0.0);
    }

    #[tokio::test]
    async fn test_load_failure_surfaces_as_model_load() {
        let loader = Arc::new(FakeLoader::new());
        loader.set_failing(true);
        let (synth, registry) = synthesizer(loader);

        let err = synth.synthesize(design(1.0)).await.unwrap_err();
        assert!(matches!(err, Error::ModelLoad { .. }));
        assert!(registry.entries().await.is_empty());
    }
}
