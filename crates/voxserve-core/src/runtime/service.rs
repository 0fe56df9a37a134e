//! Runtime service orchestrator.

use std::sync::Arc;

use tracing::{info, warn};

use crate::catalog::{ModelSize, ModelVariant, VoiceProfile, SUPPORTED_LANGUAGES, VOICES};
use crate::config::EngineConfig;
use crate::device::{DeviceProfile, DeviceSelector};
use crate::error::Result;
use crate::registry::{ModelLoader, ModelRegistry, RegistryEntry};
use crate::synthesis::{SynthesisOutput, SynthesisRequest, Synthesizer, ValidationLimits};
use crate::worker::{WorkerBridge, WorkerLoader};

use super::types::{HealthReport, ModelInfoReport, VariantInfo};

/// Loaded ahead of the first request when preloading is enabled.
const PRELOAD_ORDER: [ModelVariant; 2] = [ModelVariant::Tokenizer, ModelVariant::CustomVoice];

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Long-lived service context shared by every request.
pub struct TtsService {
    config: EngineConfig,
    device: Arc<DeviceProfile>,
    registry: ModelRegistry,
    synthesizer: Synthesizer,
    bridge: Option<Arc<WorkerBridge>>,
}

impl TtsService {
    /// Select the device and wire the worker-backed loader.
    pub fn new(config: EngineConfig) -> Self {
        let device = DeviceSelector::from_config(&config).select();
        let loader = WorkerLoader::from_config(&config);
        let bridge = loader.bridge();
        let mut service = Self::with_loader(config, device, Arc::new(loader));
        service.bridge = Some(bridge);
        service
    }

    pub fn with_loader(
        config: EngineConfig,
        device: DeviceProfile,
        loader: Arc<dyn ModelLoader>,
    ) -> Self {
        let device = Arc::new(device);
        let registry = ModelRegistry::new(loader, device.clone(), config.model_size);
        let synthesizer = Synthesizer::new(
            registry.clone(),
            ValidationLimits::from_config(&config),
            config.normalize_target_db,
        );

        info!(
            "Voice service ready: {} tier on {}",
            config.model_size,
            device.summary()
        );

        Self {
            config,
            device,
            registry,
            synthesizer,
            bridge: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn model_size(&self) -> ModelSize {
        self.registry.model_size()
    }

    pub async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesisOutput> {
        self.synthesizer.synthesize(request).await
    }

    pub fn voices(&self) -> &'static [VoiceProfile] {
        VOICES
    }

    pub fn languages(&self) -> &'static [&'static str] {
        SUPPORTED_LANGUAGES
    }

    pub async fn health(&self) -> HealthReport {
        let gpu_memory_gb = if self.device.is_accelerator() {
            let device = self.device.clone();
            tokio::task::spawn_blocking(move || device.refresh_free_memory())
                .await
                .ok()
                .flatten()
                .map(|bytes| ((bytes as f64 / BYTES_PER_GB) * 100.0).round() / 100.0)
        } else {
            None
        };

        HealthReport {
            status: "healthy",
            models_loaded: self.loaded_keys().await,
            device: self.device.device_id.clone(),
            cuda_available: self.device.is_accelerator(),
            accelerator_name: self.device.accelerator_name.clone(),
            gpu_memory_gb,
            model_size: self.model_size(),
        }
    }

    pub async fn model_info(&self) -> ModelInfoReport {
        let entries = self.registry.entries().await;
        let size = self.model_size();

        let available_models = ModelVariant::all()
            .iter()
            .map(|variant| VariantInfo {
                variant: variant.key().to_string(),
                display_name: variant.display_name(),
                resource_id: variant.repo_id(size),
                loaded: entries.iter().any(|entry| entry.variant == *variant),
            })
            .collect();

        ModelInfoReport {
            loaded_models: entries.iter().map(|e| e.variant.key().to_string()).collect(),
            model_size: size,
            available_sizes: ModelSize::all().to_vec(),
            device: self.device.device_id.clone(),
            dtype: self.device.dtype,
            available_models,
            available_voices: VOICES.iter().map(|voice| voice.id).collect(),
            supported_languages: SUPPORTED_LANGUAGES.to_vec(),
            entries,
        }
    }

    /// Load `variant` now, without synthesizing anything.
    pub async fn load_variant(&self, variant: ModelVariant) -> Result<RegistryEntry> {
        let entry = self.registry.get_or_load_entry(variant).await?;
        Ok(entry.as_ref().clone())
    }

    /// Returns whether anything was evicted.
    pub async fn unload_variant(&self, variant: ModelVariant) -> bool {
        !self.registry.clear(Some(variant)).await.is_empty()
    }

    /// Warm the tokenizer and custom-voice model. Failures are logged and skipped.
    pub async fn preload(&self) {
        for variant in PRELOAD_ORDER {
            match self.registry.get_or_load(variant).await {
                Ok(_) => info!("Preloaded {} model", variant),
                Err(err) => warn!("Background preload of {} skipped: {}", variant, err),
            }
        }
    }

    /// Evict every model and stop the worker.
    pub async fn shutdown(&self) {
        let evicted = self.registry.clear(None).await;
        info!("Cleared model cache ({} entries)", evicted.len());

        if let Some(bridge) = self.bridge.clone() {
            if let Err(err) = tokio::task::spawn_blocking(move || bridge.shutdown()).await {
                warn!("Worker shutdown task failed: {}", err);
            }
        }
    }

    async fn loaded_keys(&self) -> Vec<String> {
        self.registry
            .loaded_variants()
            .await
            .into_iter()
            .map(|variant| variant.key().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLoader;

    fn service(loader: Arc<FakeLoader>) -> TtsService {
        let config = EngineConfig {
            model_size: ModelSize::Small,
            ..EngineConfig::default()
        };
        TtsService::with_loader(config, DeviceProfile::cpu(), loader)
    }

    #[tokio::test]
    async fn test_preload_loads_tokenizer_then_custom_voice() {
        let loader = Arc::new(FakeLoader::new());
        let service = service(loader.clone());

        service.preload().await;

        let specs = loader.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].variant, ModelVariant::Tokenizer);
        assert_eq!(specs[1].variant, ModelVariant::CustomVoice);
        assert_eq!(
            service.health().await.models_loaded,
            vec!["custom_voice", "tokenizer"]
        );
    }

    #[tokio::test]
    async fn test_preload_failure_is_not_fatal() {
        let loader = Arc::new(FakeLoader::new());
        loader.set_failing(true);
        let service = service(loader.clone());

        service.preload().await;

        assert_eq!(loader.load_count(), 2);
        assert!(service.health().await.models_loaded.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_cpu_device() {
        let service = service(Arc::new(FakeLoader::new()));
        let health = service.health().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.device, "cpu");
        assert!(!health.cuda_available);
        assert!(health.gpu_memory_gb.is_none());
        assert_eq!(health.model_size, ModelSize::Small);
    }

    #[tokio::test]
    async fn test_model_info_tracks_loads_and_unloads() {
        let loader = Arc::new(FakeLoader::new());
        let service = service(loader.clone());

        let entry = service.load_variant(ModelVariant::VoiceClone).await.unwrap();
        assert_eq!(entry.resource_id, "Qwen/Qwen3-TTS-12Hz-0.6B-Base");

        let info = service.model_info().await;
        assert_eq!(info.loaded_models, vec!["voice_clone"]);
        assert_eq!(info.available_models.len(), 4);
        assert_eq!(info.available_voices.len(), 9);
        assert_eq!(info.supported_languages.len(), 10);

        assert!(service.unload_variant(ModelVariant::VoiceClone).await);
        assert!(!service.unload_variant(ModelVariant::VoiceClone).await);
        assert_eq!(loader.unload_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let loader = Arc::new(FakeLoader::new());
        let service = service(loader.clone());
        service.preload().await;

        service.shutdown().await;

        assert!(service.registry().entries().await.is_empty());
        assert_eq!(loader.unload_count(), 2);
    }
}
