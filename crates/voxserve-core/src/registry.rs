//! Model registry to ensure each checkpoint is loaded once and shared across requests.
//!
//! Every variant owns a `OnceCell`. Loads run as detached tasks behind a
//! process-wide gate, so concurrent callers for one variant share a single load
//! and callers that give up do not abandon it. The gate also orders loads against
//! evictions, since every variant shares one device.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{info, warn};

use crate::catalog::{ModelSize, ModelVariant};
use crate::device::{ComputeDtype, DeviceProfile};
use crate::error::{Error, Result};

/// Mode-specific conditioning for one generation call.
#[derive(Debug, Clone)]
pub enum GenerationMode {
    CustomVoice {
        speaker: String,
        instruct: Option<String>,
    },
    VoiceDesign {
        instruct: String,
    },
    VoiceClone {
        reference_samples: Vec<f32>,
        reference_sample_rate: u32,
        reference_text: String,
        x_vector_only: bool,
    },
}

impl GenerationMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CustomVoice { .. } => "custom_voice",
            Self::VoiceDesign { .. } => "voice_design",
            Self::VoiceClone { .. } => "voice_clone",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub text: String,
    pub language: String,
    pub mode: GenerationMode,
    /// Only set when the model handles speed itself.
    pub speed: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct GeneratedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// A loaded checkpoint, ready for inference. Calls block.
pub trait SpeechModel: Send + Sync {
    fn variant(&self) -> ModelVariant;

    fn sample_rate(&self) -> u32;

    /// Whether `GenerationParams::speed` is honored natively.
    fn supports_native_speed(&self) -> bool {
        false
    }

    fn generate(&self, params: &GenerationParams) -> Result<GeneratedAudio>;
}

pub type ModelHandle = Arc<dyn SpeechModel>;

/// Everything a loader needs to place one checkpoint on the selected device.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadSpec {
    pub variant: ModelVariant,
    pub size: ModelSize,
    pub resource_id: String,
    pub device_id: String,
    pub dtype: ComputeDtype,
}

/// Fetches weights and initializes models. Calls block; the registry runs
/// them on the blocking pool.
pub trait ModelLoader: Send + Sync {
    fn load(&self, spec: &LoadSpec) -> Result<ModelHandle>;

    /// Release device memory held by an evicted entry.
    fn unload(&self, entry: &RegistryEntry) -> Result<()>;
}

#[derive(Clone, Serialize)]
pub struct RegistryEntry {
    pub variant: ModelVariant,
    pub resource_id: String,
    pub device_id: String,
    pub dtype: ComputeDtype,
    /// Unix seconds
    pub loaded_at: u64,
    pub load_duration_ms: u64,
    #[serde(skip)]
    pub model: ModelHandle,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("variant", &self.variant)
            .field("resource_id", &self.resource_id)
            .field("device_id", &self.device_id)
            .field("dtype", &self.dtype)
            .field("loaded_at", &self.loaded_at)
            .field("load_duration_ms", &self.load_duration_ms)
            .finish_non_exhaustive()
    }
}

type EntryCell = Arc<OnceCell<Arc<RegistryEntry>>>;

#[derive(Clone)]
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    device: Arc<DeviceProfile>,
    size: ModelSize,
    entries: Arc<RwLock<HashMap<ModelVariant, EntryCell>>>,
    load_gate: Arc<Mutex<()>>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>, device: Arc<DeviceProfile>, size: ModelSize) -> Self {
        Self {
            loader,
            device,
            size,
            entries: Arc::new(RwLock::new(HashMap::new())),
            load_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn device(&self) -> &DeviceProfile {
        &self.device
    }

    pub fn model_size(&self) -> ModelSize {
        self.size
    }

    pub fn load_spec(&self, variant: ModelVariant) -> LoadSpec {
        LoadSpec {
            variant,
            size: self.size,
            resource_id: variant.repo_id(self.size).to_string(),
            device_id: self.device.device_id.clone(),
            dtype: self.device.dtype,
        }
    }

    /// Return the cached model for `variant`, loading it on first use.
    pub async fn get_or_load(&self, variant: ModelVariant) -> Result<ModelHandle> {
        self.get_or_load_entry(variant)
            .await
            .map(|entry| entry.model.clone())
    }

    pub async fn get_or_load_entry(&self, variant: ModelVariant) -> Result<Arc<RegistryEntry>> {
        let cell = {
            let mut guard = self.entries.write().await;
            guard
                .entry(variant)
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        if let Some(entry) = cell.get() {
            return Ok(entry.clone());
        }

        // The load owns its task, so a caller that stops waiting leaves it running
        // and later callers pick up its result instead of starting another.
        let registry = self.clone();
        tokio::spawn(async move { registry.fill(variant, cell).await })
            .await
            .map_err(|e| Error::model_load(variant, e))?
    }

    /// Load `variant` into `cell` under the gate. The cell is filled before the
    /// gate is released, so `clear` never observes a half-finished load.
    async fn fill(&self, variant: ModelVariant, cell: EntryCell) -> Result<Arc<RegistryEntry>> {
        let _gate = self.load_gate.lock().await;

        if let Some(entry) = cell.get() {
            return Ok(entry.clone());
        }
        if !self.is_current(variant, &cell).await {
            return Err(Error::model_load(
                variant,
                "evicted or failed while the load was queued",
            ));
        }

        match self.load_entry(variant).await {
            Ok(entry) => {
                let entry = Arc::new(entry);
                if cell.set(entry.clone()).is_err() {
                    warn!("{} model cell was filled twice", variant);
                }
                Ok(entry)
            }
            Err(err) => {
                self.discard_failed(variant, &cell).await;
                Err(err)
            }
        }
    }

    async fn is_current(&self, variant: ModelVariant, cell: &EntryCell) -> bool {
        let guard = self.entries.read().await;
        guard
            .get(&variant)
            .map(|current| Arc::ptr_eq(current, cell))
            .unwrap_or(false)
    }

    async fn load_entry(&self, variant: ModelVariant) -> Result<RegistryEntry> {
        let spec = self.load_spec(variant);
        info!(
            "Loading {} model from {} on {} ({})",
            variant, spec.resource_id, spec.device_id, spec.dtype
        );

        let started = Instant::now();
        let loader = self.loader.clone();
        let task_spec = spec.clone();
        let model = tokio::task::spawn_blocking(move || loader.load(&task_spec))
            .await
            .map_err(|e| Error::model_load(variant, e))?
            .map_err(|e| match e {
                err @ Error::ModelLoad { .. } => err,
                other => Error::model_load(variant, other),
            })?;
        let load_duration_ms = started.elapsed().as_millis() as u64;

        info!("Loaded {} model in {} ms", variant, load_duration_ms);

        Ok(RegistryEntry {
            variant,
            resource_id: spec.resource_id,
            device_id: spec.device_id,
            dtype: spec.dtype,
            loaded_at: unix_now(),
            load_duration_ms,
            model,
        })
    }

    /// Drop an uninitialized cell after a failed load so nothing partial lingers.
    async fn discard_failed(&self, variant: ModelVariant, cell: &EntryCell) {
        let mut guard = self.entries.write().await;
        let stale = guard
            .get(&variant)
            .map(|current| Arc::ptr_eq(current, cell) && !current.initialized())
            .unwrap_or(false);
        if stale {
            guard.remove(&variant);
        }
    }

    /// Evict one variant, or every variant when `None`. Returns what was evicted.
    pub async fn clear(&self, variant: Option<ModelVariant>) -> Vec<ModelVariant> {
        let _gate = self.load_gate.lock().await;

        let removed: Vec<(ModelVariant, EntryCell)> = {
            let mut guard = self.entries.write().await;
            match variant {
                Some(variant) => guard
                    .remove(&variant)
                    .map(|cell| (variant, cell))
                    .into_iter()
                    .collect(),
                None => guard.drain().collect(),
            }
        };

        let mut evicted = Vec::new();
        for (variant, cell) in removed {
            let Some(entry) = cell.get().cloned() else {
                continue;
            };
            let loader = self.loader.clone();
            let unloaded = tokio::task::spawn_blocking(move || loader.unload(&entry)).await;
            match unloaded {
                Ok(Ok(())) => info!("Unloaded {} model", variant),
                Ok(Err(err)) => warn!("Unloading {} model reported an error: {}", variant, err),
                Err(err) => warn!("Unload task for {} model failed: {}", variant, err),
            }
            evicted.push(variant);
        }
        evicted
    }

    pub async fn is_loaded(&self, variant: ModelVariant) -> bool {
        let guard = self.entries.read().await;
        guard
            .get(&variant)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    pub async fn loaded_variants(&self) -> Vec<ModelVariant> {
        self.entries()
            .await
            .into_iter()
            .map(|entry| entry.variant)
            .collect()
    }

    /// Snapshots of every loaded entry, in catalog order.
    pub async fn entries(&self) -> Vec<RegistryEntry> {
        let guard = self.entries.read().await;
        ModelVariant::all()
            .iter()
            .filter_map(|variant| guard.get(variant))
            .filter_map(|cell| cell.get())
            .map(|entry| entry.as_ref().clone())
            .collect()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLoader, FakeModel};
    use std::time::Duration;

    fn registry(loader: Arc<FakeLoader>) -> ModelRegistry {
        ModelRegistry::new(loader, Arc::new(DeviceProfile::cpu()), ModelSize::Small)
    }

    #[tokio::test]
    async fn test_cached_handle_is_reused() {
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(loader.clone());

        let first = registry.get_or_load(ModelVariant::CustomVoice).await.unwrap();
        let second = registry.get_or_load(ModelVariant::CustomVoice).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_count(), 1);
        assert!(registry.is_loaded(ModelVariant::CustomVoice).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_load_once() {
        let loader = Arc::new(FakeLoader::new().with_delay(Duration::from_millis(50)));
        let registry = registry(loader.clone());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.get_or_load(ModelVariant::VoiceDesign).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn test_load_spec_follows_tier_and_device() {
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(loader.clone());

        registry.get_or_load(ModelVariant::VoiceClone).await.unwrap();

        let specs = loader.specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].resource_id, "Qwen/Qwen3-TTS-12Hz-0.6B-Base");
        assert_eq!(specs[0].device_id, "cpu");
        assert_eq!(specs[0].dtype, ComputeDtype::Float32);
    }

    #[tokio::test]
    async fn test_clear_forces_reload_and_unloads() {
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(loader.clone());

        registry.get_or_load(ModelVariant::CustomVoice).await.unwrap();
        registry.get_or_load(ModelVariant::Tokenizer).await.unwrap();

        let evicted = registry.clear(Some(ModelVariant::CustomVoice)).await;
        assert_eq!(evicted, vec![ModelVariant::CustomVoice]);
        assert_eq!(loader.unload_count(), 1);
        assert_eq!(
            registry.loaded_variants().await,
            vec![ModelVariant::Tokenizer]
        );

        registry.get_or_load(ModelVariant::CustomVoice).await.unwrap();
        assert_eq!(loader.load_count(), 3);

        let evicted = registry.clear(None).await;
        assert_eq!(evicted.len(), 2);
        assert!(registry.entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_no_entry() {
        let loader = Arc::new(FakeLoader::new());
        loader.set_failing(true);
        let registry = registry(loader.clone());

        let err = registry
            .get_or_load(ModelVariant::VoiceDesign)
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::ModelLoad {
                variant: ModelVariant::VoiceDesign,
                ..
            }
        ));
        assert!(!registry.is_loaded(ModelVariant::VoiceDesign).await);
        assert!(registry.entries().await.is_empty());

        loader.set_failing(false);
        registry.get_or_load(ModelVariant::VoiceDesign).await.unwrap();
        assert!(registry.is_loaded(ModelVariant::VoiceDesign).await);
        assert_eq!(loader.load_count(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_start_second_load() {
        let loader = Arc::new(FakeLoader::new().with_delay(Duration::from_millis(300)));
        let registry = registry(loader.clone());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            registry.get_or_load(ModelVariant::CustomVoice),
        )
        .await;
        assert!(abandoned.is_err());

        registry.get_or_load(ModelVariant::CustomVoice).await.unwrap();
        assert_eq!(loader.load_count(), 1);
        assert!(registry.is_loaded(ModelVariant::CustomVoice).await);
    }

    #[tokio::test]
    async fn test_clear_wins_over_queued_load() {
        let loader = Arc::new(FakeLoader::new().with_delay(Duration::from_millis(200)));
        let registry = registry(loader.clone());

        let busy = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_load(ModelVariant::Tokenizer).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let clearing = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.clear(Some(ModelVariant::CustomVoice)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get_or_load(ModelVariant::CustomVoice).await })
        };

        busy.await.unwrap().unwrap();
        clearing.await.unwrap();
        let err = queued.await.unwrap().err().unwrap();
        assert!(matches!(
            err,
            Error::ModelLoad {
                variant: ModelVariant::CustomVoice,
                ..
            }
        ));
        assert!(!registry.is_loaded(ModelVariant::CustomVoice).await);
        assert_eq!(loader.load_count(), 1);

        registry.get_or_load(ModelVariant::CustomVoice).await.unwrap();
        assert_eq!(loader.load_count(), 2);
    }

    #[tokio::test]
    async fn test_entry_metadata_is_recorded() {
        let loader = Arc::new(FakeLoader::new());
        let registry = registry(loader);

        let entry = registry
            .get_or_load_entry(ModelVariant::Tokenizer)
            .await
            .unwrap();
        assert_eq!(entry.resource_id, "Qwen/Qwen3-TTS-Tokenizer-12Hz");
        assert!(entry.loaded_at > 0);
        assert_eq!(entry.model.variant(), ModelVariant::Tokenizer);
        assert_eq!(entry.model.sample_rate(), FakeModel::SAMPLE_RATE);
    }
}
