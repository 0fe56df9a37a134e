//! Report types returned by the runtime service.

use serde::Serialize;

use crate::catalog::ModelSize;
use crate::device::ComputeDtype;
use crate::registry::RegistryEntry;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub models_loaded: Vec<String>,
    pub device: String,
    pub cuda_available: bool,
    pub accelerator_name: Option<String>,
    /// Free accelerator memory in GB, read at request time
    pub gpu_memory_gb: Option<f64>,
    pub model_size: ModelSize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantInfo {
    pub variant: String,
    pub display_name: &'static str,
    pub resource_id: &'static str,
    pub loaded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfoReport {
    pub loaded_models: Vec<String>,
    pub model_size: ModelSize,
    pub available_sizes: Vec<ModelSize>,
    pub device: String,
    pub dtype: ComputeDtype,
    pub available_models: Vec<VariantInfo>,
    pub available_voices: Vec<&'static str>,
    pub supported_languages: Vec<&'static str>,
    pub entries: Vec<RegistryEntry>,
}
