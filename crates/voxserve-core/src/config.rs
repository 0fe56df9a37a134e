//! Configuration types for the voxserve engine and HTTP server.
//!
//! Every field has a default that can be overridden through an environment
//! variable. Values are read once at startup; changing them needs a restart.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

use crate::catalog::ModelSize;

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hugging Face cache directory used for downloaded checkpoints
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Size tier used for every size-dependent model variant
    #[serde(default = "default_model_size")]
    pub model_size: ModelSize,

    /// Device preference: "auto", "cuda" or "cpu"
    #[serde(default = "default_device")]
    pub device: String,

    /// Accelerator ordinal probed when looking for a GPU
    #[serde(default = "default_cuda_device_index")]
    pub cuda_device_index: usize,

    /// Python interpreter that runs the inference worker
    #[serde(default = "default_python_cmd")]
    pub python_cmd: String,

    /// Path of the inference worker script
    #[serde(default = "default_worker_script")]
    pub worker_script: PathBuf,

    /// Load the tokenizer and custom-voice model in the background at startup
    #[serde(default = "default_preload_on_startup")]
    pub preload_on_startup: bool,

    /// Maximum number of characters accepted for synthesis text
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// Shortest accepted voice-clone reference clip (seconds)
    #[serde(default = "default_min_reference_secs")]
    pub min_reference_secs: f32,

    /// Longest accepted voice-clone reference clip (seconds)
    #[serde(default = "default_max_reference_secs")]
    pub max_reference_secs: f32,

    /// RMS loudness target for generated audio; `None` leaves output untouched
    #[serde(default = "default_normalize_target_db")]
    pub normalize_target_db: Option<f32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            model_size: default_model_size(),
            device: default_device(),
            cuda_device_index: default_cuda_device_index(),
            python_cmd: default_python_cmd(),
            worker_script: default_worker_script(),
            preload_on_startup: default_preload_on_startup(),
            max_text_chars: default_max_text_chars(),
            min_reference_secs: default_min_reference_secs(),
            max_reference_secs: default_max_reference_secs(),
            normalize_target_db: default_normalize_target_db(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {}='{}', using default", key, raw);
            None
        }
    }
}

fn default_models_dir() -> PathBuf {
    if let Some(from_env) = env_string("VOXSERVE_MODELS_DIR") {
        return PathBuf::from(from_env);
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxserve")
        .join("models")
}

fn default_model_size() -> ModelSize {
    env_string("VOXSERVE_MODEL_SIZE")
        .or_else(|| env_string("MODEL_SIZE"))
        .and_then(|raw| match raw.parse::<ModelSize>() {
            Ok(size) => Some(size),
            Err(err) => {
                warn!("{}, using default", err);
                None
            }
        })
        .unwrap_or_default()
}

fn default_device() -> String {
    env_string("VOXSERVE_DEVICE").unwrap_or_else(|| "auto".to_string())
}

fn default_cuda_device_index() -> usize {
    env_parse("VOXSERVE_CUDA_INDEX").unwrap_or(0)
}

fn default_python_cmd() -> String {
    env_string("VOXSERVE_PYTHON").unwrap_or_else(|| "python3".to_string())
}

fn default_worker_script() -> PathBuf {
    env_string("VOXSERVE_WORKER_SCRIPT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("scripts/qwen_tts_worker.py"))
}

fn default_preload_on_startup() -> bool {
    env_parse("VOXSERVE_PRELOAD").unwrap_or(true)
}

fn default_max_text_chars() -> usize {
    1000
}

fn default_min_reference_secs() -> f32 {
    1.0
}

fn default_max_reference_secs() -> f32 {
    60.0
}

fn default_normalize_target_db() -> Option<f32> {
    Some(-20.0)
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory with the static browser UI
    #[serde(default = "default_ui_dir")]
    pub ui_dir: PathBuf,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Per-request synthesis timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ui_dir: default_ui_dir(),
            max_concurrent_requests: default_max_concurrent_requests(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    env_string("VOXSERVE_HOST").unwrap_or_else(|| "0.0.0.0".to_string())
}

fn default_port() -> u16 {
    env_parse("VOXSERVE_PORT").unwrap_or(8000)
}

fn default_ui_dir() -> PathBuf {
    env_string("VOXSERVE_UI_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("ui/dist"))
}

fn default_max_concurrent_requests() -> usize {
    env_parse("MAX_CONCURRENT_REQUESTS").unwrap_or(16)
}

fn default_request_timeout_secs() -> u64 {
    // CPU inference of long texts can take minutes.
    env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(600)
}
