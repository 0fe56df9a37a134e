//! Compute device selection.
//!
//! The profile is chosen once at startup and shared read-only by every model
//! load. Probing never fails: probe errors and panics count as "no accelerator".

use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::process::Command;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

impl DeviceKind {
    pub fn is_cpu(&self) -> bool {
        matches!(self, DeviceKind::Cpu)
    }

    pub fn is_cuda(&self) -> bool {
        matches!(self, DeviceKind::Cuda)
    }
}

/// Numeric precision the model weights are placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDtype {
    BFloat16,
    Float32,
}

impl ComputeDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BFloat16 => "bfloat16",
            Self::Float32 => "float32",
        }
    }
}

impl fmt::Display for ComputeDtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(Error::Config(format!(
                "unknown device preference '{other}' (expected auto, cpu or cuda)"
            ))),
        }
    }
}

/// What a probe learned about an accelerator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceleratorInfo {
    pub name: Option<String>,
    pub free_memory_bytes: Option<u64>,
}

/// One way of asking the host whether an accelerator exists at `index`.
pub trait AcceleratorProbe: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means "no accelerator", errors are treated the same way.
    fn probe(&self, index: usize) -> Result<Option<AcceleratorInfo>>;
}

/// Asks candle for a CUDA device. Only finds one when built with `cuda`.
pub struct CandleProbe;

impl AcceleratorProbe for CandleProbe {
    fn name(&self) -> &'static str {
        "candle"
    }

    fn probe(&self, index: usize) -> Result<Option<AcceleratorInfo>> {
        let device = candle_core::Device::cuda_if_available(index)
            .map_err(|e| Error::Config(format!("candle CUDA probe failed: {e}")))?;
        if device.is_cuda() {
            Ok(Some(AcceleratorInfo::default()))
        } else {
            Ok(None)
        }
    }
}

/// Queries `nvidia-smi` for the device name and free memory.
pub struct NvidiaSmiProbe;

impl AcceleratorProbe for NvidiaSmiProbe {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    fn probe(&self, index: usize) -> Result<Option<AcceleratorInfo>> {
        query_nvidia_smi(index)
    }
}

fn query_nvidia_smi(index: usize) -> Result<Option<AcceleratorInfo>> {
    let output = match Command::new("nvidia-smi")
        .args([
            "--query-gpu=name,memory.free",
            "--format=csv,noheader,nounits",
            "-i",
            &index.to_string(),
        ])
        .output()
    {
        Ok(output) => output,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    if !output.status.success() {
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().and_then(parse_nvidia_smi_line))
}

/// Parses `"<name>, <free MiB>"`.
fn parse_nvidia_smi_line(line: &str) -> Option<AcceleratorInfo> {
    let (name, free) = line.trim().rsplit_once(',')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let free_memory_bytes = free
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|mib| mib.checked_mul(1024 * 1024));
    Some(AcceleratorInfo {
        name: Some(name.to_string()),
        free_memory_bytes,
    })
}

/// The compute target chosen at startup.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    /// `cuda:<index>` or `cpu`
    pub device_id: String,
    pub dtype: ComputeDtype,
    /// Free accelerator memory at selection time
    pub free_memory_bytes: Option<u64>,
    pub accelerator_name: Option<String>,
}

impl DeviceProfile {
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            device_id: "cpu".to_string(),
            dtype: ComputeDtype::Float32,
            free_memory_bytes: None,
            accelerator_name: None,
        }
    }

    pub fn cuda(index: usize, info: AcceleratorInfo) -> Self {
        Self {
            kind: DeviceKind::Cuda,
            device_id: format!("cuda:{index}"),
            dtype: ComputeDtype::BFloat16,
            free_memory_bytes: info.free_memory_bytes,
            accelerator_name: info.name,
        }
    }

    pub fn is_accelerator(&self) -> bool {
        self.kind.is_cuda()
    }

    fn cuda_index(&self) -> Option<usize> {
        self.device_id.strip_prefix("cuda:")?.parse().ok()
    }

    /// Fresh free-memory reading. Does not touch the stored profile.
    pub fn refresh_free_memory(&self) -> Option<u64> {
        let index = self.cuda_index()?;
        match query_nvidia_smi(index) {
            Ok(info) => info
                .and_then(|info| info.free_memory_bytes)
                .or(self.free_memory_bytes),
            Err(err) => {
                debug!("Free memory query failed: {}", err);
                self.free_memory_bytes
            }
        }
    }

    pub fn summary(&self) -> String {
        match &self.accelerator_name {
            Some(name) => format!("{} ({}, {})", self.device_id, name, self.dtype),
            None => format!("{} ({})", self.device_id, self.dtype),
        }
    }
}

pub struct DeviceSelector {
    preference: DevicePreference,
    index: usize,
    probes: Vec<Box<dyn AcceleratorProbe>>,
}

impl DeviceSelector {
    pub fn new(preference: DevicePreference, index: usize) -> Self {
        Self::with_probes(
            preference,
            index,
            vec![Box::new(CandleProbe), Box::new(NvidiaSmiProbe)],
        )
    }

    pub fn with_probes(
        preference: DevicePreference,
        index: usize,
        probes: Vec<Box<dyn AcceleratorProbe>>,
    ) -> Self {
        Self {
            preference,
            index,
            probes,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let preference = config.device.parse().unwrap_or_else(|err| {
            warn!("{}, falling back to auto", err);
            DevicePreference::Auto
        });
        Self::new(preference, config.cuda_device_index)
    }

    pub fn select(&self) -> DeviceProfile {
        if self.preference == DevicePreference::Cpu {
            info!("CPU requested, skipping accelerator probes");
            return DeviceProfile::cpu();
        }

        let mut found: Option<AcceleratorInfo> = None;
        for probe in &self.probes {
            match self.run_probe(probe.as_ref()) {
                Some(info) => match found.as_mut() {
                    // Later probes only fill in what earlier ones did not know.
                    Some(current) => {
                        current.name = current.name.take().or(info.name);
                        current.free_memory_bytes =
                            current.free_memory_bytes.or(info.free_memory_bytes);
                    }
                    None => found = Some(info),
                },
                None => continue,
            }
        }

        match found {
            Some(info) => {
                let profile = DeviceProfile::cuda(self.index, info);
                info!("Using accelerator {}", profile.summary());
                profile
            }
            None => {
                if self.preference == DevicePreference::Cuda {
                    warn!(
                        "CUDA requested but no accelerator found at index {}, using CPU",
                        self.index
                    );
                } else {
                    info!("No accelerator found, falling back to CPU");
                }
                DeviceProfile::cpu()
            }
        }
    }

    fn run_probe(&self, probe: &dyn AcceleratorProbe) -> Option<AcceleratorInfo> {
        match catch_unwind(AssertUnwindSafe(|| probe.probe(self.index))) {
            Ok(Ok(info)) => {
                debug!(
                    "Probe {} reported accelerator present: {}",
                    probe.name(),
                    info.is_some()
                );
                info
            }
            Ok(Err(err)) => {
                warn!("Accelerator probe {} failed: {}", probe.name(), err);
                None
            }
            Err(_) => {
                warn!("Accelerator probe {} panicked", probe.name());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Option<AcceleratorInfo>);

    impl AcceleratorProbe for FixedProbe {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn probe(&self, _index: usize) -> Result<Option<AcceleratorInfo>> {
            Ok(self.0.clone())
        }
    }

    struct FailingProbe;

    impl AcceleratorProbe for FailingProbe {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn probe(&self, _index: usize) -> Result<Option<AcceleratorInfo>> {
            Err(Error::Config("driver mismatch".to_string()))
        }
    }

    struct PanickingProbe;

    impl AcceleratorProbe for PanickingProbe {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn probe(&self, _index: usize) -> Result<Option<AcceleratorInfo>> {
            panic!("probe exploded")
        }
    }

    fn gpu(name: &str, free: u64) -> AcceleratorInfo {
        AcceleratorInfo {
            name: Some(name.to_string()),
            free_memory_bytes: Some(free),
        }
    }

    #[test]
    fn test_cpu_preference_skips_probes() {
        let selector = DeviceSelector::with_probes(
            DevicePreference::Cpu,
            0,
            vec![Box::new(FixedProbe(Some(gpu("A100", 1))))],
        );
        let profile = selector.select();
        assert_eq!(profile, DeviceProfile::cpu());
        assert_eq!(profile.dtype, ComputeDtype::Float32);
    }

    #[test]
    fn test_accelerator_profile_uses_index_and_bf16() {
        let selector = DeviceSelector::with_probes(
            DevicePreference::Auto,
            1,
            vec![Box::new(FixedProbe(Some(gpu("L4", 4 << 30))))],
        );
        let profile = selector.select();
        assert!(profile.is_accelerator());
        assert_eq!(profile.device_id, "cuda:1");
        assert_eq!(profile.dtype, ComputeDtype::BFloat16);
        assert_eq!(profile.accelerator_name.as_deref(), Some("L4"));
        assert_eq!(profile.summary(), "cuda:1 (L4, bfloat16)");
    }

    #[test]
    fn test_selection_is_deterministic() {
        let selector = DeviceSelector::with_probes(
            DevicePreference::Auto,
            0,
            vec![Box::new(FixedProbe(Some(gpu("T4", 1 << 30))))],
        );
        let first = selector.select();
        let second = selector.select();
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.dtype, second.dtype);
    }

    #[test]
    fn test_faulty_probes_downgrade_to_cpu() {
        let selector = DeviceSelector::with_probes(
            DevicePreference::Cuda,
            0,
            vec![Box::new(FailingProbe), Box::new(PanickingProbe)],
        );
        let profile = selector.select();
        assert_eq!(profile.kind, DeviceKind::Cpu);
        assert_eq!(profile.device_id, "cpu");
        assert_eq!(profile.dtype, ComputeDtype::Float32);
    }

    #[test]
    fn test_later_probe_fills_missing_details() {
        let selector = DeviceSelector::with_probes(
            DevicePreference::Auto,
            0,
            vec![
                Box::new(FailingProbe),
                Box::new(FixedProbe(Some(AcceleratorInfo::default()))),
                Box::new(FixedProbe(Some(gpu("H100", 80 << 30)))),
            ],
        );
        let profile = selector.select();
        assert_eq!(profile.accelerator_name.as_deref(), Some("H100"));
        assert_eq!(profile.free_memory_bytes, Some(80 << 30));
    }

    #[test]
    fn test_parse_nvidia_smi_line() {
        let info = parse_nvidia_smi_line("NVIDIA GeForce RTX 4090, 23000").unwrap();
        assert_eq!(info.name.as_deref(), Some("NVIDIA GeForce RTX 4090"));
        assert_eq!(info.free_memory_bytes, Some(23000 * 1024 * 1024));
        assert!(parse_nvidia_smi_line("garbage").is_none());
    }

    #[test]
    fn test_oversized_free_memory_is_dropped() {
        let line = format!("Broken GPU, {}", u64::MAX);
        let info = parse_nvidia_smi_line(&line).unwrap();
        assert_eq!(info.name.as_deref(), Some("Broken GPU"));
        assert_eq!(info.free_memory_bytes, None);
    }

    #[test]
    fn test_cpu_profile_has_no_free_memory() {
        assert_eq!(DeviceProfile::cpu().refresh_free_memory(), None);
    }

    #[test]
    fn test_preference_parsing() {
        assert_eq!(
            "CUDA".parse::<DevicePreference>().unwrap(),
            DevicePreference::Cuda
        );
        assert_eq!(
            "".parse::<DevicePreference>().unwrap(),
            DevicePreference::Auto
        );
        assert!("metal".parse::<DevicePreference>().is_err());
    }
}
