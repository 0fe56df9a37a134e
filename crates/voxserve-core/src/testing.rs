//! In-process fakes for the loader and model seams.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::catalog::ModelVariant;
use crate::error::{Error, Result};
use crate::registry::{
    GeneratedAudio, GenerationParams, LoadSpec, ModelHandle, ModelLoader, RegistryEntry,
    SpeechModel,
};

/// Produces a short tone; fails on demand.
pub struct FakeModel {
    variant: ModelVariant,
    failing: Arc<AtomicBool>,
    generations: Arc<AtomicUsize>,
}

impl FakeModel {
    pub const SAMPLE_RATE: u32 = 24_000;
    /// Half a second of audio at normal speed.
    pub const OUTPUT_LEN: usize = 12_000;
}

impl SpeechModel for FakeModel {
    fn variant(&self) -> ModelVariant {
        self.variant
    }

    fn sample_rate(&self) -> u32 {
        Self::SAMPLE_RATE
    }

    fn supports_native_speed(&self) -> bool {
        self.variant == ModelVariant::CustomVoice
    }

    fn generate(&self, params: &GenerationParams) -> Result<GeneratedAudio> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::synthesis(self.variant, "injected failure"));
        }
        if self.variant.is_tokenizer() {
            return Err(Error::synthesis(self.variant, "tokenizer cannot synthesize"));
        }

        let speed = params.speed.unwrap_or(1.0);
        let len = (Self::OUTPUT_LEN as f32 / speed).round() as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / Self::SAMPLE_RATE as f32;
                0.3 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            })
            .collect();
        Ok(GeneratedAudio {
            samples,
            sample_rate: Self::SAMPLE_RATE,
        })
    }
}

/// Counts loads and unloads; can be told to fail or to be slow.
#[derive(Default)]
pub struct FakeLoader {
    loads: AtomicUsize,
    unloads: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
    specs: Mutex<Vec<LoadSpec>>,
    failing_models: Arc<AtomicBool>,
    generations: Arc<AtomicUsize>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every model handed out by this loader fail generation.
    pub fn set_models_failing(&self, failing: bool) {
        self.failing_models.store(failing, Ordering::SeqCst);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    pub fn specs(&self) -> Vec<LoadSpec> {
        self.specs.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl ModelLoader for FakeLoader {
    fn load(&self, spec: &LoadSpec) -> Result<ModelHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut specs) = self.specs.lock() {
            specs.push(spec.clone());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::model_load(spec.variant, "weights unavailable"));
        }
        Ok(Arc::new(FakeModel {
            variant: spec.variant,
            failing: self.failing_models.clone(),
            generations: self.generations.clone(),
        }))
    }

    fn unload(&self, _entry: &RegistryEntry) -> Result<()> {
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sample rate of clips built by `flac_bytes`.
pub const FLAC_SAMPLE_RATE: u32 = 16_000;

const FLAC_BLOCK_SIZE: usize = 4000;

/// Encode mono samples as a 16 kHz, 16-bit FLAC stream of verbatim subframes.
pub fn flac_bytes(samples: &[f32]) -> Vec<u8> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
        .collect();

    let mut out = b"fLaC".to_vec();

    // STREAMINFO, flagged as the last metadata block
    out.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
    out.extend_from_slice(&(FLAC_BLOCK_SIZE as u16).to_be_bytes());
    out.extend_from_slice(&(FLAC_BLOCK_SIZE as u16).to_be_bytes());
    out.extend_from_slice(&[0; 6]);
    let packed = (u64::from(FLAC_SAMPLE_RATE) << 44) | (15u64 << 36) | pcm.len() as u64;
    out.extend_from_slice(&packed.to_be_bytes());
    out.extend_from_slice(&[0; 16]);

    for (index, block) in pcm.chunks(FLAC_BLOCK_SIZE).enumerate() {
        assert!(index < 128, "clip too long for single-byte frame numbers");
        let mut frame = vec![0xFF, 0xF8, 0x75, 0x08, index as u8];
        frame.extend_from_slice(&((block.len() - 1) as u16).to_be_bytes());
        frame.push(crc8(&frame));

        frame.push(0x02);
        for sample in block {
            frame.extend_from_slice(&sample.to_be_bytes());
        }
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());

        out.extend_from_slice(&frame);
    }
    out
}

fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |mut crc, byte| {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
        crc
    })
}

fn crc16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |mut crc, byte| {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
        }
        crc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_checksums_match_reference_values() {
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc16(b"123456789"), 0xFEE8);
    }
}
