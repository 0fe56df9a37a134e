//! Encoding of synthesized samples into response payloads.

use std::io::Cursor;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// 16-bit PCM WAV
    #[default]
    Wav,
    /// Little-endian f32 samples without a header
    RawF32,
    /// Little-endian i16 samples without a header
    RawI16,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::RawF32 | Self::RawI16 => "pcm",
        }
    }
}

impl FromStr for AudioFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "wav" => Ok(Self::Wav),
            "raw_f32" | "f32" | "pcm_f32" => Ok(Self::RawF32),
            "raw_i16" | "pcm" | "pcm16" | "pcm_s16le" => Ok(Self::RawI16),
            other => Err(Error::InvalidRequest(format!(
                "Unsupported audio format '{other}'. Use wav, pcm or raw_f32"
            ))),
        }
    }
}

pub struct AudioEncoder {
    sample_rate: u32,
    channels: u16,
}

impl AudioEncoder {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels: channels.max(1),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn encode(&self, samples: &[f32], format: AudioFormat) -> Result<Vec<u8>> {
        match format {
            AudioFormat::Wav => self.encode_wav(samples),
            AudioFormat::RawF32 => Ok(samples
                .iter()
                .flat_map(|s| s.to_le_bytes())
                .collect()),
            AudioFormat::RawI16 => Ok(samples
                .iter()
                .flat_map(|&s| to_i16(s).to_le_bytes())
                .collect()),
        }
    }

    fn encode_wav(&self, samples: &[f32]) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut buffer = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut buffer, spec)
                .map_err(|e| Error::Audio(format!("Failed to start WAV: {e}")))?;
            for &sample in samples {
                writer
                    .write_sample(to_i16(sample))
                    .map_err(|e| Error::Audio(format!("Failed to write WAV: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| Error::Audio(format!("Failed to finalize WAV: {e}")))?;
        }
        Ok(buffer.into_inner())
    }

    pub fn content_type(format: AudioFormat) -> &'static str {
        match format {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::RawF32 | AudioFormat::RawI16 => "application/octet-stream",
        }
    }
}

fn to_i16(sample: f32) -> i16 {
    let clamped = if sample.is_finite() {
        sample.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    (clamped * i16::MAX as f32).round() as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_formats_have_expected_sizes() {
        let encoder = AudioEncoder::new(24_000, 1);
        let samples = [0.0f32, 0.5, -0.5, 1.5];
        assert_eq!(
            encoder.encode(&samples, AudioFormat::RawF32).unwrap().len(),
            16
        );
        let pcm = encoder.encode(&samples, AudioFormat::RawI16).unwrap();
        assert_eq!(pcm.len(), 8);
        // Out-of-range input is clamped to full scale.
        assert_eq!(i16::from_le_bytes([pcm[6], pcm[7]]), i16::MAX);
    }

    #[test]
    fn test_wav_header_is_present() {
        let bytes = AudioEncoder::new(16_000, 1)
            .encode(&[0.0; 160], AudioFormat::Wav)
            .unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(bytes.len(), 44 + 320);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("WAV".parse::<AudioFormat>().unwrap(), AudioFormat::Wav);
        assert_eq!("pcm".parse::<AudioFormat>().unwrap(), AudioFormat::RawI16);
        assert!(matches!(
            "mp3".parse::<AudioFormat>(),
            Err(Error::InvalidRequest(_))
        ));
        assert_eq!(AudioEncoder::content_type(AudioFormat::Wav), "audio/wav");
    }
}
