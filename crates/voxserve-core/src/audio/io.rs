//! Audio payload decoding and base64 helpers.

use std::io::{Cursor, ErrorKind};

use base64::Engine;

use crate::error::{Error, Result};

pub fn base64_decode(data: &str) -> Result<Vec<u8>> {
    let payload = if data.starts_with("data:") {
        data.split_once(',').map(|(_, b64)| b64).unwrap_or(data)
    } else {
        data
    };

    let normalized: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| Error::Audio(format!("Base64 decode error: {}", e)))
}

pub fn base64_encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode an uploaded clip in any container symphonia can probe (WAV, FLAC,
/// Ogg Vorbis, MP3, ...) into mono samples and its sample rate. WAV layouts
/// symphonia rejects are retried with hound.
pub fn decode_audio_bytes(audio_bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    if audio_bytes.is_empty() {
        return Err(Error::Audio("Empty audio input".to_string()));
    }

    let (mut samples, sample_rate) = match decode_with_symphonia(audio_bytes) {
        Ok(decoded) => decoded,
        Err(symphonia_err) => decode_wav_bytes(audio_bytes).map_err(|wav_err| {
            Error::Audio(format!(
                "Failed to decode audio. Symphonia: {symphonia_err}; WAV fallback: {wav_err}"
            ))
        })?,
    };

    if sample_rate == 0 {
        return Err(Error::Audio("Decoded audio has no sample rate".to_string()));
    }
    if samples.is_empty() {
        return Err(Error::Audio("Decoded audio produced zero samples".to_string()));
    }
    sanitize(&mut samples);
    Ok((samples, sample_rate))
}

fn decode_with_symphonia(audio_bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;
    use symphonia::default::{get_codecs, get_probe};

    let source = MediaSourceStream::new(
        Box::new(Cursor::new(audio_bytes.to_vec())),
        Default::default(),
    );
    let probed = get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Audio(format!("Unrecognized audio container: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| Error::Audio("No default audio track found".to_string()))?;
    let track_id = track.id;
    let expected_frames = track.codec_params.n_frames;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Audio(format!("Unsupported audio codec: {e}")))?;

    let mut samples = Vec::new();
    let mut frames: u64 = 0;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(Error::Audio(format!("Failed reading audio packets: {err}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::Audio(format!("Failed decoding audio packet: {e}")))?;
        if sample_rate == 0 {
            sample_rate = decoded.spec().rate;
        }
        frames += decoded.frames() as u64;
        append_mono(decoded, &mut samples);
    }

    // Containers that declare their length must deliver all of it
    if let Some(expected) = expected_frames {
        if frames < expected {
            return Err(Error::Audio(format!(
                "Audio stream is truncated: {frames} of {expected} frames"
            )));
        }
    }

    Ok((samples, sample_rate))
}

fn append_mono(decoded: symphonia::core::audio::AudioBufferRef<'_>, out: &mut Vec<f32>) {
    use symphonia::core::audio::SampleBuffer;

    let channels = decoded.spec().channels.count().max(1);
    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
    buffer.copy_interleaved_ref(decoded);
    let data = buffer.samples();

    if channels == 1 {
        out.extend_from_slice(data);
    } else {
        out.extend(
            data.chunks(channels)
                .map(|frame| frame.iter().copied().sum::<f32>() / frame.len() as f32),
        );
    }
}

/// Decode a WAV payload into mono samples in [-1, 1] and its sample rate.
pub fn decode_wav_bytes(wav_bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_bytes))
        .map_err(|e| Error::Audio(format!("Failed to parse WAV: {}", e)))?;

    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(Error::Audio("WAV header reports a zero sample rate".into()));
    }
    let channels = spec.channels.max(1) as usize;

    let decoded: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let bits = spec.bits_per_sample.max(1) as u32;
            let max_val = if bits > 1 {
                ((1i64 << (bits - 1)) - 1) as f32
            } else {
                1.0
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect()
        }
        hound::SampleFormat::Float => reader.samples::<f32>().collect(),
    };
    let mut samples =
        decoded.map_err(|e| Error::Audio(format!("Failed to read WAV samples: {}", e)))?;

    if channels > 1 {
        samples = samples
            .chunks(channels)
            .map(|frame| frame.iter().copied().sum::<f32>() / frame.len() as f32)
            .collect();
    }

    sanitize(&mut samples);
    Ok((samples, spec.sample_rate))
}

fn sanitize(samples: &mut [f32]) {
    for sample in samples {
        *sample = if sample.is_finite() {
            sample.clamp(-1.0, 1.0)
        } else {
            0.0
        };
    }
}
