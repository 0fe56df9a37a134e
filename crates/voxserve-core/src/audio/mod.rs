//! Audio decoding, post-processing and encoding.

mod dsp;
mod encoder;
mod io;

pub use dsp::{duration_secs, normalize, pitch_shift, resample, time_stretch, AudioMetadata};
pub use encoder::{AudioEncoder, AudioFormat};
pub use io::{base64_decode, base64_encode, decode_audio_bytes, decode_wav_bytes};
