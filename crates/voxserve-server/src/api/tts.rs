//! Speech synthesis endpoints for the three generation modes

use axum::{
    body::Body,
    extract::{multipart::Field, rejection::JsonRejection, Multipart, State},
    http::{header, Response},
    Json,
};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    HEADER_DURATION, HEADER_GENERATION_TIME, HEADER_REQUEST_ID, HEADER_RTF, HEADER_SAMPLE_RATE,
};
use crate::error::ApiError;
use crate::state::AppState;
use voxserve_core::audio::decode_audio_bytes;
use voxserve_core::catalog::AUTO_LANGUAGE;
use voxserve_core::{AudioEncoder, AudioFormat, ReferenceAudio, SynthesisRequest};

/// Custom voice request: a preset speaker with optional style instruction
#[derive(Debug, Deserialize)]
pub struct CustomVoiceRequest {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    pub voice: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default = "default_factor")]
    pub speed: f32,
    #[serde(default = "default_factor")]
    pub pitch: f32,
    /// Output format (wav, raw_f32, raw_i16)
    #[serde(default = "default_format")]
    pub format: String,
}

/// Voice design request: a voice described in natural language
#[derive(Debug, Deserialize)]
pub struct VoiceDesignRequest {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    pub voice_description: String,
    #[serde(default = "default_factor")]
    pub speed: f32,
    #[serde(default = "default_factor")]
    pub pitch: f32,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_language() -> String {
    AUTO_LANGUAGE.to_string()
}

fn default_factor() -> f32 {
    1.0
}

fn default_format() -> String {
    "wav".to_string()
}

pub async fn custom_voice(
    State(state): State<AppState>,
    payload: Result<Json<CustomVoiceRequest>, JsonRejection>,
) -> Result<Response<Body>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let format = parse_format(&req.format)?;
    let filename = format!("custom_voice_{}", req.voice.trim().to_lowercase());

    let request = SynthesisRequest::CustomVoice {
        text: req.text,
        language: req.language,
        voice: req.voice,
        instruction: req.instruction,
        speed: req.speed,
        pitch: req.pitch,
    };
    synthesize(state, request, format, &filename).await
}

pub async fn voice_design(
    State(state): State<AppState>,
    payload: Result<Json<VoiceDesignRequest>, JsonRejection>,
) -> Result<Response<Body>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let format = parse_format(&req.format)?;

    let request = SynthesisRequest::VoiceDesign {
        text: req.text,
        language: req.language,
        voice_description: req.voice_description,
        speed: req.speed,
        pitch: req.pitch,
    };
    synthesize(state, request, format, "voice_design").await
}

/// Multipart form fields accepted by the voice-clone endpoint
#[derive(Debug, Default)]
struct VoiceCloneForm {
    text: Option<String>,
    language: Option<String>,
    reference_text: Option<String>,
    x_vector_only: bool,
    speed: Option<f32>,
    pitch: Option<f32>,
    format: Option<String>,
    reference_audio: Option<Vec<u8>>,
}

pub async fn voice_clone(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response<Body>, ApiError> {
    let mut form = VoiceCloneForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "reference_audio" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
                form.reference_audio = Some(bytes.to_vec());
            }
            "text" => form.text = Some(text_field(field).await?),
            "language" => form.language = Some(text_field(field).await?),
            "reference_text" => form.reference_text = Some(text_field(field).await?),
            "x_vector_only_mode" | "x_vector_only" => {
                form.x_vector_only = parse_flag(&text_field(field).await?)
            }
            "speed" => form.speed = Some(parse_factor("speed", &text_field(field).await?)?),
            "pitch" => form.pitch = Some(parse_factor("pitch", &text_field(field).await?)?),
            "format" => form.format = Some(text_field(field).await?),
            _ => debug!("Ignoring form field {}", name),
        }
    }

    let audio_bytes = form
        .reference_audio
        .ok_or_else(|| ApiError::bad_request("reference_audio file is required"))?;
    let text = form
        .text
        .ok_or_else(|| ApiError::bad_request("text is required"))?;
    let format = parse_format(form.format.as_deref().unwrap_or("wav"))?;

    let (samples, sample_rate) =
        tokio::task::spawn_blocking(move || decode_audio_bytes(&audio_bytes))
            .await
            .map_err(|e| ApiError::internal(format!("Reference decoding failed: {e}")))?
            .map_err(|e| ApiError::bad_request(format!("Could not read reference audio: {e}")))?;

    let request = SynthesisRequest::VoiceClone {
        text,
        language: form.language.unwrap_or_else(default_language),
        reference: ReferenceAudio {
            samples,
            sample_rate,
        },
        reference_text: form.reference_text.unwrap_or_default(),
        x_vector_only: form.x_vector_only,
        speed: form.speed.unwrap_or(1.0),
        pitch: form.pitch.unwrap_or(1.0),
    };
    synthesize(state, request, format, "voice_clone").await
}

/// Run one synthesis under the concurrency limit and encode the result
async fn synthesize(
    state: AppState,
    request: SynthesisRequest,
    format: AudioFormat,
    filename: &str,
) -> Result<Response<Body>, ApiError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    info!(
        "TTS request {}: {} chars via {} model",
        request_id,
        request.text().chars().count(),
        request.variant()
    );

    let _permit = state.acquire_permit().await?;

    let timeout = Duration::from_secs(state.request_timeout_secs);
    let output = tokio::time::timeout(timeout, state.service.synthesize(request))
        .await
        .map_err(|_| ApiError::unavailable("Request timed out"))??;

    let duration_secs = output.duration_secs();
    let generation_time_ms = output.generation_time_ms;
    let rtf = output.rtf();
    let sample_rate = output.sample_rate;

    // Encoding is CPU bound
    let audio_bytes = tokio::task::spawn_blocking(move || output.encode(format))
        .await
        .map_err(|e| ApiError::internal(format!("Audio encoding failed: {e}")))?
        .map_err(|e| ApiError::internal(format!("Audio encoding failed: {e}")))?;

    info!(
        "TTS request {} done: {:.2}s audio in {:.0} ms",
        request_id, duration_secs, generation_time_ms
    );

    Response::builder()
        .header(header::CONTENT_TYPE, AudioEncoder::content_type(format))
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}.{}\"",
                filename,
                format.extension()
            ),
        )
        .header(HEADER_DURATION, format!("{:.2}", duration_secs))
        .header(HEADER_GENERATION_TIME, format!("{:.1}", generation_time_ms))
        .header(HEADER_RTF, format!("{:.3}", rtf))
        .header(HEADER_SAMPLE_RATE, sample_rate.to_string())
        .header(HEADER_REQUEST_ID, request_id)
        .body(Body::from(audio_bytes))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {e}")))
}

async fn text_field(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid form field: {e}")))
}

fn parse_format(s: &str) -> Result<AudioFormat, ApiError> {
    s.parse::<AudioFormat>().map_err(ApiError::from)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn parse_factor(name: &str, value: &str) -> Result<f32, ApiError> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| ApiError::bad_request(format!("{name} must be a number, got '{value}'")))
}
