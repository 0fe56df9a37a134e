//! Voice and language catalog endpoints

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;
use voxserve_core::catalog::AUTO_LANGUAGE;

#[derive(Serialize)]
pub struct VoiceInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub native_language: &'static str,
}

#[derive(Serialize)]
pub struct VoicesResponse {
    pub voices: Vec<VoiceInfo>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct LanguagesResponse {
    pub languages: Vec<&'static str>,
    pub default: &'static str,
    pub count: usize,
}

pub async fn list_voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    let voices: Vec<VoiceInfo> = state
        .service
        .voices()
        .iter()
        .map(|voice| VoiceInfo {
            id: voice.id,
            name: voice.id,
            description: voice.description,
            native_language: voice.native_language,
        })
        .collect();

    Json(VoicesResponse {
        count: voices.len(),
        voices,
    })
}

pub async fn list_languages(State(state): State<AppState>) -> Json<LanguagesResponse> {
    let languages = state.service.languages().to_vec();
    Json(LanguagesResponse {
        count: languages.len(),
        default: AUTO_LANGUAGE,
        languages,
    })
}
