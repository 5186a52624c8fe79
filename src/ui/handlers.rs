//! HTTP API handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::control::eq::{EqPreset, EqualizerTable};
use crate::error::{Error, Result};
use crate::status::PlaybackStatus;
use crate::ui::server::AppState;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        }
    }

    pub fn error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind()),
        }
    }
}

type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::ResourceExhausted(_) | Error::EngineClosed => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T>(result: Result<T>) -> Reply<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(ApiResponse::ok(data))),
        Err(e) => (status_code(&e), Json(ApiResponse::error(&e))),
    }
}

/// Buffer fill reported by `GET /api/buffer`
#[derive(Debug, Serialize, Deserialize)]
pub struct BufferLevel {
    pub percent: u8,
}

#[derive(Debug, Deserialize)]
pub struct PlayRequest {
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct VolumeRequest {
    pub volume: i32,
}

#[derive(Debug, Deserialize)]
pub struct MuteRequest {
    pub muted: bool,
}

#[derive(Debug, Deserialize)]
pub struct BandRequest {
    pub band: usize,
    pub level: i32,
}

#[derive(Debug, Deserialize)]
pub struct PresetRequest {
    /// Display name or key, e.g. "Bass+" or "bass_boost"
    pub preset: String,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    pub balance: i32,
}

pub async fn get_status(State(state): State<AppState>) -> Json<ApiResponse<PlaybackStatus>> {
    Json(ApiResponse::ok(state.engine.status()))
}

pub async fn get_buffer(State(state): State<AppState>) -> Json<ApiResponse<BufferLevel>> {
    Json(ApiResponse::ok(BufferLevel {
        percent: state.engine.buffer_level(),
    }))
}

pub async fn get_equalizer(State(state): State<AppState>) -> Json<ApiResponse<EqualizerTable>> {
    Json(ApiResponse::ok(state.engine.equalizer()))
}

pub async fn play(State(state): State<AppState>, Json(req): Json<PlayRequest>) -> Reply<()> {
    reply(state.engine.play(req.source).await)
}

pub async fn stop(State(state): State<AppState>) -> Reply<()> {
    reply(state.engine.stop().await)
}

pub async fn pause(State(state): State<AppState>) -> Reply<()> {
    reply(state.engine.pause().await)
}

pub async fn resume(State(state): State<AppState>) -> Reply<()> {
    reply(state.engine.resume().await)
}

pub async fn next(State(state): State<AppState>) -> Reply<()> {
    reply(state.engine.play_next().await)
}

pub async fn set_volume(State(state): State<AppState>, Json(req): Json<VolumeRequest>) -> Reply<()> {
    reply(state.engine.set_volume(req.volume).await)
}

pub async fn set_mute(State(state): State<AppState>, Json(req): Json<MuteRequest>) -> Reply<()> {
    reply(state.engine.mute(req.muted).await)
}

pub async fn set_band(
    State(state): State<AppState>,
    Json(req): Json<BandRequest>,
) -> Reply<EqualizerTable> {
    let result = state.engine.set_eq_band(req.band, req.level).await;
    reply(result.map(|()| state.engine.equalizer()))
}

pub async fn apply_preset(
    State(state): State<AppState>,
    Json(req): Json<PresetRequest>,
) -> Reply<EqualizerTable> {
    let preset = match req.preset.parse::<EqPreset>() {
        Ok(preset) => preset,
        Err(e) => return reply(Err(e)),
    };
    let result = state.engine.apply_preset(preset).await;
    reply(result.map(|()| state.engine.equalizer()))
}

pub async fn set_balance(
    State(state): State<AppState>,
    Json(req): Json<BalanceRequest>,
) -> Reply<EqualizerTable> {
    let result = state.engine.set_balance(req.balance).await;
    reply(result.map(|()| state.engine.equalizer()))
}
