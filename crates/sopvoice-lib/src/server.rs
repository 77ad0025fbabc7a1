//! HTTP control API for the voice manager.
//!
//! Runs on port 2004 by default. CORS-permissive so the dashboard can call
//! it from localhost:3000.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use sopvoice_core::text_prep::{is_speakable, speakable_text};
use sopvoice_core::types::{RemoteVoice, ResolvedVoice, Transcription, VoiceStatus, VoiceSupport};

use crate::error::VoiceError;
use crate::manager::VoiceManager;

pub const DEFAULT_PORT: u16 = 2004;

/// Build the axum router with a shared [`VoiceManager`].
pub fn router(manager: VoiceManager) -> Router {
    Router::new()
        .route("/voice-mode", post(enter_voice_mode).delete(exit_voice_mode))
        .route("/record/start", post(start_recording))
        .route("/record/stop", post(stop_recording))
        .route("/speak", post(speak))
        .route("/stop", post(stop))
        .route("/status", get(status))
        .route("/support", get(support))
        .route("/voices", get(voices))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

/// [`VoiceError`] as an HTTP reply: `{ok: false, error}`.
struct ApiError(VoiceError);

impl From<VoiceError> for ApiError {
    fn from(e: VoiceError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            VoiceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            VoiceError::NotRecording => StatusCode::CONFLICT,
            VoiceError::RecordingStart(_) => StatusCode::SERVICE_UNAVAILABLE,
            VoiceError::TranscriptionFailure(_)
            | VoiceError::SynthesisFailure(_)
            | VoiceError::Backend(_) => StatusCode::BAD_GATEWAY,
            VoiceError::UnsupportedAudio(_) | VoiceError::Config(_) => StatusCode::BAD_REQUEST,
        };
        let body = ErrorResponse {
            ok: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    ok: bool,
    error: String,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

#[derive(Serialize)]
struct StartResponse {
    ok: bool,
    started: bool,
}

#[derive(Serialize)]
struct TranscriptionResponse {
    ok: bool,
    transcription: Transcription,
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    speed: Option<f32>,
}

#[derive(Serialize)]
struct SpeakResponse {
    ok: bool,
    queued: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoicesResponse {
    resolved: Vec<ResolvedVoice>,
    remote: Vec<RemoteVoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_error: Option<String>,
}

async fn enter_voice_mode(State(manager): State<VoiceManager>) -> ApiResult<OkResponse> {
    manager.enter_voice_mode().await?;
    Ok(Json(OkResponse { ok: true }))
}

async fn exit_voice_mode(State(manager): State<VoiceManager>) -> Json<OkResponse> {
    manager.exit_voice_mode().await;
    Json(OkResponse { ok: true })
}

async fn start_recording(State(manager): State<VoiceManager>) -> ApiResult<StartResponse> {
    let started = manager.start_recording().await?;
    Ok(Json(StartResponse { ok: true, started }))
}

async fn stop_recording(State(manager): State<VoiceManager>) -> ApiResult<TranscriptionResponse> {
    let transcription = manager.stop_and_transcribe().await?;
    Ok(Json(TranscriptionResponse {
        ok: true,
        transcription,
    }))
}

/// Speech runs in the background; the reply only says whether anything
/// will be spoken.
async fn speak(
    State(manager): State<VoiceManager>,
    Json(req): Json<SpeakRequest>,
) -> Json<SpeakResponse> {
    let queued = is_speakable(&speakable_text(&req.text));
    if queued {
        tokio::spawn(async move {
            if let Err(e) = manager
                .speak(&req.text, req.voice.as_deref(), req.speed)
                .await
            {
                warn!("server: speak failed: {e}");
            }
        });
    }
    Json(SpeakResponse { ok: true, queued })
}

async fn stop(State(manager): State<VoiceManager>) -> Json<OkResponse> {
    manager.stop_speaking().await;
    Json(OkResponse { ok: true })
}

async fn status(State(manager): State<VoiceManager>) -> Json<VoiceStatus> {
    Json(manager.status())
}

async fn support(State(manager): State<VoiceManager>) -> Json<VoiceSupport> {
    Json(manager.support())
}

async fn voices(State(manager): State<VoiceManager>) -> Json<VoicesResponse> {
    let resolved = manager.resolved_voices().await.as_ref().clone();
    let (remote, remote_error) = match manager.remote_voices().await {
        Ok(list) => (list, None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    Json(VoicesResponse {
        resolved,
        remote,
        remote_error,
    })
}
