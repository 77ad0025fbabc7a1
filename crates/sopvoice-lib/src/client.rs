//! HTTP client for the backend's voice endpoints.
//!
//! ```text
//! POST /voice/upload        multipart field "audio_file" → {transcription} | {error}
//! POST /voice/synthesize    ?text=&voice_id=&speed=      → audio/wav bytes
//! GET  /voice/voices                                     → {voices: [...]}
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use sopvoice_core::types::{AudioClip, RemoteVoice};

use crate::error::{Result, VoiceError};

/// Raw reply of `POST /voice/upload`. The backend sends either field, and
/// may add others (intent, confidence) that the voice layer ignores.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadReply {
    #[serde(default)]
    pub transcription: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A non-2xx answer, with FastAPI's `detail` when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: u16,
    pub detail: Option<String>,
}

impl HttpFailure {
    pub fn reason(&self) -> String {
        self.detail
            .clone()
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

#[derive(Deserialize)]
struct VoicesBody {
    #[serde(default)]
    voices: Vec<RemoteVoice>,
}

/// Outcome of an upload that reached the server.
#[derive(Debug)]
pub enum UploadOutcome {
    Reply(UploadReply),
    Failed(HttpFailure),
}

#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoiceError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Upload one clip for transcription. Network and decode problems are
    /// returned as `Err(reason)`; HTTP-level failures as
    /// [`UploadOutcome::Failed`].
    pub async fn upload_audio(&self, clip: &AudioClip) -> std::result::Result<UploadOutcome, String> {
        let part = reqwest::multipart::Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(&clip.mime)
            .map_err(|e| format!("mime error: {e}"))?;
        let form = reqwest::multipart::Form::new().part("audio_file", part);

        debug!(
            bytes = clip.bytes.len(),
            file = %clip.file_name,
            "client: POST /voice/upload"
        );
        let resp = self
            .http
            .post(format!("{}/voice/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| format!("upload request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Ok(UploadOutcome::Failed(read_failure(resp).await));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| format!("response read error: {e}"))?;
        let reply: UploadReply =
            serde_json::from_str(&body).map_err(|e| format!("invalid JSON: {e}; raw={body}"))?;
        Ok(UploadOutcome::Reply(reply))
    }

    /// Remote synthesis. Returns the clip bytes exactly as served.
    pub async fn synthesize(&self, text: &str, voice_id: &str, speed: f32) -> Result<Vec<u8>> {
        debug!(chars = text.len(), voice_id, speed, "client: POST /voice/synthesize");
        let speed = speed.to_string();
        let resp = self
            .http
            .post(format!("{}/voice/synthesize", self.base_url))
            .query(&[("text", text), ("voice_id", voice_id), ("speed", speed.as_str())])
            .send()
            .await
            .map_err(|e| VoiceError::Backend(format!("synthesis request failed: {e}")))?;

        if !resp.status().is_success() {
            let failure = read_failure(resp).await;
            return Err(VoiceError::Backend(failure.reason()));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| VoiceError::Backend(format!("synthesis read error: {e}")))?;
        Ok(bytes.to_vec())
    }

    pub async fn list_voices(&self) -> Result<Vec<RemoteVoice>> {
        let resp = self
            .http
            .get(format!("{}/voice/voices", self.base_url))
            .send()
            .await
            .map_err(|e| VoiceError::Backend(format!("voices request failed: {e}")))?;

        if !resp.status().is_success() {
            let failure = read_failure(resp).await;
            return Err(VoiceError::Backend(failure.reason()));
        }

        let body: VoicesBody = resp
            .json()
            .await
            .map_err(|e| VoiceError::Backend(format!("invalid voices reply: {e}")))?;
        Ok(body.voices)
    }
}

async fn read_failure(resp: reqwest::Response) -> HttpFailure {
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|b| b.detail)
        .filter(|d| !d.is_empty());
    HttpFailure { status, detail }
}
