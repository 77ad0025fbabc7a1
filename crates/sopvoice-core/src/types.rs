//! Shared types for the SOP Assistant voice client.
//!
//! These are used by sopvoice-lib, sopvoice-cli and anything embedding the
//! voice manager. Keeping them here means consumers can depend on the types
//! without pulling in tokio, cpal or rodio.

use serde::{Deserialize, Serialize};

use crate::presets::{DEFAULT_PRESET, VoicePreset, default_presets};

// ─── Speed ─────────────────────────────────────────────────────────────────

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Clamp a playback speed into `[MIN_SPEED, MAX_SPEED]`. NaN maps to 1.0.
pub fn clamp_speed(speed: f32) -> f32 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.clamp(MIN_SPEED, MAX_SPEED)
}

// ─── Capture types ─────────────────────────────────────────────────────────

/// Microphone constraints for a capture session. Capture is always mono.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Audio formats the backend's upload endpoint accepts.
pub const SUPPORTED_AUDIO_EXTENSIONS: &[&str] =
    &["mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm", "ogg"];

/// A finalized audio object, ready for upload or playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: String,
    pub duration_ms: Option<u64>,
}

impl AudioClip {
    /// Wrap an encoded 16-bit mono WAV recording.
    pub fn wav(bytes: Vec<u8>, duration_ms: u64) -> Self {
        Self {
            bytes,
            mime: "audio/wav".into(),
            file_name: "recording.wav".into(),
            duration_ms: Some(duration_ms),
        }
    }

    /// Build a clip from an existing audio file, picking the MIME type from
    /// its extension.
    pub fn from_file(file_name: &str, bytes: Vec<u8>) -> Result<Self, String> {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            return Err(format!(
                "unsupported audio format '.{ext}'; supported: {}",
                SUPPORTED_AUDIO_EXTENSIONS.join(", ")
            ));
        }
        let mime = match ext.as_str() {
            "mp3" | "mpga" | "mpeg" => "audio/mpeg",
            "mp4" | "m4a" => "audio/mp4",
            "webm" => "audio/webm",
            "ogg" => "audio/ogg",
            _ => "audio/wav",
        };
        Ok(Self {
            bytes,
            mime: mime.into(),
            file_name: file_name.into(),
            duration_ms: None,
        })
    }
}

// ─── Voice types ───────────────────────────────────────────────────────────

/// A concrete voice offered by the local synthesis engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVoice {
    /// Identifier passed back to the engine when speaking.
    pub id: String,
    pub name: String,
    pub lang: String,
}

/// Binding of a preset to a local voice, or `None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedVoice {
    pub preset_id: String,
    pub voice: Option<LocalVoice>,
}

/// A voice listed by the backend's `GET /voice/voices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVoice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

// ─── STT types ─────────────────────────────────────────────────────────────

/// Outcome of a transcription request that reached the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Transcription {
    /// Recognized speech.
    Text(String),
    /// The backend answered with its own error, e.g. "No speech detected".
    Rejected(String),
}

// ─── Playback types ────────────────────────────────────────────────────────

/// One tier of the speech fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechRoute {
    /// Local engine, using the preset's resolved voice.
    LocalVoice,
    /// Backend synthesis with the requested preset.
    RemoteVoice,
    /// Backend synthesis with the configured fallback voice.
    RemoteDefaultVoice,
}

// ─── Status types ──────────────────────────────────────────────────────────

/// Observable recorder phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderPhase {
    Idle,
    Starting,
    Recording,
    Stopping,
}

/// Voice manager status snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatus {
    pub voice_mode: bool,
    pub recorder: RecorderPhase,
    pub speaking: bool,
}

/// What the current machine can do.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSupport {
    pub recording: bool,
    pub local_synthesis: bool,
    pub local_voices: usize,
}

// ─── Configuration ─────────────────────────────────────────────────────────

/// Voice client configuration. Every field has a default, so a JSON file
/// only needs the keys it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub backend_url: String,
    pub default_voice: String,
    pub fallback_voice: String,
    pub speed: f32,
    pub catalog_timeout_ms: u64,
    pub request_timeout_secs: u64,
    pub capture: CaptureConstraints,
    pub routes: Vec<SpeechRoute>,
    pub presets: Vec<VoicePreset>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8000".into(),
            default_voice: DEFAULT_PRESET.into(),
            fallback_voice: "alloy".into(),
            speed: 1.0,
            catalog_timeout_ms: 1_800,
            request_timeout_secs: 30,
            capture: CaptureConstraints::default(),
            routes: vec![
                SpeechRoute::LocalVoice,
                SpeechRoute::RemoteVoice,
                SpeechRoute::RemoteDefaultVoice,
            ],
            presets: default_presets(),
        }
    }
}

impl VoiceConfig {
    /// Parse a JSON config and validate it.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("invalid config JSON: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.routes.is_empty() {
            return Err("at least one speech route is required".into());
        }
        if !self.speed.is_finite() {
            return Err(format!("speed must be a finite number, got {}", self.speed));
        }
        if self.preset(&self.default_voice).is_none() {
            return Err(format!(
                "default voice '{}' is not a configured preset",
                self.default_voice
            ));
        }
        if self.capture.sample_rate == 0 {
            return Err("capture sample rate must be positive".into());
        }
        Ok(())
    }

    pub fn preset(&self, id: &str) -> Option<&VoicePreset> {
        self.presets.iter().find(|p| p.id == id)
    }
}
