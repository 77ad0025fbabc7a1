//! Voice manager: the one object the UI layer talks to.
//!
//! Owns the recorder, transcription client, catalog resolver and synthesis
//! player, plus the voice-mode flag. Cloning is cheap; every clone drives the
//! same engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use sopvoice_core::text_prep::speakable_text;
use sopvoice_core::types::{
    AudioClip, RemoteVoice, ResolvedVoice, Transcription, VoiceConfig, VoiceStatus, VoiceSupport,
};

use crate::capture::CpalCaptureDevice;
use crate::catalog::VoiceCatalogResolver;
use crate::client::BackendClient;
use crate::device::{AudioCaptureDevice, ClipPlayer, SpeechCatalog, SpeechPlayer};
use crate::error::{Result, VoiceError};
use crate::espeak::EspeakEngine;
use crate::permission::PermissionGate;
use crate::playback::RodioClipPlayer;
use crate::recorder::Recorder;
use crate::stt::TranscriptionClient;
use crate::tts::SynthesisPlayer;

/// Platform capabilities injected into the manager.
#[derive(Clone)]
pub struct Capabilities {
    pub capture: Arc<dyn AudioCaptureDevice>,
    pub catalog: Arc<dyn SpeechCatalog>,
    pub speech: Arc<dyn SpeechPlayer>,
    pub clips: Arc<dyn ClipPlayer>,
}

impl Capabilities {
    /// cpal microphone, `espeak` for local voices, rodio for remote clips.
    pub fn system(espeak_program: &str) -> Result<Self> {
        let espeak = EspeakEngine::spawn(espeak_program);
        let clips = RodioClipPlayer::spawn().map_err(|e| VoiceError::Config(e.to_string()))?;
        Ok(Self {
            capture: Arc::new(CpalCaptureDevice::new()),
            catalog: espeak.clone(),
            speech: espeak,
            clips: Arc::new(clips),
        })
    }
}

#[derive(Clone)]
pub struct VoiceManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: VoiceConfig,
    capture: Arc<dyn AudioCaptureDevice>,
    permission: PermissionGate,
    recorder: Recorder,
    stt: TranscriptionClient,
    resolver: Arc<VoiceCatalogResolver>,
    player: SynthesisPlayer,
    backend: BackendClient,
    voice_mode: AtomicBool,
}

impl VoiceManager {
    pub fn new(config: VoiceConfig, caps: Capabilities) -> Result<Self> {
        config.validate().map_err(VoiceError::Config)?;

        let backend = BackendClient::new(
            &config.backend_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let resolver = Arc::new(VoiceCatalogResolver::new(
            caps.catalog,
            config.presets.clone(),
            Duration::from_millis(config.catalog_timeout_ms),
        ));
        let player = SynthesisPlayer::new(
            resolver.clone(),
            caps.speech,
            caps.clips,
            backend.clone(),
            config.routes.clone(),
            &config.fallback_voice,
        );

        info!(
            backend = %config.backend_url,
            default_voice = %config.default_voice,
            routes = ?config.routes,
            "voice manager ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                permission: PermissionGate::new(caps.capture.clone()),
                recorder: Recorder::new(caps.capture.clone(), config.capture.clone()),
                stt: TranscriptionClient::new(backend.clone()),
                capture: caps.capture,
                resolver,
                player,
                backend,
                voice_mode: AtomicBool::new(false),
                config,
            }),
        })
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.inner.config
    }

    // ─── Voice mode ────────────────────────────────────────────────────────

    /// Ask for microphone access; voice mode turns on only if it is granted.
    pub async fn enter_voice_mode(&self) -> Result<()> {
        self.inner.permission.request_microphone_access().await?;
        self.inner.voice_mode.store(true, Ordering::SeqCst);
        info!("voice mode on");
        Ok(())
    }

    /// Leave voice mode, dropping any recording and silencing speech.
    pub async fn exit_voice_mode(&self) {
        self.inner.voice_mode.store(false, Ordering::SeqCst);
        self.inner.recorder.cancel();
        self.inner.player.stop().await;
        info!("voice mode off");
    }

    pub fn voice_mode(&self) -> bool {
        self.inner.voice_mode.load(Ordering::SeqCst)
    }

    // ─── Recording ─────────────────────────────────────────────────────────

    pub async fn start_recording(&self) -> Result<bool> {
        self.inner.recorder.start().await
    }

    pub async fn stop_recording(&self) -> Result<AudioClip> {
        self.inner.recorder.stop().await
    }

    pub async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription> {
        self.inner.stt.transcribe(clip).await
    }

    pub async fn stop_and_transcribe(&self) -> Result<Transcription> {
        let clip = self.stop_recording().await?;
        debug!(bytes = clip.bytes.len(), "manager: transcribing recording");
        self.transcribe(&clip).await
    }

    // ─── Speech ────────────────────────────────────────────────────────────

    /// Speak a chat answer. Markup is reduced to plain sentences first;
    /// `voice` and `speed` fall back to the configured defaults.
    pub async fn speak(&self, text: &str, voice: Option<&str>, speed: Option<f32>) -> Result<bool> {
        let config = &self.inner.config;
        let spoken = speakable_text(text);
        let voice = voice.unwrap_or(&config.default_voice);
        let speed = speed.unwrap_or(config.speed);
        self.inner.player.speak(&spoken, voice, speed).await
    }

    pub async fn stop_speaking(&self) {
        self.inner.player.stop().await;
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.player.is_speaking()
    }

    // ─── Introspection ─────────────────────────────────────────────────────

    pub fn status(&self) -> VoiceStatus {
        VoiceStatus {
            voice_mode: self.voice_mode(),
            recorder: self.inner.recorder.phase(),
            speaking: self.is_speaking(),
        }
    }

    pub fn support(&self) -> VoiceSupport {
        let local_voices = self.inner.resolver.local_voice_count();
        VoiceSupport {
            recording: self.inner.capture.is_available(),
            local_synthesis: local_voices > 0,
            local_voices,
        }
    }

    pub async fn resolved_voices(&self) -> Arc<Vec<ResolvedVoice>> {
        self.inner.resolver.resolved().await
    }

    pub async fn refresh_voices(&self) -> Arc<Vec<ResolvedVoice>> {
        self.inner.resolver.invalidate().await;
        self.inner.resolver.resolved().await
    }

    pub async fn remote_voices(&self) -> Result<Vec<RemoteVoice>> {
        self.inner.backend.list_voices().await
    }
}
