//! Synthesis player: speak text through the first route that works.
//!
//! ```text
//! speak(text, preset, speed)
//!   → LocalVoice          resolved local voice → SpeechPlayer
//!   → RemoteVoice         POST /voice/synthesize (preset)  → ClipPlayer
//!   → RemoteDefaultVoice  POST /voice/synthesize (fallback) → ClipPlayer
//! ```
//!
//! Routes run in configured order; the first one that starts audio wins.
//! Starting audio always goes through [`SynthesisPlayer::go_live`], which
//! holds the switch lock while it stops the previous handle, waits for it to
//! end, and starts the new one. At most one handle is ever live.
//!
//! Epoch-based cancellation: every `speak()` and `stop()` bumps an
//! [`AtomicU64`]. A call whose epoch is no longer current discards what it
//! fetched and returns `Ok(false)`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use sopvoice_core::text_prep::is_speakable;
use sopvoice_core::types::{SpeechRoute, clamp_speed};
use sopvoice_core::wav::parse_wav_header;

use crate::catalog::VoiceCatalogResolver;
use crate::client::BackendClient;
use crate::device::{ClipPlayer, PlaybackHandle, SpeechPlayer, Utterance};
use crate::error::{DeviceError, Result, VoiceError};

/// How long a stopped handle gets to report that it has ended.
const STOP_GRACE: Duration = Duration::from_millis(500);

pub struct SynthesisPlayer {
    resolver: Arc<VoiceCatalogResolver>,
    local: Arc<dyn SpeechPlayer>,
    clips: Arc<dyn ClipPlayer>,
    backend: BackendClient,
    routes: Vec<SpeechRoute>,
    fallback_voice: String,
    epoch: AtomicU64,
    switch: tokio::sync::Mutex<()>,
    current: Mutex<Option<Arc<PlaybackHandle>>>,
}

enum Attempt {
    Played(Arc<PlaybackHandle>),
    Skipped(&'static str),
    Superseded,
    Failed(String),
}

impl SynthesisPlayer {
    pub fn new(
        resolver: Arc<VoiceCatalogResolver>,
        local: Arc<dyn SpeechPlayer>,
        clips: Arc<dyn ClipPlayer>,
        backend: BackendClient,
        routes: Vec<SpeechRoute>,
        fallback_voice: &str,
    ) -> Self {
        Self {
            resolver,
            local,
            clips,
            backend,
            routes,
            fallback_voice: fallback_voice.to_string(),
            epoch: AtomicU64::new(0),
            switch: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
        }
    }

    /// Speak `text` with `preset_id`, waiting until playback ends or is
    /// interrupted.
    ///
    /// `Ok(true)` once audio has played, `Ok(false)` when there was nothing to
    /// say or a newer request took over first. Fails only when every route
    /// failed.
    pub async fn speak(&self, text: &str, preset_id: &str, speed: f32) -> Result<bool> {
        let text = text.trim();
        if !is_speakable(text) {
            debug!("tts: nothing speakable");
            return Ok(false);
        }
        let speed = clamp_speed(speed);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let mut last_error: Option<String> = None;
        for &route in &self.routes {
            if self.superseded(epoch) {
                return Ok(false);
            }
            let attempt = match route {
                SpeechRoute::LocalVoice => self.try_local(epoch, text, preset_id, speed).await,
                SpeechRoute::RemoteVoice => self.try_remote(epoch, text, preset_id, speed).await,
                SpeechRoute::RemoteDefaultVoice if self.fallback_voice == preset_id => {
                    Attempt::Skipped("fallback voice is the requested preset")
                }
                SpeechRoute::RemoteDefaultVoice => {
                    self.try_remote(epoch, text, &self.fallback_voice, speed).await
                }
            };

            match attempt {
                Attempt::Played(handle) => {
                    info!(
                        ?route,
                        source = ?handle.source(),
                        preset_id,
                        speed,
                        playback = handle.id(),
                        "tts: speaking"
                    );
                    handle.finished().await;
                    self.clear_current(&handle);
                    return Ok(true);
                }
                Attempt::Skipped(reason) => debug!(?route, "tts: route skipped: {reason}"),
                Attempt::Superseded => {
                    debug!(?route, "tts: superseded by a newer request");
                    return Ok(false);
                }
                Attempt::Failed(reason) => {
                    warn!(?route, "tts: route failed: {reason}");
                    last_error = Some(reason);
                }
            }
        }

        Err(VoiceError::SynthesisFailure(
            last_error.unwrap_or_else(|| "no speech route available".into()),
        ))
    }

    /// Interrupt current speech and cancel any request still being prepared.
    ///
    /// Waits for a handle that is being started to either be discarded or
    /// become current, so nothing can go live after this returns.
    pub async fn stop(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let _switch = self.switch.lock().await;
        self.halt_current().await;
    }

    pub fn is_speaking(&self) -> bool {
        self.lock_current()
            .as_ref()
            .is_some_and(|handle| handle.is_live())
    }

    async fn try_local(&self, epoch: u64, text: &str, preset_id: &str, speed: f32) -> Attempt {
        let Some(voice) = self.resolver.voice_for(preset_id).await else {
            return Attempt::Skipped("no local voice for preset");
        };
        let utterance = Utterance {
            text: text.to_string(),
            voice,
            rate: speed,
        };
        self.go_live(epoch, self.local.speak(&utterance)).await
    }

    async fn try_remote(&self, epoch: u64, text: &str, voice_id: &str, speed: f32) -> Attempt {
        let clip = match self.backend.synthesize(text, voice_id, speed).await {
            Ok(clip) => clip,
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        if self.superseded(epoch) {
            debug!(bytes = clip.len(), "tts: discarding stale clip");
            return Attempt::Superseded;
        }
        if let Err(e) = parse_wav_header(&clip) {
            return Attempt::Failed(format!("backend returned unplayable audio: {e}"));
        }
        self.go_live(epoch, self.clips.play(clip)).await
    }

    /// Replace the live handle with the one `start` produces.
    async fn go_live<F>(&self, epoch: u64, start: F) -> Attempt
    where
        F: Future<Output = std::result::Result<PlaybackHandle, DeviceError>>,
    {
        let _switch = self.switch.lock().await;
        if self.superseded(epoch) {
            return Attempt::Superseded;
        }
        self.halt_current().await;

        let handle = match start.await {
            Ok(handle) => Arc::new(handle),
            Err(e) => return Attempt::Failed(e.to_string()),
        };
        if self.superseded(epoch) {
            handle.stop();
            return Attempt::Superseded;
        }
        *self.lock_current() = Some(handle.clone());
        Attempt::Played(handle)
    }

    async fn halt_current(&self) {
        let previous = self.lock_current().take();
        if let Some(handle) = previous {
            handle.stop();
            if tokio::time::timeout(STOP_GRACE, handle.finished()).await.is_err() {
                warn!(playback = handle.id(), "tts: playback did not stop in time");
            }
        }
    }

    fn clear_current(&self, handle: &PlaybackHandle) {
        let mut current = self.lock_current();
        if current.as_ref().is_some_and(|c| c.id() == handle.id()) {
            *current = None;
        }
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<Arc<PlaybackHandle>>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
