//! Platform capabilities the voice engine depends on.
//!
//! Orchestration code never touches cpal, rodio or the synthesis engine
//! directly; it goes through these traits so tests can inject fakes.
//!
//! ```text
//! AudioCaptureDevice  → microphone (capture::CpalCaptureDevice)
//! SpeechCatalog       → local voice list (espeak::EspeakEngine)
//! SpeechPlayer        → local synthesis (espeak::EspeakEngine)
//! ClipPlayer          → remote clip playback (playback::RodioClipPlayer)
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use sopvoice_core::types::{CaptureConstraints, LocalVoice};

use crate::error::DeviceError;

// ─── Capture ───────────────────────────────────────────────────────────────

/// Source of live microphone audio.
#[async_trait]
pub trait AudioCaptureDevice: Send + Sync {
    /// Cheap probe: is there an input device at all?
    fn is_available(&self) -> bool {
        true
    }

    /// Open a live mono stream. Triggers the platform permission prompt if
    /// one exists.
    async fn open(&self, constraints: &CaptureConstraints) -> Result<CaptureStream, DeviceError>;
}

/// An open capture stream: mono i16 chunks plus whatever keeps the hardware
/// running. Dropping the stream releases the device.
pub struct CaptureStream {
    chunks: mpsc::UnboundedReceiver<Vec<i16>>,
    sample_rate: u32,
    guard: Box<dyn Any + Send>,
}

impl CaptureStream {
    pub fn new(
        chunks: mpsc::UnboundedReceiver<Vec<i16>>,
        sample_rate: u32,
        guard: impl Any + Send,
    ) -> Self {
        Self {
            chunks,
            sample_rate,
            guard: Box::new(guard),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Release the hardware immediately.
    pub fn release(self) {
        drop(self);
    }

    pub(crate) fn into_parts(self) -> (mpsc::UnboundedReceiver<Vec<i16>>, Box<dyn Any + Send>) {
        (self.chunks, self.guard)
    }
}

// ─── Local synthesis ───────────────────────────────────────────────────────

/// The local synthesis engine's voice list. It may load asynchronously and
/// be empty at first query.
#[async_trait]
pub trait SpeechCatalog: Send + Sync {
    fn voices(&self) -> Vec<LocalVoice>;

    /// Whether loading has finished; `voices()` is final once this is true.
    fn is_loaded(&self) -> bool;

    /// Resolves once the catalog has finished loading (possibly empty).
    async fn voices_loaded(&self);
}

/// Text to speak with a concrete local voice.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: LocalVoice,
    /// Playback rate, 1.0 = normal. Already clamped by the caller.
    pub rate: f32,
}

#[async_trait]
pub trait SpeechPlayer: Send + Sync {
    /// Start speaking. Returns once audio has started, not when it ends.
    async fn speak(&self, utterance: &Utterance) -> Result<PlaybackHandle, DeviceError>;
}

// ─── Clip playback ─────────────────────────────────────────────────────────

#[async_trait]
pub trait ClipPlayer: Send + Sync {
    /// Start playing an encoded audio clip.
    async fn play(&self, clip: Vec<u8>) -> Result<PlaybackHandle, DeviceError>;
}

// ─── Playback handle ───────────────────────────────────────────────────────

static NEXT_PLAYBACK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackSource {
    Local,
    Remote,
}

/// One live utterance or clip.
///
/// The capability that created it keeps the paired [`PlaybackCompletion`]
/// and fires it when audio ends or is stopped.
pub struct PlaybackHandle {
    id: u64,
    source: PlaybackSource,
    stop: Box<dyn Fn() + Send + Sync>,
    done: watch::Receiver<bool>,
}

/// Completion side of a [`PlaybackHandle`]. Dropping every clone also
/// counts as finished.
#[derive(Clone)]
pub struct PlaybackCompletion(Arc<watch::Sender<bool>>);

impl PlaybackCompletion {
    pub fn complete(&self) {
        self.0.send_replace(true);
    }
}

impl PlaybackHandle {
    /// `stop` must cancel the underlying audio; it may be called more than
    /// once.
    pub fn new(
        source: PlaybackSource,
        stop: impl Fn() + Send + Sync + 'static,
    ) -> (Self, PlaybackCompletion) {
        let (tx, rx) = watch::channel(false);
        let handle = Self {
            id: NEXT_PLAYBACK_ID.fetch_add(1, Ordering::Relaxed),
            source,
            stop: Box::new(stop),
            done: rx,
        };
        (handle, PlaybackCompletion(Arc::new(tx)))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source(&self) -> PlaybackSource {
        self.source
    }

    /// Cancel playback. Best effort and immediate; a finished handle is left
    /// alone.
    pub fn stop(&self) {
        if self.is_live() {
            (self.stop)();
        }
    }

    pub fn is_live(&self) -> bool {
        !*self.done.borrow() && self.done.has_changed().is_ok()
    }

    /// Wait until audio has ended or been stopped.
    pub async fn finished(&self) {
        let mut rx = self.done.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("live", &self.is_live())
            .finish()
    }
}
