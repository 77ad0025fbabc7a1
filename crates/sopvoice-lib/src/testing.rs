//! Test doubles for every capability plus an in-process fake backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Multipart, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Semaphore, mpsc, watch};

use sopvoice_core::types::{CaptureConstraints, LocalVoice};
use sopvoice_core::wav::write_wav;

use crate::device::{
    AudioCaptureDevice, CaptureStream, ClipPlayer, PlaybackCompletion, PlaybackHandle,
    PlaybackSource, SpeechCatalog, SpeechPlayer, Utterance,
};
use crate::error::DeviceError;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn voice(id: &str, name: &str, lang: &str) -> LocalVoice {
    LocalVoice {
        id: id.into(),
        name: name.into(),
        lang: lang.into(),
    }
}

/// A short silent 16 kHz WAV clip.
pub(crate) fn wav_bytes(ms: usize) -> Vec<u8> {
    write_wav(&vec![0i16; 16 * ms], 16_000)
}

// ─── Capture ───────────────────────────────────────────────────────────────

pub(crate) struct FakeCaptureDevice {
    failure: Option<DeviceError>,
    /// When set, each open waits for one [`FakeCaptureDevice::release_open`].
    gate: Option<Semaphore>,
    opens: AtomicUsize,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
    sender: Mutex<Option<mpsc::UnboundedSender<Vec<i16>>>>,
}

struct LiveStream(Arc<AtomicUsize>);

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeCaptureDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None, None))
    }

    pub fn failing(err: DeviceError) -> Arc<Self> {
        Arc::new(Self::build(Some(err), None))
    }

    /// Opens block until released, in the order they were requested.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self::build(None, Some(Semaphore::new(0))))
    }

    pub fn release_open(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    fn build(failure: Option<DeviceError>, gate: Option<Semaphore>) -> Self {
        Self {
            failure,
            gate,
            opens: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
            sender: Mutex::new(None),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn live_streams(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live_streams(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Feed samples into the most recently opened stream.
    pub fn send_chunk(&self, chunk: Vec<i16>) {
        if let Some(tx) = lock(&self.sender).as_ref() {
            let _ = tx.send(chunk);
        }
    }
}

#[async_trait]
impl AudioCaptureDevice for FakeCaptureDevice {
    async fn open(&self, constraints: &CaptureConstraints) -> Result<CaptureStream, DeviceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match &self.gate {
            Some(gate) => {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            None => tokio::task::yield_now().await,
        }
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.sender) = Some(tx);
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
        Ok(CaptureStream::new(
            rx,
            constraints.sample_rate,
            LiveStream(self.live.clone()),
        ))
    }
}

// ─── Catalog ───────────────────────────────────────────────────────────────

pub(crate) struct FakeCatalog {
    tx: watch::Sender<Option<Vec<LocalVoice>>>,
}

impl FakeCatalog {
    pub fn loaded(voices: Vec<LocalVoice>) -> Arc<Self> {
        let (tx, _) = watch::channel(Some(voices));
        Arc::new(Self { tx })
    }

    /// A catalog that stays empty until [`FakeCatalog::load`] is called.
    pub fn pending() -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self { tx })
    }

    pub fn load(&self, voices: Vec<LocalVoice>) {
        self.tx.send_replace(Some(voices));
    }
}

#[async_trait]
impl SpeechCatalog for FakeCatalog {
    fn voices(&self) -> Vec<LocalVoice> {
        self.tx.borrow().clone().unwrap_or_default()
    }

    fn is_loaded(&self) -> bool {
        self.tx.borrow().is_some()
    }

    async fn voices_loaded(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|v| v.is_some()).await;
    }
}

// ─── Playback ──────────────────────────────────────────────────────────────

/// Shared record of everything the fake players did, so overlap can be
/// checked across local and remote playback together.
#[derive(Clone, Default)]
pub(crate) struct PlaybackLog {
    events: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl PlaybackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        lock(&self.events).clone()
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn push(&self, event: String) {
        lock(&self.events).push(event);
    }

    /// Start a fake playback that ends by itself after `duration`.
    fn start(&self, source: PlaybackSource, label: String, duration: Duration) -> PlaybackHandle {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.push(format!("start:{label}"));

        let ended = Arc::new(AtomicBool::new(false));
        let finish = {
            let log = self.clone();
            let ended = ended.clone();
            move |how: &str, label: &str| {
                if !ended.swap(true, Ordering::SeqCst) {
                    log.active.fetch_sub(1, Ordering::SeqCst);
                    log.push(format!("{how}:{label}"));
                    true
                } else {
                    false
                }
            }
        };

        // The completion only exists once the handle does; the stop closure
        // reads it through this slot.
        let slot: Arc<Mutex<Option<PlaybackCompletion>>> = Arc::default();
        let (handle, done) = PlaybackHandle::new(source, {
            let finish = finish.clone();
            let slot = slot.clone();
            let label = label.clone();
            move || {
                if finish("stop", &label) {
                    if let Some(done) = lock(&slot).as_ref() {
                        done.complete();
                    }
                }
            }
        });
        *lock(&slot) = Some(done.clone());

        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if finish("end", &label) {
                done.complete();
            }
        });
        handle
    }
}

pub(crate) struct FakeSpeechPlayer {
    log: PlaybackLog,
    duration: Duration,
    failure: Option<DeviceError>,
    rates: Mutex<Vec<f32>>,
}

impl FakeSpeechPlayer {
    pub fn new(log: &PlaybackLog, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            duration,
            failure: None,
            rates: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(log: &PlaybackLog, err: DeviceError) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            duration: Duration::ZERO,
            failure: Some(err),
            rates: Mutex::new(Vec::new()),
        })
    }

    pub fn rates(&self) -> Vec<f32> {
        lock(&self.rates).clone()
    }
}

#[async_trait]
impl SpeechPlayer for FakeSpeechPlayer {
    async fn speak(&self, utterance: &Utterance) -> Result<PlaybackHandle, DeviceError> {
        lock(&self.rates).push(utterance.rate);
        if let Some(err) = &self.failure {
            self.log.push(format!("fail:{}", utterance.voice.id));
            return Err(err.clone());
        }
        Ok(self
            .log
            .start(PlaybackSource::Local, utterance.voice.id.clone(), self.duration))
    }
}

pub(crate) struct FakeClipPlayer {
    log: PlaybackLog,
    duration: Duration,
    clips: AtomicUsize,
}

impl FakeClipPlayer {
    pub fn new(log: &PlaybackLog, duration: Duration) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            duration,
            clips: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ClipPlayer for FakeClipPlayer {
    async fn play(&self, clip: Vec<u8>) -> Result<PlaybackHandle, DeviceError> {
        if clip.is_empty() {
            return Err(DeviceError::Failed("empty clip".into()));
        }
        let n = self.clips.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self
            .log
            .start(PlaybackSource::Remote, format!("clip{n}"), self.duration))
    }
}

// ─── Fake backend ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct SynthCall {
    pub text: String,
    pub voice_id: String,
    pub speed: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UploadCall {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
}

/// In-process stand-in for the REST backend's voice endpoints.
#[derive(Clone)]
pub(crate) struct FakeBackend {
    pub upload_status: StatusCode,
    pub upload_body: Value,
    /// `/voice/synthesize` answers 500 for these voice ids.
    pub broken_voices: Vec<String>,
    /// `/voice/synthesize` answers 200 with a non-audio body for these.
    pub garbled_voices: Vec<String>,
    synth_calls: Arc<Mutex<Vec<SynthCall>>>,
    uploads: Arc<Mutex<Vec<UploadCall>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            upload_status: StatusCode::OK,
            upload_body: json!({ "transcription": "  how do I reset the pump?  " }),
            broken_voices: Vec::new(),
            garbled_voices: Vec::new(),
            synth_calls: Arc::default(),
            uploads: Arc::default(),
        }
    }

    pub fn with_upload(mut self, status: StatusCode, body: Value) -> Self {
        self.upload_status = status;
        self.upload_body = body;
        self
    }

    pub fn with_broken_voice(mut self, voice: &str) -> Self {
        self.broken_voices.push(voice.into());
        self
    }

    pub fn with_garbled_voice(mut self, voice: &str) -> Self {
        self.garbled_voices.push(voice.into());
        self
    }

    pub fn synth_calls(&self) -> Vec<SynthCall> {
        lock(&self.synth_calls).clone()
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        lock(&self.uploads).clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/voice/upload", post(upload))
            .route("/voice/synthesize", post(synthesize))
            .route("/voice/voices", get(voices))
            .with_state(self.clone())
    }

    /// Serve on an ephemeral port; returns the base URL.
    pub async fn spawn(&self) -> String {
        spawn_router(self.router()).await
    }
}

pub(crate) async fn spawn_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A base URL nothing listens on.
pub(crate) async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn upload(State(backend): State<FakeBackend>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let size = field.bytes().await.map(|b| b.len()).unwrap_or(0);
        lock(&backend.uploads).push(UploadCall {
            field: name,
            file_name,
            content_type,
            size,
        });
    }
    (backend.upload_status, Json(backend.upload_body.clone())).into_response()
}

async fn synthesize(State(backend): State<FakeBackend>, Query(call): Query<SynthCall>) -> Response {
    let voice_id = call.voice_id.clone();
    lock(&backend.synth_calls).push(call);
    if backend.broken_voices.contains(&voice_id) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": "Speech synthesis failed: voice offline" })),
        )
            .into_response();
    }
    if backend.garbled_voices.contains(&voice_id) {
        return ([(header::CONTENT_TYPE, "text/plain")], "not audio").into_response();
    }
    ([(header::CONTENT_TYPE, "audio/wav")], wav_bytes(20)).into_response()
}

async fn voices() -> Json<Value> {
    Json(json!({
        "voices": [
            { "id": "alloy", "name": "Alloy", "description": "Neutral, balanced voice" },
            { "id": "nova", "name": "Nova", "description": "Warm, friendly voice" },
        ]
    }))
}
