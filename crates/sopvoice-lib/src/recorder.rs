//! Recorder: one capture session at a time, finalized into a WAV clip.
//!
//! ```text
//! Idle ──start()──▶ Starting ──stream open──▶ Recording ──stop()──▶ Stopping ──▶ Idle
//!                      └──open failed──▶ Idle      └──cancel()──▶ Idle
//! ```
//!
//! Every state change goes through [`transition`]; anything outside the
//! table above is rejected. `Starting` is taken under the lock before the
//! stream is opened, so overlapping `start()` calls cannot open two streams.
//! The reservation carries the id of the `start()` that took it, and only
//! that call may turn it into `Recording`.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sopvoice_core::types::{AudioClip, CaptureConstraints, RecorderPhase};
use sopvoice_core::wav::{compute_rms, pcm_duration_ms, write_wav};

use crate::device::{AudioCaptureDevice, CaptureStream};
use crate::error::{Result, VoiceError};

pub struct Recorder {
    device: Arc<dyn AudioCaptureDevice>,
    constraints: CaptureConstraints,
    state: Mutex<RecorderState>,
    next_session: AtomicU64,
}

enum RecorderState {
    Idle,
    /// Reserved by the `start()` holding this session id.
    Starting(u64),
    Recording(CaptureSession),
    Stopping,
}

impl RecorderState {
    fn phase(&self) -> RecorderPhase {
        match self {
            Self::Idle => RecorderPhase::Idle,
            Self::Starting(_) => RecorderPhase::Starting,
            Self::Recording(_) => RecorderPhase::Recording,
            Self::Stopping => RecorderPhase::Stopping,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InvalidTransition {
    from: RecorderPhase,
    to: RecorderPhase,
}

/// Apply a state change, returning the previous state. Rejected changes
/// leave `state` untouched and drop `next` (releasing any session in it).
///
/// `Starting → Recording` is only accepted for the session that holds the
/// reservation.
fn transition(
    state: &mut RecorderState,
    next: RecorderState,
) -> std::result::Result<RecorderState, InvalidTransition> {
    use RecorderPhase::*;
    let (from, to) = (state.phase(), next.phase());
    let allowed = match (&*state, &next) {
        (RecorderState::Starting(reserved), RecorderState::Recording(session)) => {
            *reserved == session.id
        }
        _ => matches!(
            (from, to),
            (Idle, Starting)
                | (Starting, Idle)
                | (Recording, Stopping)
                | (Recording, Idle)
                | (Stopping, Idle)
        ),
    };
    if !allowed {
        return Err(InvalidTransition { from, to });
    }
    Ok(std::mem::replace(state, next))
}

/// One recording attempt, from microphone-open to audio-finalized.
struct CaptureSession {
    id: u64,
    started_at: Instant,
    sample_rate: u32,
    stop_tx: oneshot::Sender<()>,
    collector: JoinHandle<Vec<Vec<i16>>>,
    stream_guard: Box<dyn Any + Send>,
}

impl CaptureSession {
    fn begin(id: u64, stream: CaptureStream) -> Self {
        let sample_rate = stream.sample_rate();
        let (chunks, stream_guard) = stream.into_parts();
        let (stop_tx, stop_rx) = oneshot::channel();
        let collector = tokio::spawn(collect_chunks(chunks, stop_rx));
        Self {
            id,
            started_at: Instant::now(),
            sample_rate,
            stop_tx,
            collector,
            stream_guard,
        }
    }

    /// Release the hardware, then gather every chunk it produced.
    async fn finish(self) -> (Vec<i16>, u32) {
        drop(self.stream_guard);
        let _ = self.stop_tx.send(());
        let chunks = self.collector.await.unwrap_or_default();
        debug!(
            session = self.id,
            chunks = chunks.len(),
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "recorder: session finished"
        );
        (chunks.concat(), self.sample_rate)
    }
}

async fn collect_chunks(
    mut rx: mpsc::UnboundedReceiver<Vec<i16>>,
    mut stop_rx: oneshot::Receiver<()>,
) -> Vec<Vec<i16>> {
    let mut chunks = Vec::new();
    loop {
        tokio::select! {
            biased;
            chunk = rx.recv() => match chunk {
                Some(c) if !c.is_empty() => chunks.push(c),
                Some(_) => {}
                None => break,
            },
            _ = &mut stop_rx => break,
        }
    }
    while let Ok(c) = rx.try_recv() {
        if !c.is_empty() {
            chunks.push(c);
        }
    }
    chunks
}

impl Recorder {
    pub fn new(device: Arc<dyn AudioCaptureDevice>, constraints: CaptureConstraints) -> Self {
        Self {
            device,
            constraints,
            state: Mutex::new(RecorderState::Idle),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn phase(&self) -> RecorderPhase {
        self.lock().phase()
    }

    pub fn is_recording(&self) -> bool {
        self.phase() == RecorderPhase::Recording
    }

    /// Open a capture session.
    ///
    /// Returns `Ok(false)` without touching the device when a session is
    /// already starting, running or stopping.
    pub async fn start(&self) -> Result<bool> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.lock();
            if let Err(rejected) = transition(&mut state, RecorderState::Starting(id)) {
                warn!("recorder: already recording ({:?})", rejected.from);
                return Ok(false);
            }
        }

        let stream = match self.device.open(&self.constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                let mut state = self.lock();
                // A cancel may have handed the reservation to a newer start().
                if matches!(*state, RecorderState::Starting(reserved) if reserved == id) {
                    let _ = transition(&mut state, RecorderState::Idle);
                }
                warn!("recorder: failed to open stream: {e}");
                return Err(VoiceError::RecordingStart(e.to_string()));
            }
        };

        let session = CaptureSession::begin(id, stream);
        match transition(&mut self.lock(), RecorderState::Recording(session)) {
            Ok(_) => {
                info!(session = id, "recording started");
                Ok(true)
            }
            Err(_) => Err(VoiceError::RecordingStart(
                "recording was cancelled while starting".into(),
            )),
        }
    }

    /// Finalize the active session into one WAV clip and release the device.
    pub async fn stop(&self) -> Result<AudioClip> {
        let session = {
            let mut state = self.lock();
            match transition(&mut state, RecorderState::Stopping) {
                Ok(RecorderState::Recording(session)) => session,
                Ok(other) => {
                    // Unreachable by the table; put the state back.
                    *state = other;
                    return Err(VoiceError::NotRecording);
                }
                Err(_) => return Err(VoiceError::NotRecording),
            }
        };

        let (samples, sample_rate) = session.finish().await;
        let _ = transition(&mut self.lock(), RecorderState::Idle);

        let duration_ms = pcm_duration_ms(samples.len(), sample_rate);
        info!(
            duration_ms,
            rms = compute_rms(&samples),
            "recording stopped"
        );
        Ok(AudioClip::wav(write_wav(&samples, sample_rate), duration_ms))
    }

    /// Drop any active or starting session without producing audio.
    pub fn cancel(&self) {
        let mut state = self.lock();
        if matches!(state.phase(), RecorderPhase::Recording | RecorderPhase::Starting) {
            let _ = transition(&mut state, RecorderState::Idle);
            debug!("recorder: session cancelled");
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::testing::FakeCaptureDevice;
    use sopvoice_core::wav::parse_wav_header;

    fn recorder(device: &Arc<FakeCaptureDevice>) -> Recorder {
        Recorder::new(device.clone(), CaptureConstraints::default())
    }

    #[tokio::test]
    async fn start_then_stop_yields_wav_clip() {
        let device = FakeCaptureDevice::new();
        let rec = recorder(&device);

        assert!(rec.start().await.unwrap());
        assert_eq!(rec.phase(), RecorderPhase::Recording);
        device.send_chunk(vec![100; 800]);
        device.send_chunk(vec![]);
        device.send_chunk(vec![-100; 800]);

        let clip = rec.stop().await.unwrap();
        assert_eq!(rec.phase(), RecorderPhase::Idle);
        assert_eq!(device.live_streams(), 0);
        assert_eq!(clip.mime, "audio/wav");
        assert_eq!(clip.duration_ms, Some(100));
        let header = parse_wav_header(&clip.bytes).unwrap();
        assert_eq!(header.sample_rate, 16_000);
        assert_eq!(clip.bytes.len(), 44 + 1600 * 2);
    }

    #[tokio::test]
    async fn stop_while_idle_is_not_recording() {
        let device = FakeCaptureDevice::new();
        let rec = recorder(&device);
        assert_eq!(rec.stop().await.unwrap_err(), VoiceError::NotRecording);

        rec.start().await.unwrap();
        rec.stop().await.unwrap();
        assert_eq!(rec.stop().await.unwrap_err(), VoiceError::NotRecording);
    }

    #[tokio::test]
    async fn second_start_is_noop() {
        let device = FakeCaptureDevice::new();
        let rec = recorder(&device);
        assert!(rec.start().await.unwrap());
        assert!(!rec.start().await.unwrap());
        assert_eq!(device.opens(), 1);
        assert_eq!(device.live_streams(), 1);
    }

    #[tokio::test]
    async fn concurrent_starts_open_one_stream() {
        let device = FakeCaptureDevice::new();
        let rec = recorder(&device);
        let (a, b) = tokio::join!(rec.start(), rec.start());
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(device.opens(), 1);
        assert_eq!(device.max_live_streams(), 1);
    }

    #[tokio::test]
    async fn failed_open_returns_to_idle() {
        let device = FakeCaptureDevice::failing(DeviceError::Denied("revoked".into()));
        let rec = recorder(&device);
        let err = rec.start().await.unwrap_err();
        assert_eq!(err, VoiceError::RecordingStart("denied: revoked".into()));
        assert_eq!(rec.phase(), RecorderPhase::Idle);
        assert_eq!(device.live_streams(), 0);
    }

    #[tokio::test]
    async fn cancel_releases_without_audio() {
        let device = FakeCaptureDevice::new();
        let rec = recorder(&device);
        rec.start().await.unwrap();
        device.send_chunk(vec![1; 160]);
        rec.cancel();
        assert_eq!(rec.phase(), RecorderPhase::Idle);
        assert_eq!(device.live_streams(), 0);
        assert_eq!(rec.stop().await.unwrap_err(), VoiceError::NotRecording);
    }

    #[tokio::test]
    async fn mixed_sequence_never_overlaps_sessions() {
        let device = FakeCaptureDevice::new();
        let rec = recorder(&device);
        for step in 0..12 {
            match step % 4 {
                0 | 1 => {
                    let _ = rec.start().await;
                }
                2 => {
                    let _ = rec.stop().await;
                }
                _ => {
                    assert_eq!(rec.stop().await.unwrap_err(), VoiceError::NotRecording);
                }
            }
            assert!(device.live_streams() <= 1);
        }
        assert_eq!(device.max_live_streams(), 1);
        assert_eq!(device.opens(), 3);
    }

    #[tokio::test]
    async fn cancelled_start_cannot_take_a_newer_reservation() {
        let device = FakeCaptureDevice::gated();
        let rec = Arc::new(recorder(&device));

        let first = {
            let rec = rec.clone();
            tokio::spawn(async move { rec.start().await })
        };
        while device.opens() < 1 {
            tokio::task::yield_now().await;
        }
        rec.cancel();
        assert_eq!(rec.phase(), RecorderPhase::Idle);

        let second = {
            let rec = rec.clone();
            tokio::spawn(async move { rec.start().await })
        };
        while device.opens() < 2 {
            tokio::task::yield_now().await;
        }

        // The cancelled open finishes first and must be discarded.
        device.release_open();
        assert!(matches!(
            first.await.unwrap(),
            Err(VoiceError::RecordingStart(_))
        ));
        assert_eq!(rec.phase(), RecorderPhase::Starting);
        assert_eq!(device.live_streams(), 0);

        device.release_open();
        assert!(second.await.unwrap().unwrap());
        assert_eq!(rec.phase(), RecorderPhase::Recording);
        assert_eq!(device.live_streams(), 1);
        assert_eq!(device.max_live_streams(), 1);
    }

    #[test]
    fn transition_table_rejects_skips() {
        let mut state = RecorderState::Idle;
        assert!(transition(&mut state, RecorderState::Stopping).is_err());
        assert!(transition(&mut state, RecorderState::Idle).is_err());
        assert!(transition(&mut state, RecorderState::Starting(1)).is_ok());
        assert!(transition(&mut state, RecorderState::Starting(2)).is_err());
        assert!(transition(&mut state, RecorderState::Idle).is_ok());
        assert_eq!(state.phase(), RecorderPhase::Idle);
    }

    #[tokio::test]
    async fn recording_needs_the_matching_reservation() {
        let device = FakeCaptureDevice::new();
        let stream = device.open(&CaptureConstraints::default()).await.unwrap();

        let mut state = RecorderState::Starting(7);
        let stranger = CaptureSession::begin(8, stream);
        assert!(transition(&mut state, RecorderState::Recording(stranger)).is_err());
        assert_eq!(state.phase(), RecorderPhase::Starting);
        assert_eq!(device.live_streams(), 0);

        let stream = device.open(&CaptureConstraints::default()).await.unwrap();
        let owner = CaptureSession::begin(7, stream);
        assert!(transition(&mut state, RecorderState::Recording(owner)).is_ok());
        assert_eq!(state.phase(), RecorderPhase::Recording);
    }
}
