//! Remote clip playback through rodio.
//!
//! rodio's `OutputStream` is `!Send`, so all audio lives on one dedicated OS
//! thread. The async side talks to it over a std channel; each clip gets its
//! own `Sink`, and a stop request only affects the clip it was issued for.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::device::{ClipPlayer, PlaybackCompletion, PlaybackHandle, PlaybackSource};
use crate::error::DeviceError;

/// How often the playback thread checks whether the current clip ended.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

enum PlayCmd {
    Play {
        clip_id: u64,
        clip: Vec<u8>,
        done: PlaybackCompletion,
        started: oneshot::Sender<Result<(), DeviceError>>,
    },
    Stop(u64),
}

pub struct RodioClipPlayer {
    cmd_tx: mpsc::Sender<PlayCmd>,
    next_clip: AtomicU64,
}

impl RodioClipPlayer {
    /// Start the playback thread. The output device is opened lazily by that
    /// thread; without one every `play` fails with `Unavailable`.
    pub fn spawn() -> Result<Self, DeviceError> {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("sopvoice-playback".into())
            .spawn(move || playback_thread(cmd_rx))
            .map_err(|e| DeviceError::Failed(format!("failed to spawn playback thread: {e}")))?;
        Ok(Self::with_sender(cmd_tx))
    }

    fn with_sender(cmd_tx: mpsc::Sender<PlayCmd>) -> Self {
        Self {
            cmd_tx,
            next_clip: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl ClipPlayer for RodioClipPlayer {
    async fn play(&self, clip: Vec<u8>) -> Result<PlaybackHandle, DeviceError> {
        let clip_id = self.next_clip.fetch_add(1, Ordering::Relaxed);
        let (handle, done) = PlaybackHandle::new(PlaybackSource::Remote, {
            let tx = self.cmd_tx.clone();
            move || {
                let _ = tx.send(PlayCmd::Stop(clip_id));
            }
        });

        let (started_tx, started_rx) = oneshot::channel();
        self.cmd_tx
            .send(PlayCmd::Play {
                clip_id,
                clip,
                done,
                started: started_tx,
            })
            .map_err(|_| DeviceError::Failed("playback thread has exited".into()))?;

        started_rx
            .await
            .map_err(|_| DeviceError::Failed("playback thread dropped the clip".into()))??;
        Ok(handle)
    }
}

fn playback_thread(cmd_rx: mpsc::Receiver<PlayCmd>) {
    let (_stream, stream_handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            error!("playback: failed to open audio output: {e}");
            while let Ok(cmd) = cmd_rx.recv() {
                if let PlayCmd::Play { started, .. } = cmd {
                    let _ = started.send(Err(DeviceError::Unavailable(format!(
                        "no audio output: {e}"
                    ))));
                }
            }
            return;
        }
    };

    let mut current: Option<(u64, Sink, PlaybackCompletion)> = None;

    loop {
        if current.as_ref().is_some_and(|(_, sink, _)| sink.empty()) {
            if let Some((clip_id, _, done)) = current.take() {
                debug!(clip_id, "playback: clip finished");
                done.complete();
            }
        }

        match cmd_rx.recv_timeout(POLL_INTERVAL) {
            Ok(PlayCmd::Play {
                clip_id,
                clip,
                done,
                started,
            }) => {
                if let Some((old, sink, old_done)) = current.take() {
                    debug!(clip_id = old, "playback: replaced by newer clip");
                    sink.stop();
                    old_done.complete();
                }

                let source = match Decoder::new(Cursor::new(clip)) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = started.send(Err(DeviceError::Failed(format!(
                            "undecodable clip: {e}"
                        ))));
                        continue;
                    }
                };
                let sink = match Sink::try_new(&stream_handle) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = started.send(Err(DeviceError::Failed(format!(
                            "failed to create sink: {e}"
                        ))));
                        continue;
                    }
                };
                sink.append(source);
                debug!(clip_id, "playback: clip started");
                let _ = started.send(Ok(()));
                current = Some((clip_id, sink, done));
            }
            Ok(PlayCmd::Stop(clip_id)) => {
                if current.as_ref().is_some_and(|(id, _, _)| *id == clip_id) {
                    if let Some((_, sink, done)) = current.take() {
                        sink.stop();
                        done.complete();
                        debug!(clip_id, "playback: clip stopped");
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if let Some((_, sink, done)) = current.take() {
                    sink.stop();
                    done.complete();
                }
                break;
            }
        }
    }
}
