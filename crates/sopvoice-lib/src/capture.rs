//! Microphone capture using cpal.
//!
//! [`CpalCaptureDevice`] opens the system default input and delivers mono
//! i16 chunks at the requested sample rate, regardless of the device's
//! native format/rate/channel count. cpal offers no echo cancellation or
//! noise suppression; those constraints are accepted and logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use sopvoice_core::types::CaptureConstraints;

use crate::device::{AudioCaptureDevice, CaptureStream};
use crate::error::DeviceError;

#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCaptureDevice;

impl CpalCaptureDevice {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioCaptureDevice for CpalCaptureDevice {
    fn is_available(&self) -> bool {
        cpal::default_host().default_input_device().is_some()
    }

    async fn open(&self, constraints: &CaptureConstraints) -> Result<CaptureStream, DeviceError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            DeviceError::Unavailable(
                "No microphone found. Please connect an audio input device.".into(),
            )
        })?;

        let supported = device
            .default_input_config()
            .map_err(|e| DeviceError::Denied(format!("Failed to get audio config: {e}")))?;

        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();
        let target_rate = constraints.sample_rate;
        let config: cpal::StreamConfig = supported.into();

        debug!(
            native_rate,
            channels,
            target_rate,
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            "capture: opening input stream"
        );

        let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), DeviceError>>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();

        // cpal Stream is !Send on macOS: must live on a dedicated OS thread.
        let thread = std::thread::Builder::new()
            .name("sopvoice-capture".into())
            .spawn(move || {
                let on_error = |err: cpal::StreamError| error!("capture: stream error: {err}");
                let stream = match sample_format {
                    SampleFormat::I16 => {
                        let stop = stop_thread.clone();
                        device.build_input_stream(
                            &config,
                            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                                if stop.load(Ordering::Relaxed) {
                                    return;
                                }
                                let mono = mix_to_mono(data, channels);
                                let _ = tx.send(resample_linear(&mono, native_rate, target_rate));
                            },
                            on_error,
                            None,
                        )
                    }
                    SampleFormat::F32 => {
                        let stop = stop_thread.clone();
                        device.build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                                if stop.load(Ordering::Relaxed) {
                                    return;
                                }
                                let i16_data: Vec<i16> = data
                                    .iter()
                                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                                    .collect();
                                let mono = mix_to_mono(&i16_data, channels);
                                let _ = tx.send(resample_linear(&mono, native_rate, target_rate));
                            },
                            on_error,
                            None,
                        )
                    }
                    other => {
                        let _ = ready_tx.send(Err(DeviceError::Failed(format!(
                            "unsupported sample format: {other:?}"
                        ))));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::Denied(format!(
                            "failed to build input stream: {e}"
                        ))));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::Failed(format!(
                        "failed to start input stream: {e}"
                    ))));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stop signal
                loop {
                    std::thread::park();
                    if stop_thread.load(Ordering::Relaxed) {
                        break;
                    }
                }
                // stream dropped here: stops cpal
            })
            .map_err(|e| DeviceError::Failed(format!("failed to spawn capture thread: {e}")))?;

        let guard = CaptureGuard {
            stop,
            thread: Some(thread),
        };

        match ready_rx.await {
            Ok(Ok(())) => Ok(CaptureStream::new(rx, target_rate, guard)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Failed("capture thread exited before starting".into())),
        }
    }
}

/// Keeps the capture thread (and with it the cpal stream) alive.
struct CaptureGuard {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Audio processing helpers
// ---------------------------------------------------------------------------

/// Mix multi-channel audio to mono by averaging channels.
fn mix_to_mono(input: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return input.to_vec();
    }
    let ch = channels as usize;
    input
        .chunks_exact(ch)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Resample using linear interpolation. Good enough for speech.
fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() || to_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (input.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;
        let s0 = input[idx] as f64;
        let s1 = if idx + 1 < input.len() {
            input[idx + 1] as f64
        } else {
            s0
        };
        output.push((s0 + frac * (s1 - s0)) as i16);
    }
    output
}
