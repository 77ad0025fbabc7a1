//! Microphone permission gate.

use std::sync::Arc;

use tracing::{debug, warn};

use sopvoice_core::types::CaptureConstraints;

use crate::device::AudioCaptureDevice;
use crate::error::{Result, VoiceError};

/// Requests microphone access without keeping any audio.
#[derive(Clone)]
pub struct PermissionGate {
    device: Arc<dyn AudioCaptureDevice>,
}

impl PermissionGate {
    pub fn new(device: Arc<dyn AudioCaptureDevice>) -> Self {
        Self { device }
    }

    /// Open an audio-only stream and release it at once. Each call prompts
    /// (where the platform prompts) exactly once.
    pub async fn request_microphone_access(&self) -> Result<()> {
        match self.device.open(&CaptureConstraints::default()).await {
            Ok(stream) => {
                stream.release();
                debug!("permission: microphone access granted");
                Ok(())
            }
            Err(e) => {
                warn!("permission: microphone access denied: {e}");
                Err(VoiceError::PermissionDenied(e.to_string()))
            }
        }
    }
}
