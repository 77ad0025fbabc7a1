//! Transcription client: one recorded clip in, one [`Transcription`] out.

use tracing::{debug, warn};

use sopvoice_core::types::{AudioClip, Transcription};

use crate::client::{BackendClient, UploadOutcome};
use crate::error::{Result, VoiceError};

#[derive(Clone)]
pub struct TranscriptionClient {
    backend: BackendClient,
}

impl TranscriptionClient {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }

    /// Send the clip to the backend once. No retry.
    ///
    /// A server-side `error` field is not a failure: it comes back as
    /// [`Transcription::Rejected`] carrying the server's own message.
    pub async fn transcribe(&self, clip: &AudioClip) -> Result<Transcription> {
        if clip.bytes.is_empty() {
            return Err(VoiceError::TranscriptionFailure("empty audio clip".into()));
        }

        let outcome = self.backend.upload_audio(clip).await.map_err(|e| {
            warn!("stt: {e}");
            VoiceError::TranscriptionFailure(e)
        })?;

        let reply = match outcome {
            UploadOutcome::Reply(reply) => reply,
            UploadOutcome::Failed(failure) => {
                warn!(status = failure.status, "stt: upload rejected");
                return Err(VoiceError::TranscriptionFailure(failure.reason()));
            }
        };

        if let Some(error) = reply.error {
            debug!("stt: backend error reply: {error}");
            return Ok(Transcription::Rejected(error));
        }
        match reply.transcription {
            Some(text) => {
                let text = text.trim().to_string();
                debug!(chars = text.len(), "stt: transcription received");
                Ok(Transcription::Text(text))
            }
            None => Err(VoiceError::TranscriptionFailure(
                "reply carried neither transcription nor error".into(),
            )),
        }
    }
}
