//! Error types for sopvoice-lib

use thiserror::Error;

/// Voice operation errors.
///
/// None of these are fatal to the host application: on any of them the
/// conversation continues as text-only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VoiceError {
    /// No microphone access
    #[error("Microphone permission is required for voice functionality: {0}")]
    PermissionDenied(String),

    /// Capture stream could not be acquired
    #[error("Could not start recording: {0}")]
    RecordingStart(String),

    /// `stop()` called while not recording
    #[error("Not currently recording")]
    NotRecording,

    /// Transcription service unreachable or failed
    #[error("Failed to transcribe audio: {0}")]
    TranscriptionFailure(String),

    /// Neither local nor remote speech could be played
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Other backend request failed
    #[error("Voice backend request failed: {0}")]
    Backend(String),

    /// Audio file the backend cannot accept
    #[error("Unsupported audio: {0}")]
    UnsupportedAudio(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for voice operations
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Failures reported by a platform capability (microphone, local synthesis
/// engine, audio output). Components map these into [`VoiceError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Capability not present on this machine
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The platform refused access
    #[error("denied: {0}")]
    Denied(String),

    /// Present and permitted, but the operation failed
    #[error("failed: {0}")]
    Failed(String),
}
