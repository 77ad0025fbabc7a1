//! sopvoice-lib: Voice engine for the SOP Assistant client.
//!
//! Microphone capture and recording, backend transcription, local voice
//! resolution, speech playback with remote fallback, and a local HTTP API.
//! Platform access goes through the capability traits in [`device`];
//! depends on sopvoice-core for pure types and text processing.

pub mod capture;
pub mod catalog;
pub mod client;
pub mod device;
pub mod error;
pub mod espeak;
pub mod manager;
pub mod permission;
pub mod playback;
pub mod recorder;
pub mod server;
pub mod stt;
pub mod tts;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Result, VoiceError};

// Re-export sopvoice-core for convenience
pub use sopvoice_core;
