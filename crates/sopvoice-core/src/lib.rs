//! sopvoice-core: Pure types and text processing.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod message;
pub mod presets;
pub mod text_prep;
pub mod types;
pub mod wav;
