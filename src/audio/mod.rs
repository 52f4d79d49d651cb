//! # Audio Module
//!
//! Everything that happens to audio between the socket and the response
//! pipeline.
//!
//! ## Key Components:
//! - **Session Buffer**: ordered, byte-exact store of compressed fragments
//! - **Session**: one recording attempt and its metadata
//! - **Session Machine**: the per-connection Idle / Recording / Processing logic
//! - **Observers**: side-channel hooks notified on every accepted fragment
//! - **PCM**: the canonical decoded waveform shared by all adapters
//!
//! ## Canonical PCM Format:
//! - **Bit Depth**: 16-bit signed
//! - **Channels**: Mono (multi-channel input is down-mixed)
//! - **Sample Rate**: carried alongside the samples, whatever the source used

pub mod buffer;
pub mod machine;
pub mod observer;
pub mod pcm;
pub mod session;
