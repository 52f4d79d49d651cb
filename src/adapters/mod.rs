//! # External Collaborator Adapters
//!
//! Boundary wrappers that expose decoding, speech recognition, speech
//! synthesis and artifact storage through fixed traits. They are built once
//! at startup, shared across connections behind `Arc`, and replaced by stubs
//! in tests.

pub mod decoder;
pub mod storage;
pub mod synthesizer;
pub mod transcriber;

pub use decoder::SymphoniaDecoder;
pub use storage::{ArtifactStore, FsArtifactStore, NoopArtifactStore};
pub use synthesizer::{FallbackSynthesizer, HttpSynthesizer, Synthesizer};
pub use transcriber::HttpTranscriber;
