//! # Voice Session Wire Protocol
//!
//! Defines what travels over the `/ws` connection in both directions.
//!
//! ## Client → Server:
//! - **Binary frames**: compressed audio fragments (typically WebM/Opus)
//! - **Text frames**: JSON control messages with a required `action` field
//!   (`"start_recording"` or `"stop_recording"`)
//!
//! ## Server → Client:
//! JSON text frames with a required `type` field:
//! - `{"type": "transcript", "text": "..."}`
//! - `{"type": "audio", "data": "<base64 WAV>", "format": "wav"}`
//! - `{"type": "error", "code": "decode_failed", "message": "..."}`
//! - `{"type": "complete"}`

use base64::Engine;
use serde::{Deserialize, Serialize};

/// Sentinel transcript sent when the recognizer heard nothing it understood.
pub const UNINTELLIGIBLE_TRANSCRIPT: &str = "Could not understand audio";

/// Sentinel transcript sent when the recognizer could not be used at all.
pub const SERVICE_ERROR_TRANSCRIPT: &str = "Speech recognition service unavailable";

/// A parsed client control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Start,
    Stop,
    /// Well-formed JSON with an action this server does not know
    Unknown(String),
    /// Not JSON, or JSON without a usable `action`
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct ControlMessage {
    action: String,
}

impl ControlEvent {
    /// Parse a text frame into a control event. Never fails.
    pub fn parse(text: &str) -> Self {
        match serde_json::from_str::<ControlMessage>(text) {
            Ok(message) => match message.action.as_str() {
                "start_recording" => ControlEvent::Start,
                "stop_recording" => ControlEvent::Stop,
                _ => ControlEvent::Unknown(text.to_string()),
            },
            Err(err) => ControlEvent::Malformed(err.to_string()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::Start => "start_recording",
            ControlEvent::Stop => "stop_recording",
            ControlEvent::Unknown(_) => "unknown",
            ControlEvent::Malformed(_) => "malformed",
        }
    }
}

/// Machine-stable reasons for user-visible failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stop arrived without any buffered audio
    NoAudioData,
    /// The recording grew past the per-session byte cap
    SessionTooLarge,
    /// Every decode strategy failed
    DecodeFailed,
    /// Primary and fallback synthesis failed
    SynthesisFailed,
    /// Synthesized audio could not be encoded for the wire
    EncodeFailed,
}

impl ErrorKind {
    /// Code sent to the client in the `code` field.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NoAudioData => "no_audio_data",
            ErrorKind::SessionTooLarge => "session_too_large",
            ErrorKind::DecodeFailed => "decode_failed",
            ErrorKind::SynthesisFailed => "synthesis_failed",
            ErrorKind::EncodeFailed => "encode_failed",
        }
    }

    /// Short human-readable reason sent in the `message` field.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::NoAudioData => "No audio data received",
            ErrorKind::SessionTooLarge => "Recording exceeded the maximum session size",
            ErrorKind::DecodeFailed => "Could not decode audio",
            ErrorKind::SynthesisFailed => "Could not synthesize a spoken response",
            ErrorKind::EncodeFailed => "Could not encode the spoken response",
        }
    }
}

/// Everything the server ever reports back for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingResult {
    Transcript(String),
    AudioResponse { data: Vec<u8>, format: String },
    Error(ErrorKind),
    Complete,
}

impl ProcessingResult {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingResult::Transcript(_) => "transcript",
            ProcessingResult::AudioResponse { .. } => "audio",
            ProcessingResult::Error(_) => "error",
            ProcessingResult::Complete => "complete",
        }
    }

    /// Serialize to the JSON text frame sent to the client.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&OutboundMessage::from(self))
    }
}

/// JSON shape of a server → client text frame.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Transcript { text: String },
    Audio { data: String, format: String },
    Error { code: String, message: String },
    Complete,
}

impl From<&ProcessingResult> for OutboundMessage {
    fn from(result: &ProcessingResult) -> Self {
        match result {
            ProcessingResult::Transcript(text) => OutboundMessage::Transcript { text: text.clone() },
            ProcessingResult::AudioResponse { data, format } => OutboundMessage::Audio {
                data: base64::engine::general_purpose::STANDARD.encode(data),
                format: format.clone(),
            },
            ProcessingResult::Error(kind) => OutboundMessage::Error {
                code: kind.code().to_string(),
                message: kind.message().to_string(),
            },
            ProcessingResult::Complete => OutboundMessage::Complete,
        }
    }
}
