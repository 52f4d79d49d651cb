//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (APP_SERVER__PORT, APP_SESSION__IDLE_TIMEOUT_SECS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::adapters::decoder::FormatHint;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one part of the service: the HTTP listener, the
/// per-connection session machine, the decode strategies, the speech
/// collaborators and the optional artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub decoder: DecoderConfig,
    pub speech: SpeechConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Per-connection session behaviour.
///
/// ## Fields:
/// - `idle_timeout_secs`: how long a connection may go without a client event
///   before it is closed (applies in every state)
/// - `timeout_check_interval_secs`: how often each connection checks its idle timer
/// - `max_session_bytes`: cap on buffered audio for one recording
/// - `echo_fragments`: diagnostic mode that sends every fragment straight back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub idle_timeout_secs: u64,
    pub timeout_check_interval_secs: u64,
    pub max_session_bytes: usize,
    pub echo_fragments: bool,
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_check_interval_secs)
    }
}

/// Decode strategy settings.
///
/// The three strategies are always tried in the same order:
/// 1. the ingress container (`webm`)
/// 2. the same container with the named alternate codec (`opus`) as a probe hint
/// 3. the payload interpreted as raw 16-bit little-endian PCM, unless it
///    opens with a known container signature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    pub container: String,
    pub alternate_codec: String,
    pub raw_sample_rate: u32,
    pub raw_channels: u16,
}

impl DecoderConfig {
    /// Build the ordered decode strategy list.
    pub fn strategies(&self) -> Vec<FormatHint> {
        vec![
            FormatHint::Container {
                extension: self.container.clone(),
                codec: None,
            },
            FormatHint::Container {
                extension: self.container.clone(),
                codec: Some(self.alternate_codec.clone()),
            },
            FormatHint::RawPcm {
                sample_rate: self.raw_sample_rate,
                channels: self.raw_channels,
            },
        ]
    }
}

/// Endpoints of the external speech collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    pub transcriber_url: String,
    pub synthesizer_url: String,
    pub fallback_synthesizer_url: Option<String>,
    pub request_timeout_secs: u64,
    pub language: String,
}

/// Optional on-disk copies of session audio (diagnostics only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub enabled: bool,
    pub recordings_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
            },
            session: SessionConfig {
                idle_timeout_secs: 300,
                timeout_check_interval_secs: 5,
                max_session_bytes: 50 * 1024 * 1024,
                echo_fragments: false,
            },
            decoder: DecoderConfig {
                container: "webm".to_string(),
                alternate_codec: "opus".to_string(),
                raw_sample_rate: 16000,
                raw_channels: 1,
            },
            speech: SpeechConfig {
                transcriber_url: "http://127.0.0.1:5002/transcribe".to_string(),
                synthesizer_url: "http://127.0.0.1:5003/tts".to_string(),
                fallback_synthesizer_url: None,
                request_timeout_secs: 30,
                language: "en".to_string(),
            },
            storage: StorageConfig {
                enabled: true,
                recordings_dir: "recordings".to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_STORAGE__ENABLED=false`: Stop writing recordings to disk
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.idle_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Idle timeout must be greater than 0"));
        }

        if self.session.timeout_check_interval_secs == 0
            || self.session.timeout_check_interval_secs > self.session.idle_timeout_secs
        {
            return Err(anyhow::anyhow!(
                "Timeout check interval must be between 1 and the idle timeout ({}s)",
                self.session.idle_timeout_secs
            ));
        }

        if self.session.max_session_bytes == 0 {
            return Err(anyhow::anyhow!("Max session bytes must be greater than 0"));
        }

        if self.decoder.raw_sample_rate == 0 || self.decoder.raw_channels == 0 {
            return Err(anyhow::anyhow!("Raw PCM sample rate and channels must be greater than 0"));
        }

        if self.speech.transcriber_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcriber URL cannot be empty"));
        }

        if self.speech.synthesizer_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Synthesizer URL cannot be empty"));
        }

        if self.storage.enabled && self.storage.recordings_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Recordings directory cannot be empty when storage is enabled"));
        }

        Ok(())
    }
}
