//! # Speech-to-Text Adapter
//!
//! The pipeline only sees the [`Transcriber`] trait. The production
//! implementation forwards the canonical waveform, encoded as WAV, to an
//! HTTP recognition service and reads back `{"text": "..."}`.
//!
//! ## Error Mapping:
//! - **Unintelligible**: the service answered but returned no text
//! - **ServiceUnavailable**: connection failure, timeout or a 5xx status
//! - **Other**: the service rejected the request (4xx) or sent an unreadable body

use crate::audio::pcm::Pcm;
use crate::error::TranscribeError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, pcm: &Pcm) -> Result<String, TranscribeError>;

    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &str;
}

#[derive(Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    text: String,
}

/// Transcriber backed by an HTTP speech recognition service.
pub struct HttpTranscriber {
    client: reqwest::Client,
    url: String,
    language: String,
}

impl HttpTranscriber {
    pub fn new(url: impl Into<String>, language: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            language: language.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, pcm: &Pcm) -> Result<String, TranscribeError> {
        if pcm.is_empty() {
            return Err(TranscribeError::Unintelligible);
        }

        let wav = pcm
            .to_wav_bytes()
            .map_err(|e| TranscribeError::Other(format!("could not encode WAV: {}", e)))?;
        tracing::debug!(audio_bytes = wav.len(), duration_secs = pcm.duration_seconds(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::Other(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("language", self.language.clone());

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url = %self.url, "transcription request failed");
                TranscribeError::ServiceUnavailable(e.to_string())
            })?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription service error");
            return Err(TranscribeError::ServiceUnavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription request rejected");
            return Err(TranscribeError::Other(format!("status {}", status)));
        }

        let result: TranscriptResponse = response
            .json()
            .await
            .map_err(|e| TranscribeError::Other(format!("invalid response body: {}", e)))?;

        let text = result.text.trim();
        if text.is_empty() {
            return Err(TranscribeError::Unintelligible);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_audio_is_unintelligible() {
        let transcriber = HttpTranscriber::new("http://127.0.0.1:9/transcribe", "en", Duration::from_secs(1)).unwrap();
        let result = transcriber.transcribe(&Pcm::new(Vec::new(), 16000)).await;
        assert!(matches!(result, Err(TranscribeError::Unintelligible)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        // Port 9 (discard) is not listening on loopback in test environments
        let transcriber = HttpTranscriber::new("http://127.0.0.1:9/transcribe", "en", Duration::from_secs(2)).unwrap();
        let result = transcriber.transcribe(&Pcm::new(vec![0; 160], 16000)).await;
        assert!(matches!(result, Err(TranscribeError::ServiceUnavailable(_))));
    }
}
