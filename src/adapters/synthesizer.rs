//! # Text-to-Speech Adapter
//!
//! [`Synthesizer`] turns response text into canonical PCM. The production
//! setup is a [`FallbackSynthesizer`] wrapping a primary [`HttpSynthesizer`]
//! and, when configured, a second endpoint tried only if the first fails.

use crate::audio::pcm::Pcm;
use crate::error::SynthesizeError;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Pcm, SynthesizeError>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
}

/// Synthesizer backed by an HTTP service that answers `{"text": ...}` with WAV bytes.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    url: String,
    name: String,
}

impl HttpSynthesizer {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            name: name.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Pcm, SynthesizeError> {
        if text.trim().is_empty() {
            return Err(SynthesizeError::EmptyText);
        }

        tracing::debug!(synthesizer = %self.name, chars = text.len(), "requesting synthesis");

        let response = self
            .client
            .post(&self.url)
            .json(&SynthesisRequest { text })
            .send()
            .await
            .map_err(|e| SynthesizeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(synthesizer = %self.name, status = %status, body = %body, "synthesis service error");
            return Err(SynthesizeError::Request(format!("status {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesizeError::Request(e.to_string()))?;

        let pcm = Pcm::from_wav_bytes(&bytes).map_err(|e| SynthesizeError::InvalidAudio(e.to_string()))?;
        tracing::info!(
            synthesizer = %self.name,
            duration_secs = pcm.duration_seconds(),
            "synthesis complete"
        );
        Ok(pcm)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Tries a primary synthesizer, then an optional fallback.
pub struct FallbackSynthesizer {
    primary: Arc<dyn Synthesizer>,
    fallback: Option<Arc<dyn Synthesizer>>,
}

impl FallbackSynthesizer {
    pub fn new(primary: Arc<dyn Synthesizer>, fallback: Option<Arc<dyn Synthesizer>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Synthesizer for FallbackSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Pcm, SynthesizeError> {
        let primary_err = match self.primary.synthesize(text).await {
            Ok(pcm) => return Ok(pcm),
            Err(e) => e,
        };
        tracing::warn!(synthesizer = self.primary.name(), error = %primary_err, "primary synthesis failed");

        let Some(fallback) = &self.fallback else {
            return Err(SynthesizeError::Exhausted);
        };

        match fallback.synthesize(text).await {
            Ok(pcm) => {
                tracing::info!(synthesizer = fallback.name(), "fallback synthesis succeeded");
                Ok(pcm)
            }
            Err(e) => {
                tracing::error!(synthesizer = fallback.name(), error = %e, "fallback synthesis failed");
                Err(SynthesizeError::Exhausted)
            }
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSynthesizer {
        name: &'static str,
        samples: Option<Vec<i16>>,
        calls: AtomicUsize,
    }

    impl StubSynthesizer {
        fn ok(name: &'static str, samples: Vec<i16>) -> Arc<Self> {
            Arc::new(Self {
                name,
                samples: Some(samples),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                samples: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Synthesizer for StubSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Pcm, SynthesizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.samples {
                Some(samples) => Ok(Pcm::new(samples.clone(), 22050)),
                None => Err(SynthesizeError::Request("stub failure".into())),
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = StubSynthesizer::ok("primary", vec![1]);
        let fallback = StubSynthesizer::ok("fallback", vec![2]);
        let synth = FallbackSynthesizer::new(primary.clone(), Some(fallback.clone()));

        assert_eq!(synth.synthesize("hi").await.unwrap().samples, vec![1]);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_used_when_primary_fails() {
        let primary = StubSynthesizer::failing("primary");
        let fallback = StubSynthesizer::ok("fallback", vec![2]);
        let synth = FallbackSynthesizer::new(primary.clone(), Some(fallback.clone()));

        assert_eq!(synth.synthesize("hi").await.unwrap().samples, vec![2]);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_both_failing_is_exhausted() {
        let synth = FallbackSynthesizer::new(
            StubSynthesizer::failing("primary"),
            Some(StubSynthesizer::failing("fallback")),
        );
        assert!(matches!(synth.synthesize("hi").await, Err(SynthesizeError::Exhausted)));

        let no_fallback = FallbackSynthesizer::new(StubSynthesizer::failing("primary"), None);
        assert!(matches!(no_fallback.synthesize("hi").await, Err(SynthesizeError::Exhausted)));
    }

    #[tokio::test]
    async fn test_http_synthesizer_rejects_empty_text() {
        let synth = HttpSynthesizer::new("primary", "http://127.0.0.1:9/tts", Duration::from_secs(1)).unwrap();
        assert!(matches!(synth.synthesize("   ").await, Err(SynthesizeError::EmptyText)));
    }
}
