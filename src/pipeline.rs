//! # Response Pipeline
//!
//! Runs once per stopped recording: decode → transcribe → synthesize →
//! encode, pushing [`ProcessingResult`]s into a sink as it goes.
//!
//! ## Result Sequences:
//! | Outcome                         | Results emitted                          |
//! |---------------------------------|------------------------------------------|
//! | success                         | Transcript, AudioResponse, Complete      |
//! | every decode strategy failed    | Error(decode_failed)                     |
//! | transcriber failed              | Transcript(sentinel), AudioResponse, Complete |
//! | synthesis failed                | Transcript, Error(synthesis_failed), Complete |
//! | wire encoding failed            | Transcript, Error(encode_failed), Complete |
//!
//! Artifact storage happens alongside and never changes the results.

use crate::adapters::decoder::{decode_with_fallback, AudioDecoder, FormatHint};
use crate::adapters::storage::ArtifactStore;
use crate::adapters::synthesizer::Synthesizer;
use crate::adapters::transcriber::Transcriber;
use crate::audio::machine::PipelineJob;
use crate::audio::pcm::Pcm;
use crate::error::{DecodeError, TranscribeError};
use crate::protocol::{ErrorKind, ProcessingResult, SERVICE_ERROR_TRANSCRIPT, UNINTELLIGIBLE_TRANSCRIPT};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives pipeline results in emission order.
pub trait ResultSink {
    fn emit(&mut self, result: ProcessingResult);
}

impl ResultSink for Vec<ProcessingResult> {
    fn emit(&mut self, result: ProcessingResult) {
        self.push(result);
    }
}

/// How a run ended, for metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Reached Complete (possibly after a transcription or synthesis error)
    Completed,
    /// Terminated early because no decode strategy worked
    DecodeFailed,
}

/// Decode → transcribe → synthesize, with the collaborators injected once at startup.
pub struct ResponsePipeline {
    decoder: Arc<dyn AudioDecoder>,
    transcriber: Arc<dyn Transcriber>,
    synthesizer: Arc<dyn Synthesizer>,
    store: Arc<dyn ArtifactStore>,
    strategies: Vec<FormatHint>,
}

impl fmt::Debug for ResponsePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsePipeline")
            .field("transcriber", &self.transcriber.name())
            .field("synthesizer", &self.synthesizer.name())
            .field("strategies", &self.strategies)
            .finish()
    }
}

/// Wire format tag for synthesized audio.
pub const RESPONSE_FORMAT: &str = "wav";

impl ResponsePipeline {
    pub fn new(
        decoder: Arc<dyn AudioDecoder>,
        transcriber: Arc<dyn Transcriber>,
        synthesizer: Arc<dyn Synthesizer>,
        store: Arc<dyn ArtifactStore>,
        strategies: Vec<FormatHint>,
    ) -> Self {
        Self {
            decoder,
            transcriber,
            synthesizer,
            store,
            strategies,
        }
    }

    pub fn transcriber_name(&self) -> &str {
        self.transcriber.name()
    }

    pub fn synthesizer_name(&self) -> &str {
        self.synthesizer.name()
    }

    /// Process one recording, emitting every result into `sink`.
    ///
    /// `connection` only labels logs and artifact names.
    pub async fn process<S>(&self, connection: &str, job: &PipelineJob, sink: &mut S) -> PipelineOutcome
    where
        S: ResultSink + Send,
    {
        let stem = artifact_stem(connection, job);
        info!(
            connection_id = %connection,
            session_id = %job.session_id,
            bytes = job.payload.len(),
            fragments = job.fragment_count,
            "processing recording"
        );

        // 1. Decode
        let pcm = match self.decode(job.payload.clone()).await {
            Ok(pcm) => {
                self.store_artifact(&format!("recording_{}.webm", stem), &job.payload).await;
                pcm
            }
            Err(e) => {
                error!(connection_id = %connection, session_id = %job.session_id, error = %e, "could not decode recording");
                self.store_artifact(&format!("raw_fallback_{}.webm", stem), &job.payload).await;
                sink.emit(ProcessingResult::Error(ErrorKind::DecodeFailed));
                return PipelineOutcome::DecodeFailed;
            }
        };

        debug!(
            session_id = %job.session_id,
            duration_secs = pcm.duration_seconds(),
            sample_rate = pcm.sample_rate,
            rms = pcm.rms(),
            "decoded waveform"
        );

        match pcm.to_wav_bytes() {
            Ok(wav) => self.store_artifact(&format!("recording_{}.wav", stem), &wav).await,
            Err(e) => warn!(error = %e, "could not encode canonical waveform for storage"),
        }

        // 2. Transcribe
        let text = match self.transcriber.transcribe(&pcm).await {
            Ok(text) => text,
            Err(TranscribeError::Unintelligible) => {
                info!(session_id = %job.session_id, "speech not understood");
                UNINTELLIGIBLE_TRANSCRIPT.to_string()
            }
            Err(e) => {
                warn!(session_id = %job.session_id, transcriber = self.transcriber.name(), error = %e, "transcription failed");
                SERVICE_ERROR_TRANSCRIPT.to_string()
            }
        };
        sink.emit(ProcessingResult::Transcript(text.clone()));

        // 3. Synthesize, 4. encode for the wire
        match self.synthesizer.synthesize(&text).await {
            Ok(speech) => match speech.to_wav_bytes() {
                Ok(wav) => {
                    self.store_artifact(&format!("response_{}.wav", stem), &wav).await;
                    debug!(session_id = %job.session_id, bytes = wav.len(), "sending audio response");
                    sink.emit(ProcessingResult::AudioResponse {
                        data: wav,
                        format: RESPONSE_FORMAT.to_string(),
                    });
                }
                Err(e) => {
                    error!(session_id = %job.session_id, error = %e, "could not encode synthesized audio");
                    sink.emit(ProcessingResult::Error(ErrorKind::EncodeFailed));
                }
            },
            Err(e) => {
                error!(session_id = %job.session_id, error = %e, "synthesis failed");
                sink.emit(ProcessingResult::Error(ErrorKind::SynthesisFailed));
            }
        }

        sink.emit(ProcessingResult::Complete);
        info!(connection_id = %connection, session_id = %job.session_id, "processing complete");
        PipelineOutcome::Completed
    }

    /// Run the pipeline and collect the results.
    #[cfg(test)]
    pub async fn run(&self, connection: &str, job: &PipelineJob) -> Vec<ProcessingResult> {
        let mut results = Vec::new();
        self.process(connection, job, &mut results).await;
        results
    }

    /// Decoding is CPU-bound, so it runs on the blocking pool.
    async fn decode(&self, payload: Arc<Vec<u8>>) -> Result<Pcm, DecodeError> {
        let decoder = self.decoder.clone();
        let strategies = self.strategies.clone();
        let attempts = strategies.len();

        tokio::task::spawn_blocking(move || decode_with_fallback(decoder.as_ref(), &payload, &strategies))
            .await
            .unwrap_or_else(|e| {
                error!(error = %e, "decode task panicked");
                Err(DecodeError::Exhausted { attempts })
            })
    }

    async fn store_artifact(&self, name: &str, bytes: &[u8]) {
        if let Err(e) = self.store.save(name, bytes).await {
            warn!(artifact = %name, error = %e, "could not store artifact");
        }
    }
}

/// `<YYYYmmdd_HHMMSS>_<first 8 chars of the connection id>_<session id>`
fn artifact_stem(connection: &str, job: &PipelineJob) -> String {
    let short: String = connection.chars().take(8).collect();
    format!("{}_{}_{}", job.started_at.format("%Y%m%d_%H%M%S"), short, job.session_id)
}
