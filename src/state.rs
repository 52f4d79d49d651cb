//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every WebSocket actor.
//!
//! Per-connection session state is deliberately absent: each connection
//! owns its session machine outright. What is shared is read-only (the
//! configuration, the response pipeline and its adapters) or a counter.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: many owners of the same data, across threads
//! - **Here**: every actix worker thread and every connection actor holds a
//!   clone of the same `Arc<ResponsePipeline>`
//!
//! ### RwLock
//! - **Purpose**: many readers OR one writer
//! - **Here**: guards the metrics, which are written on every request and
//!   every connection event but read only by the metrics endpoints
//!
//! ### Lock poisoning
//! A lock is poisoned if a thread panicked while holding it. Counters are
//! still meaningful after that, so the guard is recovered with
//! `PoisonError::into_inner` instead of propagating the panic.

use crate::config::AppConfig;
use crate::pipeline::{PipelineOutcome, ResponsePipeline};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// State shared across all handlers and connections.
///
/// ## Rust Concepts:
/// - **#[derive(Clone)]**: cloning only bumps the `Arc` reference counts;
///   all clones see the same metrics and pipeline
#[derive(Debug, Clone)]
pub struct AppState {
    /// Effective configuration, fixed at startup
    pub config: Arc<AppConfig>,

    /// Decode → transcribe → synthesize, built once and shared by all connections
    pub pipeline: Arc<ResponsePipeline>,

    /// Counters updated by middleware and connection actors
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected since server start.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// HTTP requests processed (including WebSocket upgrades)
    pub request_count: u64,

    /// HTTP requests that ended in a 4xx/5xx
    pub error_count: u64,

    /// Currently open `/ws` connections
    pub active_connections: u32,

    /// Recordings begun (first fragment or explicit start)
    pub sessions_started: u64,

    /// Pipeline runs that reached `complete`
    pub sessions_completed: u64,

    /// Pipeline runs where no decode strategy worked
    pub decode_failures: u64,

    /// Fragments received while a pipeline run was in flight
    pub rejected_fragments: u64,

    /// Unknown, malformed or out-of-order control messages
    pub ignored_controls: u64,

    /// Connections closed by the idle timeout
    pub connection_timeouts: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific HTTP endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Arc<ResponsePipeline>) -> Self {
        Self {
            config: Arc::new(config),
            pipeline,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.as_ref().clone()
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Called by middleware for every 4xx/5xx response.
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// ## HashMap operations:
    /// The first request to an endpoint creates its entry with `.or_default()`;
    /// later requests update it in place.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn connection_opened(&self) {
        self.metrics_write().active_connections += 1;
    }

    /// Saturates at zero.
    pub fn connection_closed(&self) {
        let mut metrics = self.metrics_write();
        metrics.active_connections = metrics.active_connections.saturating_sub(1);
    }

    pub fn record_session_started(&self) {
        self.metrics_write().sessions_started += 1;
    }

    pub fn record_pipeline_outcome(&self, outcome: PipelineOutcome) {
        let mut metrics = self.metrics_write();
        match outcome {
            PipelineOutcome::Completed => metrics.sessions_completed += 1,
            PipelineOutcome::DecodeFailed => metrics.decode_failures += 1,
        }
    }

    pub fn record_rejected_fragment(&self) {
        self.metrics_write().rejected_fragments += 1;
    }

    pub fn record_ignored_control(&self) {
        self.metrics_write().ignored_controls += 1;
    }

    pub fn record_connection_timeout(&self) {
        self.metrics_write().connection_timeouts += 1;
    }

    /// Copy of the current metrics, so no lock is held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::adapters::transcriber::Transcriber;
    use crate::adapters::{NoopArtifactStore, SymphoniaDecoder, Synthesizer};
    use crate::audio::pcm::Pcm;
    use crate::error::{SynthesizeError, TranscribeError};
    use async_trait::async_trait;

    struct SilentTranscriber;

    #[async_trait]
    impl Transcriber for SilentTranscriber {
        async fn transcribe(&self, _pcm: &Pcm) -> Result<String, TranscribeError> {
            Err(TranscribeError::Unintelligible)
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    pub(crate) struct SilentSynthesizer;

    #[async_trait]
    impl Synthesizer for SilentSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Pcm, SynthesizeError> {
            Ok(Pcm::new(vec![0; 16], 16000))
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    /// AppState wired with offline collaborators, for handler tests.
    pub(crate) fn test_state() -> AppState {
        test_state_with(AppConfig::default(), Arc::new(SilentSynthesizer))
    }

    /// Like [`test_state`] with a custom config and synthesizer.
    pub(crate) fn test_state_with(config: AppConfig, synthesizer: Arc<dyn Synthesizer>) -> AppState {
        let pipeline = ResponsePipeline::new(
            Arc::new(SymphoniaDecoder::new()),
            Arc::new(SilentTranscriber),
            synthesizer,
            Arc::new(NoopArtifactStore),
            config.decoder.strategies(),
        );
        AppState::new(config, Arc::new(pipeline))
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state();
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_connection_counter_saturates() {
        let state = test_state();
        state.connection_opened();
        state.connection_closed();
        state.connection_closed();
        assert_eq!(state.get_metrics_snapshot().active_connections, 0);
    }

    #[test]
    fn test_pipeline_outcomes_counted_separately() {
        let state = test_state();
        state.record_pipeline_outcome(PipelineOutcome::Completed);
        state.record_pipeline_outcome(PipelineOutcome::DecodeFailed);
        state.record_pipeline_outcome(PipelineOutcome::Completed);

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.sessions_completed, 2);
        assert_eq!(snapshot.decode_failures, 1);
    }
}
