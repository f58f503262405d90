//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: effective configuration (read-only after startup)
//! - **metrics**: request and chunk counters, updated by the middleware and the sessions
//! - **registry**: the live-connection set behind `/health`
//! - **pipeline**: the chunk processor shared by all connections
//!
//! ## Arc<RwLock<T>> Pattern
//! Mutable parts are wrapped in `Arc<RwLock<T>>`: many handlers can read at once, one
//! writer at a time. A poisoned lock is recovered with `PoisonError::into_inner`; the
//! critical sections are single counter updates.

use crate::config::AppConfig;
use crate::session::{AudioPipeline, ConnectionRegistry};
use crate::transcription::{self, Transcriber};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Effective configuration
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and chunk counters
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Live WebSocket connections
    pub registry: ConnectionRegistry,

    /// Per-chunk processor shared by all sessions
    pub pipeline: Arc<AudioPipeline>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected since server start.
///
/// ## HTTP side (maintained by `MetricsMiddleware`):
/// - **request_count** / **error_count**: every request, and those answered with 4xx/5xx
/// - **endpoint_metrics**: per `"METHOD /path"` breakdown
///
/// ## Streaming side (maintained by the WebSocket sessions):
/// - **connections_total**: accepted connections, including closed ones
/// - **chunks_received** / **chunks_transcribed** / **chunks_failed**: binary frames
///   and how they ended
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub connections_total: u64,
    pub chunks_received: u64,
    pub chunks_transcribed: u64,
    pub chunks_failed: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a single endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Build the state with the transcription backend selected by `config`.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let backend = transcription::build_transcriber(&config)?;
        Self::with_transcriber(config, backend)
    }

    /// Build the state around an explicit backend (tests, embedding).
    pub fn with_transcriber(config: AppConfig, backend: Arc<dyn Transcriber>) -> anyhow::Result<Self> {
        let client = transcription::with_bounds(backend, &config);
        let pipeline = AudioPipeline::from_config(&config, client)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry: ConnectionRegistry::new(),
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        })
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately so readers never hold it across an await.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn with_metrics(&self, update: impl FnOnce(&mut AppMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut metrics);
    }

    pub fn increment_request_count(&self) {
        self.with_metrics(|m| m.request_count += 1);
    }

    pub fn increment_error_count(&self) {
        self.with_metrics(|m| m.error_count += 1);
    }

    /// Record one request against `endpoint` (e.g. `"GET /health"`).
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        self.with_metrics(|m| {
            let endpoint_metric = m.endpoint_metrics.entry(endpoint.to_string()).or_default();
            endpoint_metric.request_count += 1;
            endpoint_metric.total_duration_ms += duration_ms;
            if is_error {
                endpoint_metric.error_count += 1;
            }
        });
    }

    pub fn record_connection_opened(&self) {
        self.with_metrics(|m| m.connections_total += 1);
    }

    pub fn record_chunk_received(&self) {
        self.with_metrics(|m| m.chunks_received += 1);
    }

    /// Record how a chunk ended: transcribed, or answered with an error frame.
    pub fn record_chunk_outcome(&self, success: bool) {
        self.with_metrics(|m| {
            if success {
                m.chunks_transcribed += 1;
            } else {
                m.chunks_failed += 1;
            }
        });
    }

    /// Consistent copy of all counters, taken under one read lock.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Live connection count, identical to what `/health` reports.
    pub fn active_connections(&self) -> usize {
        self.registry.size()
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

    /// Fraction of requests answered with an error, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
