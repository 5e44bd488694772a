//! # Application State Management
//!
//! Shared state accessed by HTTP handlers, the WebSocket actors, and the
//! relay pipeline simultaneously.
//!
//! ## Thread Safety Pattern:
//! All mutable data lives behind `Arc<RwLock<T>>`:
//! - Multiple requests can read the same data simultaneously
//! - Only one writer at a time
//! - Handlers clone snapshots out so locks are never held across awaits

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Relay metrics (constantly being updated by requests and pipeline runs)
    pub metrics: Arc<RwLock<RelayMetrics>>,

    /// When the server started (never changes, safe to share directly)
    pub start_time: Instant,
}

/// Metrics collected across HTTP requests, WebSocket traffic, and pipeline runs.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Total WebSocket messages received across all sessions
    pub messages_received: u64,

    /// Completed or attempted voice pipeline runs (transcribe→respond→synthesize)
    pub pipeline_runs: u64,

    /// Pipeline runs that ended in a collaborator failure
    pub pipeline_failures: u64,

    /// Current number of connected voice sessions
    pub active_sessions: u32,

    /// Detailed metrics for each HTTP endpoint
    /// Key: endpoint name (e.g., "GET /health")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(RelayMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// ## Why clone:
    /// Cloning releases the lock immediately, so other threads aren't blocked
    /// while the caller works with the snapshot.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Count one inbound WebSocket message (any type).
    pub fn record_message_received(&self) {
        self.write_metrics().messages_received += 1;
    }

    /// Count one voice pipeline run (successful or not).
    pub fn record_pipeline_run(&self) {
        self.write_metrics().pipeline_runs += 1;
    }

    /// Count a pipeline run that died on a collaborator failure.
    pub fn record_pipeline_failure(&self) {
        self.write_metrics().pipeline_failures += 1;
    }

    /// Record detailed metrics for a specific HTTP endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Increment the active sessions counter (called on WebSocket connect).
    pub fn increment_active_sessions(&self) {
        self.write_metrics().active_sessions += 1;
    }

    /// Decrement the active sessions counter (called on disconnect).
    ///
    /// ## Safety check:
    /// Guards against underflow; disconnect races could otherwise decrement
    /// more than was incremented.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.write_metrics();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// ## Why a snapshot:
    /// Clones the data under a read lock so the lock is not held while the
    /// HTTP response is serialized.
    pub fn get_metrics_snapshot(&self) -> RelayMetrics {
        let metrics = self.metrics.read().unwrap();
        RelayMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            messages_received: metrics.messages_received,
            pipeline_runs: metrics.pipeline_runs,
            pipeline_failures: metrics.pipeline_failures,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn write_metrics(&self) -> std::sync::RwLockWriteGuard<'_, RelayMetrics> {
        self.metrics.write().unwrap()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
