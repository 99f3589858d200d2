//! Optional telemetry and metrics adapters.
//!
//! Ingestion reports spans, breadcrumbs, captured errors, counters and
//! gauges through a [`Telemetry`] handle. Both sinks are optional and every
//! call is a no-op when the matching sink is not installed.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Key/value pairs attached to a metric or captured error.
pub type Tags<'a> = &'a [(&'a str, &'a str)];

/// Tracing/error-reporting backend.
pub trait TelemetrySink: Send + Sync {
    fn span_finished(&self, name: &str, elapsed: Duration);
    fn breadcrumb(&self, category: &str, message: &str);
    fn capture_error(&self, error: &(dyn std::error::Error + 'static), tags: Tags<'_>);
}

/// Metrics backend.
pub trait MetricsSink: Send + Sync {
    fn counter(&self, name: &str, value: u64, tags: Tags<'_>);
    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>);
}

/// Cheap-to-clone handle over the optional sinks.
#[derive(Clone, Default)]
pub struct Telemetry {
    sink: Option<Arc<dyn TelemetrySink>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("sink", &self.sink.is_some())
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl Telemetry {
    /// A handle with no sinks; every call is a no-op.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `fut`, reporting its wall time as a span named `name`.
    pub async fn span<F: Future>(&self, name: &str, fut: F) -> F::Output {
        let Some(sink) = &self.sink else {
            return fut.await;
        };
        let start = Instant::now();
        let output = fut.await;
        sink.span_finished(name, start.elapsed());
        output
    }

    pub fn breadcrumb(&self, category: &str, message: &str) {
        if let Some(sink) = &self.sink {
            sink.breadcrumb(category, message);
        }
    }

    pub fn capture(&self, error: &(dyn std::error::Error + 'static), tags: Tags<'_>) {
        if let Some(sink) = &self.sink {
            sink.capture_error(error, tags);
        }
    }

    pub fn counter(&self, name: &str, value: u64, tags: Tags<'_>) {
        if let Some(metrics) = &self.metrics {
            metrics.counter(name, value, tags);
        }
    }

    pub fn increment(&self, name: &str, tags: Tags<'_>) {
        self.counter(name, 1, tags);
    }

    pub fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        if let Some(metrics) = &self.metrics {
            metrics.gauge(name, value, tags);
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Telemetry sink that writes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn span_finished(&self, name: &str, elapsed: Duration) {
        tracing::debug!(span = name, elapsed_ms = elapsed.as_millis() as u64, "Span finished");
    }

    fn breadcrumb(&self, category: &str, message: &str) {
        tracing::debug!(category, "{message}");
    }

    fn capture_error(&self, error: &(dyn std::error::Error + 'static), tags: Tags<'_>) {
        let tags = format_tags(tags);
        tracing::error!(error = %error, tags = %tags, "Captured error");
    }
}

fn format_tags(tags: Tags<'_>) -> String {
    let mut sorted: Vec<_> = tags.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn metric_key(name: &str, tags: Tags<'_>) -> String {
    if tags.is_empty() {
        name.to_string()
    } else {
        format!("{name}{{{}}}", format_tags(tags))
    }
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
}

/// Metrics sink that keeps values in memory, keyed by `name{tag=value,...}`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<HashMap<String, u64>>,
    gauges: Mutex<HashMap<String, f64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of a counter across all tag combinations.
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{name}{{");
        match self.counters.lock() {
            Ok(counters) => counters
                .iter()
                .filter(|(k, _)| k.as_str() == name || k.starts_with(&prefix))
                .map(|(_, v)| *v)
                .sum(),
            Err(_) => 0,
        }
    }

    /// Last value of an untagged gauge.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().ok()?.get(name).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.lock().map(|c| c.clone()).unwrap_or_default(),
            gauges: self.gauges.lock().map(|g| g.clone()).unwrap_or_default(),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn counter(&self, name: &str, value: u64, tags: Tags<'_>) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(metric_key(name, tags)).or_insert(0) += value;
        }
    }

    fn gauge(&self, name: &str, value: f64, tags: Tags<'_>) {
        if let Ok(mut gauges) = self.gauges.lock() {
            gauges.insert(metric_key(name, tags), value);
        }
    }
}
