/// Metrics collection and exposure
use crate::errors::{DaemonError, DaemonResult};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Instant;

fn metrics_err(e: prometheus::Error) -> DaemonError {
    DaemonError::MetricsError(e.to_string())
}

/// Metrics collector
pub struct MetricsCollector {
    registry: Registry,

    // Request metrics
    pub requests_total: IntCounterVec,
    pub request_duration: Histogram,

    // Workflow metrics
    pub transitions_total: IntCounterVec,
    pub mutation_duration: Histogram,

    // Event metrics
    pub events_published: IntCounter,
    pub subscribers_dropped: IntCounter,
    pub sse_streams_active: IntGauge,

    server_start: Instant,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("qcflow_http_requests_total", "HTTP requests by method and status"),
            &["method", "status"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(requests_total.clone()))
            .map_err(metrics_err)?;

        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "qcflow_http_request_duration_seconds",
            "HTTP request duration",
        ))
        .map_err(metrics_err)?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(metrics_err)?;

        let transitions_total = IntCounterVec::new(
            Opts::new(
                "qcflow_workflow_transitions_total",
                "Workflow commands by action and outcome",
            ),
            &["action", "outcome"],
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(transitions_total.clone()))
            .map_err(metrics_err)?;

        let mutation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "qcflow_workflow_mutation_duration_seconds",
                "Time from command arrival to commit or rejection, slot wait included",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(mutation_duration.clone()))
            .map_err(metrics_err)?;

        let events_published =
            IntCounter::new("qcflow_events_published_total", "Events published to the hub")
                .map_err(metrics_err)?;
        registry
            .register(Box::new(events_published.clone()))
            .map_err(metrics_err)?;

        let subscribers_dropped = IntCounter::new(
            "qcflow_subscribers_dropped_total",
            "Subscribers torn down for a full or closed queue",
        )
        .map_err(metrics_err)?;
        registry
            .register(Box::new(subscribers_dropped.clone()))
            .map_err(metrics_err)?;

        let sse_streams_active =
            IntGauge::new("qcflow_sse_streams_active", "Open notification streams")
                .map_err(metrics_err)?;
        registry
            .register(Box::new(sse_streams_active.clone()))
            .map_err(metrics_err)?;

        Ok(MetricsCollector {
            registry,
            requests_total,
            request_duration,
            transitions_total,
            mutation_duration,
            events_published,
            subscribers_dropped,
            sse_streams_active,
            server_start: Instant::now(),
        })
    }

    /// Record a completed HTTP request
    pub fn record_request(&self, method: &str, status: u16, duration_secs: f64) {
        self.requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
        self.request_duration.observe(duration_secs);
    }

    /// Record a workflow command; `outcome` is "ok" or an error kind
    pub fn record_transition(&self, action: &str, outcome: &str, duration_secs: f64) {
        self.transitions_total
            .with_label_values(&[action, outcome])
            .inc();
        self.mutation_duration.observe(duration_secs);
    }

    pub fn record_event_published(&self) {
        self.events_published.inc();
    }

    pub fn record_subscriber_dropped(&self) {
        self.subscribers_dropped.inc();
    }

    pub fn record_stream_opened(&self) {
        self.sse_streams_active.inc();
    }

    pub fn record_stream_closed(&self) {
        self.sse_streams_active.dec();
    }

    /// Seconds since the collector was created
    pub fn uptime_secs(&self) -> u64 {
        self.server_start.elapsed().as_secs()
    }

    /// Get all metrics in Prometheus format
    pub fn gather_metrics(&self) -> DaemonResult<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        prometheus::Encoder::encode(&prometheus::TextEncoder::new(), &families, &mut buffer)
            .map_err(metrics_err)?;
        String::from_utf8(buffer).map_err(|e| DaemonError::MetricsError(e.to_string()))
    }
}
