//! Prometheus metrics for probe cycles
//!
//! [`ProbeMetrics`] is constructed once at startup against a [`Registry`] and
//! passed to every probe. Each probe resolves its own [`TargetMetrics`] (the
//! label children for its `{name, broker}` pair) so that the hot path never
//! looks up label values again.
//!
//! All counters are monotonic and never reset; the underlying prometheus
//! types are atomics, so concurrent probes can increment without locking.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use tokio::time::Instant;

const LABELS: [&str; 2] = ["name", "broker"];

/// Process-wide metric families, labelled by probe name and broker
#[derive(Clone)]
pub struct ProbeMetrics {
    registry: Registry,
    started: IntCounterVec,
    completed: IntCounterVec,
    duration: HistogramVec,
    published: IntCounterVec,
    publish_timeouts: IntCounterVec,
    received: IntCounterVec,
    timeouts: IntCounterVec,
    errors: IntCounterVec,
}

fn counter_vec(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &LABELS)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl ProbeMetrics {
    /// Create and register all metric families
    ///
    /// Fails if the families are already registered on `registry`.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let duration = HistogramVec::new(
            HistogramOpts::new("probe_mqtt_duration_seconds", "Time taken to execute probe."),
            &LABELS,
        )?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            started: counter_vec(
                registry,
                "probe_mqtt_started_total",
                "Number of started probes.",
            )?,
            completed: counter_vec(
                registry,
                "probe_mqtt_completed_total",
                "Number of completed probes.",
            )?,
            duration,
            published: counter_vec(
                registry,
                "probe_mqtt_messages_published_total",
                "Number of published messages.",
            )?,
            publish_timeouts: counter_vec(
                registry,
                "probe_mqtt_messages_publish_timeout_total",
                "Number of published messages that were not confirmed in time.",
            )?,
            received: counter_vec(
                registry,
                "probe_mqtt_messages_received_total",
                "Number of received messages.",
            )?,
            timeouts: counter_vec(
                registry,
                "probe_mqtt_timeouts_total",
                "Number of timed out tests.",
            )?,
            errors: counter_vec(
                registry,
                "probe_mqtt_errors_total",
                "Number of errors occurred during test execution.",
            )?,
        })
    }

    /// The registry the families were registered on
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resolve the label children for one target
    ///
    /// Resolving creates every series at zero, so they show up in the
    /// exposition before the first cycle finishes.
    pub fn target(&self, name: &str, broker: &str) -> TargetMetrics {
        let labels = [name, broker];
        TargetMetrics {
            started: self.started.with_label_values(&labels),
            completed: self.completed.with_label_values(&labels),
            duration: self.duration.with_label_values(&labels),
            published: self.published.with_label_values(&labels),
            publish_timeouts: self.publish_timeouts.with_label_values(&labels),
            received: self.received.with_label_values(&labels),
            timeouts: self.timeouts.with_label_values(&labels),
            errors: self.errors.with_label_values(&labels),
        }
    }

    /// Render every family of the registry in the Prometheus text format
    pub fn encode(&self) -> anyhow::Result<(String, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), String::from_utf8(buffer)?))
    }
}

/// Metric handles of a single `{name, broker}` pair
#[derive(Clone)]
pub struct TargetMetrics {
    pub started: IntCounter,
    pub completed: IntCounter,
    pub duration: Histogram,
    pub published: IntCounter,
    pub publish_timeouts: IntCounter,
    pub received: IntCounter,
    pub timeouts: IntCounter,
    pub errors: IntCounter,
}

impl TargetMetrics {
    /// Count a cycle as started
    ///
    /// The returned guard counts the cycle as completed and records its
    /// duration when dropped, whichever way the cycle exits.
    pub fn start_cycle(&self) -> CycleTimer<'_> {
        self.started.inc();
        CycleTimer {
            metrics: self,
            started: Instant::now(),
        }
    }
}

/// Drop guard returned by [`TargetMetrics::start_cycle`]
pub struct CycleTimer<'a> {
    metrics: &'a TargetMetrics,
    started: Instant,
}

impl CycleTimer<'_> {
    pub fn started(&self) -> Instant {
        self.started
    }
}

impl Drop for CycleTimer<'_> {
    fn drop(&mut self) {
        self.metrics.completed.inc();
        self.metrics
            .duration
            .observe(self.started.elapsed().as_secs_f64());
    }
}
