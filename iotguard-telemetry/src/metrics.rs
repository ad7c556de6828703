//! ## iotguard-telemetry::metrics
//! **Prometheus counters for the IPS loop and its response steps**

use prometheus::{Counter, Histogram, HistogramOpts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub polls: Counter,
    pub poll_errors: Counter,
    pub anomalies: Counter,
    pub captures_started: Counter,
    pub throttles_applied: Counter,
    pub throttle_failures: Counter,
    pub notification_failures: Counter,
    pub poll_duration: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<Counter, prometheus::Error> {
            let counter = Counter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let polls = counter("iotguard_polls_total", "Completed poll cycles")?;
        let poll_errors = counter(
            "iotguard_poll_errors_total",
            "Poll cycles aborted by a top-level error",
        )?;
        let anomalies = counter("iotguard_anomalies_total", "Threshold violations detected")?;
        let captures_started = counter(
            "iotguard_captures_started_total",
            "Capture sessions started",
        )?;
        let throttles_applied = counter(
            "iotguard_throttles_applied_total",
            "Rate limits installed",
        )?;
        let throttle_failures = counter(
            "iotguard_throttle_failures_total",
            "Rate limit installs or removals that failed",
        )?;
        let notification_failures = counter(
            "iotguard_notification_failures_total",
            "Alert deliveries that failed",
        )?;

        let poll_duration = Histogram::with_opts(
            HistogramOpts::new("iotguard_poll_duration_seconds", "Poll cycle duration")
                .buckets(vec![0.001, 0.01, 0.1, 1.0, 5.0]),
        )?;
        registry.register(Box::new(poll_duration.clone()))?;

        Ok(Self {
            registry,
            polls,
            poll_errors,
            anomalies,
            captures_started,
            throttles_applied,
            throttle_failures,
            notification_failures,
            poll_duration,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
