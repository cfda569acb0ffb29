//! Minimal in-process metrics registry: named counters, gauges, and
//! histograms, plus a snapshot export adapter driven by `TelemetryConfig`.
//! Spans are left to `tracing::info_span!` directly at call sites — this
//! module only owns the numeric rollups `tracing` doesn't track for you.
//!
//! Grounded on the teacher's `analytics` module (event-typed counters over
//! a dedicated store), generalized from a fixed `EventType` enum to an
//! open, string-keyed registry since the orchestration and scheduling
//! paths each need their own metric names.

use crate::config::TelemetryConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Histogram {
    samples: Vec<f64>,
}

impl Histogram {
    fn record(&mut self, value: f64) {
        self.samples.push(value);
    }

    fn summary(&self) -> HistogramSummary {
        if self.samples.is_empty() {
            return HistogramSummary::default();
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let sum: f64 = sorted.iter().sum();
        let count = sorted.len();
        let p50 = sorted[count / 2];
        let p99 = sorted[(count * 99 / 100).min(count - 1)];
        HistogramSummary { count, mean: sum / count as f64, p50, p99 }
    }
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub mean: f64,
    pub p50: f64,
    pub p99: f64,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, i64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

pub struct Telemetry {
    enabled: bool,
    counters: Mutex<HashMap<String, std::sync::Arc<AtomicU64>>>,
    gauges: Mutex<HashMap<String, std::sync::Arc<AtomicI64>>>,
    histograms: Mutex<HashMap<String, Histogram>>,
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self { enabled: config.enabled, counters: Mutex::new(HashMap::new()), gauges: Mutex::new(HashMap::new()), histograms: Mutex::new(HashMap::new()) }
    }

    pub fn incr(&self, name: &str, delta: u64) {
        if !self.enabled {
            return;
        }
        let mut counters = self.counters.lock().unwrap();
        counters.entry(name.to_string()).or_insert_with(|| std::sync::Arc::new(AtomicU64::new(0))).fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: i64) {
        if !self.enabled {
            return;
        }
        let mut gauges = self.gauges.lock().unwrap();
        gauges.entry(name.to_string()).or_insert_with(|| std::sync::Arc::new(AtomicI64::new(0))).store(value, Ordering::Relaxed);
    }

    pub fn observe(&self, name: &str, value: f64) {
        if !self.enabled {
            return;
        }
        self.histograms.lock().unwrap().entry(name.to_string()).or_default().record(value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed))).collect();
        let gauges = self.gauges.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed))).collect();
        let histograms = self.histograms.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.summary())).collect();
        MetricsSnapshot { counters, gauges, histograms }
    }

    /// Logs the current snapshot at `INFO`; intended to be driven by a
    /// periodic task at `export_interval_seconds`.
    pub fn export(&self) {
        if !self.enabled {
            return;
        }
        let snapshot = self.snapshot();
        tracing::info!(
            counters = ?snapshot.counters,
            gauges = ?snapshot.gauges,
            histograms = ?snapshot.histograms,
            "telemetry export"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let telemetry = Telemetry::new(&TelemetryConfig { enabled: true, export_interval_seconds: 60 });
        telemetry.incr("schedule.requests", 1);
        telemetry.incr("schedule.requests", 2);
        assert_eq!(telemetry.snapshot().counters["schedule.requests"], 3);
    }

    #[test]
    fn test_disabled_telemetry_is_a_no_op() {
        let telemetry = Telemetry::new(&TelemetryConfig { enabled: false, export_interval_seconds: 60 });
        telemetry.incr("schedule.requests", 5);
        assert!(telemetry.snapshot().counters.is_empty());
    }

    #[test]
    fn test_gauge_overwrites_not_accumulates() {
        let telemetry = Telemetry::new(&TelemetryConfig { enabled: true, export_interval_seconds: 60 });
        telemetry.set_gauge("active_tasks", 3);
        telemetry.set_gauge("active_tasks", 7);
        assert_eq!(telemetry.snapshot().gauges["active_tasks"], 7);
    }

    #[test]
    fn test_histogram_summary_computes_percentiles() {
        let telemetry = Telemetry::new(&TelemetryConfig { enabled: true, export_interval_seconds: 60 });
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            telemetry.observe("solve_time_ms", v);
        }
        let summary = telemetry.snapshot().histograms["solve_time_ms"].clone();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.p50, 30.0);
    }
}
