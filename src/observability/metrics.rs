use prometheus::{
	Counter, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
	TextEncoder,
};
use std::sync::Arc;

/// Central registry for all Prometheus metrics
pub struct MetricsRegistry {
	registry: Registry,

	// Probe outcomes, labeled by probe kind ("domain"/"ssl"/"http"/"defacement"/"vt")
	// and outcome ("ok"/"issue"/"error").
	pub probe_outcomes_total: IntCounterVec,

	// Orchestrator run metrics
	pub orchestrator_runs_total: IntCounter,
	pub orchestrator_platforms_processed_total: IntCounter,
	pub orchestrator_run_duration_seconds: Histogram,

	// Alert lifecycle
	pub alerts_created_total: IntCounterVec,
	pub alerts_resolved_total: IntCounterVec,

	// Digest emails
	pub digest_emails_sent_total: IntCounter,
	pub digest_affected_platforms: Gauge,

	// VirusTotal scans
	pub vt_scans_total: IntCounter,
	pub vt_malicious_total: IntCounter,
	pub vt_scan_errors_total: IntCounter,

	// Scheduler leases
	pub scheduler_lease_contention_total: IntCounterVec,

	// Outbound transport
	pub proxy_fallback_total: Counter,
}

impl MetricsRegistry {
	pub fn new() -> Self {
		let registry = Registry::new();

		let probe_outcomes_total = IntCounterVec::new(
			Opts::new("oju_probe_outcomes_total", "Probe results by kind and outcome")
				.namespace("oju"),
			&["probe", "outcome"],
		)
		.unwrap();

		let orchestrator_runs_total = IntCounter::with_opts(
			Opts::new("oju_orchestrator_runs_total", "Total monitoring runs completed")
				.namespace("oju"),
		)
		.unwrap();

		let orchestrator_platforms_processed_total = IntCounter::with_opts(
			Opts::new(
				"oju_orchestrator_platforms_processed_total",
				"Total platforms processed across all runs",
			)
			.namespace("oju"),
		)
		.unwrap();

		let orchestrator_run_duration_seconds = Histogram::with_opts(
			HistogramOpts::new(
				"oju_orchestrator_run_duration_seconds",
				"Wall-clock duration of a full monitoring run",
			)
			.namespace("oju")
			.buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
		)
		.unwrap();

		let alerts_created_total = IntCounterVec::new(
			Opts::new("oju_alerts_created_total", "Alerts created, by kind").namespace("oju"),
			&["kind"],
		)
		.unwrap();

		let alerts_resolved_total = IntCounterVec::new(
			Opts::new("oju_alerts_resolved_total", "Alerts resolved, by kind").namespace("oju"),
			&["kind"],
		)
		.unwrap();

		let digest_emails_sent_total = IntCounter::with_opts(
			Opts::new("oju_digest_emails_sent_total", "Digest emails sent").namespace("oju"),
		)
		.unwrap();

		let digest_affected_platforms = Gauge::with_opts(
			Opts::new(
				"oju_digest_affected_platforms",
				"Platforms affected in the most recent digest",
			)
			.namespace("oju"),
		)
		.unwrap();

		let vt_scans_total = IntCounter::with_opts(
			Opts::new("oju_vt_scans_total", "VirusTotal scans performed").namespace("oju"),
		)
		.unwrap();

		let vt_malicious_total = IntCounter::with_opts(
			Opts::new("oju_vt_malicious_total", "VirusTotal scans with a malicious verdict")
				.namespace("oju"),
		)
		.unwrap();

		let vt_scan_errors_total = IntCounter::with_opts(
			Opts::new("oju_vt_scan_errors_total", "VirusTotal scan errors").namespace("oju"),
		)
		.unwrap();

		let scheduler_lease_contention_total = IntCounterVec::new(
			Opts::new(
				"oju_scheduler_lease_contention_total",
				"Scheduled task fires skipped due to an unexpired lease, by task",
			)
			.namespace("oju"),
			&["task"],
		)
		.unwrap();

		let proxy_fallback_total = Counter::with_opts(
			Opts::new(
				"oju_proxy_fallback_total",
				"Direct-connection retries after every proxy failed",
			)
			.namespace("oju"),
		)
		.unwrap();

		registry
			.register(Box::new(probe_outcomes_total.clone()))
			.unwrap();
		registry
			.register(Box::new(orchestrator_runs_total.clone()))
			.unwrap();
		registry
			.register(Box::new(orchestrator_platforms_processed_total.clone()))
			.unwrap();
		registry
			.register(Box::new(orchestrator_run_duration_seconds.clone()))
			.unwrap();
		registry
			.register(Box::new(alerts_created_total.clone()))
			.unwrap();
		registry
			.register(Box::new(alerts_resolved_total.clone()))
			.unwrap();
		registry
			.register(Box::new(digest_emails_sent_total.clone()))
			.unwrap();
		registry
			.register(Box::new(digest_affected_platforms.clone()))
			.unwrap();
		registry.register(Box::new(vt_scans_total.clone())).unwrap();
		registry
			.register(Box::new(vt_malicious_total.clone()))
			.unwrap();
		registry
			.register(Box::new(vt_scan_errors_total.clone()))
			.unwrap();
		registry
			.register(Box::new(scheduler_lease_contention_total.clone()))
			.unwrap();
		registry
			.register(Box::new(proxy_fallback_total.clone()))
			.unwrap();

		Self {
			registry,
			probe_outcomes_total,
			orchestrator_runs_total,
			orchestrator_platforms_processed_total,
			orchestrator_run_duration_seconds,
			alerts_created_total,
			alerts_resolved_total,
			digest_emails_sent_total,
			digest_affected_platforms,
			vt_scans_total,
			vt_malicious_total,
			vt_scan_errors_total,
			scheduler_lease_contention_total,
			proxy_fallback_total,
		}
	}

	/// Encode metrics in Prometheus text format
	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		match encoder.encode_to_string(&metric_families) {
			Ok(s) => s,
			Err(e) => {
				eprintln!("Failed to encode metrics: {}", e);
				String::new()
			}
		}
	}
}

impl Default for MetricsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Initialize the global metrics registry
pub fn init_metrics() -> anyhow::Result<Arc<MetricsRegistry>> {
	Ok(Arc::new(MetricsRegistry::new()))
}

#[cfg(feature = "unit-tests")]
mod tests {
	#[test]
	fn metrics_registry_creation() {
		let registry = super::MetricsRegistry::new();
		assert!(!registry.encode().is_empty());
	}

	#[test]
	fn metrics_increment() {
		let registry = super::MetricsRegistry::new();
		registry
			.probe_outcomes_total
			.with_label_values(&["http", "ok"])
			.inc();
		registry.orchestrator_runs_total.inc();
		assert!(!registry.encode().is_empty());
	}
}
