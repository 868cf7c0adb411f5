use oju_sentinel::observability::{MetricsRegistry, init_metrics};

#[cfg(feature = "unit-tests")]
#[test]
fn test_metrics_registry_creation() {
	let registry = MetricsRegistry::new();
	let output = registry.encode();

	assert!(output.contains("oju_probe_outcomes_total"));
	assert!(output.contains("oju_orchestrator_runs_total"));
	assert!(output.contains("oju_orchestrator_run_duration_seconds"));
	assert!(output.contains("oju_alerts_created_total"));
	assert!(output.contains("oju_alerts_resolved_total"));
	assert!(output.contains("oju_digest_emails_sent_total"));
	assert!(output.contains("oju_vt_scans_total"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_probe_outcome_counters() {
	let registry = MetricsRegistry::new();

	registry
		.probe_outcomes_total
		.with_label_values(&["http", "ok"])
		.inc();
	registry
		.probe_outcomes_total
		.with_label_values(&["http", "ok"])
		.inc();
	registry
		.probe_outcomes_total
		.with_label_values(&["tls", "error"])
		.inc();

	let output = registry.encode();

	assert!(output.contains(r#"oju_probe_outcomes_total{outcome="ok",probe="http"} 2"#));
	assert!(output.contains(r#"oju_probe_outcomes_total{outcome="error",probe="tls"} 1"#));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_alert_counters_by_kind() {
	let registry = MetricsRegistry::new();

	registry.alerts_created_total.with_label_values(&["domain"]).inc();
	registry.alerts_resolved_total.with_label_values(&["domain"]).inc_by(3);

	let output = registry.encode();

	assert!(output.contains(r#"oju_alerts_created_total{kind="domain"} 1"#));
	assert!(output.contains(r#"oju_alerts_resolved_total{kind="domain"} 3"#));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_orchestrator_run_gauges_and_histogram() {
	let registry = MetricsRegistry::new();

	registry.orchestrator_runs_total.inc();
	registry.orchestrator_platforms_processed_total.inc_by(12);
	registry.orchestrator_run_duration_seconds.observe(4.2);
	registry.digest_affected_platforms.set(3.0);

	let output = registry.encode();

	assert!(output.contains("oju_orchestrator_runs_total 1"));
	assert!(output.contains("oju_orchestrator_platforms_processed_total 12"));
	assert!(output.contains("oju_orchestrator_run_duration_seconds_bucket"));
	assert!(output.contains("oju_digest_affected_platforms 3"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_vt_scan_counters() {
	let registry = MetricsRegistry::new();

	registry.vt_scans_total.inc_by(7);
	registry.vt_malicious_total.inc_by(2);
	registry.vt_scan_errors_total.inc();

	let output = registry.encode();

	assert!(output.contains("oju_vt_scans_total 7"));
	assert!(output.contains("oju_vt_malicious_total 2"));
	assert!(output.contains("oju_vt_scan_errors_total 1"));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_scheduler_lease_contention_by_task() {
	let registry = MetricsRegistry::new();

	registry
		.scheduler_lease_contention_total
		.with_label_values(&["monitor"])
		.inc();

	let output = registry.encode();
	assert!(output.contains(r#"oju_scheduler_lease_contention_total{task="monitor"} 1"#));
}

#[cfg(feature = "unit-tests")]
#[test]
fn test_init_metrics() {
	let result = init_metrics();
	assert!(result.is_ok());
	let metrics = result.unwrap();
	assert!(!metrics.encode().is_empty());
}
