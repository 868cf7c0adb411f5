//! Live HTTP probe tests against a local mock server.

use oju_sentinel::probes::http::{self, HttpProbeConfig, HttpProbeOutcome};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> HttpProbeConfig {
	HttpProbeConfig {
		proxies: Vec::new(),
		user_agent: "oju-sentinel-test/1.0".to_string(),
		timeout: Duration::from_secs(5),
		verify_ssl: true,
	}
}

#[tokio::test]
async fn check_succeeds_against_healthy_endpoint() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(200))
		.mount(&server)
		.await;

	let outcome = http::check(&server.uri(), &config()).await;

	match outcome {
		HttpProbeOutcome::Verdict(v) => {
			assert_eq!(v.status_code, 200);
			assert!(v.proxy_used.is_none());
		}
		_ => panic!("expected a verdict for a healthy endpoint"),
	}
}

#[tokio::test]
async fn check_reports_probe_error_on_server_error() {
	let server = MockServer::start().await;
	Mock::given(method("GET"))
		.and(path("/"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&server)
		.await;

	let outcome = http::check(&server.uri(), &config()).await;

	match outcome {
		HttpProbeOutcome::Probe(_) => {}
		_ => panic!("expected a probe error for a 503 response"),
	}
}
