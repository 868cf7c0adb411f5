pub mod alerts;
pub mod config;
pub mod defacement;
pub mod devops;
pub mod domain;
pub mod errors;
pub mod health;
pub mod notify;
pub mod observability;
pub mod orchestrator;
pub mod probes;
pub mod resilient;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod tls_utils;
pub mod vt;

use std::sync::Arc;
use std::time::Duration;

use axum::{Router, routing::get};

use crate::orchestrator::Orchestrator;
use crate::scheduler::{NullHooks, Scheduler};
use crate::store::{MonitoringStore, PostgresStore};
use crate::vt::VirusTotalScanner;

/// Default WHOIS referral server list bundled with `whois-rust`, used when
/// no override is configured.
const WHOIS_SERVERS_JSON: &str = whois_rust::WHOIS_SERVERS;

/// Connect to Postgres, retrying with a fixed backoff since the dev DB
/// container may still be starting up when this process does.
async fn connect_store(settings: &config::Settings) -> Option<Arc<dyn MonitoringStore>> {
	let database_url = match &settings.database_url {
		Some(url) => url.clone(),
		None => {
			eprintln!("no database_url configured (set OJU_DATABASE_URL); cannot start");
			return None;
		}
	};

	let max_retries: u32 = std::env::var("OJU_DB_CONNECT_RETRIES")
		.ok()
		.and_then(|s| s.parse::<u32>().ok())
		.unwrap_or(60);
	let backoff_ms: u64 = std::env::var("OJU_DB_CONNECT_BACKOFF_MS")
		.ok()
		.and_then(|s| s.parse::<u64>().ok())
		.unwrap_or(1000);

	let mut last_err = None;
	for attempt in 1..=max_retries {
		match PostgresStore::connect(&database_url).await {
			Ok(s) => return Some(Arc::new(s)),
			Err(e) => {
				eprintln!("DB connect attempt {}/{} failed: {}", attempt, max_retries, e);
				last_err = Some(e);
				if attempt < max_retries {
					tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
				}
			}
		}
	}

	eprintln!(
		"failed to connect to DB after {} attempts: {}",
		max_retries,
		last_err
			.as_ref()
			.map(|e| e.to_string())
			.unwrap_or_else(|| "unknown error".to_string())
	);
	None
}

fn build_whois() -> Option<Arc<dyn crate::probes::domain::WhoisLookup>> {
	match whois_rust::WhoIs::from_string(WHOIS_SERVERS_JSON) {
		Ok(client) => Some(Arc::new(crate::probes::domain::WhoisRustLookup::new(client))),
		Err(e) => {
			eprintln!("warning: failed to load WHOIS server list: {}", e);
			None
		}
	}
}

/// Build an SMTP notifier from `OJU_SMTP_*` environment variables. Returns
/// `None` when no relay is configured — digests are still computed but
/// never sent, same as `notify_enabled=false` in `Configuration`.
fn build_notifier() -> Option<Arc<dyn crate::notify::Notifier>> {
	let relay = std::env::var("OJU_SMTP_RELAY").ok()?;
	let from = std::env::var("OJU_SMTP_FROM").unwrap_or_else(|_| "oju@localhost".to_string());
	let from_mailbox: lettre::message::Mailbox = from.parse().ok()?;

	let credentials = match (
		std::env::var("OJU_SMTP_USER").ok(),
		std::env::var("OJU_SMTP_PASSWORD").ok(),
	) {
		(Some(user), Some(password)) => Some(
			lettre::transport::smtp::authentication::Credentials::new(user, password),
		),
		_ => None,
	};

	match crate::notify::SmtpNotifier::new(&relay, credentials, from_mailbox) {
		Ok(notifier) => Some(Arc::new(notifier)),
		Err(e) => {
			eprintln!("warning: failed to initialize SMTP notifier: {}", e);
			None
		}
	}
}

async fn build_vt_scanner(store: &Arc<dyn MonitoringStore>) -> Option<Arc<VirusTotalScanner>> {
	let scan_config = store.load_scan_config().await.ok()?;
	if !scan_config.vt_enabled {
		return None;
	}
	let api_key = scan_config.vt_api_key?;
	match VirusTotalScanner::new(api_key, Duration::from_secs(300)) {
		Ok(scanner) => Some(Arc::new(scanner)),
		Err(e) => {
			eprintln!("warning: failed to initialize VirusTotal scanner: {}", e);
			None
		}
	}
}

/// Start the Oju Sentinel process: connect to Postgres, wire the probe/
/// alert/notify stack into an `Orchestrator`, start the periodic
/// `Scheduler`, and serve `/health`, `/health/db` and `/metrics` until the
/// process is killed.
pub async fn run() {
	let obs_state = match crate::observability::init_observability().await {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to initialize observability: {}", e);
			crate::observability::ObservabilityState::default()
		}
	};

	let settings = match crate::config::load() {
		Ok(s) => s,
		Err(e) => {
			eprintln!("warning: failed to load config: {}", e);
			crate::config::Settings::default()
		}
	};

	let Some(store) = connect_store(&settings).await else {
		return;
	};

	let whois = build_whois();
	let notifier = build_notifier();
	let vt_scanner = build_vt_scanner(&store).await;

	let orchestrator = Arc::new(Orchestrator::with_metrics(
		store.clone(),
		notifier.clone(),
		whois,
		obs_state.metrics.clone(),
	));
	let scheduler = Arc::new(Scheduler::with_metrics_and_notifier(
		store.clone(),
		orchestrator,
		vt_scanner,
		Arc::new(NullHooks),
		obs_state.metrics.clone(),
		notifier,
	));
	scheduler.start();

	let app_state = crate::state::AppState {
		store,
		metrics: obs_state.metrics.clone(),
	};

	let app = Router::new()
		.route("/health", get(|| async { "OK" }))
		.route("/health/db", get(crate::health::db_health))
		.route(
			"/metrics",
			get(|axum::extract::State(state): axum::extract::State<crate::state::AppState>| async move {
				state.metrics.encode()
			}),
		)
		.with_state(app_state);

	let bind_addr = format!("{}:{}", settings.host, settings.port);
	let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
		Ok(l) => l,
		Err(e) => {
			eprintln!("failed to bind {}: {}", bind_addr, e);
			return;
		}
	};

	println!("Oju Sentinel listening on http://{} (/health, /metrics)", bind_addr);

	if let Err(e) = axum::serve(listener, app).await {
		eprintln!("server error: {}", e);
	}
}

/// Run a single monitoring pass and exit. Used by the `monitor` CLI
/// subcommand for cron-driven or one-off invocations outside the
/// long-running `run` process.
pub async fn run_monitor_once() {
	let settings = crate::config::load().unwrap_or_default();
	let Some(store) = connect_store(&settings).await else {
		return;
	};
	let whois = build_whois();
	let notifier = build_notifier();
	let orchestrator = Orchestrator::new(store, notifier, whois);

	match orchestrator.run_once().await {
		Ok(summary) => println!(
			"monitoring run complete: {} platform(s) processed, digest_sent={}",
			summary.platforms_processed, summary.digest_sent
		),
		Err(e) => eprintln!("monitoring run failed: {}", e),
	}
}

/// Run a single VirusTotal sweep over every active platform and exit. Used
/// by the `vt-scan` CLI subcommand.
pub async fn run_vt_scan_once() {
	let settings = crate::config::load().unwrap_or_default();
	let Some(store) = connect_store(&settings).await else {
		return;
	};
	let Some(scanner) = build_vt_scanner(&store).await else {
		eprintln!("VirusTotal scanning is not enabled (set vt_enabled and vt_api_key)");
		return;
	};

	let metrics = Arc::new(crate::observability::MetricsRegistry::new());
	let notifier = build_notifier();
	crate::scheduler::run_vt_scan_once(&store, &scanner, &metrics, notifier).await;
	println!("VirusTotal scan complete");
}
