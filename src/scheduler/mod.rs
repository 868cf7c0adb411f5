//! Periodic task driver (§4.10), grounded on the teacher's
//! `persist::start_batcher` background-task pattern: a detached
//! `tokio::spawn` loop driven by `tokio::select! { biased; ... }`. Here each
//! named task gets its own loop instead of one batcher, since the four
//! tasks run on independent schedules rather than draining a shared queue.

use crate::domain::AlertKind;
use crate::notify::Notifier;
use crate::observability::MetricsRegistry;
use crate::orchestrator::Orchestrator;
use crate::store::MonitoringStore;
use crate::vt::VirusTotalScanner;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// External integrations the scheduler invokes but does not implement —
/// Cerebrate/RTIR refresh and blacklisted-token cleanup live outside this
/// crate; only the hook point is owned here.
#[async_trait::async_trait]
pub trait ExternalHooks: Send + Sync {
    async fn cerebrate_refresh(&self) -> Result<(), String>;
    async fn cleanup_blacklisted_tokens(&self) -> Result<(), String>;
}

pub struct NullHooks;

#[async_trait::async_trait]
impl ExternalHooks for NullHooks {
    async fn cerebrate_refresh(&self) -> Result<(), String> {
        Ok(())
    }
    async fn cleanup_blacklisted_tokens(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A named 6-hour lease: a second fire before the lease expires is skipped
/// rather than queued, even if the first run is still in flight (§4.10 /
/// §5 "a second instance may start while the first is still running").
struct Lease {
    last_started: Mutex<Option<Instant>>,
}

impl Lease {
    fn new() -> Self {
        Self {
            last_started: Mutex::new(None),
        }
    }

    fn try_acquire(&self, duration: Duration) -> bool {
        let mut guard = self.last_started.lock().expect("lease mutex poisoned");
        let now = Instant::now();
        let expired = guard.map(|t| now.duration_since(t) >= duration).unwrap_or(true);
        if expired {
            *guard = Some(now);
        }
        expired
    }
}

const LEASE_DURATION: Duration = Duration::from_secs(6 * 3600);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

pub struct Scheduler {
    store: Arc<dyn MonitoringStore>,
    orchestrator: Arc<Orchestrator>,
    vt_scanner: Option<Arc<VirusTotalScanner>>,
    hooks: Arc<dyn ExternalHooks>,
    leases: HashMap<&'static str, Arc<Lease>>,
    metrics: Arc<MetricsRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MonitoringStore>,
        orchestrator: Arc<Orchestrator>,
        vt_scanner: Option<Arc<VirusTotalScanner>>,
        hooks: Arc<dyn ExternalHooks>,
    ) -> Self {
        Self::with_metrics(
            store,
            orchestrator,
            vt_scanner,
            hooks,
            Arc::new(MetricsRegistry::new()),
        )
    }

    pub fn with_metrics(
        store: Arc<dyn MonitoringStore>,
        orchestrator: Arc<Orchestrator>,
        vt_scanner: Option<Arc<VirusTotalScanner>>,
        hooks: Arc<dyn ExternalHooks>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self::with_metrics_and_notifier(store, orchestrator, vt_scanner, hooks, metrics, None)
    }

    pub fn with_metrics_and_notifier(
        store: Arc<dyn MonitoringStore>,
        orchestrator: Arc<Orchestrator>,
        vt_scanner: Option<Arc<VirusTotalScanner>>,
        hooks: Arc<dyn ExternalHooks>,
        metrics: Arc<MetricsRegistry>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let mut leases = HashMap::new();
        for name in ["monitor", "vt_scan", "cerebrate_refresh", "cleanup_blacklisted_tokens"] {
            leases.insert(name, Arc::new(Lease::new()));
        }
        Self {
            store,
            orchestrator,
            vt_scanner,
            hooks,
            leases,
            metrics,
            notifier,
        }
    }

    /// Spawn the four named task loops. Returns immediately; each loop runs
    /// detached until the process exits.
    pub fn start(self: Arc<Self>) {
        self.clone().spawn_monitor_loop();
        self.clone().spawn_vt_loop();
        self.clone().spawn_cerebrate_loop();
        self.spawn_cleanup_loop();
    }

    fn spawn_monitor_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let interval = self
                    .store
                    .load_configuration()
                    .await
                    .map(|c| Duration::from_secs(c.scan_frequency_s.max(1)))
                    .unwrap_or(Duration::from_secs(3600));

                tokio::time::sleep(interval).await;

                let lease = self.leases["monitor"].clone();
                if !lease.try_acquire(LEASE_DURATION) {
                    self.metrics
                        .scheduler_lease_contention_total
                        .with_label_values(&["monitor"])
                        .inc();
                    warn!(task = "monitor", "lease contention: skipping this fire");
                    continue;
                }

                let orchestrator = self.orchestrator.clone();
                tokio::spawn(async move {
                    match orchestrator.run_once().await {
                        Ok(summary) => info!(
                            task = "monitor",
                            platforms = summary.platforms_processed,
                            digest_sent = summary.digest_sent,
                            "monitoring run complete"
                        ),
                        Err(e) => warn!(task = "monitor", error = %e, "monitoring run failed"),
                    }
                });
            }
        });
    }

    fn spawn_vt_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                let scan_config = match self.store.load_scan_config().await {
                    Ok(c) => c,
                    Err(_) => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        continue;
                    }
                };

                tokio::time::sleep(Duration::from_secs(scan_config.vt_frequency_s.max(1))).await;

                if !scan_config.vt_enabled {
                    continue;
                }

                let lease = self.leases["vt_scan"].clone();
                if !lease.try_acquire(LEASE_DURATION) {
                    self.metrics
                        .scheduler_lease_contention_total
                        .with_label_values(&["vt_scan"])
                        .inc();
                    warn!(task = "vt_scan", "lease contention: skipping this fire");
                    continue;
                }

                let Some(scanner) = self.vt_scanner.clone() else {
                    continue;
                };
                let store = self.store.clone();
                let metrics = self.metrics.clone();
                let notifier = self.notifier.clone();
                tokio::spawn(async move {
                    run_vt_scan_once(&store, &scanner, &metrics, notifier).await;
                });
            }
        });
    }

    fn spawn_cerebrate_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                let lease = self.leases["cerebrate_refresh"].clone();
                if !lease.try_acquire(LEASE_DURATION) {
                    self.metrics
                        .scheduler_lease_contention_total
                        .with_label_values(&["cerebrate_refresh"])
                        .inc();
                    warn!(task = "cerebrate_refresh", "lease contention: skipping this fire");
                    continue;
                }
                if let Err(e) = self.hooks.cerebrate_refresh().await {
                    warn!(task = "cerebrate_refresh", error = %e, "refresh failed");
                }
            }
        });
    }

    fn spawn_cleanup_loop(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(CLEANUP_INTERVAL).await;
                let lease = self.leases["cleanup_blacklisted_tokens"].clone();
                if !lease.try_acquire(LEASE_DURATION) {
                    self.metrics
                        .scheduler_lease_contention_total
                        .with_label_values(&["cleanup_blacklisted_tokens"])
                        .inc();
                    warn!(task = "cleanup_blacklisted_tokens", "lease contention: skipping this fire");
                    continue;
                }
                if let Err(e) = self.hooks.cleanup_blacklisted_tokens().await {
                    warn!(task = "cleanup_blacklisted_tokens", error = %e, "cleanup failed");
                }
            }
        });
    }
}

/// Scan every active platform's domain with VirusTotal, reporting a
/// deduplicated-per-day alert for any platform with a malicious verdict
/// (`scan_vt.py::VirusTotalTask.run` sleeps 3s between platforms to stay
/// under rate limits; here that throttling is the `ResilientGate`'s own
/// rate limiter instead).
pub async fn run_vt_scan_once(
    store: &Arc<dyn MonitoringStore>,
    scanner: &Arc<VirusTotalScanner>,
    metrics: &Arc<MetricsRegistry>,
    notifier: Option<Arc<dyn Notifier>>,
) {
    let Ok(contexts) = store.active_platforms().await else {
        return;
    };
    let config = store.load_configuration().await.unwrap_or_default();
    let alerts =
        crate::alerts::AlertEngine::with_notifier(store.clone(), metrics.clone(), notifier);
    let mut digest = crate::domain::DigestAccumulator::default();

    for ctx in contexts {
        let outcome = match scanner.scan_url(&ctx.platform.url).await {
            Ok(result) => result,
            Err(e) => {
                metrics.vt_scan_errors_total.inc();
                warn!(task = "vt_scan", platform = ctx.platform.id, error = %e, "scan failed");
                continue;
            }
        };
        metrics.vt_scans_total.inc();

        let malicious = outcome.malicious_results();
        if malicious.is_empty() {
            let _ = alerts.resolve(&ctx, AlertKind::Vt, &config).await;
            continue;
        }

        metrics.vt_malicious_total.inc();
        let details = malicious
            .iter()
            .map(|(verdict, vendors)| format!("{verdict}: {}", vendors.join(", ")))
            .collect::<Vec<_>>()
            .join("; ");
        let _ = alerts
            .report_daily(&ctx, AlertKind::Vt, &details, "VtDetection", &mut digest, &config)
            .await;
    }
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn lease_blocks_second_acquire_within_window() {
        let lease = Lease::new();
        assert!(lease.try_acquire(Duration::from_secs(3600)));
        assert!(!lease.try_acquire(Duration::from_secs(3600)));
    }

    #[test]
    fn lease_reacquires_after_expiry() {
        let lease = Lease::new();
        assert!(lease.try_acquire(Duration::from_millis(0)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(lease.try_acquire(Duration::from_millis(1)));
    }
}
