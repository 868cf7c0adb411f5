//! Monitoring orchestrator (§4.9), grounded on
//! `cerb_scans/monitoring.py::{process_platform, run}`. Drives the fixed
//! domain -> http -> tls -> defacement probe sequence per platform, honors
//! the short-circuit matrix, and emits the end-of-run digest.

use crate::alerts::AlertEngine;
use crate::defacement::{self, DiffConfig};
use crate::domain::{AlertKind, Configuration, DigestAccumulator, PlatformContext, ScanConfig};
use crate::errors::{ProbeError, StoreError, TransportError};
use crate::notify::{self, Notifier};
use crate::observability::MetricsRegistry;
use crate::probes::har::TreeNode;
use crate::probes::{domain as domain_probe, har, http as http_probe, tls as tls_probe};
use crate::store::MonitoringStore;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

pub struct Orchestrator {
    store: Arc<dyn MonitoringStore>,
    alerts: Arc<AlertEngine>,
    notifier: Option<Arc<dyn Notifier>>,
    whois: Option<Arc<dyn domain_probe::WhoisLookup>>,
    metrics: Arc<MetricsRegistry>,
}

pub struct RunSummary {
    pub platforms_processed: usize,
    pub digest_sent: bool,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn MonitoringStore>,
        notifier: Option<Arc<dyn Notifier>>,
        whois: Option<Arc<dyn domain_probe::WhoisLookup>>,
    ) -> Self {
        Self::with_metrics(store, notifier, whois, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_metrics(
        store: Arc<dyn MonitoringStore>,
        notifier: Option<Arc<dyn Notifier>>,
        whois: Option<Arc<dyn domain_probe::WhoisLookup>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let alerts = Arc::new(AlertEngine::with_notifier(
            store.clone(),
            metrics.clone(),
            notifier.clone(),
        ));
        Self {
            store,
            alerts,
            notifier,
            whois,
            metrics,
        }
    }

    pub async fn run_once(&self) -> Result<RunSummary, StoreError> {
        let started_at = Instant::now();
        let config = self.store.load_configuration().await?;
        let scan_config = self.store.load_scan_config().await?;
        let contexts = self.store.active_platforms().await?;
        let total_platforms = contexts.len();

        let semaphore = Arc::new(Semaphore::new(config.clamped_max_workers() as usize));
        let digest = Arc::new(Mutex::new(DigestAccumulator::default()));

        let mut handles = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            let semaphore = semaphore.clone();
            let digest = digest.clone();
            let store = self.store.clone();
            let alerts = self.alerts.clone();
            let config = config.clone();
            let scan_config = scan_config.clone();
            let whois = self.whois.clone();
            let metrics = self.metrics.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                process_platform(
                    &ctx,
                    &scan_config,
                    &config,
                    &store,
                    &alerts,
                    &digest,
                    whois.as_deref(),
                    &metrics,
                )
                .await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let digest = Arc::try_unwrap(digest)
            .map(|m| m.into_inner())
            .unwrap_or_default();

        self.metrics.digest_affected_platforms.set(digest.total_affected_platforms().len() as f64);

        let mut digest_sent = false;
        if config.notify_enabled {
            if let Some(notification) =
                notify::build_digest(&digest, total_platforms, &config.notification_email)
            {
                if let Some(notifier) = &self.notifier {
                    if notifier.send(notification).await.is_ok() {
                        digest_sent = true;
                        self.metrics.digest_emails_sent_total.inc();
                    }
                }
            }
        }

        self.metrics.orchestrator_runs_total.inc();
        self.metrics
            .orchestrator_platforms_processed_total
            .inc_by(total_platforms as u64);
        self.metrics
            .orchestrator_run_duration_seconds
            .observe(started_at.elapsed().as_secs_f64());

        Ok(RunSummary {
            platforms_processed: total_platforms,
            digest_sent,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_platform(
    ctx: &PlatformContext,
    scan_config: &ScanConfig,
    config: &Configuration,
    store: &Arc<dyn MonitoringStore>,
    alerts: &Arc<AlertEngine>,
    digest: &Arc<Mutex<DigestAccumulator>>,
    whois: Option<&dyn domain_probe::WhoisLookup>,
    metrics: &Arc<MetricsRegistry>,
) {
    if scan_config.domain_enabled {
        let dns_servers: Vec<IpAddr> = config
            .dns_servers
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        let domain_config = domain_probe::DomainProbeConfig {
            check_whois: scan_config.domain_check_whois,
            check_dns: scan_config.domain_check_dns,
            check_expiry: scan_config.domain_check_expiry,
            timeout: Duration::from_millis(scan_config.http_max_response_ms),
            dns_servers,
        };

        match domain_probe::check(&ctx.domain.name, &domain_config, whois).await {
            Ok(_) => {
                metrics
                    .probe_outcomes_total
                    .with_label_values(&["domain", "ok"])
                    .inc();
                let _ = alerts.resolve(ctx, AlertKind::DomainUnavailable, config).await;
            }
            Err(ProbeError::DomainExpiring { days }) => {
                metrics
                    .probe_outcomes_total
                    .with_label_values(&["domain", "issue"])
                    .inc();
                let mut d = digest.lock().await;
                let _ = alerts
                    .report_daily(
                        ctx,
                        AlertKind::DomainExpiring,
                        &format!("domain expires in {days} day(s)"),
                        "DomainExpiredSoon",
                        &mut d,
                        config,
                    )
                    .await;
                drop(d);
                return step_http(ctx, scan_config, config, store, alerts, digest, metrics).await;
            }
            Err(e) => {
                metrics
                    .probe_outcomes_total
                    .with_label_values(&["domain", "error"])
                    .inc();
                let mut d = digest.lock().await;
                let _ = alerts
                    .report(
                        ctx,
                        AlertKind::DomainUnavailable,
                        &e.to_string(),
                        "DomainUnavailable",
                        &mut d,
                        config,
                    )
                    .await;
                drop(d);
                let _ = store.update_platform(&clear_screenshot(ctx)).await;
                return;
            }
        }
    }

    step_http(ctx, scan_config, config, store, alerts, digest, metrics).await;
}

#[allow(clippy::too_many_arguments)]
async fn step_http(
    ctx: &PlatformContext,
    scan_config: &ScanConfig,
    config: &Configuration,
    store: &Arc<dyn MonitoringStore>,
    alerts: &Arc<AlertEngine>,
    digest: &Arc<Mutex<DigestAccumulator>>,
    metrics: &Arc<MetricsRegistry>,
) {
    if !scan_config.http_enabled {
        return step_tls(ctx, scan_config, config, store, alerts, digest, metrics).await;
    }

    let http_config = http_probe::HttpProbeConfig {
        proxies: config.proxy_list(),
        user_agent: config.user_agent.clone(),
        timeout: Duration::from_millis(scan_config.http_max_response_ms),
        verify_ssl: true,
    };

    match http_probe::check(&ctx.platform.url, &http_config).await {
        http_probe::HttpProbeOutcome::Verdict(_) => {
            metrics
                .probe_outcomes_total
                .with_label_values(&["http", "ok"])
                .inc();
            let _ = alerts.resolve(ctx, AlertKind::Availability, config).await;
        }
        http_probe::HttpProbeOutcome::Probe(ProbeError::HttpSslError { .. }) => {
            // SSL-typed failures are classified and handled by the TLS probe.
        }
        http_probe::HttpProbeOutcome::Transport(transport) => {
            match retry_http_direct_if_allowed(&transport, config, &ctx.platform.url, scan_config, metrics)
                .await
            {
                Some(true) => {
                    metrics
                        .probe_outcomes_total
                        .with_label_values(&["http", "ok"])
                        .inc();
                    let _ = alerts.resolve(ctx, AlertKind::Availability, config).await;
                }
                Some(false) | None if !transport.is_proxy_issue() => {
                    metrics
                        .probe_outcomes_total
                        .with_label_values(&["http", "error"])
                        .inc();
                    let mut d = digest.lock().await;
                    let _ = alerts
                        .report(
                            ctx,
                            AlertKind::Availability,
                            &transport.to_string(),
                            "AvailabilityIssue",
                            &mut d,
                            config,
                        )
                        .await;
                    drop(d);
                    return step_defacement(ctx, scan_config, config, store, alerts, digest, metrics)
                        .await;
                }
                _ => {}
            }
        }
        http_probe::HttpProbeOutcome::Probe(e) => {
            metrics
                .probe_outcomes_total
                .with_label_values(&["http", "error"])
                .inc();
            let mut d = digest.lock().await;
            let _ = alerts
                .report(ctx, AlertKind::Availability, &e.to_string(), "AvailabilityIssue", &mut d, config)
                .await;
            drop(d);
            return step_defacement(ctx, scan_config, config, store, alerts, digest, metrics).await;
        }
    }

    step_tls(ctx, scan_config, config, store, alerts, digest, metrics).await;
}

/// `fallback_direct_on_proxy_fail` (§4.9): when every proxy failed for
/// transport reasons, retry once without a proxy. Returns `None` when no
/// retry was attempted (proxies disabled or fallback disabled), `Some(true)`
/// when the direct retry succeeded, `Some(false)` when it also failed.
async fn retry_http_direct_if_allowed(
    transport: &TransportError,
    config: &Configuration,
    url: &str,
    scan_config: &ScanConfig,
    metrics: &Arc<MetricsRegistry>,
) -> Option<bool> {
    if !config.use_proxy || !config.fallback_direct_on_proxy_fail || !transport.is_proxy_issue() {
        return None;
    }
    metrics.proxy_fallback_total.inc();
    let direct_config = http_probe::HttpProbeConfig {
        proxies: Vec::new(),
        user_agent: config.user_agent.clone(),
        timeout: Duration::from_millis(scan_config.http_max_response_ms),
        verify_ssl: true,
    };
    match http_probe::check(url, &direct_config).await {
        http_probe::HttpProbeOutcome::Verdict(_) => Some(true),
        _ => Some(false),
    }
}

async fn retry_tls_direct_if_allowed(
    transport: &TransportError,
    config: &Configuration,
    hostname: &str,
    scan_config: &ScanConfig,
    metrics: &Arc<MetricsRegistry>,
) -> Option<bool> {
    if !config.use_proxy || !config.fallback_direct_on_proxy_fail || !transport.is_proxy_issue() {
        return None;
    }
    metrics.proxy_fallback_total.inc();
    let direct_config = tls_probe::TlsProbeConfig {
        port: 443,
        proxies: Vec::new(),
        timeout: Duration::from_secs(10),
        check_error: scan_config.ssl_check_error,
        check_expiry: scan_config.ssl_check_expiry,
    };
    match tls_probe::check(hostname, &direct_config).await {
        Ok(_) => Some(true),
        _ => Some(false),
    }
}

#[allow(clippy::too_many_arguments)]
async fn step_tls(
    ctx: &PlatformContext,
    scan_config: &ScanConfig,
    config: &Configuration,
    store: &Arc<dyn MonitoringStore>,
    alerts: &Arc<AlertEngine>,
    digest: &Arc<Mutex<DigestAccumulator>>,
    metrics: &Arc<MetricsRegistry>,
) {
    if scan_config.ssl_enabled {
        let tls_config = tls_probe::TlsProbeConfig {
            port: 443,
            proxies: config.proxy_list(),
            timeout: Duration::from_secs(10),
            check_error: scan_config.ssl_check_error,
            check_expiry: scan_config.ssl_check_expiry,
        };

        match tls_probe::check(&ctx.domain.name, &tls_config).await {
            Ok(verdict) if verdict.skipped => {}
            Ok(_) => {
                metrics
                    .probe_outcomes_total
                    .with_label_values(&["tls", "ok"])
                    .inc();
                let _ = alerts.resolve(ctx, AlertKind::Ssl, config).await;
            }
            Err(tls_probe::TlsOutcome::Probe(ProbeError::CertificateExpiring { days, .. })) => {
                metrics
                    .probe_outcomes_total
                    .with_label_values(&["tls", "issue"])
                    .inc();
                let mut d = digest.lock().await;
                let _ = alerts
                    .report_daily(
                        ctx,
                        AlertKind::SslExpiring,
                        &format!("certificate expires in {days} day(s)"),
                        "SslExpiredSoon",
                        &mut d,
                        config,
                    )
                    .await;
            }
            Err(tls_probe::TlsOutcome::Probe(e)) => {
                metrics
                    .probe_outcomes_total
                    .with_label_values(&["tls", "error"])
                    .inc();
                let mut d = digest.lock().await;
                let _ = alerts
                    .report(ctx, AlertKind::Ssl, &e.to_string(), "SslIssue", &mut d, config)
                    .await;
            }
            Err(tls_probe::TlsOutcome::Transport(transport)) => {
                match retry_tls_direct_if_allowed(&transport, config, &ctx.domain.name, scan_config, metrics)
                    .await
                {
                    Some(true) => {
                        metrics
                            .probe_outcomes_total
                            .with_label_values(&["tls", "ok"])
                            .inc();
                        let _ = alerts.resolve(ctx, AlertKind::Ssl, config).await;
                    }
                    Some(false) | None if !transport.is_proxy_issue() => {
                        metrics
                            .probe_outcomes_total
                            .with_label_values(&["tls", "error"])
                            .inc();
                        let mut d = digest.lock().await;
                        let _ = alerts
                            .report(ctx, AlertKind::Ssl, &transport.to_string(), "SslIssue", &mut d, config)
                            .await;
                    }
                    _ => {}
                }
            }
        }
    }

    // TLS failures, unlike HTTP and domain failures, never short-circuit
    // defacement capture (§4.9).
    step_defacement(ctx, scan_config, config, store, alerts, digest, metrics).await;
}

#[allow(clippy::too_many_arguments)]
async fn step_defacement(
    ctx: &PlatformContext,
    scan_config: &ScanConfig,
    config: &Configuration,
    store: &Arc<dyn MonitoringStore>,
    alerts: &Arc<AlertEngine>,
    digest: &Arc<Mutex<DigestAccumulator>>,
    metrics: &Arc<MetricsRegistry>,
) {
    if !scan_config.defacement_enabled {
        return;
    }

    let har_config = har::HarProbeConfig {
        user_agent: config.user_agent.clone(),
        timeout: Duration::from_secs(20),
        max_sub_resources: 40,
    };

    let capture = match har::capture(&ctx.platform.url, &har_config).await {
        Ok(v) => {
            metrics
                .probe_outcomes_total
                .with_label_values(&["defacement", "ok"])
                .inc();
            v
        }
        Err(_) => {
            metrics
                .probe_outcomes_total
                .with_label_values(&["defacement", "error"])
                .inc();
            return;
        }
    };

    let (mut record, created) = match store.get_or_create_defacement(ctx.platform.id).await {
        Ok(v) => v,
        Err(_) => return,
    };

    let tree_value = serde_json::to_value(&capture.roots).unwrap_or_default();
    let tree_text = serde_json::to_string(&capture.roots).unwrap_or_default();

    if created {
        record.baseline_capture = tree_value.clone();
        record.last_capture = tree_value;
        record.baseline_tree_text = tree_text.clone();
        record.last_tree_text = tree_text;
        let _ = store.update_defacement(&record).await;
        return;
    }

    let baseline_tree: Vec<TreeNode> =
        serde_json::from_value(record.baseline_capture.clone()).unwrap_or_default();
    let baseline_redirect = baseline_tree
        .first()
        .and_then(|r| r.redirect_chain.last().cloned())
        .unwrap_or_default();
    let new_redirect = capture
        .roots
        .first()
        .and_then(|r| r.redirect_chain.last().cloned())
        .unwrap_or_default();

    let diff_config = DiffConfig {
        size_tolerance: scan_config.defacement_size_tolerance.max(0) as u64,
        whitelist_domains: scan_config.defacement_whitelist.iter().cloned().collect(),
    };

    let changes = defacement::diff(
        &baseline_tree,
        &capture.roots,
        "",
        "",
        &baseline_redirect,
        &new_redirect,
        &ctx.platform.url,
        &diff_config,
    );

    record.last_capture = tree_value;
    record.last_tree_text = tree_text;

    if changes.is_empty() {
        record.is_defaced = false;
        let _ = alerts.resolve(ctx, AlertKind::Defacement, config).await;
    } else {
        metrics
            .probe_outcomes_total
            .with_label_values(&["defacement", "issue"])
            .inc();
        let details = changes
            .iter()
            .map(|c| c.details.clone())
            .collect::<Vec<_>>()
            .join("; ");
        record.is_defaced = true;
        record.details = details.clone();
        let mut d = digest.lock().await;
        let _ = alerts
            .report(ctx, AlertKind::Defacement, &details, "DefacementDetected", &mut d, config)
            .await;
        drop(d);
    }

    let _ = store.update_defacement(&record).await;
}

fn clear_screenshot(ctx: &PlatformContext) -> crate::domain::Platform {
    let mut platform = ctx.platform.clone();
    platform.screenshot_path = None;
    platform
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn clear_screenshot_removes_path() {
        let ctx = PlatformContext {
            platform: crate::domain::Platform {
                id: 1,
                url: "https://example.com".to_string(),
                entity_id: 1,
                domain_id: 1,
                is_active: true,
                screenshot_path: Some("screenshots/1.png".to_string()),
            },
            domain: crate::domain::Domain {
                id: 1,
                name: "example.com".to_string(),
                last_scan_at: None,
                last_ssl_scan_at: None,
                ssl_issue: false,
                domain_issue: false,
                resolved_ip: None,
            },
            entity: crate::domain::Entity {
                id: 1,
                name: "Example".to_string(),
                description: None,
            },
            focal_points: Vec::new(),
        };
        let cleared = clear_screenshot(&ctx);
        assert!(cleared.screenshot_path.is_none());
    }
}
