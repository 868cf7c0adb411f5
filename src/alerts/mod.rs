//! Alert state machine (§4.7), grounded on `cerb_scans/monitoring.py`'s
//! `collect_alert`/`create_alert`/`resolve_existing_alerts`/
//! `check_existing_alert`/`check_day_existing_alert`.

use crate::domain::{AlertKind, Configuration, DigestAccumulator, PlatformContext};
use crate::errors::StoreError;
use crate::notify::{self, Notifier};
use crate::observability::MetricsRegistry;
use crate::store::MonitoringStore;
use std::sync::Arc;

pub struct AlertEngine {
    store: Arc<dyn MonitoringStore>,
    metrics: Option<Arc<MetricsRegistry>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn MonitoringStore>) -> Self {
        Self {
            store,
            metrics: None,
            notifier: None,
        }
    }

    pub fn with_metrics(store: Arc<dyn MonitoringStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            store,
            metrics: Some(metrics),
            notifier: None,
        }
    }

    pub fn with_notifier(
        store: Arc<dyn MonitoringStore>,
        metrics: Arc<MetricsRegistry>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        Self {
            store,
            metrics: Some(metrics),
            notifier,
        }
    }

    /// Send the immediate per-alert "new issue" email, mirroring
    /// `scan_vt.py::VirusTotalTask.run`'s admin-template send right after
    /// `create_alert` (distinct from the end-of-run digest).
    async fn notify_issue(&self, ctx: &PlatformContext, kind: AlertKind, details: &str, config: &Configuration) {
        if !config.notify_enabled {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notification =
            notify::build_issue_notification(kind, &ctx.platform.url, details, &config.notification_email);
        let _ = notifier.send(notification).await;
    }

    /// Send the immediate "resolved" email, mirroring
    /// `monitoring.py::resolve_existing_alerts` / `scan_vt.py::resolve_existing_alerts`.
    async fn notify_resolved(&self, ctx: &PlatformContext, kind: AlertKind, config: &Configuration) {
        if !config.notify_enabled {
            return;
        }
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notification =
            notify::build_resolved_notification(kind, &ctx.platform.url, &config.notification_email);
        let _ = notifier.send(notification).await;
    }

    /// Report a newly observed issue for `kind` on this platform. At most
    /// one active alert exists per (platform, kind) — a second `report`
    /// call while one is already open is a no-op (§3 invariant).
    pub async fn report(
        &self,
        ctx: &PlatformContext,
        kind: AlertKind,
        details: &str,
        template: &str,
        digest: &mut DigestAccumulator,
        config: &Configuration,
    ) -> Result<bool, StoreError> {
        digest.record(kind, ctx);

        if self
            .store
            .active_alert_exists(ctx.platform.id, kind)
            .await?
        {
            return Ok(false);
        }

        self.store
            .create_alert(ctx.entity.id, ctx.platform.id, kind, details, template)
            .await?;
        if let Some(metrics) = &self.metrics {
            metrics
                .alerts_created_total
                .with_label_values(&[kind.wire_code()])
                .inc();
        }
        self.notify_issue(ctx, kind, details, config).await;
        Ok(true)
    }

    /// Like `report`, but the dedup window is "today" rather than "any
    /// active alert" — used for VT detections, which can legitimately
    /// recur daily even while a prior detection is still open
    /// (`scan_vt.py::check_existing_alert`, which the original actually
    /// calls after resolving, so in practice it behaves as "once per day").
    pub async fn report_daily(
        &self,
        ctx: &PlatformContext,
        kind: AlertKind,
        details: &str,
        template: &str,
        digest: &mut DigestAccumulator,
        config: &Configuration,
    ) -> Result<bool, StoreError> {
        digest.record(kind, ctx);

        if self
            .store
            .active_alert_created_today_exists(ctx.platform.id, kind)
            .await?
        {
            return Ok(false);
        }

        self.store
            .create_alert(ctx.entity.id, ctx.platform.id, kind, details, template)
            .await?;
        if let Some(metrics) = &self.metrics {
            metrics
                .alerts_created_total
                .with_label_values(&[kind.wire_code()])
                .inc();
        }
        self.notify_issue(ctx, kind, details, config).await;
        Ok(true)
    }

    /// Resolve the most recent active alert of `kind` for this platform, if
    /// one exists. Returns whether an alert was resolved (used to decide
    /// whether a "resolved" notification should be sent).
    pub async fn resolve(
        &self,
        ctx: &PlatformContext,
        kind: AlertKind,
        config: &Configuration,
    ) -> Result<bool, StoreError> {
        let resolved = self
            .store
            .resolve_active_alert(ctx.platform.id, kind)
            .await?;
        if resolved.is_some() {
            if let Some(metrics) = &self.metrics {
                metrics
                    .alerts_resolved_total
                    .with_label_values(&[kind.wire_code()])
                    .inc();
            }
            self.notify_resolved(ctx, kind, config).await;
        }
        Ok(resolved.is_some())
    }

    pub async fn check_active(
        &self,
        ctx: &PlatformContext,
        kind: AlertKind,
    ) -> Result<bool, StoreError> {
        self.store.active_alert_exists(ctx.platform.id, kind).await
    }

    pub async fn check_active_today(
        &self,
        ctx: &PlatformContext,
        kind: AlertKind,
    ) -> Result<bool, StoreError> {
        self.store
            .active_alert_created_today_exists(ctx.platform.id, kind)
            .await
    }
}
