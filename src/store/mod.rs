//! Persistence layer. Grounded on the teacher's `age_client.rs`
//! `AgeRepo`/`AgeClient` split: a narrow async trait the core depends on,
//! and one concrete implementation that speaks raw, parameterized SQL
//! through `sqlx` (no compile-time `query!` macros, since those require a
//! live database or an offline query cache this workspace cannot produce).

use crate::domain::{
    Alert, AlertKind, AlertStatus, Configuration, DefacementRecord, Domain, Entity, EntityId,
    FocalPoint, Platform, PlatformContext, PlatformId, ScanConfig,
};
use crate::errors::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

#[async_trait]
pub trait MonitoringStore: Send + Sync {
    async fn load_configuration(&self) -> Result<Configuration, StoreError>;
    async fn load_scan_config(&self) -> Result<ScanConfig, StoreError>;
    async fn active_platforms(&self) -> Result<Vec<PlatformContext>, StoreError>;

    async fn update_domain(&self, domain: &Domain) -> Result<(), StoreError>;
    async fn update_platform(&self, platform: &Platform) -> Result<(), StoreError>;

    async fn get_or_create_defacement(
        &self,
        platform_id: PlatformId,
    ) -> Result<(DefacementRecord, bool), StoreError>;
    async fn update_defacement(&self, record: &DefacementRecord) -> Result<(), StoreError>;

    async fn active_alert_exists(
        &self,
        platform_id: PlatformId,
        kind: AlertKind,
    ) -> Result<bool, StoreError>;
    async fn active_alert_created_today_exists(
        &self,
        platform_id: PlatformId,
        kind: AlertKind,
    ) -> Result<bool, StoreError>;
    async fn create_alert(
        &self,
        entity_id: EntityId,
        platform_id: PlatformId,
        kind: AlertKind,
        details: &str,
        template: &str,
    ) -> Result<Alert, StoreError>;
    async fn resolve_active_alert(
        &self,
        platform_id: PlatformId,
        kind: AlertKind,
    ) -> Result<Option<Alert>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn alert_kind_from_row(code: &str) -> AlertKind {
    match code {
        "ssl" => AlertKind::Ssl,
        "ssl_expiredSoon" => AlertKind::SslExpiring,
        "domain_unvailable" => AlertKind::DomainUnavailable,
        "domain_expiredSoon" => AlertKind::DomainExpiring,
        "defacement" => AlertKind::Defacement,
        "availability" => AlertKind::Availability,
        "vt" => AlertKind::Vt,
        _ => AlertKind::Other,
    }
}

fn alert_status_from_row(code: &str) -> AlertStatus {
    match code {
        "new" => AlertStatus::New,
        "in_progress" => AlertStatus::InProgress,
        "resolved" => AlertStatus::Resolved,
        _ => AlertStatus::FalsePositive,
    }
}

fn alert_status_code(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::New => "new",
        AlertStatus::InProgress => "in_progress",
        AlertStatus::Resolved => "resolved",
        AlertStatus::FalsePositive => "false_positive",
    }
}

#[async_trait]
impl MonitoringStore for PostgresStore {
    async fn load_configuration(&self) -> Result<Configuration, StoreError> {
        let row = sqlx::query(
            "SELECT notification_email, notify_enabled, proxies, use_proxy, \
             fallback_direct_on_proxy_fail, user_agent, scan_frequency_s, max_workers, \
             dns_servers FROM configuration LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(Configuration::default());
        };

        Ok(Configuration {
            notification_email: row.try_get("notification_email")?,
            notify_enabled: row.try_get("notify_enabled")?,
            proxies: row.try_get("proxies")?,
            use_proxy: row.try_get("use_proxy")?,
            fallback_direct_on_proxy_fail: row.try_get("fallback_direct_on_proxy_fail")?,
            user_agent: row.try_get("user_agent")?,
            scan_frequency_s: row.try_get::<i64, _>("scan_frequency_s")? as u64,
            max_workers: row.try_get::<i32, _>("max_workers")? as u32,
            dns_servers: row.try_get("dns_servers")?,
        })
    }

    async fn load_scan_config(&self) -> Result<ScanConfig, StoreError> {
        let row = sqlx::query(
            "SELECT ssl_enabled, domain_enabled, defacement_enabled, http_enabled, \
             ssl_check_error, ssl_check_expiry, domain_check_whois, domain_check_dns, \
             domain_check_expiry, defacement_size_tolerance, defacement_whitelist, \
             http_max_response_ms, vt_enabled, vt_api_key, vt_frequency_s \
             FROM scan_config LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(ScanConfig::default());
        };

        Ok(ScanConfig {
            ssl_enabled: row.try_get("ssl_enabled")?,
            domain_enabled: row.try_get("domain_enabled")?,
            defacement_enabled: row.try_get("defacement_enabled")?,
            http_enabled: row.try_get("http_enabled")?,
            ssl_check_error: row.try_get("ssl_check_error")?,
            ssl_check_expiry: row.try_get("ssl_check_expiry")?,
            domain_check_whois: row.try_get("domain_check_whois")?,
            domain_check_dns: row.try_get("domain_check_dns")?,
            domain_check_expiry: row.try_get("domain_check_expiry")?,
            defacement_size_tolerance: row.try_get("defacement_size_tolerance")?,
            defacement_whitelist: row.try_get("defacement_whitelist")?,
            http_max_response_ms: row.try_get::<i64, _>("http_max_response_ms")? as u64,
            vt_enabled: row.try_get("vt_enabled")?,
            vt_api_key: row.try_get("vt_api_key")?,
            vt_frequency_s: row.try_get::<i64, _>("vt_frequency_s")? as u64,
        })
    }

    async fn active_platforms(&self) -> Result<Vec<PlatformContext>, StoreError> {
        let rows = sqlx::query(
            "SELECT p.id AS platform_id, p.url, p.entity_id, p.domain_id, p.is_active, \
             p.screenshot_path, d.id AS domain_id2, d.name AS domain_name, \
             d.last_scan_at, d.last_ssl_scan_at, d.ssl_issue, d.domain_issue, \
             d.resolved_ip, e.id AS entity_id2, e.name AS entity_name, e.description \
             FROM platforms p \
             JOIN domains d ON d.id = p.domain_id \
             JOIN entities e ON e.id = p.entity_id \
             WHERE p.is_active = true",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut contexts = Vec::with_capacity(rows.len());
        for row in rows {
            let platform_id: PlatformId = row.try_get("platform_id")?;
            let entity_id: EntityId = row.try_get("entity_id")?;

            let focal_rows = sqlx::query(
                "SELECT fp.id, fp.full_name, fp.email, fp.phones, fp.is_active \
                 FROM entity_focal_points efp \
                 JOIN focal_points fp ON fp.id = efp.focal_point_id \
                 WHERE efp.entity_id = $1 AND fp.is_active = true",
            )
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;

            let focal_points = focal_rows
                .into_iter()
                .map(|r| -> Result<FocalPoint, StoreError> {
                    Ok(FocalPoint {
                        id: r.try_get("id")?,
                        full_name: r.try_get("full_name")?,
                        email: r.try_get("email")?,
                        phones: r.try_get("phones")?,
                        is_active: r.try_get("is_active")?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            contexts.push(PlatformContext {
                platform: Platform {
                    id: platform_id,
                    url: row.try_get("url")?,
                    entity_id,
                    domain_id: row.try_get("domain_id")?,
                    is_active: row.try_get("is_active")?,
                    screenshot_path: row.try_get("screenshot_path")?,
                },
                domain: Domain {
                    id: row.try_get("domain_id2")?,
                    name: row.try_get("domain_name")?,
                    last_scan_at: row.try_get("last_scan_at")?,
                    last_ssl_scan_at: row.try_get("last_ssl_scan_at")?,
                    ssl_issue: row.try_get("ssl_issue")?,
                    domain_issue: row.try_get("domain_issue")?,
                    resolved_ip: row.try_get("resolved_ip")?,
                },
                entity: Entity {
                    id: row.try_get("entity_id2")?,
                    name: row.try_get("entity_name")?,
                    description: row.try_get("description")?,
                },
                focal_points,
            });
        }
        Ok(contexts)
    }

    async fn update_domain(&self, domain: &Domain) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE domains SET last_scan_at = $1, last_ssl_scan_at = $2, ssl_issue = $3, \
             domain_issue = $4, resolved_ip = $5 WHERE id = $6",
        )
        .bind(domain.last_scan_at)
        .bind(domain.last_ssl_scan_at)
        .bind(domain.ssl_issue)
        .bind(domain.domain_issue)
        .bind(&domain.resolved_ip)
        .bind(domain.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_platform(&self, platform: &Platform) -> Result<(), StoreError> {
        sqlx::query("UPDATE platforms SET screenshot_path = $1 WHERE id = $2")
            .bind(&platform.screenshot_path)
            .bind(platform.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_or_create_defacement(
        &self,
        platform_id: PlatformId,
    ) -> Result<(DefacementRecord, bool), StoreError> {
        if let Some(row) = sqlx::query(
            "SELECT id, platform_id, baseline_capture, last_capture, baseline_tree_text, \
             last_tree_text, is_defaced, details, updated_at FROM defacements \
             WHERE platform_id = $1",
        )
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok((
                DefacementRecord {
                    id: row.try_get("id")?,
                    platform_id: row.try_get("platform_id")?,
                    baseline_capture: row.try_get("baseline_capture")?,
                    last_capture: row.try_get("last_capture")?,
                    baseline_tree_text: row.try_get("baseline_tree_text")?,
                    last_tree_text: row.try_get("last_tree_text")?,
                    is_defaced: row.try_get("is_defaced")?,
                    details: row.try_get("details")?,
                    updated_at: row.try_get("updated_at")?,
                },
                false,
            ));
        }

        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO defacements \
             (platform_id, baseline_capture, last_capture, baseline_tree_text, \
              last_tree_text, is_defaced, details, updated_at) \
             VALUES ($1, $2, $2, '', '', false, '', $3) \
             RETURNING id, platform_id, baseline_capture, last_capture, \
                       baseline_tree_text, last_tree_text, is_defaced, details, updated_at",
        )
        .bind(platform_id)
        .bind(serde_json::json!({}))
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            DefacementRecord {
                id: row.try_get("id")?,
                platform_id: row.try_get("platform_id")?,
                baseline_capture: row.try_get("baseline_capture")?,
                last_capture: row.try_get("last_capture")?,
                baseline_tree_text: row.try_get("baseline_tree_text")?,
                last_tree_text: row.try_get("last_tree_text")?,
                is_defaced: row.try_get("is_defaced")?,
                details: row.try_get("details")?,
                updated_at: row.try_get("updated_at")?,
            },
            true,
        ))
    }

    async fn update_defacement(&self, record: &DefacementRecord) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE defacements SET baseline_capture = $1, last_capture = $2, \
             baseline_tree_text = $3, last_tree_text = $4, is_defaced = $5, details = $6, \
             updated_at = $7 WHERE id = $8",
        )
        .bind(&record.baseline_capture)
        .bind(&record.last_capture)
        .bind(&record.baseline_tree_text)
        .bind(&record.last_tree_text)
        .bind(record.is_defaced)
        .bind(&record.details)
        .bind(record.updated_at)
        .bind(record.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_alert_exists(
        &self,
        platform_id: PlatformId,
        kind: AlertKind,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE platform_id = $1 AND alert_type = $2 \
             AND status IN ('new', 'in_progress')) AS exists",
        )
        .bind(platform_id)
        .bind(kind.wire_code())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("exists")?)
    }

    async fn active_alert_created_today_exists(
        &self,
        platform_id: PlatformId,
        kind: AlertKind,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM alerts WHERE platform_id = $1 AND alert_type = $2 \
             AND status IN ('new', 'in_progress') \
             AND created_at >= date_trunc('day', now())) AS exists",
        )
        .bind(platform_id)
        .bind(kind.wire_code())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("exists")?)
    }

    async fn create_alert(
        &self,
        entity_id: EntityId,
        platform_id: PlatformId,
        kind: AlertKind,
        details: &str,
        template: &str,
    ) -> Result<Alert, StoreError> {
        let row = sqlx::query(
            "INSERT INTO alerts (entity_id, platform_id, alert_type, status, details, \
             templates, created_at, updated_at) \
             VALUES ($1, $2, $3, 'new', $4, $5, now(), now()) \
             RETURNING id, entity_id, platform_id, alert_type, status, details, \
                       templates, created_at, updated_at",
        )
        .bind(entity_id)
        .bind(platform_id)
        .bind(kind.wire_code())
        .bind(details)
        .bind(template)
        .fetch_one(&self.pool)
        .await?;

        Ok(Alert {
            id: row.try_get("id")?,
            entity_id: row.try_get("entity_id")?,
            platform_id: row.try_get("platform_id")?,
            kind: alert_kind_from_row(row.try_get::<String, _>("alert_type")?.as_str()),
            status: alert_status_from_row(row.try_get::<String, _>("status")?.as_str()),
            details: row.try_get("details")?,
            template: row.try_get("templates")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn resolve_active_alert(
        &self,
        platform_id: PlatformId,
        kind: AlertKind,
    ) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query(
            "UPDATE alerts SET status = $1, updated_at = now() \
             WHERE id = (SELECT id FROM alerts WHERE platform_id = $2 AND alert_type = $3 \
                         AND status IN ('new', 'in_progress') \
                         ORDER BY created_at DESC LIMIT 1) \
             RETURNING id, entity_id, platform_id, alert_type, status, details, \
                       templates, created_at, updated_at",
        )
        .bind(alert_status_code(AlertStatus::Resolved))
        .bind(platform_id)
        .bind(kind.wire_code())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(Alert {
            id: row.try_get("id")?,
            entity_id: row.try_get("entity_id")?,
            platform_id: row.try_get("platform_id")?,
            kind: alert_kind_from_row(row.try_get::<String, _>("alert_type")?.as_str()),
            status: alert_status_from_row(row.try_get::<String, _>("status")?.as_str()),
            details: row.try_get("details")?,
            template: row.try_get("templates")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn alert_kind_round_trips_through_wire_codes() {
        for kind in [
            AlertKind::Ssl,
            AlertKind::SslExpiring,
            AlertKind::DomainUnavailable,
            AlertKind::DomainExpiring,
            AlertKind::Defacement,
            AlertKind::Availability,
            AlertKind::Vt,
            AlertKind::Other,
        ] {
            assert_eq!(alert_kind_from_row(kind.wire_code()), kind);
        }
    }

    #[test]
    fn alert_status_round_trips() {
        for status in [
            AlertStatus::New,
            AlertStatus::InProgress,
            AlertStatus::Resolved,
            AlertStatus::FalsePositive,
        ] {
            assert_eq!(alert_status_from_row(alert_status_code(status)), status);
        }
    }
}
