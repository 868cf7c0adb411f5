//! Core data model (§3). These types are the core's view of rows owned
//! mostly by the external CRUD surface; the core itself only ever mutates
//! the fields §3 calls out under "Ownership".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type EntityId = i64;
pub type PlatformId = i64;
pub type DomainId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocalPoint {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub phones: Vec<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_ssl_scan_at: Option<DateTime<Utc>>,
    pub ssl_issue: bool,
    pub domain_issue: bool,
    pub resolved_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: PlatformId,
    pub url: String,
    pub entity_id: EntityId,
    pub domain_id: DomainId,
    pub is_active: bool,
    pub screenshot_path: Option<String>,
}

/// A platform with its domain, entity and focal points preloaded — the
/// shape the orchestrator actually iterates over (§4.9 step 1).
#[derive(Debug, Clone)]
pub struct PlatformContext {
    pub platform: Platform,
    pub domain: Domain,
    pub entity: Entity,
    pub focal_points: Vec<FocalPoint>,
}

/// Wire-stable alert kind codes (§6). The serde renames preserve the exact
/// strings the spec fixes, including the historical misspellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    #[serde(rename = "ssl")]
    Ssl,
    #[serde(rename = "ssl_expiredSoon")]
    SslExpiring,
    #[serde(rename = "domain_unvailable")]
    DomainUnavailable,
    #[serde(rename = "domain_expiredSoon")]
    DomainExpiring,
    Defacement,
    Availability,
    Vt,
    Other,
}

impl AlertKind {
    pub fn wire_code(self) -> &'static str {
        match self {
            AlertKind::Ssl => "ssl",
            AlertKind::SslExpiring => "ssl_expiredSoon",
            AlertKind::DomainUnavailable => "domain_unvailable",
            AlertKind::DomainExpiring => "domain_expiredSoon",
            AlertKind::Defacement => "defacement",
            AlertKind::Availability => "availability",
            AlertKind::Vt => "vt",
            AlertKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    New,
    InProgress,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    /// Active = still open (`new` or `in_progress`); terminal states are
    /// `resolved` and `false_positive` (§3).
    pub fn is_active(self) -> bool {
        matches!(self, AlertStatus::New | AlertStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub entity_id: EntityId,
    pub platform_id: PlatformId,
    pub kind: AlertKind,
    pub status: AlertStatus,
    pub details: String,
    pub template: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefacementRecord {
    pub id: i64,
    pub platform_id: PlatformId,
    pub baseline_capture: serde_json::Value,
    pub last_capture: serde_json::Value,
    pub baseline_tree_text: String,
    pub last_tree_text: String,
    pub is_defaced: bool,
    pub details: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub ssl_enabled: bool,
    pub domain_enabled: bool,
    pub defacement_enabled: bool,
    pub http_enabled: bool,
    pub ssl_check_error: bool,
    pub ssl_check_expiry: bool,
    pub domain_check_whois: bool,
    pub domain_check_dns: bool,
    pub domain_check_expiry: bool,
    pub defacement_size_tolerance: i64,
    pub defacement_whitelist: Vec<String>,
    pub http_max_response_ms: u64,
    pub vt_enabled: bool,
    pub vt_api_key: Option<String>,
    pub vt_frequency_s: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ssl_enabled: true,
            domain_enabled: true,
            defacement_enabled: true,
            http_enabled: true,
            ssl_check_error: true,
            ssl_check_expiry: true,
            domain_check_whois: true,
            domain_check_dns: true,
            domain_check_expiry: true,
            defacement_size_tolerance: 512,
            defacement_whitelist: vec!["www.google-analytics.com".to_string()],
            http_max_response_ms: 10_000,
            vt_enabled: false,
            vt_api_key: None,
            vt_frequency_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub notification_email: String,
    pub notify_enabled: bool,
    pub proxies: Vec<String>,
    pub use_proxy: bool,
    pub fallback_direct_on_proxy_fail: bool,
    pub user_agent: String,
    pub scan_frequency_s: u64,
    pub max_workers: u32,
    pub dns_servers: Vec<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            notification_email: String::new(),
            notify_enabled: false,
            proxies: Vec::new(),
            use_proxy: false,
            fallback_direct_on_proxy_fail: true,
            user_agent: "Mozilla/5.0 (compatible; OjuSentinel/1.0)".to_string(),
            scan_frequency_s: 3600,
            max_workers: 10,
            dns_servers: Vec::new(),
        }
    }
}

impl Configuration {
    /// Clamp `max_workers` into the spec's mandated 5-30 range (§3).
    pub fn clamped_max_workers(&self) -> u32 {
        self.max_workers.clamp(5, 30)
    }

    pub fn proxy_list(&self) -> Vec<String> {
        if self.use_proxy {
            self.proxies.clone()
        } else {
            Vec::new()
        }
    }
}

/// Per-run digest accumulator: for each alert kind, a map of entity -> the
/// platforms/focal points affected during this run (§4.8). Mirrors
/// `Monitoring.collected_alerts` in the original implementation.
#[derive(Debug, Default)]
pub struct DigestAccumulator {
    pub by_kind: HashMap<AlertKind, HashMap<EntityId, EntityDigest>>,
}

#[derive(Debug, Clone, Default)]
pub struct EntityDigest {
    pub entity_name: String,
    pub platform_urls: Vec<String>,
    pub focal_points: Vec<FocalPoint>,
}

impl DigestAccumulator {
    pub fn record(&mut self, kind: AlertKind, ctx: &PlatformContext) {
        let per_entity = self.by_kind.entry(kind).or_default();
        let entry = per_entity.entry(ctx.entity.id).or_insert_with(|| EntityDigest {
            entity_name: ctx.entity.name.clone(),
            platform_urls: Vec::new(),
            focal_points: ctx.focal_points.clone(),
        });
        if !entry.platform_urls.contains(&ctx.platform.url) {
            entry.platform_urls.push(ctx.platform.url.clone());
        }
    }

    /// Distinct platform ids/urls touched across all alert kinds this run.
    pub fn total_affected_platforms(&self) -> std::collections::HashSet<String> {
        let mut set = std::collections::HashSet::new();
        for per_entity in self.by_kind.values() {
            for digest in per_entity.values() {
                for url in &digest.platform_urls {
                    set.insert(url.clone());
                }
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.values().all(|m| m.is_empty())
    }
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    fn ctx(entity_id: EntityId, platform_id: PlatformId, url: &str) -> PlatformContext {
        PlatformContext {
            platform: Platform {
                id: platform_id,
                url: url.to_string(),
                entity_id,
                domain_id: 1,
                is_active: true,
                screenshot_path: None,
            },
            domain: Domain {
                id: 1,
                name: "example.com".to_string(),
                last_scan_at: None,
                last_ssl_scan_at: None,
                ssl_issue: false,
                domain_issue: false,
                resolved_ip: None,
            },
            entity: Entity {
                id: entity_id,
                name: format!("entity-{entity_id}"),
                description: None,
            },
            focal_points: Vec::new(),
        }
    }

    #[test]
    fn alert_kind_wire_codes_match_spec() {
        assert_eq!(AlertKind::Ssl.wire_code(), "ssl");
        assert_eq!(AlertKind::SslExpiring.wire_code(), "ssl_expiredSoon");
        assert_eq!(AlertKind::DomainUnavailable.wire_code(), "domain_unvailable");
        assert_eq!(AlertKind::DomainExpiring.wire_code(), "domain_expiredSoon");
    }

    #[test]
    fn alert_status_active_set() {
        assert!(AlertStatus::New.is_active());
        assert!(AlertStatus::InProgress.is_active());
        assert!(!AlertStatus::Resolved.is_active());
        assert!(!AlertStatus::FalsePositive.is_active());
    }

    #[test]
    fn max_workers_clamped_to_5_30() {
        let mut c = Configuration::default();
        c.max_workers = 1;
        assert_eq!(c.clamped_max_workers(), 5);
        c.max_workers = 100;
        assert_eq!(c.clamped_max_workers(), 30);
        c.max_workers = 12;
        assert_eq!(c.clamped_max_workers(), 12);
    }

    #[test]
    fn digest_accumulator_tracks_distinct_platforms_across_kinds() {
        let mut digest = DigestAccumulator::default();
        digest.record(AlertKind::Availability, &ctx(1, 10, "https://a.example.com"));
        digest.record(AlertKind::Ssl, &ctx(1, 10, "https://a.example.com"));
        digest.record(AlertKind::Defacement, &ctx(2, 20, "https://b.example.com"));

        assert_eq!(digest.total_affected_platforms().len(), 2);
        assert!(!digest.is_empty());
    }
}
