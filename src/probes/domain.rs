//! Domain Probe (§4.1), grounded on `cerb_scans/domainScan.py::DomainChecker`.

use crate::errors::ProbeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::time::Duration;
use trust_dns_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

#[derive(Debug, Clone, Default)]
pub struct DomainProbeConfig {
    pub check_whois: bool,
    pub check_dns: bool,
    pub check_expiry: bool,
    pub timeout: Duration,
    pub dns_servers: Vec<IpAddr>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainVerdict {
    pub resolved_ip: Option<IpAddr>,
}

/// Abstraction over WHOIS lookups so tests can substitute a fake registrar
/// response without making a network call. The production implementation
/// wraps the blocking `whois-rust` client in `spawn_blocking`.
#[async_trait]
pub trait WhoisLookup: Send + Sync {
    async fn expiration_date(&self, domain: &str) -> Result<Option<DateTime<Utc>>, String>;
}

pub struct WhoisRustLookup {
    client: whois_rust::WhoIs,
}

impl WhoisRustLookup {
    pub fn new(client: whois_rust::WhoIs) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WhoisLookup for WhoisRustLookup {
    async fn expiration_date(&self, domain: &str) -> Result<Option<DateTime<Utc>>, String> {
        let domain = domain.to_string();
        let client = self.client.clone();
        let raw = tokio::task::spawn_blocking(move || {
            let opts = whois_rust::WhoIsLookupOptions::from_string(domain)
                .map_err(|e| e.to_string())?;
            client.lookup(opts).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())??;

        Ok(parse_expiration_date(&raw))
    }
}

/// Extract a registry expiration date from raw WHOIS text. Registrars format
/// this field inconsistently; we scan for the handful of common labels.
fn parse_expiration_date(raw: &str) -> Option<DateTime<Utc>> {
    const LABELS: &[&str] = &[
        "Registry Expiry Date:",
        "Expiration Date:",
        "Registrar Registration Expiration Date:",
        "paid-till:",
    ];
    for line in raw.lines() {
        for label in LABELS {
            if let Some(rest) = line.trim().strip_prefix(label) {
                let value = rest.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
                    return Some(dt.with_timezone(&Utc));
                }
                if let Ok(dt) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
                    return Some(DateTime::<Utc>::from_naive_utc_and_offset(
                        dt.and_hms_opt(0, 0, 0).unwrap(),
                        Utc,
                    ));
                }
            }
        }
    }
    None
}

/// Run the domain probe. `whois` may be `None` when `check_whois` is false.
pub async fn check(
    domain: &str,
    config: &DomainProbeConfig,
    whois: Option<&dyn WhoisLookup>,
) -> Result<DomainVerdict, ProbeError> {
    let mut whois_failure: Option<ProbeError> = None;

    if config.check_whois {
        match whois {
            Some(client) => match client.expiration_date(domain).await {
                Ok(Some(expiry)) => {
                    if config.check_expiry {
                        let days = days_until(expiry);
                        if let Some(threshold) = matching_threshold(days) {
                            return Err(ProbeError::DomainExpiring { days: threshold });
                        }
                    }
                    // Expiry present and not at a reporting threshold: whois passes.
                    if !config.check_dns || config.dns_servers.is_empty() {
                        return Ok(DomainVerdict::default());
                    }
                }
                Ok(None) => {
                    whois_failure = Some(ProbeError::WhoisFailure(domain.to_string()));
                }
                Err(reason) => {
                    whois_failure = Some(ProbeError::DnsResolution(reason));
                }
            },
            None => {
                whois_failure = Some(ProbeError::WhoisFailure(domain.to_string()));
            }
        }

        // A whois/DNS-classified failure does not short-circuit when DNS
        // checking is still available; it falls through to DNS instead (§4.1.3).
        if let Some(failure) = whois_failure {
            if !config.check_dns || config.dns_servers.is_empty() {
                return Err(failure);
            }
        }
    }

    if config.check_dns && !config.dns_servers.is_empty() {
        return resolve_via_any_server(domain, &config.dns_servers, config.timeout).await;
    }

    Ok(DomainVerdict::default())
}

fn days_until(expiry: DateTime<Utc>) -> i64 {
    (expiry - Utc::now()).num_days()
}

fn matching_threshold(days: i64) -> Option<u32> {
    match days {
        7 => Some(7),
        14 => Some(14),
        30 => Some(30),
        _ => None,
    }
}

async fn resolve_via_any_server(
    domain: &str,
    servers: &[IpAddr],
    timeout: Duration,
) -> Result<DomainVerdict, ProbeError> {
    let mut errors = Vec::new();
    for server in servers {
        let group = NameServerConfigGroup::from_ips_clear(&[*server], 53, true);
        let resolver_config = ResolverConfig::from_parts(None, vec![], group);
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;

        let resolver = match TokioAsyncResolver::tokio(resolver_config, opts) {
            Ok(r) => r,
            Err(e) => {
                errors.push(format!("{server}: {e}"));
                continue;
            }
        };

        match resolver.lookup_ip(domain).await {
            Ok(response) => {
                if let Some(ip) = response.iter().next() {
                    return Ok(DomainVerdict {
                        resolved_ip: Some(ip),
                    });
                }
                errors.push(format!("{server}: empty response"));
            }
            Err(e) => errors.push(format!("{server}: {e}")),
        }
    }
    Err(ProbeError::AllDnsFailed(errors))
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    struct FakeWhois(Option<DateTime<Utc>>);

    #[async_trait]
    impl WhoisLookup for FakeWhois {
        async fn expiration_date(&self, _domain: &str) -> Result<Option<DateTime<Utc>>, String> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn whois_only_missing_expiry_is_authoritative_failure() {
        let config = DomainProbeConfig {
            check_whois: true,
            check_dns: false,
            check_expiry: true,
            timeout: Duration::from_secs(2),
            dns_servers: vec![],
        };
        let whois = FakeWhois(None);
        let result = check("example.com", &config, Some(&whois)).await;
        assert!(matches!(result, Err(ProbeError::WhoisFailure(_))));
    }

    #[tokio::test]
    async fn expiry_at_threshold_reports_domain_expiring() {
        let config = DomainProbeConfig {
            check_whois: true,
            check_dns: false,
            check_expiry: true,
            timeout: Duration::from_secs(2),
            dns_servers: vec![],
        };
        let expiry = Utc::now() + chrono::Duration::days(14);
        let whois = FakeWhois(Some(expiry));
        let result = check("example.com", &config, Some(&whois)).await;
        assert!(matches!(
            result,
            Err(ProbeError::DomainExpiring { days: 14 })
        ));
    }

    #[tokio::test]
    async fn expiry_off_threshold_passes() {
        let config = DomainProbeConfig {
            check_whois: true,
            check_dns: false,
            check_expiry: true,
            timeout: Duration::from_secs(2),
            dns_servers: vec![],
        };
        let expiry = Utc::now() + chrono::Duration::days(90);
        let whois = FakeWhois(Some(expiry));
        let result = check("example.com", &config, Some(&whois)).await;
        assert!(result.is_ok());
    }

    #[test]
    fn parses_common_whois_expiry_labels() {
        let raw = "Domain Name: EXAMPLE.COM\nRegistry Expiry Date: 2030-01-15T04:00:00Z\n";
        let parsed = parse_expiration_date(raw);
        assert!(parsed.is_some());
    }
}
