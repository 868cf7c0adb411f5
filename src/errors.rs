//! Typed error taxonomy for the monitoring engine (§7).
//!
//! Errors are grouped per subsystem rather than flattened into one enum,
//! following the same "sum type per subsystem" guidance the original
//! exception hierarchy (per-checker exception classes) maps onto.

use thiserror::Error;

/// Errors a probe can raise for a single platform/domain check.
#[derive(Debug, Error, Clone)]
pub enum ProbeError {
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),
    #[error("all configured DNS servers failed: {0:?}")]
    AllDnsFailed(Vec<String>),
    #[error("WHOIS lookup did not return an expiration date for {0}")]
    WhoisFailure(String),
    #[error("domain expires in {days} day(s)")]
    DomainExpiring { days: u32 },

    #[error("certificate error for {host}: {reason}")]
    SslCertificateError { host: String, reason: String },
    #[error("TLS handshake failed for {host}: {reason}")]
    SslHandshakeError { host: String, reason: String },
    #[error("certificate for {host} expires in {days} day(s) ({level})")]
    CertificateExpiring {
        host: String,
        level: ExpiryLevel,
        days: u32,
    },

    #[error("HTTP request to {url} timed out")]
    HttpTimeout { url: String },
    #[error("{url} is unreachable: {reason}")]
    HttpUnavailable { url: String, reason: String },
    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("SSL error while fetching {url}: {reason}")]
    HttpSslError { url: String, reason: String },

    #[error("capture of {url} timed out after {timeout_secs}s")]
    CaptureTimeout { url: String, timeout_secs: u64 },
    #[error("capture configuration error: {0}")]
    CaptureConfiguration(String),
    #[error("capture failed: {0}")]
    CaptureGeneric(String),
}

/// Severity tier for a certificate/domain expiration warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryLevel {
    Notice,
    Warning,
    Critical,
}

impl ExpiryLevel {
    /// Map a days-remaining threshold to its severity, per §4.1/§4.3.
    pub fn for_days(days: u32) -> Option<Self> {
        match days {
            7 => Some(ExpiryLevel::Critical),
            14 => Some(ExpiryLevel::Warning),
            30 => Some(ExpiryLevel::Notice),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExpiryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExpiryLevel::Notice => "notice",
            ExpiryLevel::Warning => "warning",
            ExpiryLevel::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Transport-level failures shared by every proxy-capable probe (HTTP, TLS).
///
/// A single attempt against one proxy (or the direct path) fails with
/// `ProxyError` (proxy protocol broke) or a site-level `ProbeError`. The
/// aggregate across all attempts is `AllProxiesFailed`, carrying the
/// `is_proxy_issue` classification upstream code uses to suppress alerting.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("proxy {proxy} failed: {reason}")]
    ProxyError { proxy: String, reason: String },

    #[error("all proxy attempts failed for {url}")]
    AllProxiesFailed {
        url: String,
        proxy_errors: Vec<String>,
        site_errors: Vec<String>,
    },
}

impl TransportError {
    /// True when every recorded failure was a proxy-protocol failure and no
    /// site-level error was observed — the signal that suppresses the alert
    /// state machine (§4.7).
    pub fn is_proxy_issue(&self) -> bool {
        match self {
            TransportError::ProxyError { .. } => false,
            TransportError::AllProxiesFailed {
                proxy_errors,
                site_errors,
                ..
            } => !proxy_errors.is_empty() && site_errors.is_empty(),
        }
    }
}

/// VirusTotal scanner failures (§4.6/§7).
#[derive(Debug, Error, Clone)]
pub enum VtError {
    #[error("invalid VirusTotal API key")]
    ApiKey,
    #[error("network error contacting VirusTotal: {0}")]
    Network(String),
    #[error("VirusTotal rate limit exceeded")]
    RateLimit,
    #[error("VirusTotal resource not found: {0}")]
    ResourceNotFound(String),
    #[error("VirusTotal request validation error: {0}")]
    Validation(String),
    #[error("VirusTotal scanner misconfigured: {0}")]
    Configuration(String),
    #[error("VirusTotal analysis failed: {0}")]
    Analysis(String),
    #[error("VirusTotal polling timed out for {0}")]
    Timeout(String),
    #[error("VirusTotal authentication failed")]
    Authentication,
    #[error("VirusTotal permission denied")]
    Permission,
    #[error("VirusTotal service unavailable")]
    ServiceUnavailable,
}

/// Persistence-layer failures (ambient — not named by spec.md directly, but
/// required so the orchestrator can distinguish "this platform's store
/// round-trip failed" from a probe failure).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("record not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn expiry_level_thresholds() {
        assert_eq!(ExpiryLevel::for_days(7), Some(ExpiryLevel::Critical));
        assert_eq!(ExpiryLevel::for_days(14), Some(ExpiryLevel::Warning));
        assert_eq!(ExpiryLevel::for_days(30), Some(ExpiryLevel::Notice));
        assert_eq!(ExpiryLevel::for_days(13), None);
        assert_eq!(ExpiryLevel::for_days(0), None);
    }

    #[test]
    fn is_proxy_issue_requires_only_proxy_errors() {
        let all_proxy = TransportError::AllProxiesFailed {
            url: "https://example.com".into(),
            proxy_errors: vec!["timeout".into()],
            site_errors: vec![],
        };
        assert!(all_proxy.is_proxy_issue());

        let mixed = TransportError::AllProxiesFailed {
            url: "https://example.com".into(),
            proxy_errors: vec!["timeout".into()],
            site_errors: vec!["dns failure".into()],
        };
        assert!(!mixed.is_proxy_issue());

        let single = TransportError::ProxyError {
            proxy: "http://proxy:8080".into(),
            reason: "refused".into(),
        };
        assert!(!single.is_proxy_issue());
    }
}
