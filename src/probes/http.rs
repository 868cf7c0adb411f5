//! HTTP Probe (§4.2), grounded on `cerb_scans/siteScan.py::WebsiteChecker`.

use super::ProxyAttemptLog;
use crate::errors::{ProbeError, TransportError};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpProbeConfig {
    pub proxies: Vec<String>,
    pub user_agent: String,
    pub timeout: Duration,
    pub verify_ssl: bool,
}

#[derive(Debug, Clone)]
pub struct HttpVerdict {
    pub status_code: u16,
    pub proxy_used: Option<String>,
    pub ssl_verified: bool,
}

pub enum HttpProbeOutcome {
    Verdict(HttpVerdict),
    Probe(ProbeError),
    Transport(TransportError),
}

pub async fn check(url: &str, config: &HttpProbeConfig) -> HttpProbeOutcome {
    if config.proxies.is_empty() {
        return match attempt(url, None, config, true).await {
            Ok(v) => HttpProbeOutcome::Verdict(v),
            Err(AttemptError::Proxy(reason)) => {
                // A direct attempt never raises a proxy error but keep the
                // match exhaustive and defensive.
                HttpProbeOutcome::Transport(TransportError::ProxyError {
                    proxy: "direct".into(),
                    reason,
                })
            }
            Err(AttemptError::Site(e)) => HttpProbeOutcome::Probe(e),
        };
    }

    let mut log = ProxyAttemptLog::new();
    for proxy in &config.proxies {
        match attempt(url, Some(proxy), config, true).await {
            Ok(v) => return HttpProbeOutcome::Verdict(v),
            Err(AttemptError::Proxy(reason)) => log.proxy_errors.push(reason),
            Err(AttemptError::Site(e)) => log.site_errors.push(e.to_string()),
        }
    }
    HttpProbeOutcome::Transport(log.into_aggregate(url))
}

enum AttemptError {
    Proxy(String),
    Site(ProbeError),
}

async fn attempt(
    url: &str,
    proxy: Option<&str>,
    config: &HttpProbeConfig,
    allow_ssl_retry: bool,
) -> Result<HttpVerdict, AttemptError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout)
        .danger_accept_invalid_certs(false);

    if let Some(proxy_url) = proxy {
        let p = reqwest::Proxy::all(proxy_url)
            .map_err(|e| AttemptError::Proxy(format!("invalid proxy {proxy_url}: {e}")))?;
        builder = builder.proxy(p);
    }

    let client = builder
        .build()
        .map_err(|e| AttemptError::Proxy(format!("client build failed: {e}")))?;

    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_client_error() || status.is_server_error() {
                return Err(AttemptError::Site(ProbeError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                }));
            }
            Ok(HttpVerdict {
                status_code: status.as_u16(),
                proxy_used: proxy.map(|s| s.to_string()),
                ssl_verified: true,
            })
        }
        Err(e) => classify_reqwest_error(url, proxy, config, e, allow_ssl_retry).await,
    }
}

async fn classify_reqwest_error(
    url: &str,
    proxy: Option<&str>,
    config: &HttpProbeConfig,
    e: reqwest::Error,
    allow_ssl_retry: bool,
) -> Result<HttpVerdict, AttemptError> {
    if e.is_timeout() {
        return Err(AttemptError::Site(ProbeError::HttpTimeout {
            url: url.to_string(),
        }));
    }

    if is_ssl_error(&e) {
        if allow_ssl_retry && !config.verify_ssl {
            return attempt_insecure(url, proxy, config).await;
        }
        return Err(AttemptError::Site(ProbeError::HttpSslError {
            url: url.to_string(),
            reason: e.to_string(),
        }));
    }

    if proxy.is_some() && is_proxy_protocol_error(&e) {
        return Err(AttemptError::Proxy(e.to_string()));
    }

    if e.is_connect() {
        return Err(AttemptError::Site(ProbeError::HttpUnavailable {
            url: url.to_string(),
            reason: e.to_string(),
        }));
    }

    Err(AttemptError::Site(ProbeError::HttpUnavailable {
        url: url.to_string(),
        reason: e.to_string(),
    }))
}

async fn attempt_insecure(
    url: &str,
    proxy: Option<&str>,
    config: &HttpProbeConfig,
) -> Result<HttpVerdict, AttemptError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout)
        .danger_accept_invalid_certs(true);

    if let Some(proxy_url) = proxy {
        let p = reqwest::Proxy::all(proxy_url)
            .map_err(|e| AttemptError::Proxy(format!("invalid proxy {proxy_url}: {e}")))?;
        builder = builder.proxy(p);
    }

    let client = builder
        .build()
        .map_err(|e| AttemptError::Proxy(format!("client build failed: {e}")))?;

    match client.get(url).send().await {
        Ok(resp) => {
            let status = resp.status();
            if status.is_client_error() || status.is_server_error() {
                return Err(AttemptError::Site(ProbeError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                }));
            }
            Ok(HttpVerdict {
                status_code: status.as_u16(),
                proxy_used: proxy.map(|s| s.to_string()),
                ssl_verified: false,
            })
        }
        Err(e) => Err(AttemptError::Site(ProbeError::HttpUnavailable {
            url: url.to_string(),
            reason: e.to_string(),
        })),
    }
}

fn is_ssl_error(e: &reqwest::Error) -> bool {
    e.to_string().to_lowercase().contains("ssl") || e.to_string().to_lowercase().contains("certificate")
}

fn is_proxy_protocol_error(e: &reqwest::Error) -> bool {
    e.is_connect() && e.to_string().to_lowercase().contains("proxy")
}

impl TransportError {
    /// Helper used by the orchestrator to decide whether to retry direct
    /// after proxy exhaustion (§4.9 step b).
    pub fn url(&self) -> Option<&str> {
        match self {
            TransportError::AllProxiesFailed { url, .. } => Some(url),
            TransportError::ProxyError { .. } => None,
        }
    }
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn ssl_error_detection_matches_substring() {
        // reqwest::Error isn't constructible in tests without a live request;
        // the classification helper is exercised indirectly via integration
        // tests. This test only documents the substring contract.
        assert!("ssl handshake failed".contains("ssl"));
    }
}
