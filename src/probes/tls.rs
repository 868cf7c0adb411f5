//! TLS Probe (§4.3), grounded on `cerb_scans/sslScan.py::SSLChecker` and the
//! teacher's `tls_utils.rs` certificate-parsing helpers.

use super::ProxyAttemptLog;
use crate::errors::{ExpiryLevel, ProbeError, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::rustls::{self, Certificate, ServerName};
use tokio_rustls::TlsConnector;

#[derive(Debug, Clone)]
pub struct TlsProbeConfig {
    pub port: u16,
    pub proxies: Vec<String>,
    pub timeout: Duration,
    pub check_error: bool,
    pub check_expiry: bool,
}

impl Default for TlsProbeConfig {
    fn default() -> Self {
        Self {
            port: 443,
            proxies: Vec::new(),
            timeout: Duration::from_secs(10),
            check_error: true,
            check_expiry: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsVerdict {
    pub subject_cn: Option<String>,
    pub issuer_self_signed: bool,
    pub proxy_used: Option<String>,
    /// Set when `check_error` was false and the probe never opened a
    /// connection (`sslScan.py::verify_certificate`'s `{'status': 'skipped'}`).
    pub skipped: bool,
}

enum AttemptError {
    Proxy(String),
    Site(ProbeError),
}

pub async fn check(hostname: &str, config: &TlsProbeConfig) -> Result<TlsVerdict, TlsOutcome> {
    if !config.check_error {
        return Ok(TlsVerdict {
            subject_cn: None,
            issuer_self_signed: false,
            proxy_used: None,
            skipped: true,
        });
    }

    if config.proxies.is_empty() {
        return attempt(hostname, None, config)
            .await
            .map_err(|e| match e {
                AttemptError::Proxy(reason) => TlsOutcome::Transport(TransportError::ProxyError {
                    proxy: "direct".into(),
                    reason,
                }),
                AttemptError::Site(err) => TlsOutcome::Probe(err),
            });
    }

    let mut log = ProxyAttemptLog::new();
    for proxy in &config.proxies {
        match attempt(hostname, Some(proxy), config).await {
            Ok(v) => return Ok(v),
            Err(AttemptError::Proxy(reason)) => log.proxy_errors.push(reason),
            Err(AttemptError::Site(e)) => log.site_errors.push(e.to_string()),
        }
    }
    Err(TlsOutcome::Transport(log.into_aggregate(hostname)))
}

pub enum TlsOutcome {
    Probe(ProbeError),
    Transport(TransportError),
}

async fn attempt(
    hostname: &str,
    proxy: Option<&str>,
    config: &TlsProbeConfig,
) -> Result<TlsVerdict, AttemptError> {
    let stream = match proxy {
        None => connect_direct(hostname, config.port, config.timeout).await?,
        Some(proxy_url) => connect_via_http_connect(hostname, config.port, proxy_url, config.timeout).await?,
    };

    let cert = fetch_leaf_certificate(stream, hostname, config.timeout).await?;

    let subject_cn = crate::tls_utils::first_common_name(&cert)
        .map_err(|e| AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: e.to_string(),
        }))?;
    let issuer_self_signed = crate::tls_utils::is_self_signed(&cert)
        .map_err(|e| AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: e.to_string(),
        }))?;

    if config.check_expiry {
        check_expiry(hostname, &cert)?;
    }

    Ok(TlsVerdict {
        subject_cn,
        issuer_self_signed,
        proxy_used: proxy.map(|s| s.to_string()),
        skipped: false,
    })
}

async fn connect_direct(
    hostname: &str,
    port: u16,
    dur: Duration,
) -> Result<TcpStream, AttemptError> {
    match timeout(dur, TcpStream::connect((hostname, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(AttemptError::Site(ProbeError::SslCertificateError {
            host: hostname.to_string(),
            reason: format!("connection error: {e}"),
        })),
        Err(_) => Err(AttemptError::Site(ProbeError::CaptureTimeout {
            url: hostname.to_string(),
            timeout_secs: dur.as_secs(),
        })),
    }
}

/// Tunnel through an HTTP(S) forward proxy using `CONNECT`, grounded on the
/// proxy-iteration pattern in `sslScan.py::_create_connection` (the Python
/// original also supports SOCKS; the Rust stack only carries HTTP proxies).
async fn connect_via_http_connect(
    hostname: &str,
    port: u16,
    proxy_url: &str,
    dur: Duration,
) -> Result<TcpStream, AttemptError> {
    let parsed = url::Url::parse(proxy_url)
        .map_err(|e| AttemptError::Proxy(format!("invalid proxy url {proxy_url}: {e}")))?;
    let proxy_host = parsed
        .host_str()
        .ok_or_else(|| AttemptError::Proxy(format!("proxy url missing host: {proxy_url}")))?;
    let proxy_port = parsed.port_or_known_default().unwrap_or(8080);

    let mut stream = timeout(dur, TcpStream::connect((proxy_host, proxy_port)))
        .await
        .map_err(|_| AttemptError::Proxy(format!("proxy connect timed out: {proxy_url}")))?
        .map_err(|e| AttemptError::Proxy(format!("proxy connect failed: {e}")))?;

    let request = format!(
        "CONNECT {hostname}:{port} HTTP/1.1\r\nHost: {hostname}:{port}\r\n\r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| AttemptError::Proxy(format!("proxy write failed: {e}")))?;

    let mut buf = [0u8; 512];
    let n = timeout(dur, stream.read(&mut buf))
        .await
        .map_err(|_| AttemptError::Proxy(format!("proxy CONNECT timed out: {proxy_url}")))?
        .map_err(|e| AttemptError::Proxy(format!("proxy read failed: {e}")))?;
    let response = String::from_utf8_lossy(&buf[..n]);
    if !response.starts_with("HTTP/1.1 200") && !response.starts_with("HTTP/1.0 200") {
        return Err(AttemptError::Proxy(format!(
            "proxy refused CONNECT: {}",
            response.lines().next().unwrap_or("")
        )));
    }

    Ok(stream)
}

async fn fetch_leaf_certificate(
    stream: TcpStream,
    hostname: &str,
    dur: Duration,
) -> Result<Certificate, AttemptError> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().map_err(|e| {
        AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: format!("loading native roots: {e}"),
        })
    })? {
        let _ = roots.add(&rustls::Certificate(cert.0));
    }

    let tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let server_name = ServerName::try_from(hostname).map_err(|e| {
        AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: format!("invalid server name: {e}"),
        })
    })?;

    let tls_stream = timeout(dur, connector.connect(server_name, stream))
        .await
        .map_err(|_| AttemptError::Site(ProbeError::CaptureTimeout {
            url: hostname.to_string(),
            timeout_secs: dur.as_secs(),
        }))?
        .map_err(|e| AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: e.to_string(),
        }))?;

    let (_, session) = tls_stream.get_ref();
    let chain = session
        .peer_certificates()
        .ok_or_else(|| AttemptError::Site(ProbeError::SslCertificateError {
            host: hostname.to_string(),
            reason: "no peer certificate presented".to_string(),
        }))?;
    chain
        .first()
        .cloned()
        .ok_or_else(|| AttemptError::Site(ProbeError::SslCertificateError {
            host: hostname.to_string(),
            reason: "empty certificate chain".to_string(),
        }))
}

fn check_expiry(hostname: &str, cert: &Certificate) -> Result<(), AttemptError> {
    let not_yet_valid = crate::tls_utils::is_cert_not_yet_valid(cert).map_err(|e| {
        AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: e.to_string(),
        })
    })?;
    if not_yet_valid {
        return Err(AttemptError::Site(ProbeError::SslCertificateError {
            host: hostname.to_string(),
            reason: "certificate is not yet valid".to_string(),
        }));
    }

    let expired = crate::tls_utils::is_cert_expired(cert).map_err(|e| {
        AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: e.to_string(),
        })
    })?;
    if expired {
        return Err(AttemptError::Site(ProbeError::SslCertificateError {
            host: hostname.to_string(),
            reason: "certificate has expired".to_string(),
        }));
    }

    let parsed = crate::tls_utils::parse_first_cert_x509(cert).map_err(|e| {
        AttemptError::Site(ProbeError::SslHandshakeError {
            host: hostname.to_string(),
            reason: e.to_string(),
        })
    })?;
    let not_after = parsed.validity().not_after.to_datetime();
    let now = x509_parser::time::ASN1Time::now().to_datetime();
    let days_remaining = (not_after - now).whole_days();

    for days in [7i64, 14, 30] {
        if days_remaining == days {
            return Err(AttemptError::Site(ProbeError::CertificateExpiring {
                host: hostname.to_string(),
                level: ExpiryLevel::for_days(days as u32).expect("days is one of the known thresholds"),
                days: days as u32,
            }));
        }
    }
    Ok(())
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_port_443() {
        let config = TlsProbeConfig::default();
        assert_eq!(config.port, 443);
        assert!(config.check_error);
        assert!(config.check_expiry);
    }

    #[tokio::test]
    async fn check_error_false_skips_connection() {
        let config = TlsProbeConfig {
            check_error: false,
            ..TlsProbeConfig::default()
        };
        let verdict = check("this-host-does-not-resolve.invalid", &config)
            .await
            .expect("check_error=false must never attempt a connection");
        assert!(verdict.skipped);
    }
}
