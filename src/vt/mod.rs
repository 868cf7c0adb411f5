//! VirusTotal scanner (§4.6), grounded on
//! `tools_integrated/virustotal.py::VirusTotalScanner` and `scan_vt.py`.
//!
//! The original drives the official `vt` Python SDK. No VirusTotal client
//! crate appears in this stack, so this talks to the public REST API
//! (`https://www.virustotal.com/api/v3`) directly over `reqwest`, gated by
//! the same [`crate::resilient::ResilientGate`] every other outbound probe
//! uses.

use crate::errors::VtError;
use crate::resilient::{ResilienceConfig, ResilientCallError, ResilientGate};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

const BASE_URL: &str = "https://www.virustotal.com/api/v3";

pub struct VirusTotalScanner {
    client: reqwest::Client,
    api_key: String,
    gate: ResilientGate,
    poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    data: SubmitData,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    id: String,
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    data: AnalysisData,
}

#[derive(Debug, Deserialize)]
struct AnalysisData {
    attributes: AnalysisAttributes,
}

#[derive(Debug, Deserialize)]
struct AnalysisAttributes {
    status: String,
    results: HashMap<String, VendorResult>,
}

#[derive(Debug, Deserialize)]
struct VendorResult {
    result: Option<String>,
}

/// Analysis result grouped by verdict, mirroring `get_vendors_by_result`.
pub struct ScanResult {
    pub vendors_by_result: HashMap<String, Vec<String>>,
}

impl ScanResult {
    /// Verdicts that are neither empty, "clean", "unrated" nor "none" count
    /// as malicious detections (`scan_vt.py::scan_platform`).
    pub fn malicious_results(&self) -> HashMap<String, Vec<String>> {
        self.vendors_by_result
            .iter()
            .filter(|(result, _)| {
                let lower = result.to_lowercase();
                !result.is_empty() && !["clean", "unrated", "none"].contains(&lower.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl VirusTotalScanner {
    pub fn new(api_key: String, poll_timeout: Duration) -> Result<Self, VtError> {
        if api_key.is_empty() {
            return Err(VtError::ApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VtError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            gate: ResilientGate::new(ResilienceConfig::default()),
            poll_timeout,
        })
    }

    pub async fn verify_api_key(&self) -> Result<bool, VtError> {
        let url = format!("{BASE_URL}/ip_addresses/8.8.8.8");
        match self.get(&url).await {
            Ok(_) => Ok(true),
            Err(VtError::ApiKey) | Err(VtError::Authentication) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn scan_url(&self, target: &str) -> Result<ScanResult, VtError> {
        let analysis_id = self.submit_url(target).await?;
        self.poll_analysis(&analysis_id).await
    }

    async fn submit_url(&self, target: &str) -> Result<String, VtError> {
        let url = format!("{BASE_URL}/urls");
        let form = [("url", target)];

        let result = self
            .gate
            .call(|| {
                let client = self.client.clone();
                let url = url.clone();
                let api_key = self.api_key.clone();
                let form = form.to_vec();
                async move {
                    client
                        .post(&url)
                        .header("x-apikey", api_key)
                        .form(&form)
                        .send()
                        .await
                }
            })
            .await;

        let resp = self.handle_gate_result(result).await?;
        let parsed: SubmitResponse = resp
            .json()
            .await
            .map_err(|e| VtError::Analysis(e.to_string()))?;
        Ok(parsed.data.id)
    }

    async fn poll_analysis(&self, analysis_id: &str) -> Result<ScanResult, VtError> {
        let url = format!("{BASE_URL}/analyses/{analysis_id}");
        let start = tokio::time::Instant::now();

        loop {
            if start.elapsed() > self.poll_timeout {
                return Err(VtError::Timeout(analysis_id.to_string()));
            }

            let resp = self.get(&url).await?;
            let parsed: AnalysisResponse = resp
                .json()
                .await
                .map_err(|e| VtError::Analysis(e.to_string()))?;

            match parsed.data.attributes.status.as_str() {
                "completed" => {
                    let mut vendors_by_result: HashMap<String, Vec<String>> = HashMap::new();
                    for (vendor, verdict) in parsed.data.attributes.results {
                        let result = verdict.result.unwrap_or_default();
                        vendors_by_result.entry(result).or_default().push(vendor);
                    }
                    return Ok(ScanResult { vendors_by_result });
                }
                "failed" => return Err(VtError::Analysis("analysis failed".to_string())),
                _ => tokio::time::sleep(Duration::from_secs(20)).await,
            }
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, VtError> {
        let result = self
            .gate
            .call(|| {
                let client = self.client.clone();
                let url = url.to_string();
                let api_key = self.api_key.clone();
                async move { client.get(&url).header("x-apikey", api_key).send().await }
            })
            .await;
        self.handle_gate_result(result).await
    }

    async fn handle_gate_result(
        &self,
        result: Result<reqwest::Response, ResilientCallError>,
    ) -> Result<reqwest::Response, VtError> {
        let resp = match result {
            Ok(resp) => resp,
            Err(ResilientCallError::CircuitOpen) => return Err(VtError::ServiceUnavailable),
            Err(ResilientCallError::RateLimitExceeded) => return Err(VtError::RateLimit),
            Err(ResilientCallError::Timeout) => {
                return Err(VtError::Timeout("request".to_string()))
            }
            Err(ResilientCallError::MaxRetriesExceeded(_)) => {
                return Err(VtError::Network("max retries exceeded".to_string()))
            }
            Err(ResilientCallError::Request(e)) => return Err(VtError::Network(e.to_string())),
        };

        match resp.status().as_u16() {
            200..=299 => Ok(resp),
            401 => Err(VtError::ApiKey),
            403 => Err(VtError::Permission),
            404 => Err(VtError::ResourceNotFound(resp.url().to_string())),
            429 => Err(VtError::RateLimit),
            503 => Err(VtError::ServiceUnavailable),
            status => Err(VtError::Network(format!("unexpected status {status}"))),
        }
    }
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_rejected() {
        assert!(matches!(
            VirusTotalScanner::new(String::new(), Duration::from_secs(1)),
            Err(VtError::ApiKey)
        ));
    }

    #[test]
    fn malicious_results_excludes_benign_verdicts() {
        let mut vendors_by_result = HashMap::new();
        vendors_by_result.insert("clean".to_string(), vec!["VendorA".to_string()]);
        vendors_by_result.insert("malware".to_string(), vec!["VendorB".to_string()]);
        vendors_by_result.insert("".to_string(), vec!["VendorC".to_string()]);
        let scan = ScanResult { vendors_by_result };

        let malicious = scan.malicious_results();
        assert_eq!(malicious.len(), 1);
        assert!(malicious.contains_key("malware"));
    }
}
