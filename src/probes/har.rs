//! HAR Capture Probe (§4.4), grounded on `cerb_scans/analyseScan.py`
//! (`TreeNode`, `ContentProcessor`, `HARParser`).
//!
//! The original captures a full browser session with `playwrightcapture`
//! and converts the resulting HAR log into a request tree. No headless
//! browser automation crate appears anywhere in this stack, so this probe
//! captures at the HTTP level instead: it fetches the page, follows the
//! redirect chain itself, and walks same-origin sub-resources referenced
//! from the document. The tree/node shape and cycle-safe serialization are
//! preserved so a browser-driven capture could replace the fetch layer
//! later without touching callers.

use crate::errors::ProbeError;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct HarProbeConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_sub_resources: usize,
}

impl Default for HarProbeConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; OjuSentinel/1.0)".to_string(),
            timeout: Duration::from_secs(20),
            max_sub_resources: 40,
        }
    }
}

/// A single captured request/response, grounded on `analyseScan.py::TreeNode`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TreeNode {
    pub url: String,
    pub referer: Option<String>,
    pub size: Option<u64>,
    pub content_length: Option<u64>,
    pub hash: Option<String>,
    pub status: Option<u16>,
    pub is_redirect: bool,
    pub redirect_chain: Vec<String>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(url: String, referer: Option<String>) -> Self {
        Self {
            url,
            referer,
            size: None,
            content_length: None,
            hash: None,
            status: None,
            is_redirect: false,
            redirect_chain: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Serialize to a cycle-safe JSON value: a URL already on the path from
    /// the root is emitted as `{"url": ..., "is_cycle": true}` instead of
    /// being walked again (`analyseScan.py::TreeNode.to_dict`).
    pub fn to_json(&self, visited: &mut HashSet<String>) -> serde_json::Value {
        if visited.contains(&self.url) {
            return serde_json::json!({ "url": self.url, "is_cycle": true });
        }
        visited.insert(self.url.clone());

        let children: Vec<serde_json::Value> = self
            .children
            .iter()
            .map(|c| c.to_json(&mut visited.clone()))
            .collect();

        serde_json::json!({
            "url": self.url,
            "referer": self.referer,
            "size": self.size,
            "content_length": self.content_length,
            "hash": self.hash,
            "status": self.status,
            "is_redirect": self.is_redirect,
            "redirect_chain": self.redirect_chain,
            "children": children,
        })
    }
}

pub struct HarVerdict {
    pub roots: Vec<TreeNode>,
}

pub async fn capture(url: &str, config: &HarProbeConfig) -> Result<HarVerdict, ProbeError> {
    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| ProbeError::CaptureConfiguration(e.to_string()))?;

    let mut nodes: HashMap<String, TreeNode> = HashMap::new();
    let root = fetch_chain(&client, url, None, config.timeout).await?;
    let root_url = root.url.clone();
    nodes.insert(root_url.clone(), root);

    let base = Url::parse(url).map_err(|e| ProbeError::CaptureConfiguration(e.to_string()))?;
    let sub_resources = discover_sub_resources(&client, &base, config).await;

    for (resource_url, referer) in sub_resources.into_iter().take(config.max_sub_resources) {
        if nodes.contains_key(&resource_url) {
            continue;
        }
        if let Ok(node) = fetch_single(&client, &resource_url, Some(referer), config.timeout).await {
            nodes.insert(node.url.clone(), node);
        }
    }

    let root_node = nodes
        .remove(&root_url)
        .ok_or_else(|| ProbeError::CaptureGeneric("root capture vanished".to_string()))?;
    let mut root_node = root_node;
    root_node.children = nodes.into_values().collect();

    Ok(HarVerdict {
        roots: vec![root_node],
    })
}

/// Fetch `url`, following redirects manually so each hop becomes a node in
/// the chain, mirroring the `is_redirect`/`redirect_chain` bookkeeping in
/// `TreeNode` (the original observes this from the HAR log; here it is
/// observed directly from the response headers).
async fn fetch_chain(
    client: &reqwest::Client,
    url: &str,
    referer: Option<String>,
    timeout: Duration,
) -> Result<TreeNode, ProbeError> {
    let mut current = url.to_string();
    let mut chain = Vec::new();
    let mut hops = 0;

    loop {
        hops += 1;
        if hops > 10 {
            return Err(ProbeError::CaptureGeneric(format!(
                "redirect chain exceeded 10 hops starting at {url}"
            )));
        }

        let resp = tokio::time::timeout(timeout, client.get(&current).send())
            .await
            .map_err(|_| ProbeError::CaptureTimeout {
                url: current.clone(),
                timeout_secs: timeout.as_secs(),
            })?
            .map_err(|e| ProbeError::CaptureGeneric(e.to_string()))?;

        let status = resp.status();
        if status.is_redirection() {
            if let Some(location) = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
            {
                chain.push(current.clone());
                current = resolve_relative(&current, location);
                continue;
            }
        }

        let content_length = resp.content_length();
        let body = resp.text().await.unwrap_or_default();
        let (hash, size) = hash_and_size(&body);

        let mut node = TreeNode::leaf(url.to_string(), referer);
        node.status = Some(status.as_u16());
        node.content_length = content_length;
        node.hash = hash;
        node.size = size;
        node.is_redirect = !chain.is_empty();
        node.redirect_chain = chain;
        return Ok(node);
    }
}

async fn fetch_single(
    client: &reqwest::Client,
    url: &str,
    referer: Option<String>,
    timeout: Duration,
) -> Result<TreeNode, ProbeError> {
    fetch_chain(client, url, referer, timeout).await
}

fn hash_and_size(body: &str) -> (Option<String>, Option<u64>) {
    if body.is_empty() {
        return (None, None);
    }
    let bytes = body.as_bytes();
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    (Some(format!("{:x}", hasher.finalize())), Some(bytes.len() as u64))
}

fn resolve_relative(base: &str, location: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

/// Discover same-origin sub-resources referenced from the root document's
/// HTML (script/link/img `src`/`href` attributes), the HTTP-level stand-in
/// for the browser's resource-loading graph.
async fn discover_sub_resources(
    client: &reqwest::Client,
    base: &Url,
    config: &HarProbeConfig,
) -> Vec<(String, String)> {
    let html = match tokio::time::timeout(config.timeout, client.get(base.as_str()).send()).await {
        Ok(Ok(resp)) => resp.text().await.unwrap_or_default(),
        _ => return Vec::new(),
    };

    let mut found = Vec::new();
    let mut seen = HashSet::new();
    for attr in ["src=", "href="] {
        for candidate in extract_attribute_values(&html, attr) {
            if let Ok(resolved) = base.join(&candidate) {
                if resolved.origin() == base.origin() && seen.insert(resolved.to_string()) {
                    found.push((resolved.to_string(), base.to_string()));
                }
            }
        }
    }
    found
}

fn extract_attribute_values(html: &str, attr: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut rest = html;
    while let Some(pos) = rest.find(attr) {
        let after = &rest[pos + attr.len()..];
        let quote = after.chars().next();
        let (quote_char, body) = match quote {
            Some(c @ ('"' | '\'')) => (c, &after[1..]),
            _ => {
                rest = &rest[pos + attr.len()..];
                continue;
            }
        };
        if let Some(end) = body.find(quote_char) {
            values.push(body[..end].to_string());
            rest = &body[end + 1..];
        } else {
            break;
        }
    }
    values
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn hash_and_size_empty_body_is_none() {
        assert_eq!(hash_and_size(""), (None, None));
    }

    #[test]
    fn hash_and_size_nonempty_body_is_deterministic() {
        let (hash1, size1) = hash_and_size("hello");
        let (hash2, size2) = hash_and_size("hello");
        assert_eq!(hash1, hash2);
        assert_eq!(size1, Some(5));
    }

    #[test]
    fn cycle_detection_stops_recursion() {
        let mut child = TreeNode::leaf("https://example.com/a".to_string(), None);
        let mut root = TreeNode::leaf("https://example.com/".to_string(), None);
        child.children.push(root.clone());
        root.children.push(child);

        let mut visited = HashSet::new();
        let json = root.to_json(&mut visited);
        let child_json = &json["children"][0];
        let grandchild_json = &child_json["children"][0];
        assert_eq!(grandchild_json["is_cycle"], serde_json::json!(true));
    }

    #[test]
    fn extracts_quoted_attribute_values() {
        let html = r#"<script src="/app.js"></script><link href='/style.css'>"#;
        let srcs = extract_attribute_values(html, "src=");
        let hrefs = extract_attribute_values(html, "href=");
        assert_eq!(srcs, vec!["/app.js".to_string()]);
        assert_eq!(hrefs, vec!["/style.css".to_string()]);
    }
}
