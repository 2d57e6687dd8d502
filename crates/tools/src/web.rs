//! URL fetching and web search.
//!
//! Safety properties of the fetcher:
//! - Only http/https schemes
//! - Hostnames resolving to private/internal addresses are blocked
//! - Hard timeout, response-size cap, text-output cap

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use serde::Deserialize;

use fin_domain::config::{FetchConfig, ResearchConfig};
use fin_domain::plan::SourceRef;
use fin_domain::tool::ToolDefinition;
use fin_domain::{Error, Result};

use crate::Tool;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSRF guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || is_v4_shared_address(v4)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || is_v6_unique_local(v6)
                || is_v6_link_local(v6)
        }
    }
}

/// 100.64.0.0/10 — shared address space (CGNAT).
fn is_v4_shared_address(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// fc00::/7 unique-local.
fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFE00) == 0xFC00
}

/// fe80::/10 link-local.
fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFFC0) == 0xFE80
}

/// Validate a URL before fetching: scheme must be http(s) and the host must
/// not resolve to a private/internal address.
pub fn validate_url(raw_url: &str) -> std::result::Result<Url, String> {
    let parsed = Url::parse(raw_url).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("blocked scheme: {other}:// (only http/https allowed)")),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL has no host".to_string())?;
    let port = parsed.port_or_known_default().unwrap_or(80);

    let addrs: Vec<_> = format!("{host}:{port}")
        .to_socket_addrs()
        .map_err(|e| format!("DNS resolution failed for {host}: {e}"))?
        .collect();
    if addrs.is_empty() {
        return Err(format!("DNS resolution returned no addresses for {host}"));
    }
    for addr in &addrs {
        if is_private_ip(&addr.ip()) {
            return Err(format!(
                "blocked request to private/internal address: {host} resolves to {}",
                addr.ip()
            ));
        }
    }

    Ok(parsed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML → readable text
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Strip markup and collapse whitespace into readable text.
pub fn extract_readable_text(html: &str, max_chars: usize) -> String {
    let document = scraper::Html::parse_document(html);
    let skip = scraper::Selector::parse("script, style, noscript, svg")
        .expect("static selector");
    let skipped: std::collections::HashSet<_> = document
        .select(&skip)
        .flat_map(|el| el.descendants().map(|n| n.id()))
        .collect();

    let mut text = String::new();
    for node in document.root_element().descendants() {
        if skipped.contains(&node.id()) {
            continue;
        }
        if let Some(fragment) = node.value().as_text() {
            let trimmed = fragment.trim();
            if !trimmed.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(trimmed);
                if text.len() >= max_chars {
                    break;
                }
            }
        }
    }

    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fetch_url tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct FetchUrlTool {
    client: reqwest::Client,
    config: FetchConfig,
}

impl FetchUrlTool {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent("finagent/0.1 (+https://github.com/finsearch/finagent)")
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn fetch(&self, raw_url: &str) -> Result<String> {
        let url = validate_url(raw_url).map_err(|e| Error::ToolFailed {
            tool: "fetch_url".into(),
            message: e,
        })?;

        let response = self.client.get(url).send().await.map_err(|e| {
            Error::ToolFailed {
                tool: "fetch_url".into(),
                message: format!("request failed: {e}"),
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::ToolFailed {
                tool: "fetch_url".into(),
                message: format!("HTTP {}", response.status()),
            });
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true);

        // Stream the body with a hard size cap.
        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::ToolFailed {
                tool: "fetch_url".into(),
                message: format!("read failed: {e}"),
            })?;
            body.extend_from_slice(&chunk);
            if body.len() > self.config.max_bytes {
                body.truncate(self.config.max_bytes);
                break;
            }
        }
        let raw = String::from_utf8_lossy(&body);

        Ok(if is_html {
            extract_readable_text(&raw, self.config.max_text_chars)
        } else if raw.chars().count() > self.config.max_text_chars {
            raw.chars().take(self.config.max_text_chars).collect()
        } else {
            raw.into_owned()
        })
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fetch_url".into(),
            description: "Fetch a public web page and return its readable text.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "URL to fetch" }
                },
                "required": ["url"]
            }),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String> {
        let url = crate::require_str_arg(&args, "url")?;
        self.fetch(url).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Web search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One web search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default, alias = "content")]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Thin client for a SearxNG-compatible JSON search endpoint.
#[derive(Clone)]
pub struct WebSearchClient {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl WebSearchClient {
    pub fn new(config: &ResearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("finagent/0.1 (+https://github.com/finsearch/finagent)")
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.search_endpoint.clone(),
            max_results: config.search_max_results,
        })
    }

    /// Search the open web. `domains` (when non-empty) keeps only hits
    /// whose host ends with one of the given suffixes.
    pub async fn search(&self, query: &str, domains: &[String]) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| Error::Http(format!("search request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("search returned {}", response.status())));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("search response unparseable: {e}")))?;

        let mut hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .filter(|hit| domains.is_empty() || host_matches_any(&hit.url, domains))
            .collect();
        hits.truncate(self.max_results);
        Ok(hits)
    }

    /// Search and render the hits into a single text block plus sources.
    pub async fn search_rendered(
        &self,
        query: &str,
        domains: &[String],
    ) -> Result<(String, Vec<SourceRef>)> {
        let hits = self.search(query, domains).await?;
        if hits.is_empty() {
            return Ok((format!("No web results found for: {query}"), Vec::new()));
        }
        let mut text = String::new();
        let mut sources = Vec::new();
        for (i, hit) in hits.iter().enumerate() {
            text.push_str(&format!(
                "{}. {} — {}\n   {}\n",
                i + 1,
                hit.title,
                hit.url,
                hit.snippet
            ));
            sources.push(SourceRef {
                url: Some(hit.url.clone()),
                title: if hit.title.is_empty() {
                    None
                } else {
                    Some(hit.title.clone())
                },
            });
        }
        Ok((text, sources))
    }
}

/// Whether the URL's host equals one of the suffixes or ends with
/// `".{suffix}"`.
pub fn host_matches_any(url: &str, suffixes: &[String]) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    suffixes.iter().any(|suffix| {
        host == suffix || host.ends_with(&format!(".{suffix}"))
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// web_search tool wrapper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebSearchTool {
    client: WebSearchClient,
}

impl WebSearchTool {
    pub fn new(client: WebSearchClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".into(),
            description: "Search the open web and return titled results with snippets.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Search query" }
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<String> {
        let query = crate::require_str_arg(&args, "query")?;
        let (text, _sources) = self.client.search_rendered(query, &[]).await?;
        Ok(text)
    }
}
