use dossier_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Instant;

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    // Keep a conservative cap even if callers pass something huge.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

pub const BRAVE_DEFAULT_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

#[derive(Debug, Clone)]
pub struct BraveSearchProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

#[derive(Debug, Clone)]
pub struct SearxngSearchProvider {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl BraveSearchProvider {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::NotConfigured(
                "brave search requires a non-empty API key".to_string(),
            ));
        }
        Ok(Self {
            client,
            api_key,
            endpoint: BRAVE_DEFAULT_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl SearxngSearchProvider {
    pub fn new(client: reqwest::Client, endpoints: Vec<String>) -> Result<Self> {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(Error::NotConfigured(
                "searxng search requires at least one endpoint".to_string(),
            ));
        }
        Ok(Self { client, endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn endpoint_search_for(base_endpoint: &str) -> String {
        // Accept either a base URL (…/), or a full /search endpoint.
        let mut base = base_endpoint.trim().trim_end_matches('/').to_string();
        if !base.ends_with("/search") {
            base.push_str("/search");
        }
        base
    }

    fn stable_hash64(query: &SearchQuery) -> u64 {
        // Stable across runs (unlike HashMap's RandomState).
        // FNV-1a over the routing fields.
        let mut h: u64 = 1469598103934665603;
        for b in query.query.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        if let Some(lang) = query.language.as_deref() {
            for b in lang.as_bytes() {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
        }
        h
    }

    fn pick_endpoint_index(&self, q: &SearchQuery) -> usize {
        if self.endpoints.is_empty() {
            return 0;
        }
        (Self::stable_hash64(q) as usize) % self.endpoints.len()
    }
}

pub async fn searxng_search_at_endpoint(
    client: &reqwest::Client,
    base_endpoint: &str,
    q: &SearchQuery,
) -> Result<SearchResponse> {
    let t0 = Instant::now();
    let max_results = q.max_results.unwrap_or(10).min(20);
    let timeout_ms = timeout_ms_from_query(q);

    let endpoint_search = SearxngSearchProvider::endpoint_search_for(base_endpoint);
    let mut req = client
        .get(endpoint_search)
        .query(&[("q", q.query.as_str()), ("format", "json")]);

    // Best-effort hint: SearXNG supports `language` on many instances.
    if let Some(lang) = q.language.as_deref() {
        req = req.query(&[("language", lang)]);
    }

    let resp = req
        .timeout(std::time::Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| Error::Search(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Search(format!("searxng search HTTP {status}")));
    }

    let parsed: SearxngSearchResponse = resp
        .json()
        .await
        .map_err(|e| Error::Search(e.to_string()))?;

    let mut out = Vec::new();
    if let Some(rs) = parsed.results {
        for r in rs.into_iter().take(max_results) {
            let Some(url) = r.url else { continue };
            out.push(SearchResult {
                url,
                title: r.title,
                snippet: r.content,
                source: "searxng".to_string(),
            });
        }
    }

    let mut timings_ms = BTreeMap::new();
    timings_ms.insert("search".to_string(), t0.elapsed().as_millis());

    Ok(SearchResponse {
        results: out,
        provider: "searxng".to_string(),
        timings_ms,
    })
}

#[derive(Debug, Deserialize)]
struct BraveWebSearchResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Option<Vec<BraveWebResult>>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    url: String,
    title: Option<String>,
    description: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for BraveSearchProvider {
    fn name(&self) -> &'static str {
        "brave"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let timeout_ms = timeout_ms_from_query(q);

        let mut req = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .query(&[("q", q.query.as_str())]);

        if let Some(n) = q.max_results {
            // Brave uses `count` for result count.
            req = req.query(&[("count", n.to_string())]);
        }
        if let Some(lang) = q.language.as_deref() {
            req = req.query(&[("search_lang", lang)]);
        }

        let resp = req
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("brave search HTTP {status}")));
        }

        let parsed: BraveWebSearchResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let mut out = Vec::new();
        if let Some(web) = parsed.web {
            if let Some(results) = web.results {
                for r in results {
                    out.push(SearchResult {
                        url: r.url,
                        title: r.title,
                        snippet: r.description,
                        source: "brave".to_string(),
                    });
                }
            }
        }

        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());

        Ok(SearchResponse {
            results: out,
            provider: "brave".to_string(),
            timings_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearxngSearchResponse {
    results: Option<Vec<SearxngResult>>,
}

#[derive(Debug, Deserialize)]
struct SearxngResult {
    url: Option<String>,
    title: Option<String>,
    // SearXNG uses `content` for snippets in JSON format.
    content: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearchProvider {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        // Deterministic sharding when multiple endpoints are configured.
        let idx = self.pick_endpoint_index(q);
        let base_endpoint = self.endpoints.get(idx).map(|s| s.as_str()).unwrap_or("");
        searxng_search_at_endpoint(&self.client, base_endpoint, q).await
    }
}
