use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds a completion backend can report.
///
/// The summarizer's model ladder branches on these, so they are structured
/// rather than flattened into message strings.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("completion timed out")]
    Timeout,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("backend error: {0}")]
    Backend(String),
}

pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

/// Validate that `s` is an absolute http(s) URL.
pub fn parse_http_url(s: &str) -> Result<url::Url> {
    let u = url::Url::parse(s).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    match u.scheme() {
        "http" | "https" => Ok(u),
        other => Err(Error::InvalidUrl(format!(
            "unsupported scheme {other:?} in {s}"
        ))),
    }
}

/// A discovered, not-yet-validated link from search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Position in discovery order (0-based). Findings are sorted by this.
    pub rank: usize,
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub max_results: Option<usize>,
    pub language: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation (network + processing).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
    /// Optional headers to add (best-effort; adapter may drop unsafe headers).
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub timings_ms: BTreeMap<String, u128>,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    pub timeout_ms: u64,
    pub headless: bool,
    /// User agent for this navigation; pulled from a profile pool by the caller.
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPage {
    pub final_url: String,
    pub status: Option<u16>,
    pub html: String,
    pub elapsed_ms: u64,
}

#[async_trait::async_trait]
pub trait PageRenderer: Send + Sync {
    fn name(&self) -> &'static str;
    /// Whether the renderer can be attempted at all in this configuration.
    fn available(&self) -> bool;
    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage>;
}

/// How a page's text was ultimately obtained.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FetchMethod {
    Rendered,
    HttpFallback,
}

/// One entry in the ordered strategy sequence a page fetch walks through.
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub method: FetchMethod,
    pub ok: bool,
    pub detail: Option<String>,
    pub elapsed_ms: u64,
}

/// Outcome of fetching one candidate. Never an error: total failure is
/// `success=false` with the attempt trail explaining why.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedPage {
    pub rank: usize,
    pub url: String,
    pub title: Option<String>,
    pub text: String,
    /// Strategy that produced `text`; None when every strategy failed.
    pub method: Option<FetchMethod>,
    pub success: bool,
    pub attempts: Vec<FetchAttempt>,
    pub warnings: Vec<&'static str>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub timeout_ms: u64,
}

#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, req: &CompletionRequest) -> CompletionResult<String>;
}

/// Memory probe used to pre-select a model tier. Kept behind a trait so
/// tests never touch real system state.
pub trait ResourceAdvisor: Send + Sync {
    fn available_memory_bytes(&self) -> Option<u64>;
}

/// One analyzed source contributing to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub rank: usize,
    pub url: String,
    pub title: Option<String>,
    pub summary: String,
    /// Model that produced `summary`, or "none" when all models failed.
    pub model_used: String,
    pub degraded: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub candidates_discovered: usize,
    pub candidates_filtered_out: usize,
    pub fetch_attempts: usize,
    pub fetch_failures: usize,
    pub summarize_failures: usize,
    pub timings_ms: BTreeMap<String, u128>,
    pub warnings: Vec<String>,
}

/// Immutable result of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchReport {
    pub query: String,
    pub executive_summary: String,
    pub key_findings: Vec<String>,
    pub findings: Vec<SourceSummary>,
    pub conclusion: String,
    pub sources_analyzed: usize,
    pub generated_at_epoch_s: u64,
    pub stats: RunStats,
}
