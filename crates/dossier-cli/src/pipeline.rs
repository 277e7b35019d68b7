//! The research pipeline: discover, filter, fetch, summarize, synthesize.
//!
//! Sequential by design: one query, a handful of sources, polite crawling.
//! Stage failures degrade the report instead of aborting the run; only
//! configuration errors return `Err`.

use std::sync::Arc;
use std::time::Instant;

use dossier_core::{
    Candidate, Error, ResearchReport, Result, RunStats, SearchProvider, SearchQuery,
};
use dossier_local::agent;

use crate::fetch::PageFetcher;
use crate::filter::SourceFilter;
use crate::report::ReportBuilder;
use crate::summarize::Summarizer;

/// Hard cap on candidates requested from the search provider.
const MAX_DISCOVERY: usize = 20;

#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Fetch quota: the number of sources to analyze.
    pub num_sources: usize,
    pub language: Option<String>,
    pub search_timeout_ms: Option<u64>,
    /// Base delay between consecutive fetches; zero (with zero jitter)
    /// disables waiting, which is how tests run.
    pub politeness_delay_ms: u64,
    pub politeness_jitter_ms: u64,
    /// Pinned report timestamp for deterministic output.
    pub now_epoch_s: Option<u64>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            num_sources: 3,
            language: None,
            search_timeout_ms: None,
            politeness_delay_ms: 2_000,
            politeness_jitter_ms: 500,
            now_epoch_s: None,
        }
    }
}

pub struct ResearchPipeline {
    search: Arc<dyn SearchProvider>,
    filter: SourceFilter,
    fetcher: PageFetcher,
    summarizer: Summarizer,
    cfg: ResearchConfig,
}

impl ResearchPipeline {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        filter: SourceFilter,
        fetcher: PageFetcher,
        summarizer: Summarizer,
        cfg: ResearchConfig,
    ) -> Self {
        Self {
            search,
            filter,
            fetcher,
            summarizer,
            cfg,
        }
    }

    /// Three candidates per wanted source, so filtering and fetch failures
    /// have headroom, capped at [`MAX_DISCOVERY`].
    fn discovery_limit(&self) -> usize {
        self.cfg.num_sources.saturating_mul(3).min(MAX_DISCOVERY)
    }

    /// Run the whole pipeline for one query.
    pub async fn conduct_research(&self, query: &str) -> Result<ResearchReport> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidConfig("query must not be empty".to_string()));
        }
        if self.cfg.num_sources == 0 {
            return Err(Error::InvalidConfig(
                "num_sources must be at least 1".to_string(),
            ));
        }

        let t_total = Instant::now();
        let mut stats = RunStats::default();

        // Discover. A provider failure is a degraded run, not an abort.
        let t_stage = Instant::now();
        let q = SearchQuery {
            query: query.to_string(),
            max_results: Some(self.discovery_limit()),
            language: self.cfg.language.clone(),
            timeout_ms: self.cfg.search_timeout_ms,
        };
        let mut candidates: Vec<Candidate> = match self.search.search(&q).await {
            Ok(resp) => resp
                .results
                .into_iter()
                .enumerate()
                .map(|(rank, r)| Candidate {
                    rank,
                    url: r.url,
                    title: r.title,
                })
                .collect(),
            Err(e) => {
                stats.warnings.push(format!("search_failed: {e}"));
                Vec::new()
            }
        };
        stats.candidates_discovered = candidates.len();
        stats
            .timings_ms
            .insert("discover".to_string(), t_stage.elapsed().as_millis());

        // Filter, preserving discovery order.
        let before = candidates.len();
        candidates.retain(|c| self.filter.decide(c).allowed);
        stats.candidates_filtered_out = before - candidates.len();

        // Fetch until the quota is met or candidates run out.
        let t_stage = Instant::now();
        let mut pages = Vec::new();
        for candidate in &candidates {
            if pages.len() >= self.cfg.num_sources {
                break;
            }
            if stats.fetch_attempts > 0 {
                agent::polite_delay(self.cfg.politeness_delay_ms, self.cfg.politeness_jitter_ms)
                    .await;
            }
            stats.fetch_attempts += 1;
            let page = self.fetcher.fetch(candidate).await;
            for w in &page.warnings {
                let w = (*w).to_string();
                if !stats.warnings.contains(&w) {
                    stats.warnings.push(w);
                }
            }
            if page.success {
                pages.push(page);
            } else {
                stats.fetch_failures += 1;
            }
        }
        stats
            .timings_ms
            .insert("fetch".to_string(), t_stage.elapsed().as_millis());

        // Summarize every fetched page; a degraded summary still counts as
        // a finding.
        let t_stage = Instant::now();
        let mut findings = Vec::with_capacity(pages.len());
        for page in &pages {
            let summary = self.summarizer.summarize(query, page).await;
            if summary.degraded {
                stats.summarize_failures += 1;
            }
            findings.push(summary);
        }
        stats
            .timings_ms
            .insert("summarize".to_string(), t_stage.elapsed().as_millis());

        // Synthesize.
        let t_stage = Instant::now();
        let builder = ReportBuilder::new().with_now_epoch_s(self.cfg.now_epoch_s);
        let mut report = builder.build(query, findings, &self.summarizer, stats).await;
        report
            .stats
            .timings_ms
            .insert("synthesize".to_string(), t_stage.elapsed().as_millis());
        report
            .stats
            .timings_ms
            .insert("total".to_string(), t_total.elapsed().as_millis());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchOptions;
    use crate::filter::FilterRules;
    use crate::summarize::SummarizeOptions;
    use dossier_core::{
        CompletionBackend, CompletionError, CompletionRequest, CompletionResult, FetchBackend,
        FetchRequest, FetchResponse, PageRenderer, RenderRequest, RenderedPage, SearchResponse,
        SearchResult,
    };
    use dossier_local::advisor::StaticAdvisor;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubSearch {
        results: Vec<SearchResult>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubSearch {
        fn with_urls(urls: &[&str]) -> Self {
            Self {
                results: urls
                    .iter()
                    .map(|u| SearchResult {
                        url: u.to_string(),
                        title: None,
                        snippet: None,
                        source: "stub".to_string(),
                    })
                    .collect(),
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                results: Vec::new(),
                fail: true,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SearchProvider for StubSearch {
        fn name(&self) -> &'static str {
            "stub-search"
        }

        async fn search(&self, _q: &SearchQuery) -> Result<SearchResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Search("endpoint unreachable".to_string()));
            }
            Ok(SearchResponse {
                results: self.results.clone(),
                provider: "stub-search".to_string(),
                timings_ms: BTreeMap::new(),
            })
        }
    }

    struct NoRenderer;

    #[async_trait::async_trait]
    impl PageRenderer for NoRenderer {
        fn name(&self) -> &'static str {
            "none"
        }

        fn available(&self) -> bool {
            false
        }

        async fn render(&self, _req: &RenderRequest) -> Result<RenderedPage> {
            Err(Error::NotConfigured("renderer disabled".to_string()))
        }
    }

    /// Serves plain-text bodies for the routes it knows; errors otherwise.
    struct StubHttp {
        bodies: HashMap<String, String>,
    }

    impl StubHttp {
        fn with_routes(routes: &[(&str, &str)]) -> Self {
            Self {
                bodies: routes
                    .iter()
                    .map(|(u, b)| (u.to_string(), b.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait::async_trait]
    impl FetchBackend for StubHttp {
        async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
            match self.bodies.get(&req.url) {
                Some(body) => Ok(FetchResponse {
                    url: req.url.clone(),
                    final_url: req.url.clone(),
                    status: 200,
                    content_type: Some("text/plain".to_string()),
                    headers: BTreeMap::new(),
                    bytes: body.as_bytes().to_vec(),
                    truncated: false,
                    timings_ms: BTreeMap::new(),
                }),
                None => Err(Error::Fetch("connection refused".to_string())),
            }
        }
    }

    struct StubCompletion {
        answer: &'static str,
    }

    #[async_trait::async_trait]
    impl CompletionBackend for StubCompletion {
        fn name(&self) -> &'static str {
            "stub-llm"
        }

        async fn complete(&self, req: &CompletionRequest) -> CompletionResult<String> {
            if self.answer.is_empty() {
                return Err(CompletionError::ModelNotFound(req.model.clone()));
            }
            Ok(self.answer.to_string())
        }
    }

    fn rich_text() -> String {
        "Rust ownership moves values between bindings while the borrow checker \
         enforces aliasing rules across scopes and lifetimes of references. "
            .repeat(12)
    }

    fn test_cfg(num_sources: usize) -> ResearchConfig {
        ResearchConfig {
            num_sources,
            politeness_delay_ms: 0,
            politeness_jitter_ms: 0,
            now_epoch_s: Some(100),
            ..ResearchConfig::default()
        }
    }

    fn pipeline(
        search: Arc<StubSearch>,
        http: StubHttp,
        answer: &'static str,
        cfg: ResearchConfig,
    ) -> ResearchPipeline {
        let fetcher = PageFetcher::new(
            Arc::new(NoRenderer),
            Arc::new(http),
            FetchOptions::default(),
        );
        let summarizer = Summarizer::new(
            Arc::new(StubCompletion { answer }),
            Arc::new(StaticAdvisor(None)),
            SummarizeOptions::default(),
        );
        ResearchPipeline::new(
            search,
            SourceFilter::new(FilterRules::default()),
            fetcher,
            summarizer,
            cfg,
        )
    }

    #[tokio::test]
    async fn full_run_filters_fetches_and_reports_in_order() {
        let search = Arc::new(StubSearch::with_urls(&[
            "https://example.com/a",
            "https://www.youtube.com/watch?v=abc",
            "https://example.com/c",
            "https://example.com/pic.jpg",
            "https://example.com/e",
        ]));
        let body = rich_text();
        let http = StubHttp::with_routes(&[
            ("https://example.com/a", body.as_str()),
            ("https://example.com/c", body.as_str()),
            ("https://example.com/e", body.as_str()),
        ]);
        let p = pipeline(
            search,
            http,
            "Insight one. Insight two. Insight three. Insight four.",
            test_cfg(3),
        );

        let report = p.conduct_research("rust ownership").await.unwrap();
        assert_eq!(report.sources_analyzed, 3);
        let ranks: Vec<usize> = report.findings.iter().map(|f| f.rank).collect();
        assert_eq!(ranks, vec![0, 2, 4]);
        assert_eq!(
            report.executive_summary,
            "Insight one. Insight two. Insight three. Insight four."
        );
        assert_eq!(report.key_findings.len(), 3);
        assert_eq!(report.generated_at_epoch_s, 100);

        let stats = &report.stats;
        assert_eq!(stats.candidates_discovered, 5);
        assert_eq!(stats.candidates_filtered_out, 2);
        assert_eq!(stats.fetch_attempts, 3);
        assert_eq!(stats.fetch_failures, 0);
        assert_eq!(stats.summarize_failures, 0);
        for key in ["discover", "fetch", "summarize", "synthesize", "total"] {
            assert!(stats.timings_ms.contains_key(key), "missing timing {key}");
        }
    }

    #[tokio::test]
    async fn all_fetches_failing_yields_degraded_report() {
        let search = Arc::new(StubSearch::with_urls(&[
            "https://example.com/a",
            "https://example.com/b",
        ]));
        let p = pipeline(
            search,
            StubHttp::with_routes(&[]),
            "unused",
            test_cfg(3),
        );

        let report = p.conduct_research("rust ownership").await.unwrap();
        assert_eq!(report.sources_analyzed, 0);
        assert_eq!(
            report.executive_summary,
            "No usable sources were found for this query."
        );
        assert_eq!(report.stats.fetch_attempts, 2);
        assert_eq!(report.stats.fetch_failures, 2);
    }

    #[tokio::test]
    async fn search_failure_degrades_instead_of_aborting() {
        let search = Arc::new(StubSearch::failing());
        let p = pipeline(search, StubHttp::with_routes(&[]), "unused", test_cfg(3));

        let report = p.conduct_research("rust ownership").await.unwrap();
        assert_eq!(report.sources_analyzed, 0);
        assert_eq!(report.stats.candidates_discovered, 0);
        assert!(report
            .stats
            .warnings
            .iter()
            .any(|w| w.starts_with("search_failed: ")));
    }

    #[tokio::test]
    async fn zero_sources_is_a_config_error_before_any_network() {
        let search = Arc::new(StubSearch::with_urls(&["https://example.com/a"]));
        let p = pipeline(
            search.clone(),
            StubHttp::with_routes(&[]),
            "unused",
            test_cfg(0),
        );

        let err = p.conduct_research("rust ownership").await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_query_is_a_config_error() {
        let search = Arc::new(StubSearch::with_urls(&[]));
        let p = pipeline(
            search.clone(),
            StubHttp::with_routes(&[]),
            "unused",
            test_cfg(3),
        );

        let err = p.conduct_research("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert_eq!(search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn quota_stops_fetching_and_failures_are_skipped() {
        let search = Arc::new(StubSearch::with_urls(&[
            "https://example.com/a",
            "https://example.com/b",
            "https://example.com/c",
            "https://example.com/d",
        ]));
        let body = rich_text();
        // b is unreachable; d would succeed but the quota fills first.
        let http = StubHttp::with_routes(&[
            ("https://example.com/a", body.as_str()),
            ("https://example.com/c", body.as_str()),
            ("https://example.com/d", body.as_str()),
        ]);
        let p = pipeline(search, http, "Insight.", test_cfg(2));

        let report = p.conduct_research("rust ownership").await.unwrap();
        let ranks: Vec<usize> = report.findings.iter().map(|f| f.rank).collect();
        assert_eq!(ranks, vec![0, 2]);
        assert_eq!(report.stats.fetch_attempts, 3);
        assert_eq!(report.stats.fetch_failures, 1);
    }

    #[tokio::test]
    async fn model_exhaustion_still_produces_findings_marked_degraded() {
        let search = Arc::new(StubSearch::with_urls(&["https://example.com/a"]));
        let body = rich_text();
        let http = StubHttp::with_routes(&[("https://example.com/a", body.as_str())]);
        // Empty answer makes every completion fail.
        let p = pipeline(search, http, "", test_cfg(1));

        let report = p.conduct_research("rust ownership").await.unwrap();
        assert_eq!(report.sources_analyzed, 1);
        assert!(report.findings[0].degraded);
        assert_eq!(report.findings[0].model_used, "none");
        assert_eq!(report.stats.summarize_failures, 1);
        assert_eq!(
            report.executive_summary,
            "Research findings compiled from 1 sources."
        );
    }
}
