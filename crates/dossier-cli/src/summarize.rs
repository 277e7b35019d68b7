//! Per-source analysis through a model-fallback ladder.
//!
//! The ladder is plain ordered data: configured fallbacks first, the primary
//! model appended, duplicates dropped. Every completion failure advances to
//! the next entry; when the ladder is exhausted the source still yields a
//! degraded summary so the report never loses a fetched page.

use std::sync::Arc;

use dossier_core::{
    CompletionBackend, CompletionRequest, FetchedPage, ResourceAdvisor, SourceSummary,
};
use dossier_local::extract;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    /// Primary model, tried last (the fallbacks ahead of it are cheaper).
    pub model_name: String,
    pub fallback_models: Vec<String>,
    /// Per-completion timeout.
    pub timeout_ms: u64,
    /// Cap on the content excerpt embedded in each prompt.
    pub max_content_chars: usize,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            model_name: "mistral:7b-instruct-q4_0".to_string(),
            fallback_models: vec![
                "tinyllama".to_string(),
                "phi".to_string(),
                "mistral:7b-instruct-q4_0".to_string(),
            ],
            timeout_ms: 120_000,
            max_content_chars: 2_000,
        }
    }
}

/// Rough resident-size guess for common Ollama model names. Only used to
/// pick a ladder starting point; a wrong guess costs one failed attempt.
fn approx_model_bytes(model: &str) -> u64 {
    let m = model.to_lowercase();
    if m.contains("tinyllama") {
        700 * MIB
    } else if m.contains("phi") {
        1_600 * MIB
    } else if m.contains("3b") {
        2_048 * MIB
    } else {
        4_200 * MIB
    }
}

pub struct Summarizer {
    backend: Arc<dyn CompletionBackend>,
    advisor: Arc<dyn ResourceAdvisor>,
    opts: SummarizeOptions,
}

impl Summarizer {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        advisor: Arc<dyn ResourceAdvisor>,
        opts: SummarizeOptions,
    ) -> Self {
        Self {
            backend,
            advisor,
            opts,
        }
    }

    /// Ordered models to try. When memory is tight the ladder rotates so a
    /// small-footprint model goes first; later entries stay in the chain.
    pub fn model_ladder(&self) -> Vec<String> {
        let mut ladder: Vec<String> = Vec::new();
        for m in self
            .opts
            .fallback_models
            .iter()
            .chain(std::iter::once(&self.opts.model_name))
        {
            let m = m.trim();
            if m.is_empty() || ladder.iter().any(|seen| seen == m) {
                continue;
            }
            ladder.push(m.to_string());
        }

        let cap = match self.advisor.available_memory_bytes() {
            Some(avail) if avail < 2_048 * MIB => Some(1_024 * MIB),
            Some(avail) if avail < 4_096 * MIB => Some(2_048 * MIB),
            _ => None,
        };
        if let Some(cap) = cap {
            if let Some(start) = ladder.iter().position(|m| approx_model_bytes(m) <= cap) {
                ladder.rotate_left(start);
            }
        }
        ladder
    }

    /// Walk the ladder until a model answers with non-empty text.
    /// Returns the answer and the model that produced it.
    pub(crate) async fn try_ladder(&self, prompt: &str) -> Option<(String, String)> {
        for model in self.model_ladder() {
            let req = CompletionRequest {
                model: model.clone(),
                prompt: prompt.to_string(),
                timeout_ms: self.opts.timeout_ms,
            };
            // Timeout, missing model, exhausted memory, backend fault: all
            // of them advance to the next rung. So does an empty answer.
            if let Ok(text) = self.backend.complete(&req).await {
                let text = text.trim().to_string();
                if !text.is_empty() {
                    return Some((text, model));
                }
            }
        }
        None
    }

    fn source_prompt(&self, query: &str, text: &str) -> String {
        let (excerpt, _chars, _clipped) =
            extract::truncate_to_chars(text, self.opts.max_content_chars);
        format!(
            "Analyze this content in relation to the research query: \"{query}\"\n\n\
             Content:\n{excerpt}\n\n\
             Provide:\n\
             1. Key insights related to the query\n\
             2. Important facts or statistics\n\
             3. Relevant conclusions\n\
             4. How this information relates to \"{query}\"\n"
        )
    }

    /// Analyze one fetched page. Never errors: when every model fails the
    /// summary degrades to a bounded raw excerpt and `model_used` is "none".
    pub async fn summarize(&self, query: &str, page: &FetchedPage) -> SourceSummary {
        let prompt = self.source_prompt(query, &page.text);
        match self.try_ladder(&prompt).await {
            Some((summary, model)) => SourceSummary {
                rank: page.rank,
                url: page.url.clone(),
                title: page.title.clone(),
                summary,
                model_used: model,
                degraded: false,
            },
            None => {
                let (excerpt, _chars, _clipped) = extract::truncate_to_chars(&page.text, 500);
                SourceSummary {
                    rank: page.rank,
                    url: page.url.clone(),
                    title: page.title.clone(),
                    summary: format!(
                        "Unable to analyze with AI models. Content summary: {excerpt}..."
                    ),
                    model_used: "none".to_string(),
                    degraded: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::{CompletionError, CompletionResult, FetchMethod};
    use dossier_local::advisor::StaticAdvisor;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StubCompletion {
        responses: HashMap<String, CompletionResult<String>>,
        calls: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl StubCompletion {
        fn new(responses: Vec<(&str, CompletionResult<String>)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(m, r)| (m.to_string(), r))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for StubCompletion {
        fn name(&self) -> &'static str {
            "stub-llm"
        }

        async fn complete(&self, req: &CompletionRequest) -> CompletionResult<String> {
            self.calls.lock().unwrap().push(req.model.clone());
            self.prompts.lock().unwrap().push(req.prompt.clone());
            match self.responses.get(&req.model) {
                Some(r) => r.clone(),
                None => Err(CompletionError::ModelNotFound(req.model.clone())),
            }
        }
    }

    fn page(text: &str) -> FetchedPage {
        FetchedPage {
            rank: 1,
            url: "https://example.com/a".to_string(),
            title: Some("Example".to_string()),
            text: text.to_string(),
            method: Some(FetchMethod::Rendered),
            success: true,
            attempts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn summarizer(
        backend: Arc<StubCompletion>,
        advisor: StaticAdvisor,
        opts: SummarizeOptions,
    ) -> Summarizer {
        Summarizer::new(backend, Arc::new(advisor), opts)
    }

    #[test]
    fn ladder_appends_primary_and_dedupes_keeping_first() {
        let opts = SummarizeOptions {
            model_name: "tinyllama".to_string(),
            fallback_models: vec![
                "phi".to_string(),
                "tinyllama".to_string(),
                "phi".to_string(),
            ],
            ..SummarizeOptions::default()
        };
        let s = summarizer(
            Arc::new(StubCompletion::new(vec![])),
            StaticAdvisor(None),
            opts,
        );
        assert_eq!(s.model_ladder(), vec!["phi", "tinyllama"]);
    }

    #[test]
    fn low_memory_rotates_ladder_to_a_small_model() {
        let opts = SummarizeOptions {
            model_name: "mistral:7b-instruct-q4_0".to_string(),
            fallback_models: vec![
                "mistral:7b-instruct-q4_0".to_string(),
                "phi".to_string(),
                "tinyllama".to_string(),
            ],
            ..SummarizeOptions::default()
        };
        let s = summarizer(
            Arc::new(StubCompletion::new(vec![])),
            StaticAdvisor(Some(1_536 * MIB)),
            opts,
        );
        assert_eq!(
            s.model_ladder(),
            vec!["tinyllama", "mistral:7b-instruct-q4_0", "phi"]
        );
    }

    #[test]
    fn plentiful_memory_leaves_ladder_unrotated() {
        let s = summarizer(
            Arc::new(StubCompletion::new(vec![])),
            StaticAdvisor(Some(16_384 * MIB)),
            SummarizeOptions::default(),
        );
        assert_eq!(
            s.model_ladder(),
            vec!["tinyllama", "phi", "mistral:7b-instruct-q4_0"]
        );
    }

    #[tokio::test]
    async fn failures_advance_the_ladder() {
        let backend = Arc::new(StubCompletion::new(vec![
            (
                "tinyllama",
                Err(CompletionError::ResourceExhausted(
                    "model requires more system resources".to_string(),
                )),
            ),
            ("phi", Ok("Key insight: the topic is well studied.".to_string())),
        ]));
        let s = summarizer(
            backend.clone(),
            StaticAdvisor(None),
            SummarizeOptions::default(),
        );

        let out = s.summarize("rust memory model", &page("some fetched text")).await;
        assert!(!out.degraded);
        assert_eq!(out.model_used, "phi");
        assert_eq!(out.summary, "Key insight: the topic is well studied.");
        assert_eq!(out.rank, 1);
        assert_eq!(out.url, "https://example.com/a");
        assert_eq!(backend.calls(), vec!["tinyllama", "phi"]);
    }

    #[tokio::test]
    async fn blank_answers_advance_the_ladder_too() {
        let backend = Arc::new(StubCompletion::new(vec![
            ("tinyllama", Ok("   \n".to_string())),
            ("phi", Ok("Real answer.".to_string())),
        ]));
        let s = summarizer(
            backend.clone(),
            StaticAdvisor(None),
            SummarizeOptions::default(),
        );

        let out = s.summarize("q", &page("text")).await;
        assert_eq!(out.model_used, "phi");
        assert_eq!(out.summary, "Real answer.");
    }

    #[tokio::test]
    async fn exhausted_ladder_degrades_with_bounded_excerpt() {
        let backend = Arc::new(StubCompletion::new(vec![]));
        let s = summarizer(
            backend.clone(),
            StaticAdvisor(None),
            SummarizeOptions::default(),
        );

        let long_text = "fact ".repeat(200);
        let out = s.summarize("anything", &page(&long_text)).await;
        assert!(out.degraded);
        assert_eq!(out.model_used, "none");
        assert!(out
            .summary
            .starts_with("Unable to analyze with AI models. Content summary: fact fact"));
        assert!(out.summary.ends_with("..."));
        // 500-char excerpt plus the fixed prefix and suffix.
        assert!(out.summary.len() < 600);
        // Whole default ladder was walked.
        assert_eq!(backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn prompt_embeds_query_and_bounded_excerpt() {
        let backend = Arc::new(StubCompletion::new(vec![(
            "tinyllama",
            Ok("ok".to_string()),
        )]));
        let opts = SummarizeOptions {
            max_content_chars: 50,
            ..SummarizeOptions::default()
        };
        let s = summarizer(backend.clone(), StaticAdvisor(None), opts);

        let text = "word ".repeat(40);
        s.summarize("rust memory model", &page(&text)).await;

        let prompts = backend.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("\"rust memory model\""));
        assert!(prompts[0].contains(&text[..50]));
        assert!(!prompts[0].contains(&text[..60]));
    }
}
