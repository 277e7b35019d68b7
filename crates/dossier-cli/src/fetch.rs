//! Fetches one candidate page by walking an ordered strategy chain:
//! rendered browser first, plain HTTP second.
//!
//! `fetch` never errors. Every strategy leaves a [`FetchAttempt`] in the
//! trail, so a total failure is `success=false` plus the attempts that
//! explain why.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use dossier_core::{
    Candidate, FetchAttempt, FetchBackend, FetchMethod, FetchRequest, FetchedPage, PageRenderer,
    RenderRequest,
};
use dossier_local::extract;

/// Strategy order walked for every page. Attempts stop at the first entry
/// that yields rich text.
pub const STRATEGY_ORDER: &[FetchMethod] = &[FetchMethod::Rendered, FetchMethod::HttpFallback];

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Per-strategy network timeout.
    pub timeout_ms: u64,
    /// HTTP body cap.
    pub max_bytes: u64,
    /// Cap on extracted text handed to summarization.
    pub max_chars: usize,
    pub headless: bool,
    /// Column width for text rendering.
    pub width: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            max_bytes: 2_000_000,
            max_chars: 5_000,
            headless: true,
            width: 80,
        }
    }
}

pub struct PageFetcher {
    renderer: Arc<dyn PageRenderer>,
    http: Arc<dyn FetchBackend>,
    opts: FetchOptions,
}

fn push_unique(warnings: &mut Vec<&'static str>, code: &'static str) {
    if !warnings.contains(&code) {
        warnings.push(code);
    }
}

impl PageFetcher {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        http: Arc<dyn FetchBackend>,
        opts: FetchOptions,
    ) -> Self {
        Self {
            renderer,
            http,
            opts,
        }
    }

    pub fn options(&self) -> &FetchOptions {
        &self.opts
    }

    /// Truncate to the char cap, merge extraction warnings, and gate on
    /// richness. None means the text is too thin to summarize.
    fn usable_text(
        &self,
        extracted: extract::ExtractedText,
        warnings: &mut Vec<&'static str>,
    ) -> Option<String> {
        for w in &extracted.warnings {
            push_unique(warnings, w);
        }
        let (text, _chars, clipped) =
            extract::truncate_to_chars(&extracted.text, self.opts.max_chars);
        if clipped {
            push_unique(warnings, "content_truncated");
        }
        let text = text.trim().to_string();
        extract::is_text_rich(&text).then_some(text)
    }

    async fn attempt_rendered(
        &self,
        candidate: &Candidate,
        title: &mut Option<String>,
        warnings: &mut Vec<&'static str>,
    ) -> (FetchAttempt, Option<String>) {
        if !self.renderer.available() {
            let attempt = FetchAttempt {
                method: FetchMethod::Rendered,
                ok: false,
                detail: Some("renderer unavailable".to_string()),
                elapsed_ms: 0,
            };
            return (attempt, None);
        }

        let started = Instant::now();
        let req = RenderRequest {
            url: candidate.url.clone(),
            timeout_ms: self.opts.timeout_ms,
            headless: self.opts.headless,
            user_agent: None,
        };
        match self.renderer.render(&req).await {
            Ok(page) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if title.is_none() {
                    *title = extract::page_title(&page.html);
                }
                if let Some(status) = page.status.filter(|s| *s >= 400) {
                    let attempt = FetchAttempt {
                        method: FetchMethod::Rendered,
                        ok: false,
                        detail: Some(format!("http status {status}")),
                        elapsed_ms,
                    };
                    return (attempt, None);
                }
                let extracted = extract::page_text(&page.html, self.opts.width);
                match self.usable_text(extracted, warnings) {
                    Some(text) => {
                        let attempt = FetchAttempt {
                            method: FetchMethod::Rendered,
                            ok: true,
                            detail: None,
                            elapsed_ms,
                        };
                        (attempt, Some(text))
                    }
                    None => {
                        let attempt = FetchAttempt {
                            method: FetchMethod::Rendered,
                            ok: false,
                            detail: Some("thin_content".to_string()),
                            elapsed_ms,
                        };
                        (attempt, None)
                    }
                }
            }
            Err(e) => {
                let attempt = FetchAttempt {
                    method: FetchMethod::Rendered,
                    ok: false,
                    detail: Some(e.to_string()),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                (attempt, None)
            }
        }
    }

    async fn attempt_http(
        &self,
        candidate: &Candidate,
        title: &mut Option<String>,
        warnings: &mut Vec<&'static str>,
    ) -> (FetchAttempt, Option<String>) {
        let started = Instant::now();
        let req = FetchRequest {
            url: candidate.url.clone(),
            timeout_ms: Some(self.opts.timeout_ms),
            max_bytes: Some(self.opts.max_bytes),
            headers: BTreeMap::new(),
        };
        match self.http.fetch(&req).await {
            Ok(resp) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if resp.status >= 400 {
                    let attempt = FetchAttempt {
                        method: FetchMethod::HttpFallback,
                        ok: false,
                        detail: Some(format!("http status {}", resp.status)),
                        elapsed_ms,
                    };
                    return (attempt, None);
                }
                if title.is_none() && extract::bytes_look_like_html(&resp.bytes) {
                    *title = extract::page_title(&resp.text_lossy());
                }
                let extracted = extract::page_text_from_bytes(
                    &resp.bytes,
                    resp.content_type.as_deref(),
                    self.opts.width,
                );
                match self.usable_text(extracted, warnings) {
                    Some(text) => {
                        let attempt = FetchAttempt {
                            method: FetchMethod::HttpFallback,
                            ok: true,
                            detail: None,
                            elapsed_ms,
                        };
                        (attempt, Some(text))
                    }
                    None => {
                        let attempt = FetchAttempt {
                            method: FetchMethod::HttpFallback,
                            ok: false,
                            detail: Some("thin_content".to_string()),
                            elapsed_ms,
                        };
                        (attempt, None)
                    }
                }
            }
            Err(e) => {
                let attempt = FetchAttempt {
                    method: FetchMethod::HttpFallback,
                    ok: false,
                    detail: Some(e.to_string()),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                };
                (attempt, None)
            }
        }
    }

    /// Fetch one candidate, walking [`STRATEGY_ORDER`] until a strategy
    /// yields rich text.
    pub async fn fetch(&self, candidate: &Candidate) -> FetchedPage {
        let mut attempts: Vec<FetchAttempt> = Vec::new();
        let mut warnings: Vec<&'static str> = Vec::new();
        let mut title = candidate.title.clone();
        let mut outcome: Option<(String, FetchMethod)> = None;

        for &method in STRATEGY_ORDER {
            let (attempt, text) = match method {
                FetchMethod::Rendered => {
                    self.attempt_rendered(candidate, &mut title, &mut warnings)
                        .await
                }
                FetchMethod::HttpFallback => {
                    self.attempt_http(candidate, &mut title, &mut warnings).await
                }
            };
            attempts.push(attempt);
            if let Some(text) = text {
                outcome = Some((text, method));
                break;
            }
        }

        match outcome {
            Some((text, method)) => FetchedPage {
                rank: candidate.rank,
                url: candidate.url.clone(),
                title,
                text,
                method: Some(method),
                success: true,
                attempts,
                warnings,
            },
            None => FetchedPage {
                rank: candidate.rank,
                url: candidate.url.clone(),
                title,
                text: String::new(),
                method: None,
                success: false,
                attempts,
                warnings,
            },
        }
    }
}
