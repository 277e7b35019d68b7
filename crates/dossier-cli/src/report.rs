//! Turns per-source analyses into a [`ResearchReport`] and renders it.
//!
//! Synthesis reuses the summarizer's model ladder for the executive summary
//! and the conclusions. Model failure never blocks a report: both sections
//! fall back to canned text.

use dossier_core::{ResearchReport, RunStats, SourceSummary};
use dossier_local::extract;

use crate::summarize::Summarizer;

const TEXT_WIDTH: usize = 80;
const URL_DISPLAY_CHARS: usize = 60;

#[derive(Debug, Clone, Default)]
pub struct ReportBuilder {
    now_epoch_s: Option<u64>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the generation timestamp. Without this the wall clock is used.
    pub fn with_now_epoch_s(mut self, epoch_s: Option<u64>) -> Self {
        self.now_epoch_s = epoch_s;
        self
    }

    fn now_epoch_s(&self) -> u64 {
        match self.now_epoch_s {
            Some(t) => t,
            None => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Synthesize the report. Findings are reordered by discovery rank;
    /// `stats` is embedded as-is (the pipeline finishes its timings after
    /// this returns).
    pub async fn build(
        &self,
        query: &str,
        mut findings: Vec<SourceSummary>,
        summarizer: &Summarizer,
        stats: RunStats,
    ) -> ResearchReport {
        findings.sort_by_key(|f| f.rank);
        let generated_at_epoch_s = self.now_epoch_s();

        if findings.is_empty() {
            return ResearchReport {
                query: query.to_string(),
                executive_summary: "No usable sources were found for this query.".to_string(),
                key_findings: Vec::new(),
                findings,
                conclusion: canned_conclusion(query),
                sources_analyzed: 0,
                generated_at_epoch_s,
                stats,
            };
        }

        let joined = findings
            .iter()
            .map(|f| f.summary.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let (exec_excerpt, _chars, _clipped) = extract::truncate_to_chars(&joined, 1_500);
        let exec_prompt = format!(
            "Based on these research findings about \"{query}\", write a concise \
             2-3 sentence executive summary:\n\n{exec_excerpt}\n"
        );
        let executive_summary = match summarizer.try_ladder(&exec_prompt).await {
            Some((text, _model)) => text,
            None => format!("Research findings compiled from {} sources.", findings.len()),
        };

        let key_findings = findings
            .iter()
            .map(|f| first_sentences(&f.summary, 3))
            .collect();

        let (conc_excerpt, _chars, _clipped) = extract::truncate_to_chars(&joined, 1_000);
        let conc_prompt = format!(
            "Based on this research about \"{query}\", provide 2-3 key conclusions \
             or recommendations:\n\n{conc_excerpt}\n"
        );
        let conclusion = match summarizer.try_ladder(&conc_prompt).await {
            Some((text, _model)) => text,
            None => canned_conclusion(query),
        };

        let sources_analyzed = findings.len();
        ResearchReport {
            query: query.to_string(),
            executive_summary,
            key_findings,
            findings,
            conclusion,
            sources_analyzed,
            generated_at_epoch_s,
            stats,
        }
    }
}

fn canned_conclusion(query: &str) -> String {
    format!("Further research and analysis of {query} is recommended based on the findings above.")
}

/// First `n` sentences of `text`, split the simple way on `". "`.
fn first_sentences(text: &str, n: usize) -> String {
    text.split(". ").take(n).collect::<Vec<_>>().join(". ")
}

/// First `max_chars` of a URL with an ellipsis when clipped. Char-safe.
fn shorten_url(url: &str, max_chars: usize) -> String {
    let (head, _chars, clipped) = extract::truncate_to_chars(url, max_chars);
    if clipped {
        format!("{head}...")
    } else {
        head
    }
}

/// Wrap each input line separately so model-produced lists survive.
fn fill_paragraphs(text: &str, width: usize) -> String {
    text.lines()
        .map(|line| {
            let line = line.trim_end();
            if line.trim().is_empty() {
                String::new()
            } else {
                textwrap::fill(line, width)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn source_label(f: &SourceSummary) -> &str {
    f.title.as_deref().unwrap_or(&f.url)
}

/// Plain-text rendering, 80 columns.
pub fn render_text(report: &ResearchReport) -> String {
    let ruler = "=".repeat(TEXT_WIDTH);
    let sub = "-".repeat(40);
    let mut out = String::new();

    out.push_str(&ruler);
    out.push('\n');
    out.push_str(&format!(
        "RESEARCH REPORT: {}\n",
        report.query.to_uppercase()
    ));
    out.push_str(&ruler);
    out.push('\n');
    out.push_str(&format!(
        "Generated (unix): {}\n",
        report.generated_at_epoch_s
    ));
    out.push_str(&format!("Sources analyzed: {}\n\n", report.sources_analyzed));

    out.push_str(&format!("EXECUTIVE SUMMARY\n{sub}\n"));
    out.push_str(&fill_paragraphs(&report.executive_summary, TEXT_WIDTH));
    out.push_str("\n\n");

    out.push_str(&format!("KEY FINDINGS\n{sub}\n"));
    for (i, finding) in report.key_findings.iter().enumerate() {
        out.push_str(&fill_paragraphs(
            &format!("{}. {}", i + 1, finding),
            TEXT_WIDTH,
        ));
        out.push('\n');
    }
    out.push('\n');

    out.push_str(&format!("DETAILED ANALYSIS\n{sub}\n\n"));
    for (i, f) in report.findings.iter().enumerate() {
        let tag = if f.degraded { " [degraded]" } else { "" };
        out.push_str(&format!("Source {}: {}{}\n", i + 1, source_label(f), tag));
        out.push_str(&format!(
            "URL: {}\n",
            shorten_url(&f.url, URL_DISPLAY_CHARS)
        ));
        out.push_str(&fill_paragraphs(&f.summary, TEXT_WIDTH));
        out.push_str("\n\n");
    }

    out.push_str(&format!("SOURCES\n{sub}\n"));
    for (i, f) in report.findings.iter().enumerate() {
        out.push_str(&format!("{}. {}\n   {}\n", i + 1, source_label(f), f.url));
    }
    out.push('\n');

    out.push_str(&format!("CONCLUSIONS\n{sub}\n"));
    out.push_str(&fill_paragraphs(&report.conclusion, TEXT_WIDTH));
    out.push('\n');
    out.push_str(&ruler);
    out.push('\n');
    out
}

/// Markdown rendering.
pub fn render_markdown(report: &ResearchReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("# Research Report: {}\n\n", report.query));
    out.push_str(&format!(
        "**Generated (unix):** {}  \n",
        report.generated_at_epoch_s
    ));
    out.push_str(&format!(
        "**Sources analyzed:** {}\n\n",
        report.sources_analyzed
    ));

    out.push_str("## Executive Summary\n\n");
    out.push_str(&report.executive_summary);
    out.push_str("\n\n");

    out.push_str("## Key Findings\n\n");
    for (i, finding) in report.key_findings.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, finding));
    }
    out.push('\n');

    out.push_str("## Detailed Analysis\n\n");
    for (i, f) in report.findings.iter().enumerate() {
        out.push_str(&format!("### {}. {}\n\n", i + 1, source_label(f)));
        out.push_str(&format!("**URL:** <{}>  \n", f.url));
        out.push_str(&format!("**Model:** {}\n\n", f.model_used));
        if f.degraded {
            out.push_str("_Analysis degraded: no local model was available._\n\n");
        }
        out.push_str(&f.summary);
        out.push_str("\n\n");
    }

    out.push_str("## Sources\n\n");
    for (i, f) in report.findings.iter().enumerate() {
        out.push_str(&format!("{}. [{}]({})\n", i + 1, source_label(f), f.url));
    }
    out.push('\n');

    out.push_str("## Conclusions\n\n");
    out.push_str(&report.conclusion);
    out.push('\n');
    out
}
