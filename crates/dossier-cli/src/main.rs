use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dossier::fetch::{FetchOptions, PageFetcher};
use dossier::filter::{FilterRules, SourceFilter};
use dossier::pipeline::{ResearchConfig, ResearchPipeline};
use dossier::report;
use dossier::summarize::{SummarizeOptions, Summarizer};
use dossier_core::{Error as CoreError, ResourceAdvisor, SearchProvider};
use dossier_local::advisor::SystemResourceAdvisor;
use dossier_local::ollama::OllamaClient;
use dossier_local::render::{playwright_reachable, PlaywrightRenderer};
use dossier_local::search::{BraveSearchProvider, SearxngSearchProvider};
use dossier_local::HttpFetcher;

#[derive(Parser, Debug)]
#[command(name = "dossier")]
#[command(
    about = "Automated web research: discover, filter, fetch, summarize, report",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Research a query end-to-end and write report artifacts.
    Research(ResearchCmd),
    /// Diagnose configuration/launch issues (no secrets in output).
    Doctor(DoctorCmd),
    /// Print version info.
    Version,
}

#[derive(clap::Args, Debug)]
struct ResearchCmd {
    /// Research query.
    #[arg(long)]
    query: String,
    /// Number of sources to analyze (1-10). Default comes from --profile.
    #[arg(long)]
    sources: Option<usize>,
    /// Primary Ollama model (tried after the fallbacks).
    #[arg(long)]
    model: Option<String>,
    /// Comma-separated fallback models, tried in order before the primary.
    #[arg(long)]
    fallback_models: Option<String>,
    /// Search provider. Allowed: auto, searxng, brave
    #[arg(long, default_value = "auto")]
    provider: String,
    /// Result language hint (provider-dependent), e.g. "en".
    #[arg(long)]
    language: Option<String>,
    /// Effort preset filling defaults for flags not given. Allowed: quick, balanced, thorough
    #[arg(long, default_value = "balanced")]
    profile: String,
    /// Run the browser headless.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    headless: bool,
    /// Attempt rendered fetching before the HTTP fallback.
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    render: bool,
    /// Per-fetch timeout (ms). Default comes from --profile.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Cap on extracted text per source (chars).
    #[arg(long)]
    max_chars: Option<usize>,
    /// Output directory for report artifacts.
    #[arg(long, default_value = ".generated")]
    out_dir: PathBuf,
    /// Artifact formats, comma-separated. Allowed: txt, md, json
    #[arg(long, default_value = "txt,md,json")]
    format: String,
    /// Override "now" for deterministic outputs.
    #[arg(long)]
    now_epoch_s: Option<u64>,
    /// Print progress and warnings to stderr.
    #[arg(long)]
    verbose: bool,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Emit the full JSON payload instead of human-readable text.
    #[arg(long)]
    json: bool,
    /// Timeout for the node/ollama probes (ms).
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Profile {
    sources: usize,
    fetch_timeout_ms: u64,
    summarize_timeout_ms: u64,
}

fn profile_for(name: &str) -> dossier_core::Result<Profile> {
    match name {
        "quick" => Ok(Profile {
            sources: 2,
            fetch_timeout_ms: 10_000,
            summarize_timeout_ms: 60_000,
        }),
        "balanced" => Ok(Profile {
            sources: 3,
            fetch_timeout_ms: 20_000,
            summarize_timeout_ms: 120_000,
        }),
        "thorough" => Ok(Profile {
            sources: 5,
            fetch_timeout_ms: 30_000,
            summarize_timeout_ms: 180_000,
        }),
        other => Err(CoreError::InvalidConfig(format!(
            "unknown profile {other:?} (allowed: quick, balanced, thorough)"
        ))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportFormat {
    Txt,
    Md,
    Json,
}

fn parse_formats(s: &str) -> dossier_core::Result<Vec<ReportFormat>> {
    let mut out = Vec::new();
    for part in s.split(',') {
        let p = part.trim().to_ascii_lowercase();
        if p.is_empty() {
            continue;
        }
        let f = match p.as_str() {
            "txt" | "text" => ReportFormat::Txt,
            "md" | "markdown" => ReportFormat::Md,
            "json" => ReportFormat::Json,
            other => {
                return Err(CoreError::InvalidConfig(format!(
                    "unknown format {other:?} (allowed: txt, md, json)"
                )))
            }
        };
        if !out.contains(&f) {
            out.push(f);
        }
    }
    if out.is_empty() {
        return Err(CoreError::InvalidConfig(
            "format list must name at least one of txt, md, json".to_string(),
        ));
    }
    Ok(out)
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Endpoint list from `DOSSIER_SEARXNG_ENDPOINTS` (and the singular
/// `DOSSIER_SEARXNG_ENDPOINT`), split on commas/whitespace, deduplicated,
/// trailing slashes dropped.
fn searxng_endpoints_from_env() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push_list = |raw: &str| {
        for part in raw.split([',', ' ', '\t', '\n']) {
            let p = part.trim().trim_end_matches('/');
            if !p.is_empty() && !out.iter().any(|seen| seen == p) {
                out.push(p.to_string());
            }
        }
    };
    if let Some(v) = env_nonempty("DOSSIER_SEARXNG_ENDPOINTS") {
        push_list(&v);
    }
    if let Some(v) = env_nonempty("DOSSIER_SEARXNG_ENDPOINT") {
        push_list(&v);
    }
    out
}

fn brave_api_key_from_env() -> Option<String> {
    env_nonempty("DOSSIER_BRAVE_API_KEY").or_else(|| env_nonempty("BRAVE_SEARCH_API_KEY"))
}

fn ollama_base_url_from_env() -> String {
    env_nonempty("DOSSIER_OLLAMA_BASE_URL").unwrap_or_default()
}

fn node_bin_from_env() -> String {
    env_nonempty("DOSSIER_NODE").unwrap_or_else(|| "node".to_string())
}

/// Explicit provider, or `auto` = searxng if configured, else brave.
fn build_search_provider(
    http: &HttpFetcher,
    provider: &str,
) -> dossier_core::Result<Arc<dyn SearchProvider>> {
    let endpoints = searxng_endpoints_from_env();
    let brave_key = brave_api_key_from_env();

    let brave = |key: String| -> dossier_core::Result<Arc<dyn SearchProvider>> {
        let mut p = BraveSearchProvider::new(http.client().clone(), key)?;
        if let Some(ep) = env_nonempty("DOSSIER_BRAVE_ENDPOINT") {
            p = p.with_endpoint(ep);
        }
        Ok(Arc::new(p))
    };

    match provider {
        "searxng" => Ok(Arc::new(SearxngSearchProvider::new(
            http.client().clone(),
            endpoints,
        )?)),
        "brave" => brave(brave_key.unwrap_or_default()),
        "auto" => {
            if !endpoints.is_empty() {
                Ok(Arc::new(SearxngSearchProvider::new(
                    http.client().clone(),
                    endpoints,
                )?))
            } else if let Some(key) = brave_key {
                brave(key)
            } else {
                Err(CoreError::NotConfigured(
                    "no search provider configured; set DOSSIER_SEARXNG_ENDPOINTS or \
                     DOSSIER_BRAVE_API_KEY"
                        .to_string(),
                ))
            }
        }
        other => Err(CoreError::InvalidConfig(format!(
            "unknown provider {other:?} (allowed: auto, searxng, brave)"
        ))),
    }
}

async fn run_research(args: ResearchCmd) -> Result<()> {
    let profile = profile_for(&args.profile)?;
    let sources = args.sources.unwrap_or(profile.sources);
    if !(1..=10).contains(&sources) {
        return Err(CoreError::InvalidConfig(format!(
            "sources must be between 1 and 10, got {sources}"
        ))
        .into());
    }
    let formats = parse_formats(&args.format)?;
    let fetch_timeout_ms = args.timeout_ms.unwrap_or(profile.fetch_timeout_ms);
    let max_chars = args
        .max_chars
        .unwrap_or_else(|| FetchOptions::default().max_chars);

    let http = HttpFetcher::new()?;
    let search = build_search_provider(&http, &args.provider)?;
    if args.verbose {
        eprintln!(
            "researching {:?}: provider={} sources={} fetch_timeout_ms={}",
            args.query,
            search.name(),
            sources,
            fetch_timeout_ms
        );
    }

    let fetch_opts = FetchOptions {
        timeout_ms: fetch_timeout_ms,
        max_chars,
        headless: args.headless,
        ..FetchOptions::default()
    };
    let fetcher = PageFetcher::new(
        Arc::new(PlaywrightRenderer::new(args.render)),
        Arc::new(http.clone()),
        fetch_opts,
    );

    let defaults = SummarizeOptions::default();
    let summarize_opts = SummarizeOptions {
        model_name: args.model.clone().unwrap_or(defaults.model_name),
        fallback_models: match args.fallback_models.as_deref() {
            Some(csv) => csv
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.fallback_models,
        },
        timeout_ms: profile.summarize_timeout_ms,
        max_content_chars: defaults.max_content_chars,
    };
    let summarizer = Summarizer::new(
        Arc::new(OllamaClient::new(
            http.client().clone(),
            ollama_base_url_from_env(),
        )),
        Arc::new(SystemResourceAdvisor::new()),
        summarize_opts,
    );

    let cfg = ResearchConfig {
        num_sources: sources,
        language: args.language.clone(),
        now_epoch_s: args.now_epoch_s,
        ..ResearchConfig::default()
    };
    let pipeline = ResearchPipeline::new(
        search,
        SourceFilter::new(FilterRules::default()),
        fetcher,
        summarizer,
        cfg,
    );

    let result = pipeline.conduct_research(&args.query).await?;
    if args.verbose {
        eprintln!(
            "analyzed {} sources ({} fetch attempts, {} failures, {} degraded summaries)",
            result.sources_analyzed,
            result.stats.fetch_attempts,
            result.stats.fetch_failures,
            result.stats.summarize_failures
        );
        for w in &result.stats.warnings {
            eprintln!("warning: {w}");
        }
    }

    std::fs::create_dir_all(&args.out_dir)?;
    let epoch = result.generated_at_epoch_s;
    for format in formats {
        let path = match format {
            ReportFormat::Txt => {
                let p = args.out_dir.join(format!("research_report_{epoch}.txt"));
                std::fs::write(&p, report::render_text(&result))?;
                p
            }
            ReportFormat::Md => {
                let p = args.out_dir.join(format!("research_report_{epoch}.md"));
                std::fs::write(&p, report::render_markdown(&result))?;
                p
            }
            ReportFormat::Json => {
                let p = args.out_dir.join(format!("research_data_{epoch}.json"));
                let mut js = serde_json::to_string_pretty(&result)?;
                js.push('\n');
                std::fs::write(&p, js)?;
                p
            }
        };
        println!("{}", path.display());
    }
    Ok(())
}

async fn probe_node(node_bin: &str, timeout_ms: u64) -> (bool, String) {
    let fut = tokio::process::Command::new(node_bin)
        .arg("--version")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(Ok(out)) if out.status.success() => (
            true,
            String::from_utf8_lossy(&out.stdout).trim().to_string(),
        ),
        Ok(Ok(_)) => (false, "node exited nonzero".to_string()),
        Ok(Err(e)) => (false, e.to_string()),
        Err(_) => (false, format!("probe timed out after {timeout_ms}ms")),
    }
}

fn memory_tier(available: Option<u64>) -> String {
    const GIB: f64 = (1024u64 * 1024 * 1024) as f64;
    match available {
        Some(b) if (b as f64) < 2.0 * GIB => format!("low ({:.1} GiB available)", b as f64 / GIB),
        Some(b) if (b as f64) < 4.0 * GIB => {
            format!("medium ({:.1} GiB available)", b as f64 / GIB)
        }
        Some(b) => format!("high ({:.1} GiB available)", b as f64 / GIB),
        None => "unknown".to_string(),
    }
}

async fn run_doctor(args: DoctorCmd) -> Result<()> {
    let t0 = std::time::Instant::now();

    let endpoints = searxng_endpoints_from_env();
    let brave = brave_api_key_from_env().is_some();
    let node_bin = node_bin_from_env();

    let mut checks: Vec<serde_json::Value> = Vec::new();

    let (node_ok, node_detail) = probe_node(&node_bin, args.timeout_ms).await;
    checks.push(serde_json::json!({
        "name": "node_available",
        "ok": node_ok,
        "message": if node_ok {
            format!("node responds ({node_detail})")
        } else {
            format!("node probe failed: {node_detail}")
        },
        "hint": if node_ok {
            ""
        } else {
            "Install Node.js or point DOSSIER_NODE at the binary. Rendered fetching falls back to plain HTTP without it."
        },
    }));

    let pw = playwright_reachable();
    checks.push(serde_json::json!({
        "name": "playwright_resolvable",
        "ok": pw,
        "message": if pw { "playwright module found" } else { "playwright module not found" },
        "hint": if pw {
            ""
        } else {
            "`npm i -g playwright && npx playwright install chromium`, or set DOSSIER_NODE_PATH to the module root."
        },
    }));

    let search_ok = !endpoints.is_empty() || brave;
    checks.push(serde_json::json!({
        "name": "search_configured",
        "ok": search_ok,
        "message": format!("searxng_endpoints={} brave={}", endpoints.len(), brave),
        "hint": if search_ok {
            ""
        } else {
            "Set DOSSIER_SEARXNG_ENDPOINTS (comma-separated) or DOSSIER_BRAVE_API_KEY."
        },
    }));

    let http = HttpFetcher::new()?;
    let ollama = OllamaClient::new(http.client().clone(), ollama_base_url_from_env());
    let (ollama_ok, ollama_msg) = match ollama.list_models(args.timeout_ms).await {
        Ok(models) => (true, format!("{} models installed", models.len())),
        Err(e) => (false, e.to_string()),
    };
    checks.push(serde_json::json!({
        "name": "ollama_reachable",
        "ok": ollama_ok,
        "message": ollama_msg,
        "hint": if ollama_ok {
            ""
        } else {
            "Start Ollama (`ollama serve`) or set DOSSIER_OLLAMA_BASE_URL."
        },
    }));

    let tier = memory_tier(SystemResourceAdvisor::new().available_memory_bytes());
    checks.push(serde_json::json!({
        "name": "memory_tier",
        "ok": true,
        "message": tier,
        "hint": "",
    }));

    let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "dossier",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "elapsed_ms": t0.elapsed().as_millis(),
        "configured": {
            "search": { "searxng_endpoints": endpoints.len(), "brave": brave },
            "ollama": { "base_url_overridden": env_nonempty("DOSSIER_OLLAMA_BASE_URL").is_some() },
            "render": { "node_bin": node_bin, "playwright": pw },
        },
        "checks": checks,
    });

    if args.json {
        println!("{payload}");
    } else {
        println!("dossier {} (ok={ok})", env!("CARGO_PKG_VERSION"));
        println!("search: searxng_endpoints={} brave={brave}", endpoints.len());
        println!(
            "ollama: base_url_overridden={}",
            env_nonempty("DOSSIER_OLLAMA_BASE_URL").is_some()
        );
        println!("memory: {tier}");
        println!("checks:");
        for c in &checks {
            let name = c["name"].as_str().unwrap_or("?");
            let check_ok = c["ok"].as_bool().unwrap_or(false);
            println!("- {}: {}", name, if check_ok { "ok" } else { "fail" });
            if !check_ok {
                if let Some(hint) = c["hint"].as_str().filter(|h| !h.is_empty()) {
                    println!("  hint: {hint}");
                }
            }
        }
    }
    Ok(())
}

/// Opt-in env file: sets vars only when absent from the process environment,
/// never logs values.
fn load_env_file() {
    let Ok(p) = std::env::var("DOSSIER_ENV_FILE") else {
        return;
    };
    let p = p.trim();
    if p.is_empty() {
        return;
    }
    let Ok(txt) = std::fs::read_to_string(p) else {
        return;
    };
    for raw in txt.lines() {
        let s = raw.trim();
        if s.is_empty() || s.starts_with('#') {
            continue;
        }
        let Some((k, v)) = s.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        if std::env::var_os(k).is_none() {
            std::env::set_var(k, v.trim());
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Research(args) => run_research(args).await,
        Commands::Doctor(args) => run_doctor(args).await,
        Commands::Version => {
            println!("dossier {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    load_env_file();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e:#}");
        let code = match e.downcast_ref::<CoreError>() {
            Some(CoreError::InvalidConfig(_) | CoreError::NotConfigured(_)) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}
