use dossier_core::{Error, PageRenderer, RenderRequest, RenderedPage, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Renders a page with Node + Playwright in a child process.
///
/// The child writes exactly one JSON object to stdout (ok or error envelope),
/// so a crashed or chatty browser can never corrupt the parent. The whole
/// operation sits under a hard wall-clock timeout.
#[derive(Debug, Clone)]
pub struct PlaywrightRenderer {
    enabled: bool,
    node_bin: String,
    max_html_chars: usize,
}

fn node_path_candidates() -> Vec<String> {
    // Best-effort Node global module roots across common setups. We avoid
    // shelling out to `npm root -g` on every render; DOSSIER_NODE_PATH or
    // NODE_PATH is the explicit override.
    let mut out: Vec<String> = Vec::new();

    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn node_path_has_playwright(np: &str) -> bool {
    for part in np.split(':') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if std::path::PathBuf::from(part).join("playwright").is_dir() {
            return true;
        }
    }
    false
}

/// Whether a playwright install is resolvable from here: an explicit
/// `DOSSIER_NODE_PATH` override, a `NODE_PATH` that already carries it, or a
/// known global module root. Diagnostics only (`dossier doctor`).
pub fn playwright_reachable() -> bool {
    if std::env::var("DOSSIER_NODE_PATH").is_ok_and(|v| !v.trim().is_empty()) {
        return true;
    }
    if node_path_has_playwright(&std::env::var("NODE_PATH").unwrap_or_default()) {
        return true;
    }
    detect_node_path_for_playwright().is_some()
}

/// NODE_PATH value that makes a global playwright install resolvable, if
/// the existing environment needs one. None means nothing has to change
/// (or nothing was found).
fn detect_node_path_for_playwright() -> Option<String> {
    if let Ok(v) = std::env::var("DOSSIER_NODE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let existing = std::env::var("NODE_PATH").ok().unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }

    let found = node_path_candidates().into_iter().find(|root| {
        !root.trim().is_empty()
            && std::path::PathBuf::from(root.trim())
                .join("playwright")
                .is_dir()
    })?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

// stdout is JSON-only; stderr is free-form and only surfaced on parse failure.
const RENDER_JS: &str = r#"
const fs = require('fs');

function ok(obj) { process.stdout.write(JSON.stringify(obj)); }
function bad(code, message) { ok({ ok: false, error: { code, message } }); }

async function main() {
  let arg = '';
  try { arg = fs.readFileSync(0, 'utf8'); } catch (_) {}
  let req;
  try { req = JSON.parse(arg); } catch (e) { return bad('invalid_params', 'bad JSON args'); }

  let pw;
  try { pw = require('playwright'); } catch (e) {
    return bad('not_configured', 'Playwright is not installed for Node.js (require("playwright") failed). Install with `npm i -g playwright` and `npx playwright install chromium`.');
  }

  const url = String(req.url || '').trim();
  if (!url) return bad('invalid_params', 'url must be non-empty');
  const timeoutMs = Number(req.timeout_ms || 20000);
  const headless = (req.headless === undefined) ? true : !!req.headless;
  const userAgent = (req.user_agent || '').trim();
  const viewport = req.viewport || { width: 1920, height: 1080 };

  const t0 = Date.now();
  let browser;
  try {
    browser = await pw.chromium.launch({
      headless,
      args: ['--disable-blink-features=AutomationControlled'],
    });
    const contextOpts = { serviceWorkers: 'block', viewport };
    if (userAgent) contextOpts.userAgent = userAgent;
    const context = await browser.newContext(contextOpts);
    // Automation fingerprints: navigator.webdriver is the first thing bot
    // checks look at.
    await context.addInitScript(() => {
      Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    });

    const page = await context.newPage();
    // Images/media/fonts never help text extraction and dominate tail latency.
    try {
      await page.route('**/*', (route) => {
        const rt = route.request().resourceType ? route.request().resourceType() : '';
        if (rt === 'image' || rt === 'media' || rt === 'font') return route.abort();
        return route.continue();
      });
    } catch (_) {}

    const resp = await page.goto(url, { waitUntil: 'domcontentloaded', timeout: timeoutMs });
    // Settle without blocking forever on long-polling pages.
    try { await page.waitForLoadState('networkidle', { timeout: Math.min(5000, timeoutMs) }); } catch (_) {}
    try { await page.waitForTimeout(250); } catch (_) {}

    const html = await page.content();
    const finalUrl = page.url();
    const status = resp ? resp.status() : null;
    ok({ ok: true, final_url: finalUrl, status, html, elapsed_ms: Date.now() - t0 });
  } catch (e) {
    bad('render_failed', String(e && e.message ? e.message : e));
  } finally {
    try { if (browser) await browser.close(); } catch (_) {}
  }
}

main().catch((e) => bad('render_failed', String(e && e.message ? e.message : e)));
"#;

impl PlaywrightRenderer {
    pub fn new(enabled: bool) -> Self {
        let node_bin = std::env::var("DOSSIER_NODE").unwrap_or_else(|_| "node".to_string());
        Self {
            enabled,
            node_bin,
            max_html_chars: 2_000_000,
        }
    }

    pub fn with_node_bin(mut self, node_bin: impl Into<String>) -> Self {
        self.node_bin = node_bin.into();
        self
    }

    pub fn with_max_html_chars(mut self, max: usize) -> Self {
        self.max_html_chars = max;
        self
    }

    pub fn node_bin(&self) -> &str {
        &self.node_bin
    }

    async fn run_child(&self, args_json: &str, hard_timeout_ms: u64) -> Result<serde_json::Value> {
        let mut cmd = tokio::process::Command::new(&self.node_bin);
        if let Some(node_path) = detect_node_path_for_playwright() {
            cmd.env("NODE_PATH", node_path);
        }
        let mut child = cmd
            .arg("-e")
            .arg(RENDER_JS)
            .kill_on_drop(true)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::NotConfigured(format!(
                    "rendered fetch requires Node.js (`node`) and the Playwright npm package: {e}"
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // If the write fails the child emits a deterministic JSON error.
            let _ = stdin.write_all(args_json.as_bytes()).await;
            let _ = stdin.shutdown().await;
        }

        // `wait_with_output` consumes the child, which prevents killing it on
        // timeout. Read the pipes concurrently and wait with a hard deadline.
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Render("renderer child: missing stdout pipe".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Render("renderer child: missing stderr pipe".to_string()))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = tokio::io::AsyncReadExt::read_to_end(&mut stderr, &mut buf).await;
            buf
        });

        match tokio::time::timeout(Duration::from_millis(hard_timeout_ms), child.wait()).await {
            Ok(r) => {
                r.map_err(|e| Error::Render(format!("renderer child wait failed: {e}")))?;
            }
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(Error::Render(format!(
                    "render hard timeout after {hard_timeout_ms}ms"
                )));
            }
        }

        let out_stdout = stdout_task.await.unwrap_or_default();
        let out_stderr = stderr_task.await.unwrap_or_default();

        let stdout_s = String::from_utf8_lossy(&out_stdout).trim().to_string();
        serde_json::from_str(&stdout_s).map_err(|e| {
            let stderr_s = String::from_utf8_lossy(&out_stderr).trim().to_string();
            if stderr_s.is_empty() {
                Error::Render(format!("renderer returned invalid JSON: {e}"))
            } else {
                Error::Render(format!(
                    "renderer returned invalid JSON: {e}. stderr: {stderr_s}"
                ))
            }
        })
    }
}

#[async_trait::async_trait]
impl PageRenderer for PlaywrightRenderer {
    fn name(&self) -> &'static str {
        "playwright"
    }

    fn available(&self) -> bool {
        self.enabled
    }

    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        if !self.enabled {
            return Err(Error::NotConfigured(
                "rendered fetch is disabled in this configuration".to_string(),
            ));
        }
        dossier_core::parse_http_url(&req.url)?;

        let profile = crate::agent::random_profile();
        let ua = req
            .user_agent
            .clone()
            .unwrap_or_else(|| profile.user_agent.to_string());
        let args_json = serde_json::json!({
            "url": req.url,
            "timeout_ms": req.timeout_ms,
            "headless": req.headless,
            "user_agent": ua,
            "viewport": { "width": profile.viewport.0, "height": profile.viewport.1 },
        })
        .to_string();

        // Covers browser startup on top of the navigation timeout.
        let hard_timeout_ms = req.timeout_ms.saturating_add(10_000);
        let t0 = std::time::Instant::now();
        let v = self.run_child(&args_json, hard_timeout_ms).await?;

        if v.get("ok").and_then(|x| x.as_bool()) != Some(true) {
            let code = v
                .pointer("/error/code")
                .and_then(|x| x.as_str())
                .unwrap_or("render_failed");
            let message = v
                .pointer("/error/message")
                .and_then(|x| x.as_str())
                .unwrap_or("render failed");
            return Err(match code {
                "not_configured" => Error::NotConfigured(message.to_string()),
                "invalid_params" => Error::InvalidUrl(message.to_string()),
                _ => Error::Render(message.to_string()),
            });
        }

        let final_url = v
            .get("final_url")
            .and_then(|x| x.as_str())
            .unwrap_or(&req.url)
            .to_string();
        let status = v.get("status").and_then(|x| x.as_u64()).map(|n| n as u16);
        let html = v
            .get("html")
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string();
        let elapsed_ms = v
            .get("elapsed_ms")
            .and_then(|x| x.as_u64())
            .unwrap_or(t0.elapsed().as_millis() as u64);

        // An empty document must not look like a successful render.
        if html.trim().is_empty() {
            return Err(Error::Render("renderer returned empty HTML".to_string()));
        }
        let html_chars = html.chars().count();
        if html_chars > self.max_html_chars {
            return Err(Error::Render(format!(
                "rendered HTML too large ({html_chars} chars > {})",
                self.max_html_chars
            )));
        }

        Ok(RenderedPage {
            final_url,
            status,
            html,
            elapsed_ms,
        })
    }
}
