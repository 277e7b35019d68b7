use std::io::Cursor;

/// Convert HTML to readable plain text.
///
/// Notes:
/// - This is intentionally "good enough" and deterministic, not a full readability engine.
/// - Callers should apply their own output bounds (chars) if needed.
pub fn html_to_text(html: &str, width: usize) -> String {
    // html2text expects bytes; Cursor avoids allocating a second large buffer.
    html2text::from_read(Cursor::new(html.as_bytes()), width).unwrap_or_else(|_| html.to_string())
}

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_any_text(s: &str) -> bool {
    s.chars().any(|c| !c.is_whitespace())
}

/// Best-effort guess for whether bytes are HTML-ish.
pub fn bytes_look_like_html(bytes: &[u8]) -> bool {
    // Skip leading whitespace.
    let mut i = 0usize;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return false;
    }
    let rest = &bytes[i..];
    // Common prefixes; keep it conservative.
    rest.starts_with(b"<!doctype")
        || rest.starts_with(b"<!DOCTYPE")
        || rest.starts_with(b"<html")
        || rest.starts_with(b"<HTML")
        || rest.starts_with(b"<head")
        || rest.starts_with(b"<body")
}

fn class_or_id_lc(el: &html_scraper::ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

fn is_generic_boilerplate_container(el: &html_scraper::ElementRef) -> bool {
    // Keep this generic: avoid site/host heuristics; only structural UI words.
    let s = class_or_id_lc(el);
    if s.is_empty() {
        return false;
    }
    for bad in [
        "nav",
        "navbar",
        "menu",
        "sidebar",
        "footer",
        "header",
        "banner",
        "cookie",
        "consent",
        "ads",
        "advert",
        "promo",
        "subscribe",
        "newsletter",
    ] {
        if s.contains(bad) {
            return true;
        }
    }
    false
}

fn element_text_chars(el: &html_scraper::ElementRef) -> usize {
    el.text().map(|t| t.chars().count()).sum()
}

fn element_link_text_chars(el: &html_scraper::ElementRef) -> usize {
    let sel = html_scraper::Selector::parse("a").ok();
    let Some(sel) = sel else { return 0 };
    el.select(&sel)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

fn pick_main_text(html: &str, max_elems: usize) -> Option<String> {
    let max_elems = max_elems.clamp(50, 50_000);
    let doc = html_scraper::Html::parse_document(html);

    let sel = html_scraper::Selector::parse("article, main, section, div").ok()?;
    let mut seen = 0usize;
    let mut best_score: i64 = 0;
    let mut best_text: Option<String> = None;

    for el in doc.select(&sel) {
        seen += 1;
        if seen > max_elems {
            break;
        }
        if is_generic_boilerplate_container(&el) {
            continue;
        }
        let txt = element_text_chars(&el);
        // Keep this low enough to work for small "single article" pages.
        // Tag bonuses and link-density penalties keep pure nav widgets out.
        if txt < 20 {
            continue;
        }
        let link_txt = element_link_text_chars(&el);
        // Prefer dense non-link text. Link text is usually navigation / TOCs / tag clouds.
        let mut score = txt as i64 - 2 * (link_txt as i64);
        let tag = el.value().name();
        if tag == "article" {
            score += 500;
        } else if tag == "main" {
            score += 300;
        }
        // Penalize suspiciously link-heavy blocks.
        if link_txt > txt / 2 {
            score -= 500;
        }
        if score > best_score {
            best_score = score;
            let t = el.text().collect::<Vec<_>>().join(" ");
            best_text = Some(norm_ws(&t));
        }
    }

    best_text
}

pub fn html_main_to_text(html: &str) -> Option<String> {
    let out = pick_main_text(html, 20_000)?;
    has_any_text(&out).then_some(out)
}

fn strip_tag_blocks(html: &str, tag: &str) -> String {
    // Minimal, best-effort stripper for <tag ...> ... </tag> blocks.
    //
    // This is intentionally conservative: it only removes when it finds a close tag,
    // and it is ASCII-case-insensitive on tag names.
    let tag_lc = tag.to_ascii_lowercase();
    let open_pat = format!("<{}", tag_lc);
    let close_pat = format!("</{}>", tag_lc);

    let mut out = String::new();
    let mut i = 0usize;
    let lower = html.to_ascii_lowercase();
    while let Some(rel_start) = lower[i..].find(&open_pat) {
        let start = i + rel_start;
        // Find the matching close tag after start.
        let after_open = start + open_pat.len();
        if let Some(rel_end) = lower[after_open..].find(&close_pat) {
            let end = after_open + rel_end + close_pat.len();
            out.push_str(&html[i..start]);
            i = end;
        } else {
            // No close tag; stop stripping.
            break;
        }
    }
    out.push_str(&html[i..]);
    out
}

/// First `<title>` text, whitespace-normalized.
pub fn page_title(html: &str) -> Option<String> {
    let doc = html_scraper::Html::parse_document(html);
    let sel = html_scraper::Selector::parse("title").ok()?;
    let el = doc.select(&sel).next()?;
    let t = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
    (!t.is_empty()).then_some(t)
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    pub engine: &'static str,
    pub text: String,
    pub warnings: Vec<&'static str>,
}

/// Truncate to at most `max_chars` characters, never splitting a char.
/// Returns (text, char_count, clipped).
pub fn truncate_to_chars(s: &str, max_chars: usize) -> (String, usize, bool) {
    if max_chars == 0 {
        return (String::new(), 0, s.chars().any(|c| !c.is_whitespace()));
    }
    let mut out = String::new();
    let mut n = 0usize;
    let mut clipped = false;
    for ch in s.chars() {
        if n >= max_chars {
            clipped = true;
            break;
        }
        out.push(ch);
        n += 1;
    }
    (out, n, clipped)
}

fn content_type_lc_prefix(ct: Option<&str>) -> String {
    ct.unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Extract a small, deterministic "hint text" when the page body renders to
/// nothing: title + meta descriptions + first h1/h2, bounded.
pub fn html_hint_text(html: &str, max_chars: usize) -> String {
    let max_chars = max_chars.clamp(50, 2_000);
    let doc = html_scraper::Html::parse_document(html);

    fn first_text(doc: &html_scraper::Html, selector: &str) -> Option<String> {
        let sel = html_scraper::Selector::parse(selector).ok()?;
        let el = doc.select(&sel).next()?;
        let t = el.text().collect::<Vec<_>>().join(" ");
        let t = t.trim().to_string();
        (!t.is_empty()).then_some(t)
    }

    fn first_attr(doc: &html_scraper::Html, selector: &str, attr: &str) -> Option<String> {
        let sel = html_scraper::Selector::parse(selector).ok()?;
        let el = doc.select(&sel).next()?;
        let v = el.value().attr(attr)?;
        let v = v.trim().to_string();
        (!v.is_empty()).then_some(v)
    }

    let mut parts = Vec::new();
    if let Some(t) = first_text(&doc, "title") {
        parts.push(t);
    }
    // Meta descriptions are often the only "human text" on JS-heavy shells.
    if let Some(d) = first_attr(&doc, "meta[name=\"description\"]", "content") {
        parts.push(d);
    }
    if let Some(d) = first_attr(&doc, "meta[property=\"og:description\"]", "content") {
        parts.push(d);
    }
    if let Some(t) = first_text(&doc, "h1") {
        parts.push(t);
    }
    if let Some(t) = first_text(&doc, "h2") {
        parts.push(t);
    }

    let joined = parts.join("\n");
    let (out, _n, _clipped) = truncate_to_chars(&joined, max_chars);
    out
}

/// Extract readable text from an HTML document.
///
/// Strips script/style/noscript, prefers a scored main-content block when it
/// clearly beats whole-page conversion, falls back to whole-page html2text,
/// then to title/meta hint text.
pub fn page_text(html: &str, width: usize) -> ExtractedText {
    let mut warnings: Vec<&'static str> = Vec::new();

    // Strip script/style/noscript before html2text so JS/CSS never counts as
    // "content". Script-only pages stay empty and trigger the hint fallback.
    let html1 = strip_tag_blocks(html, "script");
    let html2 = strip_tag_blocks(&html1, "style");
    let stripped = strip_tag_blocks(&html2, "noscript");
    let full = html_to_text(&stripped, width);
    let main = html_main_to_text(&stripped);

    fn quality_score(s: &str) -> i64 {
        let non_ws = s.chars().filter(|c| !c.is_whitespace()).count() as i64;
        let url_hits = s.matches("http").count() as i64;
        // Penalize "link soup".
        let mut score = non_ws - 200 * url_hits;

        // Penalize pages dominated by many short lines (common for nav/menus).
        let short_lines = s
            .lines()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .filter(|l| l.chars().count() <= 30)
            .count() as i64;
        score -= 20 * short_lines;

        // Penalize common UI boilerplate tokens (kept small + generic).
        let sl = s.to_ascii_lowercase();
        for needle in [
            "sign up", "log in", "login", "cookie", "consent", "privacy", "terms",
        ] {
            let hits = sl.matches(needle).count() as i64;
            score -= 250 * hits;
        }

        score
    }

    let full_ok = has_any_text(&full);
    let main_ok = main.as_ref().map(|t| has_any_text(t)).unwrap_or(false);
    if main_ok {
        let s_main = quality_score(main.as_deref().unwrap_or(""));
        let s_full = if full_ok { quality_score(&full) } else { 0 };
        // Prefer main-content when it's meaningfully better than whole-page text.
        if !full_ok || s_main >= s_full + 300 {
            warnings.push("boilerplate_reduced");
            return ExtractedText {
                engine: "html_main",
                text: main.unwrap_or_default(),
                warnings,
            };
        }
    }

    if full_ok {
        return ExtractedText {
            engine: "html2text",
            text: full,
            warnings,
        };
    }

    // html2text yielded nothing; squeeze something readable out of the head.
    let hint = html_hint_text(&stripped, 500);
    if has_any_text(&hint) {
        warnings.push("hint_text_fallback");
        return ExtractedText {
            engine: "html_hint",
            text: norm_ws(&hint),
            warnings,
        };
    }

    warnings.push("unsupported_content_no_text");
    ExtractedText {
        engine: "unknown",
        text: String::new(),
        warnings,
    }
}

/// Extract readable text from a fetched body, routing on content type.
///
/// Markdown/JSON/XML/plain bodies pass through as text (rendering them via
/// html2text produces noise); everything else takes the HTML path.
pub fn page_text_from_bytes(
    bytes: &[u8],
    content_type: Option<&str>,
    width: usize,
) -> ExtractedText {
    let ct0 = content_type_lc_prefix(content_type);
    let is_markdown = ct0 == "text/markdown" || ct0 == "text/x-markdown";
    let is_json = ct0 == "application/json" || ct0.ends_with("+json");
    let is_xml = ct0 == "application/xml" || ct0 == "text/xml" || ct0.ends_with("+xml");
    let is_text =
        (ct0.starts_with("text/") && ct0 != "text/html") || is_markdown || is_json || is_xml;
    if is_text && !bytes_look_like_html(bytes) {
        let text = String::from_utf8_lossy(bytes).to_string();
        let engine = if is_markdown {
            "markdown"
        } else if is_json {
            "json"
        } else if is_xml {
            "xml"
        } else {
            "text"
        };
        return ExtractedText {
            engine,
            text,
            warnings: Vec::new(),
        };
    }

    let html = String::from_utf8_lossy(bytes).to_string();
    page_text(&html, width)
}

const LOW_QUALITY_INDICATORS: &[&str] = &[
    "404",
    "not found",
    "page not found",
    "error",
    "access denied",
    "forbidden",
    "please enable javascript",
    "loading...",
    "please wait",
    "click here to continue",
];

/// Whether extracted text carries enough substance to summarize.
///
/// Requires ≥100 chars, ≥50 words longer than 2 chars, no error-page
/// indicator substring, and ≥70% alphanumeric-or-whitespace characters.
pub fn is_text_rich(text: &str) -> bool {
    let total_chars = text.chars().count();
    if total_chars < 100 {
        return false;
    }

    let meaningful_words = text
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .count();
    if meaningful_words < 50 {
        return false;
    }

    let lower = text.to_lowercase();
    if LOW_QUALITY_INDICATORS.iter().any(|ind| lower.contains(ind)) {
        return false;
    }

    let alnum_or_ws = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .count();
    // Symbol soup (minified JS leftovers, encoded blobs) fails this ratio.
    (alnum_or_ws as f64) / (total_chars as f64) >= 0.7
}
