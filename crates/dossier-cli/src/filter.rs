//! Decides whether a discovered URL is worth fetching.
//!
//! Pure and deterministic: the same candidate always gets the same decision.
//! Base rule tables evaluate first and short-circuit on rejection; caller
//! predicates are ANDed in afterwards, except that preferred-domain accepts
//! bypass them.

use dossier_core::Candidate;

const BLOCKED_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "instagram.com",
    "facebook.com",
    "twitter.com",
    "tiktok.com",
    "pinterest.com",
    "flickr.com",
    "imgur.com",
    "maps.google",
    "images.google",
    "translate.google",
    "amazon.com/dp/",
    "ebay.com",
    "aliexpress.com",
    "spotify.com",
    "soundcloud.com",
    "apple.com/music",
    "netflix.com",
    "hulu.com",
    "disney.com",
];

const BLOCKED_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".mp4", ".avi", ".mov", ".wmv", ".flv",
    ".webm", ".mp3", ".wav", ".flac", ".aac", ".ogg", ".pdf", ".doc", ".docx", ".ppt", ".pptx",
    ".xls", ".xlsx", ".zip", ".rar", ".tar", ".gz",
];

const BLOCKED_PATTERNS: &[&str] = &[
    "/images/",
    "/img/",
    "/video/",
    "/videos/",
    "/audio/",
    "/download/",
    "/file/",
    "/attachment/",
    "/media/",
    "webcache.googleusercontent.com",
    "google.com/search",
    "google.com/url?q=",
    "shopping",
    "maps",
    "flights",
];

const BLOCKED_TITLE_KEYWORDS: &[&str] = &[
    "video", "watch", "listen", "download", "image", "photo", "picture", "song", "music", "movie",
    "film", "playlist", "gallery", "album", "stream", "live", "podcast",
];

const PREFERRED_DOMAINS: &[&str] = &[
    "wikipedia.org",
    "britannica.com",
    "edu",
    ".gov",
    "reuters.com",
    "bbc.com",
    "cnn.com",
    "npr.org",
    "medium.com",
    "substack.com",
    "wordpress.com",
    "blogspot.com",
    "techcrunch.com",
    "wired.com",
    "arstechnica.com",
    "nature.com",
    "sciencedirect.com",
    "arxiv.org",
    "stackoverflow.com",
    "github.com",
];

/// Rule tables for the base decision. All matching is case-insensitive;
/// domains and patterns match as URL substrings, extensions as path suffixes.
#[derive(Debug, Clone)]
pub struct FilterRules {
    pub blocked_domains: Vec<String>,
    pub blocked_extensions: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub blocked_title_keywords: Vec<String>,
    pub preferred_domains: Vec<String>,
}

impl Default for FilterRules {
    fn default() -> Self {
        fn owned(xs: &[&str]) -> Vec<String> {
            xs.iter().map(|s| s.to_string()).collect()
        }
        Self {
            blocked_domains: owned(BLOCKED_DOMAINS),
            blocked_extensions: owned(BLOCKED_EXTENSIONS),
            blocked_patterns: owned(BLOCKED_PATTERNS),
            blocked_title_keywords: owned(BLOCKED_TITLE_KEYWORDS),
            preferred_domains: owned(PREFERRED_DOMAINS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    pub allowed: bool,
    /// Stable reason code; only set on rejections.
    pub reason: Option<&'static str>,
}

impl FilterDecision {
    fn accept() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn reject(reason: &'static str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }
}

/// Extra acceptance condition composed onto the base rules by logical AND.
pub type UrlPredicate = Box<dyn Fn(&Candidate) -> bool + Send + Sync>;

pub struct SourceFilter {
    rules: FilterRules,
    extra: Vec<UrlPredicate>,
}

impl SourceFilter {
    pub fn new(rules: FilterRules) -> Self {
        Self {
            rules,
            extra: Vec::new(),
        }
    }

    /// Add an extra predicate. Predicates never widen the base decision:
    /// a base-table rejection stands no matter what they return.
    pub fn with_predicate(
        mut self,
        pred: impl Fn(&Candidate) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.extra.push(Box::new(pred));
        self
    }

    pub fn decide(&self, candidate: &Candidate) -> FilterDecision {
        let url_lc = candidate.url.to_lowercase();

        let parsed = match url::Url::parse(&candidate.url) {
            Ok(u) => u,
            Err(_) => return FilterDecision::reject("invalid_url"),
        };
        match parsed.scheme() {
            "http" | "https" => {}
            _ => return FilterDecision::reject("non_http_scheme"),
        }

        if self.rules.blocked_domains.iter().any(|d| url_lc.contains(d)) {
            return FilterDecision::reject("blocked_domain");
        }

        let path_lc = parsed.path().to_lowercase();
        if self
            .rules
            .blocked_extensions
            .iter()
            .any(|ext| path_lc.ends_with(ext))
        {
            return FilterDecision::reject("blocked_extension");
        }

        if self.rules.blocked_patterns.iter().any(|p| url_lc.contains(p)) {
            return FilterDecision::reject("blocked_pattern");
        }

        if let Some(title) = candidate.title.as_deref() {
            let title_lc = title.to_lowercase();
            if self
                .rules
                .blocked_title_keywords
                .iter()
                .any(|kw| title_lc.contains(kw))
            {
                return FilterDecision::reject("blocked_title");
            }
        }

        // Known text-heavy domains skip the caller predicates entirely.
        if self
            .rules
            .preferred_domains
            .iter()
            .any(|d| url_lc.contains(d))
        {
            return FilterDecision::accept();
        }

        if !self.extra.iter().all(|p| p(candidate)) {
            return FilterDecision::reject("predicate_rejected");
        }

        FilterDecision::accept()
    }

    /// Convenience form of [`decide`](Self::decide) for callers holding a bare
    /// URL + title pair.
    pub fn is_text_based_url(&self, url: &str, title: Option<&str>) -> bool {
        self.decide(&Candidate {
            rank: 0,
            url: url.to_string(),
            title: title.map(|s| s.to_string()),
        })
        .allowed
    }
}
