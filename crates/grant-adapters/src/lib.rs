//! Source adapter contract and the configurable selector-fallback listing adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grant_core::{
    find_date_in, listing_identity, ListingRecord, OrganizationDirectory, Taxonomy,
    DEFAULT_MAX_KEYWORDS, UNKNOWN_ORGANIZATION,
};
use grant_storage::{FetchError, PageFetcher, PageRequest, WaitPolicy, DEFAULT_FETCH_TIMEOUT};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const CRATE_NAME: &str = "grant-adapters";

/// Records emitted per adapter per run.
pub const MAX_ITEMS_PER_RUN: usize = 20;
pub const DEFAULT_MIN_TITLE_CHARS: usize = 5;
/// A selector must match at least this many items to count as "the" listing.
pub const DEFAULT_MIN_COUNT: usize = 4;

/// Table-header artifacts that show up as link text on board pages.
pub const DEFAULT_NOISE_TITLES: &[&str] = &[
    "번호", "제목", "등록일", "마감일", "작성일", "접수기간", "기관", "주관기관", "조회", "조회수",
    "첨부", "상태", "no", "title", "date", "더보기", "목록",
];

const LINK_SELECTOR: &str = "a[href]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Http,
    Rendered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorRule {
    pub css: String,
    #[serde(default = "default_min_count")]
    pub min_count: usize,
}

impl SelectorRule {
    pub fn new(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            min_count: DEFAULT_MIN_COUNT,
        }
    }
}

fn default_min_count() -> usize {
    DEFAULT_MIN_COUNT
}

fn default_enabled() -> bool {
    true
}

fn default_max_items() -> usize {
    MAX_ITEMS_PER_RUN
}

fn default_min_title_chars() -> usize {
    DEFAULT_MIN_TITLE_CHARS
}

/// One listing source as declared in `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_name: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Origin that relative links resolve against.
    pub base_url: String,
    pub listing_url: String,
    pub selectors: Vec<SelectorRule>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_min_title_chars")]
    pub min_title_chars: usize,
    /// Added to `DEFAULT_NOISE_TITLES`.
    #[serde(default)]
    pub noise_titles: Vec<String>,
    #[serde(default)]
    pub fetch_mode: FetchMode,
    #[serde(default)]
    pub organization_hint: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl SourceConfig {
    pub fn k_startup() -> Self {
        Self {
            source_name: "k-startup".to_string(),
            display_name: "K-Startup 사업공고".to_string(),
            enabled: true,
            base_url: "https://www.k-startup.go.kr".to_string(),
            listing_url: "https://www.k-startup.go.kr/web/contents/bizpbanc-ongoing.do".to_string(),
            selectors: [
                ".board-list li",
                ".board tbody tr",
                "table.table tbody tr",
                ".list-item",
                "tr[onclick]",
            ]
            .into_iter()
            .map(SelectorRule::new)
            .collect(),
            max_items: MAX_ITEMS_PER_RUN,
            min_title_chars: DEFAULT_MIN_TITLE_CHARS,
            noise_titles: Vec::new(),
            fetch_mode: FetchMode::Rendered,
            organization_hint: Some("K-Startup".to_string()),
            timeout_secs: None,
        }
    }

    pub fn bizinfo() -> Self {
        Self {
            source_name: "bizinfo".to_string(),
            display_name: "기업마당 지원사업".to_string(),
            enabled: true,
            base_url: "https://www.bizinfo.go.kr".to_string(),
            listing_url: "https://www.bizinfo.go.kr/web/lay1/bbs/S1T122C128/AS/74/list.do"
                .to_string(),
            selectors: [".table_Type_1 tbody tr", "table tbody tr", ".board-list li"]
                .into_iter()
                .map(SelectorRule::new)
                .collect(),
            max_items: MAX_ITEMS_PER_RUN,
            min_title_chars: DEFAULT_MIN_TITLE_CHARS,
            noise_titles: Vec::new(),
            fetch_mode: FetchMode::Http,
            organization_hint: None,
            timeout_secs: None,
        }
    }
}

pub fn builtin_source(source_name: &str) -> Option<SourceConfig> {
    match source_name {
        "k-startup" => Some(SourceConfig::k_startup()),
        "bizinfo" => Some(SourceConfig::bizinfo()),
        _ => None,
    }
}

/// Normalizer tables shared by every adapter in a run.
#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    pub taxonomy: Taxonomy,
    pub organizations: OrganizationDirectory,
    pub max_keywords: Option<usize>,
}

impl FieldRules {
    fn max_keywords(&self) -> usize {
        self.max_keywords.unwrap_or(DEFAULT_MAX_KEYWORDS)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("item has no link")]
    MissingLink,
    #[error("link has no href")]
    MissingHref,
    #[error("placeholder link {0:?}")]
    PlaceholderLink(String),
    #[error("empty title")]
    EmptyTitle,
    #[error("title {title:?} shorter than {min} characters")]
    TitleTooShort { title: String, min: usize },
    #[error("table header noise {0:?}")]
    NoiseTitle(String),
    #[error("cannot resolve {href:?}: {reason}")]
    UnresolvableUrl { href: String, reason: String },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector {css:?}: {reason}")]
    InvalidSelector { css: String, reason: String },
    #[error("invalid base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("source {0} declares no selectors")]
    NoSelectors(String),
}

fn parse_selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::InvalidSelector {
        css: css.to_string(),
        reason: e.to_string(),
    })
}

/// Evaluate `rules` in order and return the first whose match count reaches its
/// `min_count`, with its index. `None` means the page layout is unrecognized.
pub fn first_plausible_match<'a>(
    document: &'a Html,
    rules: &[SelectorRule],
) -> Result<Option<(usize, Vec<ElementRef<'a>>)>, AdapterError> {
    for (index, rule) in rules.iter().enumerate() {
        let selector = parse_selector(&rule.css)?;
        let matches: Vec<ElementRef<'a>> = document.select(&selector).collect();
        debug!(css = %rule.css, count = matches.len(), "selector probe");
        if matches.len() >= rule.min_count.max(1) {
            return Ok(Some((index, matches)));
        }
    }
    Ok(None)
}

/// Outcome of running the selector chain over one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub selector_index: Option<usize>,
    pub candidates: usize,
    pub skipped: usize,
    pub records: Vec<ListingRecord>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &str;

    fn listing_request(&self) -> PageRequest;

    /// Pure HTML -> records step; never touches the network.
    fn extract(&self, html: &str) -> Result<Extraction, AdapterError>;

    async fn collect(&self, fetcher: &dyn PageFetcher) -> Result<Vec<ListingRecord>, AdapterError> {
        let request = self.listing_request();
        let html = fetcher.fetch_page(&request).await?;
        let extraction = self.extract(&html)?;
        info!(
            source = self.source_name(),
            selector_index = ?extraction.selector_index,
            candidates = extraction.candidates,
            skipped = extraction.skipped,
            records = extraction.records.len(),
            "source extracted"
        );
        Ok(extraction.records)
    }
}

#[derive(Debug, Clone)]
pub struct ListingAdapter {
    config: SourceConfig,
    base: Url,
    rules: Arc<FieldRules>,
    timeout: Duration,
}

impl ListingAdapter {
    pub fn new(config: SourceConfig, rules: Arc<FieldRules>) -> Result<Self, AdapterError> {
        if config.selectors.is_empty() {
            return Err(AdapterError::NoSelectors(config.source_name.clone()));
        }
        for rule in &config.selectors {
            parse_selector(&rule.css)?;
        }
        let base = Url::parse(&config.base_url).map_err(|e| AdapterError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        let timeout = config
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_FETCH_TIMEOUT);
        Ok(Self {
            config,
            base,
            rules,
            timeout,
        })
    }

    /// Default timeout for sources that do not pin their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        if self.config.timeout_secs.is_none() {
            self.timeout = timeout;
        }
        self
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn is_noise(&self, title: &str) -> bool {
        let lower = title.to_lowercase();
        DEFAULT_NOISE_TITLES.iter().any(|noise| *noise == lower)
            || self
                .config
                .noise_titles
                .iter()
                .any(|noise| noise.to_lowercase() == lower)
    }

    fn extract_item(
        &self,
        item: ElementRef<'_>,
        link_selector: &Selector,
    ) -> Result<ListingRecord, ExtractionError> {
        let link = if item.value().name() == "a" {
            item
        } else {
            item.select(link_selector)
                .next()
                .ok_or(ExtractionError::MissingLink)?
        };

        let title = collapse_whitespace(&link.text().collect::<String>());
        if title.is_empty() {
            return Err(ExtractionError::EmptyTitle);
        }
        if self.is_noise(&title) {
            return Err(ExtractionError::NoiseTitle(title));
        }
        if title.chars().count() < self.config.min_title_chars {
            return Err(ExtractionError::TitleTooShort {
                title,
                min: self.config.min_title_chars,
            });
        }

        let href = link
            .value()
            .attr("href")
            .map(str::trim)
            .ok_or(ExtractionError::MissingHref)?;
        let url = resolve_link(&self.base, href)?;

        let item_text = collapse_whitespace(&item.text().collect::<Vec<_>>().join(" "));
        let organization = self
            .rules
            .organizations
            .resolve(&item_text)
            .or(self.config.organization_hint.as_deref())
            .unwrap_or(UNKNOWN_ORGANIZATION)
            .to_string();

        Ok(ListingRecord {
            id: listing_identity(&self.config.source_name, &title),
            organization,
            deadline: find_date_in(&item_text),
            url,
            keywords: self
                .rules
                .taxonomy
                .extract_keywords(&item_text, self.rules.max_keywords()),
            description: title.clone(),
            title,
        })
    }
}

#[async_trait]
impl SourceAdapter for ListingAdapter {
    fn source_name(&self) -> &str {
        &self.config.source_name
    }

    fn listing_request(&self) -> PageRequest {
        let request = PageRequest::new(self.config.listing_url.clone())
            .with_timeout(self.timeout)
            .with_header("Accept-Language", "ko-KR,ko;q=0.9,en;q=0.8");
        match self.config.fetch_mode {
            FetchMode::Http => request,
            FetchMode::Rendered => {
                request.rendered(WaitPolicy::NetworkIdleThen(Duration::from_secs(3)))
            }
        }
    }

    fn extract(&self, html: &str) -> Result<Extraction, AdapterError> {
        let document = Html::parse_document(html);
        let Some((selector_index, items)) = first_plausible_match(&document, &self.config.selectors)?
        else {
            info!(source = %self.config.source_name, "no selector matched a plausible item list");
            return Ok(Extraction::default());
        };

        let link_selector = parse_selector(LINK_SELECTOR)?;
        let mut extraction = Extraction {
            selector_index: Some(selector_index),
            candidates: items.len(),
            ..Extraction::default()
        };
        for item in items {
            if extraction.records.len() >= self.config.max_items {
                break;
            }
            match self.extract_item(item, &link_selector) {
                Ok(record) => extraction.records.push(record),
                Err(err) => {
                    debug!(source = %self.config.source_name, %err, "skipping item");
                    extraction.skipped += 1;
                }
            }
        }
        Ok(extraction)
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn resolve_link(base: &Url, href: &str) -> Result<String, ExtractionError> {
    let lower = href.to_ascii_lowercase();
    if href.is_empty() || href.starts_with('#') || lower.starts_with("javascript:") {
        return Err(ExtractionError::PlaceholderLink(href.to_string()));
    }
    let url = base
        .join(href)
        .map_err(|e| ExtractionError::UnresolvableUrl {
            href: href.to_string(),
            reason: e.to_string(),
        })?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        _ => Err(ExtractionError::PlaceholderLink(href.to_string())),
    }
}
