//! Website fetching and analysis.
//!
//! `WebFetcher` pulls a page's title, meta description and opening
//! paragraphs. `WebsiteAnalyzer` turns that into a `WebsiteData` payload and,
//! through the model, a marketing report. Nothing here returns an error to
//! the caller: failures become Arabic messages in the payload or report.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::error::{FetchError, LlmError};
use crate::llm::{CompletionRequest, LlmProvider};
use crate::onboarding::model::{Profile, WebsiteAnalysis};
use crate::onboarding::prompts::{self, PageDigest};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = "Mozilla/5.0";
const PREVIEW_CHARS: usize = 300;
const PARAGRAPH_LIMIT: usize = 2;

const NO_TITLE: &str = "No title found";
const NO_DESCRIPTION: &str = "No description found";
const NO_CONTENT: &str = "Could not extract content";

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("hardcoded selector must parse"));

static NAMED_META: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[name]").expect("hardcoded selector must parse"));

static PARAGRAPH: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("hardcoded selector must parse"));

/// What a fetch pulled out of a page. `None` means the page didn't have it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Text of the opening paragraphs, space-joined.
    pub content: Option<String>,
}

/// Fetches and parses a web page.
#[async_trait]
pub trait WebFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// `WebFetcher` over reqwest. Certificate errors are ignored.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                reason: format!("Failed to build reqwest client: {e}"),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        tracing::debug!(url, "Fetching website");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| request_error(url, e))?;

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Parse {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        Ok(parse_page(url, &html))
    }
}

fn request_error(url: &str, e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Extract title, meta description and the first paragraphs from HTML.
///
/// Comments and `<script>` bodies are not elements, so they never count as
/// paragraphs. Entities are decoded by the parser.
pub fn parse_page(url: &str, html: &str) -> FetchedPage {
    let document = Html::parse_document(html);
    FetchedPage {
        url: url.to_string(),
        title: extract_title(&document),
        description: extract_description(&document),
        content: extract_paragraphs(&document, PARAGRAPH_LIMIT),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let title = document.select(&TITLE).next()?;
    non_empty(collapse_whitespace(&title.text().collect::<String>()))
}

/// `content` of the first `<meta name="description">`, name matched
/// case-insensitively.
fn extract_description(document: &Html) -> Option<String> {
    let meta = document.select(&NAMED_META).find(|meta| {
        meta.value()
            .attr("name")
            .is_some_and(|name| name.trim().eq_ignore_ascii_case("description"))
    })?;
    non_empty(collapse_whitespace(meta.value().attr("content")?))
}

/// Text of the first `limit` `<p>` elements. Empty paragraphs count toward
/// the limit but contribute nothing.
fn extract_paragraphs(document: &Html, limit: usize) -> Option<String> {
    let paragraphs: Vec<String> = document
        .select(&PARAGRAPH)
        .take(limit)
        .map(|p| collapse_whitespace(&p.text().collect::<String>()))
        .filter(|text| !text.is_empty())
        .collect();
    (!paragraphs.is_empty()).then(|| paragraphs.join(" "))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

/// Result of looking at a website, as returned to API clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebsiteData {
    Success {
        url: String,
        domain: String,
        title: String,
        description: String,
        content_preview: String,
    },
    Error {
        url: String,
        error: String,
    },
}

impl WebsiteData {
    pub fn url(&self) -> &str {
        match self {
            Self::Success { url, .. } | Self::Error { url, .. } => url,
        }
    }
}

/// Prefix `https://` when the input has no scheme.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Host (and port, if any) of a URL; empty when it doesn't parse.
pub fn domain_of(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        },
        Err(_) => String::new(),
    }
}

/// First `PREVIEW_CHARS` characters, with `...` when cut.
fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

/// Arabic message for a fetch failure.
fn fetch_error_message(error: &FetchError) -> String {
    match error {
        FetchError::Timeout { .. } => {
            "الموقع يستغرق وقتاً طويلاً للرد. يرجى المحاولة مرة أخرى.".to_string()
        }
        FetchError::Request { reason, .. } => format!("خطأ في الوصول للموقع: {reason}"),
        FetchError::Parse { reason, .. } => format!("خطأ في تحليل الموقع: {reason}"),
    }
}

/// Fetches websites and writes marketing reports about them.
pub struct WebsiteAnalyzer {
    fetcher: Arc<dyn WebFetcher>,
    llm: Arc<dyn LlmProvider>,
    temperature: f32,
}

impl WebsiteAnalyzer {
    pub fn new(fetcher: Arc<dyn WebFetcher>, llm: Arc<dyn LlmProvider>, temperature: f32) -> Self {
        Self {
            fetcher,
            llm,
            temperature,
        }
    }

    /// Fetch `url` (scheme optional) and describe what was found.
    pub async fn analyze(&self, url: &str) -> WebsiteData {
        let url = normalize_url(url);
        match self.fetcher.fetch(&url).await {
            Ok(page) => {
                let content = page.content.unwrap_or_else(|| NO_CONTENT.to_string());
                WebsiteData::Success {
                    domain: domain_of(&url),
                    title: page.title.unwrap_or_else(|| NO_TITLE.to_string()),
                    description: page.description.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                    content_preview: preview(&content),
                    url,
                }
            }
            Err(e) => {
                tracing::warn!(url = %url, "Website fetch failed: {}", e);
                WebsiteData::Error {
                    error: fetch_error_message(&e),
                    url,
                }
            }
        }
    }

    /// Report text for API clients. Failures come back as Arabic apologies.
    pub async fn summarize(&self, data: &WebsiteData, profile: Option<&Profile>) -> String {
        match self.summarize_outcome(data, profile).await {
            WebsiteAnalysis::Report(text) | WebsiteAnalysis::Failed(text) => text,
        }
    }

    /// Report as a typed result, for storing on a profile.
    pub async fn summarize_outcome(
        &self,
        data: &WebsiteData,
        profile: Option<&Profile>,
    ) -> WebsiteAnalysis {
        match data {
            WebsiteData::Error { url, error } => {
                WebsiteAnalysis::Failed(prompts::analysis_unavailable(url, error))
            }
            WebsiteData::Success {
                domain,
                title,
                description,
                content_preview,
                ..
            } => {
                let page = PageDigest {
                    domain,
                    title,
                    description,
                    content_preview,
                };
                match self.generate_report(page, profile).await {
                    Ok(report) => WebsiteAnalysis::Report(report),
                    Err(e) => {
                        tracing::warn!(url = data.url(), "Website report generation failed: {}", e);
                        WebsiteAnalysis::Failed(prompts::analysis_failed(&e))
                    }
                }
            }
        }
    }

    async fn generate_report(
        &self,
        page: PageDigest<'_>,
        profile: Option<&Profile>,
    ) -> Result<String, LlmError> {
        let request = CompletionRequest::new(prompts::analysis_messages(page, profile))
            .with_temperature(self.temperature);
        let response = self.llm.complete(request).await?;
        if response.finish_reason.is_cut_short() {
            tracing::warn!(finish_reason = ?response.finish_reason, "Website report was cut short");
        }
        Ok(response.content.trim().to_string())
    }
}
