//! Page retrievers for fetching search result content

mod generic;

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::model::DomainFilter;

pub use generic::GenericWebRetriever;

/// Elements whose text never belongs to page content
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "aside", "form", "iframe", "svg",
];

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("URL blocked by configuration: {0}")]
    Blocked(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Readable text of a fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub title: Option<String>,
    pub description: Option<String>,
    pub text: String,
}

/// Trait for page retrievers
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Check if this retriever can handle the given URL
    fn can_handle(&self, url: &Url) -> bool;

    /// Retrieve the page at the URL
    async fn retrieve(&self, url: &Url) -> Result<FetchedPage, RetrieverError>;
}

/// Convert HTML to readable markdown-ish text, dropping page chrome
fn html_to_text(html: &str) -> String {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(SKIPPED_TAGS.to_vec())
        .build();
    let markdown = converter.convert(html).unwrap_or_else(|_| html.to_string());
    normalize_whitespace(&markdown)
}

/// Trim lines and collapse runs of blank lines into single paragraph breaks
fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = false;
    for line in text.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            blank_run = !out.is_empty();
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        blank_run = false;
    }
    out
}

/// Retriever dispatcher that applies the domain filter before fetching
pub struct RetrieverDispatcher {
    filter: DomainFilter,
    generic: GenericWebRetriever,
}

impl RetrieverDispatcher {
    pub fn new(filter: DomainFilter, fetch_timeout: Duration) -> Self {
        if !filter.allow.is_empty() {
            tracing::info!(allow = ?filter.allow, "Search domain whitelist configured");
        }
        if !filter.deny.is_empty() {
            tracing::info!(deny = ?filter.deny, "Search domain blacklist configured");
        }

        Self {
            filter,
            generic: GenericWebRetriever::new(fetch_timeout),
        }
    }

    pub fn is_url_allowed(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && self.filter.is_url_allowed(url)
    }

    /// Retrieve a page, using the appropriate retriever
    pub async fn retrieve(&self, url: &Url) -> Result<FetchedPage, RetrieverError> {
        if !self.is_url_allowed(url) {
            tracing::debug!(url = %url, "URL blocked by configuration");
            return Err(RetrieverError::Blocked(url.to_string()));
        }

        if self.generic.can_handle(url) {
            return self.generic.retrieve(url).await;
        }

        Err(RetrieverError::Blocked(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_to_text_skips_page_chrome() {
        let html = r#"<html>
            <head><style>body { color: red }</style><script>var x = 1;</script></head>
            <body><nav>Home | About</nav><h1>GGML</h1><p>GGML is a   tensor library.</p>
            <footer>Copyright</footer></body></html>"#;

        let text = html_to_text(html);

        assert!(text.contains("GGML is a tensor library."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("Home | About"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn test_normalize_whitespace_keeps_paragraphs() {
        let text = normalize_whitespace("  first   line \nsecond\n\n\n\n  third  ");
        assert_eq!(text, "first line\nsecond\n\nthird");
    }

    #[test]
    fn test_dispatcher_rejects_non_http_and_denied() {
        let dispatcher = RetrieverDispatcher::new(
            DomainFilter {
                allow: vec![],
                deny: vec!["pinterest.com".to_string()],
            },
            Duration::from_secs(5),
        );

        let allowed = |url: &str| dispatcher.is_url_allowed(&Url::parse(url).unwrap());

        assert!(!allowed("ftp://example.com/file"));
        assert!(!allowed("https://www.pinterest.com/pin/1"));
        assert!(allowed("https://ggml.ai/"));
    }
}
