//! Generic web page retriever with metadata extraction

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use super::{DocumentRetriever, FetchedPage, RetrieverError, html_to_text};

const USER_AGENT: &str = concat!("askflow/", env!("CARGO_PKG_VERSION"));

/// Generic retriever for web pages
pub struct GenericWebRetriever {
    client: Client,
}

impl GenericWebRetriever {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .user_agent(USER_AGENT)
                .timeout(fetch_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Extract title from <title> or <meta property="og:title">
    fn extract_title(document: &Html) -> Option<String> {
        if let Ok(selector) = Selector::parse("title") {
            if let Some(el) = document.select(&selector).next() {
                let title = el.text().collect::<String>().trim().to_string();
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }

        Self::extract_meta(document, "property", "og:title")
    }

    /// Extract description from <meta name="description"> or <meta property="og:description">
    fn extract_description(document: &Html) -> Option<String> {
        Self::extract_meta(document, "name", "description")
            .or_else(|| Self::extract_meta(document, "property", "og:description"))
    }

    fn extract_meta(document: &Html, attr: &str, value: &str) -> Option<String> {
        let selector = Selector::parse(&format!("meta[{}=\"{}\"]", attr, value)).ok()?;
        document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Build a page from a response body according to its declared content type
    fn parse_page(content_type: &str, body: &str) -> FetchedPage {
        if content_type.contains("text/markdown") || content_type.contains("text/plain") {
            return FetchedPage {
                title: None,
                description: None,
                text: super::normalize_whitespace(body),
            };
        }

        let document = Html::parse_document(body);
        FetchedPage {
            title: Self::extract_title(&document),
            description: Self::extract_description(&document),
            text: html_to_text(body),
        }
    }
}

#[async_trait]
impl DocumentRetriever for GenericWebRetriever {
    fn can_handle(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
    }

    async fn retrieve(&self, url: &Url) -> Result<FetchedPage, RetrieverError> {
        tracing::debug!(url = %url, "Fetching web page");

        let response = self.client.get(url.as_str()).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RetrieverError::NotFound(url.to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(url = %url, "Web request rate limited");
            return Err(RetrieverError::RateLimited);
        }

        if !response.status().is_success() {
            return Err(RetrieverError::ParseError(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "text/html".to_string());

        if content_type.contains("application/pdf") || content_type.starts_with("image/") {
            return Err(RetrieverError::ParseError(format!(
                "Unsupported content type {}: {}",
                content_type, url
            )));
        }

        let body = response.text().await?;
        Ok(Self::parse_page(&content_type, &body))
    }
}
