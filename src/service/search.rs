//! DuckDuckGo web search with page fetching

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use scraper::{Html, Selector};
use url::Url;

use crate::model::search::ellipsize;
use crate::model::{Document, DocumentMetadata, SearchConfig};
use crate::retriever::{FetchedPage, RetrieverDispatcher};
use crate::service::pipeline::{SearchError, SearchProvider};

const SOURCE_NAME: &str = "duckduckgo";
/// Pages with no more text than this are not worth passing on
const MIN_CONTENT_CHARS: usize = 200;
const MAX_CONTENT_CHARS: usize = 5000;
const EXCERPT_CHARS: usize = 200;

/// A result link as listed on the search results page
#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    url: Url,
    title: String,
    snippet: Option<String>,
}

/// Web search over the DuckDuckGo HTML endpoint
pub struct DuckDuckGoSearch {
    client: Client,
    base_url: String,
    dispatcher: Arc<RetrieverDispatcher>,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("askflow/", env!("CARGO_PKG_VERSION")))
                .timeout(config.fetch_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone(),
            dispatcher: Arc::new(RetrieverDispatcher::new(
                config.domains.clone(),
                config.fetch_timeout,
            )),
        }
    }

    /// Parse result links from a results page, in page order
    fn parse_results(html: &str) -> Vec<SearchHit> {
        let document = Html::parse_document(html);
        let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
            Selector::parse(".result"),
            Selector::parse("a.result__a"),
            Selector::parse(".result__snippet"),
        ) else {
            return Vec::new();
        };

        document
            .select(&result_sel)
            .filter_map(|result| {
                let link = result.select(&link_sel).next()?;
                let url = link.value().attr("href").and_then(resolve_result_link)?;
                let title = collapse(&link.text().collect::<String>());
                let snippet = result
                    .select(&snippet_sel)
                    .next()
                    .map(|s| collapse(&s.text().collect::<String>()))
                    .filter(|s| !s.is_empty());
                Some(SearchHit {
                    url,
                    title,
                    snippet,
                })
            })
            .collect()
    }

    fn to_document(
        query: &str,
        rank: usize,
        hit: SearchHit,
        page: FetchedPage,
    ) -> Option<Document> {
        let text = page.text.trim();
        if text.chars().count() <= MIN_CONTENT_CHARS {
            tracing::debug!(url = %hit.url, "Skipping page with too little content");
            return None;
        }

        let title = if hit.title.is_empty() {
            page.title.unwrap_or_else(|| hit.url.to_string())
        } else {
            hit.title
        };
        let excerpt = hit
            .snippet
            .or(page.description)
            .unwrap_or_else(|| ellipsize(text, EXCERPT_CHARS));

        Some(Document {
            url: hit.url,
            title,
            content: ellipsize(text, MAX_CONTENT_CHARS),
            excerpt,
            fetched_at: Utc::now(),
            metadata: DocumentMetadata {
                source: SOURCE_NAME.to_string(),
                query: query.to_string(),
                rank,
            },
        })
    }
}

/// Result links go through a `/l/?uddg=` redirect; unwrap it to the target
fn resolve_result_link(href: &str) -> Option<Url> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let url = Url::parse(&absolute).ok()?;

    let is_redirect = url
        .host_str()
        .is_some_and(|h| h.ends_with("duckduckgo.com"))
        && url.path().starts_with("/l/");
    let target = if is_redirect {
        let (_, target) = url.query_pairs().find(|(k, _)| k == "uddg")?;
        Url::parse(&target).ok()?
    } else {
        url
    };

    matches!(target.scheme(), "http" | "https").then_some(target)
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>, SearchError> {
        let start = std::time::Instant::now();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", query)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::backend(
                format!("HTTP {}", status),
                Some(serde_json::json!({ "status": status.as_u16() })),
            ));
        }

        let body = response.text().await?;
        let hits: Vec<SearchHit> = Self::parse_results(&body)
            .into_iter()
            .filter(|hit| self.dispatcher.is_url_allowed(&hit.url))
            .take(max_results)
            .collect();

        tracing::debug!(query = %query, hits = hits.len(), "Search results parsed");

        let fetches = hits.into_iter().enumerate().map(|(rank, hit)| async move {
            match self.dispatcher.retrieve(&hit.url).await {
                Ok(page) => Self::to_document(query, rank, hit, page),
                Err(e) => {
                    tracing::debug!(url = %hit.url, error = %e, "Failed to fetch search result");
                    None
                }
            }
        });
        let documents: Vec<Document> = join_all(fetches).await.into_iter().flatten().collect();

        tracing::info!(
            query = %query,
            documents = documents.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Web search completed"
        );

        Ok(documents)
    }

    async fn health_check(&self) -> bool {
        Url::parse(&self.base_url).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"<html><body>
        <div class="result results_links web-result">
            <h2 class="result__title">
                <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fggml.ai%2F&amp;rut=abc">GGML  -  AI at the edge</a>
            </h2>
            <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fggml.ai%2F">ggml is a tensor library</a>
        </div>
        <div class="result results_links web-result">
            <h2 class="result__title">
                <a class="result__a" href="https://github.com/ggerganov/ggml">ggerganov/ggml</a>
            </h2>
        </div>
        <div class="result results_links web-result">
            <h2 class="result__title">
                <a class="result__a" href="javascript:void(0)">Ad</a>
            </h2>
        </div>
    </body></html>"#;

    fn page(text: &str) -> FetchedPage {
        FetchedPage {
            title: Some("Page title".to_string()),
            description: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_parse_results_decodes_redirects() {
        let hits = DuckDuckGoSearch::parse_results(RESULTS_PAGE);

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url.as_str(), "https://ggml.ai/");
        assert_eq!(hits[0].title, "GGML - AI at the edge");
        assert_eq!(hits[0].snippet.as_deref(), Some("ggml is a tensor library"));
        assert_eq!(hits[1].url.as_str(), "https://github.com/ggerganov/ggml");
        assert!(hits[1].snippet.is_none());
    }

    #[test]
    fn test_short_pages_are_skipped() {
        let hit = SearchHit {
            url: Url::parse("https://ggml.ai/").unwrap(),
            title: "GGML".to_string(),
            snippet: None,
        };
        let skipped = DuckDuckGoSearch::to_document("ggml", 0, hit, page("too short"));
        assert!(skipped.is_none());
    }

    #[test]
    fn test_document_content_is_truncated() {
        let hit = SearchHit {
            url: Url::parse("https://ggml.ai/").unwrap(),
            title: String::new(),
            snippet: None,
        };
        let text = "x".repeat(6000);

        let doc = DuckDuckGoSearch::to_document("ggml", 2, hit, page(&text)).unwrap();

        assert_eq!(doc.title, "Page title");
        assert_eq!(doc.content.chars().count(), MAX_CONTENT_CHARS + 3);
        assert!(doc.content.ends_with("..."));
        assert_eq!(doc.excerpt.chars().count(), EXCERPT_CHARS + 3);
        assert_eq!(doc.metadata.source, "duckduckgo");
        assert_eq!(doc.metadata.query, "ggml");
        assert_eq!(doc.metadata.rank, 2);
    }

    #[tokio::test]
    #[ignore = "requires network access"]
    async fn test_live_search() {
        let search = DuckDuckGoSearch::new(&SearchConfig {
            base_url: "https://html.duckduckgo.com/html/".to_string(),
            fetch_timeout: std::time::Duration::from_secs(10),
            domains: Default::default(),
        });
        let docs = search.search("rust programming language", 3).await.unwrap();
        assert!(docs.len() <= 3);
    }
}
