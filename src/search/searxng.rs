//! SearXNG metasearch backend.
//!
//! Queries a self-hosted SearXNG instance over its JSON API and turns
//! the raw hits into citable [`SearchResult`]s: dedup by URL, truncate,
//! then summarize each unique page through the model adapter. Per-query
//! failures and failed summarizations degrade instead of failing the
//! batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ResearchError;
use crate::message::user_message;
use crate::model::ModelAdapter;
use crate::prompt::build_summarize_prompt;
use crate::search::{SearchBatchOutput, SearchProvider, SearchQueryBatch, SearchResult};

/// Character budget for the summary field.
const SUMMARY_MAX_CHARS: u64 = 800;
/// Excerpt count budget.
const MAX_KEY_EXCERPTS: u64 = 5;

/// One raw hit from the engine, before summarization.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawHit {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub content: String,
}

fn default_title() -> String {
    "No title".to_string()
}

/// The subset of the SearXNG response the engine consumes.
#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<RawHit>,
}

/// Structured shape of a page summary.
#[derive(Debug, Clone, Deserialize)]
struct PageSummary {
    summary: String,
    #[serde(default)]
    key_excerpts: Vec<String>,
}

/// Schema for the per-result summarization call.
fn summary_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {
                "type": "string",
                "maxLength": SUMMARY_MAX_CHARS,
                "description": "Dense summary of the page content."
            },
            "key_excerpts": {
                "type": "array",
                "items": { "type": "string" },
                "maxItems": MAX_KEY_EXCERPTS,
                "description": "Verbatim excerpts supporting the summary."
            }
        },
        "required": ["summary"]
    })
}

/// SearXNG-backed search provider.
pub struct SearxngSearch {
    client: reqwest::Client,
    base_url: String,
    summarizer: Arc<ModelAdapter>,
    summarize_prompt: String,
    max_content_length: usize,
    concurrency: usize,
    max_transport_retries: u32,
}

impl SearxngSearch {
    /// Creates a provider against the given SearXNG base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError::Config`] if the HTTP client cannot be
    /// constructed.
    pub fn new(
        base_url: &str,
        timeout: Duration,
        summarizer: Arc<ModelAdapter>,
        summarize_prompt: String,
        max_content_length: usize,
        concurrency: usize,
        max_transport_retries: u32,
    ) -> Result<Self, ResearchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResearchError::Config {
                message: format!("failed to build search HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            summarizer,
            summarize_prompt,
            max_content_length,
            concurrency: concurrency.max(1),
            max_transport_retries,
        })
    }

    /// Fetches one query, retrying transport failures a bounded number
    /// of times.
    async fn fetch_query(&self, query: &str, limit: usize) -> Result<Vec<RawHit>, ResearchError> {
        let url = format!("{}/search", self.base_url);
        let mut attempt = 0u32;
        loop {
            let outcome = self
                .client
                .get(&url)
                .query(&[("q", query), ("format", "json"), ("pageno", "1")])
                .send()
                .await;

            let error = match outcome {
                Ok(response) if response.status().is_success() => {
                    let parsed: SearxngResponse =
                        response.json().await.map_err(|e| ResearchError::Transport {
                            message: format!("search response was not JSON: {e}"),
                            status: None,
                        })?;
                    let mut hits = parsed.results;
                    hits.truncate(limit);
                    return Ok(hits);
                }
                Ok(response) => ResearchError::Transport {
                    message: format!("search returned status {}", response.status()),
                    status: Some(response.status().as_u16()),
                },
                Err(e) => ResearchError::Transport {
                    message: format!("search request failed: {e}"),
                    status: e.status().map(|s| s.as_u16()),
                },
            };

            if attempt >= self.max_transport_retries {
                return Err(error);
            }
            debug!(attempt, query, %error, "search transport failure, retrying");
            tokio::time::sleep(Duration::from_millis(200 << attempt.min(4))).await;
            attempt += 1;
        }
    }

    /// Summarizes a page's raw content, degrading to the title on
    /// any failure.
    async fn summarize(&self, title: &str, raw_content: &str) -> (String, Vec<String>) {
        if raw_content.trim().is_empty() {
            return (title.to_string(), Vec::new());
        }

        let prompt = build_summarize_prompt(&self.summarize_prompt, raw_content);
        let outcome = self
            .summarizer
            .complete_structured_as::<PageSummary>(&[user_message(&prompt)], &summary_schema())
            .await;

        match outcome {
            Ok((page, _usage)) => (page.summary, page.key_excerpts),
            Err(error) => {
                warn!(%error, title, "summarization failed, falling back to title");
                (title.to_string(), Vec::new())
            }
        }
    }
}

#[async_trait::async_trait]
impl SearchProvider for SearxngSearch {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, batch: &SearchQueryBatch) -> Result<SearchBatchOutput, ResearchError> {
        // Queries run concurrently up to the provider bound; `buffered`
        // yields in input order, which keeps query order the primary key.
        let fetches = futures_util::stream::iter(batch.queries.iter().cloned())
            .map(|query| async move {
                let outcome = self.fetch_query(&query, batch.max_results_per_query).await;
                (query, outcome)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut errors = Vec::new();
        let mut per_query = Vec::with_capacity(fetches.len());
        for (query, outcome) in fetches {
            match outcome {
                Ok(hits) => per_query.push(hits),
                Err(error) => {
                    warn!(query, %error, "search query failed");
                    errors.push(format!("query '{query}': {error}"));
                    per_query.push(Vec::new());
                }
            }
        }

        let unique = dedup_hits(per_query);

        let results = futures_util::stream::iter(unique)
            .map(|hit| async move {
                let raw_content = truncate_to(
                    &format!("{}\n{}", hit.title, hit.content),
                    self.max_content_length,
                );
                let (summary, key_excerpts) = self.summarize(&hit.title, &raw_content).await;
                SearchResult {
                    url: hit.url,
                    title: hit.title,
                    raw_content,
                    summary,
                    key_excerpts,
                    fetched_at: Utc::now(),
                }
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(SearchBatchOutput { results, errors })
    }
}

/// Flattens per-query hits into one list, deduplicated by URL with the
/// first occurrence winning. Hits without a URL are dropped — they
/// cannot be cited.
pub(crate) fn dedup_hits(per_query: Vec<Vec<RawHit>>) -> Vec<RawHit> {
    let mut seen = std::collections::HashSet::new();
    let mut unique = Vec::new();
    for hits in per_query {
        for hit in hits {
            if hit.url.is_empty() {
                continue;
            }
            if seen.insert(hit.url.clone()) {
                unique.push(hit);
            }
        }
    }
    unique
}

/// Truncates a string to at most `max` bytes on a char boundary.
pub(crate) fn truncate_to(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
