//! Search abstraction and result types.
//!
//! A [`SearchProvider`] turns a [`SearchQueryBatch`] into a flat,
//! URL-deduplicated list of [`SearchResult`]s with model-written
//! summaries, suitable for citation. Per-query failures degrade into
//! batch metadata; they never abort sibling queries.

pub mod searxng;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ResearchError;

pub use searxng::SearxngSearch;

/// A batch of search queries issued by one `search` tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQueryBatch {
    /// Ordered, non-empty list of queries.
    pub queries: Vec<String>,
    /// Results kept per query.
    pub max_results_per_query: usize,
}

impl SearchQueryBatch {
    /// Creates a batch, clamping the per-query limit to at least 1.
    #[must_use]
    pub fn new(queries: Vec<String>, max_results_per_query: usize) -> Self {
        Self {
            queries,
            max_results_per_query: max_results_per_query.max(1),
        }
    }
}

/// One retrieved, summarized search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source URL (deduplication key).
    pub url: String,
    /// Page title.
    pub title: String,
    /// Raw content as returned by the engine, truncated before
    /// summarization.
    pub raw_content: String,
    /// Model-written summary of the raw content. Falls back to the title
    /// when summarization fails.
    pub summary: String,
    /// Up to five verbatim excerpts supporting the summary.
    pub key_excerpts: Vec<String>,
    /// When the result was fetched.
    pub fetched_at: DateTime<Utc>,
}

/// The outcome of one batch: results in query order plus per-query
/// error notes for queries that failed.
#[derive(Debug, Clone, Default)]
pub struct SearchBatchOutput {
    /// Deduplicated results, primary-ordered by input query.
    pub results: Vec<SearchResult>,
    /// Human-readable notes for queries that returned errors.
    pub errors: Vec<String>,
}

/// Trait for search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name (e.g., `"searxng"`).
    fn name(&self) -> &'static str;

    /// Executes a query batch.
    ///
    /// # Errors
    ///
    /// Returns [`ResearchError`] only on failures that invalidate the
    /// whole batch; individual query errors are reported in
    /// [`SearchBatchOutput::errors`].
    async fn search(&self, batch: &SearchQueryBatch) -> Result<SearchBatchOutput, ResearchError>;
}

/// Formats results as the observation payload fed back to the model.
#[must_use]
pub fn render_results(output: &SearchBatchOutput) -> String {
    if output.results.is_empty() {
        return "No valid search results found. Please try different search queries."
            .to_string();
    }

    let mut out = String::from("Search results:\n");
    for (i, result) in output.results.iter().enumerate() {
        out.push_str(&format!(
            "\n--- SOURCE {}: {} ---\nURL: {}\n\nSUMMARY:\n{}\n",
            i + 1,
            result.title,
            result.url,
            result.summary
        ));
        if !result.key_excerpts.is_empty() {
            out.push_str("\nKEY EXCERPTS:\n");
            for excerpt in &result.key_excerpts {
                out.push_str(&format!("- {excerpt}\n"));
            }
        }
    }
    out
}
