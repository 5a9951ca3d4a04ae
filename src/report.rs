//! Report synthesis: one model call over the brief and collected
//! findings, followed by mechanical citation validation.
//!
//! The synthesizer hands the model a numbered union source list and
//! requires inline `[n]` citations against it. Citations are then
//! validated: out-of-range numbers trigger one re-invocation with the
//! mismatch reported, any survivors are stripped, and the remaining
//! citations are renumbered compactly so that entry `n` of the final
//! Sources section always matches inline `[n]`. The sources on the
//! report are exactly the cited subset of the findings' sources.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ResearchError;
use crate::message::{assistant_message, system_message, user_message};
use crate::model::ModelAdapter;
use crate::prompt::{PromptSet, build_report_prompt, with_language};
use crate::state::{
    FinalReport, ReportMeta, Source, SupervisorState, Termination, WorkerFindings,
};

/// Writes the final cited report.
pub struct Synthesizer {
    adapter: Arc<ModelAdapter>,
    prompts: Arc<PromptSet>,
    response_language: Option<String>,
}

impl Synthesizer {
    /// Creates a synthesizer.
    #[must_use]
    pub fn new(
        adapter: Arc<ModelAdapter>,
        prompts: Arc<PromptSet>,
        response_language: Option<String>,
    ) -> Self {
        Self {
            adapter,
            prompts,
            response_language,
        }
    }

    /// Synthesizes the final report from the session state.
    ///
    /// With no citable findings the report is written from the brief
    /// alone, with an empty source list.
    ///
    /// # Errors
    ///
    /// Returns transport or structured-output errors from the underlying
    /// model calls.
    pub async fn synthesize(
        &self,
        state: &SupervisorState,
        termination: Termination,
    ) -> Result<FinalReport, ResearchError> {
        let citable: Vec<WorkerFindings> = state
            .completed_findings
            .iter()
            .filter(|f| !f.compressed_text.is_empty())
            .cloned()
            .collect();
        let union = union_sources(&citable);

        let language = self.response_language.as_deref();
        let mut messages = vec![
            system_message(&with_language(&self.prompts.report, language)),
            user_message(&build_report_prompt(&state.brief, &citable, &union)),
        ];

        let mut usage = state.usage;
        let response = self.adapter.complete(&messages).await?;
        usage.absorb(response.usage);
        let mut body = response.content;

        let invalid = invalid_citations(&body, union.len());
        if !invalid.is_empty() {
            warn!(?invalid, sources = union.len(), "report cites out-of-range sources, re-invoking");
            messages.push(assistant_message(&body));
            messages.push(user_message(&format!(
                "Your report cites source number(s) {invalid:?}, but the numbered source list \
                 only has entries 1 through {}. Rewrite the report citing only numbers from \
                 the list.",
                union.len()
            )));
            let retry = self.adapter.complete(&messages).await?;
            usage.absorb(retry.usage);
            body = retry.content;
        }

        // Mechanical cleanup keeps the citation invariants regardless of
        // what the retry produced: drop still-invalid tokens, then
        // renumber the survivors compactly.
        let (markdown, sources) = renumber_citations(&body, &union);
        let markdown = append_sources_section(markdown, &sources);
        debug!(cited = sources.len(), available = union.len(), "report synthesized");

        Ok(FinalReport {
            markdown,
            sources,
            meta: ReportMeta {
                terminated_by: termination,
                truncated: !matches!(termination, Termination::DoneByModel),
                total_tokens: usage.total_tokens,
                tasks_dispatched: state.tasks_created,
            },
        })
    }
}

/// The union of finding sources, deduplicated by URL in collection
/// order. This is the numbered list the synthesis prompt cites against.
#[must_use]
pub fn union_sources(findings: &[WorkerFindings]) -> Vec<Source> {
    let mut seen = std::collections::HashSet::new();
    let mut union = Vec::new();
    for finding in findings {
        for source in &finding.sources {
            if seen.insert(source.url.clone()) {
                union.push(source.clone());
            }
        }
    }
    union
}

/// Rewrites every `[n]` citation token via the mapping; `None` removes
/// the token. Non-citation brackets (markdown links, prose) pass
/// through untouched.
fn rewrite_citations(text: &str, mut map: impl FnMut(usize) -> Option<usize>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '[' {
            out.push(c);
            continue;
        }
        // Try to read "[digits]".
        let rest = &text[i + 1..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if !digits.is_empty() && rest[digits.len()..].starts_with(']') {
            for _ in 0..=digits.len() {
                chars.next();
            }
            if let Some(new_index) = digits.parse::<usize>().ok().and_then(&mut map) {
                out.push_str(&format!("[{new_index}]"));
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// All `[n]` citation numbers appearing in the text, in order, with
/// duplicates.
#[must_use]
pub fn citation_indices(text: &str) -> Vec<usize> {
    let mut indices = Vec::new();
    rewrite_citations(text, |n| {
        indices.push(n);
        Some(n)
    });
    indices
}

/// Citation numbers outside `1..=available`, deduplicated in order.
#[must_use]
pub fn invalid_citations(text: &str, available: usize) -> Vec<usize> {
    let mut invalid = Vec::new();
    for n in citation_indices(text) {
        if (n == 0 || n > available) && !invalid.contains(&n) {
            invalid.push(n);
        }
    }
    invalid
}

/// Drops out-of-range citations and renumbers the valid ones compactly
/// in first-appearance order. Returns the rewritten body and the cited
/// sources such that inline `[n]` matches entry `n - 1`.
fn renumber_citations(text: &str, union: &[Source]) -> (String, Vec<Source>) {
    let mut order: Vec<usize> = Vec::new();
    for n in citation_indices(text) {
        if n >= 1 && n <= union.len() && !order.contains(&n) {
            order.push(n);
        }
    }

    let body = rewrite_citations(text, |n| {
        order.iter().position(|&o| o == n).map(|pos| pos + 1)
    });
    let sources = order.iter().map(|&n| union[n - 1].clone()).collect();
    (body, sources)
}

/// Appends the Sources section matching the inline citation numbers.
fn append_sources_section(mut body: String, sources: &[Source]) -> String {
    if sources.is_empty() {
        return body;
    }
    if !body.ends_with('\n') {
        body.push('\n');
    }
    body.push_str("\n## Sources\n\n");
    for (i, source) in sources.iter().enumerate() {
        body.push_str(&format!("{}. {} — {}\n", i + 1, source.title, source.url));
    }
    body
}
