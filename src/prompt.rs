//! System prompts and template builders for the research agents.
//!
//! Prompts are compiled-in defaults, overridable from markdown files in
//! a prompt directory. Template builders format user messages with the
//! brief, sub-questions, and collected evidence.

use std::fmt::Write;
use std::path::Path;

use crate::search::SearchBatchOutput;
use crate::state::{Brief, Source, WorkerFindings};

/// System prompt for the clarify phase.
pub const CLARIFY_SYSTEM_PROMPT: &str = r#"You decide whether a research request is specific enough to act on.

Read the user's messages. If the request is answerable as stated, no clarification is needed. Ask for clarification only when the request is genuinely ambiguous: the topic is unclear, the scope could differ by an order of magnitude, or a key constraint (time range, region, audience) is missing and guessing would likely waste the research.

Respond with a JSON object:
{
  "need_clarification": <boolean>,
  "question": "<the single clarification question to ask, empty when not needed>"
}

Ask at most one question, and only when research cannot sensibly proceed without the answer."#;

/// System prompt for producing the research brief.
pub const BRIEF_SYSTEM_PROMPT: &str = r#"You turn a user's research request into a precise research brief.

Restate the question so it is self-contained: resolve pronouns, make implicit scope explicit, and keep every detail the user gave. Derive success criteria (what a complete answer must cover) and constraints (what the research must respect, e.g. time ranges, regions, source preferences). Do not invent constraints the user did not imply.

Respond with a JSON object:
{
  "question": "<the self-contained research question>",
  "success_criteria": ["<criterion>", ...],
  "constraints": ["<constraint>", ...],
  "language": "<BCP 47 tag of the language the user wrote in, e.g. \"en\">"
}"#;

/// System prompt for the supervisor (lead researcher) loop.
pub const SUPERVISOR_SYSTEM_PROMPT: &str = r"You are the lead researcher coordinating a team of researchers on the brief below.

Each turn, decide what to investigate next:
- Use reflect to record your assessment of what is known and what is missing.
- Use delegate_research to hand a focused, self-contained sub-question to a researcher. Emit several delegate_research calls in one turn when independent angles can be investigated in parallel. Sub-questions must be answerable without seeing each other's results.
- Use research_complete once the collected findings cover the success criteria.

Guidance:
- Prefer two or three sharp sub-questions over one broad one, but do not shard a simple question: a question one researcher can answer should get one delegation.
- Read the findings you receive before delegating more. Delegate follow-ups only for genuine gaps.
- Researchers cannot see this transcript. Every sub-question must carry its own context.
- Stop when the brief is answerable. More research than needed wastes the budget.";

/// System prompt for worker researchers.
pub const WORKER_SYSTEM_PROMPT: &str = r"You are a researcher investigating one focused sub-question.

Use the search tool to gather evidence: issue a few specific queries, read the summarized results, then reflect on what you found and what is still missing. Search again with sharper queries if a gap remains. Conclude when the evidence answers the sub-question.

Rules:
- Ground every statement in the search results you received. Never invent facts or sources.
- Prefer authoritative sources when results conflict, and note the conflict.
- Be economical: each search should have a purpose you can state. When the evidence suffices, stop and give your answer as concise, cited notes.";

/// System prompt for the per-worker compression step.
pub const COMPRESS_SYSTEM_PROMPT: &str = r#"You distill a researcher's working notes into cited claims.

You receive the sub-question, the researcher's notes, and the numbered sources consulted. Extract every claim the notes support and attach the indices of the sources backing it. Keep claims atomic: one assertion per claim. Preserve concrete detail (figures, dates, names, definitions) — the report writer sees only your claims, not the notes.

Respond with a JSON object:
{
  "claims": [
    {"text": "<one atomic, self-contained claim>", "source_indices": [<1-based source numbers>]}
  ],
  "sources": [
    {"url": "<url>", "title": "<title>"}
  ]
}

Every claim must cite at least one source index. List only sources that at least one claim cites, in the numbering you were given. Do not add claims the notes do not support."#;

/// System prompt for per-result webpage summarization.
pub const SUMMARIZE_SYSTEM_PROMPT: &str = r#"You summarize a web page for a researcher deciding whether and how to cite it.

Write a dense factual summary of what the page actually says: key facts, figures, definitions, and conclusions, without commentary. Then pick up to five short verbatim excerpts that best support the summary.

Respond with a JSON object:
{
  "summary": "<dense summary, at most 800 characters>",
  "key_excerpts": ["<verbatim excerpt>", ...]
}"#;

/// System prompt for the final report synthesizer.
pub const REPORT_SYSTEM_PROMPT: &str = r"You write the final research report from the brief and the researchers' cited findings.

Structure:
- Start with a short abstract (3-5 sentences) answering the research question directly.
- Organize the body into topical sections with markdown headings. Synthesize across findings: connect, compare, and resolve them rather than listing them.
- Support every factual statement with inline numeric citations like [3], using the numbered source list you were given. Cite only source numbers from that list.
- Note real disagreements between sources and genuine gaps in the evidence.

Do not append a source list; it is added mechanically from your citations. Do not cite sources the findings do not reference, and do not introduce facts beyond the findings.";

/// Default prompt directory under the user's config directory.
const DEFAULT_PROMPT_DIR: &str = ".config/delver/prompts";

const CLARIFY_FILENAME: &str = "clarify.md";
const BRIEF_FILENAME: &str = "brief.md";
const SUPERVISOR_FILENAME: &str = "supervisor.md";
const WORKER_FILENAME: &str = "worker.md";
const COMPRESS_FILENAME: &str = "compress.md";
const SUMMARIZE_FILENAME: &str = "summarize.md";
const REPORT_FILENAME: &str = "report.md";

/// A set of system prompts for all agents.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. Use [`PromptSet::load`] to resolve the prompt
/// directory from explicit configuration, environment, or the default
/// path.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// Clarify-phase system prompt.
    pub clarify: String,
    /// Brief-phase system prompt.
    pub brief: String,
    /// Supervisor loop system prompt.
    pub supervisor: String,
    /// Worker researcher system prompt.
    pub worker: String,
    /// Compression system prompt.
    pub compress: String,
    /// Webpage summarization system prompt.
    pub summarize: String,
    /// Report synthesis system prompt.
    pub report: String,
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to
    /// compiled-in defaults.
    ///
    /// Resolution order for the directory:
    /// 1. Explicit `prompt_dir` argument
    /// 2. `DELVER_PROMPT_DIR` environment variable
    /// 3. `~/.config/delver/prompts/`
    ///
    /// Each file is loaded independently — a missing file uses its
    /// default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(std::path::PathBuf::from)
            .or_else(|| {
                std::env::var("DELVER_PROMPT_DIR")
                    .ok()
                    .map(std::path::PathBuf::from)
            })
            .or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR)));

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            clarify: load_file(CLARIFY_FILENAME, CLARIFY_SYSTEM_PROMPT),
            brief: load_file(BRIEF_FILENAME, BRIEF_SYSTEM_PROMPT),
            supervisor: load_file(SUPERVISOR_FILENAME, SUPERVISOR_SYSTEM_PROMPT),
            worker: load_file(WORKER_FILENAME, WORKER_SYSTEM_PROMPT),
            compress: load_file(COMPRESS_FILENAME, COMPRESS_SYSTEM_PROMPT),
            summarize: load_file(SUMMARIZE_FILENAME, SUMMARIZE_SYSTEM_PROMPT),
            report: load_file(REPORT_FILENAME, REPORT_SYSTEM_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            clarify: CLARIFY_SYSTEM_PROMPT.to_string(),
            brief: BRIEF_SYSTEM_PROMPT.to_string(),
            supervisor: SUPERVISOR_SYSTEM_PROMPT.to_string(),
            worker: WORKER_SYSTEM_PROMPT.to_string(),
            compress: COMPRESS_SYSTEM_PROMPT.to_string(),
            summarize: SUMMARIZE_SYSTEM_PROMPT.to_string(),
            report: REPORT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Writes the compiled-in default prompts to the given directory.
    ///
    /// Creates the directory if it does not exist. Existing files are
    /// **not** overwritten — use this for initial scaffolding only.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directory creation or file writing fails.
    pub fn write_defaults(dir: &Path) -> std::io::Result<Vec<std::path::PathBuf>> {
        std::fs::create_dir_all(dir)?;

        let templates = [
            (CLARIFY_FILENAME, CLARIFY_SYSTEM_PROMPT),
            (BRIEF_FILENAME, BRIEF_SYSTEM_PROMPT),
            (SUPERVISOR_FILENAME, SUPERVISOR_SYSTEM_PROMPT),
            (WORKER_FILENAME, WORKER_SYSTEM_PROMPT),
            (COMPRESS_FILENAME, COMPRESS_SYSTEM_PROMPT),
            (SUMMARIZE_FILENAME, SUMMARIZE_SYSTEM_PROMPT),
            (REPORT_FILENAME, REPORT_SYSTEM_PROMPT),
        ];

        let mut written = Vec::new();
        for (filename, content) in &templates {
            let path = dir.join(filename);
            if !path.exists() {
                std::fs::write(&path, content)?;
                written.push(path);
            }
        }

        Ok(written)
    }
}

/// Appends the response-language instruction when one is configured.
#[must_use]
pub fn with_language(prompt: &str, response_language: Option<&str>) -> String {
    match response_language {
        Some(language) => format!("{prompt}\n\nAlways respond in {language}."),
        None => prompt.to_string(),
    }
}

/// Builds the worker system prompt: role instructions plus brief context
/// and the assigned sub-question.
#[must_use]
pub fn build_worker_system_prompt(template: &str, brief: &Brief, sub_question: &str) -> String {
    format!(
        "{template}\n\n## Research context\n\n{}\n## Your sub-question\n\n{sub_question}",
        brief.render()
    )
}

/// Builds the supervisor's opening user message from the brief.
#[must_use]
pub fn build_supervisor_user_msg(brief: &Brief) -> String {
    format!(
        "{}\nCoordinate the research for this brief. Delegate sub-questions, \
         reflect on findings as they arrive, and finish with research_complete.",
        brief.render()
    )
}

/// Builds the per-result summarization user message.
#[must_use]
pub fn build_summarize_prompt(template: &str, raw_content: &str) -> String {
    format!("{template}\n\n<content>\n{raw_content}\n</content>")
}

/// Builds the compression user message from a worker's notes and
/// collected sources.
#[must_use]
pub fn build_compress_prompt(sub_question: &str, notes: &[String], sources: &[Source]) -> String {
    let mut out = format!("Sub-question: {sub_question}\n\n## Researcher notes\n\n");
    for note in notes {
        let _ = writeln!(out, "{note}\n");
    }
    out.push_str("## Numbered sources\n\n");
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(out, "{}. {} — {}", i + 1, source.title, source.url);
    }
    out
}

/// Builds the report synthesis user message: brief, findings in
/// collection order, and the numbered union source list.
#[must_use]
pub fn build_report_prompt(
    brief: &Brief,
    findings: &[WorkerFindings],
    sources: &[Source],
) -> String {
    let mut out = format!("{}\n## Findings\n\n", brief.render());
    if findings.is_empty() {
        out.push_str(
            "No researcher findings were collected. Write the best report the brief \
             alone allows, stating clearly that no sources were gathered, and cite nothing.\n",
        );
    }
    for finding in findings {
        let _ = writeln!(out, "### {}\n\n{}", finding.task_id, finding.compressed_text);
    }
    out.push_str("## Numbered sources (cite by these numbers)\n\n");
    for (i, source) in sources.iter().enumerate() {
        let _ = writeln!(out, "{}. {} — {}", i + 1, source.title, source.url);
    }
    out
}

/// Renders a search observation, folding per-query errors into the
/// payload the model sees.
#[must_use]
pub fn render_search_observation(output: &SearchBatchOutput) -> String {
    let mut payload = crate::search::render_results(output);
    if !output.errors.is_empty() {
        payload.push_str("\nQuery errors:\n");
        for error in &output.errors {
            let _ = writeln!(payload, "- {error}");
        }
    }
    payload
}
