//! Data types flowing through a research session.
//!
//! The brief is written once and read by everyone. Each worker task is
//! one-shot and produces exactly one immutable [`WorkerFindings`]. The
//! supervisor owns its own state; workers communicate back only by
//! returning their findings value.

use serde::{Deserialize, Serialize};

use crate::message::TokenUsage;

/// The immutable structured statement of the research question,
/// produced once per session from the user's messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brief {
    /// The research question, restated self-contained.
    pub question: String,
    /// What a complete answer must cover.
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Constraints the research must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Language tag for the report.
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl Brief {
    /// Renders the brief for inclusion in prompts and transcripts.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("Research question: {}\n", self.question);
        if !self.success_criteria.is_empty() {
            out.push_str("Success criteria:\n");
            for criterion in &self.success_criteria {
                out.push_str(&format!("- {criterion}\n"));
            }
        }
        if !self.constraints.is_empty() {
            out.push_str("Constraints:\n");
            for constraint in &self.constraints {
                out.push_str(&format!("- {constraint}\n"));
            }
        }
        out
    }
}

/// Outcome of the clarify phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarifyDecision {
    /// Whether the user's question needs clarification before research.
    pub need_clarification: bool,
    /// The clarification question to ask, when needed.
    #[serde(default)]
    pub question: String,
}

/// A cited source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Source URL.
    pub url: String,
    /// Source title.
    pub title: String,
}

/// A one-shot unit of research work created by the supervisor.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    /// Stable task identifier, sequential in submission order.
    pub id: String,
    /// The sub-question this worker investigates.
    pub sub_question: String,
    /// Iteration cap for the worker loop.
    pub max_iterations: usize,
    /// Cumulative tool-call cap for the worker loop.
    pub max_tool_calls: usize,
}

/// Terminal status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingStatus {
    /// The worker judged the sub-question answered.
    Complete,
    /// An iteration or tool-call cap was hit first.
    Exhausted,
    /// A non-retryable error or cancellation ended the worker.
    Failed,
}

/// A worker's terminal output: compressed cited claims plus the sources
/// they reference. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFindings {
    /// The task that produced these findings.
    pub task_id: String,
    /// Bulleted claims, each annotated with 1-based source indices.
    pub compressed_text: String,
    /// The worker's raw observation notes (transient; not persisted).
    pub raw_notes: Vec<String>,
    /// Sources referenced by the claims, in index order.
    pub sources: Vec<Source>,
    /// Terminal status.
    pub status: FindingStatus,
    /// Error description for `Failed` findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Token usage accumulated by this worker.
    #[serde(default)]
    pub usage: TokenUsage,
}

impl WorkerFindings {
    /// A failed finding carrying whatever notes were collected.
    #[must_use]
    pub fn failed(task_id: &str, error: impl Into<String>, raw_notes: Vec<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            compressed_text: String::new(),
            raw_notes,
            sources: Vec::new(),
            status: FindingStatus::Failed,
            error: Some(error.into()),
            usage: TokenUsage::default(),
        }
    }
}

/// One compressed claim with its supporting source indices (1-based).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    /// The claim text.
    pub text: String,
    /// 1-based indices into the findings' source list.
    #[serde(default)]
    pub source_indices: Vec<usize>,
}

/// The schema-constrained output of the per-worker compression step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedClaims {
    /// Cited claims.
    #[serde(default)]
    pub claims: Vec<Claim>,
    /// Sources the claims index into.
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl CompressedClaims {
    /// Drops claims with no in-range source index, enforcing the
    /// every-claim-is-cited invariant.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let source_count = self.sources.len();
        for claim in &mut self.claims {
            claim
                .source_indices
                .retain(|&i| i >= 1 && i <= source_count);
        }
        self.claims.retain(|c| !c.source_indices.is_empty());
        self
    }

    /// Renders the claims as an annotated bullet list.
    #[must_use]
    pub fn render_bullets(&self) -> String {
        let mut out = String::new();
        for claim in &self.claims {
            out.push_str(&format!("- {}", claim.text));
            for index in &claim.source_indices {
                out.push_str(&format!(" [{index}]"));
            }
            out.push('\n');
        }
        out
    }
}

/// Why the supervisor loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The model emitted `research_complete`.
    DoneByModel,
    /// The iteration cap was hit.
    DoneByIterations,
    /// The tool-call budget was hit.
    DoneByToolBudget,
}

/// Metadata attached to the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    /// Why the supervisor loop stopped.
    pub terminated_by: Termination,
    /// Set when the loop stopped on iterations or budget rather than by
    /// the model's own judgement.
    pub truncated: bool,
    /// Total tokens consumed across the session.
    pub total_tokens: u32,
    /// Worker tasks dispatched across the session.
    pub tasks_dispatched: usize,
}

/// The final cited research report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    /// Markdown body with inline `[n]` citations and a Sources section.
    pub markdown: String,
    /// The cited sources, in citation-index order. Entry `n - 1`
    /// corresponds to inline citation `[n]`.
    pub sources: Vec<Source>,
    /// Session metadata.
    pub meta: ReportMeta,
}

/// What a research run returns to the caller.
#[derive(Debug, Clone)]
pub enum ResearchOutcome {
    /// Research ran to a terminal state and produced a report.
    Report(FinalReport),
    /// The clarify phase decided the question needs clarification;
    /// research halted until the user answers.
    Clarification(String),
}

/// The supervisor's private mutable state. Mutated only in the
/// supervisor's own flow.
#[derive(Debug)]
pub struct SupervisorState {
    /// The session brief.
    pub brief: Brief,
    /// Supervisor tool calls consumed so far.
    pub tool_calls_total: usize,
    /// Supervisor iterations completed.
    pub iterations: usize,
    /// Findings collected so far, in task-submission order.
    pub completed_findings: Vec<WorkerFindings>,
    /// Reflection notes recorded so far.
    pub notes: Vec<String>,
    /// Tasks created so far (drives stable task ids).
    pub tasks_created: usize,
    /// Token usage accumulated across the session.
    pub usage: TokenUsage,
}

impl SupervisorState {
    /// Fresh state for a new session.
    #[must_use]
    pub fn new(brief: Brief) -> Self {
        Self {
            brief,
            tool_calls_total: 0,
            iterations: 0,
            completed_findings: Vec::new(),
            notes: Vec::new(),
            tasks_created: 0,
            usage: TokenUsage::default(),
        }
    }

    /// Allocates the next stable task id.
    pub fn next_task_id(&mut self) -> String {
        self.tasks_created += 1;
        format!("task-{}", self.tasks_created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_deserialization_with_defaults() {
        let brief: Brief = serde_json::from_str(r#"{"question": "What is HNSW?"}"#)
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(brief.question, "What is HNSW?");
        assert!(brief.success_criteria.is_empty());
        assert_eq!(brief.language, "en");
    }

    #[test]
    fn test_brief_render() {
        let brief = Brief {
            question: "What is HNSW?".to_string(),
            success_criteria: vec!["explain layering".to_string()],
            constraints: vec!["peer-reviewed sources".to_string()],
            language: "en".to_string(),
        };
        let rendered = brief.render();
        assert!(rendered.contains("Research question: What is HNSW?"));
        assert!(rendered.contains("- explain layering"));
        assert!(rendered.contains("- peer-reviewed sources"));
    }

    #[test]
    fn test_sanitized_drops_uncited_claims() {
        let claims = CompressedClaims {
            claims: vec![
                Claim {
                    text: "cited".to_string(),
                    source_indices: vec![1],
                },
                Claim {
                    text: "uncited".to_string(),
                    source_indices: vec![],
                },
                Claim {
                    text: "out of range".to_string(),
                    source_indices: vec![5],
                },
            ],
            sources: vec![Source {
                url: "https://a".to_string(),
                title: "A".to_string(),
            }],
        };
        let sanitized = claims.sanitized();
        assert_eq!(sanitized.claims.len(), 1);
        assert_eq!(sanitized.claims[0].text, "cited");
    }

    #[test]
    fn test_render_bullets() {
        let claims = CompressedClaims {
            claims: vec![Claim {
                text: "HNSW layers skip lists".to_string(),
                source_indices: vec![1, 2],
            }],
            sources: vec![
                Source {
                    url: "https://a".to_string(),
                    title: "A".to_string(),
                },
                Source {
                    url: "https://b".to_string(),
                    title: "B".to_string(),
                },
            ],
        };
        assert_eq!(claims.render_bullets(), "- HNSW layers skip lists [1] [2]\n");
    }

    #[test]
    fn test_task_ids_are_sequential() {
        let brief: Brief =
            serde_json::from_str(r#"{"question": "q"}"#).unwrap_or_else(|_| unreachable!());
        let mut state = SupervisorState::new(brief);
        assert_eq!(state.next_task_id(), "task-1");
        assert_eq!(state.next_task_id(), "task-2");
    }

    #[test]
    fn test_clarify_decision_defaults() {
        let decision: ClarifyDecision = serde_json::from_str(r#"{"need_clarification": false}"#)
            .unwrap_or_else(|_| unreachable!());
        assert!(!decision.need_clarification);
        assert!(decision.question.is_empty());
    }

    #[test]
    fn test_finding_status_serialization() {
        let json = serde_json::to_string(&FindingStatus::Exhausted).unwrap_or_default();
        assert_eq!(json, "\"exhausted\"");
    }
}
