//! End-to-end orchestration scenarios driven through the public API with
//! scripted LLM and search stubs. No network, deterministic outputs.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use delver::{
    ChatRequest, ChatResponse, LlmProvider, ResearchConfig, ResearchError, ResearchOutcome, Role,
    SearchBatchOutput, SearchProvider, SearchQueryBatch, SearchResult, Supervisor, Termination,
    TokenUsage, ToolCall, user_message,
};

/// High-water-mark gauge for concurrent worker activity.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn high_water(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Scripted LLM backend. Phases are recognized from the system prompt;
/// supervisor turns pop from a per-run script, worker and compression
/// replies are derived from the request content so they stay correct
/// under any interleaving.
struct ScriptedBackend {
    /// Tool calls emitted per supervisor-loop turn; turns beyond the
    /// script emit `research_complete`.
    supervisor_turns: Vec<Vec<ToolCall>>,
    supervisor_counter: AtomicUsize,
    /// Raw text returned for the brief phase.
    brief_response: String,
    /// Drive workers through the ReAct protocol (with one malformed
    /// reply first) instead of native tool calls.
    react_worker: bool,
    /// Delay applied to worker-phase calls whose conversation mentions
    /// this marker.
    slow_marker: Option<String>,
    worker_delay: Duration,
    requests: Mutex<Vec<ChatRequest>>,
    gauge: Gauge,
}

impl ScriptedBackend {
    fn new(supervisor_turns: Vec<Vec<ToolCall>>) -> Self {
        Self {
            supervisor_turns,
            supervisor_counter: AtomicUsize::new(0),
            brief_response:
                r#"{"question": "What is HNSW?", "success_criteria": [], "constraints": [], "language": "en"}"#
                    .to_string(),
            react_worker: false,
            slow_marker: None,
            worker_delay: Duration::from_millis(80),
            requests: Mutex::new(Vec::new()),
            gauge: Gauge::default(),
        }
    }

    fn with_brief_response(mut self, response: &str) -> Self {
        self.brief_response = response.to_string();
        self
    }

    fn with_react_worker(mut self) -> Self {
        self.react_worker = true;
        self
    }

    fn with_slow_marker(mut self, marker: &str) -> Self {
        self.slow_marker = Some(marker.to_string());
        self
    }

    fn logged_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn worker_phase_requests(&self) -> usize {
        self.logged_requests()
            .iter()
            .filter(|r| system_of(r).contains("one focused sub-question"))
            .count()
    }

    fn supervisor_turn_response(&self) -> ChatResponse {
        let idx = self.supervisor_counter.fetch_add(1, Ordering::SeqCst);
        let calls = self
            .supervisor_turns
            .get(idx)
            .cloned()
            .unwrap_or_else(|| vec![tool_call("fallback-complete", "research_complete", "{}")]);
        ChatResponse {
            content: String::new(),
            usage: TokenUsage::default(),
            tool_calls: calls,
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    fn worker_response(&self, request: &ChatRequest) -> ChatResponse {
        let has_observation = request.messages.iter().any(|m| m.role == Role::Observation);
        if self.react_worker {
            if has_observation {
                return ChatResponse::text("Thought: done\nFinal Answer: the evidence suffices");
            }
            if full_text(request).contains("not parseable") {
                let sub_question = sub_question_of(request);
                return ChatResponse::text(format!(
                    "Thought: searching\nAction: search\nAction Input: {{\"queries\": [\"{sub_question}\"]}}"
                ));
            }
            return ChatResponse::text("I will just search for it right away!");
        }

        if has_observation {
            return ChatResponse::text("The evidence suffices.");
        }
        let sub_question = sub_question_of(request);
        ChatResponse {
            content: String::new(),
            usage: TokenUsage::default(),
            tool_calls: vec![tool_call(
                "worker-search",
                "search",
                &format!(r#"{{"queries": ["{sub_question}"]}}"#),
            )],
            finish_reason: Some("tool_calls".to_string()),
        }
    }

    fn compression_response(request: &ChatRequest) -> ChatResponse {
        // The compress prompt numbers the consulted sources; echo the
        // first one back as the single cited source.
        let content = full_text(request);
        let (title, url) = content
            .lines()
            .find_map(|line| {
                let rest = line.strip_prefix("1. ")?;
                let (title, url) = rest.split_once(" — ")?;
                Some((title.to_string(), url.to_string()))
            })
            .unwrap_or_else(|| ("Untitled".to_string(), "https://example.com".to_string()));
        ChatResponse::text(format!(
            r#"{{"claims": [{{"text": "Key fact from {title}", "source_indices": [1]}}],
                "sources": [{{"url": "{url}", "title": "{title}"}}]}}"#
        ))
    }

    fn report_response(request: &ChatRequest) -> ChatResponse {
        let content = full_text(request);
        let source_count = content
            .lines()
            .skip_while(|l| !l.contains("Numbered sources"))
            .filter(|l| l.split_once(". ").is_some_and(|(n, _)| n.parse::<usize>().is_ok()))
            .count();
        if source_count == 0 {
            return ChatResponse::text("No sources were gathered; answering from the brief alone.");
        }
        let citations: String = (1..=source_count).map(|i| format!(" [{i}]")).collect();
        ChatResponse::text(format!("Synthesis of the collected findings.{citations}"))
    }
}

#[async_trait]
impl LlmProvider for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ResearchError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }

        let system = system_of(request);
        if system.contains("precise research brief") {
            return Ok(ChatResponse::text(self.brief_response.clone()));
        }
        if system.contains("specific enough to act on") {
            return Ok(ChatResponse::text(
                r#"{"need_clarification": true, "question": "Which aspect of HNSW?"}"#,
            ));
        }
        if system.contains("lead researcher") {
            return Ok(self.supervisor_turn_response());
        }
        if system.contains("one focused sub-question") {
            self.gauge.enter();
            if let Some(ref marker) = self.slow_marker
                && full_text(request).contains(marker)
            {
                tokio::time::sleep(self.worker_delay).await;
            }
            let response = self.worker_response(request);
            self.gauge.exit();
            return Ok(response);
        }
        if system.contains("working notes") {
            return Ok(Self::compression_response(request));
        }
        if system.contains("final research report") {
            return Ok(Self::report_response(request));
        }
        panic!("unrecognized phase; system prompt: {system:.60}");
    }
}

/// Search stub: one deterministic result per query.
struct StubSearch;

#[async_trait]
impl SearchProvider for StubSearch {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn search(&self, batch: &SearchQueryBatch) -> Result<SearchBatchOutput, ResearchError> {
        let results = batch
            .queries
            .iter()
            .map(|query| SearchResult {
                url: format!("https://example.com/{}", slug(query)),
                title: format!("Result: {query}"),
                raw_content: format!("raw content about {query}"),
                summary: format!("{query} explained in depth"),
                key_excerpts: vec![format!("{query} excerpt")],
                fetched_at: DateTime::<Utc>::MIN_UTC,
            })
            .collect();
        Ok(SearchBatchOutput {
            results,
            errors: Vec::new(),
        })
    }
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn system_of(request: &ChatRequest) -> String {
    request
        .messages
        .first()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn full_text(request: &ChatRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn sub_question_of(request: &ChatRequest) -> String {
    system_of(request)
        .split("## Your sub-question")
        .nth(1)
        .and_then(|rest| rest.lines().find(|l| !l.trim().is_empty()).map(str::trim))
        .unwrap_or("unknown")
        .to_string()
}

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

fn delegate(id: &str, sub_question: &str) -> ToolCall {
    tool_call(
        id,
        "delegate_research",
        &format!(r#"{{"sub_question": "{sub_question}"}}"#),
    )
}

fn config() -> ResearchConfig {
    ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .summarization_model("gpt-4o")
        .final_report_model("gpt-4o")
        .build()
        .unwrap_or_else(|_| unreachable!())
}

fn question() -> Vec<delver::ChatMessage> {
    vec![user_message("What is HNSW?")]
}

async fn run_with(
    config: ResearchConfig,
    backend: Arc<ScriptedBackend>,
    cancel: &CancellationToken,
) -> Result<ResearchOutcome, ResearchError> {
    let supervisor = Supervisor::with_backends(config, backend, Arc::new(StubSearch));
    supervisor.run(&question(), cancel).await
}

// ---------------------------------------------------------------------------
// Scenario 1: single-query happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_query_happy_path() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        vec![delegate("call-1", "What is HNSW?")],
        vec![tool_call("call-2", "research_complete", "{}")],
    ]));

    let outcome = run_with(config(), Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Report(report) = outcome else {
        panic!("expected a report");
    };

    assert!(report.markdown.contains("[1]"));
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.meta.terminated_by, Termination::DoneByModel);
    assert!(!report.meta.truncated);
    assert_eq!(report.meta.tasks_dispatched, 1);
    // The sources section matches the inline citation.
    assert!(report.markdown.contains("## Sources"));
    assert!(report.markdown.contains(&report.sources[0].url));
}

// ---------------------------------------------------------------------------
// Scenario 2: parallel fan-out, bounded concurrency, submission order
// ---------------------------------------------------------------------------

async fn fan_out_run(max_concurrent_units: usize) -> (Arc<ScriptedBackend>, delver::FinalReport) {
    // The first-submitted task is the slow one, so completion order is
    // reversed relative to submission order.
    let backend = Arc::new(
        ScriptedBackend::new(vec![
            vec![
                delegate("call-a", "slow angle one"),
                delegate("call-b", "fast angle two"),
                delegate("call-c", "fast angle three"),
            ],
            vec![tool_call("call-d", "research_complete", "{}")],
        ])
        .with_slow_marker("slow angle"),
    );

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .final_report_model("gpt-4o")
        .max_concurrent_units(max_concurrent_units)
        .build()
        .unwrap_or_else(|_| unreachable!());

    let outcome = run_with(config, Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Report(report) = outcome else {
        panic!("expected a report");
    };
    (backend, report)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_fan_out_bounds_concurrency_and_preserves_order() {
    let (backend, report) = fan_out_run(2).await;

    assert!(
        backend.gauge.high_water() <= 2,
        "observed {} concurrent workers",
        backend.gauge.high_water()
    );
    assert_eq!(report.meta.tasks_dispatched, 3);
    assert_eq!(report.sources.len(), 3);

    // Findings observations reach the supervisor in submission order
    // even though the first task finished last.
    let supervisor_requests: Vec<ChatRequest> = backend
        .logged_requests()
        .into_iter()
        .filter(|r| system_of(r).contains("lead researcher"))
        .collect();
    let second_turn = supervisor_requests
        .get(1)
        .unwrap_or_else(|| panic!("no second supervisor turn"));
    let findings_order: Vec<String> = second_turn
        .messages
        .iter()
        .filter(|m| m.role == Role::Observation && m.content.contains("Findings from"))
        .filter_map(|m| {
            m.content
                .split_whitespace()
                .nth(2)
                .map(ToString::to_string)
        })
        .collect();
    assert_eq!(findings_order, vec!["task-1", "task-2", "task-3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn serialized_run_matches_parallel_run() {
    let (_, parallel) = fan_out_run(2).await;
    let (backend, serialized) = fan_out_run(1).await;

    assert!(backend.gauge.high_water() <= 1);
    assert_eq!(serialized.markdown, parallel.markdown);
    assert_eq!(serialized.sources, parallel.sources);
}

// ---------------------------------------------------------------------------
// Scenario 3: ReAct parse retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn react_parse_retry_recovers() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![
            vec![delegate("call-1", "What is HNSW?")],
            vec![tool_call("call-2", "research_complete", "{}")],
        ])
        .with_react_worker(),
    );

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("ollama:llama3")
        .final_report_model("gpt-4o")
        .build()
        .unwrap_or_else(|_| unreachable!());

    let outcome = run_with(config, Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Report(report) = outcome else {
        panic!("expected a report");
    };

    // The worker recovered: its search ran and produced a cited source.
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.meta.terminated_by, Termination::DoneByModel);

    // Exactly one worker request carried the parse nudge, and it
    // carried exactly one nudge message.
    let nudge_requests: Vec<ChatRequest> = backend
        .logged_requests()
        .into_iter()
        .filter(|r| system_of(r).contains("one focused sub-question"))
        .filter(|r| r.messages.iter().any(|m| m.content.contains("not parseable")))
        .collect();
    assert_eq!(nudge_requests.len(), 1);
    let nudges = nudge_requests[0]
        .messages
        .iter()
        .filter(|m| m.content.contains("not parseable"))
        .count();
    assert_eq!(nudges, 1);
}

// ---------------------------------------------------------------------------
// Scenario 4: structured retry then failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn structured_output_failure_spawns_no_workers() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![]).with_brief_response("still not json, sorry"),
    );

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .max_structured_retries(3)
        .build()
        .unwrap_or_else(|_| unreachable!());

    let result = run_with(config, Arc::clone(&backend), &CancellationToken::new()).await;
    assert!(matches!(result, Err(ResearchError::StructuredOutput { .. })));
    assert_eq!(backend.worker_phase_requests(), 0);

    // The brief was attempted exactly max_structured_retries times.
    let brief_attempts = backend
        .logged_requests()
        .iter()
        .filter(|r| system_of(r).contains("precise research brief"))
        .count();
    assert_eq!(brief_attempts, 3);
}

// ---------------------------------------------------------------------------
// Scenario 5: budget exhaustion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_budget_exhaustion_truncates_and_still_reports() {
    // The supervisor delegates on every turn, forever.
    let turns: Vec<Vec<ToolCall>> = (0..8)
        .map(|i| vec![delegate(&format!("call-{i}"), &format!("angle {i}"))])
        .collect();
    let backend = Arc::new(ScriptedBackend::new(turns));

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .max_total_tool_calls(2)
        .build()
        .unwrap_or_else(|_| unreachable!());

    let outcome = run_with(config, Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Report(report) = outcome else {
        panic!("expected a report");
    };

    assert_eq!(report.meta.tasks_dispatched, 2);
    assert_eq!(report.meta.terminated_by, Termination::DoneByToolBudget);
    assert!(report.meta.truncated);
    assert_eq!(report.sources.len(), 2);
}

// ---------------------------------------------------------------------------
// Scenario 6: cancellation during fan-out
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_during_fan_out_produces_no_report() {
    let backend = Arc::new(
        ScriptedBackend::new(vec![vec![
            delegate("call-a", "fast angle"),
            delegate("call-b", "slow angle one"),
            delegate("call-c", "slow angle two"),
        ]])
        .with_slow_marker("slow angle"),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = run_with(config(), Arc::clone(&backend), &cancel).await;
    assert!(matches!(result, Err(ResearchError::Cancelled)));
}

// ---------------------------------------------------------------------------
// Boundary behaviors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_iteration_without_delegation_reports_from_brief() {
    let backend = Arc::new(ScriptedBackend::new(vec![vec![tool_call(
        "call-1",
        "reflect",
        r#"{"reflection": "the brief alone suffices"}"#,
    )]]));

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .max_supervisor_iterations(1)
        .build()
        .unwrap_or_else(|_| unreachable!());

    let outcome = run_with(config, Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Report(report) = outcome else {
        panic!("expected a report");
    };

    assert_eq!(report.meta.terminated_by, Termination::DoneByIterations);
    assert!(report.meta.truncated);
    assert!(report.sources.is_empty());
    assert_eq!(report.meta.tasks_dispatched, 0);
}

#[tokio::test]
async fn single_iteration_with_delegation_still_reports() {
    let backend = Arc::new(ScriptedBackend::new(vec![vec![delegate(
        "call-1",
        "What is HNSW?",
    )]]));

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .max_supervisor_iterations(1)
        .build()
        .unwrap_or_else(|_| unreachable!());

    let outcome = run_with(config, Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Report(report) = outcome else {
        panic!("expected a report");
    };

    assert_eq!(report.meta.terminated_by, Termination::DoneByIterations);
    assert_eq!(report.sources.len(), 1);
}

#[tokio::test]
async fn clarification_halts_research() {
    let backend = Arc::new(ScriptedBackend::new(vec![]));

    let config = ResearchConfig::builder()
        .api_key("test")
        .supervisor_model("gpt-4o")
        .worker_model("gpt-4o")
        .allow_clarification(true)
        .build()
        .unwrap_or_else(|_| unreachable!());

    let outcome = run_with(config, Arc::clone(&backend), &CancellationToken::new())
        .await
        .unwrap_or_else(|e| panic!("run failed: {e}"));
    let ResearchOutcome::Clarification(question) = outcome else {
        panic!("expected a clarification");
    };
    assert!(question.contains("Which aspect"));
    assert_eq!(backend.worker_phase_requests(), 0);
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identical_runs_produce_identical_reports() {
    let run = || async {
        let backend = Arc::new(ScriptedBackend::new(vec![
            vec![
                delegate("call-1", "What is HNSW?"),
                delegate("call-2", "How do HNSW layers work?"),
            ],
            vec![tool_call("call-3", "research_complete", "{}")],
        ]));
        match run_with(config(), backend, &CancellationToken::new()).await {
            Ok(ResearchOutcome::Report(report)) => report,
            other => panic!("expected a report, got {other:?}"),
        }
    };

    let first = run().await;
    let second = run().await;
    assert_eq!(first.markdown, second.markdown);
    assert_eq!(first.sources, second.sources);
    assert_eq!(first.meta.tasks_dispatched, second.meta.tasks_dispatched);
}
