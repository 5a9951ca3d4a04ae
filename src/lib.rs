//! Multi-agent deep research engine.
//!
//! Given a natural-language question, a supervisor model plans the
//! research, fans out bounded-parallel worker researchers that query a
//! metasearch backend and compress evidence into cited findings, and a
//! synthesizer composes the final cited report.
//!
//! # Architecture
//!
//! ```text
//! User question → Supervisor
//!   ├── Clarify (optional) → Brief
//!   ├── Loop { reflect → delegate_research × N }
//!   │     └── Fan-out → bounded-parallel Workers
//!   │           └── Each { search → reflect }* → compressed cited Findings
//!   ├── Collect findings (submission order)
//!   └── Synthesizer → final markdown report with validated citations
//! ```
//!
//! The model layer adapts heterogeneous backends behind one interface:
//! backends without native structured output are driven via JSON-mode
//! prompts with validation and retry, and backends without native tool
//! calling are driven via the ReAct text protocol.
//!
//! # Example
//!
//! ```no_run
//! use delver::{ResearchConfig, ResearchOutcome, Supervisor, user_message};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), delver::ResearchError> {
//! let config = ResearchConfig::from_env()?;
//! let supervisor = Supervisor::new(config)?;
//!
//! let outcome = supervisor
//!     .run(&[user_message("What is HNSW?")], &CancellationToken::new())
//!     .await?;
//! if let ResearchOutcome::Report(report) = outcome {
//!     println!("{}", report.markdown);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod message;
pub mod model;
pub mod prompt;
pub mod react;
pub mod report;
pub mod search;
pub mod state;
pub mod supervisor;
pub mod tool;
pub mod worker;

// Re-export key types
pub use config::{ResearchConfig, ResearchConfigBuilder};
pub use dispatch::{DispatchOutcome, ToolDispatcher};
pub use error::ResearchError;
pub use message::{
    ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage, assistant_message, system_message,
    user_message,
};
pub use model::{AdapterOptions, BackendProfile, LlmProvider, ModelAdapter, ToolTurn};
pub use prompt::PromptSet;
pub use report::Synthesizer;
pub use search::{SearchBatchOutput, SearchProvider, SearchQueryBatch, SearchResult, SearxngSearch};
pub use state::{
    Brief, Claim, ClarifyDecision, CompressedClaims, FinalReport, FindingStatus, ReportMeta,
    ResearchOutcome, Source, SupervisorState, Termination, WorkerFindings, WorkerTask,
};
pub use supervisor::Supervisor;
pub use tool::{ToolCall, ToolDefinition, ToolResult, ToolSet};
pub use worker::Worker;
