//! Tribunal — debate-based governance for pipeline self-modification
//! proposals.
//!
//! A proposal is adjudicated by convening a simulated debate among
//! three AI evaluators sourced from distinct vendor families, then
//! deriving a single verdict (approve / revise / reject) with a full
//! audit trail. The diversity requirement is the point: if every
//! evaluator descends from the same foundation-model provider, their
//! agreement is not independent evidence.
//!
//! # Layers
//!
//! - [`family`]: model-identifier → vendor-family classification
//! - [`diversity`]: the separation invariant and prompt-leak scanning
//! - [`personas`]: the fixed safety/value/risk evaluator catalog
//! - [`providers`]: uniform completion backends with retry, timeout,
//!   and local-to-cloud fallback
//! - [`debate`]: the round state machine, consensus check, and
//!   persistence boundary
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tribunal::{
//!     trigger_debate, BackendSet, DebateConfig, DebateOrchestrator, InMemoryDebateStore,
//!     PersonaRegistry, ProviderConfig,
//! };
//! # use tribunal::proposal::ProposalSource;
//! # async fn run(source: &dyn ProposalSource) -> anyhow::Result<()> {
//! let registry = PersonaRegistry::standard();
//! let backends = BackendSet::from_config(&registry, &ProviderConfig::from_env())?;
//! let orchestrator =
//!     DebateOrchestrator::new(registry, backends, Arc::new(InMemoryDebateStore::new()));
//!
//! let outcome =
//!     trigger_debate(&orchestrator, source, "prop-42", DebateConfig::default()).await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod debate;
pub mod diversity;
pub mod family;
pub mod personas;
pub mod proposal;
pub mod providers;

// Re-export key debate types
pub use debate::{
    trigger_debate, CompletedDebate, ConsensusCheck, Debate, DebateConfig, DebateOrchestrator,
    DebateOutcome, DebateRecord, DebateStatus, DebateStore, FinalOutcome, InMemoryDebateStore,
    PersonaOutput, Round, SkipReason, StoreError, TriggerError, TriggerOutcome,
};

// Re-export key classifier and validator types
pub use diversity::{
    build_validated_config, validate_prompt_context, validate_separation, DiversityError,
    SeparationReport,
};
pub use family::{classify, Family};

// Re-export key persona types
pub use personas::{
    build_prompt, parse_response, Persona, PersonaId, PersonaJudgment, PersonaRegistry, Verdict,
};

// Re-export key provider types
pub use providers::{
    BackendSet, Completion, CompletionBackend, CompletionOptions, ProviderConfig, ProviderError,
    RetryPolicy, TokenUsage,
};
pub use providers::diagnostics::{DiagnosticsEvent, DiagnosticsSink, SharedDiagnosticsSink};

// Re-export proposal boundary types
pub use proposal::{Proposal, ProposalSource, ProposalStatus, RiskLevel};
