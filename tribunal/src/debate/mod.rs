//! Multi-round debate engine: state machine, consensus, round digests,
//! and the persistence boundary.

pub mod consensus;
pub mod orchestrator;
pub mod store;
pub mod summary;
pub mod trigger;
pub mod types;

pub use consensus::check_consensus;
pub use orchestrator::{CompletedDebate, DebateOrchestrator, DebateOutcome};
pub use store::{DebateRecord, DebateStore, InMemoryDebateStore, StoreError};
pub use summary::digest_round;
pub use trigger::{trigger_debate, SkipReason, TriggerError, TriggerOutcome};
pub use types::{
    CallProvenance, ConsensusCheck, Debate, DebateConfig, DebateStatus, FinalOutcome,
    PersonaOutput, ProviderCallRecord, Round,
};
