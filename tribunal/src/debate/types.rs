//! Debate records — the persisted audit trail of one adjudication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diversity::SeparationReport;
use crate::family::Family;
use crate::personas::{PersonaId, PersonaJudgment, Verdict};
use crate::providers::{Completion, TokenUsage};

/// Debate lifecycle. Terminal states never transition back to running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Running,
    Completed,
    Failed,
}

impl DebateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-debate knobs, snapshotted onto the debate row at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    pub max_rounds: u32,
    /// Maximum allowed score dispersion (max − min) for consensus.
    pub consensus_score_threshold: f64,
    /// Model attributed as the proposal's author; the diversity gate
    /// checks every evaluator family against it.
    pub proposer_model_id: String,
    /// Tag threaded through every log event of this debate.
    pub correlation_id: String,
    /// Log full rationale text instead of truncated snippets.
    pub log_full_rationale: bool,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            consensus_score_threshold: 15.0,
            proposer_model_id: "qwen2.5-coder:14b".to_string(),
            correlation_id: Uuid::new_v4().to_string(),
            log_full_rationale: false,
        }
    }
}

/// Provenance of one successful evaluator call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallProvenance {
    pub provider: String,
    pub family: Family,
    pub model: String,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    /// 1-based attempt number that succeeded.
    pub attempt: u32,
    pub fallback: bool,
    pub original_error: Option<String>,
}

impl From<&Completion> for CallProvenance {
    fn from(completion: &Completion) -> Self {
        Self {
            provider: completion.provider.clone(),
            family: completion.family,
            model: completion.model.clone(),
            duration_ms: completion.duration_ms,
            usage: completion.usage,
            attempt: completion.attempt,
            fallback: completion.fallback,
            original_error: completion.original_error.clone(),
        }
    }
}

/// One evaluator's contribution to a round. Always present, even when
/// the underlying call failed — the judgment is then the degraded
/// substitute and `call_error` names the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaOutput {
    pub persona: PersonaId,
    pub judgment: PersonaJudgment,
    /// Absent when the call itself never produced a completion.
    pub provenance: Option<CallProvenance>,
    pub call_error: Option<String>,
}

/// Raw audit record of one evaluator call, kept alongside the parsed
/// output. `attempt` is 0 when no attempt succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCallRecord {
    pub persona: PersonaId,
    pub provider: String,
    pub model: String,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    pub attempt: u32,
    pub fallback: bool,
    pub error: Option<String>,
}

/// Result of one round's consensus check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusCheck {
    pub reached: bool,
    pub majority_verdict: Option<Verdict>,
    pub average_score: f64,
    /// `max − min` across the round's three scores.
    pub score_delta: f64,
    pub threshold: f64,
    /// Which condition failed, when consensus was not reached.
    pub reason: Option<String>,
}

/// One completed round. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// Zero-based.
    pub index: u32,
    pub outputs: Vec<PersonaOutput>,
    pub consensus: ConsensusCheck,
    pub calls: Vec<ProviderCallRecord>,
    /// Digest of this round, fed as context into the next one.
    pub summary: String,
    pub completed_at: DateTime<Utc>,
}

/// Terminal fields written when a debate completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalOutcome {
    pub verdict: Verdict,
    pub score: f64,
    pub consensus_reached: bool,
    pub consensus_reason: Option<String>,
    pub rounds_completed: u32,
    pub top_issues: Vec<String>,
    pub recommended_next_steps: Vec<String>,
}

/// The persisted debate row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub id: Uuid,
    pub proposal_id: String,
    pub status: DebateStatus,
    pub max_rounds: u32,
    pub consensus_score_threshold: f64,
    pub correlation_id: String,
    /// Diversity-validation outcome at creation time.
    pub separation: SeparationReport,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub outcome: Option<FinalOutcome>,
    pub error: Option<String>,
}

impl Debate {
    pub fn new(proposal_id: &str, config: &DebateConfig, separation: SeparationReport) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            proposal_id: proposal_id.to_string(),
            status: DebateStatus::Running,
            max_rounds: config.max_rounds,
            consensus_score_threshold: config.consensus_score_threshold,
            correlation_id: config.correlation_id.clone(),
            separation,
            created_at: now,
            updated_at: now,
            outcome: None,
            error: None,
        }
    }

    /// One-line human summary for log output.
    pub fn status_line(&self) -> String {
        match (&self.outcome, &self.error) {
            (Some(outcome), _) => format!(
                "debate {} proposal {} {} verdict={} score={:.1} consensus={} rounds={}",
                self.id,
                self.proposal_id,
                self.status,
                outcome.verdict,
                outcome.score,
                outcome.consensus_reached,
                outcome.rounds_completed,
            ),
            (None, Some(error)) => format!(
                "debate {} proposal {} {} error={}",
                self.id, self.proposal_id, self.status, error
            ),
            (None, None) => {
                format!("debate {} proposal {} {}", self.id, self.proposal_id, self.status)
            }
        }
    }
}
