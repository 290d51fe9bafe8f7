//! Self-modification proposals — the external input a debate
//! adjudicates. Read-only to the core for the duration of one debate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a proposal in the upstream pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    /// Ready for adjudication — the only status a debate triggers on.
    Submitted,
    InDebate,
    Approved,
    Rejected,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Submitted => write!(f, "submitted"),
            Self::InDebate => write!(f, "in_debate"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Initial risk-level tag assigned by the proposer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A proposed self-modification to the engineering pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub motivation: String,
    /// What the change touches, one entry per scope item.
    pub scope: Vec<String>,
    /// Pipeline components the change affects.
    pub affected_components: Vec<String>,
    pub risk_level: RiskLevel,
    pub status: ProposalStatus,
}

impl Proposal {
    /// Whether the proposal is in a state that allows triggering a
    /// debate.
    pub fn is_debatable(&self) -> bool {
        self.status == ProposalStatus::Submitted
    }
}

/// Error from a proposal lookup.
#[derive(Debug, thiserror::Error)]
pub enum ProposalSourceError {
    #[error("proposal lookup failed: {0}")]
    Lookup(String),
}

/// Upstream source of proposals (consumed, not implemented here beyond
/// test doubles).
#[async_trait]
pub trait ProposalSource: Send + Sync {
    /// Fetch a proposal by id. `None` when no such proposal exists.
    async fn fetch(&self, proposal_id: &str) -> Result<Option<Proposal>, ProposalSourceError>;
}
