//! Entry point the surrounding pipeline calls to adjudicate a
//! proposal.

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::diversity::DiversityError;
use crate::proposal::{ProposalSource, ProposalSourceError};

use super::orchestrator::{CompletedDebate, DebateOrchestrator, DebateOutcome};
use super::store::StoreError;
use super::types::DebateConfig;

/// Why a trigger was skipped without running a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ExistingDebate,
    ProposalNotFound,
    /// The proposal exists but is not in the submitted state.
    ProposalNotDebatable,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExistingDebate => write!(f, "existing_debate"),
            Self::ProposalNotFound => write!(f, "proposal_not_found"),
            Self::ProposalNotDebatable => write!(f, "proposal_not_debatable"),
        }
    }
}

/// Result of one trigger attempt.
#[derive(Debug)]
pub enum TriggerOutcome {
    Skipped {
        reason: SkipReason,
        existing_debate_id: Option<Uuid>,
    },
    DiversityRejected(DiversityError),
    Completed(CompletedDebate),
    Failed { debate_id: Uuid, error: String },
}

/// Infrastructure failure before any debate decision was reached.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error(transparent)]
    Source(#[from] ProposalSourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fetch the proposal, guard its status, then run the debate.
pub async fn trigger_debate(
    orchestrator: &DebateOrchestrator,
    source: &dyn ProposalSource,
    proposal_id: &str,
    config: DebateConfig,
) -> Result<TriggerOutcome, TriggerError> {
    let correlation_id = config.correlation_id.as_str();

    let Some(proposal) = source.fetch(proposal_id).await? else {
        info!(correlation_id, proposal_id, reason = %SkipReason::ProposalNotFound, "idempotency_skip");
        return Ok(TriggerOutcome::Skipped {
            reason: SkipReason::ProposalNotFound,
            existing_debate_id: None,
        });
    };

    if !proposal.is_debatable() {
        info!(
            correlation_id,
            proposal_id,
            status = %proposal.status,
            reason = %SkipReason::ProposalNotDebatable,
            "idempotency_skip"
        );
        return Ok(TriggerOutcome::Skipped {
            reason: SkipReason::ProposalNotDebatable,
            existing_debate_id: None,
        });
    }

    let outcome = match orchestrator.run_debate(&proposal, config).await? {
        DebateOutcome::Skipped { existing_debate_id } => TriggerOutcome::Skipped {
            reason: SkipReason::ExistingDebate,
            existing_debate_id: Some(existing_debate_id),
        },
        DebateOutcome::DiversityRejected(e) => TriggerOutcome::DiversityRejected(e),
        DebateOutcome::Completed(completed) => TriggerOutcome::Completed(completed),
        DebateOutcome::Failed { debate_id, error } => TriggerOutcome::Failed { debate_id, error },
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::debate::store::InMemoryDebateStore;
    use crate::personas::PersonaRegistry;
    use crate::proposal::{Proposal, ProposalStatus, RiskLevel};
    use crate::providers::BackendSet;

    struct MapSource(HashMap<String, Proposal>);

    #[async_trait]
    impl ProposalSource for MapSource {
        async fn fetch(&self, proposal_id: &str) -> Result<Option<Proposal>, ProposalSourceError> {
            Ok(self.0.get(proposal_id).cloned())
        }
    }

    fn proposal(status: ProposalStatus) -> Proposal {
        Proposal {
            id: "prop-1".to_string(),
            title: "Widen retry budget".to_string(),
            summary: "Raise deploy retry budget from 2 to 4".to_string(),
            motivation: "Transient registry failures abort deploys".to_string(),
            scope: vec!["deploy step".to_string()],
            affected_components: vec!["release-runner".to_string()],
            risk_level: RiskLevel::Medium,
            status,
        }
    }

    fn orchestrator() -> DebateOrchestrator {
        DebateOrchestrator::new(
            PersonaRegistry::standard(),
            BackendSet::from_backends(HashMap::new()),
            Arc::new(InMemoryDebateStore::new()),
        )
    }

    #[tokio::test]
    async fn test_unknown_proposal_skips() {
        let source = MapSource(HashMap::new());
        let outcome = trigger_debate(
            &orchestrator(),
            &source,
            "missing",
            DebateConfig::default(),
        )
        .await
        .unwrap();
        assert!(matches!(
            outcome,
            TriggerOutcome::Skipped {
                reason: SkipReason::ProposalNotFound,
                existing_debate_id: None,
            }
        ));
    }

    #[tokio::test]
    async fn test_non_submitted_proposal_skips_without_orchestration() {
        let source = MapSource(HashMap::from([(
            "prop-1".to_string(),
            proposal(ProposalStatus::Approved),
        )]));
        let outcome = trigger_debate(&orchestrator(), &source, "prop-1", DebateConfig::default())
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            TriggerOutcome::Skipped {
                reason: SkipReason::ProposalNotDebatable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_diversity_rejection_propagates() {
        let source = MapSource(HashMap::from([(
            "prop-1".to_string(),
            proposal(ProposalStatus::Submitted),
        )]));
        // An anthropic proposer collides with the safety evaluator.
        let config = DebateConfig {
            proposer_model_id: "claude-opus-4-5".to_string(),
            ..DebateConfig::default()
        };
        let outcome = trigger_debate(&orchestrator(), &source, "prop-1", config)
            .await
            .unwrap();
        assert!(matches!(outcome, TriggerOutcome::DiversityRejected(_)));
    }
}
