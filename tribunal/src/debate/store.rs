//! Persistence boundary for debates and rounds.
//!
//! The store is where the idempotency invariant actually lives:
//! `create_debate` must be an atomic check-and-insert, because two
//! orchestrator instances can race past the in-process gate.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::types::{Debate, DebateStatus, FinalOutcome, Round};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A running or completed debate already exists for the proposal.
    #[error("proposal already has an active or completed debate {existing_debate_id}")]
    Conflict { existing_debate_id: Uuid },

    #[error("debate {0} not found")]
    NotFound(Uuid),

    #[error("debate {debate_id} is already terminal ({status})")]
    TerminalTransition {
        debate_id: Uuid,
        status: DebateStatus,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// A debate joined with its rounds.
#[derive(Debug, Clone)]
pub struct DebateRecord {
    pub debate: Debate,
    pub rounds: Vec<Round>,
}

/// Storage contract the orchestrator runs against.
#[async_trait]
pub trait DebateStore: Send + Sync {
    /// The idempotency-gate lookup: any debate for this proposal with
    /// status `running` or `completed`.
    async fn find_active_or_completed(
        &self,
        proposal_id: &str,
    ) -> Result<Option<Debate>, StoreError>;

    /// Atomic check-and-insert: fails with [`StoreError::Conflict`]
    /// when an active-or-completed debate already exists for the
    /// proposal.
    async fn create_debate(&self, debate: Debate) -> Result<Debate, StoreError>;

    async fn append_round(&self, debate_id: Uuid, round: Round) -> Result<(), StoreError>;

    async fn read_rounds(&self, debate_id: Uuid) -> Result<Vec<Round>, StoreError>;

    async fn complete_debate(
        &self,
        debate_id: Uuid,
        outcome: FinalOutcome,
    ) -> Result<(), StoreError>;

    async fn fail_debate(&self, debate_id: Uuid, error: String) -> Result<(), StoreError>;

    async fn get_debate(&self, debate_id: Uuid) -> Result<Option<DebateRecord>, StoreError>;

    async fn get_latest_debate(
        &self,
        proposal_id: &str,
    ) -> Result<Option<DebateRecord>, StoreError>;
}

#[derive(Default)]
struct Inner {
    debates: HashMap<Uuid, Debate>,
    rounds: HashMap<Uuid, Vec<Round>>,
    /// Insertion order, for latest-debate lookups.
    order: Vec<Uuid>,
}

/// Single-mutex in-memory store used by tests and embedders without an
/// external database.
#[derive(Default)]
pub struct InMemoryDebateStore {
    inner: Mutex<Inner>,
}

impl InMemoryDebateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DebateStore for InMemoryDebateStore {
    async fn find_active_or_completed(
        &self,
        proposal_id: &str,
    ) -> Result<Option<Debate>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .debates
            .values()
            .find(|d| {
                d.proposal_id == proposal_id
                    && matches!(d.status, DebateStatus::Running | DebateStatus::Completed)
            })
            .cloned())
    }

    async fn create_debate(&self, debate: Debate) -> Result<Debate, StoreError> {
        let mut inner = self.inner.lock().await;
        // Check and insert under one lock.
        if let Some(existing) = inner.debates.values().find(|d| {
            d.proposal_id == debate.proposal_id
                && matches!(d.status, DebateStatus::Running | DebateStatus::Completed)
        }) {
            return Err(StoreError::Conflict {
                existing_debate_id: existing.id,
            });
        }
        inner.order.push(debate.id);
        inner.rounds.insert(debate.id, Vec::new());
        inner.debates.insert(debate.id, debate.clone());
        Ok(debate)
    }

    async fn append_round(&self, debate_id: Uuid, round: Round) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if !inner.debates.contains_key(&debate_id) {
            return Err(StoreError::NotFound(debate_id));
        }
        inner.rounds.entry(debate_id).or_default().push(round);
        Ok(())
    }

    async fn read_rounds(&self, debate_id: Uuid) -> Result<Vec<Round>, StoreError> {
        let inner = self.inner.lock().await;
        if !inner.debates.contains_key(&debate_id) {
            return Err(StoreError::NotFound(debate_id));
        }
        Ok(inner.rounds.get(&debate_id).cloned().unwrap_or_default())
    }

    async fn complete_debate(
        &self,
        debate_id: Uuid,
        outcome: FinalOutcome,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let debate = inner
            .debates
            .get_mut(&debate_id)
            .ok_or(StoreError::NotFound(debate_id))?;
        if debate.status.is_terminal() {
            return Err(StoreError::TerminalTransition {
                debate_id,
                status: debate.status,
            });
        }
        debate.status = DebateStatus::Completed;
        debate.outcome = Some(outcome);
        debate.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_debate(&self, debate_id: Uuid, error: String) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let debate = inner
            .debates
            .get_mut(&debate_id)
            .ok_or(StoreError::NotFound(debate_id))?;
        if debate.status.is_terminal() {
            return Err(StoreError::TerminalTransition {
                debate_id,
                status: debate.status,
            });
        }
        debate.status = DebateStatus::Failed;
        debate.error = Some(error);
        debate.updated_at = Utc::now();
        Ok(())
    }

    async fn get_debate(&self, debate_id: Uuid) -> Result<Option<DebateRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.debates.get(&debate_id).map(|debate| DebateRecord {
            debate: debate.clone(),
            rounds: inner.rounds.get(&debate_id).cloned().unwrap_or_default(),
        }))
    }

    async fn get_latest_debate(
        &self,
        proposal_id: &str,
    ) -> Result<Option<DebateRecord>, StoreError> {
        let inner = self.inner.lock().await;
        let latest = inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.debates.get(id))
            .find(|d| d.proposal_id == proposal_id);
        Ok(latest.map(|debate| DebateRecord {
            debate: debate.clone(),
            rounds: inner.rounds.get(&debate.id).cloned().unwrap_or_default(),
        }))
    }
}
