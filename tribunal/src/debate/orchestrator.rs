//! The debate state machine: idempotency gate, diversity gate, round
//! loop, final verdict.
//!
//! Failure policy is degrade-and-continue at the persona level and
//! fail-the-debate-but-not-the-process at this level. A round always
//! ends with exactly three outputs; the only fatal errors are the ones
//! that leave nothing to adjudicate.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::diversity::{build_validated_config, validate_prompt_context, DiversityError};
use crate::personas::{build_prompt, excerpt, parse_response, PersonaId, PersonaJudgment, PersonaRegistry, Verdict};
use crate::proposal::Proposal;
use crate::providers::{BackendSet, CompletionOptions, TokenUsage};

use super::consensus::check_consensus;
use super::store::{DebateStore, StoreError};
use super::summary::digest_round;
use super::types::{
    CallProvenance, Debate, DebateConfig, FinalOutcome, PersonaOutput, ProviderCallRecord, Round,
};

/// Rationale snippet length in log events when full logging is off.
const LOG_SNIPPET_LEN: usize = 120;

const TOP_ISSUES_CAP: usize = 5;

/// Caller-facing summary of a completed debate.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompletedDebate {
    pub debate_id: Uuid,
    pub final_verdict: Verdict,
    pub final_score: f64,
    pub consensus_reached: bool,
    pub rounds_completed: u32,
    pub top_issues: Vec<String>,
    pub recommended_next_steps: Vec<String>,
    pub duration_ms: u64,
}

/// What one debate run produced.
#[derive(Debug)]
pub enum DebateOutcome {
    /// An active or completed debate already exists for the proposal.
    Skipped { existing_debate_id: Uuid },
    /// The diversity gate failed; no debate row was created.
    DiversityRejected(DiversityError),
    Completed(CompletedDebate),
    /// The debate row records the failure permanently.
    Failed { debate_id: Uuid, error: String },
}

pub struct DebateOrchestrator {
    registry: PersonaRegistry,
    backends: BackendSet,
    store: Arc<dyn DebateStore>,
    completion_options: CompletionOptions,
}

impl DebateOrchestrator {
    pub fn new(registry: PersonaRegistry, backends: BackendSet, store: Arc<dyn DebateStore>) -> Self {
        Self {
            registry,
            backends,
            store,
            completion_options: CompletionOptions::default(),
        }
    }

    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.completion_options = options;
        self
    }

    /// Run one debate end to end.
    ///
    /// `Err` is only possible before a debate row exists (the
    /// idempotency lookup or the insert itself failed); once the row is
    /// created, every failure is recorded on it and surfaced as
    /// [`DebateOutcome::Failed`].
    pub async fn run_debate(
        &self,
        proposal: &Proposal,
        config: DebateConfig,
    ) -> Result<DebateOutcome, StoreError> {
        let started = Instant::now();
        let correlation_id = config.correlation_id.as_str();
        info!(correlation_id, proposal_id = %proposal.id, "debate_start");

        if let Some(existing) = self.store.find_active_or_completed(&proposal.id).await? {
            info!(correlation_id, existing_debate_id = %existing.id, "idempotency_skip");
            return Ok(DebateOutcome::Skipped {
                existing_debate_id: existing.id,
            });
        }

        let validated = match build_validated_config(
            &config.proposer_model_id,
            self.registry.evaluator_bindings(),
        ) {
            Ok(v) => v,
            Err(e) => {
                warn!(correlation_id, reason_code = %e.reason_code, error = %e, "diversity_gate_fail");
                return Ok(DebateOutcome::DiversityRejected(e));
            }
        };

        let debate = Debate::new(&proposal.id, &config, validated.report);
        let debate = match self.store.create_debate(debate).await {
            Ok(d) => d,
            // Another instance won the race; same answer as the gate.
            Err(StoreError::Conflict { existing_debate_id }) => {
                info!(correlation_id, existing_debate_id = %existing_debate_id, "idempotency_skip");
                return Ok(DebateOutcome::Skipped { existing_debate_id });
            }
            Err(e) => return Err(e),
        };
        info!(correlation_id, debate_id = %debate.id, max_rounds = debate.max_rounds, "debate_created");

        match self.run_rounds(proposal, debate.id, &config).await {
            Ok(outcome) => {
                if let Err(e) = self.store.complete_debate(debate.id, outcome.clone()).await {
                    let error = format!("persisting completion failed: {}", e);
                    return Ok(self.fail(debate.id, correlation_id, error).await);
                }
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    correlation_id,
                    debate_id = %debate.id,
                    verdict = %outcome.verdict,
                    score = outcome.score,
                    consensus = outcome.consensus_reached,
                    rounds = outcome.rounds_completed,
                    duration_ms,
                    "debate_complete"
                );
                Ok(DebateOutcome::Completed(CompletedDebate {
                    debate_id: debate.id,
                    final_verdict: outcome.verdict,
                    final_score: outcome.score,
                    consensus_reached: outcome.consensus_reached,
                    rounds_completed: outcome.rounds_completed,
                    top_issues: outcome.top_issues,
                    recommended_next_steps: outcome.recommended_next_steps,
                    duration_ms,
                }))
            }
            Err(error) => Ok(self.fail(debate.id, correlation_id, error).await),
        }
    }

    async fn fail(&self, debate_id: Uuid, correlation_id: &str, error: String) -> DebateOutcome {
        error!(correlation_id, debate_id = %debate_id, error = %error, "debate_fail");
        if let Err(e) = self.store.fail_debate(debate_id, error.clone()).await {
            error!(correlation_id, debate_id = %debate_id, store_error = %e, "failure record not persisted");
        }
        DebateOutcome::Failed { debate_id, error }
    }

    async fn run_rounds(
        &self,
        proposal: &Proposal,
        debate_id: Uuid,
        config: &DebateConfig,
    ) -> Result<FinalOutcome, String> {
        let correlation_id = config.correlation_id.as_str();
        let mut prior_summary: Option<String> = None;

        for index in 0..config.max_rounds {
            info!(correlation_id, debate_id = %debate_id, round = index, "round_start");

            // Fixed fan-out of 3, fan-in of 3. Each future resolves to
            // an output even when the underlying call fails, so the
            // barrier never collapses the round.
            let summary_ref = prior_summary.as_deref();
            let (safety, value, risk) = tokio::join!(
                self.evaluate_persona(PersonaId::Safety, proposal, summary_ref, config),
                self.evaluate_persona(PersonaId::Value, proposal, summary_ref, config),
                self.evaluate_persona(PersonaId::Risk, proposal, summary_ref, config),
            );

            let mut outputs = Vec::with_capacity(3);
            let mut calls = Vec::with_capacity(3);
            for (output, call) in [safety, value, risk] {
                outputs.push(output);
                calls.push(call);
            }

            let consensus = check_consensus(&outputs, config.consensus_score_threshold);
            let summary = digest_round(index, &outputs);
            let round = Round {
                index,
                outputs,
                consensus: consensus.clone(),
                calls,
                summary: summary.clone(),
                completed_at: Utc::now(),
            };

            // A lost round is tolerable here; finalization fails only
            // when nothing at all was persisted.
            if let Err(e) = self.store.append_round(debate_id, round).await {
                warn!(correlation_id, debate_id = %debate_id, round = index, error = %e, "round persistence failed");
            }

            info!(
                correlation_id,
                debate_id = %debate_id,
                round = index,
                consensus = consensus.reached,
                average_score = consensus.average_score,
                score_delta = consensus.score_delta,
                "round_complete"
            );

            if consensus.reached {
                break;
            }
            prior_summary = Some(summary);
        }

        self.finalize(debate_id).await
    }

    /// One persona's turn: validate the prompt, call the backend, parse
    /// the response. Never fails — every failure mode yields a degraded
    /// output plus an audit record naming the error.
    async fn evaluate_persona(
        &self,
        id: PersonaId,
        proposal: &Proposal,
        prior_summary: Option<&str>,
        config: &DebateConfig,
    ) -> (PersonaOutput, ProviderCallRecord) {
        let correlation_id = config.correlation_id.as_str();
        let persona = self.registry.get(id);
        let prompt = build_prompt(proposal, prior_summary);
        let started = Instant::now();

        let Some(backend) = self.backends.get(id) else {
            let message = format!("no backend configured for persona '{}'", id);
            error!(correlation_id, persona = %id, error = %message, "persona_call_error");
            return degraded_pair(id, persona.model_id.clone(), message, started);
        };

        // The digesting step upstream is the only legal path for peer
        // context; a contaminated prompt is never sent.
        let context = validate_prompt_context(&prompt, id);
        if !context.passed {
            let detail: Vec<&str> = context.violations.iter().map(|v| v.message.as_str()).collect();
            let message = format!("prompt context validation failed: {}", detail.join("; "));
            warn!(correlation_id, persona = %id, error = %message, "persona_call_error");
            return degraded_pair(id, backend.model().to_string(), message, started);
        }

        info!(
            correlation_id,
            persona = %id,
            provider = backend.provider(),
            model = backend.model(),
            "persona_call_start"
        );

        match backend
            .complete(&persona.system_instruction, &prompt, &self.completion_options)
            .await
        {
            Ok(completion) => {
                let judgment = parse_response(&completion.content);
                let rationale = if config.log_full_rationale {
                    judgment.rationale.clone()
                } else {
                    excerpt(&judgment.rationale, LOG_SNIPPET_LEN)
                };
                info!(
                    correlation_id,
                    persona = %id,
                    verdict = %judgment.verdict,
                    score = judgment.score,
                    parse_error = judgment.parse_error,
                    fallback = completion.fallback,
                    duration_ms = completion.duration_ms,
                    rationale = %rationale,
                    "persona_call_end"
                );
                let record = ProviderCallRecord {
                    persona: id,
                    provider: completion.provider.clone(),
                    model: completion.model.clone(),
                    duration_ms: completion.duration_ms,
                    usage: completion.usage,
                    attempt: completion.attempt,
                    fallback: completion.fallback,
                    error: None,
                };
                let output = PersonaOutput {
                    persona: id,
                    judgment,
                    provenance: Some(CallProvenance::from(&completion)),
                    call_error: None,
                };
                (output, record)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(correlation_id, persona = %id, error = %message, "persona_call_error");
                degraded_pair(id, backend.model().to_string(), message, started)
            }
        }
    }

    /// Compute the final verdict from the persisted rounds.
    async fn finalize(&self, debate_id: Uuid) -> Result<FinalOutcome, String> {
        let rounds = self
            .store
            .read_rounds(debate_id)
            .await
            .map_err(|e| format!("reading persisted rounds failed: {}", e))?;
        let last = rounds
            .last()
            .ok_or_else(|| "no rounds were persisted".to_string())?;

        let consensus = &last.consensus;
        let score = consensus.average_score;
        let verdict = if consensus.reached {
            consensus.majority_verdict.unwrap_or(Verdict::Revise)
        } else {
            score_tie_break(score)
        };

        let top_issues = collect_top_issues(&last.outputs);
        let recommended_next_steps = recommended_next_steps(verdict, &top_issues);

        Ok(FinalOutcome {
            verdict,
            score,
            consensus_reached: consensus.reached,
            consensus_reason: consensus.reason.clone(),
            rounds_completed: rounds.len() as u32,
            top_issues,
            recommended_next_steps,
        })
    }
}

/// Low-confidence substitute for a persona whose call never yielded a
/// usable completion.
fn degraded_pair(
    id: PersonaId,
    model: String,
    error: String,
    started: Instant,
) -> (PersonaOutput, ProviderCallRecord) {
    let judgment = PersonaJudgment {
        verdict: Verdict::Revise,
        score: 50.0,
        rationale: format!("evaluator unavailable: {}", error),
        change_requests: Vec::new(),
        parse_error: false,
    };
    let record = ProviderCallRecord {
        persona: id,
        provider: String::new(),
        model,
        duration_ms: started.elapsed().as_millis() as u64,
        usage: TokenUsage::default(),
        attempt: 0,
        fallback: false,
        error: Some(error.clone()),
    };
    let output = PersonaOutput {
        persona: id,
        judgment,
        provenance: None,
        call_error: Some(error),
    };
    (output, record)
}

/// Verdict bands used when no round ever reached consensus.
fn score_tie_break(average: f64) -> Verdict {
    if average >= 70.0 {
        Verdict::Approve
    } else if average >= 50.0 {
        Verdict::Revise
    } else {
        Verdict::Reject
    }
}

/// Deduplicated union of the final round's change requests, first-seen
/// order, capped.
fn collect_top_issues(outputs: &[PersonaOutput]) -> Vec<String> {
    let mut issues = Vec::new();
    for output in outputs {
        for request in &output.judgment.change_requests {
            if !issues.contains(request) {
                issues.push(request.clone());
            }
            if issues.len() == TOP_ISSUES_CAP {
                return issues;
            }
        }
    }
    issues
}

fn recommended_next_steps(verdict: Verdict, top_issues: &[String]) -> Vec<String> {
    match verdict {
        Verdict::Approve => vec![
            "proceed with implementation".to_string(),
            "monitor affected components after rollout".to_string(),
        ],
        Verdict::Revise => {
            let mut steps: Vec<String> = top_issues
                .iter()
                .map(|issue| format!("address: {}", issue))
                .collect();
            steps.push("resubmit the proposal after revisions".to_string());
            steps
        }
        Verdict::Reject => vec![
            "do not proceed with this change".to_string(),
            "consider a redesign or a stakeholder consultation".to_string(),
        ],
    }
}
