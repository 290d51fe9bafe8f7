//! End-to-end debate flows over scripted evaluator backends and the
//! in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;

use tribunal::debate::{
    DebateConfig, DebateOrchestrator, DebateOutcome, DebateStatus, DebateStore,
    InMemoryDebateStore,
};
use tribunal::personas::{PersonaId, PersonaRegistry, Verdict};
use tribunal::proposal::{Proposal, ProposalStatus, RiskLevel};
use tribunal::providers::{
    BackendSet, Completion, CompletionBackend, CompletionOptions, ProviderError, TokenUsage,
};
use tribunal::Family;

/// Backend that replays a fixed script of responses, one per call.
struct ScriptedBackend {
    provider: &'static str,
    family: Family,
    model: &'static str,
    script: Mutex<Vec<Result<String, ProviderError>>>,
}

impl ScriptedBackend {
    fn new(
        provider: &'static str,
        family: Family,
        model: &'static str,
        script: Vec<Result<String, ProviderError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            family,
            model,
            script: Mutex::new(script),
        })
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn provider(&self) -> &str {
        self.provider
    }

    fn family(&self) -> Family {
        self.family
    }

    fn model(&self) -> &str {
        self.model
    }

    async fn complete(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _opts: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("scripted backend '{}' ran out of responses", self.provider);
            }
            script.remove(0)
        };
        next.map(|content| Completion {
            content,
            provider: self.provider.to_string(),
            family: self.family,
            model: self.model.to_string(),
            duration_ms: 3,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            attempt: 1,
            fallback: false,
            original_error: None,
        })
    }
}

fn reply(verdict: &str, score: f64, rationale: &str, requests: &[&str]) -> Result<String, ProviderError> {
    let requests: Vec<String> = requests.iter().map(|r| format!("\"{}\"", r)).collect();
    Ok(format!(
        r#"{{"verdict": "{}", "score": {}, "rationale": "{}", "change_requests": [{}]}}"#,
        verdict,
        score,
        rationale,
        requests.join(", ")
    ))
}

fn proposal() -> Proposal {
    Proposal {
        id: "prop-42".to_string(),
        title: "Parallelize the lint stage".to_string(),
        summary: "Split lint across four workers".to_string(),
        motivation: "Lint is the slowest serial stage in the pipeline".to_string(),
        scope: vec!["ci configuration".to_string()],
        affected_components: vec!["ci-runner".to_string()],
        risk_level: RiskLevel::Low,
        status: ProposalStatus::Submitted,
    }
}

fn config() -> DebateConfig {
    DebateConfig {
        proposer_model_id: "qwen2.5-coder:14b".to_string(),
        ..DebateConfig::default()
    }
}

fn orchestrator_with(
    safety: Vec<Result<String, ProviderError>>,
    value: Vec<Result<String, ProviderError>>,
    risk: Vec<Result<String, ProviderError>>,
) -> (DebateOrchestrator, Arc<InMemoryDebateStore>) {
    // Capture phase-transition events per test; later calls are no-ops.
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let backends: HashMap<PersonaId, Arc<dyn CompletionBackend>> = HashMap::from([
        (
            PersonaId::Safety,
            ScriptedBackend::new("anthropic", Family::Anthropic, "claude-sonnet-4-20250514", safety)
                as Arc<dyn CompletionBackend>,
        ),
        (
            PersonaId::Value,
            ScriptedBackend::new("openai", Family::OpenAi, "gpt-4o", value)
                as Arc<dyn CompletionBackend>,
        ),
        (
            PersonaId::Risk,
            ScriptedBackend::new("google", Family::Google, "gemini-1.5-pro", risk)
                as Arc<dyn CompletionBackend>,
        ),
    ]);
    let store = Arc::new(InMemoryDebateStore::new());
    let orchestrator = DebateOrchestrator::new(
        PersonaRegistry::standard(),
        BackendSet::from_backends(backends),
        store.clone(),
    );
    (orchestrator, store)
}

#[tokio::test]
async fn consensus_in_first_round_stops_early() {
    let (orchestrator, store) = orchestrator_with(
        vec![reply("approve", 85.0, "safe and reversible", &[])],
        vec![reply("approve", 80.0, "clear throughput win", &[])],
        vec![reply("approve", 78.0, "low operational risk", &[])],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    assert_eq!(completed.final_verdict, Verdict::Approve);
    assert!(completed.consensus_reached);
    assert_eq!(completed.rounds_completed, 1);
    assert!((completed.final_score - 81.0).abs() < 1e-9);

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    assert_eq!(record.debate.status, DebateStatus::Completed);
    assert_eq!(record.rounds.len(), 1);
    assert!(record.rounds[0].consensus.reached);
}

#[tokio::test]
async fn wide_dispersion_blocks_consensus_despite_majority() {
    // Round 0: approve majority but delta 30 > 15. Rounds 1-2 repeat
    // the disagreement, so the debate exhausts max_rounds.
    let spread = |low_rationale: &str| {
        (
            reply("approve", 90.0, "strongly in favor", &[]),
            reply("approve", 80.0, "in favor", &[]),
            reply("revise", 60.0, low_rationale, &["add a rollback plan"]),
        )
    };
    let (s0, v0, r0) = spread("worried about coupling");
    let (s1, v1, r1) = spread("still worried");
    let (s2, v2, r2) = spread("unconvinced");

    let (orchestrator, store) = orchestrator_with(
        vec![s0, s1, s2],
        vec![v0, v1, v2],
        vec![r0, r1, r2],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    assert!(!completed.consensus_reached);
    assert_eq!(completed.rounds_completed, 3);
    // Average (90+80+60)/3 ≈ 76.7 ≥ 70 → tie-break approve.
    assert_eq!(completed.final_verdict, Verdict::Approve);
    assert_eq!(completed.top_issues, vec!["add a rollback plan"]);

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    let reason = record.rounds[0].consensus.reason.as_deref().unwrap();
    assert_eq!(reason, "score_delta_too_high: 30 > 15");
}

#[tokio::test]
async fn no_majority_mid_band_average_yields_revise() {
    // Three rounds, never a majority, final round averages 62.
    let round = || {
        (
            reply("approve", 70.0, "acceptable", &[]),
            reply("revise", 62.0, "needs narrowing", &["narrow the scope"]),
            reply("reject", 54.0, "too coupled", &["decouple the runner"]),
        )
    };
    let (s0, v0, r0) = round();
    let (s1, v1, r1) = round();
    let (s2, v2, r2) = round();

    let (orchestrator, _store) = orchestrator_with(
        vec![s0, s1, s2],
        vec![v0, v1, v2],
        vec![r0, r1, r2],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    assert!(!completed.consensus_reached);
    assert!((completed.final_score - 62.0).abs() < 1e-9);
    assert_eq!(completed.final_verdict, Verdict::Revise);
    assert!(completed
        .recommended_next_steps
        .iter()
        .any(|s| s.contains("resubmit")));
}

#[tokio::test]
async fn second_trigger_is_skipped_with_existing_id() {
    let (orchestrator, store) = orchestrator_with(
        vec![reply("approve", 85.0, "fine", &[])],
        vec![reply("approve", 84.0, "fine", &[])],
        vec![reply("approve", 83.0, "fine", &[])],
    );

    let first = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let first_id = match first {
        DebateOutcome::Completed(c) => c.debate_id,
        other => panic!("expected completion, got {other:?}"),
    };

    let second = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    match second {
        DebateOutcome::Skipped { existing_debate_id } => {
            assert_eq!(existing_debate_id, first_id)
        }
        other => panic!("expected skip, got {other:?}"),
    }

    // Still exactly one debate row for the proposal.
    let latest = store.get_latest_debate("prop-42").await.unwrap().unwrap();
    assert_eq!(latest.debate.id, first_id);
}

#[tokio::test]
async fn diversity_failure_creates_no_rows() {
    let (orchestrator, store) = orchestrator_with(vec![], vec![], vec![]);

    // Proposer from the safety evaluator's family.
    let config = DebateConfig {
        proposer_model_id: "claude-opus-4-5".to_string(),
        ..DebateConfig::default()
    };
    let outcome = orchestrator.run_debate(&proposal(), config).await.unwrap();
    assert!(matches!(outcome, DebateOutcome::DiversityRejected(_)));
    assert!(store.get_latest_debate("prop-42").await.unwrap().is_none());
}

#[tokio::test]
async fn failed_calls_still_yield_three_outputs() {
    let (orchestrator, store) = orchestrator_with(
        vec![Err(ProviderError::Timeout {
            provider: "anthropic".to_string(),
            timeout_ms: 120_000,
        })],
        vec![reply("approve", 60.0, "fine", &[])],
        vec![reply("approve", 55.0, "fine", &[])],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    let round = &record.rounds[0];
    assert_eq!(round.outputs.len(), 3);

    let safety = round
        .outputs
        .iter()
        .find(|o| o.persona == PersonaId::Safety)
        .unwrap();
    assert_eq!(safety.judgment.verdict, Verdict::Revise);
    assert_eq!(safety.judgment.score, 50.0);
    assert!(safety.call_error.as_deref().unwrap().contains("timed out"));
    assert!(safety.provenance.is_none());

    // Degraded 50 + approvals at 60/55: approve majority, delta 10 —
    // consensus despite the failure.
    assert!(completed.consensus_reached);
    assert_eq!(completed.final_verdict, Verdict::Approve);

    // The audit record names the failure.
    let call = round
        .calls
        .iter()
        .find(|c| c.persona == PersonaId::Safety)
        .unwrap();
    assert_eq!(call.attempt, 0);
    assert!(call.error.is_some());
}

#[tokio::test]
async fn malformed_response_degrades_without_failing_round() {
    let (orchestrator, store) = orchestrator_with(
        vec![Ok("I cannot answer in JSON today.".to_string())],
        vec![reply("approve", 60.0, "fine", &[])],
        vec![reply("approve", 58.0, "fine", &[])],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    let safety = record.rounds[0]
        .outputs
        .iter()
        .find(|o| o.persona == PersonaId::Safety)
        .unwrap();
    assert!(safety.judgment.parse_error);
    assert_eq!(safety.judgment.verdict, Verdict::Revise);
    assert_eq!(safety.judgment.score, 50.0);
    // The call itself succeeded; provenance is intact.
    assert!(safety.provenance.is_some());
    assert!(safety.call_error.is_none());
}

#[tokio::test]
async fn later_rounds_receive_prior_round_digest() {
    // Round 0 disagrees; round 1 converges. The second-round prompts
    // must carry the round-0 digest — verified indirectly through the
    // persisted summary and the two-round shape.
    let (orchestrator, store) = orchestrator_with(
        vec![
            reply("approve", 88.0, "safe", &[]),
            reply("approve", 80.0, "peer points taken", &[]),
        ],
        vec![
            reply("reject", 40.0, "not worth it", &["show the benefit"]),
            reply("approve", 75.0, "benefit shown", &[]),
        ],
        vec![
            reply("revise", 60.0, "unclear failure modes", &[]),
            reply("approve", 78.0, "failure modes addressed", &[]),
        ],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };
    assert_eq!(completed.rounds_completed, 2);
    assert!(completed.consensus_reached);

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    let first_summary = &record.rounds[0].summary;
    assert!(first_summary.contains("Round 1 positions:"));
    assert!(first_summary.contains("safety evaluator: approve (score 88)"));
    assert!(first_summary.contains("requested: show the benefit"));
}

#[tokio::test]
async fn contaminated_prompt_degrades_without_backend_call() {
    // Empty scripts: any backend call would panic, proving the
    // contaminated prompts were never sent.
    let (orchestrator, store) = orchestrator_with(vec![], vec![], vec![]);

    let mut contaminated = proposal();
    contaminated.motivation = "see [[RAW_OUTPUT]] from the last run".to_string();

    let outcome = orchestrator
        .run_debate(&contaminated, config())
        .await
        .unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    // All three degrade to revise/50: unanimous verdict, zero delta —
    // the debate terminates in one round.
    assert_eq!(completed.final_verdict, Verdict::Revise);
    assert_eq!(completed.rounds_completed, 1);

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    for output in &record.rounds[0].outputs {
        assert!(output
            .call_error
            .as_deref()
            .unwrap()
            .contains("prompt context validation failed"));
        assert!(output.provenance.is_none());
    }
}

#[tokio::test]
async fn token_usage_recorded_on_audit_trail() {
    let (orchestrator, store) = orchestrator_with(
        vec![reply("approve", 85.0, "fine", &[])],
        vec![reply("approve", 84.0, "fine", &[])],
        vec![reply("approve", 83.0, "fine", &[])],
    );

    let outcome = orchestrator.run_debate(&proposal(), config()).await.unwrap();
    let completed = match outcome {
        DebateOutcome::Completed(c) => c,
        other => panic!("expected completion, got {other:?}"),
    };

    let record = store.get_debate(completed.debate_id).await.unwrap().unwrap();
    for call in &record.rounds[0].calls {
        assert_eq!(call.usage.input_tokens, 100);
        assert_eq!(call.usage.output_tokens, 50);
        assert_eq!(call.attempt, 1);
        assert!(call.error.is_none());
    }
}
