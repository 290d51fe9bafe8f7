//! Diversity validation — the separation invariant that gives the
//! debate consensus its statistical meaning.
//!
//! If every evaluator descends from the proposer's model family, their
//! agreement is not independent evidence. Both checks here are pure
//! advisory-gate functions: they report violations and warnings, and
//! the orchestrator decides what to do with a failing report.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::family::{classify, Family};
use crate::personas::PersonaId;

/// Machine-readable violation category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// The proposer's family could not be resolved; separation cannot
    /// be proven against an unknown family.
    UnknownProposerFamily,
    /// An evaluator resolves to the proposer's family.
    FamilyCollision,
    /// Fewer than two distinct known evaluator families.
    InsufficientDiversity,
    /// A structural leak marker appeared in an assembled prompt.
    ContextContamination,
    /// Another persona's raw JSON output appeared in a prompt.
    RawTranscriptLeak,
}

impl std::fmt::Display for ViolationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProposerFamily => write!(f, "unknown_proposer_family"),
            Self::FamilyCollision => write!(f, "family_collision"),
            Self::InsufficientDiversity => write!(f, "insufficient_diversity"),
            Self::ContextContamination => write!(f, "context_contamination"),
            Self::RawTranscriptLeak => write!(f, "raw_transcript_leak"),
        }
    }
}

/// A single validation violation with its category and detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: ViolationCode,
    pub message: String,
}

impl Violation {
    fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Summary code for a separation check: the first violation's code, or
/// the pass marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    SeparationOk,
    UnknownProposerFamily,
    FamilyCollision,
    InsufficientDiversity,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SeparationOk => write!(f, "separation_ok"),
            Self::UnknownProposerFamily => write!(f, "unknown_proposer_family"),
            Self::FamilyCollision => write!(f, "family_collision"),
            Self::InsufficientDiversity => write!(f, "insufficient_diversity"),
        }
    }
}

/// An evaluator role paired with its configured model id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluatorBinding {
    pub role: PersonaId,
    pub model_id: String,
}

/// Result of [`validate_separation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationReport {
    pub passed: bool,
    pub reason_code: ReasonCode,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
    /// Resolved family per evaluator role, plus the proposer.
    pub proposer_family: Family,
    pub evaluator_families: HashMap<PersonaId, Family>,
}

/// Validate the separation invariant over a proposed
/// (proposer, evaluator-set) configuration.
///
/// Rules, in order: an unknown proposer family is itself a violation;
/// every evaluator sharing the proposer's family is a collision;
/// unknown evaluator families warn and are excluded from diversity
/// counting; the distinct known evaluator families must number at
/// least two; duplicate known families among evaluators warn.
pub fn validate_separation(
    proposer_model_id: &str,
    evaluators: &[EvaluatorBinding],
) -> SeparationReport {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    let proposer_family = classify(proposer_model_id);
    if proposer_family == Family::Unknown {
        violations.push(Violation::new(
            ViolationCode::UnknownProposerFamily,
            format!(
                "proposer model '{}' resolves to an unknown family; separation cannot be proven",
                proposer_model_id
            ),
        ));
    }

    let mut evaluator_families = HashMap::new();
    let mut known_counts: HashMap<Family, u32> = HashMap::new();

    for evaluator in evaluators {
        let family = classify(&evaluator.model_id);
        evaluator_families.insert(evaluator.role, family);

        if family == Family::Unknown {
            warnings.push(format!(
                "evaluator '{}' model '{}' resolves to an unknown family; excluded from diversity count",
                evaluator.role, evaluator.model_id
            ));
            continue;
        }

        if proposer_family.is_known() && family == proposer_family {
            violations.push(Violation::new(
                ViolationCode::FamilyCollision,
                format!(
                    "evaluator '{}' ({}) shares the proposer family '{}'",
                    evaluator.role, evaluator.model_id, proposer_family
                ),
            ));
        }

        *known_counts.entry(family).or_default() += 1;
    }

    if known_counts.len() < 2 {
        violations.push(Violation::new(
            ViolationCode::InsufficientDiversity,
            format!(
                "evaluators span {} known famil{}, need at least 2",
                known_counts.len(),
                if known_counts.len() == 1 { "y" } else { "ies" }
            ),
        ));
    }

    for (family, count) in &known_counts {
        if *count > 1 {
            warnings.push(format!(
                "{} evaluators share the '{}' family; check persona configuration",
                count, family
            ));
        }
    }

    let reason_code = match violations.first().map(|v| v.code) {
        None => ReasonCode::SeparationOk,
        Some(ViolationCode::UnknownProposerFamily) => ReasonCode::UnknownProposerFamily,
        Some(ViolationCode::FamilyCollision) => ReasonCode::FamilyCollision,
        _ => ReasonCode::InsufficientDiversity,
    };

    SeparationReport {
        passed: violations.is_empty(),
        reason_code,
        violations,
        warnings,
        proposer_family,
        evaluator_families,
    }
}

/// Markers that only ever exist inside internal buffers. Their presence
/// in an assembled prompt means a digesting step was bypassed.
const LEAK_MARKERS: &[&str] = &["[[RAW_OUTPUT]]", "<internal:", "BEGIN RAW TRANSCRIPT"];

/// Result of [`validate_prompt_context`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptContextReport {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

/// Scan a fully-assembled prompt for leaked cross-evaluator content.
///
/// Round n's input is a derived digest of round n-1, never a raw
/// per-evaluator payload. This check is the mechanical guarantee that
/// the digesting step cannot be silently bypassed.
pub fn validate_prompt_context(prompt: &str, current: PersonaId) -> PromptContextReport {
    let mut violations = Vec::new();

    for marker in LEAK_MARKERS {
        if prompt.contains(marker) {
            violations.push(Violation::new(
                ViolationCode::ContextContamination,
                format!("structural leak marker '{}' found in prompt", marker),
            ));
        }
    }

    for persona in PersonaId::ALL {
        if persona == current {
            continue;
        }
        // A JSON fragment carrying another persona's role tag followed
        // by a rationale field looks like its raw output.
        let pattern = format!(
            r#""role"\s*:\s*"{}"[\s\S]{{0,200}}?"rationale"\s*:"#,
            persona
        );
        let re = Regex::new(&pattern).expect("static leak pattern");
        if re.is_match(prompt) {
            violations.push(Violation::new(
                ViolationCode::RawTranscriptLeak,
                format!("raw output fragment from persona '{}' found in prompt", persona),
            ));
        }
    }

    PromptContextReport {
        passed: violations.is_empty(),
        violations,
    }
}

/// Error raised when separation is used as a hard precondition.
#[derive(Debug, Clone, thiserror::Error)]
#[error("diversity validation failed ({reason_code}): {}", summary(.violations))]
pub struct DiversityError {
    pub reason_code: ReasonCode,
    pub violations: Vec<Violation>,
    pub warnings: Vec<String>,
}

fn summary(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A configuration that has passed the separation gate.
#[derive(Debug, Clone)]
pub struct ValidatedDebateConfig {
    pub proposer_model_id: String,
    pub evaluators: Vec<EvaluatorBinding>,
    pub report: SeparationReport,
}

/// Run the separation check as a hard precondition, yielding a
/// structured error carrying the violation list when it fails.
pub fn build_validated_config(
    proposer_model_id: &str,
    evaluators: Vec<EvaluatorBinding>,
) -> Result<ValidatedDebateConfig, DiversityError> {
    let report = validate_separation(proposer_model_id, &evaluators);
    if !report.passed {
        return Err(DiversityError {
            reason_code: report.reason_code,
            violations: report.violations,
            warnings: report.warnings,
        });
    }
    Ok(ValidatedDebateConfig {
        proposer_model_id: proposer_model_id.to_string(),
        evaluators,
        report,
    })
}
