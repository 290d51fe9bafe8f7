//! Persona registry — the fixed catalog of evaluation roles.
//!
//! Three personas (safety / value / risk), each statically bound to a
//! distinct vendor family, each carrying a rubric, a system
//! instruction, and the prompt-building / response-parsing pair the
//! orchestrator uses every round.

use serde::{Deserialize, Serialize};

use crate::family::Family;
use crate::proposal::Proposal;

/// Evaluation role identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaId {
    Safety,
    Value,
    Risk,
}

impl PersonaId {
    /// All personas, in fan-out order.
    pub const ALL: [PersonaId; 3] = [PersonaId::Safety, PersonaId::Value, PersonaId::Risk];
}

impl std::fmt::Display for PersonaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Safety => write!(f, "safety"),
            Self::Value => write!(f, "value"),
            Self::Risk => write!(f, "risk"),
        }
    }
}

/// Evaluator verdict on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    Revise,
    Reject,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Revise => write!(f, "revise"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl Verdict {
    fn from_str_ci(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve),
            "revise" => Some(Self::Revise),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// One named, weighted rubric criterion.
#[derive(Debug, Clone, Serialize)]
pub struct RubricCriterion {
    pub name: &'static str,
    pub weight: f64,
}

/// A fixed evaluation role bound to one vendor family and model.
///
/// The rubric documents what the persona should weigh; the score
/// itself is self-reported by the model under the system instruction's
/// contract and is not mechanically recomputed from the rubric.
#[derive(Debug, Clone)]
pub struct Persona {
    pub id: PersonaId,
    pub family: Family,
    pub model_id: String,
    pub system_instruction: String,
    pub rubric: Vec<RubricCriterion>,
}

/// The response contract every system instruction imposes.
const RESPONSE_CONTRACT: &str = r#"Respond with a single JSON object and nothing else:
{"verdict": "approve" | "revise" | "reject", "score": <0-100>, "rationale": "<your reasoning>", "change_requests": ["<specific change>", ...]}"#;

fn safety_persona() -> Persona {
    Persona {
        id: PersonaId::Safety,
        family: Family::Anthropic,
        model_id: "claude-sonnet-4-20250514".to_string(),
        system_instruction: format!(
            "You are the safety evaluator on a governance panel reviewing proposed \
             self-modifications to an autonomous engineering pipeline. Judge whether the \
             change can cause harm, whether it is reversible, and how far a failure would \
             spread. Weigh: harm prevention (40%), reversibility (30%), blast radius (30%).\n\n{}",
            RESPONSE_CONTRACT
        ),
        rubric: vec![
            RubricCriterion {
                name: "harm_prevention",
                weight: 0.4,
            },
            RubricCriterion {
                name: "reversibility",
                weight: 0.3,
            },
            RubricCriterion {
                name: "blast_radius",
                weight: 0.3,
            },
        ],
    }
}

fn value_persona() -> Persona {
    Persona {
        id: PersonaId::Value,
        family: Family::OpenAi,
        model_id: "gpt-4o".to_string(),
        system_instruction: format!(
            "You are the value evaluator on a governance panel reviewing proposed \
             self-modifications to an autonomous engineering pipeline. Judge whether the \
             change is worth making at all. Weigh: expected benefit (40%), cost of change \
             (30%), strategic alignment (30%).\n\n{}",
            RESPONSE_CONTRACT
        ),
        rubric: vec![
            RubricCriterion {
                name: "expected_benefit",
                weight: 0.4,
            },
            RubricCriterion {
                name: "cost_of_change",
                weight: 0.3,
            },
            RubricCriterion {
                name: "strategic_alignment",
                weight: 0.3,
            },
        ],
    }
}

fn risk_persona() -> Persona {
    Persona {
        id: PersonaId::Risk,
        family: Family::Google,
        model_id: "gemini-1.5-pro".to_string(),
        system_instruction: format!(
            "You are the risk evaluator on a governance panel reviewing proposed \
             self-modifications to an autonomous engineering pipeline. Judge how the change \
             can fail and what operating it costs. Weigh: failure modes (35%), operational \
             complexity (35%), uncertainty (30%).\n\n{}",
            RESPONSE_CONTRACT
        ),
        rubric: vec![
            RubricCriterion {
                name: "failure_modes",
                weight: 0.35,
            },
            RubricCriterion {
                name: "operational_complexity",
                weight: 0.35,
            },
            RubricCriterion {
                name: "uncertainty",
                weight: 0.3,
            },
        ],
    }
}

/// Error constructing a custom registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry requires exactly 3 personas, got {0}")]
    WrongSize(usize),
    #[error("persona '{0}' appears more than once")]
    DuplicateRole(PersonaId),
    #[error("persona '{0}' is missing from the registry")]
    MissingRole(PersonaId),
    #[error("personas '{a}' and '{b}' share the vendor family '{family}'")]
    DuplicateFamily {
        a: PersonaId,
        b: PersonaId,
        family: Family,
    },
    #[error("persona '{0}' is bound to an unknown vendor family")]
    UnknownFamily(PersonaId),
}

/// Immutable three-entry persona table, constructed once at process
/// start and passed by reference into the orchestrator.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl PersonaRegistry {
    /// Build a registry, enforcing that the three personas cover each
    /// role exactly once and are bound to three mutually distinct
    /// known vendor families.
    pub fn new(personas: Vec<Persona>) -> Result<Self, RegistryError> {
        if personas.len() != 3 {
            return Err(RegistryError::WrongSize(personas.len()));
        }
        // Every role present exactly once, or `get` has no total
        // answer.
        for id in PersonaId::ALL {
            match personas.iter().filter(|p| p.id == id).count() {
                0 => return Err(RegistryError::MissingRole(id)),
                1 => {}
                _ => return Err(RegistryError::DuplicateRole(id)),
            }
        }
        for persona in &personas {
            if !persona.family.is_known() {
                return Err(RegistryError::UnknownFamily(persona.id));
            }
        }
        for (i, a) in personas.iter().enumerate() {
            for b in personas.iter().skip(i + 1) {
                if a.family == b.family {
                    return Err(RegistryError::DuplicateFamily {
                        a: a.id,
                        b: b.id,
                        family: a.family,
                    });
                }
            }
        }
        Ok(Self { personas })
    }

    /// The standard catalog: safety→anthropic, value→openai,
    /// risk→google.
    pub fn standard() -> Self {
        Self {
            personas: vec![safety_persona(), value_persona(), risk_persona()],
        }
    }

    /// Look up a persona definition.
    pub fn get(&self, id: PersonaId) -> &Persona {
        self.personas
            .iter()
            .find(|p| p.id == id)
            .expect("registry holds all three personas")
    }

    /// All personas in fan-out order.
    pub fn personas(&self) -> &[Persona] {
        &self.personas
    }

    /// The (role, model) pairs the diversity validator checks.
    pub fn evaluator_bindings(&self) -> Vec<crate::diversity::EvaluatorBinding> {
        self.personas
            .iter()
            .map(|p| crate::diversity::EvaluatorBinding {
                role: p.id,
                model_id: p.model_id.clone(),
            })
            .collect()
    }
}

/// Render the user prompt for one persona and round.
///
/// Round 0 carries only the proposal; later rounds append the digested
/// summary of the previous round and ask the evaluator to update its
/// assessment in light of peer feedback.
pub fn build_prompt(proposal: &Proposal, prior_round_summary: Option<&str>) -> String {
    let mut prompt = format!(
        "## Proposal: {}\n\n{}\n\n## Motivation\n\n{}\n\n## Scope\n\n{}\n\n## Affected components\n\n{}\n\n## Proposer risk assessment\n\n{}\n",
        proposal.title,
        proposal.summary,
        proposal.motivation,
        bullet_list(&proposal.scope),
        bullet_list(&proposal.affected_components),
        proposal.risk_level,
    );

    if let Some(summary) = prior_round_summary {
        prompt.push_str(&format!(
            "\n## Peer feedback from the previous round\n\n{}\n\nUpdate your assessment in light of the peer feedback above. \
             You may keep your verdict or change it; explain what moved or why nothing did.\n",
            summary
        ));
    }

    prompt
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none listed)".to_string();
    }
    items
        .iter()
        .map(|i| format!("- {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A parsed (or degraded) evaluator judgment, before provenance is
/// attached by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaJudgment {
    pub verdict: Verdict,
    /// Always clamped to [0, 100].
    pub score: f64,
    pub rationale: String,
    pub change_requests: Vec<String>,
    /// Set when the raw response could not be parsed and this judgment
    /// is the degraded substitute.
    pub parse_error: bool,
}

impl PersonaJudgment {
    /// The low-confidence substitute used when parsing fails. A
    /// malformed evaluator response must not crash the round.
    pub fn degraded(reason: &str, raw: &str) -> Self {
        Self {
            verdict: Verdict::Revise,
            score: 50.0,
            rationale: format!(
                "evaluator response could not be parsed ({}); raw excerpt: {}",
                reason,
                excerpt(raw, 160)
            ),
            change_requests: Vec::new(),
            parse_error: true,
        }
    }
}

/// Truncate text to at most `max` characters on a char boundary.
pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}…", cut)
}

/// Parse a raw evaluator response into a judgment.
///
/// Extracts the first balanced JSON object from the text, validates
/// the verdict and numeric score, and clamps the score to [0, 100].
/// Never fails: any parse or validation problem yields the degraded
/// judgment instead.
pub fn parse_response(raw: &str) -> PersonaJudgment {
    let Some(fragment) = first_json_object(raw) else {
        return PersonaJudgment::degraded("no JSON object found", raw);
    };

    let value: serde_json::Value = match serde_json::from_str(&fragment) {
        Ok(v) => v,
        Err(e) => return PersonaJudgment::degraded(&format!("invalid JSON: {}", e), raw),
    };

    let Some(verdict) = value
        .get("verdict")
        .and_then(|v| v.as_str())
        .and_then(Verdict::from_str_ci)
    else {
        return PersonaJudgment::degraded("missing or invalid 'verdict'", raw);
    };

    let Some(score) = value.get("score").and_then(|s| s.as_f64()) else {
        return PersonaJudgment::degraded("missing or non-numeric 'score'", raw);
    };

    let rationale = value
        .get("rationale")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .to_string();

    let change_requests = value
        .get("change_requests")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default();

    PersonaJudgment {
        verdict,
        score: score.clamp(0.0, 100.0),
        rationale,
        change_requests,
        parse_error: false,
    }
}

/// Extract the first balanced top-level JSON object from free text,
/// respecting string literals and escapes.
fn first_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
