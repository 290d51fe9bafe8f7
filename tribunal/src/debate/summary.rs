//! Round digests — the derived, non-raw context handed to the next
//! round.
//!
//! Evaluators never see each other's raw payloads; they see this
//! digest. The prompt-context validator downstream enforces that
//! nothing else leaks through.

use crate::personas::excerpt;

use super::types::PersonaOutput;

const RATIONALE_EXCERPT_LEN: usize = 200;
const CHANGE_REQUESTS_PER_PERSONA: usize = 2;

/// Produce the deterministic digest of one round: per persona, the
/// verdict, score, a rationale excerpt, and up to two change requests.
pub fn digest_round(index: u32, outputs: &[PersonaOutput]) -> String {
    let mut lines = vec![format!("Round {} positions:", index + 1)];

    for output in outputs {
        lines.push(format!(
            "- {} evaluator: {} (score {:.0}). {}",
            output.persona,
            output.judgment.verdict,
            output.judgment.score,
            excerpt(&output.judgment.rationale, RATIONALE_EXCERPT_LEN),
        ));
        for request in output
            .judgment
            .change_requests
            .iter()
            .take(CHANGE_REQUESTS_PER_PERSONA)
        {
            lines.push(format!("  - requested: {}", request));
        }
    }

    lines.join("\n")
}
