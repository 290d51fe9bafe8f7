//! Per-round consensus check: majority verdict plus bounded score
//! dispersion.

use std::collections::HashMap;

use crate::personas::Verdict;

use super::types::{ConsensusCheck, PersonaOutput};

/// Check one round's outputs for consensus.
///
/// Consensus holds iff at least 2 of the 3 verdicts agree and the
/// score spread (max − min) stays within `threshold`. The reason
/// string records which condition failed.
pub fn check_consensus(outputs: &[PersonaOutput], threshold: f64) -> ConsensusCheck {
    let scores: Vec<f64> = outputs.iter().map(|o| o.judgment.score).collect();
    let average_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    let max = scores.iter().cloned().fold(f64::MIN, f64::max);
    let min = scores.iter().cloned().fold(f64::MAX, f64::min);
    let score_delta = if scores.is_empty() { 0.0 } else { max - min };

    let mut counts: HashMap<Verdict, usize> = HashMap::new();
    for output in outputs {
        *counts.entry(output.judgment.verdict).or_default() += 1;
    }
    let majority_verdict = counts
        .iter()
        .find(|(_, &count)| count * 2 > outputs.len())
        .map(|(&verdict, _)| verdict);

    let (reached, reason) = match majority_verdict {
        None => (false, Some("no_majority_verdict".to_string())),
        Some(_) if score_delta > threshold => (
            false,
            Some(format!(
                "score_delta_too_high: {} > {}",
                score_delta, threshold
            )),
        ),
        Some(_) => (true, None),
    };

    ConsensusCheck {
        reached,
        majority_verdict,
        average_score,
        score_delta,
        threshold,
        reason,
    }
}
