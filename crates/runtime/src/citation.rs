//! Citation gate: corroboration and authority checks on candidate answers.

use sleuth_core::{authority_score, Dtype, EvidencePolicy, MagicVariable};

/// Minimum authority score for a source to satisfy `require_authority`.
const AUTHORITY_FLOOR: u8 = 70;

/// Result of gating one candidate answer.
#[derive(Debug, Clone)]
pub struct GateReport {
    pub ok: bool,
    pub issues: Vec<String>,
}

/// Variables holding dates, numbers, or short strings are too easy to get
/// wrong from a single page; they always need two agreeing sources, as does
/// anything that looks like a founding date.
fn needs_double_corroboration(variable: &MagicVariable) -> bool {
    if matches!(variable.dtype, Dtype::Date | Dtype::Number | Dtype::String) {
        return true;
    }
    let name = variable.name.to_lowercase();
    name.contains("found") && name.contains("date")
}

/// Evaluate every variable in a candidate final answer against the evidence
/// policy.
pub fn evaluate_citations(variables: &[MagicVariable], policy: &EvidencePolicy) -> GateReport {
    let mut issues = Vec::new();

    for variable in variables {
        let count = variable.sources.len();
        let min = policy.min_corroboration as usize;

        if count < min {
            issues.push(format!(
                "variable {:?} has {count} source(s), policy requires at least {min}",
                variable.name
            ));
            continue;
        }

        if needs_double_corroboration(variable) && count < 2 {
            issues.push(format!(
                "variable {:?} ({:?}) needs ≥ 2 agreeing sources, found {count}",
                variable.name, variable.dtype
            ));
            continue;
        }

        if policy.require_authority {
            let best = variable
                .sources
                .iter()
                .map(|s| authority_score(&s.url))
                .max()
                .unwrap_or(0);
            if best < AUTHORITY_FLOOR {
                issues.push(format!(
                    "variable {:?} has no authoritative source (best score {best}, need ≥ {AUTHORITY_FLOOR})",
                    variable.name
                ));
            }
        }
    }

    GateReport {
        ok: issues.is_empty(),
        issues,
    }
}
