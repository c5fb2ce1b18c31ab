//! Engine-wide policy switches.
//!
//! Two behaviors have more than one defensible answer: how per-line PLN
//! scores fold into a field score, and what an optimization run does when
//! the selected base program cannot be loaded. Both are configured here
//! rather than hard-coded at the call sites.

use serde::{Deserialize, Serialize};

/// How per-line scores of a list field combine into one field score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineAggregation {
    #[default]
    Mean,
    Min,
}

impl LineAggregation {
    /// Fold per-line scores. An empty list scores 1.0.
    pub fn aggregate(self, scores: &[f64]) -> f64 {
        if scores.is_empty() {
            return 1.0;
        }
        match self {
            LineAggregation::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
            LineAggregation::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

/// What an optimization run does when the usable base program fails to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseLoadFailure {
    /// Start from a fresh program built from the signature.
    #[default]
    Fallback,
    /// Abort the run.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnginePolicy {
    pub line_aggregation: LineAggregation,
    pub base_load_failure: BaseLoadFailure,
}
