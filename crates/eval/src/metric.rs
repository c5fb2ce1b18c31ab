//! The scoring objective: judge similarity discounted by syntactic quality.
//!
//! For one (example, prediction) pair the engine processes every predicted
//! output field, asks the judge to compare processed predictions with the
//! unprocessed expected values, and multiplies the judge's similarity by the
//! mean processing score. Malformed output can only lower a score.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use promptsmith_storage::{FieldValue, Sample, Signature, SignatureCatalog, StorageError};
use tracing::{debug, warn};

use crate::judge::{Judge, JudgeSynthesizer};
use crate::processor::ProcessorRegistry;
use crate::program::Prediction;
use crate::structured::CallError;

/// Similarity returned when no signature matches the example.
pub const UNRESOLVED_SIMILARITY: f64 = 0.5;
pub const UNRESOLVED_EXPLANATION: &str = "could not determine signature type";

#[derive(Debug, thiserror::Error)]
pub enum MetricError {
    #[error("signature lookup failed: {0}")]
    Catalog(#[from] StorageError),
    #[error("judge call failed: {0}")]
    Judge(#[from] CallError),
}

/// One scored prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// `raw_similarity * processing_score`, in `[0, 1]`.
    pub similarity: f64,
    pub explanation: String,
    pub raw_similarity: f64,
    /// Mean of per-field processing scores; 1.0 with no output fields.
    pub processing_score: f64,
    pub field_scores: BTreeMap<String, f64>,
}

impl Score {
    fn unresolved() -> Self {
        Self {
            similarity: UNRESOLVED_SIMILARITY,
            explanation: UNRESOLVED_EXPLANATION.to_string(),
            raw_similarity: UNRESOLVED_SIMILARITY,
            processing_score: 1.0,
            field_scores: BTreeMap::new(),
        }
    }
}

pub struct MetricEngine {
    catalog: Arc<dyn SignatureCatalog>,
    judge: Arc<dyn Judge>,
    processors: ProcessorRegistry,
}

impl MetricEngine {
    pub fn new(
        catalog: Arc<dyn SignatureCatalog>,
        judge: Arc<dyn Judge>,
        processors: ProcessorRegistry,
    ) -> Self {
        Self {
            catalog,
            judge,
            processors,
        }
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    /// Pick the signature an example belongs to.
    ///
    /// `hint` wins when the example covers its fields; otherwise the first
    /// catalog signature (by name) whose fields the example covers. A
    /// catalog read failure is an error, never a guess.
    pub fn resolve_signature(
        &self,
        example: &Sample,
        hint: Option<&Signature>,
    ) -> Result<Option<Signature>, MetricError> {
        if let Some(sig) = hint {
            if sig.is_covered_by(example) {
                return Ok(Some(sig.clone()));
            }
            debug!(signature = %sig.name, "example does not cover hinted signature");
        }
        let found = self
            .catalog
            .list()?
            .into_iter()
            .find(|sig| sig.is_covered_by(example));
        Ok(found)
    }

    /// Score one prediction against its example.
    pub async fn score(
        &self,
        example: &Sample,
        prediction: &Prediction,
        signature: Option<&Signature>,
        judge_model: &str,
    ) -> Result<Score, MetricError> {
        let Some(signature) = self.resolve_signature(example, signature)? else {
            warn!("no signature matches example fields, using fallback score");
            return Ok(Score::unresolved());
        };

        let schema = JudgeSynthesizer::synthesize(&signature);

        let mut processed: BTreeMap<String, FieldValue> = BTreeMap::new();
        let mut field_scores = BTreeMap::new();
        for field in &signature.output_fields {
            let value = prediction.get(field).cloned().unwrap_or_default();
            let out = self.processors.process(field, &value, &signature);
            processed.insert(field.clone(), out.value);
            field_scores.insert(field.clone(), out.score);
        }

        let arguments = JudgeSynthesizer::arguments(&signature, example, &processed);
        let verdict = self.judge.judge(&schema, &arguments, judge_model).await?;

        let processing_score = if field_scores.is_empty() {
            1.0
        } else {
            field_scores.values().sum::<f64>() / field_scores.len() as f64
        };
        let similarity = verdict.similarity * processing_score;

        debug!(
            signature = %signature.name,
            raw = verdict.similarity,
            processing = processing_score,
            similarity,
            "scored prediction"
        );

        Ok(Score {
            similarity,
            explanation: verdict.explanation,
            raw_similarity: verdict.similarity,
            processing_score,
            field_scores,
        })
    }
}

/// An objective function over (example, prediction) pairs, as handed to a
/// compiler.
#[async_trait]
pub trait Metric: Send + Sync {
    async fn evaluate(&self, example: &Sample, prediction: &Prediction) -> Result<f64, MetricError>;
}

/// [`MetricEngine`] bound to one signature and judge model.
pub struct SignatureMetric {
    pub engine: Arc<MetricEngine>,
    pub signature: Signature,
    pub judge_model: String,
}

#[async_trait]
impl Metric for SignatureMetric {
    async fn evaluate(&self, example: &Sample, prediction: &Prediction) -> Result<f64, MetricError> {
        let score = self
            .engine
            .score(example, prediction, Some(&self.signature), &self.judge_model)
            .await?;
        Ok(score.similarity)
    }
}
