//! Batch evaluation of a compiled program over a signature's samples.
//!
//! Every sample is predicted and judged independently. A failure on one
//! sample is recorded on that sample with score 0 and never stops the batch.
//! The average is taken over every sample, so failures pull it down.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use promptsmith_storage::{
    timestamp_now, ProgramArtifact, ProgramStore, Sample, SampleStore, Signature,
    SignatureCatalog, StorageError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::metric::MetricEngine;
use crate::program::{Prediction, Predictor};
use crate::session::Session;

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerSampleResult {
    /// Index into the signature's sample collection.
    pub sample_id: usize,
    pub inputs: Sample,
    pub expected: Sample,
    pub predicted: Prediction,
    /// In `[0, 1]`; 0 when `error` is set.
    pub overall_score: f64,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub time_taken_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub avg_score: f64,
    pub num_samples: usize,
    pub num_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub program_id: String,
    pub signature_name: String,
    pub model: String,
    pub judge_model: String,
    pub finished_at: String,
    pub metrics: EvaluationMetrics,
    /// In sample order.
    pub results: Vec<PerSampleResult>,
}

impl EvaluationResult {
    /// Results from lowest to highest score; ties keep sample order.
    pub fn ranked(&self) -> Vec<&PerSampleResult> {
        let mut ranked: Vec<&PerSampleResult> = self.results.iter().collect();
        ranked.sort_by(|a, b| a.overall_score.total_cmp(&b.overall_score));
        ranked
    }

    pub fn result(&self, sample_id: usize) -> Option<&PerSampleResult> {
        self.results.iter().find(|r| r.sample_id == sample_id)
    }
}

/// Render a `[0, 1]` score as a percentage for display.
pub fn as_percent(score: f64) -> f64 {
    score * 100.0
}

fn aggregate(results: &[PerSampleResult]) -> EvaluationMetrics {
    let num_samples = results.len();
    let total: f64 = results.iter().map(|r| r.overall_score).sum();
    EvaluationMetrics {
        avg_score: if num_samples == 0 {
            0.0
        } else {
            total / num_samples as f64
        },
        num_samples,
        num_errors: results.iter().filter(|r| r.error.is_some()).count(),
    }
}

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Preconditions that stop a run before any sample is touched.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("no program selected")]
    NoProgramSelected,
    #[error("program {id} has no artifact on disk")]
    ArtifactMissing { id: String },
    #[error("no samples found for signature '{signature}'")]
    NoSamples { signature: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

// ──────────────────────────────────────────────
// Evaluator
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluateRequest {
    /// Program to evaluate; the session's current program when `None`.
    pub program_id: Option<String>,
    pub model: String,
    /// Judge model; `model` when `None`.
    pub judge_model: Option<String>,
}

pub struct Evaluator {
    catalog: Arc<dyn SignatureCatalog>,
    samples: Arc<dyn SampleStore>,
    programs: Arc<dyn ProgramStore>,
    predictor: Arc<dyn Predictor>,
    metric: Arc<MetricEngine>,
    concurrency: usize,
}

impl Evaluator {
    pub fn new(
        catalog: Arc<dyn SignatureCatalog>,
        samples: Arc<dyn SampleStore>,
        programs: Arc<dyn ProgramStore>,
        predictor: Arc<dyn Predictor>,
        metric: Arc<MetricEngine>,
    ) -> Self {
        Self {
            catalog,
            samples,
            programs,
            predictor,
            metric,
            concurrency: 1,
        }
    }

    /// Samples in flight at once. Results keep sample order regardless.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolve the program, its artifact and signature for a run.
    pub fn prepare(
        &self,
        session: &Session,
        program_id: Option<&str>,
    ) -> Result<(String, ProgramArtifact, Signature), EvaluationError> {
        let program_id = match program_id {
            Some(id) => id.to_string(),
            None => session
                .selection()
                .program_id
                .ok_or(EvaluationError::NoProgramSelected)?,
        };
        let metadata = self.programs.get(&program_id)?;
        if !self.programs.artifact_exists(&program_id) {
            return Err(EvaluationError::ArtifactMissing { id: program_id });
        }
        let artifact = self.programs.load_artifact(&program_id)?;
        let signature = self.catalog.get(&metadata.signature_name)?;
        Ok((program_id, artifact, signature))
    }

    /// Evaluate a program over every sample of its signature.
    pub async fn run(
        &self,
        session: &Session,
        request: EvaluateRequest,
    ) -> Result<EvaluationResult, EvaluationError> {
        let (program_id, artifact, signature) =
            self.prepare(session, request.program_id.as_deref())?;

        let samples = self.samples.load(&signature.name)?;
        if samples.is_empty() {
            return Err(EvaluationError::NoSamples {
                signature: signature.name,
            });
        }

        let judge_model = request
            .judge_model
            .clone()
            .unwrap_or_else(|| request.model.clone());

        info!(
            program = %program_id,
            signature = %signature.name,
            samples = samples.len(),
            model = %request.model,
            judge_model = %judge_model,
            "evaluation started"
        );

        let futures: Vec<_> = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                self.evaluate_sample(
                    &artifact,
                    &signature,
                    i,
                    sample,
                    &request.model,
                    &judge_model,
                )
            })
            .collect();
        let results: Vec<PerSampleResult> = stream::iter(futures)
            .buffered(self.concurrency)
            .collect()
            .await;

        let metrics = aggregate(&results);
        info!(
            program = %program_id,
            avg_score = metrics.avg_score,
            errors = metrics.num_errors,
            "evaluation finished"
        );

        Ok(EvaluationResult {
            program_id,
            signature_name: signature.name,
            model: request.model,
            judge_model,
            finished_at: timestamp_now(),
            metrics,
            results,
        })
    }

    /// Predict and judge one sample. Never fails: errors are recorded on the
    /// result with score 0.
    pub async fn evaluate_sample(
        &self,
        artifact: &ProgramArtifact,
        signature: &Signature,
        sample_id: usize,
        sample: &Sample,
        model: &str,
        judge_model: &str,
    ) -> PerSampleResult {
        let pick = |fields: &[String]| -> Sample {
            fields
                .iter()
                .map(|f| (f.clone(), sample.get(f).cloned().unwrap_or_default()))
                .collect()
        };
        let mut result = PerSampleResult {
            sample_id,
            inputs: pick(&signature.input_fields),
            expected: pick(&signature.output_fields),
            predicted: Prediction::new(),
            overall_score: 0.0,
            explanation: String::new(),
            error: None,
            time_taken_ms: 0,
        };

        let started = Instant::now();
        let prediction = self.predictor.forward(artifact, &result.inputs, model).await;
        result.time_taken_ms = started.elapsed().as_millis() as u64;

        let prediction = match prediction {
            Ok(p) => p,
            Err(e) => {
                warn!(sample = sample_id, error = %e, "prediction failed");
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.predicted = prediction;

        match self
            .metric
            .score(sample, &result.predicted, Some(signature), judge_model)
            .await
        {
            Ok(score) => {
                result.overall_score = score.similarity;
                result.explanation = score.explanation;
            }
            Err(e) => {
                warn!(sample = sample_id, error = %e, "judging failed");
                result.error = Some(e.to_string());
            }
        }
        result
    }
}
