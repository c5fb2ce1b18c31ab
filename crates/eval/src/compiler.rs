//! The compiler seam.
//!
//! Prompt compilation proper is an external procedure. This crate hands it
//! a starting program, the metric to optimize and the training set, and
//! takes back whatever program it returns.

use async_trait::async_trait;
use promptsmith_storage::{ProgramArtifact, Sample};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::metric::Metric;
use crate::program::Predictor;

/// Lowest metric score at which a program's own prediction is kept as a
/// bootstrapped demonstration.
pub const BOOTSTRAP_MIN_SCORE: f64 = 0.5;

/// How much of the training set a compiler may run the program on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoBudget {
    #[default]
    Light,
    Medium,
    Heavy,
}

impl AutoBudget {
    /// Training examples tried at most.
    pub fn max_examples(self) -> usize {
        match self {
            AutoBudget::Light => 100,
            AutoBudget::Medium => 300,
            AutoBudget::Heavy => 1000,
        }
    }
}

/// Knobs passed through to the compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    pub auto: AutoBudget,
    /// Demonstrations made from the program's own passing predictions.
    pub max_bootstrapped_demos: usize,
    /// Demonstrations copied from labeled training records.
    pub max_labeled_demos: usize,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            auto: AutoBudget::Light,
            max_bootstrapped_demos: 0,
            max_labeled_demos: 4,
        }
    }
}

/// One training example: the full labeled record plus the name of the
/// input field used for supervised splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub record: Sample,
    pub split_field: String,
}

/// Everything a compiler may use besides the starting program.
pub struct CompileContext<'a> {
    pub metric: &'a dyn Metric,
    pub predictor: &'a dyn Predictor,
    pub trainset: &'a [TrainingExample],
    pub model: &'a str,
    pub config: &'a CompileConfig,
}

#[derive(Debug, thiserror::Error)]
#[error("compile failed: {message}")]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        program: ProgramArtifact,
        ctx: CompileContext<'_>,
    ) -> Result<ProgramArtifact, CompileError>;
}

/// Returns the starting program unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompiler;

#[async_trait]
impl Compiler for PassthroughCompiler {
    async fn compile(
        &self,
        program: ProgramArtifact,
        _ctx: CompileContext<'_>,
    ) -> Result<ProgramArtifact, CompileError> {
        Ok(program)
    }
}

/// Attaches the first `max_labeled_demos` training records as few-shot
/// demonstrations. Performs no search.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabeledFewShot;

#[async_trait]
impl Compiler for LabeledFewShot {
    async fn compile(
        &self,
        mut program: ProgramArtifact,
        ctx: CompileContext<'_>,
    ) -> Result<ProgramArtifact, CompileError> {
        program.demos = ctx
            .trainset
            .iter()
            .take(ctx.config.max_labeled_demos)
            .map(|ex| ex.record.clone())
            .collect();
        Ok(program)
    }
}

/// Runs the starting program over the training set and keeps up to
/// `max_bootstrapped_demos` predictions scoring at least
/// [`BOOTSTRAP_MIN_SCORE`] as demonstrations, then tops up with up to
/// `max_labeled_demos` unused labeled records.
///
/// At most `auto.max_examples()` examples are run. An example whose
/// prediction or scoring fails is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct BootstrapFewShot;

#[async_trait]
impl Compiler for BootstrapFewShot {
    async fn compile(
        &self,
        mut program: ProgramArtifact,
        ctx: CompileContext<'_>,
    ) -> Result<ProgramArtifact, CompileError> {
        let mut bootstrapped = Vec::new();
        let mut used = vec![false; ctx.trainset.len()];

        for (i, example) in ctx
            .trainset
            .iter()
            .enumerate()
            .take(ctx.config.auto.max_examples())
        {
            if bootstrapped.len() >= ctx.config.max_bootstrapped_demos {
                break;
            }
            let mut demo: Sample = program
                .input_fields
                .iter()
                .filter_map(|f| example.record.get(f).map(|v| (f.clone(), v.clone())))
                .collect();
            let prediction = match ctx.predictor.forward(&program, &demo, ctx.model).await {
                Ok(prediction) => prediction,
                Err(e) => {
                    debug!(example = i, error = %e, "bootstrap prediction failed");
                    continue;
                }
            };
            let score = match ctx.metric.evaluate(&example.record, &prediction).await {
                Ok(score) => score,
                Err(e) => {
                    debug!(example = i, error = %e, "bootstrap scoring failed");
                    continue;
                }
            };
            if score < BOOTSTRAP_MIN_SCORE {
                continue;
            }
            for field in &program.output_fields {
                if let Some(value) = prediction.get(field) {
                    demo.insert(field.clone(), value.clone());
                }
            }
            used[i] = true;
            bootstrapped.push(demo);
        }

        let labeled = ctx
            .trainset
            .iter()
            .zip(&used)
            .filter(|(_, used)| !**used)
            .take(ctx.config.max_labeled_demos)
            .map(|(ex, _)| ex.record.clone());
        let bootstrapped_count = bootstrapped.len();
        program.demos = bootstrapped.into_iter().chain(labeled).collect();
        info!(
            bootstrapped = bootstrapped_count,
            total = program.demos.len(),
            "demonstrations selected"
        );
        Ok(program)
    }
}
