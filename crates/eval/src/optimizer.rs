//! One optimization run: training set, base program, compile, publish.
//!
//! A run either registers exactly one new program and selects it, or
//! registers nothing and leaves the selection untouched.

use std::sync::Arc;

use promptsmith_storage::{
    timestamp_now, ProgramArtifact, ProgramMetadata, ProgramStore, Sample, SampleStore,
    Signature, SignatureCatalog, StorageError,
};
use tracing::{info, warn};

use crate::compiler::{CompileConfig, CompileContext, CompileError, Compiler, TrainingExample};
use crate::metric::{MetricEngine, SignatureMetric};
use crate::policy::{BaseLoadFailure, EnginePolicy};
use crate::program::Predictor;
use crate::session::Session;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeRequest {
    pub signature: String,
    pub model: String,
    /// Base program to start from; the session's current program when `None`.
    pub base_program_id: Option<String>,
    /// Model used by the judge inside the objective; `model` when `None`.
    pub judge_model: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("signature not found: {name}")]
    SignatureNotFound { name: String },
    #[error("no valid training data found for signature '{signature}'")]
    NoTrainingData { signature: String },
    #[error("base program {id} could not be loaded: {source}")]
    BaseLoad {
        id: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The starting point chosen for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseChoice {
    /// Built from the signature; no lineage.
    Fresh(ProgramArtifact),
    /// A prior program of the same signature.
    Base { id: String, artifact: ProgramArtifact },
}

impl BaseChoice {
    pub fn base_id(&self) -> Option<&str> {
        match self {
            BaseChoice::Fresh(_) => None,
            BaseChoice::Base { id, .. } => Some(id),
        }
    }

    fn into_artifact(self) -> ProgramArtifact {
        match self {
            BaseChoice::Fresh(a) | BaseChoice::Base { artifact: a, .. } => a,
        }
    }
}

pub struct Optimizer {
    catalog: Arc<dyn SignatureCatalog>,
    samples: Arc<dyn SampleStore>,
    programs: Arc<dyn ProgramStore>,
    compiler: Arc<dyn Compiler>,
    predictor: Arc<dyn Predictor>,
    metric: Arc<MetricEngine>,
    policy: EnginePolicy,
    config: CompileConfig,
}

impl Optimizer {
    pub fn new(
        catalog: Arc<dyn SignatureCatalog>,
        samples: Arc<dyn SampleStore>,
        programs: Arc<dyn ProgramStore>,
        compiler: Arc<dyn Compiler>,
        predictor: Arc<dyn Predictor>,
        metric: Arc<MetricEngine>,
    ) -> Self {
        Self {
            catalog,
            samples,
            programs,
            compiler,
            predictor,
            metric,
            policy: EnginePolicy::default(),
            config: CompileConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: EnginePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_config(mut self, config: CompileConfig) -> Self {
        self.config = config;
        self
    }

    /// Keep the samples that cover every signature field, restricted to
    /// those fields. The first input field is the split field.
    pub fn training_set(signature: &Signature, samples: &[Sample]) -> Vec<TrainingExample> {
        let split_field = signature.input_fields.first().cloned().unwrap_or_default();
        samples
            .iter()
            .filter(|s| signature.is_covered_by(s))
            .map(|s| TrainingExample {
                record: signature
                    .all_fields()
                    .filter_map(|f| s.get(f).map(|v| (f.clone(), v.clone())))
                    .collect(),
                split_field: split_field.clone(),
            })
            .collect()
    }

    /// Choose the starting program.
    ///
    /// `candidate` is usable iff it belongs to `signature` and its artifact
    /// is on disk. A usable candidate that fails to load is handled by the
    /// base-load-failure policy.
    pub fn choose_base(
        &self,
        signature: &Signature,
        candidate: Option<&str>,
    ) -> Result<BaseChoice, OptimizeError> {
        let fresh = || BaseChoice::Fresh(ProgramArtifact::from_signature(signature));

        let Some(id) = candidate else {
            info!(signature = %signature.name, "no base program, starting fresh");
            return Ok(fresh());
        };

        let usable = match self.programs.get(id) {
            Ok(meta) => meta.signature_name == signature.name && self.programs.artifact_exists(id),
            Err(_) => false,
        };
        if !usable {
            info!(
                signature = %signature.name,
                candidate = %id,
                "candidate base not usable for this signature, starting fresh"
            );
            return Ok(fresh());
        }

        match self.programs.load_artifact(id) {
            Ok(artifact) => {
                info!(signature = %signature.name, base = %id, "loaded base program");
                Ok(BaseChoice::Base {
                    id: id.to_string(),
                    artifact,
                })
            }
            Err(e) => match self.policy.base_load_failure {
                BaseLoadFailure::Fallback => {
                    warn!(base = %id, error = %e, "failed to load base program, starting fresh");
                    Ok(fresh())
                }
                BaseLoadFailure::Abort => Err(OptimizeError::BaseLoad {
                    id: id.to_string(),
                    source: e,
                }),
            },
        }
    }

    /// Run one optimization. On success the new program is registered and
    /// selected in `session`.
    pub async fn run(
        &self,
        session: &Session,
        request: OptimizeRequest,
    ) -> Result<ProgramMetadata, OptimizeError> {
        let signature = match self.catalog.get(&request.signature) {
            Ok(sig) => sig,
            Err(StorageError::SignatureNotFound { name }) => {
                return Err(OptimizeError::SignatureNotFound { name })
            }
            Err(e) => return Err(e.into()),
        };

        let samples = self.samples.load(&signature.name)?;
        let trainset = Self::training_set(&signature, &samples);
        if trainset.is_empty() {
            return Err(OptimizeError::NoTrainingData {
                signature: signature.name,
            });
        }

        let candidate = request
            .base_program_id
            .clone()
            .or_else(|| session.selection().program_id);
        let base = self.choose_base(&signature, candidate.as_deref())?;
        let base_program_id = base.base_id().map(str::to_string);

        info!(
            signature = %signature.name,
            model = %request.model,
            examples = trainset.len(),
            base = ?base_program_id,
            "optimization started"
        );

        let objective = SignatureMetric {
            engine: Arc::clone(&self.metric),
            signature: signature.clone(),
            judge_model: request
                .judge_model
                .clone()
                .unwrap_or_else(|| request.model.clone()),
        };
        let ctx = CompileContext {
            metric: &objective,
            predictor: self.predictor.as_ref(),
            trainset: &trainset,
            model: &request.model,
            config: &self.config,
        };
        let compiled = self.compiler.compile(base.into_artifact(), ctx).await?;

        let metadata = self.programs.create(
            &compiled,
            ProgramMetadata {
                id: String::new(),
                model: request.model.clone(),
                created_at: timestamp_now(),
                task_name: signature.task_description().to_string(),
                base_program_id,
                signature_name: signature.name.clone(),
                artifact_sha256: String::new(),
                previous_sha256: None,
            },
        )?;
        session.publish_program(&metadata);

        info!(program = %metadata.id, signature = %signature.name, "optimization finished");
        Ok(metadata)
    }
}
