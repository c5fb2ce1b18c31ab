//! Wiring: store, session, and the LLM-backed engine built on demand.

use std::path::Path;
use std::sync::Arc;

use promptsmith_eval::{
    AnthropicClient, BootstrapFewShot, Compiler, Evaluator, LabeledFewShot, LlmClient, LlmJudge,
    MetricEngine, Optimizer, PassthroughCompiler, ProcessorRegistry, ProgramRunner,
    SampleSynthesizer, Session, StructuredCall, Worker,
};
use promptsmith_storage::FsStore;
use tracing::debug;

use crate::config::Config;
use crate::error::CliError;

pub(crate) struct App {
    pub(crate) config: Config,
    pub(crate) store: Arc<FsStore>,
    pub(crate) session: Arc<Session>,
}

/// Components that talk to a model.
pub(crate) struct Engine {
    pub(crate) optimizer: Arc<Optimizer>,
    pub(crate) evaluator: Arc<Evaluator>,
    pub(crate) synthesizer: SampleSynthesizer,
}

impl App {
    pub(crate) fn open(home: &Path, config: Config) -> Result<Self, CliError> {
        let store = Arc::new(FsStore::open(home)?);
        let session = Arc::new(Session::new(store.clone(), store.clone()));
        debug!(home = %home.display(), "store opened");
        Ok(Self {
            config,
            store,
            session,
        })
    }

    /// The model to use when a command names none.
    pub(crate) fn model(&self, flag: Option<String>) -> String {
        flag.unwrap_or_else(|| self.config.default_model.clone())
    }

    /// Build the engine against the Anthropic API. Needs `ANTHROPIC_API_KEY`.
    pub(crate) fn engine(&self) -> Result<Engine, CliError> {
        let client = AnthropicClient::from_env()?.with_models(self.config.models.clone());
        Ok(self.engine_with(Arc::new(client)))
    }

    pub(crate) fn engine_with(&self, client: Arc<dyn LlmClient>) -> Engine {
        let call = StructuredCall::new(client);
        let judge = Arc::new(LlmJudge::new(call.clone()));
        let processors = ProcessorRegistry::builtin(self.config.policy.line_aggregation);
        let metric = Arc::new(MetricEngine::new(self.store.clone(), judge, processors));
        let predictor = Arc::new(ProgramRunner::new(call.clone()));

        let knobs = &self.config.compiler;
        let compiler: Arc<dyn Compiler> = if knobs.max_bootstrapped_demos > 0 {
            Arc::new(BootstrapFewShot)
        } else if knobs.max_labeled_demos > 0 {
            Arc::new(LabeledFewShot)
        } else {
            Arc::new(PassthroughCompiler)
        };

        let optimizer = Optimizer::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            compiler,
            predictor.clone(),
            metric.clone(),
        )
        .with_policy(self.config.policy)
        .with_config(self.config.compiler.clone());

        let evaluator = Evaluator::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            predictor,
            metric,
        )
        .with_concurrency(self.config.evaluation.concurrency);

        Engine {
            optimizer: Arc::new(optimizer),
            evaluator: Arc::new(evaluator),
            synthesizer: SampleSynthesizer::new(call),
        }
    }

    pub(crate) fn worker(&self, engine: &Engine) -> Worker {
        Worker::new(
            self.session.clone(),
            engine.optimizer.clone(),
            engine.evaluator.clone(),
        )
    }
}
