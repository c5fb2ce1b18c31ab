//! End-to-end runs of the optimizer, evaluator and worker over a real
//! on-disk store, with the LLM-facing seams stubbed.

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use promptsmith_eval::{
    CallError, CallSchema, CompileContext, CompileError, Compiler, EvaluateRequest,
    EvaluationError, Evaluator, JobKind, Judge, MetricEngine, OptimizeError, OptimizeRequest,
    Optimizer, PassthroughCompiler, Prediction, Predictor, ProcessorRegistry, Session,
    StartOutcome, Verdict, Worker,
};
use promptsmith_eval::{BaseLoadFailure, EnginePolicy, LlmError};
use promptsmith_storage::{
    FieldValue, FsStore, ProgramArtifact, ProgramStore, Sample, SampleStore, Signature,
    SignatureCatalog, ARTIFACT_FILE,
};
use tempfile::TempDir;
use tokio::sync::Notify;

// ──────────────────────────────────────────────
// Stubs
// ──────────────────────────────────────────────

struct FixedJudge(f64);

#[async_trait]
impl Judge for FixedJudge {
    async fn judge(
        &self,
        _schema: &CallSchema,
        _arguments: &BTreeMap<String, FieldValue>,
        _model: &str,
    ) -> Result<Verdict, CallError> {
        Ok(Verdict {
            similarity: self.0,
            explanation: "close enough".to_string(),
        })
    }
}

/// Answers "y" for every question except "bad", which fails.
struct EchoPredictor;

#[async_trait]
impl Predictor for EchoPredictor {
    async fn forward(
        &self,
        _program: &ProgramArtifact,
        inputs: &Sample,
        _model: &str,
    ) -> Result<Prediction, CallError> {
        if inputs.get("q") == Some(&FieldValue::from("bad")) {
            return Err(CallError::Llm(LlmError::Network("connection reset".to_string())));
        }
        let mut out = Prediction::new();
        out.insert("a".to_string(), "y".into());
        Ok(out)
    }
}

/// Blocks inside `compile` until released.
struct GatedCompiler {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Compiler for GatedCompiler {
    async fn compile(
        &self,
        program: ProgramArtifact,
        _ctx: CompileContext<'_>,
    ) -> Result<ProgramArtifact, CompileError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(program)
    }
}

struct FailingCompiler;

#[async_trait]
impl Compiler for FailingCompiler {
    async fn compile(
        &self,
        _program: ProgramArtifact,
        _ctx: CompileContext<'_>,
    ) -> Result<ProgramArtifact, CompileError> {
        Err(CompileError::new("search diverged"))
    }
}

// ──────────────────────────────────────────────
// Harness
// ──────────────────────────────────────────────

struct Harness {
    dir: TempDir,
    store: Arc<FsStore>,
    session: Arc<Session>,
    metric: Arc<MetricEngine>,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsStore::open(dir.path()).unwrap());
        store.add(signature("qa")).unwrap();
        store.add(signature("empty")).unwrap();
        let session = Arc::new(Session::new(store.clone(), store.clone()));
        let metric = Arc::new(MetricEngine::new(
            store.clone(),
            Arc::new(FixedJudge(0.9)),
            ProcessorRegistry::new(),
        ));
        Harness {
            dir,
            store,
            session,
            metric,
        }
    }

    fn add_sample(&self, q: &str, a: &str) {
        let mut sample = Sample::new();
        sample.insert("q".to_string(), q.into());
        sample.insert("a".to_string(), a.into());
        self.store.append(&signature("qa"), sample).unwrap();
    }

    fn optimizer(&self, compiler: Arc<dyn Compiler>) -> Optimizer {
        Optimizer::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            compiler,
            Arc::new(EchoPredictor),
            self.metric.clone(),
        )
    }

    fn evaluator(&self) -> Evaluator {
        Evaluator::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            Arc::new(EchoPredictor),
            self.metric.clone(),
        )
    }

    fn worker(&self, compiler: Arc<dyn Compiler>) -> Worker {
        Worker::new(
            self.session.clone(),
            Arc::new(self.optimizer(compiler)),
            Arc::new(self.evaluator()),
        )
    }

    fn program_count(&self) -> usize {
        ProgramStore::list(self.store.as_ref()).unwrap().len()
    }

    fn corrupt_artifact(&self, id: &str) {
        let path = self.dir.path().join("programs").join(id).join(ARTIFACT_FILE);
        fs::write(path, b"{\"not\": \"a program\"}").unwrap();
    }
}

fn signature(name: &str) -> Signature {
    Signature {
        name: name.to_string(),
        description: format!("{name} task"),
        instructions: "Answer the question.".to_string(),
        input_fields: vec!["q".to_string()],
        output_fields: vec!["a".to_string()],
        field_processors: BTreeMap::new(),
    }
}

fn optimize(signature: &str) -> OptimizeRequest {
    OptimizeRequest {
        signature: signature.to_string(),
        model: "test-model".to_string(),
        base_program_id: None,
        judge_model: None,
    }
}

fn evaluate() -> EvaluateRequest {
    EvaluateRequest {
        program_id: None,
        model: "test-model".to_string(),
        judge_model: None,
    }
}

// ──────────────────────────────────────────────
// Optimization
// ──────────────────────────────────────────────

#[tokio::test]
async fn optimization_in_background_registers_and_selects_program() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let worker = h.worker(Arc::new(PassthroughCompiler));

    let StartOutcome::Started(handle) = worker.start_optimization(optimize("qa")) else {
        panic!("optimization should start");
    };
    handle.wait().await;

    assert_eq!(h.program_count(), 1);
    let status = h.session.status(JobKind::Optimization);
    assert!(!status.running);
    assert_eq!(status.last_error, None);

    let selected = h.session.selection().program_id.unwrap();
    assert_eq!(status.last_program_id.as_deref(), Some(selected.as_str()));
    let meta = ProgramStore::get(h.store.as_ref(), &selected).unwrap();
    assert_eq!(meta.signature_name, "qa");
    assert_eq!(meta.task_name, "qa task");
    assert_eq!(meta.base_program_id, None);
}

#[tokio::test]
async fn second_optimization_refused_while_first_runs() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let worker = h.worker(Arc::new(GatedCompiler {
        entered: entered.clone(),
        release: release.clone(),
    }));

    let StartOutcome::Started(handle) = worker.start_optimization(optimize("qa")) else {
        panic!("first optimization should start");
    };
    entered.notified().await;
    assert!(h.session.is_running(JobKind::Optimization));

    let second = worker.start_optimization(optimize("qa"));
    assert!(matches!(second, StartOutcome::AlreadyRunning));

    release.notify_one();
    handle.wait().await;

    assert_eq!(h.program_count(), 1);
    assert!(!h.session.is_running(JobKind::Optimization));
}

#[tokio::test]
async fn failed_optimization_records_error_and_frees_slot() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let worker = h.worker(Arc::new(FailingCompiler));

    let StartOutcome::Started(handle) = worker.start_optimization(optimize("qa")) else {
        panic!("optimization should start");
    };
    handle.wait().await;

    let status = h.session.status(JobKind::Optimization);
    assert!(!status.running);
    assert!(status.last_error.unwrap().contains("search diverged"));
    assert_eq!(h.program_count(), 0);
    assert_eq!(h.session.selection().program_id, None);
}

#[tokio::test]
async fn optimization_needs_training_data() {
    let h = Harness::new();
    let mut partial = Sample::new();
    partial.insert("q".to_string(), "only a question".into());
    h.store.save("qa", &[partial]).unwrap();

    let err = h
        .optimizer(Arc::new(PassthroughCompiler))
        .run(&h.session, optimize("qa"))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::NoTrainingData { .. }));
    assert_eq!(h.program_count(), 0);
}

#[tokio::test]
async fn unknown_signature_rejected() {
    let h = Harness::new();
    let err = h
        .optimizer(Arc::new(PassthroughCompiler))
        .run(&h.session, optimize("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, OptimizeError::SignatureNotFound { .. }));
}

#[tokio::test]
async fn current_program_becomes_base_of_next_run() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let optimizer = h.optimizer(Arc::new(PassthroughCompiler));

    let first = optimizer.run(&h.session, optimize("qa")).await.unwrap();
    let second = optimizer.run(&h.session, optimize("qa")).await.unwrap();

    assert_eq!(second.base_program_id.as_deref(), Some(first.id.as_str()));
    let base = ProgramStore::get(h.store.as_ref(), &first.id).unwrap();
    assert_eq!(base.signature_name, second.signature_name);
}

#[tokio::test]
async fn base_of_other_signature_is_ignored() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let pln = h.session.new_program("PLNTask", "test-model", None).unwrap();

    let mut request = optimize("qa");
    request.base_program_id = Some(pln.id.clone());
    let meta = h
        .optimizer(Arc::new(PassthroughCompiler))
        .run(&h.session, request)
        .await
        .unwrap();
    assert_eq!(meta.base_program_id, None);
}

#[tokio::test]
async fn unreadable_base_falls_back_to_fresh_program() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let base = h.session.new_program("qa", "test-model", None).unwrap();
    h.corrupt_artifact(&base.id);

    let meta = h
        .optimizer(Arc::new(PassthroughCompiler))
        .run(&h.session, optimize("qa"))
        .await
        .unwrap();
    assert_eq!(meta.base_program_id, None);
    assert_eq!(h.session.selection().program_id, Some(meta.id.clone()));

    let artifact = h.store.load_artifact(&meta.id).unwrap();
    assert_eq!(artifact, ProgramArtifact::from_signature(&signature("qa")));
}

#[tokio::test]
async fn unreadable_base_aborts_under_abort_policy() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let base = h.session.new_program("qa", "test-model", None).unwrap();
    h.corrupt_artifact(&base.id);

    let optimizer = h
        .optimizer(Arc::new(PassthroughCompiler))
        .with_policy(EnginePolicy {
            base_load_failure: BaseLoadFailure::Abort,
            ..EnginePolicy::default()
        });
    let err = optimizer.run(&h.session, optimize("qa")).await.unwrap_err();
    assert!(matches!(err, OptimizeError::BaseLoad { .. }));
    assert_eq!(h.program_count(), 1);
    assert_eq!(h.session.selection().program_id, Some(base.id));
}

// ──────────────────────────────────────────────
// Evaluation
// ──────────────────────────────────────────────

#[tokio::test]
async fn evaluation_averages_over_every_sample() {
    let h = Harness::new();
    h.add_sample("x", "y");
    h.add_sample("bad", "y");
    h.add_sample("z", "y");
    h.add_sample("bad", "y");
    h.session.new_program("qa", "test-model", None).unwrap();

    let result = h.evaluator().run(&h.session, evaluate()).await.unwrap();

    assert_eq!(result.metrics.num_samples, 4);
    assert_eq!(result.metrics.num_errors, 2);
    assert!((result.metrics.avg_score - 0.45).abs() < 1e-9);

    let ids: Vec<usize> = result.results.iter().map(|r| r.sample_id).collect();
    assert_eq!(ids, vec![0, 1, 2, 3]);
    let failed = result.result(1).unwrap();
    assert_eq!(failed.overall_score, 0.0);
    assert!(failed.error.as_deref().unwrap().contains("connection reset"));
    assert_eq!(result.ranked()[0].sample_id, 1);
    assert_eq!(result.judge_model, "test-model");
}

#[tokio::test]
async fn concurrent_evaluation_keeps_sample_order() {
    let h = Harness::new();
    for i in 0..6 {
        h.add_sample(&format!("q{i}"), "y");
    }
    h.session.new_program("qa", "test-model", None).unwrap();

    let result = h
        .evaluator()
        .with_concurrency(3)
        .run(&h.session, evaluate())
        .await
        .unwrap();
    let ids: Vec<usize> = result.results.iter().map(|r| r.sample_id).collect();
    assert_eq!(ids, (0..6).collect::<Vec<_>>());
    assert!((result.metrics.avg_score - 0.9).abs() < 1e-9);
}

#[tokio::test]
async fn evaluation_requires_selected_program() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let err = h.evaluator().run(&h.session, evaluate()).await.unwrap_err();
    assert!(matches!(err, EvaluationError::NoProgramSelected));
}

#[tokio::test]
async fn evaluation_requires_artifact_on_disk() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let meta = h.session.new_program("qa", "test-model", None).unwrap();
    fs::remove_file(h.dir.path().join("programs").join(&meta.id).join(ARTIFACT_FILE)).unwrap();

    let err = h.evaluator().run(&h.session, evaluate()).await.unwrap_err();
    assert!(matches!(err, EvaluationError::ArtifactMissing { .. }));
}

#[tokio::test]
async fn evaluation_requires_samples() {
    let h = Harness::new();
    h.session.new_program("empty", "test-model", None).unwrap();
    let err = h.evaluator().run(&h.session, evaluate()).await.unwrap_err();
    assert!(matches!(err, EvaluationError::NoSamples { .. }));
}

#[tokio::test]
async fn background_evaluation_stores_result() {
    let h = Harness::new();
    h.add_sample("x", "y");
    let meta = h.session.new_program("qa", "test-model", None).unwrap();
    let worker = h.worker(Arc::new(PassthroughCompiler));

    let StartOutcome::Started(handle) = worker.start_evaluation(evaluate()) else {
        panic!("evaluation should start");
    };
    handle.wait().await;

    assert!(!h.session.is_running(JobKind::Evaluation));
    let last = h.session.last_evaluation().unwrap();
    assert_eq!(last.program_id, meta.id);
    assert_eq!(last.metrics.num_samples, 1);
}
