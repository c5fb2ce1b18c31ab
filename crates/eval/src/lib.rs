//! Scoring, optimization and evaluation of prompt programs.
//!
//! A compiled program is scored by an LLM judge whose schema is synthesized
//! from the program's signature. Per-field processors repair and score
//! structured outputs (PLN statements in particular) before they reach the
//! judge, and the processing score discounts the judge's similarity.
//!
//! The [`Optimizer`] compiles a new program from a signature's samples and
//! registers it; the [`Evaluator`] runs a program over every sample and
//! aggregates the scores. The [`Worker`] runs either in the background,
//! one of each kind at a time, recording status in the [`Session`].

pub mod compiler;
pub mod evaluator;
pub mod generate;
pub mod judge;
pub mod llm;
pub mod metric;
pub mod optimizer;
pub mod policy;
pub mod processor;
pub mod program;
pub mod session;
pub mod structured;
pub mod unify;
pub mod worker;

pub use compiler::{
    AutoBudget, BootstrapFewShot, CompileConfig, CompileContext, CompileError, Compiler,
    LabeledFewShot, PassthroughCompiler, TrainingExample,
};
pub use evaluator::{
    as_percent, EvaluateRequest, EvaluationError, EvaluationMetrics, EvaluationResult, Evaluator,
    PerSampleResult,
};
pub use generate::SampleSynthesizer;
pub use judge::{Judge, JudgeSynthesizer, LlmJudge, Verdict};
#[cfg(feature = "anthropic")]
pub use llm::AnthropicClient;
pub use llm::{LlmClient, LlmError, Message, ModelParams, ModelTable};
pub use metric::{Metric, MetricEngine, MetricError, Score, SignatureMetric};
pub use optimizer::{OptimizeError, OptimizeRequest, Optimizer};
pub use policy::{BaseLoadFailure, EnginePolicy, LineAggregation};
pub use processor::{FieldProcessor, Processed, ProcessorRegistry};
pub use program::{Prediction, Predictor, ProgramRunner};
pub use session::{JobKind, JobStatus, RunGuard, Selection, Session};
pub use structured::{CallError, CallSchema, Slot, SlotKind, StructuredCall, StructuredReply};
pub use unify::{StructuralUnifier, UnificationOracle};
pub use worker::{JobHandle, StartOutcome, Worker};
