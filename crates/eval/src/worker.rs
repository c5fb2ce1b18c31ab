//! Background execution of optimization and evaluation runs.
//!
//! A start request claims the run slot of its kind synchronously, so a
//! second request made while the first is still active is refused before
//! any work is spawned. Callers poll [`Session::status`] for progress.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::evaluator::{EvaluateRequest, Evaluator};
use crate::optimizer::{OptimizeRequest, Optimizer};
use crate::session::{JobKind, Session};

/// Handle on a spawned run.
#[derive(Debug)]
pub struct JobHandle {
    handle: JoinHandle<()>,
}

impl JobHandle {
    /// Wait for the run to finish. Its outcome is recorded in the session.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            error!(error = %e, "background run aborted");
        }
    }
}

#[derive(Debug)]
pub enum StartOutcome {
    Started(JobHandle),
    AlreadyRunning,
}

#[derive(Clone)]
pub struct Worker {
    session: Arc<Session>,
    optimizer: Arc<Optimizer>,
    evaluator: Arc<Evaluator>,
}

impl Worker {
    pub fn new(session: Arc<Session>, optimizer: Arc<Optimizer>, evaluator: Arc<Evaluator>) -> Self {
        Self {
            session,
            optimizer,
            evaluator,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Start an optimization unless one is already running.
    pub fn start_optimization(&self, request: OptimizeRequest) -> StartOutcome {
        let Some(guard) = self.session.try_begin(JobKind::Optimization) else {
            info!(signature = %request.signature, "optimization already running, request refused");
            return StartOutcome::AlreadyRunning;
        };
        let session = Arc::clone(&self.session);
        let optimizer = Arc::clone(&self.optimizer);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            match optimizer.run(&session, request).await {
                Ok(metadata) => session.record_success(JobKind::Optimization, Some(metadata.id)),
                Err(e) => {
                    error!(error = %e, "optimization failed");
                    session.record_failure(JobKind::Optimization, e.to_string());
                }
            }
        });
        StartOutcome::Started(JobHandle { handle })
    }

    /// Start an evaluation unless one is already running.
    pub fn start_evaluation(&self, request: EvaluateRequest) -> StartOutcome {
        let Some(guard) = self.session.try_begin(JobKind::Evaluation) else {
            info!("evaluation already running, request refused");
            return StartOutcome::AlreadyRunning;
        };
        let session = Arc::clone(&self.session);
        let evaluator = Arc::clone(&self.evaluator);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            match evaluator.run(&session, request).await {
                Ok(result) => {
                    session.store_evaluation(result);
                    session.record_success(JobKind::Evaluation, None);
                }
                Err(e) => {
                    error!(error = %e, "evaluation failed");
                    session.record_failure(JobKind::Evaluation, e.to_string());
                }
            }
        });
        StartOutcome::Started(JobHandle { handle })
    }
}
