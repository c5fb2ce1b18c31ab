//! Process-wide selection and job state.
//!
//! A [`Session`] is passed explicitly to whatever needs it. Everything it
//! tracks lives behind one mutex, so a selection change is never observed
//! half-applied and two runs of the same kind can never both start.

use std::sync::{Arc, Mutex, MutexGuard};

use promptsmith_storage::{
    timestamp_now, ProgramArtifact, ProgramMetadata, ProgramStore, SignatureCatalog,
    StorageError,
};
use serde::Serialize;
use tracing::debug;

use crate::evaluator::EvaluationResult;

/// Current-selection pointers. Each one names an existing entity or is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub signature: Option<String>,
    pub program_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Optimization,
    Evaluation,
}

/// Polled status of one job kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub running: bool,
    /// Error of the most recent finished run, if it failed.
    pub last_error: Option<String>,
    /// Program created by the most recent successful optimization.
    pub last_program_id: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    selection: Selection,
    optimization: JobStatus,
    evaluation: JobStatus,
    last_evaluation: Option<Arc<EvaluationResult>>,
}

impl SessionState {
    fn job(&mut self, kind: JobKind) -> &mut JobStatus {
        match kind {
            JobKind::Optimization => &mut self.optimization,
            JobKind::Evaluation => &mut self.evaluation,
        }
    }
}

pub struct Session {
    catalog: Arc<dyn SignatureCatalog>,
    programs: Arc<dyn ProgramStore>,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(catalog: Arc<dyn SignatureCatalog>, programs: Arc<dyn ProgramStore>) -> Self {
        Self {
            catalog,
            programs,
            state: Mutex::new(SessionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ── selection ──

    /// Current pointers. Pointers whose entity has since disappeared are
    /// cleared before returning.
    pub fn selection(&self) -> Selection {
        let mut state = self.lock();
        if let Some(id) = state.selection.program_id.clone() {
            if self.programs.get(&id).is_err() {
                debug!(program = %id, "selected program vanished, clearing");
                state.selection.program_id = None;
            }
        }
        if let Some(name) = state.selection.signature.clone() {
            if self.catalog.get(&name).is_err() {
                debug!(signature = %name, "selected signature vanished, clearing");
                state.selection.signature = None;
            }
        }
        state.selection.clone()
    }

    /// Select a signature. The program pointer follows it to the
    /// signature's newest program, or is cleared when it has none.
    pub fn select_signature(&self, name: Option<&str>) -> Result<(), StorageError> {
        let newest = match name {
            Some(name) => {
                self.catalog.get(name)?;
                self.programs
                    .list_for_signature(name)?
                    .into_iter()
                    .next()
                    .map(|meta| meta.id)
            }
            None => None,
        };
        let mut state = self.lock();
        state.selection.signature = name.map(str::to_string);
        state.selection.program_id = newest;
        Ok(())
    }

    /// Select a program, and with it the program's signature.
    pub fn select_program(&self, id: Option<&str>) -> Result<(), StorageError> {
        let mut state_update = None;
        if let Some(id) = id {
            let metadata = self.programs.get(id)?;
            state_update = Some(metadata.signature_name);
        }
        let mut state = self.lock();
        state.selection.program_id = id.map(str::to_string);
        if let Some(signature) = state_update {
            state.selection.signature = Some(signature);
        }
        Ok(())
    }

    pub fn select_model(&self, model: Option<&str>) {
        self.lock().selection.model = model.map(str::to_string);
    }

    /// Select the newest program when none is selected. Returns the
    /// program now selected.
    pub fn restore(&self) -> Result<Option<String>, StorageError> {
        if let Some(id) = self.selection().program_id {
            return Ok(Some(id));
        }
        let newest = self.programs.list()?.into_iter().next();
        match newest {
            Some(meta) => {
                let mut state = self.lock();
                state.selection.program_id = Some(meta.id.clone());
                state.selection.signature = Some(meta.signature_name);
                Ok(Some(meta.id))
            }
            None => Ok(None),
        }
    }

    // ── program lifecycle ──

    /// Delete a program. A selection pointing at it is cleared.
    pub fn delete_program(&self, id: &str) -> Result<(), StorageError> {
        self.programs.delete(id)?;
        let mut state = self.lock();
        if state.selection.program_id.as_deref() == Some(id) {
            state.selection.program_id = None;
        }
        Ok(())
    }

    /// Register an un-optimized program built straight from a signature,
    /// and select it.
    pub fn new_program(
        &self,
        signature: &str,
        model: &str,
        base_program_id: Option<&str>,
    ) -> Result<ProgramMetadata, StorageError> {
        let sig = self.catalog.get(signature)?;
        let artifact = ProgramArtifact::from_signature(&sig);
        let metadata = self.programs.create(
            &artifact,
            ProgramMetadata {
                id: String::new(),
                model: model.to_string(),
                created_at: timestamp_now(),
                task_name: sig.task_description().to_string(),
                base_program_id: base_program_id.map(str::to_string),
                signature_name: sig.name.clone(),
                artifact_sha256: String::new(),
                previous_sha256: None,
            },
        )?;
        self.publish_program(&metadata);
        Ok(metadata)
    }

    /// Point the selection at a freshly created program.
    pub(crate) fn publish_program(&self, metadata: &ProgramMetadata) {
        let mut state = self.lock();
        state.selection.program_id = Some(metadata.id.clone());
        state.selection.signature = Some(metadata.signature_name.clone());
    }

    // ── jobs ──

    /// Claim the run slot for `kind`. `None` when a run is already active.
    pub fn try_begin(self: &Arc<Self>, kind: JobKind) -> Option<RunGuard> {
        let mut state = self.lock();
        let job = state.job(kind);
        if job.running {
            return None;
        }
        job.running = true;
        Some(RunGuard {
            session: Arc::clone(self),
            kind,
        })
    }

    pub fn status(&self, kind: JobKind) -> JobStatus {
        let mut state = self.lock();
        state.job(kind).clone()
    }

    pub fn is_running(&self, kind: JobKind) -> bool {
        self.status(kind).running
    }

    pub(crate) fn record_success(&self, kind: JobKind, program_id: Option<String>) {
        let mut state = self.lock();
        let job = state.job(kind);
        job.last_error = None;
        if program_id.is_some() {
            job.last_program_id = program_id;
        }
    }

    pub(crate) fn record_failure(&self, kind: JobKind, error: String) {
        self.lock().job(kind).last_error = Some(error);
    }

    pub fn last_evaluation(&self) -> Option<Arc<EvaluationResult>> {
        self.lock().last_evaluation.clone()
    }

    pub(crate) fn store_evaluation(&self, result: EvaluationResult) {
        self.lock().last_evaluation = Some(Arc::new(result));
    }
}

/// Holds the run slot of one job kind; dropping it frees the slot on every
/// exit path.
pub struct RunGuard {
    session: Arc<Session>,
    kind: JobKind,
}

impl RunGuard {
    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.session.lock().job(self.kind).running = false;
        debug!(kind = ?self.kind, "run slot released");
    }
}
