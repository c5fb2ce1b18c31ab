//! Application state shared across request handlers.

use std::sync::Arc;

use promptsmith_eval::{Session, Worker};
use promptsmith_storage::FsStore;

pub(crate) struct AppState {
    pub(crate) store: Arc<FsStore>,
    pub(crate) session: Arc<Session>,
    /// Starts background runs; one of each kind at a time.
    pub(crate) worker: Worker,
    /// Model used when neither the request nor the selection names one.
    pub(crate) default_model: String,
    /// Models with a `[models.<name>]` section in the configuration.
    pub(crate) configured_models: Vec<String>,
}

impl AppState {
    pub(crate) fn model_for(&self, requested: Option<String>) -> String {
        requested
            .or_else(|| self.session.selection().model)
            .unwrap_or_else(|| self.default_model.clone())
    }
}
