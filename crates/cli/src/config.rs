//! `promptsmith.toml` configuration.
//!
//! Every field has a default, so a missing file is a valid configuration.
//!
//! ```toml
//! default_model = "claude-sonnet-4-20250514"
//!
//! [policy]
//! line_aggregation = "mean"      # or "min"
//! base_load_failure = "fallback" # or "abort"
//!
//! [evaluation]
//! concurrency = 4
//!
//! [compiler]
//! auto = "light"                # "medium" or "heavy" runs more examples
//! max_bootstrapped_demos = 0     # > 0 bootstraps demos from passing predictions
//! max_labeled_demos = 4
//!
//! [models.claude-sonnet-4-20250514]
//! max_tokens = 2048
//! temperature = 0.0
//! ```

use std::path::{Path, PathBuf};

use promptsmith_eval::{CompileConfig, EnginePolicy, ModelTable};
use serde::Deserialize;

pub(crate) const CONFIG_FILE: &str = "promptsmith.toml";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) default_model: String,
    pub(crate) policy: EnginePolicy,
    pub(crate) evaluation: EvaluationSettings,
    pub(crate) compiler: CompileConfig,
    pub(crate) models: ModelTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            policy: EnginePolicy::default(),
            evaluation: EvaluationSettings::default(),
            compiler: CompileConfig::default(),
            models: ModelTable::default(),
        }
    }
}

/// `[evaluation]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct EvaluationSettings {
    /// Samples predicted and judged at once.
    pub(crate) concurrency: usize,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl Config {
    /// Load `explicit`, or `<home>/promptsmith.toml` when it exists.
    /// `PROMPTSMITH_MODEL` overrides `default_model`.
    pub(crate) fn load(explicit: Option<&Path>, home: &Path) -> Result<Self, String> {
        let mut config = match explicit {
            Some(path) => read_config(path)?,
            None => {
                let path = home.join(CONFIG_FILE);
                if path.exists() {
                    read_config(&path)?
                } else {
                    Config::default()
                }
            }
        };
        if let Some(model) = std::env::var("PROMPTSMITH_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
        {
            config.default_model = model;
        }
        Ok(config)
    }
}

fn read_config(path: &Path) -> Result<Config, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    toml::from_str(&content).map_err(|e| format!("could not parse '{}': {}", path.display(), e))
}

/// Store root: `--home`, else `PROMPTSMITH_HOME`, else the current directory.
pub(crate) fn resolve_home(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| {
        std::env::var("PROMPTSMITH_HOME")
            .ok()
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
    })
    .unwrap_or_else(|| PathBuf::from("."))
}
