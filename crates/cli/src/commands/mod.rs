pub(crate) mod evaluate;
pub(crate) mod generate;
pub(crate) mod optimize;
pub(crate) mod program;
pub(crate) mod sample;
pub(crate) mod signature;

use std::path::Path;

use serde::de::DeserializeOwned;

use crate::error::CliError;

pub(crate) use program::ProgramCommands;
pub(crate) use sample::SampleCommands;
pub(crate) use signature::SignatureCommands;

/// Read and parse a JSON file.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CliError::Json {
        path: path.display().to_string(),
        source,
    })
}

/// Shorten a value for one-line display.
pub(crate) fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(max).collect();
    if line.chars().count() > max || text.lines().nth(1).is_some() {
        out.push_str("...");
    }
    out
}
