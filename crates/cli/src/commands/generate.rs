use promptsmith_storage::{ProgramStore, SampleStore, SignatureCatalog, StorageError};

use crate::app::App;
use crate::error::CliError;
use crate::{print_json, OutputFormat};

/// Evaluate one sample with `program`, then synthesize a new sample from
/// the result.
pub(crate) async fn execute(
    app: &App,
    program: String,
    sample_id: usize,
    model: Option<String>,
    append: bool,
    output: OutputFormat,
) -> Result<(), CliError> {
    let engine = app.engine()?;
    let model = app.model(model);

    let meta = ProgramStore::get(app.store.as_ref(), &program)?;
    let artifact = app.store.load_artifact(&program)?;
    let signature = SignatureCatalog::get(app.store.as_ref(), &meta.signature_name)?;
    let samples = app.store.load(&signature.name)?;
    let sample = samples
        .get(sample_id)
        .ok_or_else(|| StorageError::SampleNotFound {
            signature: signature.name.clone(),
            index: sample_id,
            len: samples.len(),
        })?;

    let evaluated = engine
        .evaluator
        .evaluate_sample(&artifact, &signature, sample_id, sample, &model, &model)
        .await;
    let generated = engine
        .synthesizer
        .synthesize(&signature, &evaluated, &artifact.instructions, &model)
        .await;

    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "evaluated": evaluated,
            "sample": generated,
        })),
        OutputFormat::Text => print_json(&generated),
    }

    if append {
        let index = app.store.append(&signature, generated)?;
        eprintln!("appended as sample {} of {}", index, signature.name);
    }
    Ok(())
}
