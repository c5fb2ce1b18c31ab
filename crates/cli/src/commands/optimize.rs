use promptsmith_eval::OptimizeRequest;

use crate::app::App;
use crate::error::CliError;
use crate::{print_json, OutputFormat};

pub(crate) async fn execute(
    app: &App,
    signature: String,
    model: Option<String>,
    base: Option<String>,
    output: OutputFormat,
) -> Result<(), CliError> {
    let engine = app.engine()?;
    // Each invocation is a fresh session; start from the newest program.
    app.session.restore()?;

    let model = app.model(model);
    let meta = engine
        .optimizer
        .run(
            &app.session,
            OptimizeRequest {
                signature,
                model,
                base_program_id: base,
                judge_model: None,
            },
        )
        .await?;

    match output {
        OutputFormat::Json => print_json(&meta),
        OutputFormat::Text => {
            println!("created program {}", meta.id);
            if let Some(base) = &meta.base_program_id {
                println!("base program: {}", base);
            }
        }
    }
    Ok(())
}
