use promptsmith_eval::{as_percent, EvaluateRequest};

use super::preview;
use crate::app::App;
use crate::error::CliError;
use crate::{print_json, OutputFormat};

pub(crate) struct EvaluateArgs {
    pub(crate) program: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) judge_model: Option<String>,
    pub(crate) worst: Option<usize>,
}

pub(crate) async fn execute(
    app: &App,
    args: EvaluateArgs,
    output: OutputFormat,
) -> Result<(), CliError> {
    let engine = app.engine()?;
    app.session.restore()?;

    let result = engine
        .evaluator
        .run(
            &app.session,
            EvaluateRequest {
                program_id: args.program,
                model: app.model(args.model),
                judge_model: args.judge_model,
            },
        )
        .await?;

    match output {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Text => {
            println!("program:   {}", result.program_id);
            println!("signature: {}", result.signature_name);
            println!(
                "average:   {:.1}% over {} samples ({} errors)",
                as_percent(result.metrics.avg_score),
                result.metrics.num_samples,
                result.metrics.num_errors
            );
            if let Some(n) = args.worst {
                println!();
                for r in result.ranked().into_iter().take(n) {
                    let note = r.error.as_deref().unwrap_or(&r.explanation);
                    println!(
                        "[{}] {:5.1}%  {}",
                        r.sample_id,
                        as_percent(r.overall_score),
                        preview(note, 80)
                    );
                }
            }
        }
    }
    Ok(())
}
