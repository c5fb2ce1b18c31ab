use std::path::PathBuf;

use clap::Subcommand;
use promptsmith_storage::ProgramStore;

use crate::app::App;
use crate::error::CliError;
use crate::{print_json, OutputFormat};

#[derive(Subcommand)]
pub(crate) enum ProgramCommands {
    /// List programs, newest first
    List {
        /// Only programs of this signature
        #[arg(long)]
        signature: Option<String>,
    },
    /// Show a program's metadata and artifact
    Show { id: String },
    /// Register an un-optimized program built from a signature
    New {
        signature: String,
        #[arg(long)]
        model: Option<String>,
        /// Program this one derives from (same signature)
        #[arg(long)]
        base: Option<String>,
    },
    /// Delete a program
    Delete { id: String },
    /// Print or replace a program's instructions
    Instructions {
        id: String,
        /// New instructions text
        #[arg(long, conflicts_with = "file")]
        set: Option<String>,
        /// Read new instructions from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

pub(crate) fn execute(
    app: &App,
    command: ProgramCommands,
    output: OutputFormat,
) -> Result<(), CliError> {
    let programs = app.store.as_ref();
    match command {
        ProgramCommands::List { signature } => {
            let list = match signature {
                Some(sig) => programs.list_for_signature(&sig)?,
                None => programs.list()?,
            };
            match output {
                OutputFormat::Json => print_json(&list),
                OutputFormat::Text => {
                    if list.is_empty() {
                        println!("no programs");
                    }
                    for meta in &list {
                        println!(
                            "{}  {}  {}  {}{}",
                            meta.id,
                            meta.signature_name,
                            meta.model,
                            meta.created_at,
                            meta.base_program_id
                                .as_deref()
                                .map(|b| format!("  (base {})", b))
                                .unwrap_or_default()
                        );
                    }
                }
            }
        }
        ProgramCommands::Show { id } => {
            let meta = programs.get(&id)?;
            let artifact = programs.load_artifact(&id)?;
            match output {
                OutputFormat::Json => {
                    print_json(&serde_json::json!({ "metadata": meta, "artifact": artifact }))
                }
                OutputFormat::Text => {
                    println!("id:         {}", meta.id);
                    println!("signature:  {}", meta.signature_name);
                    println!("model:      {}", meta.model);
                    println!("created:    {}", meta.created_at);
                    println!(
                        "base:       {}",
                        meta.base_program_id.as_deref().unwrap_or("-")
                    );
                    println!("demos:      {}", artifact.demos.len());
                    println!();
                    println!("{}", artifact.instructions);
                }
            }
        }
        ProgramCommands::New {
            signature,
            model,
            base,
        } => {
            let model = app.model(model);
            let meta = app.session.new_program(&signature, &model, base.as_deref())?;
            match output {
                OutputFormat::Json => print_json(&meta),
                OutputFormat::Text => println!("created program {}", meta.id),
            }
        }
        ProgramCommands::Delete { id } => {
            app.session.delete_program(&id)?;
            println!("deleted program {}", id);
        }
        ProgramCommands::Instructions { id, set, file } => {
            let text = match (set, file) {
                (Some(text), _) => Some(text),
                (None, Some(path)) => {
                    Some(std::fs::read_to_string(&path).map_err(|source| CliError::Read {
                        path: path.display().to_string(),
                        source,
                    })?)
                }
                (None, None) => None,
            };
            match text {
                Some(text) => {
                    programs.patch_instructions(&id, &text)?;
                    println!("updated instructions of {}", id);
                }
                None => println!("{}", programs.load_artifact(&id)?.instructions),
            }
        }
    }
    Ok(())
}
