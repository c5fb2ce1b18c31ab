use std::path::PathBuf;

use clap::Subcommand;
use promptsmith_storage::{Signature, SignatureCatalog};

use super::read_json;
use crate::app::App;
use crate::error::CliError;
use crate::{print_json, OutputFormat};

#[derive(Subcommand)]
pub(crate) enum SignatureCommands {
    /// List every signature
    List,
    /// Show one signature
    Show { name: String },
    /// Add a signature from a JSON file
    Add { file: PathBuf },
    /// Replace a signature with the contents of a JSON file (renames allowed)
    Edit { name: String, file: PathBuf },
    /// Remove a signature
    Remove { name: String },
}

pub(crate) fn execute(
    app: &App,
    command: SignatureCommands,
    output: OutputFormat,
) -> Result<(), CliError> {
    let catalog = app.store.as_ref();
    match command {
        SignatureCommands::List => {
            let signatures = catalog.list()?;
            match output {
                OutputFormat::Json => print_json(&signatures),
                OutputFormat::Text => {
                    for sig in &signatures {
                        println!(
                            "{}  ({} -> {})",
                            sig.name,
                            sig.input_fields.join(", "),
                            sig.output_fields.join(", ")
                        );
                    }
                }
            }
        }
        SignatureCommands::Show { name } => {
            let sig = catalog.get(&name)?;
            match output {
                OutputFormat::Json => print_json(&sig),
                OutputFormat::Text => print_signature(&sig),
            }
        }
        SignatureCommands::Add { file } => {
            let sig: Signature = read_json(&file)?;
            let name = sig.name.clone();
            catalog.add(sig)?;
            println!("added signature {}", name);
        }
        SignatureCommands::Edit { name, file } => {
            let sig: Signature = read_json(&file)?;
            let new_name = sig.name.clone();
            catalog.edit(&name, sig)?;
            if new_name == name {
                println!("updated signature {}", name);
            } else {
                println!("renamed signature {} to {}", name, new_name);
            }
        }
        SignatureCommands::Remove { name } => {
            catalog.remove(&name)?;
            println!("removed signature {}", name);
        }
    }
    Ok(())
}

fn print_signature(sig: &Signature) {
    println!("name:         {}", sig.name);
    if !sig.description.is_empty() {
        println!("description:  {}", sig.description);
    }
    println!("inputs:       {}", sig.input_fields.join(", "));
    println!("outputs:      {}", sig.output_fields.join(", "));
    for (field, processor) in &sig.field_processors {
        println!("processor:    {} -> {}", field, processor);
    }
    if !sig.instructions.is_empty() {
        println!();
        println!("{}", sig.instructions);
    }
}
