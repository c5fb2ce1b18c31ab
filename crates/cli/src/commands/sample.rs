use std::path::PathBuf;

use clap::Subcommand;
use promptsmith_storage::{empty_sample, Sample, SampleStore, SignatureCatalog};

use super::{preview, read_json};
use crate::app::App;
use crate::error::CliError;
use crate::{print_json, OutputFormat};

#[derive(Subcommand)]
pub(crate) enum SampleCommands {
    /// List the samples of a signature
    List { signature: String },
    /// Append a sample from a JSON object file
    Add { signature: String, file: PathBuf },
    /// Replace the sample at INDEX with a JSON object file
    Edit {
        signature: String,
        index: usize,
        file: PathBuf,
    },
    /// Delete the sample at INDEX
    Delete { signature: String, index: usize },
    /// Append every sample of a JSON array file
    Import { signature: String, file: PathBuf },
    /// Write the samples as a JSON array
    Export {
        signature: String,
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print an empty sample with every field of the signature
    Template { signature: String },
}

pub(crate) fn execute(
    app: &App,
    command: SampleCommands,
    output: OutputFormat,
) -> Result<(), CliError> {
    let store = app.store.as_ref();
    match command {
        SampleCommands::List { signature } => {
            let sig = store.get(&signature)?;
            let samples = store.load(&sig.name)?;
            match output {
                OutputFormat::Json => print_json(&samples),
                OutputFormat::Text => {
                    if samples.is_empty() {
                        println!("no samples for {}", sig.name);
                    }
                    for (i, sample) in samples.iter().enumerate() {
                        let fields: Vec<String> = sig
                            .all_fields()
                            .map(|f| {
                                let value = sample.get(f).map(|v| v.to_text()).unwrap_or_default();
                                format!("{}={}", f, preview(&value, 40))
                            })
                            .collect();
                        println!("[{}] {}", i, fields.join("  "));
                    }
                }
            }
        }
        SampleCommands::Add { signature, file } => {
            let sig = store.get(&signature)?;
            let sample: Sample = read_json(&file)?;
            let index = store.append(&sig, sample)?;
            println!("added sample {} to {}", index, sig.name);
        }
        SampleCommands::Edit {
            signature,
            index,
            file,
        } => {
            let sig = store.get(&signature)?;
            let sample: Sample = read_json(&file)?;
            store.replace(&sig, index, sample)?;
            println!("updated sample {} of {}", index, sig.name);
        }
        SampleCommands::Delete { signature, index } => {
            store.get(&signature)?;
            SampleStore::delete(store, &signature, index)?;
            println!("deleted sample {} of {}", index, signature);
        }
        SampleCommands::Import { signature, file } => {
            let sig = store.get(&signature)?;
            let incoming: Vec<Sample> = read_json(&file)?;
            let count = incoming.len();
            let total = store.import(&sig, incoming)?;
            println!("imported {} samples into {} ({} total)", count, sig.name, total);
        }
        SampleCommands::Export { signature, out } => {
            store.get(&signature)?;
            let json = store.export(&signature)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json).map_err(|source| CliError::Write {
                        path: path.display().to_string(),
                        source,
                    })?;
                    println!("exported {} samples to {}", signature, path.display());
                }
                None => println!("{}", json),
            }
        }
        SampleCommands::Template { signature } => {
            let sig = store.get(&signature)?;
            print_json(&empty_sample(&sig));
        }
    }
    Ok(())
}
