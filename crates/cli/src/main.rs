mod app;
mod commands;
mod config;
mod error;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::app::App;
use crate::commands::{
    evaluate, generate, optimize, program, sample, signature, ProgramCommands, SampleCommands,
    SignatureCommands,
};
use crate::config::Config;
use crate::error::CliError;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Prompt program optimization and evaluation.
#[derive(Parser)]
#[command(
    name = "promptsmith",
    version,
    about = "Prompt program optimization and evaluation"
)]
struct Cli {
    /// Path to promptsmith.toml (default: <home>/promptsmith.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root directory (default: $PROMPTSMITH_HOME or the current directory)
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Log at debug level
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage task signatures
    Signature {
        #[command(subcommand)]
        command: SignatureCommands,
    },

    /// Manage the samples of a signature
    Sample {
        #[command(subcommand)]
        command: SampleCommands,
    },

    /// Manage compiled programs
    Program {
        #[command(subcommand)]
        command: ProgramCommands,
    },

    /// Compile a new program for a signature from its samples
    Optimize {
        /// Signature name
        signature: String,
        /// Model used for the program and the judge
        #[arg(long)]
        model: Option<String>,
        /// Base program to start from (default: newest program)
        #[arg(long)]
        program: Option<String>,
    },

    /// Evaluate a program over every sample of its signature
    Evaluate {
        /// Program to evaluate (default: newest program)
        #[arg(long)]
        program: Option<String>,
        /// Model the program runs on
        #[arg(long)]
        model: Option<String>,
        /// Model the judge runs on (default: --model)
        #[arg(long)]
        judge_model: Option<String>,
        /// Also list the N lowest-scoring samples
        #[arg(long)]
        worst: Option<usize>,
    },

    /// Evaluate one sample and synthesize a new sample from the result
    GenerateSample {
        /// Program to run
        #[arg(long)]
        program: String,
        /// Index of the sample to start from
        #[arg(long)]
        sample_id: usize,
        #[arg(long)]
        model: Option<String>,
        /// Append the generated sample to the signature's samples
        #[arg(long)]
        append: bool,
    },

    /// Start the HTTP JSON API
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = cli.output;
    if let Err(e) = run(cli) {
        report_error(&e.to_string(), output);
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let home = config::resolve_home(cli.home);
    let config = Config::load(cli.config.as_deref(), &home).map_err(CliError::Config)?;
    let app = App::open(&home, config)?;
    let output = cli.output;

    match cli.command {
        Commands::Signature { command } => signature::execute(&app, command, output),
        Commands::Sample { command } => sample::execute(&app, command, output),
        Commands::Program { command } => program::execute(&app, command, output),
        Commands::Optimize {
            signature,
            model,
            program,
        } => block_on(optimize::execute(&app, signature, model, program, output)),
        Commands::Evaluate {
            program,
            model,
            judge_model,
            worst,
        } => block_on(evaluate::execute(
            &app,
            evaluate::EvaluateArgs {
                program,
                model,
                judge_model,
                worst,
            },
            output,
        )),
        Commands::GenerateSample {
            program,
            sample_id,
            model,
            append,
        } => block_on(generate::execute(
            &app, program, sample_id, model, append, output,
        )),
        Commands::Serve { port } => block_on(serve::start_server(app, port)),
    }
}

fn block_on<F>(future: F) -> Result<(), CliError>
where
    F: std::future::Future<Output = Result<(), CliError>>,
{
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::Runtime(format!("failed to create tokio runtime: {}", e)))?;
    rt.block_on(future)
}

/// Print a message to stderr in the requested format.
pub(crate) fn report_error(msg: &str, output: OutputFormat) {
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": msg })),
    }
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => report_error(&format!("serialization error: {}", e), OutputFormat::Text),
    }
}
