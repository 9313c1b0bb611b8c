use clap::{Parser, Subcommand};
use litertlm::archive::{write_container, Container, WriteOptions};
use litertlm::inspect::{peek, peek_json, PeekOptions};
use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "litertlm", about = "Build and inspect LiteRT-LM container files")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack model, tokenizer and metadata files into a .litertlm container
    Write {
        #[arg(long)]
        output_path: PathBuf,
        /// Per-section metadata, e.g. "tokenizer:lang=en;tflite:quantized=true"
        #[arg(long, default_value = "")]
        section_metadata: String,
        /// Input files, one section each, in order
        #[arg(required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
    },
    /// Print the header and section table of a container
    Peek {
        input: PathBuf,
        /// Emit JSON instead of the text dump
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    init_logging();

    match Cli::parse().command {

        // ── Write ────────────────────────────────────────────────────────────
        Commands::Write { output_path, section_metadata, inputs } => {
            let written = WriteOptions::default()
                .with_metadata_str(&section_metadata)
                .map_err(Into::into)
                .and_then(|opts| write_container(&output_path, &inputs, &opts));
            match written {
                Ok(()) => {
                    println!("LiteRT-LM file successfully created! Output is at {}", output_path.display());
                }
                Err(e) => {
                    eprintln!("Error creating LiteRT-LM file: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        // ── Peek ─────────────────────────────────────────────────────────────
        Commands::Peek { input, json } => {
            let mut container = Container::open(&input)?;
            let stdout = io::stdout();
            let color = stdout.is_terminal();
            let mut out = stdout.lock();
            if json {
                peek_json(&mut *container, &mut out)?;
            } else {
                peek(&mut *container, &mut out, PeekOptions { color })?;
            }
            out.flush()?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
