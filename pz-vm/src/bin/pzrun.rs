//! `pzrun`: run a compiled Plasma program.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use pz_vm::heap::HeapOptions;
use pz_vm::loader::LoadOptions;
use pz_vm::pz::Pz;

use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "pzrun", version, about = "Run a compiled Plasma program")]
struct Cli {
    /// Trace loading and execution to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// The PZ program to run.
    file: PathBuf,

    /// Arguments handed to the program's entry closure.
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();

    let heap_options = HeapOptions {
        zealous: std::env::var_os("PZ_GC_ZEALOUS").is_some(),
    };
    let load_options = LoadOptions {
        debug_contexts: cli.verbose,
    };

    let mut pz = match Pz::new(heap_options, load_options) {
        Ok(pz) => pz,
        Err(err) => {
            eprintln!("pzrun: {err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = pz.load(&cli.file) {
        eprintln!("pzrun: {err}");
        return ExitCode::FAILURE;
    }

    match pz.run(&cli.args, &mut std::io::stdout()) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("pzrun: {err}");
            ExitCode::FAILURE
        }
    }
}
