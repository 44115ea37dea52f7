use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

use clap::Parser;
use jit_backend::{Pass, Pipeline};
use jit_irdump::{parse_pass, process as run_passes};

#[derive(Parser)]
#[command(name = "jit-irdump")]
#[command(about = "Run JIT optimization passes over a textual IR file")]
#[command(version)]
struct Cli {
    /// Textual IR input
    input: PathBuf,

    /// Pass to run: lse, cprop, esimp, dce or ra. Repeat to chain;
    /// passes run in the order given.
    #[arg(long = "pass", value_parser = parse_pass)]
    passes: Vec<Pass>,

    /// Print pass statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let src = match fs::read_to_string(&cli.input) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: {e}", cli.input.display());
            process::exit(1);
        }
    };

    let mut pipeline = Pipeline::new().with_validation(true);
    let text = match run_passes(&src, &cli.passes, &mut pipeline) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}: {e}", cli.input.display());
            process::exit(1);
        }
    };

    let written = match &cli.output {
        Some(path) => fs::write(path, &text),
        None => io::stdout().lock().write_all(text.as_bytes()),
    };
    if let Err(e) = written {
        eprintln!("write failed: {e}");
        process::exit(1);
    }

    if cli.stats {
        if let Err(e) = pipeline.stats.dump(&mut io::stderr().lock()) {
            eprintln!("write failed: {e}");
            process::exit(1);
        }
    }
}
