use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use macchiato::jvm::{read_class_file, JVMParser};
use macchiato::program::Program;
use macchiato::runtime::Runtime;

/// A tiny JVM for the integer bytecode subset of Java.
#[derive(Parser, Debug)]
#[command(name = "macchiato", version, about)]
struct Args {
    /// Class file to execute.
    #[arg(value_name = "CLASS_FILE")]
    class_file: PathBuf,
}

fn main() {
    // Diagnostics go to stderr so program output on stdout stays clean.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("macchiato: {err:#}");
        process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let bytes = read_class_file(&args.class_file).with_context(|| {
        format!("failed to read {}", args.class_file.display())
    })?;
    let class_file = JVMParser::parse(&bytes).with_context(|| {
        format!("failed to parse {}", args.class_file.display())
    })?;
    let program = Program::new(&class_file);
    let mut runtime = Runtime::new(program);
    runtime.run()?;
    Ok(())
}
