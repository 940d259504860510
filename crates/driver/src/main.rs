use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;

use pp::{FsIncluder, Preprocessor};

#[derive(Parser, Debug)]
#[command(
    name = "p4",
    about = "Tool for managing P4 source code",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Invoke a preprocessor on P4 source code read from stdin, writing the
    /// expanded source to stdout
    Pp(PpArgs),
}

#[derive(Args, Debug)]
struct PpArgs {
    /// Defines in the form NAME or NAME=VALUE (bare NAME defines 1)
    #[arg(short = 'D', value_name = "NAME[=VALUE]")]
    define: Vec<String>,
    /// Directory against which quoted include paths are resolved
    #[arg(short = 'I', value_name = "DIR")]
    include: Option<PathBuf>,
}

fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Warn)
        .env()
        .init()?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Pp(args) => cmd_pp(&args),
    }
}

fn cmd_pp(args: &PpArgs) -> Result<()> {
    let stdin = io::stdin();
    let mut p = Preprocessor::new(stdin.lock());

    for d in &args.define {
        let (name, value) = match d.split_once('=') {
            Some((name, value)) => (name, value),
            None => (d.as_str(), "1"),
        };
        p.define(name, value);
    }

    let out = match &args.include {
        Some(dir) => p.with_includer(FsIncluder::with_root(dir)).process(),
        None => p.process(),
    }
    .context("failed to run preprocessor")?;

    let mut stdout = io::stdout().lock();
    stdout
        .write_all(&out)
        .and_then(|()| stdout.flush())
        .context("failed to write output source code")?;
    Ok(())
}
