use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Grammar tooling for persnickety PEG grammars.
#[derive(Parser)]
#[command(name = "persnickety", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and validate a grammar file.
    Check { file: PathBuf },
    /// Emit a DOT graph of a grammar's expression tree on stdout.
    Graph { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { file } => {
            let rules = load(&file)?;
            println!("ok: {} rules, entry `{}`", rules.len(), rules[0].name);
        }
        Command::Graph { file } => {
            let rules = load(&file)?;
            print!("{}", persnickety::graph::render_dot(&rules));
        }
    }
    Ok(())
}

fn load(file: &PathBuf) -> anyhow::Result<Vec<persnickety::Rule>> {
    let text =
        fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let rules = persnickety::load_rules(&text)
        .with_context(|| format!("compiling {}", file.display()))?;
    Ok(rules)
}
