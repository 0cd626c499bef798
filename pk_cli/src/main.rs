use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::error;
use pk_gen::{GenConfig, Mode};
use std::{path::PathBuf, process::ExitCode};

/// Generates the delta protocol code from a packet definitions file.
#[derive(Parser)]
#[command(version, about)]
struct Args {
  /// File with packet definitions
  packets: PathBuf,
  /// Path to the header file to produce
  header:  PathBuf,
  /// Path to the source file to produce
  source:  PathBuf,
  /// What to generate (common, client, or server code)
  #[arg(long, value_enum)]
  mode:    ModeArg,
  /// Generator switches (TOML); defaults to gen-config.toml when present
  #[arg(long)]
  config:  Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
  Common,
  Client,
  Server,
}

impl From<ModeArg> for Mode {
  fn from(mode: ModeArg) -> Mode {
    match mode {
      ModeArg::Common => Mode::Common,
      ModeArg::Client => Mode::Client,
      ModeArg::Server => Mode::Server,
    }
  }
}

fn main() -> ExitCode {
  env_logger::init();
  let args = Args::parse();
  match run(&args) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::FAILURE
    }
  }
}

fn run(args: &Args) -> anyhow::Result<()> {
  let cfg = GenConfig::load(args.config.as_deref()).context("could not load generator config")?;
  pk_gen::generate(&args.packets, &args.header, &args.source, args.mode.into(), &cfg)
    .with_context(|| format!("could not process {}", args.packets.display()))?;
  Ok(())
}
