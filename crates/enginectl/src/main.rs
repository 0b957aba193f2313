//! enginectl: a small CLI over the audio engine.
//!
//! ## Commands
//! - `devices`: list the provider's mixers.
//! - `check`: report whether sample output is supported (exit code 1 when not).
//! - `play`: load a source buffered or streaming, log every lifecycle hook, and wait for
//!   the resource to finish. Ctrl-C stops it cleanly.

mod cli;
mod config;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,enginectl=info,audio_engine=info")
        }))
        .init();

    let mut cfg = config::CliConfig::resolve(args.config.as_deref())?;
    cfg.apply_overrides(args.backend, args.device.clone());
    tracing::debug!(backend = ?cfg.backend, engine = ?cfg.engine, "resolved config");

    match &args.cmd {
        cli::Command::Devices => runtime::list_devices(&cfg)?,
        cli::Command::Check => {
            if !runtime::check_output(&cfg) {
                std::process::exit(1);
            }
        }
        cli::Command::Play(play) => runtime::run_play(&cfg, play)?,
    }

    Ok(())
}
