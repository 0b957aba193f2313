use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Backend;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "enginectl", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Optional config file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Audio provider to use (overrides the config file)
    #[arg(long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Use a specific output device by substring match
    #[arg(long, global = true)]
    pub device: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List mixers and their output support
    Devices,

    /// Exit with status 1 unless some mixer supports sample output
    Check,

    /// Play a file or file: URL and wait until it finishes
    Play(PlayArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct PlayArgs {
    /// Path or file: URL of the sound
    pub source: String,

    /// Stream through an output line instead of decoding into memory
    #[arg(long)]
    pub streaming: bool,

    /// Loop count (-1 loops until interrupted)
    #[arg(long, allow_negative_numbers = true)]
    pub loop_count: Option<i32>,

    /// Loop start as a fraction of the length
    #[arg(long)]
    pub loop_start: Option<f64>,

    /// Loop end as a fraction of the length (-1 for the end of the sound)
    #[arg(long, allow_negative_numbers = true)]
    pub loop_end: Option<f64>,

    /// Start position in milliseconds
    #[arg(long)]
    pub start_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_loop_flags() {
        let args = Args::try_parse_from([
            "enginectl",
            "--backend",
            "memory",
            "play",
            "/tmp/a.wav",
            "--loop-count",
            "-1",
            "--loop-end",
            "-1",
            "--start-ms",
            "250",
        ])
        .unwrap();
        assert_eq!(args.backend, Some(Backend::Memory));
        let Command::Play(play) = args.cmd else {
            panic!("expected play");
        };
        assert_eq!(play.source, "/tmp/a.wav");
        assert_eq!(play.loop_count, Some(-1));
        assert_eq!(play.loop_end, Some(-1.0));
        assert_eq!(play.start_ms, Some(250));
        assert!(!play.streaming);
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let args = Args::try_parse_from(["enginectl", "devices", "--device", "usb"]).unwrap();
        assert!(matches!(args.cmd, Command::Devices));
        assert_eq!(args.device.as_deref(), Some("usb"));
    }
}
