//! enginectl runtime helpers.
//!
//! Builds the provider and registry from the resolved config, then runs one subcommand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use audio_engine::{
    AudioEvent, AudioFormat, AudioProvider, AudioRegistry, AudioResource, CpalProvider,
    LoadedResource, MemoryProvider, callback, is_output_supported,
};
use crossbeam_channel::{Receiver, bounded};

use crate::cli::PlayArgs;
use crate::config::{Backend, CliConfig};

const WAIT_TICK: Duration = Duration::from_millis(50);
const MEMORY_TONE_SECONDS: f32 = 2.0;

fn build_provider(cfg: &CliConfig) -> Arc<dyn AudioProvider> {
    match cfg.backend {
        Backend::Cpal => Arc::new(CpalProvider::new(cfg.engine.device.clone())),
        Backend::Memory => Arc::new(MemoryProvider::new()),
    }
}

/// List mixers and print them to stdout.
pub fn list_devices(cfg: &CliConfig) -> Result<()> {
    let provider = build_provider(cfg);
    let mixers = provider
        .mixers()
        .with_context(|| format!("enumerate mixers ({})", provider.name()))?;
    if mixers.is_empty() {
        println!("no mixers found");
    }
    for (i, mixer) in mixers.iter().enumerate() {
        println!(
            "#{i}: {} [{}] {}-{} Hz{}",
            mixer.name,
            mixer.id,
            mixer.min_rate,
            mixer.max_rate,
            if mixer.supports_output { "" } else { " (no output)" }
        );
    }
    Ok(())
}

/// Report whether any mixer supports sample output.
pub fn check_output(cfg: &CliConfig) -> bool {
    let provider = build_provider(cfg);
    let supported = is_output_supported(provider.as_ref());
    println!(
        "{}: sample output {}",
        provider.name(),
        if supported { "supported" } else { "not supported" }
    );
    supported
}

/// Load one source, play it, and wait until it finishes or Ctrl-C arrives.
pub fn run_play(cfg: &CliConfig, args: &PlayArgs) -> Result<()> {
    let provider: Arc<dyn AudioProvider> = match cfg.backend {
        Backend::Cpal => Arc::new(CpalProvider::new(cfg.engine.device.clone())),
        Backend::Memory => {
            let memory = MemoryProvider::new();
            memory.insert_tone(
                &args.source,
                AudioFormat::new(44_100, 2),
                MEMORY_TONE_SECONDS,
                440.0,
            );
            Arc::new(memory)
        }
    };
    let registry = AudioRegistry::new(provider, cfg.engine.clone())
        .context("start audio registry")?;

    let resource = if args.streaming {
        let audio = registry
            .load_streaming(&args.source)
            .with_context(|| format!("load {}", args.source))?;
        if args.start_ms.is_some() || has_loop_flags(args) {
            tracing::warn!("seek and loop flags apply to buffered playback only");
        }
        LoadedResource::Streaming(audio)
    } else {
        let audio = registry
            .load_buffered(&args.source)
            .with_context(|| format!("load {}", args.source))?;
        if args.loop_start.is_some() || args.loop_end.is_some() {
            audio.set_loop_points(
                args.loop_start.unwrap_or(audio_engine::LOOP_FROM_START),
                args.loop_end.unwrap_or(audio_engine::LOOP_THROUGH_END),
            )?;
        }
        if let Some(count) = args.loop_count {
            audio.set_loop_count(count)?;
        }
        if let Some(ms) = args.start_ms {
            audio.set_playback_position_us(ms.saturating_mul(1_000));
        }
        tracing::info!(
            path = %audio.path(),
            format = %audio.format(),
            duration_ms = audio.duration_us() / 1_000,
            looping = audio.should_loop(),
            "source (buffered)"
        );
        LoadedResource::Buffered(audio)
    };

    let closed = install_logging_hooks(&resource);
    let interrupt = ctrlc_channel()?;

    resource.play()?;
    wait_for_end(&resource, &closed, &interrupt);
    registry.reset();
    Ok(())
}

fn has_loop_flags(args: &PlayArgs) -> bool {
    args.loop_count.is_some() || args.loop_start.is_some() || args.loop_end.is_some()
}

/// Log every hook; returns a flag set by the close hook.
fn install_logging_hooks(resource: &LoadedResource) -> Arc<AtomicBool> {
    let closed = Arc::new(AtomicBool::new(false));
    let channel = resource.events();
    let log = |hook: &'static str| {
        Some(callback(move |event: &AudioEvent| {
            tracing::info!(hook, id = %event.source, state = ?event.state(), "audio event");
        }))
    };
    channel.set_on_open(log("open"));
    channel.set_on_start(log("start"));
    channel.set_on_stop(log("stop"));
    channel.set_on_pause(log("pause"));
    channel.set_on_resume(log("resume"));
    let closed_flag = closed.clone();
    channel.set_on_close(Some(callback(move |event: &AudioEvent| {
        tracing::info!(hook = "close", id = %event.source, state = ?event.state(), "audio event");
        closed_flag.store(true, Ordering::Release);
    })));
    closed
}

fn ctrlc_channel() -> Result<Receiver<()>> {
    let (tx, rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(rx)
}

fn wait_for_end(resource: &LoadedResource, closed: &AtomicBool, interrupt: &Receiver<()>) {
    loop {
        if interrupt.recv_timeout(WAIT_TICK).is_ok() {
            tracing::info!("interrupted; stopping");
            resource.stop();
            return;
        }
        if closed.load(Ordering::Acquire) {
            return;
        }
        // buffered playback stays open at its natural end
        if matches!(resource, LoadedResource::Buffered(_)) && !resource.is_active() {
            resource.stop();
            return;
        }
    }
}
