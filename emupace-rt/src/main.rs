//! emupace-rt - Main entry point
//!
//! Paces the demo machine against the system clock with live audio output.
//! The pacer runs on a blocking thread; the async runtime handles shutdown
//! signals and the audio callback monitor.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use emupace_common::timing::TickRate;
use emupace_rt::config::{ConfigOverrides, RuntimeConfig};
use emupace_rt::demo::{DemoMachine, LogPresenter};
use emupace_rt::pacing::{DriftCorrector, FramePacer, RunControl};
use emupace_rt::sound::{CallbackMonitor, SoundOutput, SoundRing};
use emupace_rt::{PacerStats, SystemClock};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for emupace-rt
#[derive(Parser, Debug)]
#[command(name = "emupace-rt")]
#[command(about = "Real-time pacing core for a hardware emulator, driving a demo machine")]
#[command(version)]
struct Args {
    /// Settings file (overrides EMUPACE_CONFIG and the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (runs until Ctrl+C if omitted)
    #[arg(short, long)]
    seconds: Option<u64>,

    /// Run without opening an audio device
    #[arg(long)]
    no_sound: bool,

    /// Tick rate override, ticks per second as NUM/DEN or NUM
    #[arg(long, value_name = "NUM/DEN")]
    tick_rate: Option<TickRate>,

    /// Demo tone frequency in Hz
    #[arg(long, default_value = "440")]
    tone_hz: u32,

    /// Synthetic work per emulated tick, in microseconds
    #[arg(long, default_value = "500")]
    work_us: u64,

    /// List audio output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = RuntimeConfig::load(ConfigOverrides {
        config_path: args.config.clone(),
        tick_rate: args.tick_rate,
        no_sound: args.no_sound,
    })
    .context("Failed to load configuration")?;

    // RUST_LOG wins over the settings file
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "emupace_rt={0},emupace_common={0}",
                    config.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in SoundOutput::list_devices().context("Failed to list audio devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!(
        "Starting emupace-rt: tick rate {}, lag cap {}, sound {}",
        config.sampler.rate,
        config.lag_cap,
        if config.sound_enabled { "on" } else { "off" }
    );

    let control = Arc::new(RunControl::new());
    let rt_handle = tokio::runtime::Handle::current();
    let work = Duration::from_micros(args.work_us);
    let tone_hz = args.tone_hz;

    let pacer_control = Arc::clone(&control);
    let mut pacer_task = tokio::task::spawn_blocking(move || {
        run_pacer(config, tone_hz, work, &pacer_control, rt_handle)
    });

    let run_for = async {
        match args.seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    let finished_early = tokio::select! {
        _ = shutdown_signal() => None,
        _ = run_for => {
            info!("Run time elapsed, shutting down");
            None
        },
        result = &mut pacer_task => Some(result),
    };

    control.request_shutdown();
    let stats = match finished_early {
        Some(result) => result,
        None => pacer_task.await,
    }
    .context("Pacer thread panicked")?;

    println!("{}", stats.to_json_pretty().context("Failed to serialise stats")?);
    info!("Shutdown complete");
    Ok(())
}

/// Build the sound path and pacer on the current (blocking) thread and run
/// until shutdown. The cpal stream is not `Send`, so it is created here.
fn run_pacer(
    config: RuntimeConfig,
    tone_hz: u32,
    work: Duration,
    control: &RunControl,
    rt_handle: tokio::runtime::Handle,
) -> PacerStats {
    let ring = SoundRing::new(config.ring);
    let ring_handle = ring.handle();
    let (producer, consumer) = ring.split();

    let machine = DemoMachine::new(config.sampler.rate, config.sample_rate, tone_hz, work);
    let mut pacer = FramePacer::new(
        SystemClock::new(),
        config.sampler,
        config.lag_cap,
        producer,
        machine,
        LogPresenter::default(),
    )
    .with_run_in_background(config.run_in_background);

    let mut monitor = None;
    if config.sound_enabled {
        let callback_monitor = Arc::new(CallbackMonitor::new());
        match SoundOutput::open(
            config.device.as_deref(),
            config.sample_rate,
            consumer,
            ring_handle.clone(),
            Some(Arc::clone(&callback_monitor)),
        ) {
            Ok(output) => {
                let monitor_shutdown = Arc::clone(&callback_monitor)
                    .spawn_monitoring_task(ring_handle.clone(), rt_handle);
                let drift = DriftCorrector::new(
                    ring_handle,
                    config.desired_min_filled_blocks,
                    pacer.timekeeper().sampler().wall_second(),
                );
                pacer = pacer.with_audio(Box::new(output), drift);
                monitor = Some((callback_monitor, monitor_shutdown));
            }
            Err(e) => warn!("Audio output unavailable, continuing without sound: {}", e),
        }
    }

    pacer.run(control);

    let mut stats = pacer.stats();
    if let Some((callback_monitor, monitor_shutdown)) = monitor {
        monitor_shutdown.store(true, Ordering::Relaxed);
        stats.callbacks = Some(callback_monitor.stats());
    }
    stats
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
