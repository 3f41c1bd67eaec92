//! Stream Inlet Application
//!
//! Reads control commands from stdin and renders the connected stream to
//! the default output device (with the `device` feature) or to a headless
//! block clock. A demo sine stream is advertised on the in-process
//! transport so there is always something to connect to.

use anyhow::Result;
use std::f64::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stream_inlet::{
    audio::RealTimeConsumer,
    config::InletConfig,
    connection::ConnectionManager,
    control::{Command, CommandOutcome},
    network::LoopbackService,
    protocol::ChannelFormat,
};

const DEMO_RATE: f64 = 44100.0;
const DEMO_CHUNK: usize = 44;

/// Advertise a two-channel sine and push it in 1 ms chunks
fn spawn_demo_source(service: LoopbackService, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("demo-source".to_string())
        .spawn(move || {
            let outlet = service.create_outlet(
                "DemoSine",
                "Audio",
                "demo-sine-440",
                2,
                DEMO_RATE,
                ChannelFormat::Float32,
            );
            let period = Duration::from_secs_f64(DEMO_CHUNK as f64 / DEMO_RATE);
            let mut n: u64 = 0;
            let mut next = Instant::now();

            while running.load(Ordering::Relaxed) {
                for _ in 0..DEMO_CHUNK {
                    let t = n as f64 / DEMO_RATE;
                    let left = (2.0 * PI * 440.0 * t).sin() as f32 * 0.25;
                    let right = (2.0 * PI * 660.0 * t).sin() as f32 * 0.25;
                    outlet.push_sample(&[left, right], service.local_clock());
                    n += 1;
                }
                next += period;
                thread::sleep(next.saturating_duration_since(Instant::now()));
            }
        })?;
    Ok(handle)
}

/// Drive the consumer at the configured block cadence without a device
fn spawn_headless_clock(
    consumer: RealTimeConsumer,
    config: &InletConfig,
    running: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let block = config.block_size;
    let outputs = config.outputs();
    let period = Duration::from_secs_f64(block as f64 / config.sample_rate);

    let handle = thread::Builder::new()
        .name("headless-clock".to_string())
        .spawn(move || {
            let mut channels = vec![vec![0.0f32; block]; outputs];
            let mut timestamps = vec![0.0f64; block];
            let mut next = Instant::now();

            while running.load(Ordering::Relaxed) {
                let mut outs: Vec<&mut [f32]> = channels.iter_mut().map(Vec::as_mut_slice).collect();
                consumer.process(&mut outs, &mut timestamps);
                next += period;
                thread::sleep(next.saturating_duration_since(Instant::now()));
            }
        })?;
    Ok(handle)
}

fn print_outcome(outcome: &CommandOutcome) {
    match serde_json::to_string_pretty(outcome) {
        Ok(text) => println!("{}", text),
        Err(e) => tracing::error!("Failed to format outcome: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stream Inlet");

    let config = match std::env::args().nth(1) {
        Some(path) => InletConfig::load(Path::new(&path))?,
        None => InletConfig::load_or_default()?,
    };
    tracing::info!(
        "{} outputs, {} Hz, block {}, buffer {} samples, lag {} samples",
        config.outputs,
        config.sample_rate,
        config.block_size,
        config.buffer_len(),
        config.lag_samples()
    );

    let running = Arc::new(AtomicBool::new(true));
    let service = LoopbackService::new();
    let demo = spawn_demo_source(service.clone(), running.clone())?;

    let mut manager = ConnectionManager::new(config.clone(), Arc::new(service))?;
    let consumer = manager.consumer();

    #[cfg(feature = "device")]
    let mut output = {
        use stream_inlet::audio::AudioOutput;
        match AudioOutput::new(None, &config, consumer.clone()).and_then(|mut o| o.start().map(|_| o)) {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::warn!("No audio output ({}), falling back to headless clock", e);
                None
            }
        }
    };
    #[cfg(feature = "device")]
    let clock = if output.is_some() {
        None
    } else {
        Some(spawn_headless_clock(consumer.clone(), &config, running.clone())?)
    };
    #[cfg(not(feature = "device"))]
    let clock = Some(spawn_headless_clock(consumer.clone(), &config, running.clone())?);

    println!("\nCommands: resolve_all | list | resolve_by_property -<key> <value> | connect <i>");
    println!("          connect_by_property -<key> <value> | disconnect | status\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = match line.parse::<Command>() {
                    // Resolution and teardown block for bounded time
                    Ok(command) => tokio::task::block_in_place(|| command.apply(&mut manager)),
                    Err(e) => CommandOutcome::error(e.to_string()),
                };
                print_outcome(&outcome);
            }
            _ = stats_interval.tick() => {
                let status = manager.status();
                let stats = consumer.stats();
                tracing::info!(
                    "Inlet {}: {} frames received, {} blocks ({} silent, {} underruns, {} resyncs)",
                    status.state,
                    status.frames_received,
                    stats.blocks,
                    stats.silent_blocks,
                    stats.underruns,
                    stats.resyncs
                );
                #[cfg(feature = "device")]
                {
                    if let Some(e) = output.as_ref().and_then(|o| o.check_errors()) {
                        tracing::warn!("Audio output error: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    tokio::task::block_in_place(|| manager.disconnect());
    running.store(false, Ordering::Relaxed);
    #[cfg(feature = "device")]
    {
        if let Some(output) = output.as_mut() {
            output.stop();
        }
    }
    if let Some(clock) = clock {
        let _ = clock.join();
    }
    let _ = demo.join();

    Ok(())
}
