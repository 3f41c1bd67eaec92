//! Audio output to a device
//!
//! The cpal stream is built and kept alive on its own thread; its callback
//! hands every interleaved buffer to the [`RealTimeConsumer`].

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::consumer::RealTimeConsumer;
use crate::audio::device::get_output_device;
use crate::config::InletConfig;
use crate::error::AudioError;

/// Device output driven by the consumer
pub struct AudioOutput {
    device_name: Option<String>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    frames_rendered: Arc<AtomicU64>,
    config: StreamConfig,
    consumer: RealTimeConsumer,
}

impl AudioOutput {
    /// Prepare output on the named device, or the default one.
    ///
    /// The device's own channel count is used; outputs the stream does not
    /// cover are rendered silent.
    pub fn new(
        device_name: Option<&str>,
        inlet: &InletConfig,
        consumer: RealTimeConsumer,
    ) -> Result<Self, AudioError> {
        let device = get_output_device(device_name)?;
        let default_config = device.default_config()?;

        if !(inlet.sample_rate.fract() == 0.0 && inlet.sample_rate <= u32::MAX as f64) {
            return Err(AudioError::UnsupportedConfig(format!(
                "sample rate {} is not an integer",
                inlet.sample_rate
            )));
        }

        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: cpal::SampleRate(inlet.sample_rate as u32),
            buffer_size: cpal::BufferSize::Fixed(inlet.block_size as u32),
        };

        Ok(Self {
            device_name: device_name.map(str::to_string),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            frames_rendered: Arc::new(AtomicU64::new(0)),
            config,
            consumer,
        })
    }

    /// Start rendering
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_output_device(self.device_name.as_deref())?;
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let frames_rendered = self.frames_rendered.clone();
        let consumer = self.consumer.clone();
        let config = self.config.clone();
        let channels = self.config.channels as usize;

        self.frames_rendered.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("output-{}", device.name))
            .spawn(move || {
                let cpal_device = device.into_inner();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) {
                            data.fill(0.0);
                            return;
                        }
                        consumer.process_interleaved(data, channels, None);
                        frames_rendered.fetch_add((data.len() / channels) as u64, Ordering::Relaxed);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!("Failed to start output stream: {}", e);
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!("Failed to build output stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!(
            "Audio output started: {} channels at {} Hz",
            self.config.channels,
            self.config.sample_rate.0
        );
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop rendering and join the stream thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Next error reported by the device, if any
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
