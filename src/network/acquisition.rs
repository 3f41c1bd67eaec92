//! Acquisition loop
//!
//! A dedicated thread per connection pulls one sample at a time from the
//! stream and writes it into the session store under the session lock.
//!
//! Cancellation is cooperative: the stop flag is checked before and after
//! every pull. The pull itself has no timeout, so a loop parked on a stream
//! that never delivers again stays parked until the transport returns. Such
//! a loop is detached by the connection manager; once it wakes it sees the
//! stop flag (or a newer session generation) and exits without touching the
//! store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::session::SharedSession;
use crate::error::NetworkError;
use crate::network::source::StreamHandle;

/// Why an acquisition loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// The stop flag was raised
    Stopped,
    /// The session it was feeding has been replaced or removed
    Superseded,
    /// The stream errored or went away
    StreamError(NetworkError),
}

/// Producer half of a connection
pub struct AcquisitionLoop {
    handle: Arc<dyn StreamHandle>,
    shared: Arc<SharedSession>,
    generation: u64,
    channels: usize,
    stop: Arc<AtomicBool>,
    frames_received: Arc<AtomicU64>,
}

impl AcquisitionLoop {
    pub fn new(
        handle: Arc<dyn StreamHandle>,
        shared: Arc<SharedSession>,
        generation: u64,
        channels: usize,
    ) -> Self {
        Self {
            handle,
            shared,
            generation,
            channels,
            stop: Arc::new(AtomicBool::new(false)),
            frames_received: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stop flag bound to this loop
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Frames written into the store so far
    pub fn frames_received(&self) -> Arc<AtomicU64> {
        self.frames_received.clone()
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Run until stopped, superseded or the stream fails
    pub fn run(self) -> LoopExit {
        let mut frame = vec![0.0f32; self.channels];
        tracing::info!("Listening (generation {})", self.generation);

        let exit = loop {
            if self.stopped() {
                break LoopExit::Stopped;
            }

            let timestamp = match self.handle.pull(&mut frame) {
                Ok(ts) => ts,
                Err(_) if self.stopped() => break LoopExit::Stopped,
                Err(e) => break LoopExit::StreamError(e),
            };

            // Teardown may have begun while we were parked in pull
            if self.stopped() {
                break LoopExit::Stopped;
            }

            let mut guard = self.shared.lock();
            match guard.as_mut() {
                Some(session) if session.generation() == self.generation => {
                    session.push_frame(&frame, timestamp);
                }
                _ => break LoopExit::Superseded,
            }
            drop(guard);

            self.frames_received.fetch_add(1, Ordering::Relaxed);
        };

        if let LoopExit::StreamError(e) = &exit {
            tracing::warn!("Stream error in generation {}: {}", self.generation, e);
            self.shared.mark_lost(self.generation);
        }
        tracing::info!(
            "Acquisition loop for generation {} exited: {:?}",
            self.generation,
            exit
        );
        exit
    }
}

/// Background thread running one [`AcquisitionLoop`]
pub struct AcquisitionTask {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<LoopExit>>,
}

impl AcquisitionTask {
    /// Spawn the loop on a named thread
    pub fn start(name: String, acquisition: AcquisitionLoop) -> std::io::Result<Self> {
        let stop = acquisition.stop_flag();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || acquisition.run())?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Ask the loop to exit at its next check. Does not wake a parked pull.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait up to `timeout` for the thread to exit.
    ///
    /// Returns `None` if it is still running (typically parked in a pull);
    /// the task stays joinable.
    pub fn join_timeout(&mut self, timeout: Duration) -> Option<LoopExit> {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }

        let thread = self.thread.take()?;
        match thread.join() {
            Ok(exit) => Some(exit),
            Err(_) => {
                tracing::error!("Acquisition thread panicked");
                Some(LoopExit::Stopped)
            }
        }
    }

    /// Let the thread run on without us
    pub fn detach(mut self) {
        self.thread.take();
    }
}

impl Drop for AcquisitionTask {
    fn drop(&mut self) {
        // Never join here: the thread may be parked in a pull indefinitely
        self.request_stop();
    }
}
