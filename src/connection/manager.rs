//! Connection manager
//!
//! Validates a resolved stream, allocates a fresh session for it and owns
//! the acquisition thread feeding that session. All methods run on the
//! control thread; the audio thread only ever sees the session through a
//! [`RealTimeConsumer`].
//!
//! Known limitation: the acquisition thread blocks in the stream's pull
//! without a timeout. `disconnect` raises the stop flag and closes the
//! handle, but if the transport cannot wake a parked pull the thread stays
//! parked until the next sample arrives or the remote stream goes away. It
//! is detached in that case and exits without touching any store once it
//! wakes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::audio::buffer::RingBufferStore;
use crate::audio::consumer::{ConsumerStats, ConsumerStatsSnapshot, CursorSnapshot, RealTimeConsumer};
use crate::audio::session::{RateTiming, Session, SharedSession, WarmUp};
use crate::config::InletConfig;
use crate::connection::ConnectionState;
use crate::error::{ConfigError, ConnectError, DirectoryError};
use crate::network::acquisition::{AcquisitionLoop, AcquisitionTask};
use crate::network::directory::StreamDirectory;
use crate::network::source::{StreamHandle, StreamService};
use crate::protocol::{PropertyKey, StreamDescriptor};

struct ActiveConnection {
    descriptor: StreamDescriptor,
    handle: Arc<dyn StreamHandle>,
    task: AcquisitionTask,
    generation: u64,
    frames_received: Arc<AtomicU64>,
    timing: RateTiming,
}

/// Warm-up progress as reported by [`InletStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WarmUpStatus {
    pub accumulated: f64,
    pub threshold: f64,
    pub iterations_required: u64,
    pub ready: bool,
}

/// Snapshot of the inlet for the control surface
#[derive(Debug, Clone, Serialize)]
pub struct InletStatus {
    pub state: ConnectionState,
    pub stream: Option<StreamDescriptor>,
    pub generation: Option<u64>,
    pub rate_ratio: Option<f64>,
    pub lag_source_samples: Option<f64>,
    pub warmup: Option<WarmUpStatus>,
    pub frames_received: u64,
    pub consumer: ConsumerStatsSnapshot,
    pub cursor: Option<CursorSnapshot>,
    pub resolved_streams: usize,
}

/// Owns the directory, the shared session and the acquisition thread
pub struct ConnectionManager {
    config: InletConfig,
    service: Arc<dyn StreamService>,
    directory: Arc<StreamDirectory>,
    shared: Arc<SharedSession>,
    consumer_stats: Arc<ConsumerStats>,
    state: ConnectionState,
    active: Option<ActiveConnection>,
    next_generation: u64,
}

impl ConnectionManager {
    pub fn new(config: InletConfig, service: Arc<dyn StreamService>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            directory: Arc::new(StreamDirectory::new(service.clone())),
            config,
            service,
            shared: Arc::new(SharedSession::new()),
            consumer_stats: Arc::new(ConsumerStats::default()),
            state: ConnectionState::Disconnected,
            active: None,
            next_generation: 0,
        })
    }

    /// Reader for the audio thread. Stays valid across reconnections.
    pub fn consumer(&self) -> RealTimeConsumer {
        RealTimeConsumer::new(self.shared.clone(), self.consumer_stats.clone())
    }

    pub fn config(&self) -> &InletConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<StreamDirectory> {
        &self.directory
    }

    /// Discover every stream, blocking for up to the configured timeout
    pub fn resolve_all(&self) -> Result<usize, DirectoryError> {
        self.directory.resolve_all(self.config.resolve_timeout())
    }

    /// Discover every stream on a background thread
    pub fn spawn_resolve_all(
        &self,
    ) -> Result<JoinHandle<Result<usize, DirectoryError>>, DirectoryError> {
        self.directory.spawn_resolve_all(self.config.resolve_timeout())
    }

    pub fn resolve_by_property(&self, key: PropertyKey, value: &str) -> Result<usize, DirectoryError> {
        self.directory
            .resolve_by_property(key, value, self.config.resolve_timeout())
    }

    /// Check that a descriptor can be rendered with this configuration and
    /// derive its timing
    pub fn validate(
        config: &InletConfig,
        descriptor: &StreamDescriptor,
    ) -> Result<RateTiming, ConnectError> {
        if !descriptor.channel_format.is_audio_rate() {
            return Err(ConnectError::UnsupportedFormat(descriptor.channel_format));
        }
        if descriptor.is_irregular() {
            return Err(ConnectError::IrregularRate);
        }
        if descriptor.channel_count > config.outputs() {
            return Err(ConnectError::TooManyChannels {
                requested: descriptor.channel_count,
                available: config.outputs(),
            });
        }

        let timing = RateTiming::new(
            descriptor.nominal_srate,
            config.sample_rate,
            config.lag_samples(),
        );
        let required = timing.required_capacity(config.block_size);
        if required > config.buffer_len() {
            return Err(ConnectError::BufferTooSmall {
                required,
                capacity: config.buffer_len(),
            });
        }
        Ok(timing)
    }

    /// Connect to entry `index` of the current snapshot.
    ///
    /// Any existing connection is torn down first, and the new stream gets
    /// a freshly allocated store. Validation failures leave everything as
    /// it was.
    pub fn connect(&mut self, index: usize) -> Result<StreamDescriptor, ConnectError> {
        let snapshot = self.directory.snapshot();
        if snapshot.is_empty() {
            tracing::info!("No stream descriptors available. Please resolve available streams first.");
            return Err(ConnectError::NoCandidates);
        }
        let descriptor = snapshot
            .get(index)
            .cloned()
            .ok_or(ConnectError::IndexOutOfRange {
                index,
                available: snapshot.len(),
            })?;

        tracing::info!(
            "Connecting to {} stream {} ({})...",
            descriptor.stream_type,
            descriptor.name,
            descriptor.source_id
        );
        let timing = Self::validate(&self.config, &descriptor).map_err(|e| {
            tracing::error!("Cannot connect to {}: {}", descriptor.name, e);
            e
        })?;

        self.disconnect();
        self.state = ConnectionState::Connecting;

        let handle = match self.service.open(&descriptor, self.config.open_buffer()) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!("Could not establish connection: {}", e);
                self.state = ConnectionState::Disconnected;
                return Err(ConnectError::OpenFailed(e));
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let store = RingBufferStore::new(descriptor.channel_count, self.config.buffer_len());
        self.consumer_stats.reset();
        self.shared.install(Session::new(generation, store, timing));

        let acquisition = AcquisitionLoop::new(
            handle.clone(),
            self.shared.clone(),
            generation,
            descriptor.channel_count,
        );
        let frames_received = acquisition.frames_received();
        let task = match AcquisitionTask::start(format!("acquire-{generation}"), acquisition) {
            Ok(task) => task,
            Err(e) => {
                tracing::error!("Error launching listener thread: {}", e);
                handle.close();
                self.shared.clear(generation);
                self.state = ConnectionState::Disconnected;
                return Err(ConnectError::LaunchFailed(e.to_string()));
            }
        };

        tracing::info!(
            "...connected at ratio {:.6}, output starts after {} samples",
            timing.ratio(),
            WarmUp::new(timing.lag_local(), timing.ratio()).iterations_required()
        );

        self.active = Some(ActiveConnection {
            descriptor: descriptor.clone(),
            handle,
            task,
            generation,
            frames_received,
            timing,
        });
        self.state = ConnectionState::Connected;
        Ok(descriptor)
    }

    /// Resolve by property and connect to the first match
    pub fn connect_by_property(
        &mut self,
        key: PropertyKey,
        value: &str,
    ) -> Result<StreamDescriptor, ConnectError> {
        self.resolve_by_property(key, value)?;
        self.connect(0)
    }

    /// Tear down the current connection. Returns false if there was none.
    pub fn disconnect(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            self.state = ConnectionState::Disconnected;
            return false;
        };

        tracing::info!(
            "Disconnecting from {} stream {} ({})...",
            active.descriptor.stream_type,
            active.descriptor.name,
            active.descriptor.source_id
        );
        self.state = ConnectionState::Disconnecting;

        let ActiveConnection {
            descriptor,
            handle,
            mut task,
            generation,
            ..
        } = active;

        task.request_stop();
        handle.close();
        self.shared.clear(generation);

        match task.join_timeout(self.config.join_grace()) {
            Some(exit) => tracing::debug!("Acquisition thread joined: {:?}", exit),
            None => {
                tracing::warn!(
                    "Acquisition thread for {} is still waiting for a sample; detaching it",
                    descriptor.name
                );
                task.detach();
            }
        }

        self.state = ConnectionState::Disconnected;
        tracing::info!("...disconnected");
        true
    }

    /// Current state. A connection whose acquisition thread ended on its
    /// own (stream lost) reports as disconnected.
    pub fn state(&self) -> ConnectionState {
        match &self.active {
            Some(active) if self.state == ConnectionState::Connected && active.task.is_finished() => {
                ConnectionState::Disconnected
            }
            _ => self.state,
        }
    }

    pub fn descriptor(&self) -> Option<&StreamDescriptor> {
        self.active.as_ref().map(|active| &active.descriptor)
    }

    pub fn status(&self) -> InletStatus {
        let warmup = self.shared.with_session(|session| {
            let warmup = session.warmup();
            WarmUpStatus {
                accumulated: warmup.accumulated(),
                threshold: warmup.threshold(),
                iterations_required: warmup.iterations_required(),
                ready: warmup.is_ready(),
            }
        });

        InletStatus {
            state: self.state(),
            stream: self.descriptor().cloned(),
            generation: self.active.as_ref().map(|a| a.generation),
            rate_ratio: self.active.as_ref().map(|a| a.timing.ratio()),
            lag_source_samples: self.active.as_ref().map(|a| a.timing.lag_source()),
            warmup,
            frames_received: self
                .active
                .as_ref()
                .map_or(0, |a| a.frames_received.load(Ordering::Relaxed)),
            consumer: self.consumer_stats.snapshot(),
            cursor: self.consumer().snapshot(),
            resolved_streams: self.directory.len(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
