//! In-process stream service
//!
//! Streams are registered as outlets inside the same process and delivered
//! to open handles over crossbeam channels. Used by tests and by the demo
//! binary in place of a real network transport.

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::NetworkError;
use crate::network::source::{StreamHandle, StreamService};
use crate::protocol::{ChannelFormat, PropertyFilter, StreamDescriptor};

/// One sample in flight between an outlet and a handle
#[derive(Debug, Clone)]
struct LoopbackSample {
    values: Vec<f32>,
    timestamp: f64,
}

struct OutletEntry {
    descriptor: StreamDescriptor,
    subscribers: Vec<Sender<LoopbackSample>>,
}

#[derive(Default)]
struct Registry {
    outlets: Vec<OutletEntry>,
}

struct Inner {
    registry: Mutex<Registry>,
    registered: Condvar,
    discovery_delay: Mutex<Duration>,
    close_unblocks_pull: AtomicBool,
    discovery_failure: Mutex<Option<String>>,
    epoch: Instant,
}

/// In-memory stream service
#[derive(Clone)]
pub struct LoopbackService {
    inner: Arc<Inner>,
}

impl Default for LoopbackService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackService {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                registered: Condvar::new(),
                discovery_delay: Mutex::new(Duration::ZERO),
                close_unblocks_pull: AtomicBool::new(true),
                discovery_failure: Mutex::new(None),
                epoch: Instant::now(),
            }),
        }
    }

    /// Advertise a stream. The uid is assigned here.
    pub fn create_outlet(
        &self,
        name: &str,
        stream_type: &str,
        source_id: &str,
        channel_count: usize,
        nominal_srate: f64,
        channel_format: ChannelFormat,
    ) -> LoopbackOutlet {
        let descriptor = StreamDescriptor {
            name: name.to_string(),
            stream_type: stream_type.to_string(),
            source_id: source_id.to_string(),
            uid: uuid::Uuid::new_v4().to_string(),
            channel_count,
            nominal_srate,
            channel_format,
        };

        self.inner.registry.lock().outlets.push(OutletEntry {
            descriptor: descriptor.clone(),
            subscribers: Vec::new(),
        });
        self.inner.registered.notify_all();
        tracing::debug!("Loopback outlet registered: {}", descriptor);

        LoopbackOutlet {
            service: self.clone(),
            descriptor,
        }
    }

    /// Make every discovery call take at least this long
    pub fn set_discovery_delay(&self, delay: Duration) {
        *self.inner.discovery_delay.lock() = delay;
    }

    /// Make discovery fail with the given message until cleared
    pub fn set_discovery_failure(&self, message: Option<&str>) {
        *self.inner.discovery_failure.lock() = message.map(str::to_string);
    }

    /// Choose whether `close` wakes a parked `pull`.
    ///
    /// With `false` the service behaves like transports whose receive call
    /// cannot be interrupted: a pull stays blocked until the next sample.
    pub fn set_close_unblocks_pull(&self, unblocks: bool) {
        self.inner.close_unblocks_pull.store(unblocks, Ordering::SeqCst);
    }

    /// Monotonic clock in seconds, for sample timestamps
    pub fn local_clock(&self) -> f64 {
        self.inner.epoch.elapsed().as_secs_f64()
    }

    fn matching(registry: &Registry, filter: Option<&PropertyFilter>) -> Vec<StreamDescriptor> {
        registry
            .outlets
            .iter()
            .filter(|entry| filter.map_or(true, |f| f.matches(&entry.descriptor)))
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    fn publish(&self, uid: &str, sample: LoopbackSample) {
        let mut registry = self.inner.registry.lock();
        if let Some(entry) = registry.outlets.iter_mut().find(|e| e.descriptor.uid == uid) {
            entry
                .subscribers
                .retain(|tx| tx.send(sample.clone()).is_ok());
        }
    }

    fn unregister(&self, uid: &str) {
        // Dropping the senders wakes every handle with a disconnect
        self.inner
            .registry
            .lock()
            .outlets
            .retain(|entry| entry.descriptor.uid != uid);
    }
}

impl StreamService for LoopbackService {
    fn discover(
        &self,
        filter: Option<&PropertyFilter>,
        timeout: Duration,
    ) -> Result<Vec<StreamDescriptor>, NetworkError> {
        let started = Instant::now();
        let delay = (*self.inner.discovery_delay.lock()).min(timeout);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        if let Some(message) = self.inner.discovery_failure.lock().clone() {
            return Err(NetworkError::DiscoveryFailed(message));
        }

        let deadline = started + timeout;
        let mut registry = self.inner.registry.lock();
        loop {
            let found = Self::matching(&registry, filter);
            if !found.is_empty() || Instant::now() >= deadline {
                return Ok(found);
            }
            // Wake on the next registration, then re-check the filter
            if self
                .inner
                .registered
                .wait_until(&mut registry, deadline)
                .timed_out()
            {
                return Ok(Self::matching(&registry, filter));
            }
        }
    }

    fn open(
        &self,
        descriptor: &StreamDescriptor,
        _buffer_hint: Duration,
    ) -> Result<Arc<dyn StreamHandle>, NetworkError> {
        let (tx, rx) = unbounded();
        {
            let mut registry = self.inner.registry.lock();
            let entry = registry
                .outlets
                .iter_mut()
                .find(|e| e.descriptor.uid == descriptor.uid)
                .ok_or_else(|| {
                    NetworkError::OpenFailed(format!("stream {} is gone", descriptor.name))
                })?;
            entry.subscribers.push(tx);
        }

        let (close_tx, close_rx) = unbounded();
        Ok(Arc::new(LoopbackHandle {
            samples: rx,
            close_tx: Mutex::new(Some(close_tx)),
            close_rx,
            closed: AtomicBool::new(false),
            close_unblocks_pull: self.inner.close_unblocks_pull.load(Ordering::SeqCst),
        }))
    }
}

/// Producer side of a loopback stream
pub struct LoopbackOutlet {
    service: LoopbackService,
    descriptor: StreamDescriptor,
}

impl LoopbackOutlet {
    /// Deliver one sample to every open handle
    pub fn push_sample(&self, values: &[f32], timestamp: f64) {
        self.service.publish(
            &self.descriptor.uid,
            LoopbackSample {
                values: values.to_vec(),
                timestamp,
            },
        );
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }
}

impl Drop for LoopbackOutlet {
    fn drop(&mut self) {
        self.service.unregister(&self.descriptor.uid);
    }
}

struct LoopbackHandle {
    samples: Receiver<LoopbackSample>,
    close_tx: Mutex<Option<Sender<()>>>,
    close_rx: Receiver<()>,
    closed: AtomicBool,
    close_unblocks_pull: bool,
}

impl LoopbackHandle {
    fn deliver(sample: LoopbackSample, frame: &mut [f32]) -> f64 {
        for (slot, value) in frame.iter_mut().zip(sample.values.iter().chain(std::iter::repeat(&0.0))) {
            *slot = *value;
        }
        sample.timestamp
    }
}

impl StreamHandle for LoopbackHandle {
    fn pull(&self, frame: &mut [f32]) -> Result<f64, NetworkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NetworkError::Closed);
        }

        if self.close_unblocks_pull {
            select! {
                recv(self.samples) -> msg => match msg {
                    Ok(sample) => Ok(Self::deliver(sample, frame)),
                    Err(_) => Err(NetworkError::StreamLost),
                },
                recv(self.close_rx) -> _ => Err(NetworkError::Closed),
            }
        } else {
            match self.samples.recv() {
                Ok(sample) => Ok(Self::deliver(sample, frame)),
                Err(_) => Err(NetworkError::StreamLost),
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Disconnecting the close channel wakes a select-parked pull
        self.close_tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PropertyKey;
    use std::thread;

    fn service_with_outlet() -> (LoopbackService, LoopbackOutlet) {
        let service = LoopbackService::new();
        let outlet = service.create_outlet("Sine", "Audio", "gen-1", 2, 1000.0, ChannelFormat::Float32);
        (service, outlet)
    }

    #[test]
    fn test_discover_and_filter() {
        let (service, _outlet) = service_with_outlet();
        let _other = service.create_outlet("EEG", "EEG", "amp", 8, 500.0, ChannelFormat::Float32);

        let all = service.discover(None, Duration::from_millis(10)).unwrap();
        assert_eq!(all.len(), 2);

        let filter = PropertyFilter::new(PropertyKey::Type, "EEG");
        let eeg = service.discover(Some(&filter), Duration::from_millis(10)).unwrap();
        assert_eq!(eeg.len(), 1);
        assert_eq!(eeg[0].name, "EEG");

        let none = PropertyFilter::new(PropertyKey::Name, "missing");
        assert!(service.discover(Some(&none), Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn test_discover_waits_for_registration() {
        let service = LoopbackService::new();
        let publisher = service.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.create_outlet("Late", "Audio", "late", 1, 100.0, ChannelFormat::Float32)
        });

        let found = service.discover(None, Duration::from_secs(5)).unwrap();
        assert_eq!(found.len(), 1);
        let _outlet = t.join().unwrap();
    }

    #[test]
    fn test_discovery_failure() {
        let service = LoopbackService::new();
        service.set_discovery_failure(Some("no route"));
        assert_eq!(
            service.discover(None, Duration::ZERO),
            Err(NetworkError::DiscoveryFailed("no route".into()))
        );
    }

    #[test]
    fn test_pull_receives_pushed_samples() {
        let (service, outlet) = service_with_outlet();
        let handle = service.open(outlet.descriptor(), Duration::from_secs(1)).unwrap();

        outlet.push_sample(&[0.25, -0.25], 1.5);
        outlet.push_sample(&[1.0], 2.0);

        let mut frame = [0.0f32; 2];
        assert_eq!(handle.pull(&mut frame), Ok(1.5));
        assert_eq!(frame, [0.25, -0.25]);
        assert_eq!(handle.pull(&mut frame), Ok(2.0));
        assert_eq!(frame, [1.0, 0.0]);
    }

    #[test]
    fn test_dropped_outlet_loses_stream() {
        let (service, outlet) = service_with_outlet();
        let handle = service.open(outlet.descriptor(), Duration::from_secs(1)).unwrap();
        drop(outlet);

        let mut frame = [0.0f32; 2];
        assert_eq!(handle.pull(&mut frame), Err(NetworkError::StreamLost));
    }

    #[test]
    fn test_close_wakes_parked_pull() {
        let (service, outlet) = service_with_outlet();
        let handle = service.open(outlet.descriptor(), Duration::from_secs(1)).unwrap();

        let puller = handle.clone();
        let t = thread::spawn(move || {
            let mut frame = [0.0f32; 2];
            puller.pull(&mut frame)
        });
        thread::sleep(Duration::from_millis(20));
        handle.close();

        assert_eq!(t.join().unwrap(), Err(NetworkError::Closed));
    }

    #[test]
    fn test_open_unknown_stream_fails() {
        let (service, outlet) = service_with_outlet();
        let descriptor = outlet.descriptor().clone();
        drop(outlet);
        assert!(matches!(
            service.open(&descriptor, Duration::ZERO),
            Err(NetworkError::OpenFailed(_))
        ));
    }
}
