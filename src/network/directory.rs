//! Stream directory
//!
//! Holds the descriptors found by the most recent resolution. Resolutions
//! are single-flight: a request made while another is running is refused
//! on the spot, never queued.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::MAX_RESOLVED_STREAMS;
use crate::error::DirectoryError;
use crate::network::source::StreamService;
use crate::protocol::{PropertyFilter, PropertyKey, StreamDescriptor};

/// Holds the busy flag for the duration of one resolution
pub struct ResolveGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Discovered streams and the resolver that fills them
pub struct StreamDirectory {
    service: Arc<dyn StreamService>,
    snapshot: RwLock<Arc<Vec<StreamDescriptor>>>,
    busy: Arc<AtomicBool>,
}

impl StreamDirectory {
    pub fn new(service: Arc<dyn StreamService>) -> Self {
        Self {
            service,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the busy flag, or report that a resolution is already running
    pub fn try_begin(&self) -> Result<ResolveGuard, DirectoryError> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DirectoryError::Busy)?;
        Ok(ResolveGuard {
            busy: self.busy.clone(),
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Discover every advertised stream.
    ///
    /// Finding nothing is not an error: the snapshot is emptied and 0 is
    /// returned.
    pub fn resolve_all(&self, timeout: Duration) -> Result<usize, DirectoryError> {
        let guard = self.try_begin()?;
        self.run_resolve_all(guard, timeout)
    }

    /// Discover streams whose `key` property equals `value`.
    ///
    /// No match is reported as [`DirectoryError::NoMatch`], distinct from a
    /// failed discovery.
    pub fn resolve_by_property(
        &self,
        key: PropertyKey,
        value: &str,
        timeout: Duration,
    ) -> Result<usize, DirectoryError> {
        let guard = self.try_begin()?;
        let filter = PropertyFilter::new(key, value);
        tracing::info!("Resolving streams with {} = {:?}...", key, value);

        let found = self.discover(Some(&filter), timeout)?;
        let count = self.install(found);
        drop(guard);

        if count == 0 {
            tracing::info!(
                "Could not find any streams of property {} matching value {:?}",
                key,
                value
            );
            return Err(DirectoryError::NoMatch {
                key,
                value: value.to_string(),
            });
        }
        self.post_streams();
        Ok(count)
    }

    /// Run `resolve_all` on a transient thread.
    ///
    /// The busy flag is claimed before spawning, so a concurrent request is
    /// refused here rather than inside the thread.
    pub fn spawn_resolve_all(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<JoinHandle<Result<usize, DirectoryError>>, DirectoryError> {
        let guard = self.try_begin()?;
        let directory = Arc::clone(self);

        thread::Builder::new()
            .name("stream-resolver".to_string())
            .spawn(move || directory.run_resolve_all(guard, timeout))
            .map_err(|e| DirectoryError::LaunchFailed(e.to_string()))
    }

    fn run_resolve_all(
        &self,
        guard: ResolveGuard,
        timeout: Duration,
    ) -> Result<usize, DirectoryError> {
        tracing::info!("Attempting to find streams on the network...");
        let found = self.discover(None, timeout)?;
        let count = self.install(found);
        drop(guard);

        if count == 0 {
            tracing::info!("No streams available");
        } else {
            self.post_streams();
        }
        Ok(count)
    }

    fn discover(
        &self,
        filter: Option<&PropertyFilter>,
        timeout: Duration,
    ) -> Result<Vec<StreamDescriptor>, DirectoryError> {
        self.service.discover(filter, timeout).map_err(|e| {
            tracing::error!("Stream discovery failed: {}", e);
            DirectoryError::Discovery(e)
        })
    }

    /// Replace the snapshot wholesale, keeping at most
    /// `MAX_RESOLVED_STREAMS` entries
    fn install(&self, mut found: Vec<StreamDescriptor>) -> usize {
        if found.len() > MAX_RESOLVED_STREAMS {
            tracing::warn!(
                "{} streams found, keeping the first {}",
                found.len(),
                MAX_RESOLVED_STREAMS
            );
            found.truncate(MAX_RESOLVED_STREAMS);
        }
        let count = found.len();

        let mut snapshot = self.snapshot.write();
        // Stale descriptors go before the new set is stored
        *snapshot = Arc::new(Vec::new());
        *snapshot = Arc::new(found);
        count
    }

    fn post_streams(&self) {
        tracing::info!("----------available streams------------");
        for (i, descriptor) in self.snapshot().iter().enumerate() {
            tracing::info!("[{}] {}", i, descriptor);
        }
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Vec<StreamDescriptor>> {
        self.snapshot.read().clone()
    }

    pub fn get(&self, index: usize) -> Option<StreamDescriptor> {
        self.snapshot.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::network::loopback::LoopbackService;
    use crate::protocol::ChannelFormat;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_millis(20);

    fn directory() -> (Arc<StreamDirectory>, LoopbackService) {
        let service = LoopbackService::new();
        (Arc::new(StreamDirectory::new(Arc::new(service.clone()))), service)
    }

    #[test]
    fn test_resolve_all_nothing_found() {
        let (directory, _service) = directory();
        assert_eq!(directory.resolve_all(TIMEOUT), Ok(0));
        assert!(directory.is_empty());
        assert!(!directory.is_busy());
    }

    #[test]
    fn test_resolve_all_replaces_snapshot() {
        let (directory, service) = directory();
        let a = service.create_outlet("A", "Audio", "a", 1, 100.0, ChannelFormat::Float32);
        assert_eq!(directory.resolve_all(TIMEOUT), Ok(1));
        let first = directory.snapshot();

        drop(a);
        let _b = service.create_outlet("B", "Audio", "b", 1, 100.0, ChannelFormat::Float32);
        let _c = service.create_outlet("C", "Audio", "c", 1, 100.0, ChannelFormat::Float32);
        assert_eq!(directory.resolve_all(TIMEOUT), Ok(2));

        // The earlier snapshot is untouched, the new one does not contain A
        assert_eq!(first[0].name, "A");
        let names: Vec<_> = directory.snapshot().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["B", "C"]);
    }

    #[test]
    fn test_snapshot_is_capacity_bounded() {
        let (directory, service) = directory();
        let _outlets: Vec<_> = (0..60)
            .map(|i| service.create_outlet(&format!("s{i}"), "Audio", "x", 1, 100.0, ChannelFormat::Float32))
            .collect();
        assert_eq!(directory.resolve_all(TIMEOUT), Ok(MAX_RESOLVED_STREAMS));
        assert_eq!(directory.len(), MAX_RESOLVED_STREAMS);
    }

    #[test]
    fn test_resolve_by_property_no_match_is_distinct() {
        let (directory, service) = directory();
        let _a = service.create_outlet("A", "Audio", "a", 1, 100.0, ChannelFormat::Float32);

        assert_eq!(
            directory.resolve_by_property(PropertyKey::Type, "EEG", TIMEOUT),
            Err(DirectoryError::NoMatch {
                key: PropertyKey::Type,
                value: "EEG".into()
            })
        );

        service.set_discovery_failure(Some("offline"));
        assert_eq!(
            directory.resolve_by_property(PropertyKey::Type, "EEG", TIMEOUT),
            Err(DirectoryError::Discovery(NetworkError::DiscoveryFailed("offline".into())))
        );
        assert!(!directory.is_busy());
    }

    #[test]
    fn test_resolve_by_property_match() {
        let (directory, service) = directory();
        let _a = service.create_outlet("A", "Audio", "a", 1, 100.0, ChannelFormat::Float32);
        let _b = service.create_outlet("B", "EEG", "b", 4, 500.0, ChannelFormat::Float32);

        assert_eq!(directory.resolve_by_property(PropertyKey::Name, "B", TIMEOUT), Ok(1));
        assert_eq!(directory.get(0).unwrap().stream_type, "EEG");
        assert!(directory.get(1).is_none());
    }

    #[test]
    fn test_concurrent_resolution_rejected_immediately() {
        let (directory, service) = directory();
        service.set_discovery_delay(Duration::from_millis(300));

        let running = directory.spawn_resolve_all(Duration::from_secs(1)).unwrap();
        assert!(directory.is_busy());

        let started = Instant::now();
        assert_eq!(directory.resolve_all(TIMEOUT), Err(DirectoryError::Busy));
        assert_eq!(
            directory.resolve_by_property(PropertyKey::Name, "x", TIMEOUT),
            Err(DirectoryError::Busy)
        );
        assert!(matches!(
            directory.spawn_resolve_all(TIMEOUT),
            Err(DirectoryError::Busy)
        ));
        assert!(started.elapsed() < Duration::from_millis(200));

        assert_eq!(running.join().unwrap(), Ok(0));
        assert!(!directory.is_busy());
        assert_eq!(directory.resolve_all(TIMEOUT), Ok(0));
    }
}
