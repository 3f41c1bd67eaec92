//! Contract with the external stream service
//!
//! The discovery and transport protocol itself lives outside this crate.
//! Implementations supply stream descriptors and a blocking, per-sample pull.

use std::sync::Arc;
use std::time::Duration;

use crate::error::NetworkError;
use crate::protocol::{PropertyFilter, StreamDescriptor};

/// A network service advertising streams
pub trait StreamService: Send + Sync {
    /// Look for advertised streams, optionally filtered by one property.
    ///
    /// Blocks for at most `timeout`. Returns an empty list when nothing
    /// appeared in time; errors only when discovery itself failed.
    fn discover(
        &self,
        filter: Option<&PropertyFilter>,
        timeout: Duration,
    ) -> Result<Vec<StreamDescriptor>, NetworkError>;

    /// Open a stream for sample pulls. `buffer_hint` is how much data the
    /// transport should queue on our behalf.
    fn open(
        &self,
        descriptor: &StreamDescriptor,
        buffer_hint: Duration,
    ) -> Result<Arc<dyn StreamHandle>, NetworkError>;
}

/// An open stream.
///
/// `pull` and `close` may be called from different threads.
pub trait StreamHandle: Send + Sync {
    /// Block until the next sample arrives, write its channel values into
    /// `frame` and return its timestamp.
    ///
    /// There is no timeout: the call returns only when a sample is available
    /// or when the stream goes away, in which case it errors.
    fn pull(&self, frame: &mut [f32]) -> Result<f64, NetworkError>;

    /// Release the stream.
    ///
    /// Best-effort with respect to a `pull` already parked on another thread:
    /// a transport may be unable to wake it, in which case that thread stays
    /// blocked until the next sample arrives or the remote side disappears.
    fn close(&self);
}
