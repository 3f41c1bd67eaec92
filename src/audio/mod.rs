//! Audio subsystem: sample storage, resampling and output

pub mod buffer;
pub mod consumer;
pub mod session;
pub mod spline;

#[cfg(feature = "device")]
pub mod device;
#[cfg(feature = "device")]
pub mod output;

pub use buffer::RingBufferStore;
pub use consumer::{ConsumerStats, RealTimeConsumer};
pub use session::{RateTiming, Session, SharedSession};
pub use spline::interpolate;

#[cfg(feature = "device")]
pub use device::{get_output_device, list_output_devices, OutputDeviceInfo};
#[cfg(feature = "device")]
pub use output::AudioOutput;
