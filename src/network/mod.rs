//! Stream transport, discovery and acquisition

pub mod acquisition;
pub mod directory;
pub mod loopback;
pub mod source;

pub use acquisition::{AcquisitionLoop, AcquisitionTask, LoopExit};
pub use directory::StreamDirectory;
pub use loopback::{LoopbackOutlet, LoopbackService};
pub use source::{StreamHandle, StreamService};
