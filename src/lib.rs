//! # Stream Inlet
//!
//! Renders an irregularly-clocked, network-delivered multichannel sample
//! stream as a fixed-rate, block-based audio signal with a timestamp channel.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                             CONTROL CONTEXT                                  │
//! │  ┌──────────────────────┐        ┌──────────────────────────────────────┐   │
//! │  │  Stream Directory    │──────▶ │        Connection Manager            │   │
//! │  │  (network::directory)│ index  │        (connection::manager)         │   │
//! │  │  single-flight busy  │        │  validate, allocate, launch, stop    │   │
//! │  └──────────┬───────────┘        └──────────────────┬───────────────────┘   │
//! │             │ discover()                             │ open() / close()      │
//! └─────────────┼────────────────────────────────────────┼───────────────────────┘
//!               ▼                                        ▼
//!     ┌───────────────────────────────────────────────────────────────┐
//!     │            Stream Service (network::source, external)         │
//!     └───────────────────────────────┬───────────────────────────────┘
//!                                     │ pull() blocks until a sample arrives
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │  ACQUISITION THREAD (network::acquisition)                                   │
//! │     lock ─▶ write frame + timestamp at write index ─▶ step warm-up ─▶ unlock │
//! └─────────────────────────────────────┬───────────────────────────────────────┘
//!                                       ▼
//!            ┌────────────────────────────────────────────────────┐
//!            │  Session (audio::session) behind one Mutex          │
//!            │  ┌──────────┐ ┌──────────┐       ┌──────────────┐   │
//!            │  │ ch 0 ring│ │ ch 1 ring│  ...  │ timestamp ring│  │
//!            │  └──────────┘ └──────────┘       └──────────────┘   │
//!            └────────────────────────┬───────────────────────────┘
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │  AUDIO CALLBACK (audio::consumer)                                            │
//! │     lock once per block ─▶ 6-point spline at fractional cursor per channel  │
//! │     ─▶ cursor += source rate / local rate ─▶ unlock                          │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod connection;
pub mod control;
pub mod error;
pub mod network;
pub mod protocol;

/// Application-wide constants
pub mod constants {
    /// Default local sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: f64 = 48000.0;

    /// Default local block size in samples
    pub const DEFAULT_BLOCK_SIZE: usize = 64;

    /// Default number of signal outputs
    pub const DEFAULT_OUTPUTS: u32 = 8;

    /// Output counts a host may configure
    pub const VALID_OUTPUTS: [u32; 6] = [1, 2, 4, 8, 16, 32];

    /// Default ring buffer length in blocks
    pub const DEFAULT_BUFFER_BLOCKS: usize = 10;

    /// Default lag in blocks
    pub const DEFAULT_LAG_BLOCKS: usize = 1;

    /// Default discovery timeout in seconds
    pub const DEFAULT_RESOLVE_TIMEOUT_SECS: f64 = 5.0;

    /// Default transport buffer hint in seconds
    pub const DEFAULT_OPEN_BUFFER_SECS: f64 = 300.0;

    /// Default time disconnect waits for the acquisition thread
    pub const DEFAULT_JOIN_GRACE_MS: u64 = 50;

    /// Maximum number of descriptors kept by one resolution
    pub const MAX_RESOLVED_STREAMS: usize = 50;

    /// Number of taps read by the spline interpolator
    pub const SPLINE_TAPS: usize = 6;

    /// Taps before the integer read position
    pub const SPLINE_TAPS_BEHIND: usize = 2;

    /// Taps after the integer read position
    pub const SPLINE_TAPS_AHEAD: usize = 3;
}
