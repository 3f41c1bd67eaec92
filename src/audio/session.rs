//! Per-connection state shared between the acquisition thread and the
//! audio callback
//!
//! Unit conventions: "local" quantities count samples at the audio rate,
//! "source" quantities count samples at the stream's nominal rate. The ratio
//! converts local to source (`source = local * ratio`).

use parking_lot::{Mutex, MutexGuard};

use crate::audio::buffer::RingBufferStore;
use crate::constants::{SPLINE_TAPS, SPLINE_TAPS_AHEAD, SPLINE_TAPS_BEHIND};

/// Rate conversion between the stream and the local audio clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateTiming {
    local_rate: f64,
    source_rate: f64,
    lag_local: usize,
}

impl RateTiming {
    pub fn new(source_rate: f64, local_rate: f64, lag_local: usize) -> Self {
        Self {
            local_rate,
            source_rate,
            lag_local,
        }
    }

    /// Source samples consumed per local sample
    pub fn ratio(&self) -> f64 {
        self.source_rate / self.local_rate
    }

    pub fn local_rate(&self) -> f64 {
        self.local_rate
    }

    pub fn source_rate(&self) -> f64 {
        self.source_rate
    }

    pub fn local_to_source(&self, local: f64) -> f64 {
        local * self.ratio()
    }

    pub fn source_to_local(&self, source: f64) -> f64 {
        source / self.ratio()
    }

    /// Lag in local samples
    pub fn lag_local(&self) -> usize {
        self.lag_local
    }

    /// Lag in source samples
    pub fn lag_source(&self) -> f64 {
        self.local_to_source(self.lag_local as f64)
    }

    /// Largest lead, in source samples, the cursor may have at the start of
    /// a block of `block_size` local samples: the lag, one block of cursor
    /// travel and the interpolation window
    pub fn max_lead(&self, block_size: usize) -> f64 {
        self.lag_source() + self.local_to_source(block_size as f64) + SPLINE_TAPS as f64
    }

    /// Ring length needed to hold [`max_lead`](Self::max_lead)
    pub fn required_capacity(&self, block_size: usize) -> usize {
        self.max_lead(block_size).ceil() as usize
    }
}

/// Warm-up accumulator.
///
/// Each acquisition iteration adds the rate ratio; output may start once the
/// accumulated amount reaches the lag threshold (in local samples).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmUp {
    iterations: u64,
    ratio: f64,
    threshold: f64,
}

impl WarmUp {
    pub fn new(threshold: usize, ratio: f64) -> Self {
        Self {
            iterations: 0,
            ratio,
            threshold: threshold as f64,
        }
    }

    /// Record one acquisition iteration
    pub fn step(&mut self) {
        if !self.is_ready() {
            self.iterations += 1;
        }
    }

    pub fn accumulated(&self) -> f64 {
        self.iterations as f64 * self.ratio
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_ready(&self) -> bool {
        self.iterations >= self.iterations_required()
    }

    /// Iterations needed from connection until output may start
    pub fn iterations_required(&self) -> u64 {
        if self.threshold <= 0.0 {
            0
        } else {
            (self.threshold / self.ratio).ceil() as u64
        }
    }
}

/// State of one live connection
pub struct Session {
    pub(crate) generation: u64,
    pub(crate) store: RingBufferStore,
    pub(crate) timing: RateTiming,
    pub(crate) warmup: WarmUp,
    /// Fractional read position in source samples since allocation.
    /// Wrapped into the ring only when reading.
    pub(crate) cursor: f64,
    /// Whether the cursor has been aligned to the lag position yet
    pub(crate) anchored: bool,
    pub(crate) connected: bool,
}

impl Session {
    pub fn new(generation: u64, store: RingBufferStore, timing: RateTiming) -> Self {
        let warmup = WarmUp::new(timing.lag_local(), timing.ratio());
        Self {
            generation,
            store,
            timing,
            warmup,
            cursor: 0.0,
            anchored: false,
            connected: true,
        }
    }

    /// Store one frame from the stream. Called by the acquisition thread
    /// with the session lock held.
    pub fn push_frame(&mut self, samples: &[f32], timestamp: f64) {
        self.store.write_frame(samples, timestamp);
        self.warmup.step();
    }

    /// Whether the consumer may interpolate: warm-up is done and at least
    /// one full interpolation window has been written
    pub fn is_ready(&self) -> bool {
        self.connected
            && self.warmup.is_ready()
            && self.store.frames_written() >= SPLINE_TAPS as u64
    }

    /// Place the cursor `lag` source samples behind the newest frame,
    /// clamped so that every tap of the window lies in written history of
    /// the current lap.
    ///
    /// The lag can exceed what has been written (ratio above 1 right after
    /// warm-up) or be shorter than the taps read ahead (ratio well below 1).
    pub(crate) fn anchor(&mut self) {
        let written = self.store.frames_written();
        let span = written.min(self.store.len() as u64);
        let oldest = (written - span) as f64 + SPLINE_TAPS_BEHIND as f64;
        let newest = written as f64 - (SPLINE_TAPS_AHEAD + 1) as f64;

        let target = written as f64 - self.timing.lag_source();
        self.cursor = target.min(newest).max(oldest);
        self.anchored = true;
    }

    /// Source samples between the read cursor and the write position
    pub fn lead(&self) -> f64 {
        self.store.frames_written() as f64 - self.cursor
    }

    /// Cursor wrapped into `[0, len)`
    pub fn read_position(&self) -> f64 {
        self.cursor.rem_euclid(self.store.len() as f64)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn store(&self) -> &RingBufferStore {
        &self.store
    }

    pub fn timing(&self) -> &RateTiming {
        &self.timing
    }

    pub fn warmup(&self) -> &WarmUp {
        &self.warmup
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

/// The one lock guarding a connection's store, indices and flags.
///
/// Sessions are swapped in and out wholesale; the previous session is always
/// dropped after the guard is released so deallocation never happens while
/// the audio callback could be waiting.
#[derive(Default)]
pub struct SharedSession {
    slot: Mutex<Option<Session>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current session, if any
    pub fn install(&self, session: Session) {
        let previous = self.slot.lock().replace(session);
        drop(previous);
    }

    /// Remove the session if it still belongs to `generation`
    pub fn clear(&self, generation: u64) -> bool {
        let previous = {
            let mut slot = self.slot.lock();
            match slot.as_ref() {
                Some(session) if session.generation == generation => slot.take(),
                _ => None,
            }
        };
        previous.is_some()
    }

    /// Flag the session as no longer fed by its stream
    pub fn mark_lost(&self, generation: u64) {
        if let Some(session) = self.slot.lock().as_mut() {
            if session.generation == generation {
                session.connected = false;
            }
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.slot.lock()
    }

    /// Run `f` against the current session under the lock
    pub fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.slot.lock().as_ref().map(f)
    }

    pub fn is_installed(&self) -> bool {
        self.slot.lock().is_some()
    }
}
