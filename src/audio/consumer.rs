//! Real-time consumer
//!
//! Runs on the audio callback thread. Each block takes the session lock
//! once, walks a fractional read cursor through the ring at the rate ratio
//! and reconstructs every channel with the six-point spline. It never
//! allocates, logs or performs I/O; everything it wants to report goes into
//! atomic counters.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::session::SharedSession;
use crate::audio::spline::interpolate;
use crate::constants::{SPLINE_TAPS_AHEAD, SPLINE_TAPS_BEHIND};

/// Counters updated by the audio callback.
///
/// The audio thread only ever increments. `reset` records a baseline that
/// later snapshots are taken relative to, so it never races an increment.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    blocks: AtomicU64,
    silent_blocks: AtomicU64,
    underruns: AtomicU64,
    resyncs: AtomicU64,
    /// f64 bits of the lead at the start of the last interpolated block
    last_lead: AtomicU64,
    baseline: Mutex<ConsumerStatsSnapshot>,
}

impl ConsumerStats {
    /// Counts since construction, ignoring any reset
    pub fn totals(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            silent_blocks: self.silent_blocks.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            last_lead: f64::from_bits(self.last_lead.load(Ordering::Relaxed)),
        }
    }

    /// Counts since the last reset
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        let totals = self.totals();
        let base = *self.baseline.lock();
        ConsumerStatsSnapshot {
            blocks: totals.blocks.saturating_sub(base.blocks),
            silent_blocks: totals.silent_blocks.saturating_sub(base.silent_blocks),
            underruns: totals.underruns.saturating_sub(base.underruns),
            resyncs: totals.resyncs.saturating_sub(base.resyncs),
            last_lead: totals.last_lead,
        }
    }

    pub fn reset(&self) {
        *self.baseline.lock() = self.totals();
    }

    fn record_lead(&self, lead: f64) {
        self.last_lead.store(lead.to_bits(), Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub blocks: u64,
    /// Blocks rendered as silence (disconnected or warming up)
    pub silent_blocks: u64,
    /// Blocks in which the cursor had to wait for the producer
    pub underruns: u64,
    /// Times the cursor was re-anchored after falling too far behind
    pub resyncs: u64,
    /// Source samples between cursor and writer at the start of the last
    /// interpolated block
    pub last_lead: f64,
}

/// Cursor position relative to the producer
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CursorSnapshot {
    pub generation: u64,
    pub ready: bool,
    /// Read position wrapped into the ring
    pub read_position: f64,
    pub write_index: usize,
    pub frames_written: u64,
    /// Source samples between cursor and write position
    pub lead: f64,
}

/// Reader half of a connection, handed to the audio thread
#[derive(Clone)]
pub struct RealTimeConsumer {
    shared: Arc<SharedSession>,
    stats: Arc<ConsumerStats>,
}

impl RealTimeConsumer {
    pub fn new(shared: Arc<SharedSession>, stats: Arc<ConsumerStats>) -> Self {
        Self { shared, stats }
    }

    /// Render one block into planar outputs.
    ///
    /// The block length is the shortest of the output and timestamp slices.
    /// Outputs beyond the stream's channel count are filled with zeros.
    pub fn process(&self, outputs: &mut [&mut [f32]], timestamps: &mut [f64]) {
        let frames = outputs
            .iter()
            .map(|out| out.len())
            .chain(std::iter::once(timestamps.len()))
            .min()
            .unwrap_or(0);
        let channels = outputs.len();

        self.render(
            frames,
            channels,
            |frame, ch, value| outputs[ch][frame] = value,
            |frame, ts| timestamps[frame] = ts,
        );
    }

    /// Render one block into an interleaved buffer, as handed out by audio
    /// device callbacks
    pub fn process_interleaved(
        &self,
        data: &mut [f32],
        channels: usize,
        mut timestamps: Option<&mut [f64]>,
    ) {
        if channels == 0 {
            return;
        }
        let mut frames = data.len() / channels;
        if let Some(ts) = timestamps.as_deref() {
            frames = frames.min(ts.len());
        }

        self.render(
            frames,
            channels,
            |frame, ch, value| data[frame * channels + ch] = value,
            |frame, ts| {
                if let Some(out) = timestamps.as_deref_mut() {
                    out[frame] = ts;
                }
            },
        );
    }

    fn render(
        &self,
        frames: usize,
        channels: usize,
        mut write: impl FnMut(usize, usize, f32),
        mut stamp: impl FnMut(usize, f64),
    ) {
        self.stats.blocks.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.shared.lock();
        let ready = guard.as_ref().is_some_and(|session| session.is_ready());
        if !ready {
            drop(guard);
            for frame in 0..frames {
                for ch in 0..channels {
                    write(frame, ch, 0.0);
                }
                stamp(frame, 0.0);
            }
            self.stats.silent_blocks.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(session) = guard.as_mut() else {
            return;
        };

        let len = session.store.len() as f64;
        let max_lead = session.timing.max_lead(frames);
        if !session.anchored {
            session.anchor();
        } else if session.lead() > max_lead || session.lead() + SPLINE_TAPS_BEHIND as f64 >= len {
            // Fell further behind than the lag allows, or the oldest taps
            // of the window have been overwritten
            session.anchor();
            self.stats.resyncs.fetch_add(1, Ordering::Relaxed);
        }
        let lead = session.lead();

        let ratio = session.timing.ratio();
        let written = session.store.frames_written() as f64;
        let mut held = false;

        for frame in 0..frames {
            let pos = session.read_position();
            for ch in 0..channels {
                let value = session
                    .store
                    .channel(ch)
                    .map_or(0.0, |history| interpolate(history, pos) as f32);
                write(frame, ch, value);
            }
            stamp(frame, interpolate(session.store.timestamps(), pos));

            let next = session.cursor + ratio;
            if written - next > SPLINE_TAPS_AHEAD as f64 {
                session.cursor = next;
            } else {
                held = true;
            }
        }

        drop(guard);
        self.stats.record_lead(lead);
        if held {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Where the cursor currently sits, if a session is installed
    pub fn snapshot(&self) -> Option<CursorSnapshot> {
        self.shared.with_session(|session| CursorSnapshot {
            generation: session.generation(),
            ready: session.is_ready(),
            read_position: session.read_position(),
            write_index: session.store().write_index(),
            frames_written: session.store().frames_written(),
            lead: session.lead(),
        })
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::RingBufferStore;
    use crate::audio::session::{RateTiming, Session};
    use std::f64::consts::PI;

    fn consumer_with(session: Session) -> (RealTimeConsumer, Arc<SharedSession>) {
        let shared = Arc::new(SharedSession::new());
        shared.install(session);
        let consumer = RealTimeConsumer::new(shared.clone(), Arc::new(ConsumerStats::default()));
        (consumer, shared)
    }

    fn push(shared: &SharedSession, samples: &[f32], ts: f64) {
        if let Some(session) = shared.lock().as_mut() {
            session.push_frame(samples, ts);
        }
    }

    #[test]
    fn test_silence_without_session() {
        let consumer =
            RealTimeConsumer::new(Arc::new(SharedSession::new()), Arc::new(ConsumerStats::default()));
        let mut left = [1.0f32; 16];
        let mut right = [1.0f32; 16];
        let mut ts = [1.0f64; 16];
        consumer.process(&mut [&mut left, &mut right], &mut ts);

        assert!(left.iter().chain(right.iter()).all(|&s| s == 0.0));
        assert!(ts.iter().all(|&t| t == 0.0));
        assert_eq!(consumer.stats().silent_blocks, 1);
        assert!(consumer.snapshot().is_none());
    }

    #[test]
    fn test_silence_until_warm_up_then_signal() {
        // lag 64 local samples at ratio 2.0: ready after 32 frames
        let timing = RateTiming::new(96000.0, 48000.0, 64);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 640), timing));
        let required = shared.with_session(|s| s.warmup().iterations_required()).unwrap();
        assert_eq!(required, 32);

        let mut out = [0.0f32; 64];
        let mut ts = [0.0f64; 64];
        for i in 0..31 {
            push(&shared, &[1.0], (i + 1) as f64);
            consumer.process(&mut [&mut out], &mut ts);
            assert!(out.iter().all(|&s| s == 0.0), "output before warm-up at frame {i}");
        }
        assert_eq!(consumer.snapshot().unwrap().read_position, 0.0);

        push(&shared, &[1.0], 32.0);
        consumer.process(&mut [&mut out], &mut ts);

        // The very first ready block reads written history only
        for (&s, &t) in out.iter().zip(ts.iter()) {
            assert!((s - 1.0).abs() < 1e-6, "sample {s}");
            assert!((1.0..=32.0).contains(&t), "timestamp {t}");
        }
        assert!(ts.windows(2).all(|w| w[1] >= w[0]));
        assert_eq!(consumer.stats().silent_blocks, 31);
    }

    #[test]
    fn test_first_block_at_very_low_ratio() {
        // 500 Hz into 48 kHz: the lag is shorter than the taps read ahead
        let timing = RateTiming::new(500.0, 48000.0, 64);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 640), timing));
        let required = shared.with_session(|s| s.warmup().iterations_required()).unwrap();
        assert_eq!(required, 6144);

        // Everything older than the last 144 frames is stale from earlier laps
        for i in 0..required {
            let v = if i >= required - 144 { 1.0 } else { -1.0 };
            push(&shared, &[v], i as f64);
        }
        let mut out = [0.0f32; 8];
        let mut ts = [0.0f64; 8];
        consumer.process(&mut [&mut out], &mut ts);

        for (&s, &t) in out.iter().zip(ts.iter()) {
            assert!((s - 1.0).abs() < 1e-6, "sample {s}");
            assert!((6138.0..=6143.0).contains(&t), "timestamp {t}");
        }
    }

    #[test]
    fn test_cursor_advances_by_ratio() {
        let timing = RateTiming::new(24000.0, 48000.0, 32);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 256), timing));
        for i in 0..100 {
            push(&shared, &[i as f32], i as f64);
        }

        let mut out = [0.0f32; 10];
        let mut ts = [0.0f64; 10];
        consumer.process(&mut [&mut out], &mut ts);

        // Anchored 16 source samples behind frame 100, half a sample per output
        let snapshot = consumer.snapshot().unwrap();
        assert_eq!(snapshot.read_position, 84.0 + 5.0);
        for (i, &t) in ts.iter().enumerate() {
            assert!((t - (84.0 + 0.5 * i as f64)).abs() < 1e-9);
        }
        for (i, &s) in out.iter().enumerate() {
            assert!((s - (84.0 + 0.5 * i as f32)).abs() < 1e-3);
        }
    }

    #[test]
    fn test_extra_outputs_are_silent() {
        let timing = RateTiming::new(48000.0, 48000.0, 8);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 64), timing));
        for i in 0..32 {
            push(&shared, &[0.5], i as f64);
        }

        let mut data = [9.0f32; 4 * 8];
        consumer.process_interleaved(&mut data, 4, None);
        for frame in data.chunks(4) {
            assert!((frame[0] - 0.5).abs() < 1e-6);
            assert_eq!(&frame[1..], &[0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_holds_instead_of_overtaking() {
        let timing = RateTiming::new(48000.0, 48000.0, 8);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 64), timing));
        for i in 0..8 {
            push(&shared, &[i as f32], i as f64);
        }

        let mut out = [0.0f32; 32];
        let mut ts = [0.0f64; 32];
        consumer.process(&mut [&mut out], &mut ts);

        let snapshot = consumer.snapshot().unwrap();
        assert!(snapshot.lead > SPLINE_TAPS_AHEAD as f64);
        assert_eq!(consumer.stats().underruns, 1);
    }

    #[test]
    fn test_resync_after_overrun() {
        let timing = RateTiming::new(48000.0, 48000.0, 8);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 64), timing));
        for i in 0..16 {
            push(&shared, &[i as f32], i as f64);
        }
        let mut out = [0.0f32; 4];
        let mut ts = [0.0f64; 4];
        consumer.process(&mut [&mut out], &mut ts);

        // Producer laps the reader
        for i in 16..200 {
            push(&shared, &[i as f32], i as f64);
        }
        consumer.process(&mut [&mut out], &mut ts);
        assert_eq!(consumer.stats().resyncs, 1);
        assert!((ts[0] - 192.0).abs() < 1e-9);
    }

    #[test]
    fn test_sine_reconstruction() {
        // 1 kHz sine at 8 kHz upsampled to 48 kHz
        let timing = RateTiming::new(8000.0, 48000.0, 64);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 2048), timing));
        for i in 0..1000 {
            let t = i as f64 / 8000.0;
            push(&shared, &[(2.0 * PI * 1000.0 * t).sin() as f32], t);
        }

        let mut out = [0.0f32; 64];
        let mut ts = [0.0f64; 64];
        consumer.process(&mut [&mut out], &mut ts);
        for (&s, &t) in out.iter().zip(ts.iter()) {
            let expected = (2.0 * PI * 1000.0 * t).sin();
            assert!((s as f64 - expected).abs() < 0.02, "{s} vs {expected} at {t}");
        }
    }

    #[test]
    fn test_resync_when_lead_exceeds_lag() {
        let timing = RateTiming::new(48000.0, 48000.0, 8);
        let (consumer, shared) = consumer_with(Session::new(1, RingBufferStore::new(1, 64), timing));
        for i in 0..16 {
            push(&shared, &[i as f32], i as f64);
        }
        let mut out = [0.0f32; 4];
        let mut ts = [0.0f64; 4];
        consumer.process(&mut [&mut out], &mut ts);

        // Ahead by more than lag + one block + window, but still inside the ring
        for i in 16..46 {
            push(&shared, &[i as f32], i as f64);
        }
        consumer.process(&mut [&mut out], &mut ts);
        assert_eq!(consumer.stats().resyncs, 1);
        assert_eq!(consumer.stats().last_lead, 8.0);
        assert!((ts[0] - 38.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset_does_not_lose_concurrent_counts() {
        let stats = Arc::new(ConsumerStats::default());
        let consumer = RealTimeConsumer::new(Arc::new(SharedSession::new()), stats.clone());

        let audio = std::thread::spawn(move || {
            let mut out = [0.0f32; 4];
            let mut ts = [0.0f64; 4];
            for _ in 0..5000 {
                consumer.process(&mut [&mut out], &mut ts);
            }
        });
        for _ in 0..200 {
            stats.reset();
            std::thread::yield_now();
        }
        audio.join().unwrap();

        assert_eq!(stats.totals().blocks, 5000);
        assert_eq!(stats.totals().silent_blocks, 5000);
        assert!(stats.snapshot().blocks <= 5000);

        stats.reset();
        assert_eq!(stats.snapshot().blocks, 0);
        assert_eq!(stats.totals().blocks, 5000);
    }
}
