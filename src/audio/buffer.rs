//! Circular sample storage shared by the acquisition thread and the
//! audio callback
//!
//! One array per stream channel plus a parallel timestamp array, all of the
//! same length and all written at the same index. The store is not
//! synchronized on its own; it lives inside the session mutex.

/// Fixed-capacity circular storage for N channels and their timestamps
pub struct RingBufferStore {
    /// Per-channel sample rings
    channels: Vec<Vec<f32>>,
    /// Timestamp ring, parallel to the channel rings
    timestamps: Vec<f64>,
    /// Next slot to be overwritten
    write_index: usize,
    /// Total frames written since allocation
    frames_written: u64,
}

impl RingBufferStore {
    /// Allocate zeroed rings for `channel_count` channels of `len` samples.
    ///
    /// `len` is clamped to at least one sample.
    pub fn new(channel_count: usize, len: usize) -> Self {
        let len = len.max(1);
        Self {
            channels: (0..channel_count).map(|_| vec![0.0; len]).collect(),
            timestamps: vec![0.0; len],
            write_index: 0,
            frames_written: 0,
        }
    }

    /// Write one frame at the write index and advance it.
    ///
    /// Missing trailing values in `samples` are written as zero, extra values
    /// are ignored.
    pub fn write_frame(&mut self, samples: &[f32], timestamp: f64) {
        let idx = self.write_index;
        for (ch, ring) in self.channels.iter_mut().enumerate() {
            ring[idx] = samples.get(ch).copied().unwrap_or(0.0);
        }
        self.timestamps[idx] = timestamp;

        self.write_index = (idx + 1) % self.len();
        self.frames_written += 1;
    }

    /// Ring length in samples
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames_written == 0
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
