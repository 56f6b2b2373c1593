//! `SharedRing`: fixed-capacity interleaved stereo store plus the index pair.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{available_to_read, available_to_write, CHANNELS};

/// Snapshot of both indices, loaded together at the start of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndices {
    pub read: usize,
    pub write: usize,
    pub capacity: usize,
}

impl RingIndices {
    pub fn available_to_read(&self) -> usize {
        available_to_read(self.read, self.write, self.capacity)
    }

    pub fn available_to_write(&self) -> usize {
        available_to_write(self.read, self.write, self.capacity)
    }
}

/// Ring of `capacity` stereo frames shared by one producer and one consumer.
///
/// Samples live in `AtomicU32` cells holding `f32` bit patterns, so concurrent
/// access from the two sides is race-free without `unsafe`. Per-sample accesses
/// are `Relaxed`; ordering comes from the index publish/load pair.
pub struct SharedRing {
    samples: Box<[AtomicU32]>,
    capacity: usize,
    /// Written only by the consumer.
    read_index: AtomicUsize,
    /// Written only by the producer.
    write_index: AtomicUsize,
}

impl SharedRing {
    /// Use [`super::create_shared_ring`], which validates the capacity.
    pub(crate) fn new(capacity: usize) -> Self {
        let samples = (0..capacity * CHANNELS)
            .map(|_| AtomicU32::new(0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            samples,
            capacity,
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
        }
    }

    /// Capacity in frames, including the reserved slot.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames that can actually be buffered at once.
    pub fn usable_capacity(&self) -> usize {
        self.capacity - 1
    }

    pub fn load_indices(&self) -> RingIndices {
        RingIndices {
            read: self.read_index.load(Ordering::Acquire),
            write: self.write_index.load(Ordering::Acquire),
            capacity: self.capacity,
        }
    }

    /// Publish a new `write_index`. Producer only, after `write` returns.
    pub fn publish_write_index(&self, index: usize) {
        debug_assert!(index < self.capacity);
        self.write_index.store(index, Ordering::Release);
    }

    /// Publish a new `read_index`. Consumer only, after `read` returns.
    pub fn publish_read_index(&self, index: usize) {
        debug_assert!(index < self.capacity);
        self.read_index.store(index, Ordering::Release);
    }

    /// Copy interleaved `samples` into the ring starting at frame `at`,
    /// wrapping to offset 0 when the write crosses `capacity`.
    ///
    /// The caller must already have clamped the frame count to
    /// `available_to_write`; the index is *not* published here.
    ///
    /// Returns the index to publish, or `None` if `at` is out of range, the
    /// slice is not whole frames, or it exceeds the usable capacity.
    pub fn write(&self, at: usize, samples: &[f32]) -> Option<usize> {
        let frames = self.frame_count(at, samples.len())?;

        let first = frames.min(self.capacity - at);
        let (head, tail) = samples.split_at(first * CHANNELS);
        store_samples(&self.samples[at * CHANNELS..(at + first) * CHANNELS], head);
        store_samples(&self.samples[..tail.len()], tail);

        Some((at + frames) % self.capacity)
    }

    /// Copy frames starting at `at` into interleaved `out`, wrapping at
    /// `capacity`. The caller must have clamped to `available_to_read`.
    ///
    /// Returns the index to publish, or `None` on the same precondition
    /// failures as [`SharedRing::write`].
    pub fn read(&self, at: usize, out: &mut [f32]) -> Option<usize> {
        let frames = self.frame_count(at, out.len())?;

        let first = frames.min(self.capacity - at);
        let (head, tail) = out.split_at_mut(first * CHANNELS);
        load_samples(&self.samples[at * CHANNELS..(at + first) * CHANNELS], head);
        let tail_len = tail.len();
        load_samples(&self.samples[..tail_len], tail);

        Some((at + frames) % self.capacity)
    }

    fn frame_count(&self, at: usize, sample_len: usize) -> Option<usize> {
        if at >= self.capacity || sample_len % CHANNELS != 0 {
            return None;
        }
        let frames = sample_len / CHANNELS;
        (frames <= self.usable_capacity()).then_some(frames)
    }
}

impl std::fmt::Debug for SharedRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRing")
            .field("capacity", &self.capacity)
            .field("indices", &self.load_indices())
            .finish_non_exhaustive()
    }
}

fn store_samples(dst: &[AtomicU32], src: &[f32]) {
    for (slot, sample) in dst.iter().zip(src) {
        slot.store(sample.to_bits(), Ordering::Relaxed);
    }
}

fn load_samples(src: &[AtomicU32], dst: &mut [f32]) {
    for (sample, slot) in dst.iter_mut().zip(src) {
        *sample = f32::from_bits(slot.load(Ordering::Relaxed));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::create_shared_ring;

    /// Interleaved frames whose left channel carries the frame number.
    fn numbered_frames(range: std::ops::Range<usize>) -> Vec<f32> {
        range.flat_map(|n| [n as f32, -(n as f32)]).collect()
    }

    fn left_channel(samples: &[f32]) -> Vec<f32> {
        samples.chunks(CHANNELS).map(|f| f[0]).collect()
    }

    #[test]
    fn generate_then_consume_without_wrap() {
        let ring = create_shared_ring(8).expect("ring");
        let idx = ring.load_indices();
        assert_eq!((idx.read, idx.write), (0, 0));

        let write = ring.write(idx.write, &numbered_frames(0..5)).expect("write");
        ring.publish_write_index(write);
        assert_eq!(write, 5);

        let mut out = vec![0.0; 3 * CHANNELS];
        let read = ring.read(ring.load_indices().read, &mut out).expect("read");
        ring.publish_read_index(read);

        assert_eq!(left_channel(&out), vec![0.0, 1.0, 2.0]);
        assert_eq!(read, 3);
        assert_eq!(ring.load_indices().available_to_read(), 2);
    }

    #[test]
    fn write_splits_across_the_end_of_the_buffer() {
        let ring = create_shared_ring(8).expect("ring");
        // Move both indices to 6 so the ring is empty but positioned near the end.
        let w = ring.write(0, &numbered_frames(0..6)).expect("prefill");
        ring.publish_write_index(w);
        let mut sink = vec![0.0; 6 * CHANNELS];
        let r = ring.read(0, &mut sink).expect("drain");
        ring.publish_read_index(r);

        let write = ring.write(6, &numbered_frames(100..104)).expect("split write");
        assert_eq!(write, 2);
        ring.publish_write_index(write);

        // Offsets [6, 7] then [0, 1].
        let raw: Vec<f32> = ring
            .samples
            .iter()
            .map(|s| f32::from_bits(s.load(Ordering::Relaxed)))
            .collect();
        assert_eq!(raw[6 * CHANNELS], 100.0);
        assert_eq!(raw[7 * CHANNELS], 101.0);
        assert_eq!(raw[0], 102.0);
        assert_eq!(raw[CHANNELS], 103.0);
    }

    #[test]
    fn fifo_order_survives_wraparound() {
        let ring = create_shared_ring(8).expect("ring");
        ring.publish_write_index(6);
        ring.publish_read_index(6);

        let written = numbered_frames(0..4);
        let w = ring.write(6, &written).expect("write");
        ring.publish_write_index(w);

        let mut out = vec![0.0; 4 * CHANNELS];
        let r = ring.read(6, &mut out).expect("read");
        ring.publish_read_index(r);

        assert_eq!(out, written);
        assert_eq!(r, 2);
        assert_eq!(ring.load_indices().available_to_read(), 0);
    }

    #[test]
    fn write_reaching_exactly_capacity_wraps_index_to_zero() {
        let ring = create_shared_ring(8).expect("ring");
        ring.publish_read_index(3);
        ring.publish_write_index(3);
        assert_eq!(ring.write(3, &numbered_frames(0..5)), Some(0));
    }

    #[test]
    fn rejects_out_of_contract_requests() {
        let ring = create_shared_ring(8).expect("ring");
        // odd sample count is not a whole number of frames
        assert_eq!(ring.write(0, &[0.0; 3]), None);
        // start index outside the ring
        assert_eq!(ring.write(8, &[0.0; 2]), None);
        // more than the usable capacity
        assert_eq!(ring.write(0, &numbered_frames(0..8)), None);
        let mut out = vec![0.0; 8 * CHANNELS];
        assert_eq!(ring.read(0, &mut out), None);
    }

    #[test]
    fn empty_copy_is_a_no_op() {
        let ring = create_shared_ring(4).expect("ring");
        assert_eq!(ring.write(2, &[]), Some(2));
        let mut out: [f32; 0] = [];
        assert_eq!(ring.read(3, &mut out), Some(3));
    }
}
