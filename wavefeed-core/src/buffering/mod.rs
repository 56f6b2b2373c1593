//! Shared stereo ring buffer between the generator and the real-time callback.
//!
//! One producer writes frame data and owns `write_index`; one consumer reads
//! frame data and owns `read_index`. Each side loads the other's index with
//! `Acquire` and publishes its own with `Release` only after the frame data it
//! advances over has been fully copied, so no lock is ever taken.
//!
//! One slot is permanently reserved: `write_index == read_index` means empty,
//! `write_index + 1 == read_index (mod capacity)` means full. Usable capacity is
//! therefore `capacity - 1` frames.

pub mod ring;

use std::sync::Arc;

use crate::error::{Result, WavefeedError};

pub use ring::{RingIndices, SharedRing};

/// Interleaved channels per frame (left, right).
pub const CHANNELS: usize = 2;

/// Default ring capacity in frames: 8192 frames ≈ 186 ms at 44.1 kHz.
pub const DEFAULT_CAPACITY: usize = 8192;

/// Frames readable between `read_index` and `write_index`.
#[inline]
pub fn available_to_read(read_index: usize, write_index: usize, capacity: usize) -> usize {
    (write_index + capacity - read_index) % capacity
}

/// Frames writable without touching unread data or the reserved slot.
#[inline]
pub fn available_to_write(read_index: usize, write_index: usize, capacity: usize) -> usize {
    (read_index + capacity - write_index - 1) % capacity
}

/// Allocate the shared ring once for a session.
///
/// # Errors
/// Returns `WavefeedError::InvalidConfig` when `capacity < 2` (no usable slot).
pub fn create_shared_ring(capacity: usize) -> Result<Arc<SharedRing>> {
    if capacity < 2 {
        return Err(WavefeedError::InvalidConfig(format!(
            "ring capacity must be at least 2 frames, got {capacity}"
        )));
    }
    Ok(Arc::new(SharedRing::new(capacity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_ring_has_full_headroom() {
        assert_eq!(available_to_read(0, 0, 8), 0);
        assert_eq!(available_to_write(0, 0, 8), 7);
    }

    #[test]
    fn availability_covers_every_wrap_state() {
        // no wrap: write ahead of read
        assert_eq!(available_to_read(1, 5, 8), 4);
        assert_eq!(available_to_write(1, 5, 8), 3);
        // write has wrapped past the end, read has not
        assert_eq!(available_to_read(6, 2, 8), 4);
        assert_eq!(available_to_write(6, 2, 8), 3);
        // full: write one behind read
        assert_eq!(available_to_read(3, 2, 8), 7);
        assert_eq!(available_to_write(3, 2, 8), 0);
        // equal indices away from zero
        assert_eq!(available_to_read(5, 5, 8), 0);
        assert_eq!(available_to_write(5, 5, 8), 7);
    }

    #[test]
    fn rejects_capacity_without_usable_slot() {
        assert!(create_shared_ring(1).is_err());
        assert!(create_shared_ring(0).is_err());
        assert_eq!(create_shared_ring(2).expect("ring").usable_capacity(), 1);
    }

    proptest! {
        #[test]
        fn read_plus_write_is_capacity_minus_one(
            capacity in 2usize..10_000,
            read in 0usize..10_000,
            write in 0usize..10_000,
        ) {
            let read = read % capacity;
            let write = write % capacity;
            prop_assert_eq!(
                available_to_read(read, write, capacity) + available_to_write(read, write, capacity),
                capacity - 1
            );
        }

        #[test]
        fn clamped_operation_sequences_preserve_invariant(
            capacity in 2usize..64,
            ops in proptest::collection::vec((any::<bool>(), 0usize..80), 1..200),
        ) {
            let mut read = 0usize;
            let mut write = 0usize;
            for (is_write, n) in ops {
                if is_write {
                    let n = n.min(available_to_write(read, write, capacity));
                    write = (write + n) % capacity;
                } else {
                    let n = n.min(available_to_read(read, write, capacity));
                    read = (read + n) % capacity;
                }
                prop_assert_eq!(
                    available_to_read(read, write, capacity) + available_to_write(read, write, capacity),
                    capacity - 1
                );
            }
        }
    }
}
