use super::node::{Relay, RELAY_TAG};

use std::sync::atomic::Ordering;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

#[cfg(feature = "unstable-debug-counters")]
use crate::common::concurrent::debug_counters::InternalGlobalDebugCounters as Counters;

/// The segment index: slot `i` points at the relay whose hash is
/// `i << log_chunk_size`.
///
/// An array is only written while it is being built. Once published it is
/// read-only, and a resize replaces it as a whole.
pub(crate) struct ChunkArray {
    relays: Box<[Atomic<Relay>]>,
    log_chunk_size: u32,
}

impl ChunkArray {
    pub(crate) fn with_length(log_chunk_size: u32, length: usize) -> Self {
        assert!(length.is_power_of_two());

        #[cfg(feature = "unstable-debug-counters")]
        Counters::chunk_array_created(Self::byte_size(length));

        Self {
            relays: (0..length).map(|_| Atomic::null()).collect(),
            log_chunk_size,
        }
    }

    /// Builds an array together with a fresh chain made only of its relays.
    pub(crate) fn with_fresh_relays(log_chunk_size: u32, length: usize) -> Self {
        let array = Self::with_length(log_chunk_size, length);

        // Safety: nothing else can see the relays yet.
        let guard = unsafe { crossbeam_epoch::unprotected() };

        let mut prev: Option<&Relay> = None;
        for i in 0..length {
            let relay = Owned::new(Relay::new(array.chunk_start(i))).into_shared(guard);
            if let Some(prev) = prev {
                prev.next.store(relay.with_tag(RELAY_TAG), Ordering::Relaxed);
            }
            array.set(i, relay);
            prev = Some(unsafe { relay.deref() });
        }

        array
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.relays.len()
    }

    #[inline]
    pub(crate) fn log_chunk_size(&self) -> u32 {
        self.log_chunk_size
    }

    /// Hashes above the range of the last slot are clamped into it.
    #[inline]
    pub(crate) fn index_of(&self, hash: u64) -> usize {
        let index = hash.checked_shr(self.log_chunk_size).unwrap_or(0);
        index.min(self.len() as u64 - 1) as usize
    }

    #[inline]
    pub(crate) fn chunk_start(&self, index: usize) -> u64 {
        (index as u64).checked_shl(self.log_chunk_size).unwrap_or(0)
    }

    /// Returns the entry-point relay for `hash`.
    #[inline]
    pub(crate) fn get<'g>(&self, hash: u64, guard: &'g Guard) -> Shared<'g, Relay> {
        self.relay(self.index_of(hash), guard)
    }

    #[inline]
    pub(crate) fn relay<'g>(&self, index: usize, guard: &'g Guard) -> Shared<'g, Relay> {
        self.relays[index].load(Ordering::Acquire, guard)
    }

    #[inline]
    pub(crate) fn head<'g>(&self, guard: &'g Guard) -> Shared<'g, Relay> {
        self.relay(0, guard)
    }

    /// Only valid while the array is still private to its builder.
    #[inline]
    pub(crate) fn set(&self, index: usize, relay: Shared<'_, Relay>) {
        self.relays[index].store(relay.with_tag(0), Ordering::Relaxed);
    }

    /// Frees every relay this array points at.
    ///
    /// # Safety
    ///
    /// The relays must be unreachable by other threads and must not be freed
    /// through any other path.
    #[cfg(test)]
    pub(crate) unsafe fn free_relays(&self) {
        let guard = crossbeam_epoch::unprotected();
        for slot in self.relays.iter() {
            let relay = slot.load(Ordering::Relaxed, guard);
            if !relay.is_null() {
                super::node::free_relay(relay.as_raw() as *mut Relay);
            }
        }
    }

    #[cfg(feature = "unstable-debug-counters")]
    fn byte_size(length: usize) -> u64 {
        (std::mem::size_of::<Self>() + length * std::mem::size_of::<Atomic<Relay>>()) as u64
    }
}

#[cfg(feature = "unstable-debug-counters")]
impl Drop for ChunkArray {
    fn drop(&mut self) {
        Counters::chunk_array_dropped(Self::byte_size(self.len()));
    }
}

/// Number of significant bits of `max_hash_value`.
#[inline]
pub(crate) fn hash_bits(max_hash_value: u64) -> u32 {
    u64::BITS - max_hash_value.leading_zeros()
}
