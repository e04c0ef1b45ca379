//! Cooperative split and merge of the segment index.
//!
//! Only the thread that claims the resize flag touches the index; every other
//! thread skips resizing and carries on. A resize never moves a node. A split
//! links one new relay into the middle of every chunk before publishing the
//! doubled array, so a reader still holding the old array simply starts its
//! walk a little further back. A merge publishes the halved array first and
//! only then retires the relays it no longer references, so no published array
//! ever points at a deleted relay.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

use super::{
    chunk::ChunkArray,
    evict_stack::EvictStack,
    list::{crawl, mark, try_link, walk},
    map::Config,
    node::{Relay, RELAY_TAG},
};

/// Borrowed view over the parts of a map a resize needs.
pub(crate) struct ResizeRef<'a> {
    pub(crate) chunk_array: &'a Atomic<ChunkArray>,
    pub(crate) len: &'a AtomicUsize,
    pub(crate) resizing: &'a AtomicBool,
    pub(crate) config: &'a Config,
}

impl<'a> ResizeRef<'a> {
    /// Doubles the segment index if the average chunk holds more than
    /// `max_avg_bucket_len` entries and the index can still grow.
    pub(crate) fn try_split<K, V>(&self, guard: &Guard) {
        if !self.wants_split(self.current(guard)) {
            return;
        }

        if !self.claim() {
            return;
        }

        let current = self.chunk_array.load(Ordering::Acquire, guard);
        let array = unsafe { current.deref() };

        if self.wants_split(array) {
            let next = split_array::<K, V>(array, guard);
            self.publish(current, next, guard);

            #[cfg(feature = "logging")]
            log::debug!(
                "{}Split the chunk index from {} to {} slots",
                self.log_prefix(),
                array.len(),
                array.len() * 2
            );
        }

        self.release();
    }

    /// Halves the segment index if the average chunk holds fewer than
    /// `min_avg_bucket_len` entries.
    pub(crate) fn try_merge<K, V>(&self, guard: &Guard) {
        if !self.wants_merge(self.current(guard)) {
            return;
        }

        if !self.claim() {
            return;
        }

        let current = self.chunk_array.load(Ordering::Acquire, guard);
        let array = unsafe { current.deref() };

        if self.wants_merge(array) {
            let next = ChunkArray::with_length(array.log_chunk_size() + 1, array.len() / 2);
            for i in 0..next.len() {
                next.set(i, array.relay(2 * i, guard));
            }
            let to = next.len();

            self.publish(current, next, guard);

            for i in 0..to {
                let kept = array.relay(2 * i, guard);
                let orphan = array.relay(2 * i + 1, guard);
                retire_relay::<K, V>(kept, orphan, guard);
            }

            #[cfg(feature = "logging")]
            log::debug!(
                "{}Merged the chunk index from {} to {to} slots",
                self.log_prefix(),
                array.len()
            );
        }

        self.release();
    }

    fn current<'g>(&self, guard: &'g Guard) -> &'g ChunkArray {
        unsafe { self.chunk_array.load(Ordering::Acquire, guard).deref() }
    }

    fn wants_split(&self, array: &ChunkArray) -> bool {
        array.log_chunk_size() > self.config.min_log_chunk_size
            && self.len.load(Ordering::Relaxed)
                > array.len().saturating_mul(self.config.max_avg_bucket_len)
    }

    fn wants_merge(&self, array: &ChunkArray) -> bool {
        array.len() > 1
            && self.len.load(Ordering::Relaxed)
                < array.len().saturating_mul(self.config.min_avg_bucket_len)
    }

    fn claim(&self) -> bool {
        let claimed = self
            .resizing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok();

        #[cfg(feature = "logging")]
        if !claimed {
            log::trace!("{}Another thread is resizing the chunk index", self.log_prefix());
        }

        claimed
    }

    fn release(&self) {
        self.resizing.store(false, Ordering::Release);
    }

    fn publish(&self, current: Shared<'_, ChunkArray>, next: ChunkArray, guard: &Guard) {
        self.chunk_array.store(Owned::new(next), Ordering::Release);

        // Safety: the old array is unreachable from the map now. The relays it
        // points at are owned by the chain, not by the array.
        unsafe { guard.defer_destroy(current) };
    }

    #[cfg(feature = "logging")]
    fn log_prefix(&self) -> String {
        self.config
            .name
            .as_deref()
            .map(|name| format!("[{name}] "))
            .unwrap_or_default()
    }
}

fn split_array<K, V>(array: &ChunkArray, guard: &Guard) -> ChunkArray {
    let log_chunk_size = array.log_chunk_size() - 1;
    let next = ChunkArray::with_length(log_chunk_size, array.len() * 2);

    for i in 0..array.len() {
        let start = array.relay(i, guard);
        let midpoint = array.chunk_start(i) + (1u64 << log_chunk_size);

        next.set(2 * i, start);
        next.set(2 * i + 1, link_relay::<K, V>(start, midpoint, guard));
    }

    next
}

/// Links a new relay for `hash` into the chunk starting at `start`, in front
/// of the first node whose hash is not smaller.
fn link_relay<'g, K, V>(start: Shared<'g, Relay>, hash: u64, guard: &'g Guard) -> Shared<'g, Relay> {
    let relay = Owned::new(Relay::new(hash)).into_shared(guard);
    let relay_ref = unsafe { relay.deref() };

    let mut pred = start;
    let mut stack = EvictStack::new();

    loop {
        let edge = crawl::<K, V, _>(&mut pred, &mut stack, || start, guard);

        if let Some(succ) = unsafe { edge.as_ref() } {
            if succ.hash < hash {
                pred = edge;
                continue;
            }
        }

        relay_ref.next.store(edge, Ordering::Relaxed);
        if try_link(unsafe { pred.deref() }, edge, relay.with_tag(RELAY_TAG), guard) {
            return relay;
        }
    }
}

/// Marks a relay dropped from the index and makes one pass from the relay in
/// front of it to unlink it. A pass that loses is left to later walks.
fn retire_relay<K, V>(kept: Shared<'_, Relay>, orphan: Shared<'_, Relay>, guard: &Guard) {
    let orphan = unsafe { orphan.deref() };
    mark(orphan, guard);

    let mut node = unsafe { kept.deref() };
    while let Some(succ) = unsafe { walk::<K, V>(node, guard).as_ref() } {
        if succ.hash >= orphan.hash {
            break;
        }
        node = succ;
    }
}
