//! The lock-free map built on the relay chain and its segment index.

use super::{
    chunk::ChunkArray,
    evict_stack::EvictStack,
    list::{crawl, mark, try_link, walk},
    node::{
        self, as_edge, destroy_unreachable, is_relay, is_tombstone, Payload, ValueNode,
        RELAY_TAG,
    },
    resize::ResizeRef,
};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    fmt,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::atomic::{self, AtomicBool, AtomicUsize, Ordering},
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::CachePadded;

/// The outcome of [`VMap::compare_and_swap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasResult {
    /// The key was not present.
    NoSuchKey,
    /// The key was present but its value did not equal the expected one.
    ConditionFailed,
    /// The value was replaced.
    Succeeded,
}

/// Settings fixed at construction.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) name: Option<String>,
    pub(crate) min_avg_bucket_len: usize,
    pub(crate) max_avg_bucket_len: usize,
    pub(crate) max_hash_value: u64,
    pub(crate) min_log_chunk_size: u32,
}

/// A lock-free concurrent hash map.
///
/// Entries live in a single singly linked chain sorted by hash. The chain is
/// partitioned by relay nodes sitting at fixed hash boundaries, and a
/// power-of-two segment index maps every hash to the relay that starts its
/// chunk. Lookups and updates jump to that relay and walk a short run of the
/// chain; nothing ever blocks, and a failed compare-and-swap just means
/// another thread got there first and the operation retries.
///
/// When the average chunk grows beyond `max_avg_bucket_len` entries, the thread
/// that notices first doubles the index by linking a relay into the middle of
/// every chunk. When it drops below `min_avg_bucket_len`, the index is halved
/// again. Entries are never moved by a resize, and other threads keep working
/// while it happens.
///
/// Values are cloned out on reads, so cheap-to-clone values such as integers
/// or `Arc`s are the natural fit. Memory of removed entries and replaced
/// values is reclaimed through epoch-based garbage collection
/// ([`crossbeam-epoch`]).
///
/// By default, `VMap` hashes keys with the algorithm used by
/// `std::collections::HashMap`. Another one can be supplied with
/// [`with_hasher`](#method.with_hasher) or the [`VMapBuilder`].
///
/// It is a logic error for two equal keys to hash differently, or for the hash
/// of a key to change while it is in the map.
///
/// [`crossbeam-epoch`]: https://docs.rs/crossbeam-epoch
/// [`VMapBuilder`]: ./struct.VMapBuilder.html
pub struct VMap<K, V, S = RandomState> {
    chunk_array: Atomic<ChunkArray>,
    len: CachePadded<AtomicUsize>,
    resizing: CachePadded<AtomicBool>,
    config: Config,
    build_hasher: S,
    _marker: PhantomData<*const (K, V)>,
}

unsafe impl<K: Send, V: Send, S: Send> Send for VMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for VMap<K, V, S> {}

/// What an upsert does when the key is already present.
#[derive(Clone, Copy)]
enum OnHit {
    /// Swap the new value into the existing record.
    Replace,
    /// Leave the existing record untouched.
    Keep,
}

enum Upserted<'g, V> {
    Inserted,
    /// The payload that was current on a hit. With `OnHit::Replace` it has
    /// been swapped out and the caller must retire it.
    Existing(Shared<'g, Payload<V>>),
}

impl<K, V> VMap<K, V, RandomState> {
    /// Creates an empty map with the default settings.
    pub fn new() -> Self {
        Self::with_hasher(RandomState::default())
    }
}

impl<K, V, S> VMap<K, V, S> {
    /// Creates an empty map with the default settings, using `build_hasher` to
    /// hash the keys.
    pub fn with_hasher(build_hasher: S) -> Self {
        super::VMapBuilder::new().build_with_hasher(build_hasher)
    }

    /// Creates an empty map.
    ///
    /// The segment index doubles once the average chunk holds more than
    /// `max_avg_bucket_len` entries and halves once it holds fewer than
    /// `min_avg_bucket_len`. `max_hash_value` is the largest hash
    /// `build_hasher` can produce and bounds how far the index can grow.
    ///
    /// # Panics
    ///
    /// Panics if `max_avg_bucket_len` is zero or if `min_avg_bucket_len` is not
    /// smaller than `max_avg_bucket_len`. Use [`VMapBuilder::try_build_with_hasher`]
    /// to get an error instead.
    ///
    /// [`VMapBuilder::try_build_with_hasher`]: ./struct.VMapBuilder.html#method.try_build_with_hasher
    pub fn with_config(
        min_avg_bucket_len: usize,
        max_avg_bucket_len: usize,
        max_hash_value: u64,
        build_hasher: S,
    ) -> Self {
        super::VMapBuilder::new()
            .min_avg_bucket_len(min_avg_bucket_len)
            .max_avg_bucket_len(max_avg_bucket_len)
            .max_hash_value(max_hash_value)
            .build_with_hasher(build_hasher)
    }

    pub(crate) fn with_everything(
        config: Config,
        log_chunk_size: u32,
        num_chunks: usize,
        build_hasher: S,
    ) -> Self {
        Self::from_chunk_array(
            config,
            ChunkArray::with_fresh_relays(log_chunk_size, num_chunks),
            0,
            build_hasher,
        )
    }

    fn from_chunk_array(config: Config, array: ChunkArray, len: usize, build_hasher: S) -> Self {
        Self {
            chunk_array: Atomic::new(array),
            len: CachePadded::new(AtomicUsize::new(len)),
            resizing: CachePadded::new(AtomicBool::new(false)),
            config,
            build_hasher,
            _marker: PhantomData,
        }
    }

    /// Returns the number of entries in the map.
    ///
    /// Other threads can insert or remove entries at any time, so the returned
    /// value may already be stale.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns `true` if the map contains no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the name given by [`VMapBuilder::name`], if any.
    ///
    /// [`VMapBuilder::name`]: ./struct.VMapBuilder.html#method.name
    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    /// Returns the largest hash value this map was configured for.
    pub fn max_hash_value(&self) -> u64 {
        self.config.max_hash_value
    }

    /// Returns the current number of slots in the segment index.
    pub fn num_chunks(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        self.current_chunks(guard).len()
    }

    /// Returns the base-two logarithm of the hash range one slot covers.
    pub fn log_chunk_size(&self) -> u32 {
        let guard = &crossbeam_epoch::pin();
        self.current_chunks(guard).log_chunk_size()
    }

    /// Returns a reference to the map's [`BuildHasher`].
    ///
    /// [`BuildHasher`]: https://doc.rust-lang.org/std/hash/trait.BuildHasher.html
    pub fn hasher(&self) -> &S {
        &self.build_hasher
    }

    /// Calls `visit` on every live entry in hash order, stopping early once it
    /// returns `false`.
    ///
    /// This is not a snapshot. Each entry is visited at most once, but entries
    /// inserted or removed concurrently may or may not be seen.
    pub fn range<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        let guard = &crossbeam_epoch::pin();
        let mut node = unsafe { self.current_chunks(guard).head(guard).deref() };

        loop {
            let edge = walk::<K, V>(node, guard);
            let Some(succ) = (unsafe { edge.as_ref() }) else {
                return;
            };

            if !is_relay(edge) {
                let value_node = unsafe { ValueNode::<K, V>::from_edge(edge) };
                if let Some(payload) = value_node.live_payload(guard) {
                    if !visit(&value_node.key, unsafe { &payload.deref().value }) {
                        return;
                    }
                }
            }

            node = succ;
        }
    }

    /// Removes and returns the live entry with the lowest hash, or `None` if
    /// the map is empty.
    pub fn take(&self) -> Option<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        let mut node = unsafe { self.current_chunks(guard).head(guard).deref() };

        loop {
            let edge = walk::<K, V>(node, guard);
            let succ = unsafe { edge.as_ref() }?;

            if !is_relay(edge) {
                let value_node = unsafe { ValueNode::<K, V>::from_edge(edge) };
                if let Some(payload) = value_node.tombstone(guard) {
                    let entry = (
                        value_node.key.clone(),
                        unsafe { payload.deref() }.value.clone(),
                    );
                    self.retire(value_node, guard);
                    return Some(entry);
                }
            }

            node = succ;
        }
    }

    #[inline]
    fn current_chunks<'g>(&self, guard: &'g Guard) -> &'g ChunkArray {
        unsafe { self.chunk_array.load(Ordering::Acquire, guard).deref() }
    }

    #[inline]
    fn resize_ref(&self) -> ResizeRef<'_> {
        ResizeRef {
            chunk_array: &self.chunk_array,
            len: &self.len,
            resizing: &self.resizing,
            config: &self.config,
        }
    }

    /// Finishes the removal of a record this thread has tombstoned.
    fn retire(&self, value_node: &ValueNode<K, V>, guard: &Guard) {
        let hash = value_node.header.hash;
        if !mark(&value_node.header, guard) {
            return;
        }
        self.len.fetch_sub(1, Ordering::Relaxed);

        // One pass over the run so the record is usually unlinked right away.
        let mut node = unsafe { self.current_chunks(guard).get(hash, guard).deref() };
        while let Some(succ) = unsafe { walk::<K, V>(node, guard).as_ref() } {
            if succ.hash > hash {
                break;
            }
            node = succ;
        }

        self.resize_ref().try_merge::<K, V>(guard);
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> VMap<K, V, S> {
    /// Returns `true` if the map contains a value for `key`.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let guard = &crossbeam_epoch::pin();
        self.find(key, self.hash(key), guard).is_some()
    }

    /// Returns a clone of the value corresponding to `key`.
    pub fn load<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.load_with(key, V::clone)
    }

    /// Calls `with_value` on the value corresponding to `key` and returns what
    /// it returns.
    pub fn load_with<Q, F, T>(&self, key: &Q, with_value: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let guard = &crossbeam_epoch::pin();
        self.find(key, self.hash(key), guard)
            .map(|(_, payload)| with_value(unsafe { &payload.deref().value }))
    }

    /// Inserts a key-value pair, replacing the value of an existing entry.
    ///
    /// Returns `true` if the key was not present before.
    pub fn store(&self, key: K, value: V) -> bool {
        let guard = &crossbeam_epoch::pin();
        match self.upsert(key, value, OnHit::Replace, guard) {
            Upserted::Inserted => true,
            Upserted::Existing(previous) => {
                unsafe { guard.defer_destroy(previous) };
                false
            }
        }
    }

    /// Returns a clone of the existing value for `key`, or inserts `value` and
    /// returns `None` if there was none.
    pub fn load_or_store(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        match self.upsert(key, value, OnHit::Keep, guard) {
            Upserted::Inserted => None,
            Upserted::Existing(current) => Some(unsafe { current.deref() }.value.clone()),
        }
    }

    /// Inserts a key-value pair and returns the value it replaced, if any.
    pub fn swap(&self, key: K, value: V) -> Option<V>
    where
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        match self.upsert(key, value, OnHit::Replace, guard) {
            Upserted::Inserted => None,
            Upserted::Existing(previous) => {
                let value = unsafe { previous.deref() }.value.clone();
                unsafe { guard.defer_destroy(previous) };
                Some(value)
            }
        }
    }

    /// Replaces the value for `key` with `new` only if it currently equals
    /// `expected`.
    ///
    /// A failed attempt never changes the map.
    pub fn compare_and_swap<Q>(&self, key: &Q, expected: &V, new: V) -> CasResult
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: PartialEq,
    {
        let guard = &crossbeam_epoch::pin();
        let Some((value_node, mut current)) = self.find(key, self.hash(key), guard) else {
            return CasResult::NoSuchKey;
        };

        let mut new = Owned::new(Payload::new(new));
        loop {
            if unsafe { current.deref() }.value != *expected {
                return CasResult::ConditionFailed;
            }

            match value_node.value.compare_exchange(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(current) };
                    return CasResult::Succeeded;
                }
                Err(e) if is_tombstone(e.current) => return CasResult::NoSuchKey,
                Err(e) => {
                    current = e.current;
                    new = e.new;
                }
            }
        }
    }

    /// Removes `key` from the map. Returns `true` if this call removed it.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.delete_and(key, |_| ()).is_some()
    }

    /// Removes `key` from the map and returns a clone of its value.
    pub fn load_and_delete<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.delete_and(key, V::clone)
    }

    /// Removes `key` from the map, calling `with_value` on the removed value.
    pub fn delete_and<Q, F, T>(&self, key: &Q, with_value: F) -> Option<T>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let guard = &crossbeam_epoch::pin();
        let (value_node, _) = self.find(key, self.hash(key), guard)?;

        // Losing the tombstone means another thread removed the entry first.
        let payload = value_node.tombstone(guard)?;
        let result = with_value(unsafe { &payload.deref().value });

        self.retire(value_node, guard);
        Some(result)
    }

    /// Returns a new map holding the live entries of this one, indexed with the
    /// same number of chunks.
    ///
    /// Like [`range`](#method.range), this is not a snapshot of a single
    /// instant while other threads are writing.
    pub fn copy(&self) -> Self
    where
        K: Clone,
        V: Clone,
        S: Clone,
    {
        let guard = &crossbeam_epoch::pin();
        let source = self.current_chunks(guard);

        let mut entries: Vec<(u64, K, V)> = Vec::new();
        let mut node = unsafe { source.head(guard).deref() };
        loop {
            let edge = walk::<K, V>(node, guard);
            let Some(succ) = (unsafe { edge.as_ref() }) else {
                break;
            };

            if !is_relay(edge) {
                let value_node = unsafe { ValueNode::<K, V>::from_edge(edge) };
                if let Some(payload) = value_node.live_payload(guard) {
                    let hash = succ.hash;
                    // A key replaced during the walk can show up twice in its run.
                    let seen = entries
                        .iter()
                        .rev()
                        .take_while(|(h, _, _)| *h == hash)
                        .any(|(_, k, _)| *k == value_node.key);

                    if !seen {
                        let value = unsafe { payload.deref() }.value.clone();
                        entries.push((hash, value_node.key.clone(), value));
                    }
                }
            }

            node = succ;
        }

        let len = entries.len();
        let array = ChunkArray::with_fresh_relays(source.log_chunk_size(), source.len());
        thread_entries::<K, V>(&array, entries);

        Self::from_chunk_array(self.config.clone(), array, len, self.build_hasher.clone())
    }

    #[inline]
    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        node::hash(&self.build_hasher, key)
    }

    /// Returns the live record for `key` and its current payload.
    fn find<'g, Q>(
        &self,
        key: &Q,
        hash: u64,
        guard: &'g Guard,
    ) -> Option<(&'g ValueNode<K, V>, Shared<'g, Payload<V>>)>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut node = unsafe { self.current_chunks(guard).get(hash, guard).deref() };

        loop {
            let edge = walk::<K, V>(node, guard);
            let succ = unsafe { edge.as_ref() }?;

            if succ.hash > hash {
                return None;
            }

            if succ.hash == hash && !is_relay(edge) {
                let value_node = unsafe { ValueNode::<K, V>::from_edge(edge) };
                if value_node.key.borrow() == key {
                    // A tombstoned twin may be followed by a live one.
                    if let Some(payload) = value_node.live_payload(guard) {
                        return Some((value_node, payload));
                    }
                }
            }

            node = succ;
        }
    }

    /// Links a record for `key` at the end of its hash run, or resolves a hit
    /// on a live record with the same key.
    ///
    /// What happens on a hit is decided by `on_hit`.
    fn upsert<'g>(&self, key: K, value: V, on_hit: OnHit, guard: &'g Guard) -> Upserted<'g, V> {
        let hash = self.hash(&key);
        let new_edge = ValueNode::alloc(hash, key, value, guard);
        let new_node = unsafe { ValueNode::<K, V>::from_edge(new_edge) };

        let fallback = || self.current_chunks(guard).get(hash, guard);
        let mut pred = fallback();
        let mut stack = EvictStack::new();
        stack.push(pred);

        loop {
            let edge = crawl::<K, V, _>(&mut pred, &mut stack, &fallback, guard);

            if let Some(succ) = unsafe { edge.as_ref() } {
                if succ.hash < hash || (succ.hash == hash && is_relay(edge)) {
                    if is_relay(edge) {
                        stack.push(edge.with_tag(0));
                    }
                    pred = edge;
                    continue;
                }

                if succ.hash == hash {
                    let existing = unsafe { ValueNode::<K, V>::from_edge(edge) };
                    if existing.key == new_node.key {
                        if let Some(upserted) = Self::resolve_hit(existing, new_node, on_hit, guard)
                        {
                            // Safety: `new_edge` was never linked.
                            unsafe { destroy_unreachable::<K, V>(new_edge) };
                            return upserted;
                        }
                    }

                    pred = edge;
                    continue;
                }
            }

            new_node.header.next.store(edge, Ordering::Relaxed);
            if try_link(unsafe { pred.deref() }, edge, new_edge, guard) {
                self.len.fetch_add(1, Ordering::Relaxed);
                self.resize_ref().try_split::<K, V>(guard);
                return Upserted::Inserted;
            }
        }
    }

    /// Returns `None` if `existing` turned out to be tombstoned, in which case
    /// the caller keeps scanning.
    fn resolve_hit<'g>(
        existing: &ValueNode<K, V>,
        new_node: &ValueNode<K, V>,
        on_hit: OnHit,
        guard: &'g Guard,
    ) -> Option<Upserted<'g, V>> {
        let mut current = existing.live_payload(guard)?;
        if let OnHit::Keep = on_hit {
            return Some(Upserted::Existing(current));
        }

        let ours = new_node.value.load(Ordering::Relaxed, guard);
        loop {
            match existing.value.compare_exchange(
                current,
                ours,
                Ordering::AcqRel,
                Ordering::Acquire,
                guard,
            ) {
                Ok(_) => {
                    // The payload now belongs to `existing`.
                    new_node.value.store(Shared::null(), Ordering::Relaxed);
                    return Some(Upserted::Existing(current));
                }
                Err(e) if is_tombstone(e.current) => return None,
                Err(e) => current = e.current,
            }
        }
    }
}

/// Appends `entries`, already sorted by hash, to the fresh relay chain of
/// `array`.
fn thread_entries<K, V>(array: &ChunkArray, entries: Vec<(u64, K, V)>) {
    // Safety: the array and its chain are still private to this thread.
    let guard = unsafe { crossbeam_epoch::unprotected() };

    let mut tail = unsafe { array.head(guard).deref() };
    let mut next_slot = 1;

    for (hash, key, value) in entries {
        while next_slot < array.len() && array.chunk_start(next_slot) <= hash {
            let relay = array.relay(next_slot, guard);
            tail.next.store(relay.with_tag(RELAY_TAG), Ordering::Relaxed);
            tail = unsafe { relay.deref() };
            next_slot += 1;
        }

        let edge = ValueNode::alloc(hash, key, value, guard);
        tail.next.store(edge, Ordering::Relaxed);
        tail = unsafe { edge.deref() };
    }

    // The remaining relays are still chained to each other.
    if next_slot < array.len() {
        let relay = array.relay(next_slot, guard);
        tail.next.store(relay.with_tag(RELAY_TAG), Ordering::Relaxed);
    }
}

impl<K, V, S> Drop for VMap<K, V, S> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        atomic::fence(Ordering::Acquire);

        let array = self.chunk_array.load(Ordering::Relaxed, guard);
        let Some(array_ref) = (unsafe { array.as_ref() }) else {
            return;
        };

        // Every node still linked is owned by the chain. Unlinked ones were
        // already handed to the collector.
        let mut edge = array_ref.head(guard).with_tag(RELAY_TAG);
        while !edge.is_null() {
            let next = unsafe { edge.deref() }.next.load(Ordering::Relaxed, guard);
            unsafe { destroy_unreachable::<K, V>(edge) };
            edge = as_edge(next);
        }

        drop(unsafe { array.into_owned() });
    }
}

impl<K, V, S> Clone for VMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl<K, V, S: Default> Default for VMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for VMap<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d_map = f.debug_map();
        self.range(|k, v| {
            d_map.entry(k, v);
            true
        });
        d_map.finish()
    }
}
