//! Relay sentinels and value records.
//!
//! Both record kinds start with the same [`Relay`] header, so an edge of the
//! chain is always an `Atomic<Relay>`. Whether the target of an edge is a bare
//! relay or a [`ValueNode`] is cached in the edge itself (`RELAY_TAG`), which
//! lets a traverser classify the next node before dereferencing it.

use std::{
    hash::{BuildHasher, Hash, Hasher},
    sync::atomic::{self, Ordering},
};

#[cfg(feature = "unstable-debug-counters")]
use crate::common::concurrent::debug_counters::InternalGlobalDebugCounters as Counters;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};

pub(crate) const DELETED_TAG: usize = 0b01; // set on a node's own `next` once it is logically deleted
pub(crate) const RELAY_TAG: usize = 0b10; // set on an edge whose target is a relay
pub(crate) const TOMBSTONE_TAG: usize = 0b01; // set on a value slot by the thread that deleted it

/// The header shared by every record in the chain.
#[repr(C, align(8))]
#[derive(Debug)]
pub(crate) struct Relay {
    pub(crate) hash: u64,
    pub(crate) next: Atomic<Relay>,
}

impl Relay {
    pub(crate) fn new(hash: u64) -> Self {
        #[cfg(feature = "unstable-debug-counters")]
        Counters::relay_created();

        Self {
            hash,
            next: Atomic::null(),
        }
    }
}

/// Frees a bare relay.
///
/// # Safety
///
/// `raw` must come from `Box<Relay>` and must be unreachable by other threads.
pub(crate) unsafe fn free_relay(raw: *mut Relay) {
    #[cfg(feature = "unstable-debug-counters")]
    Counters::relay_dropped();

    drop(Box::from_raw(raw));
}

/// A boxed value. The alignment leaves room for `TOMBSTONE_TAG` whatever `V`
/// is.
#[repr(align(8))]
#[derive(Debug)]
pub(crate) struct Payload<V> {
    pub(crate) value: V,
}

impl<V> Payload<V> {
    pub(crate) fn new(value: V) -> Self {
        Self { value }
    }
}

/// A live (or logically deleted) key-value record.
#[repr(C)]
pub(crate) struct ValueNode<K, V> {
    // Must stay the first field: edges point at the header.
    pub(crate) header: Relay,
    pub(crate) key: K,
    pub(crate) value: Atomic<Payload<V>>,
}

impl<K, V> ValueNode<K, V> {
    pub(crate) fn new(hash: u64, key: K, value: V) -> Self {
        #[cfg(feature = "unstable-debug-counters")]
        Counters::value_node_created();

        Self {
            header: Relay {
                hash,
                next: Atomic::null(),
            },
            key,
            value: Atomic::new(Payload::new(value)),
        }
    }

    /// Allocates a value record and returns an untagged edge to it.
    pub(crate) fn alloc<'g>(hash: u64, key: K, value: V, guard: &'g Guard) -> Shared<'g, Relay> {
        let node = Owned::new(Self::new(hash, key, value)).into_shared(guard);
        Shared::from(node.as_raw() as *const Relay)
    }

    /// # Safety
    ///
    /// `edge` must be non-null, must not carry `RELAY_TAG`, and must have been
    /// produced by [`ValueNode::alloc`] with the same `K` and `V`.
    #[inline]
    pub(crate) unsafe fn from_edge<'g>(edge: Shared<'g, Relay>) -> &'g Self {
        debug_assert!(!edge.is_null());
        debug_assert!(!is_relay(edge));
        &*(edge.as_raw() as *const Self)
    }

    /// Returns the current payload unless the record has been deleted.
    #[inline]
    pub(crate) fn live_payload<'g>(&self, guard: &'g Guard) -> Option<Shared<'g, Payload<V>>> {
        let payload = self.value.load(Ordering::Acquire, guard);
        if is_tombstone(payload) {
            None
        } else {
            Some(payload)
        }
    }

    /// Sets `TOMBSTONE_TAG` on the value slot. Returns the payload that was
    /// current when this call won, or `None` if some other thread deleted the
    /// record first.
    pub(crate) fn tombstone<'g>(&self, guard: &'g Guard) -> Option<Shared<'g, Payload<V>>> {
        let previous = self.value.fetch_or(TOMBSTONE_TAG, Ordering::AcqRel, guard);
        if is_tombstone(previous) {
            None
        } else {
            Some(previous)
        }
    }
}

impl<K, V> Drop for ValueNode<K, V> {
    fn drop(&mut self) {
        #[cfg(feature = "unstable-debug-counters")]
        Counters::value_node_dropped();

        // Safety: a node is only dropped once no other thread can reach it.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let payload = self.value.load(Ordering::Relaxed, guard);
        if !payload.is_null() {
            drop(unsafe { payload.with_tag(0).into_owned() });
        }
    }
}

#[inline]
pub(crate) fn is_deleted(next: Shared<'_, Relay>) -> bool {
    next.tag() & DELETED_TAG != 0
}

#[inline]
pub(crate) fn is_relay(edge: Shared<'_, Relay>) -> bool {
    edge.tag() & RELAY_TAG != 0
}

#[inline]
pub(crate) fn is_tombstone<V>(payload: Shared<'_, Payload<V>>) -> bool {
    payload.tag() & TOMBSTONE_TAG != 0
}

/// Drops the deletion bit of a `next` word, keeping the relay bit that
/// describes its target.
#[inline]
pub(crate) fn as_edge(next: Shared<'_, Relay>) -> Shared<'_, Relay> {
    next.with_tag(next.tag() & RELAY_TAG)
}

pub(crate) fn hash<K, H>(build_hasher: &H, key: &K) -> u64
where
    K: ?Sized + Hash,
    H: BuildHasher,
{
    let mut hasher = build_hasher.build_hasher();
    key.hash(&mut hasher);

    hasher.finish()
}

/// Defers destruction of a node that has just been unlinked from the chain.
///
/// # Safety
///
/// The caller must be the thread whose CAS made `edge` unreachable, and the
/// node must have been allocated as the type its tag says.
pub(crate) unsafe fn defer_destroy_node<K, V>(guard: &Guard, edge: Shared<'_, Relay>) {
    debug_assert!(!edge.is_null());

    let raw = edge.as_raw() as *mut Relay;
    if is_relay(edge) {
        guard.defer_unchecked(move || {
            atomic::fence(Ordering::Acquire);
            free_relay(raw);
        });
    } else {
        let raw = raw as *mut ValueNode<K, V>;
        guard.defer_unchecked(move || {
            atomic::fence(Ordering::Acquire);
            drop(Box::from_raw(raw));
        });
    }
}

/// Frees a node immediately, either because it was never published or because
/// the whole map is being dropped.
///
/// # Safety
///
/// No other thread may be able to observe `edge`.
pub(crate) unsafe fn destroy_unreachable<K, V>(edge: Shared<'_, Relay>) {
    if is_relay(edge) {
        free_relay(edge.as_raw() as *mut Relay);
    } else {
        drop(Box::from_raw(edge.as_raw() as *mut ValueNode<K, V>));
    }
}

#[cfg(test)]
mod tests {
    use super::{
        as_edge, defer_destroy_node, destroy_unreachable, is_deleted, is_relay, is_tombstone,
        Relay, ValueNode, DELETED_TAG, RELAY_TAG,
    };
    use crossbeam_epoch::{Owned, Shared};
    use std::{mem, sync::atomic::Ordering};

    #[test]
    fn header_is_the_first_field() {
        assert_eq!(mem::align_of::<Relay>(), 8);
        assert!(mem::align_of::<ValueNode<u8, u8>>() >= 8);

        let guard = unsafe { crossbeam_epoch::unprotected() };
        let edge = ValueNode::alloc(42, "foo", 7, guard);
        let node = unsafe { ValueNode::<&str, i32>::from_edge(edge) };

        assert_eq!(unsafe { edge.deref() }.hash, 42);
        assert_eq!(node.header.hash, 42);
        assert_eq!(node.key, "foo");

        unsafe { destroy_unreachable::<&str, i32>(edge) };
    }

    #[test]
    fn edge_tags() {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let relay = Owned::new(Relay::new(0)).into_shared(guard);

        let edge = relay.with_tag(RELAY_TAG);
        assert!(is_relay(edge));
        assert!(!is_deleted(edge));

        let marked = edge.with_tag(RELAY_TAG | DELETED_TAG);
        assert!(is_deleted(marked));
        assert_eq!(as_edge(marked), edge);
        assert_eq!(as_edge(marked).as_raw(), relay.as_raw());

        unsafe { destroy_unreachable::<(), ()>(edge) };
    }

    #[test]
    fn tombstone_wins_once() {
        let guard = &crossbeam_epoch::pin();
        let edge = ValueNode::alloc(1, 1u64, 10u8, guard);
        let node = unsafe { ValueNode::<u64, u8>::from_edge(edge) };

        let payload = node.live_payload(guard).unwrap();
        assert_eq!(unsafe { payload.deref() }.value, 10);

        let taken = node.tombstone(guard).unwrap();
        assert_eq!(taken, payload);
        assert!(is_tombstone(node.value.load(Ordering::Relaxed, guard)));
        assert!(node.live_payload(guard).is_none());
        assert!(node.tombstone(guard).is_none());

        unsafe { defer_destroy_node::<u64, u8>(guard, edge) };
    }

    #[test]
    fn null_edges_are_plain() {
        let null: Shared<'_, Relay> = Shared::null();
        assert!(!is_relay(null));
        assert!(!is_deleted(null));
    }
}
