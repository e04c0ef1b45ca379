//! The tagged-pointer list engine.
//!
//! Every primitive here is a single load, `fetch_or` or CAS on a `next` word
//! and none of them ever waits. A failed CAS is reported to the caller, who
//! reloads and retries; the only bound is on the extra work done per retry.
//!
//! Deletion follows Harris: a node is logically deleted once `DELETED_TAG` is
//! set on its own `next` word, which also freezes that word so nothing can be
//! linked behind a deleted node. Physical unlinking is opportunistic. The
//! thread whose CAS splices a node out retires it to the epoch collector.

use std::sync::atomic::Ordering;

use crossbeam_epoch::{Guard, Shared};

use super::{
    evict_stack::EvictStack,
    node::{as_edge, defer_destroy_node, is_deleted, Relay, DELETED_TAG},
};

/// Logically deletes `node`. Returns `true` only for the call that performed
/// the transition.
#[inline]
pub(crate) fn mark(node: &Relay, guard: &Guard) -> bool {
    let previous = node.next.fetch_or(DELETED_TAG, Ordering::AcqRel, guard);
    !is_deleted(previous)
}

/// Swings `pred.next` from `old` to `new`. Fails silently if `pred.next` is no
/// longer exactly `old`, including when `pred` has been marked since.
#[inline]
pub(crate) fn try_link<'g>(
    pred: &Relay,
    old: Shared<'g, Relay>,
    new: Shared<'g, Relay>,
    guard: &'g Guard,
) -> bool {
    pred.next
        .compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire, guard)
        .is_ok()
}

fn try_unlink<'g, K, V>(
    pred: &Relay,
    victim: Shared<'g, Relay>,
    victim_next: Shared<'g, Relay>,
    guard: &'g Guard,
) -> bool {
    if try_link(pred, victim, as_edge(victim_next), guard) {
        // Safety: our CAS made `victim` unreachable from the chain.
        unsafe { defer_destroy_node::<K, V>(guard, victim) };
        true
    } else {
        false
    }
}

/// Returns the edge to the first live successor of `node` (null at the end of
/// the chain), unlinking at most one deleted node in between.
///
/// It always advances, whether or not the unlink succeeds, and never unlinks
/// behind a `node` that is itself deleted.
pub(crate) fn walk<'g, K, V>(node: &Relay, guard: &'g Guard) -> Shared<'g, Relay> {
    let next = node.next.load(Ordering::Acquire, guard);
    let mut may_unlink = !is_deleted(next);
    let mut edge = as_edge(next);

    while let Some(succ) = unsafe { edge.as_ref() } {
        let succ_next = succ.next.load(Ordering::Acquire, guard);
        if !is_deleted(succ_next) {
            return edge;
        }

        if may_unlink {
            may_unlink = false;
            try_unlink::<K, V>(node, edge, succ_next, guard);
        }

        edge = as_edge(succ_next);
    }

    edge
}

/// Returns the edge to the live successor of `*pred`, which the caller may
/// link in front of.
///
/// Deleted successors are unlinked on the way. If `*pred` itself turns out to
/// be deleted it can no longer be linked behind, so `*pred` is moved back to
/// the most recent relay in `stack`, or to `fallback()` once the stack is
/// empty, and the crawl continues from there.
pub(crate) fn crawl<'g, K, V, F>(
    pred: &mut Shared<'g, Relay>,
    stack: &mut EvictStack<Shared<'g, Relay>>,
    fallback: F,
    guard: &'g Guard,
) -> Shared<'g, Relay>
where
    F: Fn() -> Shared<'g, Relay>,
{
    loop {
        let pred_ref = unsafe { (*pred).deref() };
        let next = pred_ref.next.load(Ordering::Acquire, guard);

        if is_deleted(next) {
            *pred = stack.pop().unwrap_or_else(&fallback);
            continue;
        }

        let Some(curr) = (unsafe { next.as_ref() }) else {
            return next;
        };

        let curr_next = curr.next.load(Ordering::Acquire, guard);
        if !is_deleted(curr_next) {
            return next;
        }

        // Reload from the same predecessor whether or not this wins.
        try_unlink::<K, V>(pred_ref, next, curr_next, guard);
    }
}
