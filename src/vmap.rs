//! A lock-free hash table built from one sorted linked list.
//!
//! Every entry of the table lives in a single singly linked chain of nodes
//! ordered by hash. The chain is cut into chunks by relay nodes: sentinels
//! that carry no key and sit at fixed hash boundaries, always in front of the
//! values sharing their hash. The segment index is a power-of-two array whose
//! slot `i` points at the relay for hash `i << L`, where `L` is the current log
//! chunk size. A lookup computes the hash, jumps to the relay of its chunk and
//! walks forward until the hash is passed. The relay and value records share
//! a common header, so an edge of the chain is always the same kind of atomic
//! pointer, and the edge itself records in a spare low bit whether its target
//! is a relay. A traverser can therefore skip relays without dereferencing
//! them.
//!
//! Insertion is the classic lock-free sorted-list insertion. A new value is
//! linked at the end of its hash run with a single compare-and-swap on the
//! predecessor's `next` word; if that CAS fails the inserter reloads and
//! tries again from the same predecessor. Removal is two-phase. The remover
//! first sets a tombstone bit on the record's value slot, which is the moment
//! the entry disappears and which also freezes the slot against concurrent
//! swaps. It then sets a deletion bit on the record's own `next` word. A node
//! whose `next` word carries that bit cannot have anything linked behind it,
//! and any thread that walks past it may splice it out. The thread whose CAS
//! does the splice hands the node to the epoch-based collector, which frees it
//! once no pinned thread can still be looking at it.
//!
//! While inserting, a thread remembers the last few relays it passed in a tiny
//! fixed-size stack. If its predecessor gets deleted under it, it backtracks to
//! the most recent remembered relay instead of starting over from the index.
//! The stack silently forgets its oldest entry when full; once it runs dry the
//! thread restarts from the current index slot.
//!
//! The index resizes cooperatively. After an insertion, a thread that finds
//! the average chunk too long tries to claim the resize flag. The winner links
//! a relay into the midpoint of every chunk and publishes a doubled array with
//! a single pointer store. After a removal, a thread that finds the chunks too
//! short publishes a halved array holding only the even relays, then marks the
//! odd ones deleted and walks past them to unlink them. Relays are never
//! moved, only added or removed, so a thread still holding an older array just
//! starts its walk from a relay that is further back than necessary. A thread
//! that loses the claim does not wait: it simply skips resizing.
//!
//! This design follows the lock-free sorted list of Harris ([A Pragmatic
//! Implementation of Non-Blocking Linked-Lists]) and the split-ordered list
//! idea of indexing into a single chain through sentinel nodes ([Split-Ordered
//! Lists: Lock-Free Extensible Hash Tables]).
//!
//! [A Pragmatic Implementation of Non-Blocking Linked-Lists]: https://www.cl.cam.ac.uk/research/srg/netos/papers/2001-caslists.pdf
//! [Split-Ordered Lists: Lock-Free Extensible Hash Tables]: https://dl.acm.org/doi/10.1145/1147954.1147958

pub(crate) mod builder;
pub(crate) mod chunk;
pub(crate) mod evict_stack;
pub(crate) mod list;
pub(crate) mod map;
pub(crate) mod node;
pub(crate) mod resize;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_util;

pub use builder::VMapBuilder;
pub use map::{CasResult, VMap};
