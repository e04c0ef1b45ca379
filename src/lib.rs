#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! `vmap` provides [`VMap`], a lock-free concurrent hash map that many
//! threads can read, insert into and remove from while it resizes itself.
//!
//! No operation ever takes a lock or waits for another thread. Entries are
//! kept in one sorted linked list split into chunks by sentinel "relay" nodes,
//! and a small segment index points every hash at the relay of its chunk. The
//! index doubles or halves cooperatively as the map grows and shrinks, without
//! moving any entry. Memory of removed entries is reclaimed with
//! [`crossbeam-epoch`].
//!
//! # Example
//!
//! ```rust
//! use vmap::{CasResult, VMap};
//!
//! use std::{sync::Arc, thread};
//!
//! let map = Arc::new(VMap::new());
//!
//! let threads: Vec<_> = (0..4u64)
//!     .map(|t| {
//!         let map = Arc::clone(&map);
//!         thread::spawn(move || {
//!             for i in 0..100 {
//!                 map.store(t * 100 + i, i);
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for t in threads {
//!     t.join().unwrap();
//! }
//!
//! assert_eq!(map.len(), 400);
//! assert_eq!(map.load(&205), Some(5));
//!
//! assert_eq!(map.compare_and_swap(&205, &5, 50), CasResult::Succeeded);
//! assert_eq!(map.compare_and_swap(&205, &5, 60), CasResult::ConditionFailed);
//! assert_eq!(map.load_and_delete(&205), Some(50));
//! assert!(!map.has(&205));
//! ```
//!
//! # Crate Features
//!
//! - `logging`: logs segment index resizes through the [`log`] crate.
//! - `unstable-debug-counters`: adds [`GlobalDebugCounters`], counting the
//!   creation and destruction of internal objects. Intended for debugging.
//!
//! [`crossbeam-epoch`]: https://docs.rs/crossbeam-epoch
//! [`log`]: https://docs.rs/log
//! [`GlobalDebugCounters`]: ./struct.GlobalDebugCounters.html

pub(crate) mod common;
pub(crate) mod vmap;

pub use common::error::ConfigError;
pub use vmap::{CasResult, VMap, VMapBuilder};

#[cfg(feature = "unstable-debug-counters")]
#[cfg_attr(docsrs, doc(cfg(feature = "unstable-debug-counters")))]
pub use common::concurrent::debug_counters::GlobalDebugCounters;
