#![cfg(feature = "unstable-debug-counters")]

use crossbeam_utils::atomic::AtomicCell;
use once_cell::sync::Lazy;

#[derive(Clone, Debug)]
pub struct GlobalDebugCounters {
    pub relay_creation_count: u64,
    pub relay_drop_count: u64,
    pub value_node_creation_count: u64,
    pub value_node_drop_count: u64,
    pub chunk_array_creation_count: u64,
    pub chunk_array_allocation_bytes: u64,
    pub chunk_array_drop_count: u64,
    pub chunk_array_release_bytes: u64,
}

impl GlobalDebugCounters {
    pub fn current() -> Self {
        InternalGlobalDebugCounters::current()
    }
}

static COUNTERS: Lazy<InternalGlobalDebugCounters> =
    Lazy::new(InternalGlobalDebugCounters::default);

#[derive(Default)]
pub(crate) struct InternalGlobalDebugCounters {
    relay_creation_count: AtomicCell<u64>,
    relay_drop_count: AtomicCell<u64>,
    value_node_creation_count: AtomicCell<u64>,
    value_node_drop_count: AtomicCell<u64>,
    chunk_array_creation_count: AtomicCell<u64>,
    chunk_array_allocation_bytes: AtomicCell<u64>,
    chunk_array_drop_count: AtomicCell<u64>,
    chunk_array_release_bytes: AtomicCell<u64>,
}

impl InternalGlobalDebugCounters {
    fn current() -> GlobalDebugCounters {
        let c = &COUNTERS;
        GlobalDebugCounters {
            relay_creation_count: c.relay_creation_count.load(),
            relay_drop_count: c.relay_drop_count.load(),
            value_node_creation_count: c.value_node_creation_count.load(),
            value_node_drop_count: c.value_node_drop_count.load(),
            chunk_array_creation_count: c.chunk_array_creation_count.load(),
            chunk_array_allocation_bytes: c.chunk_array_allocation_bytes.load(),
            chunk_array_drop_count: c.chunk_array_drop_count.load(),
            chunk_array_release_bytes: c.chunk_array_release_bytes.load(),
        }
    }

    pub(crate) fn relay_created() {
        COUNTERS.relay_creation_count.fetch_add(1);
    }

    pub(crate) fn relay_dropped() {
        COUNTERS.relay_drop_count.fetch_add(1);
    }

    pub(crate) fn value_node_created() {
        COUNTERS.value_node_creation_count.fetch_add(1);
    }

    pub(crate) fn value_node_dropped() {
        COUNTERS.value_node_drop_count.fetch_add(1);
    }

    pub(crate) fn chunk_array_created(byte_size: u64) {
        COUNTERS.chunk_array_creation_count.fetch_add(1);
        COUNTERS.chunk_array_allocation_bytes.fetch_add(byte_size);
    }

    pub(crate) fn chunk_array_dropped(byte_size: u64) {
        COUNTERS.chunk_array_drop_count.fetch_add(1);
        COUNTERS.chunk_array_release_bytes.fetch_add(byte_size);
    }
}
