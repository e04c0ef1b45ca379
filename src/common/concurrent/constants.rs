pub(crate) const DEFAULT_MIN_AVG_BUCKET_LEN: usize = 1;
pub(crate) const DEFAULT_MAX_AVG_BUCKET_LEN: usize = 8;
pub(crate) const DEFAULT_MAX_HASH_VALUE: u64 = u64::MAX;

// Relays remembered while linking. Older ones are dropped, never waited for.
pub(crate) const EVICT_STACK_CAPACITY: usize = 4;

// Upper bound on the segment index: 2^28 slots (2 GiB of relay pointers on a
// 64-bit target).
#[cfg(target_pointer_width = "64")]
pub(crate) const MAX_CHUNKS_LOG2: u32 = 28;
#[cfg(not(target_pointer_width = "64"))]
pub(crate) const MAX_CHUNKS_LOG2: u32 = 20;
