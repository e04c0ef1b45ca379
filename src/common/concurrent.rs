pub(crate) mod constants;

#[cfg(feature = "unstable-debug-counters")]
pub(crate) mod debug_counters;
