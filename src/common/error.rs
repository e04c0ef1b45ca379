/// The error type returned by [`VMapBuilder::try_build`][try-build] and
/// [`VMapBuilder::try_build_with_hasher`][try-build-with-hasher] when the
/// configuration cannot produce a working map.
///
/// [try-build]: ../struct.VMapBuilder.html#method.try_build
/// [try-build-with-hasher]: ../struct.VMapBuilder.html#method.try_build_with_hasher
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The maximum average bucket length was zero, which would make every
    /// insertion trigger a split.
    #[error("max_avg_bucket_len must be greater than zero")]
    ZeroMaxAvgBucketLen,

    /// The minimum average bucket length was not smaller than the maximum one,
    /// so splits and merges would undo each other.
    #[error(
        "min_avg_bucket_len ({min}) must be smaller than max_avg_bucket_len ({max})"
    )]
    InvertedBucketLenBounds { min: usize, max: usize },

    /// More initial chunks were requested than `max_hash_value` allows.
    #[error(
        "initial_chunks ({requested}) exceeds the {max} chunks addressable by \
    max_hash_value"
    )]
    TooManyInitialChunks { requested: usize, max: usize },
}
