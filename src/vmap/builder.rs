use super::{chunk, map::Config, VMap};
use crate::common::{
    concurrent::constants::{
        DEFAULT_MAX_AVG_BUCKET_LEN, DEFAULT_MAX_HASH_VALUE, DEFAULT_MIN_AVG_BUCKET_LEN,
        MAX_CHUNKS_LOG2,
    },
    error::ConfigError,
};

use std::{collections::hash_map::RandomState, marker::PhantomData};

/// Builds a [`VMap`][vmap-struct] with various configuration knobs.
///
/// [vmap-struct]: ./struct.VMap.html
///
/// # Examples
///
/// ```rust
/// use vmap::VMapBuilder;
///
/// let map = VMapBuilder::new()
///     // Double the index once chunks average more than 4 entries.
///     .max_avg_bucket_len(4)
///     // Start with 64 chunks instead of one.
///     .initial_chunks(64)
///     .name("sessions")
///     .build();
///
/// map.store("alice", 1);
/// assert_eq!(map.load("alice"), Some(1));
/// assert_eq!(map.num_chunks(), 64);
/// ```
///
pub struct VMapBuilder<K, V> {
    name: Option<String>,
    min_avg_bucket_len: usize,
    max_avg_bucket_len: usize,
    max_hash_value: u64,
    initial_chunks: usize,
    map_type: PhantomData<(K, V)>,
}

impl<K, V> Default for VMapBuilder<K, V> {
    fn default() -> Self {
        Self {
            name: None,
            min_avg_bucket_len: DEFAULT_MIN_AVG_BUCKET_LEN,
            max_avg_bucket_len: DEFAULT_MAX_AVG_BUCKET_LEN,
            max_hash_value: DEFAULT_MAX_HASH_VALUE,
            initial_chunks: 1,
            map_type: PhantomData,
        }
    }
}

impl<K, V> VMapBuilder<K, V> {
    /// Construct a new `VMapBuilder` with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the map. It is only used to tag log messages.
    pub fn name(self, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..self
        }
    }

    /// Sets the average number of entries per chunk below which the segment
    /// index is halved. Zero disables shrinking.
    pub fn min_avg_bucket_len(self, len: usize) -> Self {
        Self {
            min_avg_bucket_len: len,
            ..self
        }
    }

    /// Sets the average number of entries per chunk above which the segment
    /// index is doubled.
    pub fn max_avg_bucket_len(self, len: usize) -> Self {
        Self {
            max_avg_bucket_len: len,
            ..self
        }
    }

    /// Sets the largest hash value the hasher will produce.
    ///
    /// This bounds the maximum number of slots in the segment index, not the
    /// initial one: the index never grows beyond one slot per hash value, but
    /// it still starts with a single slot and splits as entries arrive. Use
    /// [`initial_chunks`](#method.initial_chunks) to start pre-sized, e.g.
    /// `.max_hash_value(3).initial_chunks(4)` for one slot per hash from the
    /// start. Hashes above this bound still work but all land in the last
    /// chunk.
    pub fn max_hash_value(self, max_hash_value: u64) -> Self {
        Self {
            max_hash_value,
            ..self
        }
    }

    /// Sets the number of chunks the segment index starts with. It is rounded
    /// up to a power of two.
    pub fn initial_chunks(self, num_chunks: usize) -> Self {
        Self {
            initial_chunks: num_chunks,
            ..self
        }
    }

    /// Builds a `VMap<K, V>`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. See [`try_build`](#method.try_build).
    pub fn build(self) -> VMap<K, V, RandomState> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `VMap<K, V, S>`, with the given `hasher`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid. See
    /// [`try_build_with_hasher`](#method.try_build_with_hasher).
    pub fn build_with_hasher<S>(self, hasher: S) -> VMap<K, V, S> {
        match self.try_build_with_hasher(hasher) {
            Ok(map) => map,
            Err(e) => panic!("{e}"),
        }
    }

    /// Builds a `VMap<K, V>`, or returns an error if the configuration is
    /// invalid.
    pub fn try_build(self) -> Result<VMap<K, V, RandomState>, ConfigError> {
        self.try_build_with_hasher(RandomState::default())
    }

    /// Builds a `VMap<K, V, S>` with the given `hasher`, or returns an error
    /// if the configuration is invalid.
    pub fn try_build_with_hasher<S>(self, hasher: S) -> Result<VMap<K, V, S>, ConfigError> {
        if self.max_avg_bucket_len == 0 {
            return Err(ConfigError::ZeroMaxAvgBucketLen);
        }
        if self.min_avg_bucket_len >= self.max_avg_bucket_len {
            return Err(ConfigError::InvertedBucketLenBounds {
                min: self.min_avg_bucket_len,
                max: self.max_avg_bucket_len,
            });
        }

        let bits = chunk::hash_bits(self.max_hash_value);
        let min_log_chunk_size = bits.saturating_sub(MAX_CHUNKS_LOG2);
        let max_chunks = 1usize << (bits - min_log_chunk_size);

        let num_chunks = self
            .initial_chunks
            .max(1)
            .checked_next_power_of_two()
            .filter(|n| *n <= max_chunks)
            .ok_or(ConfigError::TooManyInitialChunks {
                requested: self.initial_chunks,
                max: max_chunks,
            })?;
        let log_chunk_size = bits - num_chunks.trailing_zeros();

        let config = Config {
            name: self.name,
            min_avg_bucket_len: self.min_avg_bucket_len,
            max_avg_bucket_len: self.max_avg_bucket_len,
            max_hash_value: self.max_hash_value,
            min_log_chunk_size,
        };

        Ok(VMap::with_everything(
            config,
            log_chunk_size,
            num_chunks,
            hasher,
        ))
    }
}
