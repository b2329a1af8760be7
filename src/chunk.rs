use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ChunkError;
use crate::time::{Duration, Instant};

/// Size of a chunk when the caller does not choose one.
pub const DEFAULT_CHUNK_DURATION: Duration = Duration::minutes(15);

/// A fixed interval of time. Immutable once built, and its end is always
/// representable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "RawTimeChunk")]
pub struct TimeChunk {
    #[serde(rename = "start_time")]
    start: Instant,
    duration: Duration,
}

#[derive(Deserialize)]
struct RawTimeChunk {
    start_time: Instant,
    duration: Duration,
}

impl TryFrom<RawTimeChunk> for TimeChunk {
    type Error = ChunkError;

    fn try_from(raw: RawTimeChunk) -> Result<Self, Self::Error> {
        TimeChunk::new(raw.start_time, raw.duration)
    }
}

impl TimeChunk {
    pub fn new(start: Instant, duration: Duration) -> Result<Self, ChunkError> {
        if !duration.is_positive() {
            return Err(ChunkError::NonPositiveDuration { duration });
        }
        if start.checked_add(duration).is_none() {
            return Err(ChunkError::OutOfRange { start, duration });
        }
        Ok(TimeChunk { start, duration })
    }

    /// A chunk of [`DEFAULT_CHUNK_DURATION`].
    pub fn starting_at(start: Instant) -> Result<Self, ChunkError> {
        Self::new(start, DEFAULT_CHUNK_DURATION)
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end(&self) -> Instant {
        self.start + self.duration
    }

    /// Half-open: the end instant belongs to the next chunk.
    pub fn contains(&self, when: Instant) -> bool {
        self.start <= when && when < self.end()
    }

    pub fn overlaps(&self, other: &TimeChunk) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// Opaque capability handed to whoever allocates a chunk first.
///
/// Only the holder of the key may reassign or release the chunk afterwards.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct AllocationKey(#[serde(with = "hex_u128")] u128);

impl AllocationKey {
    pub fn generate() -> Self {
        AllocationKey(rand::random())
    }
}

impl fmt::Debug for AllocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AllocationKey(..)")
    }
}

mod hex_u128 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:032x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        u128::from_str_radix(&s, 16).map_err(de::Error::custom)
    }
}

/// A chunk that can be bound to a single task.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AllocatedTimeChunk {
    #[serde(flatten)]
    chunk: TimeChunk,
    #[serde(rename = "task_allocated", default)]
    owner: Option<Uuid>,
    #[serde(default)]
    key: Option<AllocationKey>,
}

impl AllocatedTimeChunk {
    pub fn new(chunk: TimeChunk) -> Self {
        AllocatedTimeChunk {
            chunk,
            owner: None,
            key: None,
        }
    }

    pub fn chunk(&self) -> &TimeChunk {
        &self.chunk
    }

    pub fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    pub fn is_keyed(&self) -> bool {
        self.key.is_some()
    }

    fn check_key(&self, key: &AllocationKey) -> Result<(), ChunkError> {
        match &self.key {
            Some(held) if held == key => Ok(()),
            Some(_) => Err(ChunkError::KeyMismatch),
            None => Ok(()),
        }
    }

    /// Binds the chunk to `task_id`.
    ///
    /// An unkeyed chunk adopts `key`; a keyed chunk only accepts the key it
    /// already holds.
    pub fn allocate(&mut self, task_id: Uuid, key: &AllocationKey) -> Result<(), ChunkError> {
        self.check_key(key)?;
        self.key = Some(*key);
        self.owner = Some(task_id);
        Ok(())
    }

    /// Allocates with a freshly generated key and returns it.
    pub fn claim(&mut self, task_id: Uuid) -> Result<AllocationKey, ChunkError> {
        if self.key.is_some() {
            return Err(ChunkError::KeyMismatch);
        }
        let key = AllocationKey::generate();
        self.allocate(task_id, &key)?;
        Ok(key)
    }

    /// Clears the owner. The key stays with the chunk.
    pub fn release(&mut self, key: &AllocationKey) -> Result<(), ChunkError> {
        match &self.key {
            Some(held) if held == key => {
                self.owner = None;
                Ok(())
            }
            _ => Err(ChunkError::KeyMismatch),
        }
    }
}
