//! Error types for timemap.
//!
//! Each component has its own enum; [`Error`] wraps them so callers that
//! drive several components (the state manager, the CLI) can use `?` across
//! all of them.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::time::{Duration, Instant};

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Time(#[from] TimeError),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Thread(#[from] ThreadError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Failures raised by the command layer (unknown ids, name clashes).
    #[error("{0}")]
    Command(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeError {
    #[error("malformed time value '{value}': {reason}")]
    MalformedTimeValue { value: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: Instant, end: Instant },
    #[error("invalid importance {value}: must be within 0..=10")]
    InvalidImportance { value: f64 },
    #[error("occurrence at {when} is outside the period window {window_start}..={window_end}")]
    OccurrenceOutOfPeriod {
        when: Instant,
        window_start: Instant,
        window_end: Instant,
    },
    #[error("task {id} has no start time")]
    NoStartTime { id: Uuid },
    #[error("an event needs both a start and an end time")]
    MissingEventTime,
    #[error("repeat period must be positive, got {period}")]
    InvalidPeriod { period: Duration },
    #[error("{base} + {offset} is outside the supported time range")]
    TimeOutOfRange { base: Instant, offset: Duration },
    #[error("{what} is not implemented")]
    NotImplemented { what: &'static str },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChunkError {
    #[error("allocation key does not match the key held by this chunk")]
    KeyMismatch,
    #[error("time chunk duration must be positive, got {duration}")]
    NonPositiveDuration { duration: Duration },
    #[error("time chunk starting {start} with duration {duration} ends outside the supported time range")]
    OutOfRange { start: Instant, duration: Duration },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThreadError {
    #[error("cannot merge thread '{left}' with thread '{right}'")]
    ThreadNameMismatch { left: String, right: String },
    #[error("thread '{thread}' already holds a task with id {id}")]
    DuplicateId { thread: String, id: Uuid },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt record {path}: {reason}")]
    CorruptRecord { path: PathBuf, reason: String },
    #[error("state must be loaded before it can be saved")]
    NotLoaded,
    #[error("'{name}' cannot be used as a thread file name")]
    InvalidThreadName { name: String },
    #[error("timed out after {waited_ms}ms waiting for lock on {path}")]
    LockTimeout { path: PathBuf, waited_ms: u128 },
}

impl StoreError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::StoreUnavailable {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::CorruptRecord {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
