//! # timemap
//!
//! Tracks tasks grouped into life-area *threads* and keeps them on disk,
//! split into pending work (`future`) and history (`past`).
//!
//! * [`time`]: UTC instants and durations with a fixed text encoding.
//! * [`chunk`]: time chunks that can be bound to one task by a capability key.
//! * [`models`]: tasks, events, assignments and the repeat overlay.
//! * [`thread`]: named task sets with union-by-id merging.
//! * [`storage`]: the state manager (`load`, `save`, `refresh`).
//! * [`commands`] and [`urgency`]: the command-line layer.

pub mod chunk;
pub mod commands;
pub mod error;
pub mod models;
pub mod storage;
pub mod thread;
pub mod time;
pub mod urgency;

pub use error::{Error, Result};
