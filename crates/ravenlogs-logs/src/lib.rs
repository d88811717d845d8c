//! Log processing for ravenlogs
//!
//! This crate provides the in-memory record engine with its filtered view and
//! the append-only JSON log store.

mod engine;
mod store;

pub use engine::{LevelCounts, LogEngine, Snapshot, ViewEvent};
pub use store::{JsonLogStore, allocate_path, read_all};

// Re-export types used in our public API
pub use ravenlogs_types::{Error, LogFilter, LogLevel, LogRecord};
