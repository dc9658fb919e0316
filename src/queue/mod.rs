//! Durable queue of readings awaiting delivery
//!
//! The queue is shared with the acquisition side, which appends readings while
//! the relay drains them. Every operation takes one exclusive lock for its
//! duration and never holds it across a sleep or a network call.

use crate::protocol::{NewReading, Reading, ReadingError};
use thiserror::Error;

pub mod sqlite;

pub use sqlite::SqliteQueue;

/// Queue errors. None of these are fatal to the relay.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Queue lock poisoned")]
    LockPoisoned,

    #[error("Queue worker failed: {0}")]
    Worker(String),
}

impl From<ReadingError> for QueueError {
    fn from(error: ReadingError) -> Self {
        QueueError::InvalidData(error.to_string())
    }
}

/// Result type alias using QueueError
pub type QueueResult<T> = Result<T, QueueError>;

/// Ordered, persistent store of pending readings
pub trait ReadingQueue: Send + Sync {
    /// The pending reading with the smallest timestamp, if any.
    /// Ties are broken by insertion order.
    fn dequeue_oldest(&self) -> QueueResult<Option<Reading>>;

    /// Remove a reading. Removing an absent id succeeds and has no effect.
    fn delete_by_id(&self, id: i64) -> QueueResult<()>;

    /// Append a reading and return it with its assigned id
    fn enqueue(&self, reading: &NewReading) -> QueueResult<Reading>;

    /// Number of readings still pending
    fn pending_count(&self) -> QueueResult<u64>;

    /// Up to `limit` oldest pending readings, oldest first
    fn peek(&self, limit: usize) -> QueueResult<Vec<Reading>>;
}
