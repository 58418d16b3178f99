//! Event queue
//!
//! The client talks to its buffer through the [`EventQueue`] trait. The
//! shipped implementation, [`SqliteEventQueue`], keeps events in the local
//! SQLite database and uploads them over HTTP on a background runtime.
//!
//! ## Delivery
//!
//! - `enqueue` is a single local insert and never touches the network
//! - `flush` returns immediately; its completion runs exactly once
//! - An event leaves the queue when the endpoint accepts it, when it has
//!   been rejected `max_attempts` times, when its stored form can no longer
//!   be decoded, or when it is purged
//! - Network failures leave events queued for the next flush

mod client;
mod events;
mod publisher;

pub use client::{HttpTransport, Transport};
pub use events::{BatchOutcome, EventBatch, WIRE_KEY_EVENT_ID, WIRE_KEY_TIME};
pub use publisher::SqliteEventQueue;

use crate::error::Result;
use crate::types::Record;

/// Summary of one completed flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Events the endpoint accepted and that left the queue
    pub delivered: usize,
    /// Events the endpoint refused during this flush
    pub rejected: usize,
    /// Rejected events dropped after exhausting their attempts
    pub dropped: usize,
    /// Stored events that could not be decoded and were removed unsent
    pub discarded: usize,
}

/// Completion handed to [`EventQueue::flush`]; called exactly once
pub type FlushCompletion = Box<dyn FnOnce(Result<FlushReport>) + Send + 'static>;

/// Buffer between the client and the ingestion endpoint
pub trait EventQueue: Send + Sync {
    /// Buffer one record under `namespace` (`database.table`).
    fn enqueue(&self, namespace: &str, record: Record) -> Result<()>;

    /// Start uploading everything queued so far, optionally for one namespace.
    ///
    /// Must not block on network I/O.
    fn flush(&self, namespace: Option<&str>, completion: FlushCompletion);

    /// Number of buffered events, optionally for one namespace
    fn pending_count(&self, namespace: Option<&str>) -> Result<usize>;

    /// Toggle verbose per-request logging
    fn set_debug_mode(&self, debug: bool);
}
