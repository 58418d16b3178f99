//! Database layer for eventkit
//!
//! This module provides the local storage layer using SQLite with:
//! - Schema migrations
//! - Preference storage (install identity)
//! - The durable event queue

pub mod repo;
pub mod schema;

pub use repo::{Database, EventPage};
