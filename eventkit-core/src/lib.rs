//! # eventkit-core
//!
//! Core library for eventkit - an analytics event-collection client.
//!
//! This library provides:
//! - A client facade that validates, enriches, and queues records
//! - A durable SQLite event queue with a background HTTP uploader
//! - A stable per-install identity
//! - Configuration management and logging infrastructure
//!
//! ## Flow
//!
//! `add_event` → name validation → enrichment → queue insert, and later
//! `upload_events` → flush on a background runtime → endpoint → callback.
//!
//! ## Example
//!
//! ```rust,no_run
//! use eventkit_core::{AppContext, Client, Config};
//!
//! let config = Config::load().expect("failed to load config");
//! let client = Client::from_config(&AppContext::from_default_dirs(), &config, Some("1/abcdef"));
//! client.add_event_kv("app_db", "launches", "screen", "home");
//! client.upload_events();
//! ```

// Re-export commonly used items at the crate root
pub use client::{Client, ReadyClient};
pub use config::Config;
pub use context::AppContext;
pub use db::Database;
pub use device::DeviceInfo;
pub use error::{Error, Result};
pub use queue::{EventQueue, FlushReport, SqliteEventQueue};
pub use settings::ClientConfig;
pub use types::*;
pub use uploader::{Callback, FnCallback};

// Public modules
pub mod client;
pub mod config;
pub mod context;
pub mod db;
pub mod device;
pub mod enricher;
pub mod error;
pub mod identity;
pub mod logging;
pub mod queue;
pub mod settings;
pub mod types;
pub mod uploader;
pub mod validator;

/// Library version, sent in the upload User-Agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
