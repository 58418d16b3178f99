//! Process-wide client settings
//!
//! Endpoint, default API key, encryption key and the compression switch are
//! shared by every client in the process. A client copies them into a
//! [`ClientConfig`] when it is constructed; later changes only affect clients
//! built afterwards. The logging switch is the exception and is read on every
//! report.

use std::sync::{PoisonError, RwLock};

/// Endpoint used when none has been configured
pub const DEFAULT_API_ENDPOINT: &str = "https://in.treasuredata.com/android/v3";

#[derive(Debug)]
struct Settings {
    api_endpoint: Option<String>,
    default_api_key: Option<String>,
    encryption_key: Option<String>,
    logging_enabled: bool,
    compression_enabled: bool,
}

static SETTINGS: RwLock<Settings> = RwLock::new(Settings {
    api_endpoint: None,
    default_api_key: None,
    encryption_key: None,
    logging_enabled: true,
    compression_enabled: true,
});

fn update(f: impl FnOnce(&mut Settings)) {
    let mut settings = SETTINGS.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut settings);
}

fn read<T>(f: impl FnOnce(&Settings) -> T) -> T {
    let settings = SETTINGS.read().unwrap_or_else(PoisonError::into_inner);
    f(&settings)
}

/// Set the ingestion endpoint base URL.
pub fn set_api_endpoint(endpoint: &str) {
    let endpoint = endpoint.trim_end_matches('/').to_string();
    update(|s| s.api_endpoint = Some(endpoint));
}

/// Set the API key used by clients constructed without one.
pub fn set_default_api_key(api_key: &str) {
    let api_key = api_key.to_string();
    update(|s| s.default_api_key = Some(api_key));
}

/// Returns the process-wide default API key, if any.
pub fn default_api_key() -> Option<String> {
    read(|s| s.default_api_key.clone())
}

/// Set the payload encryption key handed to the queue collaborator.
pub fn set_encryption_key(encryption_key: &str) {
    let encryption_key = encryption_key.to_string();
    update(|s| s.encryption_key = Some(encryption_key));
}

pub fn enable_logging() {
    update(|s| s.logging_enabled = true);
}

pub fn disable_logging() {
    update(|s| s.logging_enabled = false);
}

/// Whether validation and upload failures are reported through `tracing`.
pub fn is_logging_enabled() -> bool {
    read(|s| s.logging_enabled)
}

pub fn enable_event_compression() {
    update(|s| s.compression_enabled = true);
}

pub fn disable_event_compression() {
    update(|s| s.compression_enabled = false);
}

pub fn is_event_compression_enabled() -> bool {
    read(|s| s.compression_enabled)
}

/// Restore every setting to its initial value.
pub fn reset() {
    update(|s| {
        s.api_endpoint = None;
        s.default_api_key = None;
        s.encryption_key = None;
        s.logging_enabled = true;
        s.compression_enabled = true;
    });
}

/// Immutable configuration snapshot owned by a ready client and its queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Ingestion endpoint base URL, without trailing slash
    pub api_endpoint: String,
    /// Write key sent with every upload
    pub api_key: String,
    /// Payload encryption key (carried, not applied)
    pub encryption_key: Option<String>,
    /// Gzip request bodies
    pub compression_enabled: bool,
}

impl ClientConfig {
    /// Build a config against the default endpoint with compression enabled.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            api_key: api_key.into(),
            encryption_key: None,
            compression_enabled: true,
        }
    }

    /// Snapshot the process-wide settings.
    ///
    /// `api_key` wins over the default key; returns `None` when neither exists.
    pub fn snapshot(api_key: Option<&str>) -> Option<Self> {
        read(|s| {
            let api_key = api_key
                .map(str::to_string)
                .or_else(|| s.default_api_key.clone())?;
            Some(Self {
                api_endpoint: s
                    .api_endpoint
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string()),
                api_key,
                encryption_key: s.encryption_key.clone(),
                compression_enabled: s.compression_enabled,
            })
        })
    }
}
