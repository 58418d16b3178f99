//! Client facade
//!
//! [`Client`] is what the host application holds. It is either
//! [`Client::Ready`], which validates, enriches, and queues records, or
//! [`Client::NoOp`], which accepts every call and does nothing. A client
//! without an API key, or whose storage cannot be opened, is `NoOp`, so
//! callers never need to check.
//!
//! ```rust,no_run
//! use eventkit_core::{settings, AppContext, Client, Record};
//!
//! settings::set_default_api_key("1/abcdef");
//! let client = Client::initialize_shared_instance(&AppContext::from_default_dirs(), None);
//! client.set_auto_append_uniq_id(true);
//! client.add_event_kv("app_db", "clicks", "button", "buy");
//! client.upload_events();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;

use crate::config::{Config, QueueConfig};
use crate::context::AppContext;
use crate::device::DeviceInfo;
use crate::enricher::{self, Enrichment};
use crate::error::Result;
use crate::identity::{IdentityStore, PreferenceStore};
use crate::queue::{EventQueue, SqliteEventQueue};
use crate::settings::ClientConfig;
use crate::types::Record;
use crate::uploader::{self, Callback, UploadCoordinator};
use crate::validator;

/// Process-wide client returned by [`Client::shared_instance`]
static SHARED: RwLock<Option<Client>> = RwLock::new(None);

/// Handle to the event client; cheap to clone
#[derive(Clone)]
pub enum Client {
    Ready(Arc<ReadyClient>),
    NoOp,
}

impl Client {
    /// Build a client against the database in `context`.
    ///
    /// Returns [`Client::NoOp`] when no API key is available (`api_key`, else
    /// the process-wide default) or storage cannot be opened.
    pub fn new(context: &AppContext, api_key: Option<&str>) -> Self {
        Self::with_queue_config(context, api_key, QueueConfig::default())
    }

    /// Like [`new`](Self::new), with explicit queue tuning.
    pub fn with_queue_config(
        context: &AppContext,
        api_key: Option<&str>,
        queue_config: QueueConfig,
    ) -> Self {
        let Some(config) = ClientConfig::snapshot(api_key) else {
            tracing::warn!("No API key set; events will be discarded");
            return Client::NoOp;
        };

        match open_ready(context, config, queue_config) {
            Ok(ready) => Client::Ready(Arc::new(ready)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize event client; events will be discarded");
                Client::NoOp
            }
        }
    }

    /// Build a client from a loaded config file.
    ///
    /// Applies the `[client]` process settings first, then the per-client flags.
    pub fn from_config(context: &AppContext, config: &Config, api_key: Option<&str>) -> Self {
        config.apply_process_settings();
        let client = Self::with_queue_config(context, api_key, config.queue.clone());
        client.set_debug_mode(config.client.debug);
        client.set_auto_append_uniq_id(config.client.auto_append_uniq_id);
        client.set_auto_append_model_information(config.client.auto_append_model_information);
        client
    }

    /// Build a ready client around an existing queue.
    ///
    /// The install identity is still kept in the context's database.
    pub fn with_queue(
        context: &AppContext,
        config: ClientConfig,
        queue: Arc<dyn EventQueue>,
    ) -> Self {
        match context.open_database() {
            Ok(db) => Client::Ready(Arc::new(ReadyClient::new(
                config,
                queue,
                Arc::new(db),
                context.device.clone(),
            ))),
            Err(e) => {
                tracing::error!(error = %e, "Failed to open preferences; events will be discarded");
                Client::NoOp
            }
        }
    }

    /// Create the process-wide client, replacing any previous one.
    pub fn initialize_shared_instance(context: &AppContext, api_key: Option<&str>) -> Self {
        let client = Self::new(context, api_key);
        Self::set_shared_instance(client.clone());
        client
    }

    /// Install `client` as the process-wide client.
    pub fn set_shared_instance(client: Client) {
        *SHARED.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
    }

    /// The process-wide client, or [`Client::NoOp`] if none was initialized.
    pub fn shared_instance() -> Self {
        let shared = SHARED.read().unwrap_or_else(PoisonError::into_inner);
        match shared.as_ref() {
            Some(client) => client.clone(),
            None => {
                tracing::warn!("Shared client used before initialize_shared_instance; events will be discarded");
                Client::NoOp
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Client::Ready(_))
    }

    // ============================================
    // Events
    // ============================================

    /// Queue a single-field record.
    pub fn add_event_kv(&self, database: &str, table: &str, key: &str, value: impl Into<Value>) {
        self.add_event(database, table, Record::single(key, value));
    }

    pub fn add_event_kv_with_callback(
        &self,
        database: &str,
        table: &str,
        key: &str,
        value: impl Into<Value>,
        callback: Arc<dyn Callback>,
    ) {
        self.add_event_with_callback(database, table, Record::single(key, value), callback);
    }

    /// Queue `record` under `database.table`, reporting to the default callback.
    pub fn add_event(&self, database: &str, table: &str, record: Record) {
        if let Client::Ready(ready) = self {
            ready.add_event(database, table, record, None);
        }
    }

    pub fn add_event_with_callback(
        &self,
        database: &str,
        table: &str,
        record: Record,
        callback: Arc<dyn Callback>,
    ) {
        if let Client::Ready(ready) = self {
            ready.add_event(database, table, record, Some(callback));
        }
    }

    /// Start uploading every queued event; returns immediately.
    pub fn upload_events(&self) {
        if let Client::Ready(ready) = self {
            ready.upload(None, None);
        }
    }

    pub fn upload_events_with_callback(&self, callback: Arc<dyn Callback>) {
        if let Client::Ready(ready) = self {
            ready.upload(None, Some(callback));
        }
    }

    /// Start uploading the events queued for one table.
    pub fn upload_table_events(
        &self,
        database: &str,
        table: &str,
        callback: Option<Arc<dyn Callback>>,
    ) {
        if let Client::Ready(ready) = self {
            ready.upload(Some((database, table)), callback);
        }
    }

    /// Events waiting for upload; 0 for a no-op client.
    pub fn pending_events(&self) -> usize {
        match self {
            Client::Ready(ready) => ready.pending_events(),
            Client::NoOp => 0,
        }
    }

    // ============================================
    // Default callbacks
    // ============================================

    pub fn set_add_event_callback(&self, callback: Option<Arc<dyn Callback>>) {
        if let Client::Ready(ready) = self {
            ready.callbacks.set_add_event(callback);
        }
    }

    pub fn add_event_callback(&self) -> Option<Arc<dyn Callback>> {
        match self {
            Client::Ready(ready) => ready.callbacks.add_event(),
            Client::NoOp => None,
        }
    }

    pub fn set_upload_events_callback(&self, callback: Option<Arc<dyn Callback>>) {
        if let Client::Ready(ready) = self {
            ready.callbacks.set_upload_events(callback);
        }
    }

    pub fn upload_events_callback(&self) -> Option<Arc<dyn Callback>> {
        match self {
            Client::Ready(ready) => ready.callbacks.upload_events(),
            Client::NoOp => None,
        }
    }

    // ============================================
    // Flags
    // ============================================

    pub fn set_auto_append_uniq_id(&self, enabled: bool) {
        if let Client::Ready(ready) = self {
            ready.auto_append_uniq_id.store(enabled, Ordering::SeqCst);
        }
    }

    pub fn auto_append_uniq_id(&self) -> bool {
        match self {
            Client::Ready(ready) => ready.auto_append_uniq_id.load(Ordering::SeqCst),
            Client::NoOp => false,
        }
    }

    pub fn set_auto_append_model_information(&self, enabled: bool) {
        if let Client::Ready(ready) = self {
            ready
                .auto_append_model_information
                .store(enabled, Ordering::SeqCst);
        }
    }

    pub fn auto_append_model_information(&self) -> bool {
        match self {
            Client::Ready(ready) => ready.auto_append_model_information.load(Ordering::SeqCst),
            Client::NoOp => false,
        }
    }

    /// Toggle verbose upload logging in the queue.
    pub fn set_debug_mode(&self, debug: bool) {
        if let Client::Ready(ready) = self {
            ready.queue.set_debug_mode(debug);
        }
    }

    // ============================================
    // Identity and enrichment helpers
    // ============================================

    /// The install identity, created on first use.
    pub fn identity(&self) -> Option<String> {
        match self {
            Client::Ready(ready) => Some(ready.identity.get_or_create()),
            Client::NoOp => None,
        }
    }

    /// Add `td_uuid` to `record` regardless of the auto-append flag.
    pub fn append_uniq_id(&self, record: &mut Record) {
        if let Client::Ready(ready) = self {
            enricher::append_uniq_id(record, &ready.identity.get_or_create());
        }
    }

    /// Add the device fields to `record` regardless of the auto-append flag.
    pub fn append_model_information(&self, record: &mut Record) {
        if let Client::Ready(ready) = self {
            enricher::append_model_information(record, &ready.device);
        }
    }

    /// Configuration snapshot of a ready client
    pub fn config(&self) -> Option<&ClientConfig> {
        match self {
            Client::Ready(ready) => Some(&ready.config),
            Client::NoOp => None,
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Client::Ready(ready) => f
                .debug_struct("Ready")
                .field("api_endpoint", &ready.config.api_endpoint)
                .finish_non_exhaustive(),
            Client::NoOp => f.write_str("NoOp"),
        }
    }
}

fn open_ready(
    context: &AppContext,
    config: ClientConfig,
    queue_config: QueueConfig,
) -> Result<ReadyClient> {
    let db = Arc::new(context.open_database()?);
    let queue = SqliteEventQueue::with_http(db.clone(), &config, queue_config)?;
    tracing::info!(
        api_endpoint = %config.api_endpoint,
        database = %context.database_path().display(),
        "Event client ready"
    );
    Ok(ReadyClient::new(
        config,
        Arc::new(queue),
        db,
        context.device.clone(),
    ))
}

/// Default callbacks, replaced as a whole under a write lock
#[derive(Default)]
struct DefaultCallbacks {
    add_event: RwLock<Option<Arc<dyn Callback>>>,
    upload_events: RwLock<Option<Arc<dyn Callback>>>,
}

impl DefaultCallbacks {
    fn add_event(&self) -> Option<Arc<dyn Callback>> {
        self.add_event
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_add_event(&self, callback: Option<Arc<dyn Callback>>) {
        *self.add_event.write().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn upload_events(&self) -> Option<Arc<dyn Callback>> {
        self.upload_events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_upload_events(&self, callback: Option<Arc<dyn Callback>>) {
        *self
            .upload_events
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }
}

/// Configured client state behind [`Client::Ready`]
pub struct ReadyClient {
    config: ClientConfig,
    queue: Arc<dyn EventQueue>,
    uploader: UploadCoordinator,
    identity: IdentityStore,
    device: DeviceInfo,
    callbacks: DefaultCallbacks,
    auto_append_uniq_id: AtomicBool,
    auto_append_model_information: AtomicBool,
}

impl ReadyClient {
    pub fn new(
        config: ClientConfig,
        queue: Arc<dyn EventQueue>,
        preferences: Arc<dyn PreferenceStore>,
        device: DeviceInfo,
    ) -> Self {
        Self {
            config,
            uploader: UploadCoordinator::new(queue.clone()),
            queue,
            identity: IdentityStore::new(preferences),
            device,
            callbacks: DefaultCallbacks::default(),
            auto_append_uniq_id: AtomicBool::new(false),
            auto_append_model_information: AtomicBool::new(false),
        }
    }

    fn add_event(
        &self,
        database: &str,
        table: &str,
        record: Record,
        callback: Option<Arc<dyn Callback>>,
    ) {
        // Resolved once, before any work, so a concurrent setter cannot split this call.
        let callback = callback.or_else(|| self.callbacks.add_event());
        let outcome = self.enqueue(database, table, record);
        uploader::complete("add_event", callback.as_deref(), outcome);
    }

    fn enqueue(&self, database: &str, table: &str, mut record: Record) -> Result<()> {
        let namespace = validator::validate(database, table)?;

        let identity = self
            .auto_append_uniq_id
            .load(Ordering::SeqCst)
            .then(|| self.identity.get_or_create());
        let device = self
            .auto_append_model_information
            .load(Ordering::SeqCst)
            .then_some(&self.device);
        enricher::enrich(
            &mut record,
            &Enrichment {
                identity: identity.as_deref(),
                device,
            },
        );

        self.queue.enqueue(&namespace.key(), record)
    }

    fn upload(&self, scope: Option<(&str, &str)>, callback: Option<Arc<dyn Callback>>) {
        let callback = callback.or_else(|| self.callbacks.upload_events());
        match scope {
            None => self.uploader.upload(None, callback),
            Some((database, table)) => match validator::validate(database, table) {
                Ok(namespace) => self.uploader.upload(Some(&namespace.key()), callback),
                Err(e) => uploader::complete::<()>("upload_events", callback.as_deref(), Err(e)),
            },
        }
    }

    fn pending_events(&self) -> usize {
        self.queue.pending_count(None).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to count queued events");
            0
        })
    }
}
