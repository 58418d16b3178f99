//! Per-install identity
//!
//! A v4 UUID created on first use and persisted under `td_sdk_info/uuid`.
//! Read-or-create runs inside one mutex so racing first calls agree on a
//! single value, and the write is committed before the lock is released.

use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::db::Database;
use crate::error::Result;

/// Preference namespace holding client metadata
pub const PREFERENCES_NAMESPACE: &str = "td_sdk_info";

/// Preference key of the install identity
pub const IDENTITY_KEY: &str = "uuid";

/// Key/value storage the identity is persisted in
pub trait PreferenceStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    /// Store a value; must not return before the write is durable.
    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()>;
}

impl PreferenceStore for Database {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        self.get_preference(namespace, key)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<()> {
        self.put_preference(namespace, key, value)
    }
}

/// Lazily created, stable install identity
pub struct IdentityStore {
    store: Arc<dyn PreferenceStore>,
    /// First value produced in this process; never replaced
    identity: Mutex<Option<String>>,
}

impl IdentityStore {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            identity: Mutex::new(None),
        }
    }

    /// Return the install identity, creating and persisting it on first use.
    ///
    /// Storage failures are logged and absorbed: the identity is still returned
    /// and stays stable for this process, but may differ after a restart.
    pub fn get_or_create(&self) -> String {
        let mut identity = self
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = identity.as_ref() {
            return existing.clone();
        }

        let value = match self.store.get(PREFERENCES_NAMESPACE, IDENTITY_KEY) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                let fresh = Uuid::new_v4().to_string();
                match self.store.put(PREFERENCES_NAMESPACE, IDENTITY_KEY, &fresh) {
                    Ok(()) => tracing::debug!(identity = %fresh, "Created install identity"),
                    Err(e) => tracing::warn!(
                        error = %e,
                        "Failed to persist install identity; using in-memory value"
                    ),
                }
                fresh
            }
            Err(e) => {
                // Writing now could clobber a value we merely failed to read.
                tracing::warn!(
                    error = %e,
                    "Failed to read install identity; using in-memory value"
                );
                Uuid::new_v4().to_string()
            }
        };

        *identity = Some(value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    fn open_db(path: &std::path::Path) -> Arc<Database> {
        let db = Database::open(path).unwrap();
        db.migrate().unwrap();
        Arc::new(db)
    }

    /// Store whose writes always fail; reads fail too when `unreadable`
    struct ReadOnlyStore {
        unreadable: bool,
        puts: AtomicUsize,
    }

    impl PreferenceStore for ReadOnlyStore {
        fn get(&self, _namespace: &str, _key: &str) -> Result<Option<String>> {
            if self.unreadable {
                return Err(Error::Storage("unreadable".to_string()));
            }
            Ok(None)
        }

        fn put(&self, _namespace: &str, _key: &str, _value: &str) -> Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Err(Error::Storage("read-only".to_string()))
        }
    }

    #[test]
    fn test_identity_is_uuid_v4() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(open_db(&dir.path().join("prefs.db")));

        let identity = store.get_or_create();
        let parsed = Uuid::parse_str(&identity).unwrap();
        assert_eq!(parsed.get_version_num(), 4);
        assert_eq!(store.get_or_create(), identity);
    }

    #[test]
    fn test_identity_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.db");

        let first = IdentityStore::new(open_db(&path)).get_or_create();
        let second = IdentityStore::new(open_db(&path)).get_or_create();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_identity_is_reused() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        db.put_preference(PREFERENCES_NAMESPACE, IDENTITY_KEY, "preset-id")
            .unwrap();

        let store = IdentityStore::new(db);
        assert_eq!(store.get_or_create(), "preset-id");
    }

    #[test]
    fn test_concurrent_first_access_creates_one_identity() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir.path().join("prefs.db"));
        let store = IdentityStore::new(db.clone());
        let threads = 16;
        let barrier = Barrier::new(threads);

        let seen: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        store.get_or_create()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let persisted = db
            .get_preference(PREFERENCES_NAMESPACE, IDENTITY_KEY)
            .unwrap()
            .unwrap();
        assert!(seen.iter().all(|id| *id == persisted));
    }

    #[test]
    fn test_persistence_failure_degrades_to_memory() {
        let backing = Arc::new(ReadOnlyStore {
            unreadable: false,
            puts: AtomicUsize::new(0),
        });
        let store = IdentityStore::new(backing.clone());

        let first = store.get_or_create();
        let second = store.get_or_create();
        assert_eq!(first, second);
        assert_eq!(backing.puts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_failure_never_writes() {
        let backing = Arc::new(ReadOnlyStore {
            unreadable: true,
            puts: AtomicUsize::new(0),
        });
        let store = IdentityStore::new(backing.clone());

        let first = store.get_or_create();
        assert_eq!(Uuid::parse_str(&first).unwrap().get_version_num(), 4);
        assert_eq!(store.get_or_create(), first);
        assert_eq!(backing.puts.load(Ordering::SeqCst), 0);
    }
}
