//! Host application context

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db::Database;
use crate::device::DeviceInfo;
use crate::error::Result;

/// File name of the preference and queue database inside the data dir
pub const DATABASE_FILE: &str = "eventkit.db";

/// Where the client keeps its state and which device it runs on
#[derive(Debug, Clone)]
pub struct AppContext {
    pub data_dir: PathBuf,
    pub device: DeviceInfo,
}

impl AppContext {
    /// Context rooted at `data_dir`, describing the current host.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            device: DeviceInfo::collect(),
        }
    }

    /// Context in `$XDG_DATA_HOME/eventkit`.
    pub fn from_default_dirs() -> Self {
        Self::new(Config::data_dir())
    }

    /// Replace the probed device metadata.
    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    /// Open (creating if needed) and migrate the context's database.
    pub fn open_database(&self) -> Result<Database> {
        ensure_dir(&self.data_dir)?;
        let db = Database::open(&self.database_path())?;
        db.migrate()?;
        Ok(db)
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        tracing::debug!(dir = %dir.display(), "Created data directory");
    }
    Ok(())
}
