//! Storage abstraction for pin persistence
//!
//! This module provides a trait-based abstraction for pin storage with four
//! backends:
//! - in-memory (default, volatile)
//! - filesystem (atomic signed-file dumps)
//! - Redis (hash per pin, composite key)
//! - PostgreSQL (upsert table keyed by app/file/fqdn)
//!
//! Each backend also answers the three Kubernetes-style health probes so the
//! ops server can report on the freshness of persisted pins.

pub mod filesystem;
pub mod memory;
pub mod postgres;
pub mod redis;

pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use redis::RedisStore;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pinning_core::{PinRecord, Signer};

/// A pin is "fresh" when its probe date is within this window of now.
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(10);

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("file {0} not found")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("failed to save some keys: {0}")]
    Partial(String),
}

impl From<pinning_core::PinningError> for StorageError {
    fn from(err: pinning_core::PinningError) -> Self {
        StorageError::Signing(err.to_string())
    }
}

/// What a backend returns for a manifest lookup.
///
/// Backends that store structured records return `Records`; the filesystem
/// backend stores already-signed manifests and returns the raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum FileQuery {
    Records(Vec<PinRecord>),
    Raw(Vec<u8>),
    Missing,
}

/// Outcome of a health probe: an empty report is healthy, each entry is one
/// human-readable diagnostic line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub errors: Vec<String>,
}

impl ProbeReport {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn healthy(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, diagnostic: impl Into<String>) {
        self.errors.push(diagnostic.into());
    }
}

/// Per-backend configuration, selected by `storage.type`.
///
/// Every variant carries exactly what its backend needs; there are no
/// cross-backend no-op settings.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Memory,
    Filesystem {
        dump_dir: PathBuf,
    },
    Redis {
        dsn: String,
    },
    Postgres {
        dsn: String,
        pool: PoolSettings,
    },
}

/// Connection pool sizing for database-backed stores
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_open_conns: u32,
    pub max_idle_conns: u32,
    pub conn_max_idle_time: Duration,
    pub conn_max_lifetime: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_conns: 5,
            max_idle_conns: 5,
            conn_max_idle_time: Duration::from_secs(5 * 60),
            conn_max_lifetime: Duration::from_secs(30 * 60),
        }
    }
}

/// Storage backend trait for pin persistence
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait PinStore: Send + Sync + Debug {
    /// Persist a snapshot of the live pin registry.
    ///
    /// Records with an empty `key` are invalid individually; a backend skips
    /// or reports them but never aborts the rest of the batch for one bad
    /// record.
    async fn save_keys(&self, keys: &HashMap<String, PinRecord>) -> Result<(), StorageError>;

    /// Retrieve the pins (or the stored manifest bytes) for one file.
    async fn get_by_file(&self, file: &str) -> Result<FileQuery, StorageError>;

    /// Release backend resources; called exactly once at shutdown.
    async fn close(&self) -> Result<(), StorageError>;

    /// Startup probe: the backend finished construction, so this passes.
    async fn probe_startup(&self) -> ProbeReport {
        ProbeReport::ok()
    }

    /// Readiness probe: at least one valid pin has been persisted.
    async fn probe_readiness(&self) -> ProbeReport;

    /// Liveness probe: at least one persisted pin is fresh and error-free.
    async fn probe_liveness(&self) -> ProbeReport;
}

/// Construct the store selected by the backend configuration.
///
/// `app_id` scopes rows/keys in multi-tenant backends; the signer is only
/// used by the filesystem backend, which persists signed manifests.
pub async fn new(
    config: BackendConfig,
    app_id: String,
    signer: Arc<Signer>,
) -> Result<Arc<dyn PinStore>, StorageError> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(MemoryStore::new(app_id))),
        BackendConfig::Filesystem { dump_dir } => {
            Ok(Arc::new(FilesystemStore::new(dump_dir, app_id, signer)?))
        }
        BackendConfig::Redis { dsn } => Ok(Arc::new(RedisStore::connect(&dsn, app_id).await?)),
        BackendConfig::Postgres { dsn, pool } => {
            Ok(Arc::new(PostgresStore::connect(&dsn, pool, app_id).await?))
        }
    }
}

/// Keep the earliest-expiring record per FQDN.
///
/// During rotation overlap a backend can hold several rows for the same
/// (file, fqdn); readers pick the conservative one.
pub(crate) fn pick_earliest(records: Vec<PinRecord>) -> Vec<PinRecord> {
    let mut best: HashMap<String, PinRecord> = HashMap::new();

    for record in records {
        match best.get(&record.fqdn) {
            Some(prev) if prev.expire <= record.expire => {}
            _ => {
                best.insert(record.fqdn.clone(), record);
            }
        }
    }

    best.into_values().collect()
}

/// Age of a probe date relative to `now`, if the record has one.
pub(crate) fn age_of(date: Option<&DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    date.map(|d| (now - *d).to_std().unwrap_or(Duration::ZERO))
}
