//! Persisted session state
//!
//! One versioned JSON record per vehicle survives process restarts. The
//! backend is pluggable; every read-modify-write against the record goes
//! through [`SharedStore`], which serializes the independent timer paths.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{VlinkError, VlinkResult};

/// Current record schema version.
pub const RECORD_VERSION: u32 = 2;

pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 135;
pub const DEFAULT_ENGINE_RUN_TIME_MINUTES: u16 = 15;

/// Durable per-vehicle session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: u32,
    pub access_token: String,
    pub refresh_token: String,
    pub poll_interval_seconds: u64,
    pub engine_run_time_minutes: u16,
    pub api_call_count: u64,
}

impl SessionRecord {
    /// Fresh current-version record from a token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            version: RECORD_VERSION,
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            engine_run_time_minutes: DEFAULT_ENGINE_RUN_TIME_MINUTES,
            api_call_count: 0,
        }
    }
}

/// Storage errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("record version {found} is newer than supported version {supported}")]
    FutureVersion { found: u32, supported: u32 },
}

/// Bring a raw persisted document forward to the current schema.
///
/// Records already at the current version pass through unchanged. Fields
/// introduced by later schema versions are filled with their defaults. A
/// record written by a newer release is refused so the caller can abort
/// setup without touching it.
pub fn migrate(raw: Value) -> Result<SessionRecord, StoreError> {
    let version = raw.get("version").and_then(Value::as_u64).unwrap_or(1) as u32;
    if version > RECORD_VERSION {
        return Err(StoreError::FutureVersion {
            found: version,
            supported: RECORD_VERSION,
        });
    }

    let mut document = match raw {
        Value::Object(map) => map,
        _ => return Err(StoreError::Serialization("record is not a JSON object".into())),
    };

    if version < 2 {
        document
            .entry("poll_interval_seconds")
            .or_insert_with(|| DEFAULT_POLL_INTERVAL_SECONDS.into());
        document
            .entry("engine_run_time_minutes")
            .or_insert_with(|| DEFAULT_ENGINE_RUN_TIME_MINUTES.into());
        document
            .entry("api_call_count")
            .or_insert_with(|| 0u64.into());
    }
    document.insert("version".to_string(), RECORD_VERSION.into());

    serde_json::from_value(Value::Object(document))
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Storage backend for the session record.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the record, migrated to the current schema.
    async fn load(&self) -> Result<Option<SessionRecord>, StoreError>;

    /// Persist the record.
    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError>;

    /// Delete the record, if present.
    async fn remove(&self) -> Result<(), StoreError>;
}

/// File-based session store, one JSON document per vehicle.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default per-vehicle location under the user data directory.
    pub fn for_vin(vin: &str) -> Result<Self, StoreError> {
        let base = dirs::data_dir()
            .ok_or_else(|| StoreError::Io("cannot determine data directory".into()))?;
        Ok(Self::new(base.join("vlink").join(format!("{vin}.json"))))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let text = fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let raw: Value =
            serde_json::from_str(&text).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let record = migrate(raw)?;

        debug!("loaded session record from {:?}", self.path);
        Ok(Some(record))
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(&self.path, json)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        debug!("saved session record to {:?}", self.path);
        Ok(())
    }

    async fn remove(&self) -> Result<(), StoreError> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
            info!("deleted session record at {:?}", self.path);
        }
        Ok(())
    }
}

/// In-memory session store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySessionStore {
    record: RwLock<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), StoreError> {
        *self.record.write().await = Some(record.clone());
        Ok(())
    }

    async fn remove(&self) -> Result<(), StoreError> {
        *self.record.write().await = None;
        Ok(())
    }
}

/// Serializes every access to the persisted record.
///
/// The token-refresh and quota schedules run independently; the guard keeps
/// one timer's load from interleaving with another timer's save.
pub struct SharedStore {
    backend: Box<dyn SessionStore>,
    guard: Mutex<()>,
}

impl SharedStore {
    pub fn new(backend: Box<dyn SessionStore>) -> Self {
        Self {
            backend,
            guard: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> VlinkResult<Option<SessionRecord>> {
        let _guard = self.guard.lock().await;
        Ok(self.backend.load().await?)
    }

    pub async fn save(&self, record: &SessionRecord) -> VlinkResult<()> {
        let _guard = self.guard.lock().await;
        Ok(self.backend.save(record).await?)
    }

    pub async fn remove(&self) -> VlinkResult<()> {
        let _guard = self.guard.lock().await;
        Ok(self.backend.remove().await?)
    }

    /// Load, apply `apply`, save; the whole sequence holds the guard.
    /// The record must already exist.
    pub async fn update<F>(&self, apply: F) -> VlinkResult<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _guard = self.guard.lock().await;
        let mut record = self
            .backend
            .load()
            .await?
            .ok_or(VlinkError::StorageMissing)?;
        apply(&mut record);
        self.backend.save(&record).await?;
        Ok(record)
    }

    /// Persist a rotated token pair.
    pub async fn save_tokens(&self, access_token: &str, refresh_token: &str) -> VlinkResult<()> {
        self.update(|record| {
            record.access_token = access_token.to_string();
            record.refresh_token = refresh_token.to_string();
        })
        .await
        .map(drop)
    }

    /// Add to the persisted API call counter; returns the new total.
    pub async fn add_api_calls(&self, count: u64) -> VlinkResult<u64> {
        let record = self
            .update(|record| record.api_call_count += count)
            .await?;
        Ok(record.api_call_count)
    }

    /// Zero the persisted API call counter.
    pub async fn reset_api_calls(&self) -> VlinkResult<()> {
        self.update(|record| record.api_call_count = 0).await.map(drop)
    }
}
