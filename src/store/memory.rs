use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::core::{CoreError, Result};
use crate::store::{EnumId, Store, TxnId, TxnMode};

pub const IMAGE_FORMAT_VERSION: u32 = 1;

/// One enumeration row inside a class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumRow {
    pub id: EnumId,
    pub value: String,
}

/// Serializable image of the committed store state
///
/// Written as pretty JSON next to a `.tmp` sibling and renamed into
/// place, so a crash mid-save never corrupts the previous image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreImage {
    pub format_version: u32,
    pub saved_at: String,
    pub next_enum_id: i64,
    pub config: HashMap<String, String>,
    pub enums: HashMap<String, Vec<EnumRow>>,
}

impl StoreImage {
    pub fn empty() -> Self {
        Self {
            format_version: IMAGE_FORMAT_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            next_enum_id: 1,
            config: HashMap::new(),
            enums: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CommittedState {
    config: HashMap<String, String>,
    enums: HashMap<String, Vec<EnumRow>>,
}

impl CommittedState {
    fn enum_id(&self, class: &str, value: &str) -> Option<EnumId> {
        self.enums
            .get(class)
            .and_then(|rows| rows.iter().find(|row| row.value == value))
            .map(|row| row.id)
    }
}

#[derive(Debug, Clone)]
struct StagedEnum {
    class: String,
    value: String,
    id: EnumId,
}

#[derive(Debug, Default)]
struct StagedWrites {
    config: HashMap<String, String>,
    enums: Vec<StagedEnum>,
}

#[derive(Debug)]
struct TxnState {
    mode: TxnMode,
    staged: StagedWrites,
}

/// Current size and traffic counters for a [`MemStore`]
#[derive(Debug, Clone)]
pub struct MemStoreStats {
    pub config_entries: usize,
    pub enum_classes: usize,
    pub enum_values: usize,
    pub open_txns: usize,
    pub committed_txns: u64,
    pub rolled_back_txns: u64,
}

impl std::fmt::Display for MemStoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemStore: {} config entries, {} enum values in {} classes, {} open txns ({} committed, {} rolled back)",
            self.config_entries,
            self.enum_values,
            self.enum_classes,
            self.open_txns,
            self.committed_txns,
            self.rolled_back_txns
        )
    }
}

/// In-memory implementation of [`Store`]
///
/// Writes are staged per transaction and become visible at commit.
/// A store created read-only rejects `begin(ReadWrite)`, which drives
/// the boot-time read-only probe.
#[derive(Debug)]
pub struct MemStore {
    committed: RwLock<CommittedState>,
    txns: Mutex<HashMap<u64, TxnState>>,
    next_txn: AtomicU64,
    next_enum_id: AtomicI64,
    /// Canonical id per (class, value) handed out by insert, shared
    /// across transactions so racing inserts of the same value agree
    /// on one id before either commits. Whichever commit lands first
    /// writes the row every caller holds.
    enum_reservations: Mutex<HashMap<(String, String), EnumId>>,
    read_only: bool,
    committed_txns: AtomicU64,
    rolled_back_txns: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::build(StoreImage::empty(), false)
    }

    /// A store that refuses read-write transactions
    pub fn read_only() -> Self {
        Self::build(StoreImage::empty(), true)
    }

    pub fn from_image(image: StoreImage) -> Result<Self> {
        Self::check_format(&image)?;
        Ok(Self::build(image, false))
    }

    pub fn from_image_read_only(image: StoreImage) -> Result<Self> {
        Self::check_format(&image)?;
        Ok(Self::build(image, true))
    }

    fn check_format(image: &StoreImage) -> Result<()> {
        if image.format_version != IMAGE_FORMAT_VERSION {
            return Err(CoreError::Store(format!(
                "unsupported image format version {} (expected {})",
                image.format_version, IMAGE_FORMAT_VERSION
            )));
        }
        Ok(())
    }

    fn build(image: StoreImage, read_only: bool) -> Self {
        Self {
            committed: RwLock::new(CommittedState {
                config: image.config,
                enums: image.enums,
            }),
            txns: Mutex::new(HashMap::new()),
            next_txn: AtomicU64::new(1),
            next_enum_id: AtomicI64::new(image.next_enum_id),
            enum_reservations: Mutex::new(HashMap::new()),
            read_only,
            committed_txns: AtomicU64::new(0),
            rolled_back_txns: AtomicU64::new(0),
        }
    }

    /// Load an image file written by [`MemStore::save`]
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .await
            .map_err(|err| CoreError::IoError(err.to_string()))?;

        let image = serde_json::from_slice::<StoreImage>(&bytes)
            .map_err(|err| CoreError::Store(format!("parse store image: {err}")))?;

        debug!(
            "loaded store image from {} ({} config entries)",
            path.display(),
            image.config.len()
        );
        Self::from_image(image)
    }

    /// Export the committed state as a serializable image
    pub async fn image(&self) -> StoreImage {
        let committed = self.committed.read().await;
        StoreImage {
            format_version: IMAGE_FORMAT_VERSION,
            saved_at: Utc::now().to_rfc3339(),
            next_enum_id: self.next_enum_id.load(Ordering::SeqCst),
            config: committed.config.clone(),
            enums: committed.enums.clone(),
        }
    }

    /// Write the committed state to a temporary file and atomically
    /// rename it over the target path
    pub async fn save(&self, path: &Path) -> Result<()> {
        let image = self.image().await;
        let tmp_path = path.with_extension("tmp");

        let json = serde_json::to_vec_pretty(&image)
            .map_err(|err| CoreError::Store(format!("serialize store image: {err}")))?;

        fs::write(&tmp_path, json)
            .await
            .map_err(|err| CoreError::IoError(err.to_string()))?;

        fs::rename(&tmp_path, path)
            .await
            .map_err(|err| CoreError::IoError(err.to_string()))?;

        debug!("saved store image to {}", path.display());
        Ok(())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub async fn stats(&self) -> MemStoreStats {
        let committed = self.committed.read().await;
        let txns = self.txns.lock().await;
        MemStoreStats {
            config_entries: committed.config.len(),
            enum_classes: committed.enums.len(),
            enum_values: committed.enums.values().map(Vec::len).sum(),
            open_txns: txns.len(),
            committed_txns: self.committed_txns.load(Ordering::Relaxed),
            rolled_back_txns: self.rolled_back_txns.load(Ordering::Relaxed),
        }
    }

    async fn writable_txn(&self, txn: TxnId) -> Result<()> {
        let txns = self.txns.lock().await;
        let state = txns
            .get(&txn.0)
            .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?;
        if state.mode != TxnMode::ReadWrite {
            return Err(CoreError::Store(format!(
                "write attempted in read-only transaction {txn}"
            )));
        }
        Ok(())
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Store for MemStore {
    async fn begin(&self, mode: TxnMode) -> Result<TxnId> {
        if self.read_only && mode == TxnMode::ReadWrite {
            return Err(CoreError::Store(
                "store is read-only, cannot begin a read-write transaction".to_string(),
            ));
        }

        let id = self.next_txn.fetch_add(1, Ordering::SeqCst);
        let mut txns = self.txns.lock().await;
        txns.insert(
            id,
            TxnState {
                mode,
                staged: StagedWrites::default(),
            },
        );
        Ok(TxnId(id))
    }

    async fn commit(&self, txn: TxnId) -> Result<()> {
        let state = {
            let mut txns = self.txns.lock().await;
            txns.remove(&txn.0)
                .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?
        };

        if state.mode == TxnMode::ReadWrite {
            let mut committed = self.committed.write().await;
            for (key, value) in state.staged.config {
                committed.config.insert(key, value);
            }
            for staged in state.staged.enums {
                // a transaction that raced on this value reserved the
                // same id, so the row is already in place and the
                // duplicate can be skipped
                if committed.enum_id(&staged.class, &staged.value).is_none() {
                    committed.enums.entry(staged.class).or_default().push(EnumRow {
                        id: staged.id,
                        value: staged.value,
                    });
                }
            }
        }

        self.committed_txns.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&self, txn: TxnId) -> Result<()> {
        let mut txns = self.txns.lock().await;
        txns.remove(&txn.0)
            .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?;
        self.rolled_back_txns.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn config_value(&self, txn: TxnId, key: &str) -> Result<Option<String>> {
        {
            let txns = self.txns.lock().await;
            let state = txns
                .get(&txn.0)
                .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?;
            if let Some(value) = state.staged.config.get(key) {
                return Ok(Some(value.clone()));
            }
        }

        let committed = self.committed.read().await;
        Ok(committed.config.get(key).cloned())
    }

    async fn update_or_insert_config_value(
        &self,
        txn: TxnId,
        key: &str,
        value: &str,
    ) -> Result<()> {
        self.writable_txn(txn).await?;

        let mut txns = self.txns.lock().await;
        let state = txns
            .get_mut(&txn.0)
            .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?;
        state
            .staged
            .config
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn enum_id(&self, txn: TxnId, class: &str, value: &str) -> Result<Option<EnumId>> {
        {
            let txns = self.txns.lock().await;
            let state = txns
                .get(&txn.0)
                .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?;
            if let Some(staged) = state
                .staged
                .enums
                .iter()
                .find(|staged| staged.class == class && staged.value == value)
            {
                return Ok(Some(staged.id));
            }
        }

        let committed = self.committed.read().await;
        Ok(committed.enum_id(class, value))
    }

    async fn insert_enum(&self, txn: TxnId, class: &str, value: &str) -> Result<EnumId> {
        self.writable_txn(txn).await?;

        // a value this transaction can already see resolves to the
        // existing id instead of duplicating the row
        if let Some(id) = self.enum_id(txn, class, value).await? {
            return Ok(id);
        }

        // concurrent inserts of the same value must agree on the id
        // before either commits, so the id comes from a reservation
        // shared across transactions
        let id = {
            let mut reservations = self.enum_reservations.lock().await;
            *reservations
                .entry((class.to_string(), value.to_string()))
                .or_insert_with(|| EnumId(self.next_enum_id.fetch_add(1, Ordering::SeqCst)))
        };

        let mut txns = self.txns.lock().await;
        let state = txns
            .get_mut(&txn.0)
            .ok_or_else(|| CoreError::Store(format!("unknown transaction {txn}")))?;
        state.staged.enums.push(StagedEnum {
            class: class.to_string(),
            value: value.to_string(),
            id,
        });
        Ok(id)
    }
}
