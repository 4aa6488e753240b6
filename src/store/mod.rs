pub mod memory;

pub use memory::{MemStore, MemStoreStats, StoreImage};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::Result;

/// Transaction mode requested when a unit of work begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnMode {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxnMode::ReadOnly => write!(f, "read-only"),
            TxnMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Opaque handle for an open transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId(pub u64);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Identifier assigned to an enumeration row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumId(pub i64);

impl fmt::Display for EnumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Narrow transactional contract the executor runs against
///
/// Deliberately small: begin/commit/rollback plus the configuration and
/// enumeration tables the startup machinery needs. Opening a read-write
/// transaction against a read-only backend fails at `begin`, which is
/// what the boot probe relies on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self, mode: TxnMode) -> Result<TxnId>;

    async fn commit(&self, txn: TxnId) -> Result<()>;

    async fn rollback(&self, txn: TxnId) -> Result<()>;

    /// Read a configuration value, `None` when the key is absent
    async fn config_value(&self, txn: TxnId, key: &str) -> Result<Option<String>>;

    /// Upsert a configuration value
    async fn update_or_insert_config_value(&self, txn: TxnId, key: &str, value: &str)
    -> Result<()>;

    /// Look up an enumeration row by class and value, `None` when absent
    async fn enum_id(&self, txn: TxnId, class: &str, value: &str) -> Result<Option<EnumId>>;

    /// Insert an enumeration row and return its id
    ///
    /// Inserting a value that already exists, or that a concurrent
    /// transaction is inserting, resolves to the one id every caller
    /// holds. An id returned from a committed transaction always has a
    /// row behind it.
    async fn insert_enum(&self, txn: TxnId, class: &str, value: &str) -> Result<EnumId>;
}
