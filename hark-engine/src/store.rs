//! Key/value table accessor for handler bodies.
//!
//! The engine never reads or writes tables itself; it only hands a
//! [`TableStore`] to handlers. Durability belongs to the implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to (de)serialize {table}/{key}: {source}")]
    Serialization {
        table: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("table store backend failed: {0}")]
    Backend(String),
}

/// Storage backend for named tables of JSON records.
///
/// # Example
///
/// ```rust
/// use hark_engine::store::{StoreError, TableStore};
/// use serde_json::Value;
///
/// struct Remote;
///
/// impl TableStore for Remote {
///     fn get(&self, _table: &str, _key: &str) -> Result<Option<Value>, StoreError> {
///         Ok(None)
///     }
///     fn set(&self, _table: &str, _key: &str, _value: Value) -> Result<(), StoreError> {
///         Err(StoreError::Backend("offline".into()))
///     }
///     fn remove(&self, _table: &str, _key: &str) -> Result<Option<Value>, StoreError> {
///         Ok(None)
///     }
///     fn keys(&self, _table: &str) -> Result<Vec<String>, StoreError> {
///         Ok(Vec::new())
///     }
/// }
/// ```
pub trait TableStore: Send + Sync {
    fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&self, table: &str, key: &str, value: Value) -> Result<(), StoreError>;

    fn remove(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError>;

    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError>;

    /// Read-modify-write one record. Not atomic unless the backend overrides it.
    fn modify(
        &self,
        table: &str,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Value,
    ) -> Result<Value, StoreError> {
        let value = f(self.get(table, key)?);
        self.set(table, key, value.clone())?;
        Ok(value)
    }
}

/// Handle on one named table.
#[derive(Clone)]
pub struct Table {
    store: Arc<dyn TableStore>,
    name: String,
}

impl Table {
    pub fn new(store: Arc<dyn TableStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.store.get(&self.name, key)
    }

    /// Typed read
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| self.serialization(key, source)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| self.serialization(key, source))?;
        self.store.set(&self.name, key, value)
    }

    pub fn modify<F>(&self, key: &str, mut f: F) -> Result<Value, StoreError>
    where
        F: FnMut(Option<Value>) -> Value,
    {
        self.store.modify(&self.name, key, &mut f)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.store.remove(&self.name, key)
    }

    pub fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.store.keys(&self.name)
    }

    fn serialization(&self, key: &str, source: serde_json::Error) -> StoreError {
        StoreError::Serialization {
            table: self.name.clone(),
            key: key.to_string(),
            source,
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table").field("name", &self.name).finish()
    }
}

// ============================================================================
// In-Memory Table Store
// ============================================================================

/// In-memory store for tests or bots without persistence
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records across all tables
    pub fn len(&self) -> usize {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TableStore for MemoryTableStore {
    fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get(table).and_then(|t| t.get(key)).cloned())
    }

    fn set(&self, table: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.get_mut(table).and_then(|t| t.remove(key)))
    }

    fn keys(&self, table: &str) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .get(table)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn modify(
        &self,
        table: &str,
        key: &str,
        f: &mut dyn FnMut(Option<Value>) -> Value,
    ) -> Result<Value, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let records = tables.entry(table.to_string()).or_default();
        let value = f(records.remove(key));
        records.insert(key.to_string(), value.clone());
        Ok(value)
    }
}

impl fmt::Debug for MemoryTableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTableStore")
            .field("records", &self.len())
            .finish()
    }
}
