//! # Record store contract.
//!
//! [`RecordStore`] is the durable key-value persistence behind the supervisor: one JSON
//! document per worker id.
//!
//! ## Rules
//! - Every operation fails with [`StoreError::Unavailable`] before `open()` succeeded or
//!   after `close()`.
//! - `list()` returns records ordered by id.
//! - Documents that fail to decode are **skipped with a warning**, never fatal.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::records::WorkerRecord;

/// Durable persistence for [`WorkerRecord`]s.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Opens the store (acquires locks, prepares schema). Idempotent.
    async fn open(&self) -> Result<(), StoreError>;

    /// Closes the store and releases its lock. Idempotent.
    async fn close(&self) -> Result<(), StoreError>;

    /// Reads one record; corrupt documents read as absent.
    async fn get(&self, id: &str) -> Result<Option<WorkerRecord>, StoreError>;

    /// Inserts or replaces the record stored under `record.id`.
    async fn put(&self, record: &WorkerRecord) -> Result<(), StoreError>;

    /// Removes the record stored under `id` (no-op if absent).
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// All decodable records, ordered by id.
    async fn list(&self) -> Result<Vec<WorkerRecord>, StoreError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Decodes a stored document, logging and dropping anything that does not fit the schema.
pub(crate) fn decode_record(key: &str, body: &str) -> Option<WorkerRecord> {
    match serde_json::from_str::<WorkerRecord>(body) {
        Ok(record) if record.id == key => Some(record),
        Ok(record) => {
            tracing::warn!(key, record_id = %record.id, "skipping record stored under a foreign key");
            None
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "skipping record that failed schema validation");
            None
        }
    }
}

/// Encodes a record for storage.
pub(crate) fn encode_record(record: &WorkerRecord) -> Result<String, StoreError> {
    Ok(serde_json::to_string(record)?)
}
