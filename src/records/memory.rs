//! In-memory [`RecordStore`] for tests and ephemeral supervisors.
//!
//! Documents are kept as JSON strings so corrupt entries can be seeded with
//! [`MemoryStore::insert_raw`] and exercise the same decoding path as the SQLite store.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::records::store::{decode_record, encode_record};
use crate::records::{RecordStore, WorkerRecord};

/// Non-durable store keyed by worker id.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, String>>,
    open: AtomicBool,
}

impl MemoryStore {
    /// Empty, closed store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records` (still closed).
    pub fn with_records(records: impl IntoIterator<Item = WorkerRecord>) -> Result<Self, StoreError> {
        let store = Self::new();
        {
            let mut docs = store.docs.write();
            for record in records {
                docs.insert(record.id.clone(), encode_record(&record)?);
            }
        }
        Ok(store)
    }

    /// Stores an arbitrary document under `id`, bypassing encoding.
    pub fn insert_raw(&self, id: impl Into<String>, body: impl Into<String>) {
        self.docs.write().insert(id.into(), body.into());
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::unavailable("store is not open"))
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn open(&self) -> Result<(), StoreError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkerRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self.docs.read().get(id).and_then(|body| decode_record(id, body)))
    }

    async fn put(&self, record: &WorkerRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        let body = encode_record(record)?;
        self.docs.write().insert(record.id.clone(), body);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.docs.write().remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkerRecord>, StoreError> {
        self.ensure_open()?;
        Ok(self
            .docs
            .read()
            .iter()
            .filter_map(|(id, body)| decode_record(id, body))
            .collect())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
