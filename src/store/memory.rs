use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{KeyedStore, RecordKind, StoreError, VersionedRecord, WriteOp};

/// An in-memory store for tests and local runs.
///
/// A single mutex makes every batch trivially atomic; the lock is never held
/// across an await point.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<(RecordKind, String), (i64, Value)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(RecordKind, String), (i64, Value)>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("store mutex poisoned")))
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<VersionedRecord>, StoreError> {
        let records = self.lock()?;
        Ok(records
            .get(&(kind, key.to_string()))
            .map(|(version, data)| VersionedRecord {
                key: key.to_string(),
                version: *version,
                data: data.clone(),
            }))
    }

    async fn list(
        &self,
        kind: RecordKind,
        key_prefix: &str,
    ) -> Result<Vec<VersionedRecord>, StoreError> {
        let records = self.lock()?;
        let mut found: Vec<VersionedRecord> = records
            .iter()
            .filter(|((k, key), _)| *k == kind && key.starts_with(key_prefix))
            .map(|((_, key), (version, data))| VersionedRecord {
                key: key.clone(),
                version: *version,
                data: data.clone(),
            })
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }

    async fn apply(&self, batch: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut records = self.lock()?;

        // Validate every condition before touching anything.
        for op in &batch {
            match op {
                WriteOp::Insert { kind, key, .. } => {
                    if records.contains_key(&(*kind, key.clone())) {
                        return Err(StoreError::AlreadyExists);
                    }
                }
                WriteOp::Update {
                    kind,
                    key,
                    expected_version,
                    ..
                } => match records.get(&(*kind, key.clone())) {
                    Some((version, _)) if version == expected_version => {}
                    _ => return Err(StoreError::VersionConflict),
                },
                WriteOp::Put { .. } | WriteOp::Delete { .. } => {}
            }
        }

        for op in batch {
            match op {
                WriteOp::Insert { kind, key, value } => {
                    records.insert((kind, key), (1, value));
                }
                WriteOp::Update {
                    kind,
                    key,
                    expected_version,
                    value,
                } => {
                    records.insert((kind, key), (expected_version + 1, value));
                }
                WriteOp::Put { kind, key, value } => {
                    let next = records
                        .get(&(kind, key.clone()))
                        .map(|(v, _)| v + 1)
                        .unwrap_or(1);
                    records.insert((kind, key), (next, value));
                }
                WriteOp::Delete { kind, key } => {
                    records.remove(&(kind, key));
                }
            }
        }
        Ok(())
    }
}
