//! Keyed record storage with optimistic concurrency.
//!
//! Every entity is an independent record addressed by `(kind, key)` and
//! carrying a version counter. Mutations go through [`KeyedStore::apply`],
//! which commits a batch of conditional writes atomically: either every
//! operation takes effect or none does. Insert uniqueness and versioned
//! updates are the only concurrency primitives the rest of the crate uses.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// The namespaces records live in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Personal referrals, keyed by owner ID.
    Referral,
    /// Organization referrals, keyed by `<organization_id>/<referral_id>`.
    OrgReferral,
    /// Player reward ledgers, keyed by player ID.
    Rewards,
    /// Join requests, keyed by `<organization_id>/<request_id>`.
    JoinRequest,
    /// Idempotency markers for applied ledger credits, keyed by event ID.
    ConsumedEvent,
    /// Player-to-organization links, keyed by player ID.
    PlayerLink,
    /// The shared code namespace, keyed by the code itself.
    CodeIndex,
    /// Pending join-request markers, keyed by `<organization_id>/<player_id>`.
    PendingPair,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Referral => "referral",
            RecordKind::OrgReferral => "org_referral",
            RecordKind::Rewards => "rewards",
            RecordKind::JoinRequest => "join_request",
            RecordKind::ConsumedEvent => "consumed_event",
            RecordKind::PlayerLink => "player_link",
            RecordKind::CodeIndex => "code_index",
            RecordKind::PendingPair => "pending_pair",
        }
    }
}

/// A stored record together with its version counter.
#[derive(Clone, Debug)]
pub struct VersionedRecord {
    /// The record key within its kind.
    pub key: String,
    /// The version, starting at 1 and bumped on every write.
    pub version: i64,
    /// The serialized record body.
    pub data: Value,
}

impl VersionedRecord {
    /// Deserializes the record body into a concrete entity.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
    }
}

/// Serializes an entity into a record body.
pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(anyhow::Error::new(e)))
}

/// A single conditional write inside an atomic batch.
#[derive(Clone, Debug)]
pub enum WriteOp {
    /// Creates a record; the batch fails with `AlreadyExists` if the key is
    /// taken. This is the uniqueness primitive for codes, pending-request
    /// pairs, and idempotency markers.
    Insert {
        kind: RecordKind,
        key: String,
        value: Value,
    },
    /// Replaces a record only if the stored version still matches; otherwise
    /// the batch fails with `VersionConflict`. This is the compare-and-swap
    /// primitive for counters and state transitions.
    Update {
        kind: RecordKind,
        key: String,
        expected_version: i64,
        value: Value,
    },
    /// Creates or unconditionally replaces a record.
    Put {
        kind: RecordKind,
        key: String,
        value: Value,
    },
    /// Removes a record if present.
    Delete { kind: RecordKind, key: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// An `Insert` hit an existing key; nothing in the batch was applied.
    #[error("record already exists")]
    AlreadyExists,
    /// An `Update` saw a stale version; nothing in the batch was applied.
    #[error("concurrent modification")]
    VersionConflict,
    /// The backend failed; the outcome of the batch is unknown.
    #[error("storage backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// A persistent keyed store with atomic conditional batches.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Fetches a single record.
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<VersionedRecord>, StoreError>;

    /// Lists records whose key starts with `key_prefix`, ordered by key.
    async fn list(
        &self,
        kind: RecordKind,
        key_prefix: &str,
    ) -> Result<Vec<VersionedRecord>, StoreError>;

    /// Applies a batch of conditional writes atomically.
    ///
    /// A batch must touch each `(kind, key)` at most once; conditions are
    /// evaluated against the state before the batch, so implementations may
    /// validate up front or apply sequentially.
    async fn apply(&self, batch: Vec<WriteOp>) -> Result<(), StoreError>;
}
