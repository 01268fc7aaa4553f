//! The storage-node RPC surface.

use std::fmt::{self, Display};

use bytes::Bytes;
use tessera_codec::Coprocessor;
use tessera_types::{EntityId, KeyValue, RegionId, ScanRange, VectorWithId};

use crate::error::Result;

/// Addresses one region of one table or index on the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreTarget {
    pub entity: EntityId,
    pub region: RegionId,
}

impl StoreTarget {
    pub fn new(entity: impl Into<EntityId>, region: RegionId) -> Self {
        Self {
            entity: entity.into(),
            region,
        }
    }
}

impl Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/region:{}", self.entity, self.region)
    }
}

/// Forward-ordered, lazily advancing scan results.
pub type KvIter = Box<dyn Iterator<Item = Result<KeyValue>> + Send>;

/// Raw key-value and vector operations against a storage node.
///
/// Keys are passed exactly as stored, region prefix included. Every call
/// blocks until the storage node answers.
pub trait StoreClient: Send + Sync {
    fn kv_get(&self, target: StoreTarget, key: &[u8]) -> Result<Option<Bytes>>;

    /// One entry per key, in input order.
    fn kv_batch_get(&self, target: StoreTarget, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>>;

    /// Unconditional write. Returns whether the node accepted it.
    fn kv_put(&self, target: StoreTarget, kv: KeyValue) -> Result<bool>;

    /// Writes only if the key is absent. Returns `false` on conflict.
    fn kv_put_if_absent(&self, target: StoreTarget, kv: KeyValue) -> Result<bool>;

    /// Writes only if the current value equals `expected`.
    fn kv_compare_and_set(&self, target: StoreTarget, kv: KeyValue, expected: &[u8])
    -> Result<bool>;

    /// Deletes each key. One entry per key: whether it existed.
    fn kv_batch_delete(&self, target: StoreTarget, keys: &[Bytes]) -> Result<Vec<bool>>;

    /// Deletes every key in the range and returns how many were removed.
    fn kv_delete_range(&self, target: StoreTarget, range: &ScanRange) -> Result<u64>;

    /// Scans a range, optionally filtering on the node with `coprocessor`.
    fn scan(
        &self,
        target: StoreTarget,
        range: ScanRange,
        coprocessor: Option<Coprocessor>,
    ) -> Result<KvIter>;

    /// Adds or replaces vectors by id.
    fn vector_add(&self, target: StoreTarget, vectors: Vec<VectorWithId>) -> Result<bool>;

    /// Deletes vectors by id. One entry per id: whether it existed.
    fn vector_delete(&self, target: StoreTarget, ids: &[i64]) -> Result<Vec<bool>>;

    fn vector_get(&self, target: StoreTarget, id: i64) -> Result<Option<VectorWithId>>;

    /// Moves the upper part of a region into a new region of the same
    /// entity.
    ///
    /// Every key-value of `from` whose payload sorts at or after
    /// `split_key` is re-keyed under `to`'s prefix, and every vector whose
    /// encoded id does is moved as is. Returns the number of entries moved.
    fn region_split(&self, from: StoreTarget, to: StoreTarget, split_key: &[u8]) -> Result<u64>;
}
