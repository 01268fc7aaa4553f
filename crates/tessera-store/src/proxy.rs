//! Per-region facade over the storage layer.

use std::sync::Arc;

use bytes::Bytes;
use tessera_codec::prefix::{key_payload, prefix_end, reset_prefix, with_prefix};
use tessera_codec::{Coprocessor, KeyValueCodec};
use tessera_directory::Directory;
use tessera_types::{
    EntityId, IndexId, KeyValue, Region, ScanRange, TableDefinition, Value, VectorWithId,
};
use tracing::{debug, warn};

use crate::client::{KvIter, StoreClient, StoreTarget};
use crate::error::{Result, StoreError};
use crate::index::{IndexEntry, IndexMaintainer};

/// Serves row operations for one region of one table.
///
/// Callers pass keys and rows encoded with the table codec, whose keys
/// carry the table id as prefix. The proxy rewrites that prefix to the
/// region id on the way in and back to the table id on the way out, so
/// every key physically stored in a region starts with the region's id.
///
/// Index writes fan out sequentially, ordered by index id, with no
/// distributed transaction: a failure part way leaves earlier index
/// writes in place.
pub struct RegionStoreProxy {
    table: TableDefinition,
    region: Region,
    codec: Arc<dyn KeyValueCodec>,
    indexes: Vec<IndexMaintainer>,
    directory: Arc<dyn Directory>,
    store: Arc<dyn StoreClient>,
}

impl RegionStoreProxy {
    /// Builds a proxy. `indexes` must be ordered by index id.
    pub fn new(
        table: TableDefinition,
        region: Region,
        codec: Arc<dyn KeyValueCodec>,
        indexes: Vec<IndexMaintainer>,
        directory: Arc<dyn Directory>,
        store: Arc<dyn StoreClient>,
    ) -> Result<Self> {
        if region.owner != EntityId::Table(table.id) {
            return Err(StoreError::WrongRegion(region.id));
        }
        Ok(Self {
            table,
            region,
            codec,
            indexes,
            directory,
            store,
        })
    }

    pub fn table(&self) -> &TableDefinition {
        &self.table
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn codec(&self) -> &Arc<dyn KeyValueCodec> {
        &self.codec
    }

    pub fn indexes(&self) -> &[IndexMaintainer] {
        &self.indexes
    }

    fn target(&self) -> StoreTarget {
        StoreTarget::new(self.table.id, self.region.id)
    }

    /// Rewrites a table key to this region's physical key.
    fn localize(&self, key: &[u8]) -> Result<Bytes> {
        if !self.region.contains(key_payload(key)?) {
            return Err(StoreError::WrongRegion(self.region.id));
        }
        Ok(reset_prefix(key, self.region.id.as_u64())?)
    }

    fn localize_kv(&self, kv: KeyValue) -> Result<KeyValue> {
        Ok(KeyValue::new(self.localize(&kv.key)?, kv.value))
    }

    /// Rewrites scan bounds to physical keys. Empty bounds become the
    /// bounds of the region's prefix.
    fn localize_range(&self, range: &ScanRange) -> Result<ScanRange> {
        let id = self.region.id.as_u64();
        let (start, with_start) = if range.start.is_empty() {
            (with_prefix(id, &[]), true)
        } else {
            (reset_prefix(&range.start, id)?, range.with_start)
        };
        let (end, with_end) = if range.end.is_empty() {
            (prefix_end(id).unwrap_or_default(), false)
        } else {
            (reset_prefix(&range.end, id)?, range.with_end)
        };
        Ok(ScanRange::new(start, end, with_start, with_end))
    }

    // ========================================================================
    // Inserts
    // ========================================================================

    /// Writes an encoded row if its key is absent. Returns `false` on conflict.
    pub fn insert(&self, kv: KeyValue) -> Result<bool> {
        let kv = self.localize_kv(kv)?;
        self.store.kv_put_if_absent(self.target(), kv)
    }

    pub fn insert_row(&self, row: &[Value]) -> Result<bool> {
        let kv = self.codec.encode(row)?;
        self.insert(kv)
    }

    /// Computes every index entry for `row`, in index order.
    ///
    /// Runs entirely before any write so encoding failures touch nothing.
    fn index_entries(&self, row: &[Value], primary: &KeyValue) -> Result<Vec<IndexEntry>> {
        self.indexes
            .iter()
            .map(|index| index.entry(row, primary))
            .collect()
    }

    fn write_index_entries(&self, entries: Vec<IndexEntry>) -> Result<bool> {
        for (index, entry) in self.indexes.iter().zip(entries) {
            if !index.write(entry, self.directory.as_ref(), self.store.as_ref())? {
                warn!(
                    table_id = %self.table.id,
                    region_id = %self.region.id,
                    index = %index.definition().name,
                    "index write rejected, skipping remaining indexes"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Writes `row`'s entry to every index. Vector entries replace any
    /// previous vector with the same id.
    ///
    /// Returns `false` at the first rejected index write; later indexes
    /// are not written.
    pub fn insert_index(&self, row: &[Value]) -> Result<bool> {
        let primary = self.codec.encode(row)?;
        let entries = self.index_entries(row, &primary)?;
        self.write_index_entries(entries)
    }

    /// Writes the primary row if absent, then its index entries.
    ///
    /// A primary conflict returns `false` before any index is touched.
    /// Otherwise returns `false` at the first rejected index write; index
    /// entries already written are not rolled back.
    pub fn insert_with_index(&self, row: &[Value]) -> Result<bool> {
        let primary = self.codec.encode(row)?;
        let entries = self.index_entries(row, &primary)?;
        let local = self.localize_kv(primary)?;
        if !self.store.kv_put_if_absent(self.target(), local)? {
            debug!(region_id = %self.region.id, "primary key exists, indexes untouched");
            return Ok(false);
        }
        self.write_index_entries(entries)
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Replaces `old` with `new` if the stored value still equals `old`'s.
    ///
    /// Both must share a key; an update never moves a row.
    pub fn update(&self, new: KeyValue, old: KeyValue) -> Result<bool> {
        if new.key != old.key {
            return Err(StoreError::InvalidArgument(
                "update cannot change the primary key".to_string(),
            ));
        }
        let expected = old.value;
        let kv = self.localize_kv(new)?;
        self.store.kv_compare_and_set(self.target(), kv, &expected)
    }

    pub fn update_row(&self, new: &[Value], old: &[Value]) -> Result<bool> {
        let new = self.codec.encode(new)?;
        let old = self.codec.encode(old)?;
        self.update(new, old)
    }

    /// Deletes the index entries of `old` whose key differs in `new` and
    /// returns how many were present.
    ///
    /// A vector entry whose id is unchanged is left for the upsert in
    /// [`insert_index`](Self::insert_index) to replace.
    pub fn delete_stale_index(&self, new: &[Value], old: &[Value]) -> Result<usize> {
        let mut stale = Vec::new();
        for index in &self.indexes {
            if index.key_changed(new, old)? {
                stale.push(index);
            }
        }
        let mut removed = 0;
        for index in stale {
            let present = index.delete(old, self.directory.as_ref(), self.store.as_ref())?;
            removed += usize::from(present);
        }
        Ok(removed)
    }

    /// Compare-and-set the row, then repair its index entries.
    pub fn update_with_index(&self, new: &[Value], old: &[Value]) -> Result<bool> {
        if !self.update_row(new, old)? {
            return Ok(false);
        }
        self.delete_stale_index(new, old)?;
        self.insert_index(new)
    }

    // ========================================================================
    // Deletes
    // ========================================================================

    /// Deletes an encoded key. Returns whether it existed.
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        let key = self.localize(key)?;
        let deleted = self.store.kv_batch_delete(self.target(), &[key])?;
        Ok(deleted.first().copied().unwrap_or(false))
    }

    /// Deletes the row with the given primary key values, in key order.
    pub fn delete_row(&self, key_columns: &[Value]) -> Result<bool> {
        if key_columns.len() != self.codec.key_columns().len() {
            return Err(StoreError::InvalidArgument(format!(
                "expected {} key columns, got {}",
                self.codec.key_columns().len(),
                key_columns.len()
            )));
        }
        let key = self.codec.encode_key_prefix(key_columns)?;
        self.delete(&key)
    }

    /// Deletes every row in `range`. Returns the number removed.
    pub fn delete_range(&self, range: &ScanRange) -> Result<u64> {
        let range = self.localize_range(range)?;
        let removed = self.store.kv_delete_range(self.target(), &range)?;
        debug!(region_id = %self.region.id, removed, "range deleted");
        Ok(removed)
    }

    /// Removes `row`'s entry from every index and returns how many were
    /// present.
    ///
    /// A missing entry is skipped; the first error aborts the remaining
    /// deletes.
    pub fn delete_index(&self, row: &[Value]) -> Result<usize> {
        let mut removed = 0;
        for index in &self.indexes {
            let present = index.delete(row, self.directory.as_ref(), self.store.as_ref())?;
            removed += usize::from(present);
        }
        Ok(removed)
    }

    /// Removes `row`'s index entries, then the row itself.
    pub fn delete_with_index(&self, row: &[Value]) -> Result<bool> {
        let key = self.codec.encode_key(row)?;
        self.delete_index(row)?;
        self.delete(&key)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let key = self.localize(key)?;
        self.store.kv_get(self.target(), &key)
    }

    /// Looks up a row by its primary key values and decodes it.
    pub fn get_row(&self, key_columns: &[Value]) -> Result<Option<Vec<Value>>> {
        let key = self.codec.encode_key_prefix(key_columns)?;
        match self.get(&key)? {
            Some(value) => Ok(Some(self.codec.decode(&KeyValue::new(key, value))?)),
            None => Ok(None),
        }
    }

    /// One entry per key, in input order.
    pub fn get_batch(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>> {
        let keys = keys
            .iter()
            .map(|k| self.localize(k))
            .collect::<Result<Vec<_>>>()?;
        self.store.kv_batch_get(self.target(), &keys)
    }

    /// Lazily scans `range`. Returned keys carry the table prefix.
    pub fn scan(&self, range: &ScanRange) -> Result<KvIter> {
        self.scan_inner(range, None)
    }

    /// Scans `range`, filtering rows on the storage node.
    pub fn scan_with(&self, range: &ScanRange, coprocessor: Coprocessor) -> Result<KvIter> {
        self.scan_inner(range, Some(coprocessor))
    }

    fn scan_inner(&self, range: &ScanRange, coprocessor: Option<Coprocessor>) -> Result<KvIter> {
        let local = self.localize_range(range)?;
        let table = self.table.id.as_u64();
        let rows = self.store.scan(self.target(), local, coprocessor)?;
        Ok(Box::new(rows.map(move |kv| {
            let kv = kv?;
            Ok(KeyValue::new(reset_prefix(&kv.key, table)?, kv.value))
        })))
    }

    /// Counts rows in `range` by exhausting a scan.
    // TODO: push the count down to the storage node once StoreClient grows a count call.
    pub fn count(&self, range: &ScanRange) -> Result<u64> {
        let mut count = 0u64;
        for kv in self.scan(range)? {
            kv?;
            count += 1;
        }
        Ok(count)
    }

    // ========================================================================
    // Index reads
    // ========================================================================

    fn index_named(&self, name: &str) -> Result<&IndexMaintainer> {
        self.indexes
            .iter()
            .find(|i| i.definition().name == name)
            .ok_or_else(|| StoreError::InvalidArgument(format!("no index named {name}")))
    }

    /// Primary keys of rows whose leading columns in index `name` equal
    /// `values`.
    pub fn index_lookup(&self, name: &str, values: &[Value]) -> Result<Vec<Vec<Value>>> {
        self.index_named(name)?
            .lookup(values, self.directory.as_ref(), self.store.as_ref())
    }

    /// Fetches a vector by id from vector index `index`.
    pub fn vector_get(&self, index: IndexId, id: i64) -> Result<Option<VectorWithId>> {
        let entity = EntityId::Index(index);
        let payload = tessera_codec::key_encoder::encode_bigint(id);
        let region = self.directory.region_for_key(entity, &payload)?;
        self.store.vector_get(StoreTarget::new(entity, region.id), id)
    }
}

impl std::fmt::Debug for RegionStoreProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionStoreProxy")
            .field("table", &self.table.id)
            .field("region", &self.region.id)
            .field("indexes", &self.indexes.len())
            .finish_non_exhaustive()
    }
}
