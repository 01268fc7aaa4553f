//! In-memory storage node.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tessera_codec::Coprocessor;
use tessera_codec::key_encoder::encode_bigint;
use tessera_codec::prefix::{prefix_end, reset_prefix, with_prefix};
use tessera_config::StoreConfig;
use tessera_types::{KeyValue, ScanRange, VectorWithId};

use crate::client::{KvIter, StoreClient, StoreTarget};
use crate::error::{Result, StoreError};

#[derive(Debug, Default)]
struct Partition {
    kv: RwLock<BTreeMap<Bytes, Bytes>>,
    vectors: RwLock<BTreeMap<i64, VectorWithId>>,
}

/// A [`StoreClient`] backed by ordered maps, one per [`StoreTarget`].
///
/// Scans hold no lock between batches: each batch re-reads the map after
/// the last key returned, so concurrent writes may or may not be observed.
#[derive(Debug)]
pub struct MemoryStore {
    partitions: RwLock<HashMap<StoreTarget, Arc<Partition>>>,
    scan_batch_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(&StoreConfig::default())
    }

    pub fn with_config(config: &StoreConfig) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            scan_batch_size: config.scan_batch_size.max(1),
        }
    }

    /// Number of key-value entries stored for `target`.
    pub fn key_count(&self, target: StoreTarget) -> usize {
        self.existing(target).map_or(0, |p| p.kv.read().len())
    }

    /// All entries of `target` in key order.
    pub fn entries(&self, target: StoreTarget) -> Vec<KeyValue> {
        self.existing(target).map_or_else(Vec::new, |p| {
            p.kv.read()
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                .collect()
        })
    }

    fn existing(&self, target: StoreTarget) -> Option<Arc<Partition>> {
        self.partitions.read().get(&target).cloned()
    }

    fn partition(&self, target: StoreTarget) -> Arc<Partition> {
        if let Some(p) = self.existing(target) {
            return p;
        }
        Arc::clone(self.partitions.write().entry(target).or_default())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn scan_bounds(range: &ScanRange) -> (Bound<Bytes>, Bound<Bytes>) {
    let lower = if range.with_start {
        Bound::Included(range.start.clone())
    } else {
        Bound::Excluded(range.start.clone())
    };
    let upper = if range.end.is_empty() {
        Bound::Unbounded
    } else if range.with_end {
        Bound::Included(range.end.clone())
    } else {
        Bound::Excluded(range.end.clone())
    };
    (lower, upper)
}

/// True when no key can satisfy both bounds.
fn bounds_empty(lower: &Bound<Bytes>, upper: &Bound<Bytes>) -> bool {
    match (lower, upper) {
        (
            Bound::Included(a) | Bound::Excluded(a),
            Bound::Included(b) | Bound::Excluded(b),
        ) => {
            a > b
                || (a == b
                    && !(matches!(lower, Bound::Included(_))
                        && matches!(upper, Bound::Included(_))))
        }
        _ => false,
    }
}

impl StoreClient for MemoryStore {
    fn kv_get(&self, target: StoreTarget, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self
            .existing(target)
            .and_then(|p| p.kv.read().get(key).cloned()))
    }

    fn kv_batch_get(&self, target: StoreTarget, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>> {
        let Some(partition) = self.existing(target) else {
            return Ok(vec![None; keys.len()]);
        };
        let kv = partition.kv.read();
        Ok(keys.iter().map(|k| kv.get(k).cloned()).collect())
    }

    fn kv_put(&self, target: StoreTarget, kv: KeyValue) -> Result<bool> {
        self.partition(target).kv.write().insert(kv.key, kv.value);
        Ok(true)
    }

    fn kv_put_if_absent(&self, target: StoreTarget, kv: KeyValue) -> Result<bool> {
        let partition = self.partition(target);
        let mut map = partition.kv.write();
        if map.contains_key(&kv.key) {
            return Ok(false);
        }
        map.insert(kv.key, kv.value);
        Ok(true)
    }

    fn kv_compare_and_set(
        &self,
        target: StoreTarget,
        kv: KeyValue,
        expected: &[u8],
    ) -> Result<bool> {
        let partition = self.partition(target);
        let mut map = partition.kv.write();
        match map.get_mut(&kv.key) {
            Some(current) if current.as_ref() == expected => {
                *current = kv.value;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn kv_batch_delete(&self, target: StoreTarget, keys: &[Bytes]) -> Result<Vec<bool>> {
        let Some(partition) = self.existing(target) else {
            return Ok(vec![false; keys.len()]);
        };
        let mut map = partition.kv.write();
        Ok(keys.iter().map(|k| map.remove(k).is_some()).collect())
    }

    fn kv_delete_range(&self, target: StoreTarget, range: &ScanRange) -> Result<u64> {
        let Some(partition) = self.existing(target) else {
            return Ok(0);
        };
        let (lower, upper) = scan_bounds(range);
        if bounds_empty(&lower, &upper) {
            return Ok(0);
        }
        let mut map = partition.kv.write();
        let doomed: Vec<Bytes> = map.range((lower, upper)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            map.remove(key);
        }
        Ok(doomed.len() as u64)
    }

    fn scan(
        &self,
        target: StoreTarget,
        range: ScanRange,
        coprocessor: Option<Coprocessor>,
    ) -> Result<KvIter> {
        let (lower, upper) = scan_bounds(&range);
        let remaining = coprocessor.as_ref().and_then(|c| c.limit);
        Ok(Box::new(ScanCursor {
            partition: self.partition(target),
            lower,
            upper,
            batch_size: self.scan_batch_size,
            buffer: VecDeque::new(),
            coprocessor,
            remaining,
            exhausted: false,
        }))
    }

    fn vector_add(&self, target: StoreTarget, vectors: Vec<VectorWithId>) -> Result<bool> {
        let partition = self.partition(target);
        let mut map = partition.vectors.write();
        for vector in vectors {
            map.insert(vector.id, vector);
        }
        Ok(true)
    }

    fn vector_delete(&self, target: StoreTarget, ids: &[i64]) -> Result<Vec<bool>> {
        let Some(partition) = self.existing(target) else {
            return Ok(vec![false; ids.len()]);
        };
        let mut map = partition.vectors.write();
        Ok(ids.iter().map(|id| map.remove(id).is_some()).collect())
    }

    fn vector_get(&self, target: StoreTarget, id: i64) -> Result<Option<VectorWithId>> {
        Ok(self
            .existing(target)
            .and_then(|p| p.vectors.read().get(&id).cloned()))
    }

    fn region_split(&self, from: StoreTarget, to: StoreTarget, split_key: &[u8]) -> Result<u64> {
        if from == to || from.entity != to.entity {
            return Err(StoreError::InvalidArgument(format!(
                "cannot split {from} into {to}"
            )));
        }
        let Some(source) = self.existing(from) else {
            return Ok(0);
        };
        let dest = self.partition(to);

        let mut src_kv = source.kv.write();
        let lower = Bound::Included(with_prefix(from.region.as_u64(), split_key));
        let upper = prefix_end(from.region.as_u64()).map_or(Bound::Unbounded, Bound::Excluded);
        let tail: Vec<Bytes> = src_kv.range((lower, upper)).map(|(k, _)| k.clone()).collect();
        // Re-key everything before touching either map.
        let rekeyed = tail
            .iter()
            .map(|key| reset_prefix(key, to.region.as_u64()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut dest_kv = dest.kv.write();
        for (old, new) in tail.iter().zip(rekeyed) {
            if let Some(value) = src_kv.remove(old) {
                dest_kv.insert(new, value);
            }
        }
        drop(dest_kv);
        drop(src_kv);

        let mut src_vectors = source.vectors.write();
        let ids: Vec<i64> = src_vectors
            .keys()
            .copied()
            .filter(|id| encode_bigint(*id).as_slice() >= split_key)
            .collect();
        let mut dest_vectors = dest.vectors.write();
        for id in &ids {
            if let Some(vector) = src_vectors.remove(id) {
                dest_vectors.insert(*id, vector);
            }
        }

        Ok((tail.len() + ids.len()) as u64)
    }
}

/// Lazy scan over one partition, fetching `batch_size` entries at a time.
struct ScanCursor {
    partition: Arc<Partition>,
    lower: Bound<Bytes>,
    upper: Bound<Bytes>,
    batch_size: usize,
    buffer: VecDeque<KeyValue>,
    coprocessor: Option<Coprocessor>,
    /// Matches still allowed by the coprocessor limit.
    remaining: Option<usize>,
    exhausted: bool,
}

impl ScanCursor {
    fn refill(&mut self) {
        if bounds_empty(&self.lower, &self.upper) {
            self.exhausted = true;
            return;
        }
        let map = self.partition.kv.read();
        let before = self.buffer.len();
        self.buffer.extend(
            map.range((self.lower.clone(), self.upper.clone()))
                .take(self.batch_size)
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
        );
        drop(map);

        let fetched = self.buffer.len() - before;
        if let Some(last) = self.buffer.back() {
            self.lower = Bound::Excluded(last.key.clone());
        }
        if fetched < self.batch_size {
            self.exhausted = true;
        }
    }
}

impl Iterator for ScanCursor {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            if let Some(kv) = self.buffer.pop_front() {
                if let Some(coprocessor) = &self.coprocessor {
                    match coprocessor.matches(&kv) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            self.buffer.clear();
                            self.exhausted = true;
                            return Some(Err(e.into()));
                        }
                    }
                }
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Some(Ok(kv));
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}
