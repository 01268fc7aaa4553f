//! Secondary index maintenance.
//!
//! An [`IndexMaintainer`] turns a primary row into the entry one index
//! stores for it, resolves the index region owning that entry, and issues
//! the single write or delete against it.
//!
//! - **Scalar** indexes encode the projected index row (see
//!   [`index_row_positions`]) with the index codec. The value section is
//!   the primary key, a back-reference to the row.
//! - **Vector** indexes key on the numeric id column. The routing payload
//!   is the id in sign-flip big-endian form; the stored entry carries the
//!   vector and the primary row's key-value.

use std::sync::Arc;

use bytes::Bytes;
use tessera_codec::key_encoder::{encode_bigint, successor_key};
use tessera_codec::prefix::{key_payload, prefix_end, reset_prefix, with_prefix};
use tessera_codec::{CodecError, CodecFactory, KeyValueCodec, index_row_positions};
use tessera_directory::Directory;
use tessera_types::{
    EntityId, IndexDefinition, IndexKind, KeyValue, Region, ScanRange, TableDefinition, Value,
    Vector, VectorElementType, VectorWithId,
};

use crate::client::{StoreClient, StoreTarget};
use crate::error::{Result, StoreError};

/// The entry an index holds for one primary row.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexEntry {
    Scalar(KeyValue),
    Vector(VectorWithId),
}

impl IndexEntry {
    /// Bytes the owning region is resolved from.
    fn routing_payload(&self) -> Result<Bytes> {
        match self {
            IndexEntry::Scalar(kv) => Ok(Bytes::copy_from_slice(key_payload(&kv.key)?)),
            IndexEntry::Vector(v) => Ok(vector_payload(v.id)),
        }
    }
}

fn vector_payload(id: i64) -> Bytes {
    Bytes::copy_from_slice(&encode_bigint(id))
}

#[derive(Debug)]
enum Compiled {
    Scalar {
        codec: Arc<dyn KeyValueCodec>,
        /// Table row positions making up the index row.
        positions: Vec<usize>,
        /// Index row positions of the primary key columns, in key order.
        back_reference: Vec<usize>,
    },
    Vector {
        id_position: usize,
        vector_position: usize,
        element_type: VectorElementType,
    },
}

/// Keeps one secondary index in step with its table.
#[derive(Debug)]
pub struct IndexMaintainer {
    definition: IndexDefinition,
    compiled: Compiled,
}

impl IndexMaintainer {
    pub fn new(
        table: &TableDefinition,
        definition: IndexDefinition,
        codecs: &dyn CodecFactory,
    ) -> Result<Self> {
        let compiled = match &definition.kind {
            IndexKind::Scalar { .. } => {
                let positions = index_row_positions(table, &definition)?;
                let back_reference = table
                    .primary_key_indices()
                    .iter()
                    .filter_map(|pk| positions.iter().position(|p| p == pk))
                    .collect();
                Compiled::Scalar {
                    codec: codecs.index_codec(table, &definition)?,
                    positions,
                    back_reference,
                }
            }
            IndexKind::Vector {
                id_column,
                vector_column,
                element_type,
            } => Compiled::Vector {
                id_position: column_position(table, id_column)?,
                vector_position: column_position(table, vector_column)?,
                element_type: *element_type,
            },
        };
        Ok(Self {
            definition,
            compiled,
        })
    }

    pub fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    pub fn entity(&self) -> EntityId {
        EntityId::Index(self.definition.id)
    }

    pub fn is_vector(&self) -> bool {
        matches!(self.compiled, Compiled::Vector { .. })
    }

    /// Computes the index entry for `row`.
    ///
    /// `primary` is the row's encoded primary key-value; vector entries
    /// keep it as their back-pointer.
    pub fn entry(&self, row: &[Value], primary: &KeyValue) -> Result<IndexEntry> {
        match &self.compiled {
            Compiled::Scalar {
                codec, positions, ..
            } => {
                Ok(IndexEntry::Scalar(codec.encode(&project(row, positions)?)?))
            }
            Compiled::Vector {
                id_position,
                vector_position,
                element_type,
            } => {
                let id = self.vector_id(row, *id_position)?;
                let vector = match (cell(row, *vector_position)?, element_type) {
                    (Value::FloatVector(v), VectorElementType::Float) => Vector::Float(v.clone()),
                    (Value::BinaryVector(v), VectorElementType::Binary) => {
                        Vector::Binary(v.clone())
                    }
                    (other, _) => {
                        return Err(StoreError::InvalidArgument(format!(
                            "index {} expects a {element_type:?} vector, got {other}",
                            self.definition.name
                        )));
                    }
                };
                Ok(IndexEntry::Vector(VectorWithId {
                    id,
                    vector,
                    table_data: Some(primary.clone()),
                }))
            }
        }
    }

    /// Returns the key identity of `row` in this index: the encoded key
    /// for scalar indexes, the id for vector indexes.
    fn identity(&self, row: &[Value]) -> Result<Bytes> {
        match &self.compiled {
            Compiled::Scalar {
                codec, positions, ..
            } => Ok(codec.encode_key(&project(row, positions)?)?),
            Compiled::Vector { id_position, .. } => {
                Ok(vector_payload(self.vector_id(row, *id_position)?))
            }
        }
    }

    /// Whether the index entry of `old` differs in key from that of `new`.
    pub fn key_changed(&self, new: &[Value], old: &[Value]) -> Result<bool> {
        Ok(self.identity(new)? != self.identity(old)?)
    }

    fn vector_id(&self, row: &[Value], position: usize) -> Result<i64> {
        cell(row, position)?.as_i64().ok_or_else(|| {
            StoreError::InvalidArgument(format!(
                "index {} needs an integer id",
                self.definition.name
            ))
        })
    }

    fn owning_region(&self, directory: &dyn Directory, payload: &[u8]) -> Result<Region> {
        Ok(directory.region_for_key(self.entity(), payload)?)
    }

    /// Writes a computed entry to its owning index region.
    pub fn write(
        &self,
        entry: IndexEntry,
        directory: &dyn Directory,
        store: &dyn StoreClient,
    ) -> Result<bool> {
        let region = self.owning_region(directory, &entry.routing_payload()?)?;
        let target = StoreTarget::new(self.entity(), region.id);
        match entry {
            IndexEntry::Scalar(kv) => {
                let key = reset_prefix(&kv.key, region.id.as_u64())?;
                store.kv_put(target, KeyValue::new(key, kv.value))
            }
            IndexEntry::Vector(vector) => store.vector_add(target, vec![vector]),
        }
    }

    /// Removes the entry `row` maps to from its owning index region.
    ///
    /// Returns whether the entry was present. A missing entry is not a
    /// failure.
    pub fn delete(
        &self,
        row: &[Value],
        directory: &dyn Directory,
        store: &dyn StoreClient,
    ) -> Result<bool> {
        let removed = match &self.compiled {
            Compiled::Scalar { .. } => {
                let key = self.identity(row)?;
                let region = self.owning_region(directory, key_payload(&key)?)?;
                let target = StoreTarget::new(self.entity(), region.id);
                store.kv_batch_delete(target, &[reset_prefix(&key, region.id.as_u64())?])?
            }
            Compiled::Vector { id_position, .. } => {
                let id = self.vector_id(row, *id_position)?;
                let region = self.owning_region(directory, &vector_payload(id))?;
                store.vector_delete(StoreTarget::new(self.entity(), region.id), &[id])?
            }
        };
        Ok(removed.first().copied().unwrap_or(false))
    }

    /// Finds the primary keys of rows whose leading index columns equal
    /// `values`, scanning every index region the prefix spans.
    ///
    /// Returns each match's primary key columns in key order.
    pub fn lookup(
        &self,
        values: &[Value],
        directory: &dyn Directory,
        store: &dyn StoreClient,
    ) -> Result<Vec<Vec<Value>>> {
        let Compiled::Scalar {
            codec,
            back_reference,
            ..
        } = &self.compiled
        else {
            return Err(StoreError::InvalidArgument(format!(
                "index {} is a vector index; use vector_get",
                self.definition.name
            )));
        };
        let prefix = codec.encode_key_prefix(values)?;
        let payload = key_payload(&prefix)?;
        let payload_end = successor_key(payload);

        let mut matches = Vec::new();
        for region in directory.regions(self.entity())? {
            let after_start = payload_end
                .as_ref()
                .is_none_or(|end| region.range.start.as_ref() < end.as_ref());
            let before_end = region
                .range
                .end
                .as_ref()
                .is_none_or(|end| payload < end.as_ref());
            if !(after_start && before_end) {
                continue;
            }

            let id = region.id.as_u64();
            let start = with_prefix(id, payload);
            let end = match &payload_end {
                Some(end) => with_prefix(id, end),
                None => prefix_end(id).unwrap_or_default(),
            };
            let range = ScanRange::half_open(start, end);
            for kv in store.scan(StoreTarget::new(self.entity(), region.id), range, None)? {
                let row = codec.decode(&kv?)?;
                matches.push(back_reference.iter().map(|&i| row[i].clone()).collect());
            }
        }
        Ok(matches)
    }
}

fn column_position(table: &TableDefinition, name: &str) -> Result<usize> {
    table
        .column_index(name)
        .ok_or_else(|| CodecError::UnknownColumn(name.to_string()).into())
}

fn cell(row: &[Value], position: usize) -> Result<&Value> {
    row.get(position).ok_or_else(|| {
        StoreError::InvalidArgument(format!("row has no column at position {position}"))
    })
}

fn project(row: &[Value], positions: &[usize]) -> Result<Vec<Value>> {
    positions.iter().map(|&p| cell(row, p).cloned()).collect()
}
