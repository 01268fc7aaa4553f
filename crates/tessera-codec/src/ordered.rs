//! The default order-preserving row codec.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use tessera_types::{Column, EntityId, IndexDefinition, IndexKind, KeyValue, TableDefinition, Value};

use crate::error::{CodecError, Result};
use crate::key_encoder::{decode_value, encode_value};
use crate::prefix::{PREFIX_LEN, encode_prefix, key_payload};

/// Encodes rows into key-value pairs and back.
///
/// A row is a `Vec<Value>` in column order. The key holds the entity
/// prefix followed by the key columns; the value holds the remaining
/// columns the codec was built to carry.
pub trait KeyValueCodec: Send + Sync + Debug {
    /// Encodes a full row.
    fn encode(&self, row: &[Value]) -> Result<KeyValue>;

    /// Encodes only the key of a full row. Non-key positions are not read.
    fn encode_key(&self, row: &[Value]) -> Result<Bytes>;

    /// Encodes the leading key columns, given in key order.
    ///
    /// With every key column supplied this is the full key; with fewer it
    /// is a byte prefix of every key starting with those values.
    fn encode_key_prefix(&self, key_values: &[Value]) -> Result<Bytes>;

    /// Decodes a key-value pair into a full row. The key prefix is ignored.
    fn decode(&self, kv: &KeyValue) -> Result<Vec<Value>>;

    /// Row positions of the key columns, in key order.
    fn key_columns(&self) -> &[usize];
}

/// Builds codecs for tables and scalar indexes.
pub trait CodecFactory: Send + Sync + Debug {
    fn table_codec(&self, table: &TableDefinition) -> Result<Arc<dyn KeyValueCodec>>;

    /// Builds the codec for one scalar index.
    ///
    /// The index row it accepts is the projection returned by
    /// [`index_row_positions`].
    fn index_codec(
        &self,
        table: &TableDefinition,
        index: &IndexDefinition,
    ) -> Result<Arc<dyn KeyValueCodec>>;
}

/// Positions in the table row that make up a scalar index row.
///
/// The index row is the declared index columns followed by any primary key
/// column not already among them, so rows sharing an indexed value still
/// get distinct index keys.
pub fn index_row_positions(table: &TableDefinition, index: &IndexDefinition) -> Result<Vec<usize>> {
    let IndexKind::Scalar { columns } = &index.kind else {
        return Err(CodecError::VectorIndex(index.name.clone()));
    };
    let mut positions = columns
        .iter()
        .map(|name| {
            table
                .column_index(name)
                .ok_or_else(|| CodecError::UnknownColumn(name.clone()))
        })
        .collect::<Result<Vec<_>>>()?;
    for pk in table.primary_key_indices() {
        if !positions.contains(&pk) {
            positions.push(pk);
        }
    }
    Ok(positions)
}

/// Order-preserving codec: key columns through the key encoder, value
/// columns as a `postcard` list.
#[derive(Debug, Clone)]
pub struct OrderedCodec {
    entity: EntityId,
    columns: Vec<Column>,
    key: Vec<usize>,
    value: Vec<usize>,
}

impl OrderedCodec {
    pub fn new(entity: EntityId, columns: Vec<Column>, key: Vec<usize>, value: Vec<usize>) -> Self {
        Self {
            entity,
            columns,
            key,
            value,
        }
    }

    /// Codec for a table's primary rows: primary key columns in the key,
    /// every other column in the value.
    pub fn for_table(table: &TableDefinition) -> Result<Self> {
        let key = table.primary_key_indices();
        if key.is_empty() {
            return Err(CodecError::NoPrimaryKey(table.name.clone()));
        }
        let value = (0..table.columns.len()).filter(|i| !key.contains(i)).collect();
        let codec = Self::new(table.id.into(), table.columns.clone(), key, value);
        codec.check_key_types()?;
        Ok(codec)
    }

    /// Codec for a scalar index: every index-row column in the key, the
    /// primary key columns repeated in the value as the back-reference.
    pub fn for_index(table: &TableDefinition, index: &IndexDefinition) -> Result<Self> {
        let positions = index_row_positions(table, index)?;
        let columns: Vec<Column> = positions.iter().map(|&p| table.columns[p].clone()).collect();
        let pks = table.primary_key_indices();
        let value = positions
            .iter()
            .enumerate()
            .filter_map(|(i, p)| pks.contains(p).then_some(i))
            .collect();
        let key = (0..columns.len()).collect();
        let codec = Self::new(index.id.into(), columns, key, value);
        codec.check_key_types()?;
        Ok(codec)
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    fn check_key_types(&self) -> Result<()> {
        for &k in &self.key {
            let column = &self.columns[k];
            if !column.data_type.is_orderable() {
                return Err(CodecError::NotOrderable {
                    column: column.name.clone(),
                    data_type: column.data_type,
                });
            }
        }
        Ok(())
    }

    fn check_arity(&self, row: &[Value]) -> Result<()> {
        if row.len() == self.columns.len() {
            Ok(())
        } else {
            Err(CodecError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            })
        }
    }

    /// Validates a value against its column and widens it to the declared type.
    fn coerce(column: &Column, value: &Value) -> Result<Value> {
        if value.is_null() && !column.nullable {
            return Err(CodecError::NullNotAllowed(column.name.clone()));
        }
        value.coerce_to(column.data_type).ok_or_else(|| CodecError::TypeMismatch {
            column: column.name.clone(),
            expected: column.data_type,
            actual: value.data_type().unwrap_or(column.data_type),
        })
    }

    fn encode_key_values<'a>(&self, values: impl Iterator<Item = (usize, &'a Value)>) -> Result<Bytes> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&encode_prefix(self.entity.as_u64()));
        for (position, value) in values {
            let column = &self.columns[position];
            let value = Self::coerce(column, value)?;
            encode_value(&column.name, &value, column.data_type, &mut buf)?;
        }
        Ok(Bytes::from(buf))
    }
}

impl KeyValueCodec for OrderedCodec {
    fn encode(&self, row: &[Value]) -> Result<KeyValue> {
        let key = self.encode_key(row)?;
        let values = self
            .value
            .iter()
            .map(|&p| Self::coerce(&self.columns[p], &row[p]))
            .collect::<Result<Vec<_>>>()?;
        let value = postcard::to_allocvec(&values)?;
        Ok(KeyValue::new(key, value))
    }

    fn encode_key(&self, row: &[Value]) -> Result<Bytes> {
        self.check_arity(row)?;
        self.encode_key_values(self.key.iter().map(|&p| (p, &row[p])))
    }

    fn encode_key_prefix(&self, key_values: &[Value]) -> Result<Bytes> {
        if key_values.len() > self.key.len() {
            return Err(CodecError::KeyArity {
                expected: self.key.len(),
                actual: key_values.len(),
            });
        }
        self.encode_key_values(self.key.iter().copied().zip(key_values))
    }

    fn decode(&self, kv: &KeyValue) -> Result<Vec<Value>> {
        let mut row = vec![Value::Null; self.columns.len()];

        let payload = key_payload(&kv.key)?;
        let mut pos = 0;
        for &p in &self.key {
            row[p] = decode_value(payload, &mut pos, self.columns[p].data_type).map_err(|e| {
                match e {
                    CodecError::MalformedKey { position, reason } => CodecError::MalformedKey {
                        position: position + PREFIX_LEN,
                        reason,
                    },
                    other => other,
                }
            })?;
        }
        if pos != payload.len() {
            return Err(CodecError::MalformedKey {
                position: pos + PREFIX_LEN,
                reason: "trailing bytes after key",
            });
        }

        let values: Vec<Value> = postcard::from_bytes(&kv.value)?;
        if values.len() != self.value.len() {
            return Err(CodecError::ColumnCountMismatch {
                expected: self.value.len(),
                actual: values.len(),
            });
        }
        for (&p, value) in self.value.iter().zip(values) {
            row[p] = value;
        }
        Ok(row)
    }

    fn key_columns(&self) -> &[usize] {
        &self.key
    }
}

/// Factory producing [`OrderedCodec`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderedCodecFactory;

impl CodecFactory for OrderedCodecFactory {
    fn table_codec(&self, table: &TableDefinition) -> Result<Arc<dyn KeyValueCodec>> {
        Ok(Arc::new(OrderedCodec::for_table(table)?))
    }

    fn index_codec(
        &self,
        table: &TableDefinition,
        index: &IndexDefinition,
    ) -> Result<Arc<dyn KeyValueCodec>> {
        Ok(Arc::new(OrderedCodec::for_index(table, index)?))
    }
}
