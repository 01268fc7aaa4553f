//! # tessera-types: Core types for `Tessera`
//!
//! This crate contains the shared vocabulary of the placement coordinator
//! and the region store proxy:
//! - Entity IDs ([`TableId`], [`IndexId`], [`RegionId`], [`ExecutorId`], [`SplitTaskId`])
//! - Temporal types ([`Timestamp`])
//! - Schema ([`Column`], [`DataType`], [`TableDefinition`], [`IndexDefinition`], [`IndexKind`])
//! - Row values ([`Value`], [`KeyValue`])
//! - Placement records ([`Executor`], [`Region`], [`Replica`], [`SplitTask`], [`Part`])
//! - Load reports ([`RegionStats`], [`ExecutorStats`])
//! - Scan bounds ([`KeyRange`], [`ScanRange`])
//! - Vector payloads ([`Vector`], [`VectorWithId`])

use std::{
    fmt::{self, Debug, Display},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod value;

pub use value::{DataType, Value, VectorElementType};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a table.
    TableId
);

entity_id!(
    /// Unique identifier for a secondary index.
    ///
    /// An index owns its own key space and its own regions, independent of
    /// the table it indexes.
    IndexId
);

entity_id!(
    /// Unique identifier for a region (a contiguous key-range partition).
    RegionId
);

entity_id!(
    /// Unique identifier for a storage node.
    ExecutorId
);

entity_id!(
    /// Unique identifier for a pending split decision.
    SplitTaskId
);

/// The owner of a key space: either a table or one of its indexes.
///
/// Regions and storage calls are addressed by entity so that a table's
/// primary rows and each of its indexes are partitioned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Table(TableId),
    Index(IndexId),
}

impl EntityId {
    /// Returns the raw numeric id, used as the codec key prefix.
    pub fn as_u64(self) -> u64 {
        match self {
            EntityId::Table(id) => id.as_u64(),
            EntityId::Index(id) => id.as_u64(),
        }
    }
}

impl Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Table(id) => write!(f, "table:{id}"),
            EntityId::Index(id) => write!(f, "index:{id}"),
        }
    }
}

impl From<TableId> for EntityId {
    fn from(id: TableId) -> Self {
        EntityId::Table(id)
    }
}

impl From<IndexId> for EntityId {
    fn from(id: IndexId) -> Self {
        EntityId::Index(id)
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value)
// ============================================================================

/// Wall-clock timestamp, nanoseconds since Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Creates a timestamp for the current time.
    ///
    /// A clock set before the Unix epoch yields [`Timestamp::EPOCH`].
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(Self::EPOCH, |d| Self(d.as_nanos() as u64))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 / 1_000_000_000;
        let nanos = self.0 % 1_000_000_000;
        write!(f, "{secs}.{nanos:09}")
    }
}

// ============================================================================
// Executors
// ============================================================================

/// Network location of a storage node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub host: String,
    pub port: u16,
}

impl Location {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A storage node as presented at registration time.
///
/// A node registering for the first time has no id; the directory assigns
/// one. A node re-registering after a restart presents its previous id and
/// keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Executor {
    pub id: Option<ExecutorId>,
    pub location: Location,
}

impl Executor {
    pub fn new(location: Location) -> Self {
        Self { id: None, location }
    }

    pub fn with_id(mut self, id: ExecutorId) -> Self {
        self.id = Some(id);
        self
    }
}

impl Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "executor {id} at {}", self.location),
            None => write!(f, "executor at {}", self.location),
        }
    }
}

// ============================================================================
// Schema
// ============================================================================

/// A column of a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    /// Part of the primary key.
    pub primary: bool,
    pub nullable: bool,
}

impl Column {
    /// Creates a nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary: false,
            nullable: true,
        }
    }

    /// Creates a non-nullable primary key column.
    pub fn primary(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            primary: true,
            nullable: false,
        }
    }
}

/// Definition of a table as stored in the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    /// Number of replicas each region of this table should have.
    pub replica_count: u32,
}

impl TableDefinition {
    /// Default number of replicas per region.
    pub const DEFAULT_REPLICA_COUNT: u32 = 3;

    pub fn new(id: TableId, name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            replica_count: Self::DEFAULT_REPLICA_COUNT,
        }
    }

    pub fn with_replica_count(mut self, replica_count: u32) -> Self {
        self.replica_count = replica_count;
        self
    }

    /// Returns the position of the named column in a row.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Positions of the primary key columns, in declaration order.
    pub fn primary_key_indices(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.primary.then_some(i))
            .collect()
    }
}

/// The kind of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordinary index keyed on the listed columns of the base table.
    Scalar { columns: Vec<String> },
    /// Similarity index keyed on a numeric id column.
    Vector {
        id_column: String,
        vector_column: String,
        element_type: VectorElementType,
    },
}

/// Definition of a secondary index over a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub id: IndexId,
    pub table: TableId,
    pub name: String,
    pub kind: IndexKind,
}

impl IndexDefinition {
    pub fn scalar(
        id: IndexId,
        table: TableId,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id,
            table,
            name: name.into(),
            kind: IndexKind::Scalar {
                columns: columns.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn vector(
        id: IndexId,
        table: TableId,
        name: impl Into<String>,
        id_column: impl Into<String>,
        vector_column: impl Into<String>,
        element_type: VectorElementType,
    ) -> Self {
        Self {
            id,
            table,
            name: name.into(),
            kind: IndexKind::Vector {
                id_column: id_column.into(),
                vector_column: vector_column.into(),
                element_type,
            },
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self.kind, IndexKind::Vector { .. })
    }
}

// ============================================================================
// Key ranges and regions
// ============================================================================

/// Half-open key range `[start, end)`.
///
/// An empty `start` is the beginning of the key space; `end == None` is
/// the end of the key space. Bounds compare against the key payload, i.e.
/// the encoded key with its 8-byte entity prefix removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Bytes,
    pub end: Option<Bytes>,
}

impl KeyRange {
    /// The range covering the entire key space.
    pub fn full() -> Self {
        Self {
            start: Bytes::new(),
            end: None,
        }
    }

    pub fn new(start: impl Into<Bytes>, end: Option<Bytes>) -> Self {
        Self {
            start: start.into(),
            end,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_ref() && self.end.as_ref().is_none_or(|end| key < end.as_ref())
    }

    /// Splits the range at `key` into `[start, key)` and `[key, end)`.
    ///
    /// Returns `None` unless `key` lies strictly inside the range, so both
    /// halves are non-empty.
    pub fn split_at(&self, key: &[u8]) -> Option<(KeyRange, KeyRange)> {
        if key <= self.start.as_ref() || !self.contains(key) {
            return None;
        }
        let split = Bytes::copy_from_slice(key);
        Some((
            KeyRange {
                start: self.start.clone(),
                end: Some(split.clone()),
            },
            KeyRange {
                start: split,
                end: self.end.clone(),
            },
        ))
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::full()
    }
}

/// A contiguous partition of one table's or one index's key space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub owner: EntityId,
    pub range: KeyRange,
}

impl Region {
    pub fn new(id: RegionId, owner: impl Into<EntityId>, range: KeyRange) -> Self {
        Self {
            id,
            owner: owner.into(),
            range,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.range.contains(key)
    }
}

/// Assignment of one region to one executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub region: RegionId,
    pub executor: ExecutorId,
    pub location: Location,
    pub leader: bool,
}

/// A pending decision to divide a region at `split_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitTask {
    pub id: SplitTaskId,
    pub table: TableId,
    pub region: RegionId,
    pub split_key: Bytes,
    pub created_at: Timestamp,
}

/// One region as seen by an executor fetching its store map.
///
/// Carries every replica location so the executor can discover its peers
/// without a second query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub id: RegionId,
    pub instance: EntityId,
    pub range: KeyRange,
    pub replicas: Vec<Location>,
}

// ============================================================================
// Load reports
// ============================================================================

/// Approximate statistics for one key bucket of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproximateStats {
    pub start_key: Bytes,
    pub end_key: Bytes,
    pub count: u64,
    pub size: u64,
}

/// Periodic load report for one region, sent by the region's leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
    pub table: TableId,
    pub region: RegionId,
    pub reporter: ExecutorId,
    /// Buckets in ascending key order.
    pub approximate: Vec<ApproximateStats>,
    pub qps: u64,
    pub reported_at: Timestamp,
}

impl RegionStats {
    pub fn total_size(&self) -> u64 {
        self.approximate.iter().map(|s| s.size).sum()
    }

    pub fn total_count(&self) -> u64 {
        self.approximate.iter().map(|s| s.count).sum()
    }
}

/// Periodic load report for a whole executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub executor: ExecutorId,
    pub region_count: u64,
    pub used_bytes: u64,
    pub reported_at: Timestamp,
}

// ============================================================================
// Key-value payloads
// ============================================================================

/// A raw key-value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: Bytes,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Scan bounds with independent inclusive/exclusive flags.
///
/// An empty `end` means the scan runs to the end of the region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRange {
    pub start: Bytes,
    pub end: Bytes,
    pub with_start: bool,
    pub with_end: bool,
}

impl ScanRange {
    pub fn new(
        start: impl Into<Bytes>,
        end: impl Into<Bytes>,
        with_start: bool,
        with_end: bool,
    ) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            with_start,
            with_end,
        }
    }

    /// `[start, end)`.
    pub fn half_open(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self::new(start, end, true, false)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = if self.with_start {
            key >= self.start.as_ref()
        } else {
            key > self.start.as_ref()
        };
        let before_end = self.end.is_empty()
            || if self.with_end {
                key <= self.end.as_ref()
            } else {
                key < self.end.as_ref()
            };
        after_start && before_end
    }
}

// ============================================================================
// Vectors
// ============================================================================

/// Vector payload of a vector index entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Vector {
    Float(Vec<f32>),
    Binary(Vec<Bytes>),
}

impl Vector {
    pub fn dimension(&self) -> usize {
        match self {
            Vector::Float(v) => v.len(),
            Vector::Binary(v) => v.len(),
        }
    }

    pub fn element_type(&self) -> VectorElementType {
        match self {
            Vector::Float(_) => VectorElementType::Float,
            Vector::Binary(_) => VectorElementType::Binary,
        }
    }
}

/// A vector keyed by its numeric id.
///
/// `table_data` is the primary row's encoded key-value, stored next to the
/// vector so a similarity search can return rows without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorWithId {
    pub id: i64,
    pub vector: Vector,
    pub table_data: Option<KeyValue>,
}
