//! tessera-directory: Placement metadata for `Tessera`
//!
//! The directory is the single owner of placement records: table and index
//! definitions, region boundaries, replica assignments, the executor
//! registry and pending split tasks. Schedulers and store proxies hold
//! transient views and mutate placement only through this interface.
//!
//! Each table and each of its indexes has an independent set of regions
//! that together cover the entity's whole key space without gaps or
//! overlaps. [`Directory::region_for_key`] resolves the single region owning
//! a key payload.
//!
//! # Example
//!
//! ```
//! use tessera_directory::{Directory, MemoryDirectory};
//! use tessera_types::{Column, DataType, EntityId, TableDefinition, TableId};
//!
//! let directory = MemoryDirectory::new();
//! let table = TableDefinition::new(
//!     TableId::new(1),
//!     "users",
//!     vec![Column::primary("id", DataType::BigInt)],
//! );
//! directory.create_table(table, Vec::new()).unwrap();
//!
//! let region = directory
//!     .region_for_key(EntityId::Table(TableId::new(1)), b"any key")
//!     .unwrap();
//! assert!(region.range.end.is_none());
//! ```

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::RwLock;
use tessera_types::{
    EntityId, Executor, ExecutorId, IndexDefinition, IndexId, KeyRange, Location, Region,
    RegionId, Replica, SplitTask, SplitTaskId, TableDefinition, TableId, Timestamp,
};
use tracing::debug;

#[cfg(test)]
mod tests;

/// Errors that can occur during directory lookups and updates.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("table not found: {0}")]
    TableNotFound(TableId),

    #[error("table already exists: {0}")]
    TableExists(TableId),

    #[error("index {index} does not belong to table {table}")]
    ForeignIndex { index: IndexId, table: TableId },

    #[error("region not found: {0}")]
    RegionNotFound(RegionId),

    /// No region of the entity covers the key. Indicates a coverage gap.
    #[error("no region of {0} covers the key")]
    NoRegionForKey(EntityId),

    #[error("executor not found: {0}")]
    ExecutorNotFound(ExecutorId),

    #[error("split task not found: {0}")]
    SplitTaskNotFound(SplitTaskId),

    /// Split key does not lie strictly inside the region.
    #[error("cannot split region {0}: key is not strictly inside the range")]
    InvalidSplit(RegionId),

    #[error("region already exists: {0}")]
    RegionExists(RegionId),
}

/// Result type for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

/// Placement metadata store.
///
/// Implementations must be safe to share across threads; every method
/// takes `&self`.
pub trait Directory: Send + Sync {
    // Schema
    fn table(&self, id: TableId) -> Result<TableDefinition>;
    fn tables(&self) -> Result<Vec<TableDefinition>>;
    /// Index definitions of a table, ordered by index id.
    fn table_indexes(&self, table: TableId) -> Result<Vec<IndexDefinition>>;

    // Regions
    fn region(&self, id: RegionId) -> Result<Region>;
    /// Regions of one table or index, ordered by start key.
    fn regions(&self, owner: EntityId) -> Result<Vec<Region>>;
    /// Resolves the region of `owner` whose range contains `payload`.
    fn region_for_key(&self, owner: EntityId, payload: &[u8]) -> Result<Region>;
    /// Inserts or replaces a region record.
    fn save_region(&self, region: Region) -> Result<()>;
    /// Reserves a region id no region holds yet.
    fn allocate_region_id(&self) -> Result<RegionId>;
    /// Narrows a region to `[start, split_key)` and records `new_id` as the
    /// region `[split_key, end)` of the same owner. Returns the new region.
    fn split_region_as(&self, id: RegionId, split_key: &[u8], new_id: RegionId)
    -> Result<Region>;

    /// [`split_region_as`](Self::split_region_as) with a freshly allocated id.
    ///
    /// Only rewrites placement records; moving stored data is the caller's job.
    fn split_region(&self, id: RegionId, split_key: &[u8]) -> Result<Region> {
        let new_id = self.allocate_region_id()?;
        self.split_region_as(id, split_key, new_id)
    }

    // Executors
    /// Records an executor and returns its id.
    ///
    /// A known id, or a known location without an id, keeps the existing
    /// id; otherwise a fresh id is assigned.
    fn save_executor(&self, executor: Executor) -> Result<ExecutorId>;
    fn executor(&self, id: ExecutorId) -> Result<Executor>;
    fn executors(&self) -> Result<Vec<Executor>>;

    // Replicas
    /// Inserts or replaces the replica of `replica.region` on
    /// `replica.executor`. Saving a leader demotes any other leader of the
    /// same region.
    fn save_replica(&self, replica: Replica) -> Result<()>;
    fn replicas_by_executor(&self, executor: ExecutorId) -> Result<Vec<Replica>>;
    fn replicas_of_region(&self, region: RegionId) -> Result<Vec<Replica>>;

    // Split tasks
    /// Records a split of `region` at `split_key`.
    ///
    /// Returns `None` without recording anything when a task for `region`
    /// is already pending. The check and the insert are atomic.
    fn save_split_task(
        &self,
        table: TableId,
        region: RegionId,
        split_key: Bytes,
    ) -> Result<Option<SplitTask>>;
    fn split_tasks(&self, table: TableId) -> Result<Vec<SplitTask>>;
    fn remove_split_task(&self, id: SplitTaskId) -> Result<()>;
}

// ============================================================================
// In-memory directory
// ============================================================================

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<TableId, TableDefinition>,
    indexes: BTreeMap<IndexId, IndexDefinition>,
    regions: BTreeMap<RegionId, Region>,
    /// (owner, start key) -> region, for range lookups.
    boundaries: BTreeMap<(EntityId, Bytes), RegionId>,
    executors: BTreeMap<ExecutorId, Location>,
    replicas: BTreeMap<(RegionId, ExecutorId), Replica>,
    split_tasks: BTreeMap<SplitTaskId, SplitTask>,
    next_region: u64,
    next_executor: u64,
    next_task: u64,
}

impl State {
    fn allocate_region(&mut self) -> RegionId {
        self.next_region += 1;
        RegionId::new(self.next_region)
    }

    fn insert_region(&mut self, region: Region) {
        if let Some(previous) = self.regions.get(&region.id) {
            self.boundaries
                .remove(&(previous.owner, previous.range.start.clone()));
        }
        self.next_region = self.next_region.max(region.id.as_u64());
        self.boundaries
            .insert((region.owner, region.range.start.clone()), region.id);
        self.regions.insert(region.id, region);
    }
}

/// Directory held entirely in memory.
///
/// Used for embedding and tests. Tables are created with
/// [`MemoryDirectory::create_table`], which gives the table and each of its
/// indexes a single region covering the whole key space.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<State>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table with its indexes and creates their initial regions.
    pub fn create_table(
        &self,
        table: TableDefinition,
        indexes: Vec<IndexDefinition>,
    ) -> Result<()> {
        let mut state = self.state.write();
        if state.tables.contains_key(&table.id) {
            return Err(DirectoryError::TableExists(table.id));
        }
        if let Some(foreign) = indexes.iter().find(|i| i.table != table.id) {
            return Err(DirectoryError::ForeignIndex {
                index: foreign.id,
                table: table.id,
            });
        }

        let region = state.allocate_region();
        state.insert_region(Region::new(region, table.id, KeyRange::full()));
        for index in indexes {
            let region = state.allocate_region();
            state.insert_region(Region::new(region, index.id, KeyRange::full()));
            state.indexes.insert(index.id, index);
        }
        debug!(table_id = %table.id, name = %table.name, "table created");
        state.tables.insert(table.id, table);
        Ok(())
    }
}

impl Directory for MemoryDirectory {
    fn table(&self, id: TableId) -> Result<TableDefinition> {
        self.state
            .read()
            .tables
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::TableNotFound(id))
    }

    fn tables(&self) -> Result<Vec<TableDefinition>> {
        Ok(self.state.read().tables.values().cloned().collect())
    }

    fn table_indexes(&self, table: TableId) -> Result<Vec<IndexDefinition>> {
        let state = self.state.read();
        if !state.tables.contains_key(&table) {
            return Err(DirectoryError::TableNotFound(table));
        }
        Ok(state
            .indexes
            .values()
            .filter(|i| i.table == table)
            .cloned()
            .collect())
    }

    fn region(&self, id: RegionId) -> Result<Region> {
        self.state
            .read()
            .regions
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::RegionNotFound(id))
    }

    fn regions(&self, owner: EntityId) -> Result<Vec<Region>> {
        let state = self.state.read();
        Ok(state
            .boundaries
            .range((owner, Bytes::new())..)
            .take_while(|((o, _), _)| *o == owner)
            .filter_map(|(_, id)| state.regions.get(id).cloned())
            .collect())
    }

    fn region_for_key(&self, owner: EntityId, payload: &[u8]) -> Result<Region> {
        let state = self.state.read();
        let probe = (owner, Bytes::copy_from_slice(payload));
        state
            .boundaries
            .range((owner, Bytes::new())..=probe)
            .next_back()
            .and_then(|(_, id)| state.regions.get(id))
            .filter(|region| region.contains(payload))
            .cloned()
            .ok_or(DirectoryError::NoRegionForKey(owner))
    }

    fn save_region(&self, region: Region) -> Result<()> {
        self.state.write().insert_region(region);
        Ok(())
    }

    fn allocate_region_id(&self) -> Result<RegionId> {
        Ok(self.state.write().allocate_region())
    }

    fn split_region_as(
        &self,
        id: RegionId,
        split_key: &[u8],
        new_id: RegionId,
    ) -> Result<Region> {
        let mut state = self.state.write();
        let region = state
            .regions
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::RegionNotFound(id))?;
        if state.regions.contains_key(&new_id) {
            return Err(DirectoryError::RegionExists(new_id));
        }
        let (left, right) = region
            .range
            .split_at(split_key)
            .ok_or(DirectoryError::InvalidSplit(id))?;

        let narrowed = Region::new(id, region.owner, left);
        let created = Region::new(new_id, region.owner, right);
        state.insert_region(narrowed);
        state.insert_region(created.clone());
        debug!(region_id = %id, new_region_id = %new_id, owner = %region.owner, "region split");
        Ok(created)
    }

    fn save_executor(&self, executor: Executor) -> Result<ExecutorId> {
        let mut state = self.state.write();
        let known = executor.id.or_else(|| {
            state
                .executors
                .iter()
                .find(|(_, location)| **location == executor.location)
                .map(|(id, _)| *id)
        });
        let id = known.unwrap_or_else(|| ExecutorId::new(state.next_executor + 1));
        state.next_executor = state.next_executor.max(id.as_u64());
        state.executors.insert(id, executor.location);
        Ok(id)
    }

    fn executor(&self, id: ExecutorId) -> Result<Executor> {
        self.state
            .read()
            .executors
            .get(&id)
            .map(|location| Executor::new(location.clone()).with_id(id))
            .ok_or(DirectoryError::ExecutorNotFound(id))
    }

    fn executors(&self) -> Result<Vec<Executor>> {
        Ok(self
            .state
            .read()
            .executors
            .iter()
            .map(|(id, location)| Executor::new(location.clone()).with_id(*id))
            .collect())
    }

    fn save_replica(&self, replica: Replica) -> Result<()> {
        let mut state = self.state.write();
        if !state.regions.contains_key(&replica.region) {
            return Err(DirectoryError::RegionNotFound(replica.region));
        }
        if !state.executors.contains_key(&replica.executor) {
            return Err(DirectoryError::ExecutorNotFound(replica.executor));
        }
        if replica.leader {
            let region = replica.region;
            for (_, other) in state
                .replicas
                .range_mut((region, ExecutorId::new(0))..=(region, ExecutorId::new(u64::MAX)))
            {
                other.leader = false;
            }
        }
        state
            .replicas
            .insert((replica.region, replica.executor), replica);
        Ok(())
    }

    fn replicas_by_executor(&self, executor: ExecutorId) -> Result<Vec<Replica>> {
        Ok(self
            .state
            .read()
            .replicas
            .values()
            .filter(|r| r.executor == executor)
            .cloned()
            .collect())
    }

    fn replicas_of_region(&self, region: RegionId) -> Result<Vec<Replica>> {
        Ok(self
            .state
            .read()
            .replicas
            .range((region, ExecutorId::new(0))..=(region, ExecutorId::new(u64::MAX)))
            .map(|(_, r)| r.clone())
            .collect())
    }

    fn save_split_task(
        &self,
        table: TableId,
        region: RegionId,
        split_key: Bytes,
    ) -> Result<Option<SplitTask>> {
        let mut state = self.state.write();
        if state.split_tasks.values().any(|t| t.region == region) {
            return Ok(None);
        }
        state.next_task += 1;
        let task = SplitTask {
            id: SplitTaskId::new(state.next_task),
            table,
            region,
            split_key,
            created_at: Timestamp::now(),
        };
        state.split_tasks.insert(task.id, task.clone());
        Ok(Some(task))
    }

    fn split_tasks(&self, table: TableId) -> Result<Vec<SplitTask>> {
        Ok(self
            .state
            .read()
            .split_tasks
            .values()
            .filter(|t| t.table == table)
            .cloned()
            .collect())
    }

    fn remove_split_task(&self, id: SplitTaskId) -> Result<()> {
        self.state
            .write()
            .split_tasks
            .remove(&id)
            .map(|_| ())
            .ok_or(DirectoryError::SplitTaskNotFound(id))
    }
}
