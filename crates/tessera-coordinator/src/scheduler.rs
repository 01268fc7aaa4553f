//! Per-table placement policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tessera_config::ScheduleConfig;
use tessera_directory::{Directory, DirectoryError};
use tessera_store::{StoreClient, StoreTarget};
use tessera_types::{
    ApproximateStats, EntityId, ExecutorId, IndexId, KeyRange, Location, Region, RegionStats,
    Replica, SplitTask, TableDefinition, TableId,
};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;

/// Owns placement decisions for one table and its indexes.
///
/// Region records live in the [`Directory`]; the scheduler keeps only the
/// stores it has been told about. Placement runs under a lock so two
/// concurrent `add_store` calls never double-place the same region.
/// Splits move stored data through the [`StoreClient`] before the new
/// boundary is published.
pub struct TableScheduler {
    table: TableDefinition,
    indexes: Vec<IndexId>,
    directory: Arc<dyn Directory>,
    store: Arc<dyn StoreClient>,
    config: ScheduleConfig,
    stores: Mutex<BTreeMap<ExecutorId, Location>>,
}

impl TableScheduler {
    /// Builds the scheduler for `table`, seeded with every executor the
    /// directory already knows.
    pub fn new(
        table: TableDefinition,
        directory: Arc<dyn Directory>,
        store: Arc<dyn StoreClient>,
        config: ScheduleConfig,
    ) -> Result<Self> {
        let indexes = directory
            .table_indexes(table.id)?
            .into_iter()
            .map(|index| index.id)
            .collect();
        let stores = directory
            .executors()?
            .into_iter()
            .filter_map(|executor| executor.id.map(|id| (id, executor.location)))
            .collect();
        Ok(Self {
            table,
            indexes,
            directory,
            store,
            config,
            stores: Mutex::new(stores),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table.id
    }

    pub fn table(&self) -> &TableDefinition {
        &self.table
    }

    /// Replicas each region of this table should have.
    pub fn replica_count(&self) -> usize {
        let declared = if self.table.replica_count == 0 {
            self.config.replica_count
        } else {
            self.table.replica_count
        };
        declared as usize
    }

    /// Stores this scheduler may place replicas on.
    pub fn stores(&self) -> Vec<(ExecutorId, Location)> {
        self.stores
            .lock()
            .iter()
            .map(|(id, location)| (*id, location.clone()))
            .collect()
    }

    fn owns(&self, owner: EntityId) -> bool {
        match owner {
            EntityId::Table(id) => id == self.table.id,
            EntityId::Index(id) => self.indexes.contains(&id),
        }
    }

    /// Regions of the table followed by the regions of each index.
    pub fn regions(&self) -> Result<Vec<Region>> {
        let mut regions = self.directory.regions(EntityId::Table(self.table.id))?;
        for index in &self.indexes {
            regions.extend(self.directory.regions(EntityId::Index(*index))?);
        }
        Ok(regions)
    }

    // ========================================================================
    // Replica placement
    // ========================================================================

    /// Records a store and places missing replicas of under-replicated
    /// regions on the least-loaded known stores.
    ///
    /// Returns the number of replicas placed.
    #[instrument(skip_all, fields(table_id = %self.table.id, executor_id = %executor))]
    pub fn add_store(&self, executor: ExecutorId, location: Location) -> Result<usize> {
        let mut stores = self.stores.lock();
        stores.insert(executor, location);

        let desired = self.replica_count();
        let mut load = self.load(&stores)?;
        let mut placed = 0;

        for region in self.regions()? {
            let existing = self.directory.replicas_of_region(region.id)?;
            if existing.len() >= desired {
                continue;
            }
            let mut has_leader = existing.iter().any(|r| r.leader);

            let mut candidates: Vec<ExecutorId> = stores
                .keys()
                .copied()
                .filter(|id| existing.iter().all(|r| r.executor != *id))
                .collect();
            candidates.sort_by_key(|id| {
                let (replicas, leaders) = load.get(id).copied().unwrap_or_default();
                (replicas, leaders, *id)
            });

            for candidate in candidates.into_iter().take(desired - existing.len()) {
                let Some(location) = stores.get(&candidate) else {
                    continue;
                };
                let leader = !has_leader;
                self.directory.save_replica(Replica {
                    region: region.id,
                    executor: candidate,
                    location: location.clone(),
                    leader,
                })?;
                has_leader = true;

                let entry = load.entry(candidate).or_default();
                entry.0 += 1;
                entry.1 += usize::from(leader);
                placed += 1;
                info!(
                    region_id = %region.id,
                    executor_id = %candidate,
                    leader,
                    "replica placed"
                );
            }
        }
        Ok(placed)
    }

    /// Replica and leader counts per known store, across every table.
    fn load(
        &self,
        stores: &BTreeMap<ExecutorId, Location>,
    ) -> Result<BTreeMap<ExecutorId, (usize, usize)>> {
        let mut load = BTreeMap::new();
        for id in stores.keys() {
            let replicas = self.directory.replicas_by_executor(*id)?;
            let leaders = replicas.iter().filter(|r| r.leader).count();
            load.insert(*id, (replicas.len(), leaders));
        }
        Ok(load)
    }

    // ========================================================================
    // Split scheduling
    // ========================================================================

    /// Ingests a region load report.
    ///
    /// Returns `false` without touching any state when the region does not
    /// belong to this table. Accepted reports over the size or row-count
    /// threshold schedule a split, at most one pending per region.
    #[instrument(skip_all, fields(table_id = %self.table.id, region_id = %stats.region))]
    pub fn process_stats(&self, stats: &RegionStats) -> Result<bool> {
        if stats.table != self.table.id {
            warn!(reported_table = %stats.table, "stats for another table rejected");
            return Ok(false);
        }
        let region = match self.directory.region(stats.region) {
            Ok(region) => region,
            Err(DirectoryError::RegionNotFound(_)) => {
                warn!("stats for unknown region rejected");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        if !self.owns(region.owner) {
            warn!(owner = %region.owner, "stats for foreign region rejected");
            return Ok(false);
        }

        let size = stats.total_size();
        let count = stats.total_count();
        if size < self.config.split_size_bytes && count < self.config.split_row_count {
            return Ok(true);
        }

        let pending = self.directory.split_tasks(self.table.id)?;
        if pending.iter().any(|task| task.region == region.id) {
            debug!("split already pending");
            return Ok(true);
        }

        let Some(split_key) = choose_split_key(&region.range, &stats.approximate) else {
            debug!(size, count, "over threshold but no usable split key");
            return Ok(true);
        };
        match self
            .directory
            .save_split_task(self.table.id, region.id, split_key)?
        {
            Some(task) => info!(task_id = %task.id, size, count, "split scheduled"),
            None => debug!("split already pending"),
        }
        Ok(true)
    }

    pub fn pending_splits(&self) -> Result<Vec<SplitTask>> {
        Ok(self.directory.split_tasks(self.table.id)?)
    }

    /// Carries out every pending split of this table.
    ///
    /// Rows and index entries at or after the split key are moved to the
    /// new right-hand region before the directory publishes it, and the
    /// new region inherits the source region's replicas, leader included.
    /// A task whose key no longer falls strictly inside its region is
    /// dropped. Returns the regions created.
    #[instrument(skip_all, fields(table_id = %self.table.id))]
    pub fn execute_splits(&self) -> Result<Vec<Region>> {
        let mut created = Vec::new();
        for task in self.directory.split_tasks(self.table.id)? {
            let region = match self.directory.region(task.region) {
                Ok(region) if region.range.split_at(&task.split_key).is_some() => region,
                Ok(_) | Err(DirectoryError::RegionNotFound(_)) => {
                    warn!(
                        task_id = %task.id,
                        region_id = %task.region,
                        "stale split task dropped"
                    );
                    self.directory.remove_split_task(task.id)?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let new_id = self.directory.allocate_region_id()?;
            let moved = self.store.region_split(
                StoreTarget::new(region.owner, region.id),
                StoreTarget::new(region.owner, new_id),
                &task.split_key,
            )?;
            let right = self
                .directory
                .split_region_as(region.id, &task.split_key, new_id)?;

            for replica in self.directory.replicas_of_region(region.id)? {
                self.directory.save_replica(Replica {
                    region: right.id,
                    ..replica
                })?;
            }
            self.directory.remove_split_task(task.id)?;
            info!(
                task_id = %task.id,
                region_id = %region.id,
                new_region_id = %right.id,
                moved,
                "split executed"
            );
            created.push(right);
        }
        Ok(created)
    }
}

impl std::fmt::Debug for TableScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableScheduler")
            .field("table", &self.table.id)
            .field("indexes", &self.indexes)
            .field("stores", &self.stores.lock().len())
            .finish_non_exhaustive()
    }
}

/// Picks the bucket boundary that best halves the reported load.
///
/// Buckets are in ascending key order; each bucket's end key is a
/// candidate. Weights are bucket sizes, or row counts when no sizes were
/// reported. Only keys strictly inside `range` qualify.
pub fn choose_split_key(range: &KeyRange, buckets: &[ApproximateStats]) -> Option<Bytes> {
    let by_size = buckets.iter().any(|b| b.size > 0);
    let weight = |b: &ApproximateStats| if by_size { b.size } else { b.count };
    let total: u64 = buckets.iter().map(weight).sum();
    if total == 0 {
        return None;
    }

    let mut left = 0u64;
    let mut best: Option<(u64, &Bytes)> = None;
    for bucket in buckets {
        left += weight(bucket);
        let key = &bucket.end_key;
        if key.is_empty() || range.split_at(key).is_none() {
            continue;
        }
        let imbalance = (2 * left).abs_diff(total);
        if best.is_none_or(|(cost, _)| imbalance < cost) {
            best = Some((imbalance, key));
        }
    }
    best.map(|(_, key)| key.clone())
}
