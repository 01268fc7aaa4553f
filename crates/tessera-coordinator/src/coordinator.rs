//! Process-wide registry of table schedulers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tessera_config::{CoordinatorConfig, ScheduleConfig};
use tessera_directory::{Directory, DirectoryError};
use tessera_store::StoreClient;
use tessera_types::{
    Executor, ExecutorId, ExecutorStats, Part, RegionStats, TableDefinition, TableId,
};
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiRegistry, ReportApi, ServerApi};
use crate::error::{CoordinatorError, Result};
use crate::notify::NotifyPool;
use crate::scheduler::TableScheduler;

/// Routes executor registrations and load reports to per-table schedulers.
///
/// Built idle with its dependencies; [`init`](Self::init) loads a scheduler
/// for every table in the directory and binds the inbound APIs.
pub struct PlacementCoordinator {
    directory: Arc<dyn Directory>,
    store: Arc<dyn StoreClient>,
    schedule: ScheduleConfig,
    schedulers: DashMap<TableId, Arc<TableScheduler>>,
    notify: NotifyPool,
    initialized: AtomicBool,
}

impl PlacementCoordinator {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn StoreClient>,
        coordinator: &CoordinatorConfig,
        schedule: ScheduleConfig,
    ) -> Result<Self> {
        Ok(Self {
            directory,
            store,
            schedule,
            schedulers: DashMap::new(),
            notify: NotifyPool::new(coordinator)?,
            initialized: AtomicBool::new(false),
        })
    }

    /// Loads every table's scheduler and registers the coordinator as the
    /// handler for [`ServerApi`] and [`ReportApi`].
    pub fn init(self: &Arc<Self>, registry: &dyn ApiRegistry) -> Result<()> {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoordinatorError::AlreadyInitialized);
        }

        let tables = self.directory.tables()?;
        for table in tables {
            let id = table.id;
            let scheduler = self.build_scheduler(table)?;
            self.schedulers.insert(id, Arc::new(scheduler));
        }

        registry.register_server_api(Arc::clone(self) as Arc<dyn ServerApi>);
        registry.register_report_api(Arc::clone(self) as Arc<dyn ReportApi>);
        info!(tables = self.schedulers.len(), "coordinator initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Returns the scheduler for `table`, building it from the directory on
    /// first use. Concurrent callers always get the same instance.
    pub fn scheduler(&self, table: TableId) -> Result<Arc<TableScheduler>> {
        if let Some(scheduler) = self.schedulers.get(&table) {
            return Ok(Arc::clone(scheduler.value()));
        }
        match self.schedulers.entry(table) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let scheduler = Arc::new(self.build_scheduler(self.directory.table(table)?)?);
                debug!(table_id = %table, "scheduler created");
                Ok(Arc::clone(entry.insert(scheduler).value()))
            }
        }
    }

    fn build_scheduler(&self, table: TableDefinition) -> Result<TableScheduler> {
        TableScheduler::new(
            table,
            Arc::clone(&self.directory),
            Arc::clone(&self.store),
            self.schedule.clone(),
        )
    }

    pub fn remove_scheduler(&self, table: TableId) -> Option<Arc<TableScheduler>> {
        self.schedulers.remove(&table).map(|(_, scheduler)| scheduler)
    }

    /// Snapshot of the loaded schedulers.
    pub fn schedulers(&self) -> Vec<Arc<TableScheduler>> {
        self.schedulers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl ServerApi for PlacementCoordinator {
    /// Saves the executor, then tells every scheduler about the new store
    /// on the notification pool. Placement is eventual.
    #[instrument(skip_all, fields(location = %executor.location))]
    fn register_executor(&self, executor: Executor) -> Result<ExecutorId> {
        let location = executor.location.clone();
        let id = self.directory.save_executor(executor)?;
        info!(executor_id = %id, "executor registered");

        let schedulers = self.schedulers();
        self.notify.submit(move || {
            for scheduler in schedulers {
                if let Err(error) = scheduler.add_store(id, location.clone()) {
                    warn!(
                        table_id = %scheduler.table_id(),
                        executor_id = %id,
                        %error,
                        "replica placement failed"
                    );
                }
            }
        });
        Ok(id)
    }

    #[instrument(skip_all, fields(executor_id = %executor))]
    fn store_map(&self, executor: ExecutorId) -> Result<Vec<Part>> {
        let replicas = self.directory.replicas_by_executor(executor)?;
        debug!(replicas = replicas.len(), "store map requested");
        replicas
            .into_iter()
            .map(|replica| {
                let region = self.directory.region(replica.region)?;
                let replicas = self
                    .directory
                    .replicas_of_region(region.id)?
                    .into_iter()
                    .map(|r| r.location)
                    .collect();
                Ok(Part {
                    id: region.id,
                    instance: region.owner,
                    range: region.range,
                    replicas,
                })
            })
            .collect()
    }
}

impl ReportApi for PlacementCoordinator {
    #[instrument(skip_all, fields(table_id = %stats.table, region_id = %stats.region))]
    fn report_region(&self, stats: RegionStats) -> Result<bool> {
        match self.scheduler(stats.table) {
            Ok(scheduler) => scheduler.process_stats(&stats),
            Err(CoordinatorError::Directory(DirectoryError::TableNotFound(_))) => {
                warn!("stats for unknown table rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn report_executor(&self, stats: ExecutorStats) -> Result<bool> {
        debug!(executor_id = %stats.executor, "executor stats ignored");
        Ok(true)
    }
}

impl std::fmt::Debug for PlacementCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementCoordinator")
            .field("schedulers", &self.schedulers.len())
            .field("notify", &self.notify)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}
