//! Inbound coordinator APIs and the registry transports bind them through.

use std::sync::Arc;

use parking_lot::RwLock;
use tessera_types::{Executor, ExecutorId, ExecutorStats, Part, RegionStats};

use crate::error::Result;

/// Calls executors make to join the cluster and learn their regions.
pub trait ServerApi: Send + Sync {
    /// Records the executor and returns its id.
    fn register_executor(&self, executor: Executor) -> Result<ExecutorId>;

    /// Every region the executor hosts, with all replica locations.
    fn store_map(&self, executor: ExecutorId) -> Result<Vec<Part>>;
}

/// Periodic load reports from executors.
pub trait ReportApi: Send + Sync {
    fn report_region(&self, stats: RegionStats) -> Result<bool>;
    fn report_executor(&self, stats: ExecutorStats) -> Result<bool>;
}

/// Where a transport looks up the handlers for inbound calls.
pub trait ApiRegistry: Send + Sync {
    fn register_server_api(&self, api: Arc<dyn ServerApi>);
    fn register_report_api(&self, api: Arc<dyn ReportApi>);
}

/// Registry for in-process callers. Later registrations replace earlier ones.
#[derive(Default)]
pub struct LocalRegistry {
    server: RwLock<Option<Arc<dyn ServerApi>>>,
    report: RwLock<Option<Arc<dyn ReportApi>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server(&self) -> Option<Arc<dyn ServerApi>> {
        self.server.read().clone()
    }

    pub fn report(&self) -> Option<Arc<dyn ReportApi>> {
        self.report.read().clone()
    }
}

impl ApiRegistry for LocalRegistry {
    fn register_server_api(&self, api: Arc<dyn ServerApi>) {
        *self.server.write() = Some(api);
    }

    fn register_report_api(&self, api: Arc<dyn ReportApi>) {
        *self.report.write() = Some(api);
    }
}

impl std::fmt::Debug for LocalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegistry")
            .field("server", &self.server.read().is_some())
            .field("report", &self.report.read().is_some())
            .finish()
    }
}
