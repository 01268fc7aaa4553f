//! Builds region proxies from directory metadata.

use std::sync::Arc;

use tessera_codec::CodecFactory;
use tessera_directory::Directory;
use tessera_types::{EntityId, RegionId, TableId};
use tracing::instrument;

use crate::client::StoreClient;
use crate::error::{Result, StoreError};
use crate::index::IndexMaintainer;
use crate::proxy::RegionStoreProxy;

/// Factory for [`RegionStoreProxy`] instances.
///
/// Holds the shared collaborators every proxy needs and reads the table
/// definition, index definitions and region record from the directory on
/// each call, so a proxy reflects placement at the time it was built.
#[derive(Clone)]
pub struct StoreService {
    directory: Arc<dyn Directory>,
    store: Arc<dyn StoreClient>,
    codecs: Arc<dyn CodecFactory>,
}

impl StoreService {
    pub fn new(
        directory: Arc<dyn Directory>,
        store: Arc<dyn StoreClient>,
        codecs: Arc<dyn CodecFactory>,
    ) -> Self {
        Self {
            directory,
            store,
            codecs,
        }
    }

    /// Builds the proxy for `region` of `table`.
    #[instrument(skip_all, fields(table_id = %table, region_id = %region))]
    pub fn instance(&self, table: TableId, region: RegionId) -> Result<RegionStoreProxy> {
        let definition = self.directory.table(table)?;
        let region = self.directory.region(region)?;
        if region.owner != EntityId::Table(table) {
            return Err(StoreError::WrongRegion(region.id));
        }

        let codec = self.codecs.table_codec(&definition)?;
        let indexes = self
            .directory
            .table_indexes(table)?
            .into_iter()
            .map(|index| IndexMaintainer::new(&definition, index, self.codecs.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        RegionStoreProxy::new(
            definition,
            region,
            codec,
            indexes,
            Arc::clone(&self.directory),
            Arc::clone(&self.store),
        )
    }

    /// Builds the proxy for the region of `table` owning `key`.
    pub fn instance_for_key(&self, table: TableId, key: &[u8]) -> Result<RegionStoreProxy> {
        let payload = tessera_codec::prefix::key_payload(key)?;
        let region = self.directory.region_for_key(EntityId::Table(table), payload)?;
        self.instance(table, region.id)
    }
}

impl std::fmt::Debug for StoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreService")
            .field("codecs", &self.codecs)
            .finish_non_exhaustive()
    }
}
