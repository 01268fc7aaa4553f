//! # tessera-store: Region store proxy for `Tessera`
//!
//! Translates logical row operations on one region of a table into raw
//! key-value calls against a storage node, and keeps every secondary
//! index consistent with the primary rows.
//!
//! ```text
//! write ─► RegionStoreProxy ─► primary put ──────────────► StoreClient
//!                 │
//!                 └─► IndexMaintainer (per index) ─► Directory::region_for_key
//!                                                   └─► index region put
//! ```
//!
//! - [`StoreClient`] is the storage-node RPC seam; [`MemoryStore`] is the
//!   in-process implementation.
//! - [`StoreService::instance`] builds a [`RegionStoreProxy`] from the
//!   directory's table, index and region records.

mod client;
mod error;
mod index;
mod memory;
mod proxy;
mod service;


pub use client::{KvIter, StoreClient, StoreTarget};
pub use error::{Result, StoreError};
pub use index::{IndexEntry, IndexMaintainer};
pub use memory::MemoryStore;
pub use proxy::RegionStoreProxy;
pub use service::StoreService;
