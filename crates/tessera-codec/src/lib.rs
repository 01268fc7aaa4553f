//! # tessera-codec: Row encoding for `Tessera`
//!
//! Rows travel to storage as raw key-value pairs. This crate defines the
//! injectable codec seam ([`KeyValueCodec`], [`CodecFactory`]) and ships the
//! default [`OrderedCodec`]:
//!
//! ```text
//! key   = [entity id: u64 BE][key column 0][key column 1]...
//! value = postcard(Vec<Value>) of the value columns
//! ```
//!
//! Key bytes sort in the same order as the key column values, so region
//! boundaries and scan bounds are plain byte comparisons. The entity prefix
//! is rewritten to the region id by the store proxy (see [`prefix`]).
//!
//! [`Predicate`] and [`Coprocessor`] describe filters evaluated next to the
//! data during a scan.

mod coprocessor;
mod error;
pub mod key_encoder;
mod ordered;
pub mod prefix;

#[cfg(test)]
mod tests;

pub use coprocessor::{Coprocessor, Predicate};
pub use error::{CodecError, Result};
pub use ordered::{CodecFactory, KeyValueCodec, OrderedCodec, OrderedCodecFactory, index_row_positions};
