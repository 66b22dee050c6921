//! # ct-store: The "Engine" of CANTATA
//!
//! Collaborators the query engine calls into:
//!
//! - [`DataStore`]: the raw document store, path of record for ingest and
//!   id lookups.
//! - [`TableMetadataManager`]: the registry every request checks first.
//! - [`SearchIndex`]: one physical index per `(table, time bucket)`.
//! - [`ShardedIndex`]: routes writes to buckets and scatter-gathers searches
//!   so callers never see shard boundaries.

pub mod datastore;
pub mod index;
pub mod memory;
pub mod naming;
pub mod sharded;
pub mod tables;

pub use datastore::{DataStore, MemoryDataStore};
pub use index::{BulkResult, SearchIndex, SearchRequest};
pub use memory::MemoryIndex;
pub use naming::{IndexNaming, ShardPeriod};
pub use sharded::{ShardedIndex, TableSearch};
pub use tables::{MemoryTableManager, Table, TableMetadataManager};
