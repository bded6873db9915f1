//! Shard-aware versioned key/value storage backend on Redis
//!
//! `redis-stash` persists versioned, TTL-bounded entries addressed by
//! `(context, key)` pairs. Each entry is a pair of Redis keys — the value and
//! a companion version counter — created and expired together, updated with
//! optimistic concurrency (`WATCH`/`MULTI`/`EXEC`). Against a Redis Cluster
//! the backend routes by hash slot, caches one connection per node, follows
//! topology changes by rebuilding its routing table from `CLUSTER SLOTS`,
//! and retries transient failures with exponential backoff.
//!
//! # Quick Start
//!
//! ```no_run
//! use redis_stash::{Store, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StoreConfig::new("localhost", 6379).with_prefix("sp.");
//!     let store = Store::connect(config).await?;
//!
//!     store.create_string("sess", "abc", b"DATA", 1_000_000).await?;
//!     let snapshot = store.read_string("sess", "abc", 0).await?;
//!     println!("version {}: {:?}", snapshot.version, snapshot.value);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod cluster;
pub mod connection;
pub mod protocol;
pub mod retry;
pub mod standalone;
pub mod store;

pub use cluster::{Cluster, RoutingTable};
pub use connection::{Connection, ScanVisitor};
pub use retry::RetryController;
pub use standalone::Standalone;
pub use store::Store;

pub use redis_stash_core::{
    calculate_slot, AuthScheme, Capabilities, EntrySnapshot, NodeAddress, Reply, RetryConfig,
    SlotRange, StorageId, StoreConfig, StoreError, StoreResult, TlsConfig, SLOT_COUNT,
};
