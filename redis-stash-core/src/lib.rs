//! Core types for the `redis-stash` storage backend
//!
//! This crate carries the pieces shared by every backend flavor: the
//! composite [`StorageId`](types::StorageId) and its hash-slot derivation,
//! slot ranges and node addresses, the decoded reply value, the error
//! taxonomy and the configuration surface. The engine crate (`redis-stash`)
//! builds the connection, routing and retry machinery on top.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;
pub mod value;

pub use config::{AuthScheme, RetryConfig, StoreConfig, TlsConfig};
pub use error::{StoreError, StoreResult};
pub use types::{
    calculate_slot, Capabilities, EntrySnapshot, NodeAddress, SlotRange, StorageId, SLOT_COUNT,
};
pub use value::Reply;
