//! Host-facing storage operations
//!
//! [`Store`] is what the host daemon talks to: CRUD by `(context, key)`,
//! context-wide sweeps, and the size limits it may rely on. The backend is
//! chosen once at connect time — configured seed nodes mean a cluster,
//! otherwise the single `host:port` target — and every identifier is built
//! from the configured prefix before it touches a backend.

use crate::cluster::Cluster;
use crate::connection::{Connection, ScanVisitor};
use crate::standalone::Standalone;
use async_trait::async_trait;
use bytes::Bytes;
use redis_stash_core::{Capabilities, EntrySnapshot, StorageId, StoreConfig, StoreResult};
use tracing::info;

enum Backend {
    Standalone(Standalone),
    Cluster(Cluster),
}

/// Versioned, TTL-bounded key/value storage on Redis
pub struct Store {
    backend: Backend,
    prefix: String,
    capabilities: Capabilities,
}

impl Store {
    /// Validate the configuration and connect the appropriate backend
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;

        let prefix = config.prefix.clone();
        let capabilities = Capabilities::for_prefix(&prefix);

        let backend = if config.clustered() {
            info!(
                "connecting to Redis in cluster mode ({} seed nodes)",
                config.initial_nodes.len()
            );
            Backend::Cluster(Cluster::connect(config).await?)
        } else {
            info!("connecting to standalone Redis at {}", config.primary_node());
            Backend::Standalone(Standalone::connect(config).await?)
        };

        Ok(Self {
            backend,
            prefix,
            capabilities,
        })
    }

    /// Size limits of this storage service
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn make_id(&self, context: &str, key: &str) -> StorageId {
        StorageId::new(context, key, self.prefix.clone())
    }

    /// Create an entry if absent; `false` when it already exists
    pub async fn create_string(
        &self,
        context: &str,
        key: &str,
        value: &[u8],
        expiration: i64,
    ) -> StoreResult<bool> {
        let id = self.make_id(context, key);
        match &self.backend {
            Backend::Standalone(node) => node.set(&id, value, expiration).await,
            Backend::Cluster(cluster) => cluster.set(&id, value, expiration).await,
        }
    }

    /// Read an entry
    ///
    /// A positive `version` selects the optimistic read path, which withholds
    /// the value when the stored version is below it; `0` reads whatever is
    /// there. The snapshot's version is `0` when the entry does not exist.
    pub async fn read_string(
        &self,
        context: &str,
        key: &str,
        version: i64,
    ) -> StoreResult<EntrySnapshot> {
        let id = self.make_id(context, key);
        match &self.backend {
            Backend::Standalone(node) => {
                if version > 0 {
                    node.get_versioned(&id, version, true, true).await
                } else {
                    node.force_get(&id, true, true).await
                }
            }
            Backend::Cluster(cluster) => {
                if version > 0 {
                    cluster.get_versioned(&id, version, true, true).await
                } else {
                    cluster.force_get(&id, true, true).await
                }
            }
        }
    }

    /// Read only an entry's version counter, `0` when missing
    pub async fn read_version(&self, context: &str, key: &str) -> StoreResult<i64> {
        let id = self.make_id(context, key);
        let snapshot = match &self.backend {
            Backend::Standalone(node) => node.get_versioned(&id, 0, false, false).await?,
            Backend::Cluster(cluster) => cluster.get_versioned(&id, 0, false, false).await?,
        };
        Ok(snapshot.version)
    }

    /// Update an entry
    ///
    /// A positive `version` demands that exact stored version: the new
    /// version is returned on success, `-1` on a mismatch, `0` when the
    /// optimistic retries were exhausted. `version == 0` updates
    /// unconditionally.
    pub async fn update_string(
        &self,
        context: &str,
        key: &str,
        value: &[u8],
        expiration: i64,
        version: i64,
    ) -> StoreResult<i64> {
        let id = self.make_id(context, key);
        match &self.backend {
            Backend::Standalone(node) => {
                if version > 0 {
                    node.update_versioned(&id, value, expiration, version).await
                } else {
                    node.force_update(&id, value, expiration).await
                }
            }
            Backend::Cluster(cluster) => {
                if version > 0 {
                    cluster
                        .update_versioned(&id, value, expiration, version)
                        .await
                } else {
                    cluster.force_update(&id, value, expiration).await
                }
            }
        }
    }

    /// Delete an entry; `false` when nothing was stored under it
    pub async fn delete_string(&self, context: &str, key: &str) -> StoreResult<bool> {
        let id = self.make_id(context, key);
        match &self.backend {
            Backend::Standalone(node) => node.remove(&id).await,
            Backend::Cluster(cluster) => cluster.remove(&id).await,
        }
    }

    /// Create a text entry; same behavior as the string form
    pub async fn create_text(
        &self,
        context: &str,
        key: &str,
        value: &[u8],
        expiration: i64,
    ) -> StoreResult<bool> {
        self.create_string(context, key, value, expiration).await
    }

    /// Read a text entry; same behavior as the string form
    pub async fn read_text(
        &self,
        context: &str,
        key: &str,
        version: i64,
    ) -> StoreResult<EntrySnapshot> {
        self.read_string(context, key, version).await
    }

    /// Update a text entry; same behavior as the string form
    pub async fn update_text(
        &self,
        context: &str,
        key: &str,
        value: &[u8],
        expiration: i64,
        version: i64,
    ) -> StoreResult<i64> {
        self.update_string(context, key, value, expiration, version)
            .await
    }

    /// Delete a text entry; same behavior as the string form
    pub async fn delete_text(&self, context: &str, key: &str) -> StoreResult<bool> {
        self.delete_string(context, key).await
    }

    /// Move every entry of a context to a new expiration time
    ///
    /// Returns the number of entries the scan produced. In cluster mode the
    /// sweep is best-effort across concurrent topology changes.
    pub async fn update_context(&self, context: &str, expiration: i64) -> StoreResult<usize> {
        let mut visitor = SetExpiration { expiration };
        self.scan_context(context, &mut visitor).await
    }

    /// Delete every entry of a context
    ///
    /// Returns the number of entries the scan produced.
    pub async fn delete_context(&self, context: &str) -> StoreResult<usize> {
        let mut visitor = RemoveEntry;
        self.scan_context(context, &mut visitor).await
    }

    /// Reap expired entries of a context: a no-op, Redis expires entries
    /// server-side
    pub fn reap(&self, _context: &str) {}

    async fn scan_context(
        &self,
        context: &str,
        visitor: &mut dyn ScanVisitor,
    ) -> StoreResult<usize> {
        match &self.backend {
            Backend::Standalone(node) => node.scan_context(context, visitor).await,
            Backend::Cluster(cluster) => cluster.scan_context(context, visitor).await,
        }
    }
}

/// Context sweep: retarget the expiration of both keys of each found entry
struct SetExpiration {
    expiration: i64,
}

#[async_trait]
impl ScanVisitor for SetExpiration {
    async fn visit(&mut self, conn: &mut Connection, key: Bytes) -> StoreResult<()> {
        conn.expire_entry(&key, self.expiration).await
    }
}

/// Context sweep: drop both keys of each found entry
struct RemoveEntry;

#[async_trait]
impl ScanVisitor for RemoveEntry {
    async fn visit(&mut self, conn: &mut Connection, key: Bytes) -> StoreResult<()> {
        conn.unlink_entry(&key).await.map(|_| ())
    }
}
