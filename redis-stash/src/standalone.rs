//! Degenerate routing for non-clustered deployments
//!
//! [`Standalone`] drives a single Redis node: one lazily re-established
//! connection, one static route covering the whole slot space. Connection
//! loss gets the same backoff treatment the cluster applies (so a restarted
//! server is picked up transparently), but there is no topology to rebuild —
//! and a MOVED redirect from a supposedly non-clustered node is a protocol
//! error, not something to follow.

use crate::connection::{Connection, ScanVisitor};
use crate::retry::RetryController;
use futures::future::BoxFuture;
use redis_stash_core::{
    EntrySnapshot, NodeAddress, SlotRange, StorageId, StoreConfig, StoreError, StoreResult,
    SLOT_COUNT,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

type Link = Arc<Mutex<Option<Connection>>>;

/// Access to a single, non-clustered Redis node
pub struct Standalone {
    conn: Link,
    addr: NodeAddress,
    route: SlotRange,
    retry: RetryController,
    config: StoreConfig,
}

impl Standalone {
    /// Dial the configured node
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let addr = config.primary_node();
        let conn = Connection::connect(&addr, &config).await?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            addr,
            route: SlotRange::new(0, SLOT_COUNT - 1)?,
            retry: RetryController::new(config.retry.clone()),
            config,
        })
    }

    /// The single static route every identifier resolves to
    pub fn route(&self) -> (SlotRange, &NodeAddress) {
        (self.route, &self.addr)
    }

    /// Create both keys of an entry if absent
    pub async fn set(&self, id: &StorageId, value: &[u8], expiration: i64) -> StoreResult<bool> {
        self.run(move |link| {
            Box::pin(async move {
                let mut guard = link.lock().await;
                let conn = guard.as_mut().ok_or_else(not_connected)?;
                conn.set(id, value, expiration).await
            })
        })
        .await
    }

    /// Optimistic versioned read
    pub async fn get_versioned(
        &self,
        id: &StorageId,
        min_version: i64,
        want_value: bool,
        want_expiration: bool,
    ) -> StoreResult<EntrySnapshot> {
        self.run(move |link| {
            Box::pin(async move {
                let mut guard = link.lock().await;
                let conn = guard.as_mut().ok_or_else(not_connected)?;
                conn.get_versioned(id, min_version, want_value, want_expiration)
                    .await
            })
        })
        .await
    }

    /// Unconditional read
    pub async fn force_get(
        &self,
        id: &StorageId,
        want_value: bool,
        want_expiration: bool,
    ) -> StoreResult<EntrySnapshot> {
        self.run(move |link| {
            Box::pin(async move {
                let mut guard = link.lock().await;
                let conn = guard.as_mut().ok_or_else(not_connected)?;
                conn.force_get(id, want_value, want_expiration).await
            })
        })
        .await
    }

    /// Compare-and-swap update
    pub async fn update_versioned(
        &self,
        id: &StorageId,
        value: &[u8],
        expiration: i64,
        if_version: i64,
    ) -> StoreResult<i64> {
        self.run(move |link| {
            Box::pin(async move {
                let mut guard = link.lock().await;
                let conn = guard.as_mut().ok_or_else(not_connected)?;
                conn.update_versioned(id, value, expiration, if_version).await
            })
        })
        .await
    }

    /// Unconditional update
    pub async fn force_update(
        &self,
        id: &StorageId,
        value: &[u8],
        expiration: i64,
    ) -> StoreResult<i64> {
        self.run(move |link| {
            Box::pin(async move {
                let mut guard = link.lock().await;
                let conn = guard.as_mut().ok_or_else(not_connected)?;
                conn.force_update(id, value, expiration).await
            })
        })
        .await
    }

    /// Delete both keys of an entry
    pub async fn remove(&self, id: &StorageId) -> StoreResult<bool> {
        self.run(move |link| {
            Box::pin(async move {
                let mut guard = link.lock().await;
                let conn = guard.as_mut().ok_or_else(not_connected)?;
                conn.remove(id).await
            })
        })
        .await
    }

    /// Scan one context on the single node
    pub async fn scan_context(
        &self,
        context: &str,
        visitor: &mut dyn ScanVisitor,
    ) -> StoreResult<usize> {
        self.ensure_connected().await?;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(not_connected)?;
        conn.scan_context(context, visitor).await
    }

    /// Execute one operation, re-dialing the node with backoff when the
    /// connection is lost
    async fn run<'a, T, F>(&'a self, mut op: F) -> StoreResult<T>
    where
        F: FnMut(Link) -> BoxFuture<'a, StoreResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = match self.ensure_connected().await {
                Ok(()) => op(self.conn.clone()).await,
                Err(err) => Err(err),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(StoreError::Redirected { host, port }) => {
                    error!(
                        "standalone Redis node redirected to `{host}:{port}': \
                         refusing to follow"
                    );
                    return Err(StoreError::Command(format!(
                        "unexpected MOVED redirect from standalone node to {host}:{port}"
                    )));
                }
                Err(err @ StoreError::ConnectionLost(_)) => {
                    // drop the dead link so the next round dials fresh
                    self.conn.lock().await.take();
                    if !self.retry.wait(attempt).await {
                        return Err(err);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn ensure_connected(&self) -> StoreResult<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            *guard = Some(Connection::connect(&self.addr, &self.config).await?);
        }
        Ok(())
    }
}

fn not_connected() -> StoreError {
    StoreError::ConnectionLost("connection not established".to_string())
}
