//! Cluster routing: slot table, connection cache and the retry wrapper
//!
//! [`Cluster`] routes every operation by the storage identifier's hash slot:
//! a shared guard covers the table lookup and the connection dispatch, the
//! per-connection mutex serializes the wire work. Transient failures
//! (connection loss, MOVED redirects, unroutable slots) trigger a backoff
//! wait, a full topology rebuild via `CLUSTER SLOTS`, and a retry.

use crate::connection::{Connection, ScanVisitor};
use crate::retry::RetryController;
use futures::future::BoxFuture;
use redis_stash_core::{
    EntrySnapshot, NodeAddress, SlotRange, StorageId, StoreConfig, StoreError, StoreResult,
    SLOT_COUNT,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, warn};

/// Ordered mapping from slot ranges to the nodes owning them
///
/// Ranges are pairwise disjoint after a successful refresh, so the last range
/// starting at or below a slot is the only candidate covering it — one
/// ordered container answers both insertion and point lookup.
#[derive(Debug, Default)]
pub struct RoutingTable {
    ranges: BTreeMap<SlotRange, NodeAddress>,
}

impl RoutingTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no range is routed
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Insert or reassign one range
    pub fn insert(&mut self, range: SlotRange, node: NodeAddress) {
        self.ranges.insert(range, node);
    }

    /// Drop every route
    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Swap the whole table for a freshly discovered topology
    pub fn replace(&mut self, entries: Vec<(SlotRange, NodeAddress)>) {
        self.ranges = entries.into_iter().collect();
    }

    /// The node owning `slot`, when any range covers it
    pub fn lookup(&self, slot: u16) -> Option<&NodeAddress> {
        self.ranges
            .range(..=SlotRange::probe(slot))
            .next_back()
            .filter(|(range, _)| range.contains(slot))
            .map(|(_, node)| node)
    }

    /// Distinct routed nodes, in range order
    pub fn nodes(&self) -> Vec<NodeAddress> {
        let mut nodes: Vec<NodeAddress> = Vec::new();
        for node in self.ranges.values() {
            if !nodes.contains(node) {
                nodes.push(node.clone());
            }
        }
        nodes
    }

    /// True when every slot `0..16384` is covered by exactly one range
    pub fn is_fully_covered(&self) -> bool {
        let mut next: u32 = 0;
        for range in self.ranges.keys() {
            if u32::from(range.start()) != next {
                return false;
            }
            next = u32::from(range.end()) + 1;
        }
        next == u32::from(SLOT_COUNT)
    }
}

type SharedConnection = Arc<Mutex<Connection>>;

/// Shard-aware access to a Redis Cluster
#[derive(Debug)]
pub struct Cluster {
    routes: RwLock<RoutingTable>,
    connections: RwLock<HashMap<NodeAddress, SharedConnection>>,
    retry: RetryController,
    config: StoreConfig,
}

impl Cluster {
    /// Bootstrap the routing table from the configured seed nodes
    ///
    /// The first seed answering `CLUSTER SLOTS` populates the table; when
    /// none does, the cluster is unusable and the error surfaces immediately.
    pub async fn connect(config: StoreConfig) -> StoreResult<Self> {
        let cluster = Self {
            routes: RwLock::new(RoutingTable::new()),
            connections: RwLock::new(HashMap::new()),
            retry: RetryController::new(config.retry.clone()),
            config,
        };
        cluster.rebuild().await?;
        Ok(cluster)
    }

    /// The node currently routed for a slot, for observability
    pub async fn node_for_slot(&self, slot: u16) -> Option<NodeAddress> {
        self.routes.read().await.lookup(slot).cloned()
    }

    /// Create both keys of an entry if absent
    pub async fn set(&self, id: &StorageId, value: &[u8], expiration: i64) -> StoreResult<bool> {
        self.run(id, move |conn| {
            Box::pin(async move { conn.lock().await.set(id, value, expiration).await })
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
        self.run(id, move |conn| {
            Box::pin(async move {
                conn.lock()
                    .await
                    .get_versioned(id, min_version, want_value, want_expiration)
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
        self.run(id, move |conn| {
            Box::pin(async move {
                conn.lock()
                    .await
                    .force_get(id, want_value, want_expiration)
                    .await
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
        self.run(id, move |conn| {
            Box::pin(async move {
                conn.lock()
                    .await
                    .update_versioned(id, value, expiration, if_version)
                    .await
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
        self.run(id, move |conn| {
            Box::pin(async move { conn.lock().await.force_update(id, value, expiration).await })
        })
        .await
    }

    /// Delete both keys of an entry
    pub async fn remove(&self, id: &StorageId) -> StoreResult<bool> {
        self.run(id, move |conn| {
            Box::pin(async move { conn.lock().await.remove(id).await })
        })
        .await
    }

    /// Scan one context across every routed node
    ///
    /// Cluster slots partition the key space, so the scan fans out to each
    /// distinct node and the visitor runs on whichever connection yields the
    /// key. Scans are not retried across topology changes; a concurrent
    /// rebuild can cause partial coverage.
    pub async fn scan_context(
        &self,
        context: &str,
        visitor: &mut dyn ScanVisitor,
    ) -> StoreResult<usize> {
        let routes = self.routes.read().await;
        let mut total = 0;
        for node in routes.nodes() {
            let conn = self.dispatch(&node).await?;
            let mut conn = conn.lock().await;
            total += conn.scan_context(context, visitor).await?;
        }
        Ok(total)
    }

    /// Route, dispatch and execute one operation, recovering from transient
    /// failures by rebuilding the topology between backoff waits
    async fn run<'a, T, F>(&'a self, id: &'a StorageId, mut op: F) -> StoreResult<T>
    where
        F: FnMut(SharedConnection) -> BoxFuture<'a, StoreResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            let outcome = {
                let routes = self.routes.read().await;
                let slot = id.slot();
                match routes.lookup(slot).cloned() {
                    None => Err(StoreError::NoRoute(slot)),
                    Some(node) => match self.dispatch(&node).await {
                        Ok(conn) => op(conn).await,
                        Err(err) => Err(err),
                    },
                }
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    // the failure may predate the cluster agreeing on the new
                    // layout, hence the wait before rediscovering it
                    if !self.retry.wait(attempt).await {
                        return Err(surface_exhausted(err));
                    }
                    self.rebuild().await?;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Fetch the cached connection for a node, dialing it on first use
    async fn dispatch(&self, node: &NodeAddress) -> StoreResult<SharedConnection> {
        {
            let connections = self.connections.read().await;
            if let Some(conn) = connections.get(node) {
                return Ok(conn.clone());
            }
        }

        let conn = Connection::connect(node, &self.config).await?;
        let mut connections = self.connections.write().await;
        Ok(connections
            .entry(node.clone())
            .or_insert_with(|| Arc::new(Mutex::new(conn)))
            .clone())
    }

    /// Rediscover the topology from the first answering node
    ///
    /// Takes both exclusive guards; the connection cache is flushed before
    /// the routes it was built against. The nodes of the outgoing table are
    /// the discovery candidates, falling back to the configured seeds when
    /// the table has nothing to offer (startup, or a previously failed
    /// rebuild).
    async fn rebuild(&self) -> StoreResult<()> {
        let mut routes = self.routes.write().await;
        let mut connections = self.connections.write().await;

        connections.clear();

        let mut candidates = routes.nodes();
        if candidates.is_empty() {
            candidates = self.config.initial_nodes.clone();
        }
        routes.clear();

        for node in candidates {
            debug!("trying reading configuration from node {node}");
            let mut conn = match Connection::connect(&node, &self.config).await {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(
                        "error occurred getting cluster configuration from {node} \
                         -- skipping node: {err}"
                    );
                    continue;
                }
            };
            match conn.iterate_slots().await {
                Ok(entries) => {
                    for (range, target) in &entries {
                        debug!("Redis cluster hash-range: {range} to host {target}");
                    }
                    routes.replace(entries);
                    connections.insert(node, Arc::new(Mutex::new(conn)));
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "error occurred getting cluster configuration from {node} \
                         -- skipping node: {err}"
                    );
                }
            }
        }

        error!(
            "no known node configured in the Redis cluster responds correctly to \
             `CLUSTER SLOTS': cannot explore cluster topology"
        );
        Err(StoreError::FatalTopology)
    }
}

/// Spell out what an exhausted retry budget means for each transient error
fn surface_exhausted(err: StoreError) -> StoreError {
    match err {
        StoreError::Redirected { host, port } => {
            error!(
                "Redis cluster failure: redirected to `{host}:{port}' but could not \
                 reach a routable node"
            );
            StoreError::ConnectionLost(format!(
                "redirected to {host}:{port} and retries exhausted"
            ))
        }
        other => {
            error!("Redis cluster failure: cannot find applicable host to connect to");
            other
        }
    }
}
