//! A single pinned connection to one Redis node
//!
//! [`Connection`] owns the TCP link, pipelines commands through it and
//! implements the versioned entry protocol on top of Redis primitives. It is
//! pinned to one node: a MOVED reply is classified and raised, never
//! followed. Transport loss triggers a bounded reconnect of the link itself,
//! after which the failure is still reported so the routing layer decides
//! whether to retry.

use crate::protocol;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use redis_stash_core::{
    AuthScheme, EntrySnapshot, NodeAddress, Reply, SlotRange, StorageId, StoreConfig, StoreError,
    StoreResult,
};
use std::io::Cursor;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Attempts at an optimistic-concurrency (WATCH/EXEC) pipeline before giving up
const OPTIMISTIC_RETRY_COUNT: usize = 3;
/// Attempts at restoring a lost link before reporting the loss
const RECONNECT_RETRY_COUNT: usize = 3;

/// Callback invoked with every key a context scan produces
///
/// The visitor receives the connection that yielded the key so it can issue
/// follow-up commands on the same link.
#[async_trait]
pub trait ScanVisitor: Send {
    /// Handle one full (rendered) key
    async fn visit(&mut self, conn: &mut Connection, key: Bytes) -> StoreResult<()>;
}

/// One connection to one Redis node
pub struct Connection {
    stream: TcpStream,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    addr: NodeAddress,
    config: StoreConfig,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("addr", &self.addr).finish()
    }
}

impl Connection {
    /// Connect to the given node and authenticate per the configured scheme
    pub async fn connect(addr: &NodeAddress, config: &StoreConfig) -> StoreResult<Self> {
        info!("connecting to Redis at {}", addr);

        let target = format!("{}:{}", addr.host, addr.port);
        let dial = TcpStream::connect(&target);
        let stream = match config.connect_timeout {
            Some(limit) => timeout(limit, dial)
                .await
                .map_err(|_| StoreError::ConnectionLost(format!("connect timeout: {target}")))?,
            None => dial.await,
        }
        // keep the failure message short: the error path must not depend on
        // building large strings when the system is starved
        .map_err(|e| StoreError::ConnectionLost(format!("connect: {e}")))?;

        let stream = apply_keepalive(stream, config)?;

        let mut conn = Self {
            stream,
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::new(),
            addr: addr.clone(),
            config: config.clone(),
        };
        conn.authenticate().await?;
        Ok(conn)
    }

    /// The node this connection is pinned to
    pub fn addr(&self) -> &NodeAddress {
        &self.addr
    }

    async fn authenticate(&mut self) -> StoreResult<()> {
        let (user, password) = match self.config.auth_scheme() {
            AuthScheme::Disabled => return Ok(()),
            AuthScheme::Password => {
                info!("performing default authentication at host {}", self.addr);
                (None, self.config.auth_password.clone().unwrap_or_default())
            }
            AuthScheme::Acl => {
                let user = self.config.auth_user.clone().unwrap_or_default();
                info!(
                    "performing ACL-style authentication at host {}: user {}",
                    self.addr, user
                );
                (Some(user), self.config.auth_password.clone().unwrap_or_default())
            }
        };

        match user {
            Some(user) => self.append(&[b"AUTH", user.as_bytes(), password.as_bytes()]),
            None => self.append(&[b"AUTH", password.as_bytes()]),
        }
        self.flush_pipeline("authenticate").await?;

        match self.read_raw_reply().await? {
            Reply::Status(_) => Ok(()),
            Reply::Error(e) => Err(StoreError::Auth(e)),
            other => Err(StoreError::Auth(format!(
                "unexpected authentication response: {other:?}"
            ))),
        }
    }

    // -- pipeline plumbing ---------------------------------------------------

    fn append(&mut self, args: &[&[u8]]) {
        protocol::encode_command(args, &mut self.write_buffer);
    }

    async fn flush_pipeline(&mut self, op: &str) -> StoreResult<()> {
        let out = self.write_buffer.split();
        let written = match self.config.command_timeout {
            Some(limit) => match timeout(limit, self.stream.write_all(&out)).await {
                Ok(result) => result.map_err(StoreError::from),
                Err(_) => Err(StoreError::Timeout),
            },
            None => self.stream.write_all(&out).await.map_err(StoreError::from),
        };

        match written {
            Ok(()) => Ok(()),
            Err(cause) => Err(self.fail_transport(op, cause).await),
        }
    }

    async fn read_raw_reply(&mut self) -> StoreResult<Reply> {
        loop {
            let mut cursor = Cursor::new(&self.read_buffer[..]);
            if let Some(reply) = protocol::decode(&mut cursor)? {
                let consumed = cursor.position() as usize;
                self.read_buffer.advance(consumed);
                return Ok(reply);
            }

            let read = self.stream.read_buf(&mut self.read_buffer);
            let n = match self.config.command_timeout {
                Some(limit) => timeout(limit, read).await.map_err(|_| StoreError::Timeout)??,
                None => read.await?,
            };
            if n == 0 {
                return Err(StoreError::ConnectionLost(
                    "connection closed by server".to_string(),
                ));
            }
        }
    }

    /// Read the next pipelined reply and classify it
    ///
    /// Transport failures reconnect the link (bounded) and always surface as
    /// [`StoreError::ConnectionLost`]; error replies become `Redirected`,
    /// `ConnectionLost` (CLUSTERDOWN) or `Command`.
    async fn next_reply(&mut self, op: &str, command: &str) -> StoreResult<Reply> {
        let reply = match self.read_raw_reply().await {
            Ok(reply) => reply,
            Err(
                cause @ (StoreError::Io(_) | StoreError::Timeout | StoreError::ConnectionLost(_)),
            ) => return Err(self.fail_transport(op, cause).await),
            Err(other) => return Err(other),
        };

        if let Reply::Error(msg) = reply {
            return Err(self.classify_error_reply(op, command, &msg));
        }
        Ok(reply)
    }

    async fn round_trip(&mut self, args: &[&[u8]], op: &str, command: &str) -> StoreResult<Reply> {
        self.append(args);
        self.flush_pipeline(op).await?;
        self.next_reply(op, command).await
    }

    /// Restore the link after a transport failure, then report the loss
    ///
    /// The in-flight operation is gone either way; reconnecting here only
    /// ensures the cached connection is usable when the routing layer
    /// retries. The loss is always raised so that layer makes the call.
    async fn fail_transport(&mut self, op: &str, cause: StoreError) -> StoreError {
        error!(
            "error during Redis communications with {}: {}",
            self.addr, cause
        );

        for attempt in 1..=RECONNECT_RETRY_COUNT {
            match self.reconnect().await {
                Ok(()) => break,
                Err(err) => {
                    debug!(
                        "reconnect {attempt}/{RECONNECT_RETRY_COUNT} to {} failed: {err}",
                        self.addr
                    );
                }
            }
        }

        StoreError::ConnectionLost(format!("Connection::{op}: {cause}"))
    }

    async fn reconnect(&mut self) -> StoreResult<()> {
        let addr = self.addr.clone();
        let config = self.config.clone();
        *self = Box::pin(Self::connect(&addr, &config)).await?;
        Ok(())
    }

    fn classify_error_reply(&self, op: &str, command: &str, msg: &str) -> StoreError {
        error!("execution of Redis command failed: {command}: {msg}");

        if StoreError::is_cluster_down(msg) {
            // maybe the cluster fixes itself and the failure is not fatal
            return StoreError::ConnectionLost(
                "CLUSTERDOWN received: Redis cluster is unavailable at the moment".to_string(),
            );
        }

        if let Some(redirect) = StoreError::parse_moved(msg) {
            warn!("Redis cluster configuration changed: reconfiguring caused by error: {msg}");
            return redirect;
        }

        StoreError::Command(format!("Connection::{op}: {command}: {msg}"))
    }

    fn exec_arity(&self, op: &str) -> StoreError {
        StoreError::Command(format!(
            "Connection::{op}: EXEC: incorrect amount of results from EXEC"
        ))
    }

    // -- versioned entry protocol --------------------------------------------

    /// Create both keys of an entry if absent
    ///
    /// Returns `false` when the entry already exists; `true` on creation.
    pub async fn set(
        &mut self,
        id: &StorageId,
        value: &[u8],
        expiration: i64,
    ) -> StoreResult<bool> {
        debug!("(set) setting key {id}@1 (exp: {expiration})");

        let key = id.rendered();
        let version_key = id.version_key();
        let exp = expiration.to_string();

        self.append(&[b"MULTI"]);
        self.append(&[
            b"SET",
            key.as_bytes(),
            value,
            b"NX",
            b"EXAT",
            exp.as_bytes(),
        ]);
        self.append(&[
            b"SET",
            version_key.as_bytes(),
            b"1",
            b"NX",
            b"EXAT",
            exp.as_bytes(),
        ]);
        self.append(&[b"EXEC"]);
        self.flush_pipeline("set").await?;

        self.next_reply("set", "MULTI").await?.expect_status("set")?;
        self.next_reply("set", "SET (data)").await?.expect_status("set")?;
        self.next_reply("set", "SET (version)")
            .await?
            .expect_status("set")?;
        let results = self.next_reply("set", "EXEC").await?.expect_array("set")?;

        let [data_reply, version_reply]: [Reply; 2] = results
            .try_into()
            .map_err(|_| self.exec_arity("set"))?;

        if data_reply.is_nil() {
            // NX refused the insert: the entry already exists
            return Ok(false);
        }
        data_reply.expect_status("set")?;

        if version_reply.is_nil() {
            warn!("version value exists for non-existent key {id}");
            self.unlink_entry(key.as_bytes()).await?;
            return Ok(false);
        }
        version_reply.expect_status("set")?;

        Ok(true)
    }

    /// Read the bare version counter of an entry, `0` when missing
    pub async fn read_version(&mut self, id: &StorageId) -> StoreResult<i64> {
        debug!("(read_version) reading bare version of key {id}");

        let version_key = id.version_key();
        let reply = self
            .round_trip(
                &[b"GET", version_key.as_bytes()],
                "read_version",
                "GET (version)",
            )
            .await?;

        match reply {
            Reply::Nil => Ok(0),
            Reply::Data(raw) => Ok(parse_version(id, "read_version", &raw)),
            other => other.expect_data("read_version").map(|_| 0),
        }
    }

    /// Optimistic read: report the version and, when it meets `min_version`,
    /// the requested outputs
    ///
    /// Gives up with version `0` after repeated optimistic-concurrency misses.
    pub async fn get_versioned(
        &mut self,
        id: &StorageId,
        min_version: i64,
        want_value: bool,
        want_expiration: bool,
    ) -> StoreResult<EntrySnapshot> {
        debug!("(get_versioned) getting key {id}@{min_version}+");

        // nothing to read consistently, the bare version suffices
        if !want_value && !want_expiration {
            let version = self.read_version(id).await?;
            return Ok(EntrySnapshot {
                version,
                ..EntrySnapshot::missing()
            });
        }

        let key = id.rendered();
        let version_key = id.version_key();

        for _ in 0..OPTIMISTIC_RETRY_COUNT {
            self.round_trip(&[b"WATCH", version_key.as_bytes()], "get_versioned", "WATCH")
                .await?
                .expect_status("get_versioned")?;

            let version = self.read_version(id).await?;
            // below the threshold the value is withheld, the expiration is not
            let fetch_value = want_value && version >= min_version;

            if !fetch_value && !want_expiration {
                self.round_trip(&[b"UNWATCH"], "get_versioned", "UNWATCH")
                    .await?
                    .expect_status("get_versioned")?;
                return Ok(EntrySnapshot {
                    version,
                    ..EntrySnapshot::missing()
                });
            }

            self.append(&[b"MULTI"]);
            if fetch_value {
                self.append(&[b"GET", key.as_bytes()]);
            }
            if want_expiration {
                self.append(&[b"EXPIRETIME", key.as_bytes()]);
            }
            self.append(&[b"EXEC"]);
            self.flush_pipeline("get_versioned").await?;

            self.next_reply("get_versioned", "MULTI")
                .await?
                .expect_status("get_versioned")?;
            if fetch_value {
                self.next_reply("get_versioned", "GET (data)")
                    .await?
                    .expect_status("get_versioned")?;
            }
            if want_expiration {
                self.next_reply("get_versioned", "EXPIRETIME")
                    .await?
                    .expect_status("get_versioned")?;
            }
            let exec = self.next_reply("get_versioned", "EXEC").await?;

            if exec.is_nil() {
                info!("(get_versioned) concurrency failure: retrying accessing {id}");
                continue;
            }
            let results = exec.expect_array("get_versioned")?;
            if results.len() != usize::from(fetch_value) + usize::from(want_expiration) {
                return Err(self.exec_arity("get_versioned"));
            }

            let mut results = results.into_iter();
            let mut snapshot = EntrySnapshot {
                version,
                ..EntrySnapshot::missing()
            };
            if fetch_value {
                snapshot.value = Some(
                    results
                        .next()
                        .ok_or_else(|| self.exec_arity("get_versioned"))?
                        .expect_data("get_versioned")?,
                );
            }
            if want_expiration {
                snapshot.expiration = Some(
                    results
                        .next()
                        .ok_or_else(|| self.exec_arity("get_versioned"))?
                        .expect_int("get_versioned")?,
                );
            }
            return Ok(snapshot);
        }

        warn!("(get_versioned) concurrency failure: too many retries while reading {id}");
        Ok(EntrySnapshot::missing())
    }

    /// Unconditional read of version plus requested outputs in one pipeline
    ///
    /// Reports version `0` when either key of the entry is missing.
    pub async fn force_get(
        &mut self,
        id: &StorageId,
        want_value: bool,
        want_expiration: bool,
    ) -> StoreResult<EntrySnapshot> {
        debug!("(force_get) getting key {id}@?");

        let key = id.rendered();
        let version_key = id.version_key();

        self.append(&[b"MULTI"]);
        self.append(&[b"GET", version_key.as_bytes()]);
        if want_value {
            self.append(&[b"GET", key.as_bytes()]);
        }
        if want_expiration {
            self.append(&[b"EXPIRETIME", key.as_bytes()]);
        }
        self.append(&[b"EXEC"]);
        self.flush_pipeline("force_get").await?;

        self.next_reply("force_get", "MULTI")
            .await?
            .expect_status("force_get")?;
        self.next_reply("force_get", "GET (version)")
            .await?
            .expect_status("force_get")?;
        if want_value {
            self.next_reply("force_get", "GET (data)")
                .await?
                .expect_status("force_get")?;
        }
        if want_expiration {
            self.next_reply("force_get", "EXPIRETIME")
                .await?
                .expect_status("force_get")?;
        }
        let results = self
            .next_reply("force_get", "EXEC")
            .await?
            .expect_array("force_get")?;

        if results.len() != 1 + usize::from(want_value) + usize::from(want_expiration) {
            return Err(self.exec_arity("force_get"));
        }
        let mut results = results.into_iter();

        let version_reply = results
            .next()
            .ok_or_else(|| self.exec_arity("force_get"))?;
        if version_reply.is_nil() {
            return Ok(EntrySnapshot::missing());
        }
        let version = parse_version(id, "force_get", &version_reply.expect_data("force_get")?);

        let mut snapshot = EntrySnapshot {
            version,
            ..EntrySnapshot::missing()
        };
        if want_value {
            let value_reply = results
                .next()
                .ok_or_else(|| self.exec_arity("force_get"))?;
            if value_reply.is_nil() {
                return Ok(EntrySnapshot::missing());
            }
            snapshot.value = Some(value_reply.expect_data("force_get")?);
        }
        if want_expiration {
            snapshot.expiration = Some(
                results
                    .next()
                    .ok_or_else(|| self.exec_arity("force_get"))?
                    .expect_int("force_get")?,
            );
        }

        Ok(snapshot)
    }

    /// Compare-and-swap update: succeeds only against the expected version
    ///
    /// Returns the new version, `-1` on a version mismatch, `0` when the
    /// optimistic-concurrency retries were exhausted.
    pub async fn update_versioned(
        &mut self,
        id: &StorageId,
        value: &[u8],
        expiration: i64,
        if_version: i64,
    ) -> StoreResult<i64> {
        debug!("(update_versioned) updating key {id}@{if_version}+ (exp: {expiration})");

        let version_key = id.version_key();

        for _ in 0..OPTIMISTIC_RETRY_COUNT {
            self.round_trip(
                &[b"WATCH", version_key.as_bytes()],
                "update_versioned",
                "WATCH",
            )
            .await?
            .expect_status("update_versioned")?;

            let current = self.read_version(id).await?;
            if current != if_version {
                self.round_trip(&[b"UNWATCH"], "update_versioned", "UNWATCH")
                    .await?
                    .expect_status("update_versioned")?;
                return Ok(-1);
            }

            match self.run_update_pipeline(id, value, expiration, "update_versioned").await? {
                Reply::Nil => {
                    info!("(update_versioned) concurrency failure: retrying accessing {id}");
                    continue;
                }
                exec => {
                    let new_version =
                        self.read_update_results(id, exec, expiration, "update_versioned")?;
                    if new_version - 1 != current {
                        warn!(
                            "(update_versioned) severe concurrency failure: retrying accessing {id}"
                        );
                        continue;
                    }
                    return Ok(new_version);
                }
            }
        }

        warn!("(update_versioned) concurrency failure: too many retries while updating {id}");
        Ok(0)
    }

    /// Unconditional update of an existing entry
    ///
    /// Returns the new version.
    pub async fn force_update(
        &mut self,
        id: &StorageId,
        value: &[u8],
        expiration: i64,
    ) -> StoreResult<i64> {
        debug!("(force_update) updating key {id}@? (exp: {expiration})");

        let exec = self
            .run_update_pipeline(id, value, expiration, "force_update")
            .await?;
        self.read_update_results(id, exec, expiration, "force_update")
    }

    /// Pipeline `MULTI; SET XX KEEPTTL; INCR; [EXPIREAT ×2]; EXEC` and return
    /// the EXEC reply (nil on an aborted transaction)
    async fn run_update_pipeline(
        &mut self,
        id: &StorageId,
        value: &[u8],
        expiration: i64,
        op: &str,
    ) -> StoreResult<Reply> {
        let key = id.rendered();
        let version_key = id.version_key();
        let exp = expiration.to_string();

        self.append(&[b"MULTI"]);
        self.append(&[b"SET", key.as_bytes(), value, b"XX", b"KEEPTTL"]);
        self.append(&[b"INCR", version_key.as_bytes()]);
        if expiration != 0 {
            self.append(&[b"EXPIREAT", key.as_bytes(), exp.as_bytes()]);
            self.append(&[b"EXPIREAT", version_key.as_bytes(), exp.as_bytes()]);
        }
        self.append(&[b"EXEC"]);
        self.flush_pipeline(op).await?;

        self.next_reply(op, "MULTI").await?.expect_status(op)?;
        self.next_reply(op, "SET (data)").await?.expect_status(op)?;
        self.next_reply(op, "INCR (version)").await?.expect_status(op)?;
        if expiration != 0 {
            self.next_reply(op, "EXPIREAT (data)").await?.expect_status(op)?;
            self.next_reply(op, "EXPIREAT (version)")
                .await?
                .expect_status(op)?;
        }
        self.next_reply(op, "EXEC").await
    }

    /// Validate the EXEC results of an update pipeline, returning the
    /// incremented version
    fn read_update_results(
        &self,
        id: &StorageId,
        exec: Reply,
        expiration: i64,
        op: &str,
    ) -> StoreResult<i64> {
        let results = exec.expect_array(op)?;
        if results.len() != 2 + 2 * usize::from(expiration != 0) {
            return Err(self.exec_arity(op));
        }
        let mut results = results.into_iter();

        let set_reply = results.next().ok_or_else(|| self.exec_arity(op))?;
        if set_reply.is_nil() {
            // XX refused the write: the entry vanished underneath us
            return Err(StoreError::Command(format!(
                "Connection::{op}: SET (data): entry {id} does not exist"
            )));
        }
        set_reply.expect_status(op)?;

        let new_version = results
            .next()
            .ok_or_else(|| self.exec_arity(op))?
            .expect_int(op)?;

        if expiration != 0 {
            results
                .next()
                .ok_or_else(|| self.exec_arity(op))?
                .expect_int(op)?;
            results
                .next()
                .ok_or_else(|| self.exec_arity(op))?
                .expect_int(op)?;
        }

        Ok(new_version)
    }

    /// Delete both keys of an entry; `true` iff at least one key existed
    pub async fn remove(&mut self, id: &StorageId) -> StoreResult<bool> {
        debug!("(remove) deleting key {id}@?");
        self.unlink_entry(id.rendered().as_bytes()).await
    }

    /// `UNLINK` a rendered key together with its version companion
    pub async fn unlink_entry(&mut self, full_key: &[u8]) -> StoreResult<bool> {
        let version_key = version_key_of(full_key);
        let reply = self
            .round_trip(&[b"UNLINK", full_key, &version_key], "remove", "UNLINK")
            .await?;
        Ok(reply.expect_int("remove")? != 0)
    }

    /// `EXPIREAT` a rendered key and its version companion
    pub async fn expire_entry(&mut self, full_key: &[u8], expiration: i64) -> StoreResult<()> {
        let exp = expiration.to_string();
        let version_key = version_key_of(full_key);
        self.round_trip(
            &[b"EXPIREAT", full_key, exp.as_bytes()],
            "expire_entry",
            "EXPIREAT (data)",
        )
        .await?;
        self.round_trip(
            &[b"EXPIREAT", &version_key, exp.as_bytes()],
            "expire_entry",
            "EXPIREAT (version)",
        )
        .await?;
        Ok(())
    }

    /// Cursor-driven scan over one context's data keys on this node
    ///
    /// Invokes the visitor with every matching full key. Terminates when the
    /// cursor returns to `0` or stops being parseable. Returns the number of
    /// elements the scan produced.
    pub async fn scan_context(
        &mut self,
        context: &str,
        visitor: &mut dyn ScanVisitor,
    ) -> StoreResult<usize> {
        // rendered keys carry the hash-tag brace before the context
        let pattern = format!("{{{context}:*");
        let mut cursor: u64 = 0;
        let mut count = 0usize;

        loop {
            let cur = cursor.to_string();
            let reply = self
                .round_trip(
                    &[b"SCAN", cur.as_bytes(), b"MATCH", pattern.as_bytes()],
                    "scan_context",
                    "SCAN",
                )
                .await?
                .expect_array("scan_context")?;

            if reply.len() != 2 {
                return Ok(count);
            }
            let mut parts = reply.into_iter();
            let (Some(cursor_reply), Some(keys_reply)) = (parts.next(), parts.next()) else {
                return Ok(count);
            };
            let (Reply::Data(next_cursor), Reply::Array(keys)) = (cursor_reply, keys_reply) else {
                return Ok(count);
            };

            count += keys.len();
            for (index, key) in keys.into_iter().enumerate() {
                match key {
                    Reply::Data(key) => visitor.visit(self, key).await?,
                    other => warn!(
                        "(scan_context) non-string element returned during scanning \
                         at index {index}: {other:?}"
                    ),
                }
            }

            match std::str::from_utf8(&next_cursor)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
            {
                Some(0) | None => break,
                Some(next) => cursor = next,
            }
        }

        Ok(count)
    }

    /// Ask this node for the cluster topology via `CLUSTER SLOTS`
    pub async fn iterate_slots(&mut self) -> StoreResult<Vec<(SlotRange, NodeAddress)>> {
        let entries = self
            .round_trip(&[b"CLUSTER", b"SLOTS"], "iterate_slots", "CLUSTER SLOTS")
            .await?
            .expect_array("iterate_slots")?;

        let mut topology = Vec::with_capacity(entries.len());
        for entry in entries {
            let fields = match entry {
                Reply::Array(fields) => fields,
                _ => return Err(bad_topology("slot-range entry is not an array")),
            };
            if fields.len() < 3 {
                return Err(bad_topology("slot-range is missing nodes"));
            }
            let mut fields = fields.into_iter();

            let from = slot_bound(fields.next())?;
            let to = slot_bound(fields.next())?;
            let range = SlotRange::new(from, to)?;

            let node_fields = match fields.next() {
                Some(Reply::Array(node_fields)) => node_fields,
                _ => return Err(bad_topology("slot-range's node is not an array")),
            };
            if node_fields.len() < 2 {
                return Err(bad_topology("slot-range's node is missing ip and port data"));
            }
            let mut node_fields = node_fields.into_iter();

            let host = match node_fields.next() {
                Some(Reply::Data(host)) => String::from_utf8_lossy(&host).into_owned(),
                _ => return Err(bad_topology("node host is not a string")),
            };
            let port = match node_fields.next() {
                Some(Reply::Int(port)) => u16::try_from(port)
                    .map_err(|_| bad_topology("node port is out of range"))?,
                _ => return Err(bad_topology("node port is not an integer")),
            };

            topology.push((range, NodeAddress::new(host, port)));
        }

        Ok(topology)
    }
}

fn slot_bound(reply: Option<Reply>) -> StoreResult<u16> {
    match reply {
        Some(Reply::Int(bound)) => {
            u16::try_from(bound).map_err(|_| bad_topology("slot bound is out of range"))
        }
        _ => Err(bad_topology("slot bound is not an integer")),
    }
}

fn bad_topology(detail: &str) -> StoreError {
    error!("invalid slots configuration returned from redis: {detail}");
    StoreError::BadTopology(detail.to_string())
}

fn version_key_of(full_key: &[u8]) -> Vec<u8> {
    [b"version.of:".as_slice(), full_key].concat()
}

/// A non-numeric version counter is treated as a missing entry, loudly
fn parse_version(id: &StorageId, op: &str, raw: &[u8]) -> i64 {
    match std::str::from_utf8(raw).ok().and_then(|s| s.parse::<i64>().ok()) {
        Some(version) => version,
        None => {
            error!("({op}) non-integer value in version key `version.of:{id}'");
            0
        }
    }
}

fn apply_keepalive(stream: TcpStream, config: &StoreConfig) -> StoreResult<TcpStream> {
    let Some(interval) = config.tcp_keepalive else {
        return Ok(stream);
    };

    let socket = socket2::Socket::from(stream.into_std()?);
    let keepalive = socket2::TcpKeepalive::new().with_time(interval);
    socket
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| StoreError::ConnectionLost(format!("failed to set TCP keepalive: {e}")))?;
    Ok(TcpStream::from_std(socket.into())?)
}
