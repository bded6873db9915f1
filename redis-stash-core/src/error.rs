//! Error types for the storage backends

use std::io;
use thiserror::Error;
use tracing::error;

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type covering the transport, protocol and topology failure modes
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error during network operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Undecodable or structurally wrong RESP data
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected a command, or a transaction produced a reply the
    /// backend cannot interpret
    #[error("command failed: {0}")]
    Command(String),

    /// The link to a node was lost (includes CLUSTERDOWN and timed-out
    /// commands); the cluster layer recovers from this by rebuilding
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A MOVED redirect: the addressed slot now lives on another node
    #[error("redirected to {host}:{port}")]
    Redirected {
        /// Target host
        host: String,
        /// Target port
        port: u16,
    },

    /// No routing entry covers the slot
    #[error("no route for slot {0}")]
    NoRoute(u16),

    /// A slot range ends before starting or past the last slot
    #[error("bad slot range {start}-{end}")]
    BadSlotRange {
        /// First slot of the rejected range
        start: u16,
        /// Last slot of the rejected range
        end: u16,
    },

    /// CLUSTER SLOTS returned a tuple the backend cannot use
    #[error("bad cluster topology: {0}")]
    BadTopology(String),

    /// No known node answers CLUSTER SLOTS
    #[error("cannot explore cluster topology: no node answers CLUSTER SLOTS")]
    FatalTopology,

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,
}

impl StoreError {
    /// Parse a Redis error string of the form `MOVED <slot> <host>:<port>`
    ///
    /// Returns `None` when the string is not a MOVED redirect at all. A
    /// malformed port is parsed through `u64` (so 16-bit `int` platforms are
    /// irrelevant) and falls back to 6379 with a log entry, the redirect
    /// itself still being honored.
    pub fn parse_moved(msg: &str) -> Option<Self> {
        let rest = msg.strip_prefix("MOVED ")?;
        let (_slot, target) = rest.split_once(' ')?;
        let (host, port_str) = target.rsplit_once(':')?;

        let port = match port_str.trim().parse::<u64>() {
            Ok(p) if p <= u64::from(u16::MAX) => p as u16,
            _ => {
                error!(
                    "cascading cluster failure: value sent as port in `{}' is not a port, trying 6379",
                    msg
                );
                6379
            }
        };

        Some(StoreError::Redirected {
            host: host.to_string(),
            port,
        })
    }

    /// Check whether a server error string reports an unavailable cluster
    pub fn is_cluster_down(msg: &str) -> bool {
        msg.starts_with("CLUSTERDOWN")
    }

    /// Errors the cluster layer recovers from by rebuilding its routing
    /// table and retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionLost(_) | StoreError::Redirected { .. } | StoreError::NoRoute(_)
        )
    }
}
