//! Decoded RESP2 reply values

use crate::error::{StoreError, StoreResult};
use bytes::Bytes;

/// One decoded RESP2 reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Simple string: `+OK\r\n`
    Status(String),
    /// Error: `-ERR message\r\n`
    Error(String),
    /// Integer: `:1000\r\n`
    Int(i64),
    /// Bulk string: `$6\r\nfoobar\r\n`
    Data(Bytes),
    /// Null bulk string or null array
    Nil,
    /// Array: `*2\r\n...`
    Array(Vec<Reply>),
}

impl Reply {
    /// True for the nil reply
    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// Require a status reply; the operation name feeds the error message
    pub fn expect_status(self, op: &str) -> StoreResult<String> {
        match self {
            Reply::Status(s) => Ok(s),
            other => Err(unexpected(op, "status", &other)),
        }
    }

    /// Require an integer reply
    pub fn expect_int(self, op: &str) -> StoreResult<i64> {
        match self {
            Reply::Int(i) => Ok(i),
            other => Err(unexpected(op, "integer", &other)),
        }
    }

    /// Require a bulk-string reply
    pub fn expect_data(self, op: &str) -> StoreResult<Bytes> {
        match self {
            Reply::Data(b) => Ok(b),
            other => Err(unexpected(op, "bulk string", &other)),
        }
    }

    /// Require an array reply
    pub fn expect_array(self, op: &str) -> StoreResult<Vec<Reply>> {
        match self {
            Reply::Array(items) => Ok(items),
            other => Err(unexpected(op, "array", &other)),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Int(_) => "integer",
            Reply::Data(_) => "bulk string",
            Reply::Nil => "nil",
            Reply::Array(_) => "array",
        }
    }
}

fn unexpected(op: &str, wanted: &str, got: &Reply) -> StoreError {
    StoreError::Protocol(format!(
        "({op}) incorrect response from Redis server: expected {wanted} but got {}",
        got.kind()
    ))
}
