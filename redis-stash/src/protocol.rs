//! RESP2 wire codec
//!
//! The backend only ever sends commands (arrays of bulk strings) and decodes
//! whatever the server replies, so the codec is one-directional per type:
//! [`encode_command`] for the outgoing side, [`decode`] for the incoming
//! side. `decode` is incremental — it returns `Ok(None)` when the buffer
//! holds only part of a frame, letting the connection keep reading.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use redis_stash_core::{Reply, StoreError, StoreResult};
use std::io::Cursor;

const CRLF: &[u8] = b"\r\n";

/// Encode one command as a RESP2 array of bulk strings
pub fn encode_command(args: &[&[u8]], buf: &mut BytesMut) {
    buf.put_u8(b'*');
    buf.put_slice(args.len().to_string().as_bytes());
    buf.put_slice(CRLF);

    for arg in args {
        buf.put_u8(b'$');
        buf.put_slice(arg.len().to_string().as_bytes());
        buf.put_slice(CRLF);
        buf.put_slice(arg);
        buf.put_slice(CRLF);
    }
}

/// Decode one reply from the buffer
///
/// Returns `Ok(None)` when the frame is incomplete.
pub fn decode(buf: &mut Cursor<&[u8]>) -> StoreResult<Option<Reply>> {
    if !buf.has_remaining() {
        return Ok(None);
    }

    let type_byte = buf.chunk()[0];
    match type_byte {
        b'+' => decode_line(buf, |line| Ok(Reply::Status(into_string(line)?))),
        b'-' => decode_line(buf, |line| Ok(Reply::Error(into_string(line)?))),
        b':' => decode_line(buf, |line| Ok(Reply::Int(parse_int(&line)?))),
        b'$' => decode_bulk(buf),
        b'*' => decode_array(buf),
        _ => Err(StoreError::Protocol(format!(
            "invalid RESP type byte: {}",
            type_byte as char
        ))),
    }
}

fn decode_line(
    buf: &mut Cursor<&[u8]>,
    build: impl FnOnce(Vec<u8>) -> StoreResult<Reply>,
) -> StoreResult<Option<Reply>> {
    buf.advance(1);
    match read_line(buf) {
        Some(line) => build(line).map(Some),
        None => Ok(None),
    }
}

fn decode_bulk(buf: &mut Cursor<&[u8]>) -> StoreResult<Option<Reply>> {
    buf.advance(1);

    let len_line = match read_line(buf) {
        Some(line) => line,
        None => return Ok(None),
    };
    let len = parse_int(&len_line)?;

    if len == -1 {
        return Ok(Some(Reply::Nil));
    }
    let len = usize::try_from(len)
        .map_err(|_| StoreError::Protocol(format!("invalid bulk string length: {len}")))?;

    if buf.remaining() < len + 2 {
        return Ok(None);
    }

    let data = buf.chunk()[..len].to_vec();
    buf.advance(len + 2); // payload + CRLF

    Ok(Some(Reply::Data(Bytes::from(data))))
}

fn decode_array(buf: &mut Cursor<&[u8]>) -> StoreResult<Option<Reply>> {
    buf.advance(1);

    let len_line = match read_line(buf) {
        Some(line) => line,
        None => return Ok(None),
    };
    let len = parse_int(&len_line)?;

    if len == -1 {
        // a nil array is how EXEC reports an aborted transaction
        return Ok(Some(Reply::Nil));
    }
    let len = usize::try_from(len)
        .map_err(|_| StoreError::Protocol(format!("invalid array length: {len}")))?;

    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        match decode(buf)? {
            Some(value) => items.push(value),
            None => return Ok(None),
        }
    }

    Ok(Some(Reply::Array(items)))
}

fn read_line(buf: &mut Cursor<&[u8]>) -> Option<Vec<u8>> {
    let start = buf.position() as usize;
    let slice = buf.get_ref();

    for i in start..slice.len().saturating_sub(1) {
        if slice[i] == b'\r' && slice[i + 1] == b'\n' {
            let line = slice[start..i].to_vec();
            buf.set_position((i + 2) as u64);
            return Some(line);
        }
    }

    None
}

fn into_string(line: Vec<u8>) -> StoreResult<String> {
    String::from_utf8(line).map_err(|e| StoreError::Protocol(format!("invalid UTF-8: {e}")))
}

fn parse_int(line: &[u8]) -> StoreResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            StoreError::Protocol(format!(
                "invalid integer: {}",
                String::from_utf8_lossy(line)
            ))
        })
}
