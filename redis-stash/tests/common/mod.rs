#![allow(dead_code)]

//! In-process mock Redis node for hermetic integration tests
//!
//! Speaks just the RESP2 subset the backend issues (AUTH, WATCH/UNWATCH,
//! MULTI/EXEC, SET NX EXAT / XX KEEPTTL, GET, INCR, EXPIRETIME, EXPIREAT,
//! UNLINK, SCAN, CLUSTER SLOTS) and exposes failure knobs: MOVED replies,
//! a one-shot aborted transaction, connection refusal, and a retargetable
//! CLUSTER SLOTS payload.

use redis_stash::NodeAddress;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
struct Entry {
    value: Vec<u8>,
    expire_at: i64,
}

#[derive(Default)]
struct NodeState {
    entries: Mutex<HashMap<String, Entry>>,
    slots: Mutex<Vec<(u16, u16, String, u16)>>,
    moved: Mutex<Option<(u16, String, u16)>>,
    fail_exec_once: AtomicBool,
    refuse: AtomicBool,
    commands: Mutex<Vec<String>>,
}

pub struct MockNode {
    addr: SocketAddr,
    state: Arc<NodeState>,
    _accept_loop: JoinHandle<()>,
}

impl MockNode {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let state = Arc::new(NodeState::default());
        state
            .slots
            .lock()
            .unwrap()
            .push((0, 16383, "127.0.0.1".to_string(), addr.port()));

        let accept_state = state.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                if accept_state.refuse.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }
                let session_state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, session_state).await;
                });
            }
        });

        Self {
            addr,
            state,
            _accept_loop: accept_loop,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress::new("127.0.0.1", self.addr.port())
    }

    /// Retarget what this node reports from CLUSTER SLOTS
    pub fn set_slots(&self, slots: Vec<(u16, u16, String, u16)>) {
        *self.state.slots.lock().unwrap() = slots;
    }

    /// Answer every data command with a MOVED redirect until cleared
    pub fn set_moved(&self, slot: u16, host: &str, port: u16) {
        *self.state.moved.lock().unwrap() = Some((slot, host.to_string(), port));
    }

    pub fn clear_moved(&self) {
        *self.state.moved.lock().unwrap() = None;
    }

    /// Abort the next EXEC with a nil reply (optimistic-concurrency miss)
    pub fn fail_next_exec(&self) {
        self.state.fail_exec_once.store(true, Ordering::SeqCst);
    }

    /// Kill every session at its next command and drop new connections
    pub fn refuse_connections(&self) {
        self.state.refuse.store(true, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state.entries.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn entry(&self, key: &str) -> Option<(Vec<u8>, i64)> {
        self.state
            .entries
            .lock()
            .unwrap()
            .get(key)
            .map(|e| (e.value.clone(), e.expire_at))
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }
}

async fn serve(stream: TcpStream, state: Arc<NodeState>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut in_multi = false;
    let mut queue: Vec<Vec<String>> = Vec::new();
    let mut watched: Vec<(String, Option<Vec<u8>>)> = Vec::new();

    loop {
        let Some(cmd) = read_command(&mut reader).await? else {
            return Ok(());
        };
        if cmd.is_empty() {
            return Ok(());
        }
        if state.refuse.load(Ordering::SeqCst) {
            return Ok(());
        }

        state.commands.lock().unwrap().push(cmd.join(" "));
        let name = cmd[0].to_ascii_uppercase();

        let moved = state.moved.lock().unwrap().clone();
        if let Some((slot, host, port)) = moved {
            if is_data_command(&name) || name == "EXEC" {
                if name == "EXEC" {
                    in_multi = false;
                    queue.clear();
                }
                write_half
                    .write_all(format!("-MOVED {slot} {host}:{port}\r\n").as_bytes())
                    .await?;
                continue;
            }
        }

        let reply = match name.as_str() {
            "AUTH" => "+OK\r\n".to_string(),
            "MULTI" => {
                in_multi = true;
                queue.clear();
                "+OK\r\n".to_string()
            }
            "EXEC" => {
                in_multi = false;
                let queued = std::mem::take(&mut queue);
                if state.fail_exec_once.swap(false, Ordering::SeqCst)
                    || watch_violated(&state, &watched)
                {
                    watched.clear();
                    "*-1\r\n".to_string()
                } else {
                    watched.clear();
                    let mut out = format!("*{}\r\n", queued.len());
                    for queued_cmd in &queued {
                        out.push_str(&execute(&state, queued_cmd));
                    }
                    out
                }
            }
            "DISCARD" => {
                in_multi = false;
                queue.clear();
                "+OK\r\n".to_string()
            }
            "WATCH" => {
                for key in &cmd[1..] {
                    let snapshot = state
                        .entries
                        .lock()
                        .unwrap()
                        .get(key)
                        .map(|e| e.value.clone());
                    watched.push((key.clone(), snapshot));
                }
                "+OK\r\n".to_string()
            }
            "UNWATCH" => {
                watched.clear();
                "+OK\r\n".to_string()
            }
            _ if in_multi => {
                queue.push(cmd);
                "+QUEUED\r\n".to_string()
            }
            _ => execute(&state, &cmd),
        };

        write_half.write_all(reply.as_bytes()).await?;
    }
}

fn is_data_command(name: &str) -> bool {
    matches!(
        name,
        "GET" | "SET" | "INCR" | "EXPIRETIME" | "EXPIREAT" | "UNLINK" | "DEL" | "SCAN"
    )
}

fn watch_violated(state: &NodeState, watched: &[(String, Option<Vec<u8>>)]) -> bool {
    let entries = state.entries.lock().unwrap();
    watched
        .iter()
        .any(|(key, snapshot)| entries.get(key).map(|e| e.value.clone()) != *snapshot)
}

fn execute(state: &NodeState, cmd: &[String]) -> String {
    let name = cmd[0].to_ascii_uppercase();
    match name.as_str() {
        "SET" => {
            let key = cmd[1].clone();
            let value = cmd[2].clone().into_bytes();
            let opts: Vec<String> = cmd[3..].iter().map(|o| o.to_ascii_uppercase()).collect();
            let nx = opts.iter().any(|o| o == "NX");
            let xx = opts.iter().any(|o| o == "XX");
            let keep_ttl = opts.iter().any(|o| o == "KEEPTTL");
            let exat = opts
                .iter()
                .position(|o| o == "EXAT")
                .and_then(|i| cmd.get(3 + i + 1))
                .and_then(|raw| raw.parse::<i64>().ok());

            let mut entries = state.entries.lock().unwrap();
            let existing = entries.get(&key).cloned();
            if nx && existing.is_some() {
                return "$-1\r\n".to_string();
            }
            if xx && existing.is_none() {
                return "$-1\r\n".to_string();
            }
            let expire_at = if keep_ttl {
                existing.map(|e| e.expire_at).unwrap_or(0)
            } else {
                exat.unwrap_or(0)
            };
            entries.insert(key, Entry { value, expire_at });
            "+OK\r\n".to_string()
        }
        "GET" => match state.entries.lock().unwrap().get(&cmd[1]) {
            Some(entry) => bulk(&entry.value),
            None => "$-1\r\n".to_string(),
        },
        "INCR" => {
            let mut entries = state.entries.lock().unwrap();
            let current = entries
                .get(&cmd[1])
                .and_then(|e| std::str::from_utf8(&e.value).ok()?.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + 1;
            let expire_at = entries.get(&cmd[1]).map(|e| e.expire_at).unwrap_or(0);
            entries.insert(
                cmd[1].clone(),
                Entry {
                    value: next.to_string().into_bytes(),
                    expire_at,
                },
            );
            format!(":{next}\r\n")
        }
        "EXPIRETIME" => match state.entries.lock().unwrap().get(&cmd[1]) {
            None => ":-2\r\n".to_string(),
            Some(entry) if entry.expire_at == 0 => ":-1\r\n".to_string(),
            Some(entry) => format!(":{}\r\n", entry.expire_at),
        },
        "EXPIREAT" => {
            let timestamp = cmd[2].parse::<i64>().unwrap_or(0);
            let mut entries = state.entries.lock().unwrap();
            match entries.get_mut(&cmd[1]) {
                Some(entry) => {
                    entry.expire_at = timestamp;
                    ":1\r\n".to_string()
                }
                None => ":0\r\n".to_string(),
            }
        }
        "UNLINK" | "DEL" => {
            let mut entries = state.entries.lock().unwrap();
            let mut removed = 0;
            for key in &cmd[1..] {
                if entries.remove(key).is_some() {
                    removed += 1;
                }
            }
            format!(":{removed}\r\n")
        }
        "SCAN" => {
            let pattern = cmd
                .iter()
                .position(|part| part.eq_ignore_ascii_case("MATCH"))
                .and_then(|i| cmd.get(i + 1))
                .cloned()
                .unwrap_or_else(|| "*".to_string());
            let prefix = pattern.strip_suffix('*').unwrap_or(&pattern).to_string();

            let entries = state.entries.lock().unwrap();
            let mut keys: Vec<&String> =
                entries.keys().filter(|k| k.starts_with(&prefix)).collect();
            keys.sort();

            let mut out = String::from("*2\r\n$1\r\n0\r\n");
            out.push_str(&format!("*{}\r\n", keys.len()));
            for key in keys {
                out.push_str(&bulk(key.as_bytes()));
            }
            out
        }
        "CLUSTER" => {
            let slots = state.slots.lock().unwrap().clone();
            let mut out = format!("*{}\r\n", slots.len());
            for (from, to, host, port) in slots {
                out.push_str(&format!("*3\r\n:{from}\r\n:{to}\r\n*2\r\n"));
                out.push_str(&bulk(host.as_bytes()));
                out.push_str(&format!(":{port}\r\n"));
            }
            out
        }
        other => format!("-ERR unknown command '{other}'\r\n"),
    }
}

fn bulk(data: &[u8]) -> String {
    format!("${}\r\n{}\r\n", data.len(), String::from_utf8_lossy(data))
}

async fn read_command<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> std::io::Result<Option<Vec<String>>> {
    let mut header = String::new();
    if reader.read_line(&mut header).await? == 0 {
        return Ok(None);
    }
    let header = header.trim_end();
    let Some(count) = header.strip_prefix('*').and_then(|n| n.parse::<usize>().ok()) else {
        return Ok(None);
    };

    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let mut len_line = String::new();
        if reader.read_line(&mut len_line).await? == 0 {
            return Ok(None);
        }
        let Some(len) = len_line
            .trim_end()
            .strip_prefix('$')
            .and_then(|n| n.parse::<usize>().ok())
        else {
            return Ok(None);
        };

        let mut payload = vec![0u8; len + 2];
        reader.read_exact(&mut payload).await?;
        payload.truncate(len);
        parts.push(String::from_utf8_lossy(&payload).into_owned());
    }

    Ok(Some(parts))
}
