//! Shared test fixtures: a scripted in-process sentinel server, a
//! recording pool adapter, and a scripted resolver.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::address::RedisUri;
use crate::error::{Error, Result};
use crate::pool::{FreezeReason, PoolAdapter, TopologySnapshot};
use crate::resolver::NameResolver;
use crate::resp::{self, ParseError, RespValue};

// =============================================================================
// Scripted sentinel server
// =============================================================================

/// Mutable topology a scripted sentinel reports. Shared across listeners
/// so a whole mock fleet answers consistently.
#[derive(Default)]
pub(crate) struct MockSentinelState {
    pub master: Mutex<Option<(String, u16)>>,
    pub replicas: Mutex<Vec<Vec<(String, String)>>>,
    pub sentinels: Mutex<Vec<Vec<(String, String)>>>,
    pub password: Mutex<Option<String>>,
}

impl MockSentinelState {
    pub fn with_master(host: &str, port: u16) -> Arc<Self> {
        let state = Self::default();
        *state.master.lock() = Some((host.to_string(), port));
        Arc::new(state)
    }

    pub fn set_master(&self, host: &str, port: u16) {
        *self.master.lock() = Some((host.to_string(), port));
    }

    pub fn set_replicas(&self, entries: Vec<Vec<(String, String)>>) {
        *self.replicas.lock() = entries;
    }

    pub fn set_sentinel_addrs(&self, addrs: &[SocketAddr]) {
        *self.sentinels.lock() = addrs
            .iter()
            .map(|a| {
                kv(&[
                    ("ip", &a.ip().to_string()),
                    ("port", &a.port().to_string()),
                    ("flags", "sentinel"),
                ])
            })
            .collect();
    }
}

/// Field-map helper for replica/sentinel entries.
pub(crate) fn kv(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// A healthy replica entry pointing at the given master.
pub(crate) fn replica_entry(ip: &str, port: u16, master: (&str, u16)) -> Vec<(String, String)> {
    kv(&[
        ("ip", ip),
        ("port", &port.to_string()),
        ("flags", "slave"),
        ("master-link-status", "ok"),
        ("master-host", master.0),
        ("master-port", &master.1.to_string()),
    ])
}

/// Bind a scripted sentinel on `addr` ("127.0.0.1:0" for an ephemeral
/// port) and serve the shared state until the test ends.
pub(crate) async fn spawn_sentinel(addr: &str, state: Arc<MockSentinelState>) -> SocketAddr {
    let listener = TcpListener::bind(addr).await.unwrap();
    let local = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(serve_connection(stream, state.clone()));
        }
    });
    local
}

async fn serve_connection(mut stream: TcpStream, state: Arc<MockSentinelState>) {
    let mut buffer = BytesMut::with_capacity(1024);
    let mut authed = state.password.lock().is_none();

    loop {
        let command = loop {
            match resp::parse_reply(&buffer) {
                Ok((value, consumed)) => {
                    let _ = buffer.split_to(consumed);
                    break value;
                }
                Err(ParseError::Incomplete) => match stream.read_buf(&mut buffer).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                },
                Err(_) => return,
            }
        };

        let args = match flatten_args(&command) {
            Some(args) => args,
            None => return,
        };
        let reply = respond(&args, &state, &mut authed);
        if stream.write_all(&reply.serialize()).await.is_err() {
            return;
        }
    }
}

fn flatten_args(command: &RespValue) -> Option<Vec<String>> {
    let RespValue::Array(items) = command else {
        return None;
    };
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn respond(args: &[String], state: &MockSentinelState, authed: &mut bool) -> RespValue {
    let name = args.first().map(|s| s.to_uppercase()).unwrap_or_default();

    if name == "AUTH" {
        let expected = state.password.lock().clone();
        return match (expected, args.get(1)) {
            (Some(password), Some(given)) if &password == given => {
                *authed = true;
                RespValue::SimpleString(Bytes::from_static(b"OK"))
            }
            _ => RespValue::Error(Bytes::from_static(b"ERR invalid password")),
        };
    }
    if !*authed {
        return RespValue::Error(Bytes::from_static(b"NOAUTH Authentication required."));
    }

    match name.as_str() {
        "PING" => RespValue::SimpleString(Bytes::from_static(b"PONG")),
        "SENTINEL" => {
            let sub = args.get(1).map(|s| s.to_uppercase()).unwrap_or_default();
            match sub.as_str() {
                "GET-MASTER-ADDR-BY-NAME" => match state.master.lock().clone() {
                    Some((host, port)) => RespValue::Array(vec![
                        bulk(&host),
                        bulk(&port.to_string()),
                    ]),
                    None => RespValue::Null,
                },
                "SLAVES" => entries_reply(&state.replicas.lock()),
                "SENTINELS" => entries_reply(&state.sentinels.lock()),
                _ => RespValue::Error(Bytes::from_static(b"ERR unknown SENTINEL subcommand")),
            }
        }
        _ => RespValue::Error(Bytes::from_static(b"ERR unknown command")),
    }
}

fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

fn entries_reply(entries: &[Vec<(String, String)>]) -> RespValue {
    RespValue::Array(
        entries
            .iter()
            .map(|fields| {
                RespValue::Array(
                    fields
                        .iter()
                        .flat_map(|(k, v)| [bulk(k), bulk(v)])
                        .collect(),
                )
            })
            .collect(),
    )
}

// =============================================================================
// Recording pool adapter
// =============================================================================

/// Pool adapter that records every call for assertions.
#[derive(Default)]
pub(crate) struct MockPool {
    pub master: Mutex<Option<RedisUri>>,
    /// replica -> up
    pub replicas: Mutex<HashMap<RedisUri, bool>>,
    pub events: Mutex<Vec<String>>,
    pub fail_change_master: AtomicBool,
    pub init_snapshot: Mutex<Option<TopologySnapshot>>,
}

impl MockPool {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count_events(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl PoolAdapter for MockPool {
    async fn init(&self, snapshot: &TopologySnapshot) -> Result<()> {
        self.record("init".to_string());
        *self.master.lock() = Some(snapshot.master.clone());
        let mut replicas = self.replicas.lock();
        for replica in &snapshot.replicas {
            let up = !snapshot.disconnected_replicas.contains(replica);
            replicas.insert(replica.clone(), up);
        }
        *self.init_snapshot.lock() = Some(snapshot.clone());
        Ok(())
    }

    async fn change_master(&self, new_master: RedisUri) -> Result<()> {
        self.record(format!("change_master {}", new_master));
        if self.fail_change_master.load(Ordering::Acquire) {
            return Err(Error::PoolRejected(new_master, "scripted failure".into()));
        }
        *self.master.lock() = Some(new_master);
        Ok(())
    }

    async fn add_replica(&self, uri: RedisUri) -> Result<()> {
        self.record(format!("add_replica {}", uri));
        self.replicas.lock().insert(uri, true);
        Ok(())
    }

    fn has_replica(&self, uri: &RedisUri) -> bool {
        self.replicas.lock().contains_key(uri)
    }

    fn replica_down(&self, uri: &RedisUri, _reason: FreezeReason) -> bool {
        let mut replicas = self.replicas.lock();
        match replicas.get_mut(uri) {
            Some(up) if *up => {
                *up = false;
                drop(replicas);
                self.record(format!("replica_down {}", uri));
                true
            }
            _ => false,
        }
    }

    fn replica_up(&self, uri: &RedisUri, _reason: FreezeReason) -> bool {
        let mut replicas = self.replicas.lock();
        match replicas.get_mut(uri) {
            Some(up) if !*up => {
                *up = true;
                drop(replicas);
                self.record(format!("replica_up {}", uri));
                true
            }
            _ => false,
        }
    }

    fn is_replica_unfrozen(&self, uri: &RedisUri) -> bool {
        self.replicas.lock().get(uri).copied().unwrap_or(false)
    }

    fn replica_endpoints(&self) -> Vec<RedisUri> {
        self.replicas.lock().keys().cloned().collect()
    }

    async fn shutdown(&self) {
        self.record("shutdown".to_string());
    }
}

// =============================================================================
// Scripted resolver
// =============================================================================

/// Resolver answering from an in-memory host table; literal IPs resolve
/// to themselves.
#[derive(Default)]
pub(crate) struct ScriptedResolver {
    hosts: Mutex<HashMap<String, Vec<IpAddr>>>,
}

impl ScriptedResolver {
    pub fn set(&self, host: &str, addrs: &[&str]) {
        self.hosts.lock().insert(
            host.to_string(),
            addrs.iter().map(|a| a.parse().unwrap()).collect(),
        );
    }
}

#[async_trait]
impl NameResolver for ScriptedResolver {
    async fn resolve_one(&self, host: &str, port: u16) -> std::io::Result<SocketAddr> {
        self.resolve_all(host, port).await?.into_iter().next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {host}"))
        })
    }

    async fn resolve_all(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }
        match self.hosts.lock().get(host) {
            Some(addrs) => Ok(addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unknown host {host}"),
            )),
        }
    }
}
