//! Sentinel client.
//!
//! Typed wrapper over one Sentinel node speaking the four commands the
//! topology manager needs: `PING`, `SENTINEL GET-MASTER-ADDR-BY-NAME`,
//! `SENTINEL SLAVES`, and `SENTINEL SENTINELS`. A client keeps one cached
//! connection; any command failure drops it so the next call reconnects.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::address::RedisUri;
use crate::error::{Error, Result};
use crate::resolver::NameResolver;
use crate::resp::{self, ParseError, RespValue};

/// Connection budgets, credentials, and the resolver shared by all
/// sentinel clients of a manager instance.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// `AUTH` password sent right after connecting; `None` when the auth
    /// probe decided the sentinels are open.
    pub password: Option<String>,
    pub resolver: Arc<dyn NameResolver>,
}

/// One discovered replica or sentinel, as reported by `SENTINEL SLAVES` /
/// `SENTINEL SENTINELS`: a flat field map keyed by the documented names
/// (`ip`, `port`, `flags`, `master-link-status`, `master-host`, ...).
#[derive(Debug, Clone, Default)]
pub struct InstanceInfo {
    fields: HashMap<String, String>,
}

impl InstanceInfo {
    /// Build from a RESP array of alternating key/value bulk strings.
    pub fn from_resp(value: &RespValue) -> Option<Self> {
        let RespValue::Array(items) = value else {
            return None;
        };
        let mut fields = HashMap::with_capacity(items.len() / 2);
        for pair in items.chunks_exact(2) {
            let (Some(key), Some(value)) = (pair[0].as_str(), pair[1].as_str()) else {
                continue;
            };
            fields.insert(key.to_string(), value.to_string());
        }
        Some(Self { fields })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Reported `ip`/`port`, if both are present and the port parses.
    pub fn addr(&self) -> Option<(&str, u16)> {
        let ip = self.get("ip")?;
        let port = self.get("port")?.parse().ok()?;
        Some((ip, port))
    }

    pub fn flags(&self) -> &str {
        self.get("flags").unwrap_or("")
    }

    pub fn master_link_status(&self) -> &str {
        self.get("master-link-status").unwrap_or("")
    }

    pub fn master_host(&self) -> Option<&str> {
        self.get("master-host")
    }

    pub fn master_port(&self) -> Option<u16> {
        self.get("master-port")?.parse().ok()
    }
}

/// Replica down predicate.
///
/// Down iff `flags` carries `s_down` or `disconnected`; with `check_sync`
/// a non-empty `master-link-status` containing `err` also counts.
pub fn is_replica_down(flags: &str, master_link_status: &str, check_sync: bool) -> bool {
    let base = flags.contains("s_down") || flags.contains("disconnected");
    if check_sync && !master_link_status.is_empty() {
        return base || master_link_status.contains("err");
    }
    base
}

/// A single framed connection to a Sentinel.
struct SentinelConnection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl SentinelConnection {
    async fn open(uri: &RedisUri, settings: &ConnectionSettings) -> Result<Self> {
        let target: SocketAddr = match uri.socket_addr() {
            Some(addr) => addr,
            None => settings
                .resolver
                .resolve_one(uri.host(), uri.port())
                .await
                .map_err(|_| Error::Resolution(uri.host().to_string()))?,
        };
        let stream = timeout(settings.connect_timeout, TcpStream::connect(target))
            .await
            .map_err(|_| Error::Timeout("connect"))?
            .map_err(|e| Error::Connection(uri.clone(), e.to_string()))?;
        stream.set_nodelay(true)?;

        let mut conn = Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        };

        if let Some(password) = &settings.password {
            let reply = conn
                .roundtrip(&[b"AUTH".as_slice(), password.as_bytes()], settings.timeout)
                .await?;
            check_reply_error(uri, reply)?;
        }

        Ok(conn)
    }

    /// Write one command and read one reply, within the command budget.
    async fn roundtrip(&mut self, args: &[&[u8]], budget: Duration) -> Result<RespValue> {
        let frame = resp::encode_command(args);
        timeout(budget, async {
            self.stream.write_all(&frame).await?;
            loop {
                match resp::parse_reply(&self.buffer) {
                    Ok((value, consumed)) => {
                        let _ = self.buffer.split_to(consumed);
                        return Ok(value);
                    }
                    Err(ParseError::Incomplete) => {
                        let n = self.stream.read_buf(&mut self.buffer).await?;
                        if n == 0 {
                            return Err(Error::Io(std::io::Error::new(
                                std::io::ErrorKind::UnexpectedEof,
                                "connection closed",
                            )));
                        }
                    }
                    Err(e) => return Err(Error::Protocol(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| Error::Timeout("command"))?
    }
}

/// Map an error reply into a crate error, letting data replies through.
fn check_reply_error(uri: &RedisUri, reply: RespValue) -> Result<RespValue> {
    if let RespValue::Error(e) = &reply {
        let message = String::from_utf8_lossy(e).into_owned();
        if message.starts_with("NOAUTH") || message.contains("operation not permitted") {
            return Err(Error::AuthRequired(uri.clone()));
        }
        return Err(Error::Reply(message));
    }
    Ok(reply)
}

/// Client handle for one Sentinel node.
pub struct SentinelClient {
    uri: RedisUri,
    declared_host: Option<String>,
    settings: ConnectionSettings,
    conn: Mutex<Option<SentinelConnection>>,
}

impl SentinelClient {
    /// `declared_host` is the hostname this sentinel was seeded or
    /// discovered by, when it was not a literal IP; kept for DNS
    /// monitoring.
    pub fn new(uri: RedisUri, declared_host: Option<String>, settings: ConnectionSettings) -> Self {
        Self {
            uri,
            declared_host,
            settings,
            conn: Mutex::new(None),
        }
    }

    #[inline]
    pub fn uri(&self) -> &RedisUri {
        &self.uri
    }

    #[inline]
    pub fn declared_host(&self) -> Option<&str> {
        self.declared_host.as_deref()
    }

    /// Run one command against the cached connection, opening it on
    /// demand. Errors drop the connection.
    async fn command(&self, args: &[&[u8]]) -> Result<RespValue> {
        let mut guard = self.conn.lock().await;
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => SentinelConnection::open(&self.uri, &self.settings).await?,
        };
        let result = conn
            .roundtrip(args, self.settings.timeout)
            .await
            .and_then(|reply| check_reply_error(&self.uri, reply));
        if result.is_ok() {
            *guard = Some(conn);
        }
        result
    }

    pub async fn ping(&self) -> Result<()> {
        let reply = self.command(&[b"PING".as_slice()]).await?;
        match reply.as_str() {
            Some("PONG") => Ok(()),
            _ => Err(Error::Protocol(format!("unexpected PING reply: {:?}", reply))),
        }
    }

    /// `SENTINEL GET-MASTER-ADDR-BY-NAME <name>`; `None` when the master
    /// is unknown to this sentinel.
    pub async fn get_master_addr(&self, master_name: &str) -> Result<Option<(String, u16)>> {
        let reply = self
            .command(&[
                b"SENTINEL".as_slice(),
                b"GET-MASTER-ADDR-BY-NAME".as_slice(),
                master_name.as_bytes(),
            ])
            .await?;
        match reply {
            RespValue::Null => Ok(None),
            RespValue::Array(items) if items.len() == 2 => {
                let host = items[0]
                    .as_str()
                    .ok_or_else(|| Error::Protocol("master addr host is not a string".into()))?;
                let port = items[1]
                    .as_str()
                    .and_then(|p| p.parse().ok())
                    .ok_or_else(|| Error::Protocol("master addr port is not a number".into()))?;
                Ok(Some((host.to_string(), port)))
            }
            other => Err(Error::Protocol(format!(
                "unexpected GET-MASTER-ADDR-BY-NAME reply: {:?}",
                other
            ))),
        }
    }

    /// `SENTINEL SLAVES <name>`.
    pub async fn replicas(&self, master_name: &str) -> Result<Vec<InstanceInfo>> {
        self.instance_list(&[b"SENTINEL".as_slice(), b"SLAVES".as_slice(), master_name.as_bytes()])
            .await
    }

    /// `SENTINEL SENTINELS <name>`.
    pub async fn sentinels(&self, master_name: &str) -> Result<Vec<InstanceInfo>> {
        self.instance_list(&[
            b"SENTINEL".as_slice(),
            b"SENTINELS".as_slice(),
            master_name.as_bytes(),
        ])
        .await
    }

    async fn instance_list(&self, args: &[&[u8]]) -> Result<Vec<InstanceInfo>> {
        let reply = self.command(args).await?;
        match reply {
            RespValue::Null => Ok(Vec::new()),
            RespValue::Array(items) => Ok(items
                .iter()
                .filter_map(InstanceInfo::from_resp)
                .collect()),
            other => Err(Error::Protocol(format!(
                "expected instance list, got {:?}",
                other
            ))),
        }
    }

    /// Drop the cached connection, if any.
    pub async fn shutdown(&self) {
        let mut guard = self.conn.lock().await;
        if guard.take().is_some() {
            log::debug!("sentinel {} connection closed", self.uri);
        }
    }
}

impl std::fmt::Debug for SentinelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelClient")
            .field("uri", &self.uri)
            .field("declared_host", &self.declared_host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    #[test]
    fn test_instance_info_from_resp() {
        let value = RespValue::Array(vec![
            bulk("ip"),
            bulk("10.0.0.3"),
            bulk("port"),
            bulk("6379"),
            bulk("flags"),
            bulk("slave"),
            bulk("master-link-status"),
            bulk("ok"),
        ]);
        let info = InstanceInfo::from_resp(&value).unwrap();
        assert_eq!(info.addr(), Some(("10.0.0.3", 6379)));
        assert_eq!(info.flags(), "slave");
        assert_eq!(info.master_link_status(), "ok");
        assert!(!info.is_empty());
    }

    #[test]
    fn test_instance_info_empty_and_bad_port() {
        let info = InstanceInfo::from_resp(&RespValue::Array(vec![])).unwrap();
        assert!(info.is_empty());
        assert_eq!(info.addr(), None);

        let value = RespValue::Array(vec![bulk("ip"), bulk("10.0.0.3"), bulk("port"), bulk("x")]);
        let info = InstanceInfo::from_resp(&value).unwrap();
        assert_eq!(info.addr(), None);
    }

    #[test]
    fn test_is_replica_down_flags() {
        assert!(!is_replica_down("slave", "", false));
        assert!(is_replica_down("slave,s_down", "", false));
        assert!(is_replica_down("slave,disconnected", "", false));
        assert!(is_replica_down("s_down,disconnected", "", false));
    }

    #[test]
    fn test_is_replica_down_check_sync() {
        // check_sync only extends the predicate when the status is non-empty
        assert!(!is_replica_down("slave", "", true));
        assert!(!is_replica_down("slave", "ok", true));
        assert!(is_replica_down("slave", "err", true));
        assert!(is_replica_down("slave,s_down", "ok", true));
        // without check_sync the link status is ignored entirely
        assert!(!is_replica_down("slave", "err", false));
    }

    #[test]
    fn test_is_replica_down_monotone() {
        // strengthening either argument never flips down -> up
        for check_sync in [false, true] {
            for (weak, strong) in [("slave", "slave,s_down"), ("slave", "slave,disconnected")] {
                for mls in ["", "ok", "err"] {
                    if is_replica_down(weak, mls, check_sync) {
                        assert!(is_replica_down(strong, mls, check_sync));
                    }
                }
            }
            if is_replica_down("slave", "ok", check_sync) {
                assert!(is_replica_down("slave", "err", check_sync));
            }
        }
    }

    #[test]
    fn test_check_reply_error() {
        let uri = RedisUri::parse("redis://127.0.0.1:26379").unwrap();
        let auth = RespValue::Error(Bytes::from_static(b"NOAUTH Authentication required."));
        assert!(matches!(
            check_reply_error(&uri, auth),
            Err(Error::AuthRequired(_))
        ));

        let other = RespValue::Error(Bytes::from_static(b"ERR unknown command"));
        assert!(matches!(check_reply_error(&uri, other), Err(Error::Reply(_))));

        let ok = RespValue::SimpleString(Bytes::from_static(b"OK"));
        assert!(check_reply_error(&uri, ok).is_ok());
    }
}
