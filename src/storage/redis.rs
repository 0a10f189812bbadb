//! Redis-Backed Driver
//!
//! A [`Driver`] that delegates expiry to the native key expiry of a
//! Redis-compatible server. It speaks RESP over one lazily-opened TCP
//! connection, pipelining the per-key commands of a batch.
//!
//! | Operation | Commands |
//! |-----------|----------|
//! | `set`     | `MULTI`, `SET k v [EXAT ts]` / `DEL k` per record, `EXEC` |
//! | `has`     | `EXISTS k` per key |
//! | `mget`    | `MGET k...` |
//! | `mexpire` | `EXPIREAT k ts` per key |
//! | `ttl`     | `PTTL k` per key |
//! | `delete`  | `DEL k...` |
//! | `clear`   | `FLUSHDB` |
//!
//! A plain `SET` discards any previous TTL, which is exactly the overwrite
//! rule. A record whose timeout is already in the past becomes `DEL`.
//!
//! ## Failures
//!
//! Any I/O failure drops the connection (the next call reconnects) and is
//! reported as `BackendUnavailable`. An error reply from the server, or a
//! reply that makes no sense, is `BackendInternal`.

use crate::error::{KvError, KvResult};
use crate::item::Record;
use crate::protocol::{ParseError, RespParser, RespValue};
use crate::storage::driver::Driver;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default time allowed to open a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection settings for a Redis-backed storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// `host:port` of the server
    pub addr: String,
    /// Logical database selected after connecting
    pub db: u32,
    pub connect_timeout: Duration,
}

impl RedisConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            db: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Failure while exchanging frames with the server.
#[derive(Debug, thiserror::Error)]
enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad reply: {0}")]
    Parse(#[from] ParseError),

    #[error("connection closed by server")]
    Closed,
}

impl From<TransportError> for KvError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Parse(_) => KvError::BackendInternal(e.to_string()),
            TransportError::Io(_) | TransportError::Closed => {
                KvError::BackendUnavailable(e.to_string())
            }
        }
    }
}

struct RedisConnection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    parser: RespParser,
}

impl RedisConnection {
    async fn connect(config: &RedisConfig) -> KvResult<Self> {
        let connect = TcpStream::connect(&config.addr);
        let stream = match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(KvError::BackendUnavailable(format!(
                    "connect to {}: {}",
                    config.addr, e
                )))
            }
            Err(_) => {
                return Err(KvError::BackendUnavailable(format!(
                    "connect to {} timed out after {}ms",
                    config.addr,
                    config.connect_timeout.as_millis()
                )))
            }
        };
        stream.set_nodelay(true).ok();

        let mut conn = Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
        };

        if config.db != 0 {
            let select = command(vec![Bytes::from_static(b"SELECT"), num(config.db as i64)]);
            let replies = conn.pipeline(&[select]).await?;
            for reply in replies {
                check(reply)?;
            }
        }

        info!(addr = %config.addr, db = config.db, "Connected to redis backend");
        Ok(conn)
    }

    /// Writes every command, then reads exactly one reply per command.
    async fn pipeline(&mut self, commands: &[RespValue]) -> Result<Vec<RespValue>, TransportError> {
        let mut out = Vec::new();
        for cmd in commands {
            cmd.serialize_into(&mut out);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;

        let mut replies = Vec::with_capacity(commands.len());
        while replies.len() < commands.len() {
            replies.push(self.read_reply().await?);
        }
        Ok(replies)
    }

    async fn read_reply(&mut self) -> Result<RespValue, TransportError> {
        loop {
            if let Some((value, consumed)) = self.parser.parse(&self.buffer)? {
                let _ = self.buffer.split_to(consumed);
                return Ok(value);
            }

            if self.stream.get_mut().read_buf(&mut self.buffer).await? == 0 {
                return Err(TransportError::Closed);
            }
        }
    }
}

/// The Redis-backed driver.
pub struct RedisDriver {
    config: RedisConfig,
    conn: Mutex<Option<RedisConnection>>,
}

impl std::fmt::Debug for RedisDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDriver")
            .field("addr", &self.config.addr)
            .field("db", &self.config.db)
            .finish()
    }
}

impl RedisDriver {
    /// Creates the driver. No connection is opened until the first call.
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            conn: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Sends `commands` as one pipeline and returns the raw replies.
    async fn execute(&self, commands: Vec<RespValue>) -> KvResult<Vec<RespValue>> {
        let mut guard = self.conn.lock().await;

        // Out of the slot while replies are pending: if this future is
        // dropped mid-pipeline the socket goes with it.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => RedisConnection::connect(&self.config).await?,
        };

        match conn.pipeline(&commands).await {
            Ok(replies) => {
                *guard = Some(conn);
                Ok(replies)
            }
            Err(e) => {
                warn!(addr = %self.config.addr, error = %e, "Redis connection failed, dropping it");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl Driver for RedisDriver {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn set(&self, records: Vec<Record>) -> KvResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let count = records.len();

        let mut commands = Vec::with_capacity(count + 2);
        commands.push(command(vec![Bytes::from_static(b"MULTI")]));
        commands.extend(records.into_iter().map(|r| set_command(r, now)));
        commands.push(command(vec![Bytes::from_static(b"EXEC")]));

        let mut replies = self.execute(commands).await?;

        // MULTI and every queued command must be acknowledged before EXEC
        let exec = replies.pop().ok_or_else(|| unexpected("EXEC", &RespValue::Null))?;
        for reply in replies {
            check(reply)?;
        }

        match check(exec)? {
            RespValue::Array(results) if results.len() == count => {
                for result in results {
                    check(result)?;
                }
                Ok(())
            }
            RespValue::Null => Err(KvError::BackendInternal(
                "transaction aborted".to_string(),
            )),
            other => Err(unexpected("EXEC", &other)),
        }
    }

    async fn has(&self, keys: &[String]) -> KvResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let commands = keys
            .iter()
            .map(|k| command(vec![Bytes::from_static(b"EXISTS"), key(k)]))
            .collect();
        let replies = self.execute(commands).await?;

        let mut found = Vec::new();
        for (k, reply) in keys.iter().zip(replies) {
            match check(reply)? {
                RespValue::Integer(1) => found.push(k.clone()),
                RespValue::Integer(0) => {}
                other => return Err(unexpected("EXISTS", &other)),
            }
        }
        Ok(found)
    }

    async fn mget(&self, keys: &[String]) -> KvResult<Vec<(String, Bytes)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut parts = vec![Bytes::from_static(b"MGET")];
        parts.extend(keys.iter().map(|k| key(k)));

        let mut replies = self.execute(vec![command(parts)]).await?;
        let reply = check(replies.pop().unwrap_or(RespValue::Null))?;

        let values = match reply {
            RespValue::Array(values) if values.len() == keys.len() => values,
            other => return Err(unexpected("MGET", &other)),
        };

        let mut found = Vec::new();
        for (k, value) in keys.iter().zip(values) {
            match value {
                RespValue::BulkString(v) => found.push((k.clone(), v)),
                RespValue::Null => {}
                other => return Err(unexpected("MGET", &other)),
            }
        }
        Ok(found)
    }

    async fn mexpire(&self, deadlines: Vec<(String, DateTime<Utc>)>) -> KvResult<()> {
        if deadlines.is_empty() {
            return Ok(());
        }

        let commands = deadlines
            .iter()
            .map(|(k, at)| {
                command(vec![
                    Bytes::from_static(b"EXPIREAT"),
                    key(k),
                    num(at.timestamp()),
                ])
            })
            .collect();

        for reply in self.execute(commands).await? {
            // 1 = applied, 0 = key absent (a no-op by contract)
            match check(reply)? {
                RespValue::Integer(0 | 1) => {}
                other => return Err(unexpected("EXPIREAT", &other)),
            }
        }
        Ok(())
    }

    async fn ttl(&self, keys: &[String]) -> KvResult<Vec<(String, Duration)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let commands = keys
            .iter()
            .map(|k| command(vec![Bytes::from_static(b"PTTL"), key(k)]))
            .collect();
        let replies = self.execute(commands).await?;

        let mut found = Vec::new();
        for (k, reply) in keys.iter().zip(replies) {
            match check(reply)? {
                // -2 = absent, -1 = no expiry
                RespValue::Integer(ms) if ms > 0 => {
                    found.push((k.clone(), Duration::from_millis(ms as u64)))
                }
                RespValue::Integer(_) => {}
                other => return Err(unexpected("PTTL", &other)),
            }
        }
        Ok(found)
    }

    async fn delete(&self, keys: &[String]) -> KvResult<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut parts = vec![Bytes::from_static(b"DEL")];
        parts.extend(keys.iter().map(|k| key(k)));

        for reply in self.execute(vec![command(parts)]).await? {
            check(reply)?;
        }
        Ok(())
    }

    async fn clear(&self) -> KvResult<()> {
        let replies = self
            .execute(vec![command(vec![Bytes::from_static(b"FLUSHDB")])])
            .await?;
        for reply in replies {
            check(reply)?;
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.stream.shutdown().await {
                debug!(addr = %self.config.addr, error = %e, "Error closing redis connection");
            }
        }
    }
}

fn command(parts: Vec<Bytes>) -> RespValue {
    RespValue::Array(parts.into_iter().map(RespValue::BulkString).collect())
}

fn key(k: &str) -> Bytes {
    Bytes::copy_from_slice(k.as_bytes())
}

fn num(n: i64) -> Bytes {
    Bytes::from(n.to_string())
}

/// The command that applies one record inside the `set` transaction.
fn set_command(record: Record, now: DateTime<Utc>) -> RespValue {
    match record.expires_at {
        None => command(vec![
            Bytes::from_static(b"SET"),
            Bytes::from(record.key),
            record.value,
        ]),
        Some(at) if at > now => command(vec![
            Bytes::from_static(b"SET"),
            Bytes::from(record.key),
            record.value,
            Bytes::from_static(b"EXAT"),
            num(at.timestamp()),
        ]),
        // Already expired: the key must read as absent
        Some(_) => command(vec![Bytes::from_static(b"DEL"), Bytes::from(record.key)]),
    }
}

/// Turns an error reply into `BackendInternal`.
fn check(reply: RespValue) -> KvResult<RespValue> {
    match reply {
        RespValue::Error(msg) => Err(KvError::BackendInternal(msg)),
        other => Ok(other),
    }
}

fn unexpected(cmd: &str, reply: &RespValue) -> KvError {
    KvError::BackendInternal(format!("unexpected {} reply: {}", cmd, reply.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    type Db = Arc<std::sync::Mutex<HashMap<String, (Bytes, Option<i64>)>>>;

    /// Minimal Redis stand-in covering the commands the driver sends.
    async fn fake_redis() -> (String, Db) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let db: Db = Default::default();

        let shared = Arc::clone(&db);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let db = Arc::clone(&shared);
                tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    let mut queued: Option<Vec<Vec<String>>> = None;
                    loop {
                        while let Some((frame, n)) = RespParser::new().parse(&buf).unwrap() {
                            let _ = buf.split_to(n);
                            let args: Vec<String> = frame
                                .into_array()
                                .unwrap()
                                .iter()
                                .map(|v| v.as_str().unwrap().to_string())
                                .collect();

                            let reply = if args[0] == "MULTI" {
                                queued = Some(Vec::new());
                                RespValue::ok()
                            } else if args[0] == "EXEC" {
                                match queued.take() {
                                    Some(cmds) => RespValue::array(
                                        cmds.iter().map(|c| apply(&db, c)).collect(),
                                    ),
                                    None => RespValue::error("ERR EXEC without MULTI"),
                                }
                            } else if let Some(q) = queued.as_mut() {
                                q.push(args);
                                RespValue::simple_string("QUEUED")
                            } else {
                                apply(&db, &args)
                            };
                            stream.write_all(&reply.serialize()).await.unwrap();
                        }
                        if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                            return;
                        }
                    }
                });
            }
        });

        (addr, db)
    }

    fn apply(db: &Db, args: &[String]) -> RespValue {
        let now = Utc::now().timestamp();
        let mut db = db.lock().unwrap();
        db.retain(|_, (_, exp)| exp.map(|e| e > now).unwrap_or(true));

        match args[0].as_str() {
            "FLUSHDB" => {
                db.clear();
                RespValue::ok()
            }
            "SELECT" => RespValue::ok(),
            "SET" => {
                let exp = args.get(4).map(|s| s.parse().unwrap());
                db.insert(args[1].clone(), (Bytes::from(args[2].clone()), exp));
                RespValue::ok()
            }
            "DEL" => RespValue::integer(
                args[1..].iter().filter(|k| db.remove(*k).is_some()).count() as i64,
            ),
            "EXISTS" => RespValue::integer(db.contains_key(&args[1]) as i64),
            "MGET" => RespValue::array(
                args[1..]
                    .iter()
                    .map(|k| match db.get(k) {
                        Some((v, _)) => RespValue::bulk_string(v.clone()),
                        None => RespValue::null(),
                    })
                    .collect(),
            ),
            "EXPIREAT" => match db.get_mut(&args[1]) {
                Some(entry) => {
                    entry.1 = Some(args[2].parse().unwrap());
                    RespValue::integer(1)
                }
                None => RespValue::integer(0),
            },
            "PTTL" => match db.get(&args[1]) {
                Some((_, Some(exp))) => RespValue::integer((exp - now) * 1000),
                Some((_, None)) => RespValue::integer(-1),
                None => RespValue::integer(-2),
            },
            other => RespValue::error(format!("ERR unknown command '{}'", other)),
        }
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_command_shapes() {
        let now = Utc::now();

        let plain = set_command(Record::new("a", "aa"), now);
        assert_eq!(plain, RespValue::command(["SET", "a", "aa"]));

        let at = now + TimeDelta::seconds(30);
        let expiring = set_command(Record::expiring("c", "cc", at), now);
        assert_eq!(
            expiring,
            command(vec![
                Bytes::from("SET"),
                Bytes::from("c"),
                Bytes::from("cc"),
                Bytes::from("EXAT"),
                num(at.timestamp()),
            ])
        );

        let past = set_command(Record::expiring("old", "x", now - TimeDelta::seconds(1)), now);
        assert_eq!(past, RespValue::command(["DEL", "old"]));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_unavailable() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let driver = RedisDriver::new(RedisConfig::new(addr));
        let err = driver.has(&keys(&["a"])).await.unwrap_err();

        assert!(matches!(err, KvError::BackendUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_round_trip_against_backend() {
        let (addr, _db) = fake_redis().await;
        let driver = RedisDriver::new(RedisConfig::new(addr));

        driver
            .set(vec![
                Record::new("a", "aa"),
                Record::new("b", "bb"),
                Record::expiring("c", "cc", Utc::now() + TimeDelta::seconds(60)),
                Record::expiring("gone", "x", Utc::now() - TimeDelta::seconds(1)),
            ])
            .await
            .unwrap();

        let probe = keys(&["a", "b", "c", "gone"]);
        assert_eq!(driver.has(&probe).await.unwrap(), keys(&["a", "b", "c"]));
        assert_eq!(
            driver.mget(&keys(&["a", "missing"])).await.unwrap(),
            vec![("a".to_string(), Bytes::from("aa"))]
        );

        let ttls = driver.ttl(&probe).await.unwrap();
        assert_eq!(ttls.len(), 1);
        assert_eq!(ttls[0].0, "c");
        assert!(ttls[0].1 <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_mexpire_delete_clear() {
        let (addr, db) = fake_redis().await;
        let driver = RedisDriver::new(RedisConfig::new(addr));

        driver
            .set(vec![Record::new("a", "aa"), Record::new("e", "ee")])
            .await
            .unwrap();

        let at = Utc::now() + TimeDelta::seconds(10);
        driver
            .mexpire(vec![("a".to_string(), at), ("ghost".to_string(), at)])
            .await
            .unwrap();
        assert_eq!(driver.ttl(&keys(&["a", "ghost"])).await.unwrap().len(), 1);
        assert!(!db.lock().unwrap().contains_key("ghost"));

        driver.delete(&keys(&["e", "never"])).await.unwrap();
        assert!(driver.has(&keys(&["e"])).await.unwrap().is_empty());

        driver.clear().await.unwrap();
        assert!(db.lock().unwrap().is_empty());

        driver.close().await;
        // Reconnects transparently after close
        assert!(driver.has(&keys(&["a"])).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_reply_is_internal() {
        let (addr, _db) = fake_redis().await;
        let mut config = RedisConfig::new(addr);
        config.db = 3;
        let driver = RedisDriver::new(config);

        // An empty batch never touches the wire
        assert!(driver.mget(&[]).await.unwrap().is_empty());

        // Connecting issues SELECT 3 first, then the unknown command fails
        let replies = driver.execute(vec![RespValue::command(["BOGUS"])]).await.unwrap();
        assert!(matches!(
            check(replies[0].clone()),
            Err(KvError::BackendInternal(_))
        ));
    }

    /// Backend that answers `EXISTS slow` late with `:1` and every other
    /// key at once with `:0`.
    async fn slow_redis() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = BytesMut::new();
                    loop {
                        while let Some((frame, n)) = RespParser::new().parse(&buf).unwrap() {
                            let _ = buf.split_to(n);
                            let slow = frame
                                .into_array()
                                .unwrap()
                                .get(1)
                                .and_then(|k| k.as_str().map(|k| k == "slow"))
                                .unwrap_or(false);
                            let reply = if slow {
                                tokio::time::sleep(Duration::from_millis(200)).await;
                                RespValue::integer(1)
                            } else {
                                RespValue::integer(0)
                            };
                            if stream.write_all(&reply.serialize()).await.is_err() {
                                return;
                            }
                        }
                        if stream.read_buf(&mut buf).await.unwrap_or(0) == 0 {
                            return;
                        }
                    }
                });
            }
        });

        (addr, accepted)
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_leak_replies() {
        let (addr, accepted) = slow_redis().await;
        let driver = RedisDriver::new(RedisConfig::new(addr));

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), driver.has(&keys(&["slow"]))).await;
        assert!(cancelled.is_err());

        // The late `:1` must not be read as the answer for another key
        assert!(driver.has(&keys(&["absent"])).await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(driver.has(&keys(&["absent"])).await.unwrap().is_empty());

        assert_eq!(accepted.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
