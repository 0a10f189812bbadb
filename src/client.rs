//! Batch RPC Client
//!
//! A small async client for the batch protocol. One request is in flight
//! per client at a time; open several clients for concurrency.
//!
//! ```no_run
//! use kvplug::client::KvClient;
//! use kvplug::item::Item;
//!
//! # async fn demo() -> Result<(), kvplug::client::ClientError> {
//! let mut client = KvClient::connect("127.0.0.1:6001").await?;
//! client.set("memory", vec![Item::new("name", "Ariz")]).await?;
//! let found = client.has("memory", ["name", "missing"]).await?;
//! assert_eq!(found, vec!["name".to_string()]);
//! # Ok(())
//! # }
//! ```

use crate::error::KvError;
use crate::item::{format_timestamp, Item, Method, Request, Response};
use crate::protocol::{decode_response, encode_request, ParseError, RespParser};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

/// Errors seen by a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad reply: {0}")]
    Parse(#[from] ParseError),

    #[error("connection closed by server")]
    Closed,

    /// The server answered the request with an error
    #[error(transparent)]
    Server(#[from] KvError),
}

pub struct KvClient {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
    parser: RespParser,
}

impl KvClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();

        Ok(Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(4096),
            parser: RespParser::new(),
        })
    }

    /// Sends one request and waits for its reply.
    pub async fn call(&mut self, method: Method, request: &Request) -> Result<Response, ClientError> {
        let bytes = encode_request(method, request).serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        trace!(method = %method, storage = %request.storage, bytes = bytes.len(), "Sent request");

        loop {
            if let Some((frame, consumed)) = self.parser.parse(&self.buffer)? {
                let _ = self.buffer.split_to(consumed);
                return Ok(decode_response(frame)?);
            }

            if self.stream.get_mut().read_buf(&mut self.buffer).await? == 0 {
                return Err(ClientError::Closed);
            }
        }
    }

    pub async fn set(&mut self, storage: &str, items: Vec<Item>) -> Result<(), ClientError> {
        self.call(Method::Set, &Request::new(storage, items)).await?;
        Ok(())
    }

    /// Returns the keys that exist and have not expired.
    pub async fn has<I, K>(&mut self, storage: &str, keys: I) -> Result<Vec<String>, ClientError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let response = self.call(Method::Has, &Request::keys(storage, keys)).await?;
        Ok(response.items.into_iter().map(|i| i.key).collect())
    }

    pub async fn mget<I, K>(
        &mut self,
        storage: &str,
        keys: I,
    ) -> Result<Vec<(String, Bytes)>, ClientError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let response = self.call(Method::MGet, &Request::keys(storage, keys)).await?;
        Ok(response.items.into_iter().map(|i| (i.key, i.value)).collect())
    }

    /// Gives every key the same absolute expiry.
    pub async fn mexpire<I, K>(
        &mut self,
        storage: &str,
        keys: I,
        at: DateTime<Utc>,
    ) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let timeout = format_timestamp(at);
        let items = keys
            .into_iter()
            .map(|k| Item::key(k).with_timeout(timeout.clone()))
            .collect();
        self.call(Method::MExpire, &Request::new(storage, items)).await?;
        Ok(())
    }

    /// Remaining time to live of every live key that has an expiry.
    pub async fn ttl<I, K>(
        &mut self,
        storage: &str,
        keys: I,
    ) -> Result<Vec<(String, Duration)>, ClientError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let response = self.call(Method::Ttl, &Request::keys(storage, keys)).await?;

        response
            .items
            .into_iter()
            .map(|item| -> Result<(String, Duration), ClientError> {
                let secs = std::str::from_utf8(&item.value)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| {
                        KvError::Protocol(format!("ttl for key '{}' is not a number", item.key))
                    })?;
                Ok((item.key, Duration::from_secs(secs)))
            })
            .collect()
    }

    pub async fn delete<I, K>(&mut self, storage: &str, keys: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.call(Method::Delete, &Request::keys(storage, keys)).await?;
        Ok(())
    }

    pub async fn clear(&mut self, storage: &str) -> Result<(), ClientError> {
        self.call(Method::Clear, &Request::new(storage, Vec::new())).await?;
        Ok(())
    }
}
