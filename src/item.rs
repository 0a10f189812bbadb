//! Item, Request and Response Model
//!
//! These are the shapes that flow through every batch operation:
//!
//! - [`Item`]: one key with an optional value and an optional timeout, as
//!   the client sends it (the timeout is still text here).
//! - [`Request`]: a batch of items aimed at one named storage instance.
//! - [`Response`]: the items that survived/matched, shape depends on the method.
//! - [`Record`]: a validated item handed to a driver's `set`.
//!
//! Timeouts are absolute instants, never durations. They are parsed as
//! RFC 3339 and truncated to whole seconds.

use crate::error::{KvError, KvResult};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::fmt;
use std::str::FromStr;

/// One key/value entry with an optional absolute expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    /// Non-empty identifier, unique within a storage instance
    pub key: String,
    /// Opaque value. Empty is a valid value.
    pub value: Bytes,
    /// Absolute expiry instant in RFC 3339 text; `None` means no expiry
    pub timeout: Option<String>,
}

impl Item {
    /// Creates an item that carries only a key.
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Creates an item with a value and no expiry.
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timeout: None,
        }
    }

    /// Attaches an absolute expiry instant.
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.timeout = Some(format_timestamp(at));
        self
    }

    /// Attaches a raw timeout string, valid or not.
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }
}

/// One batch operation directed at one storage instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub storage: String,
    pub items: Vec<Item>,
}

impl Request {
    pub fn new(storage: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            storage: storage.into(),
            items,
        }
    }

    /// Builds a request whose items carry only keys.
    pub fn keys<I, K>(storage: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::new(storage, keys.into_iter().map(Item::key).collect())
    }
}

/// The result of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub items: Vec<Item>,
}

impl Response {
    /// An acknowledgement with no items.
    pub fn ack() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys of the returned items, in response order.
    pub fn keys(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.key.as_str()).collect()
    }
}

/// A validated item ready for a driver's `set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Bytes,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at: None,
        }
    }

    pub fn expiring(
        key: impl Into<String>,
        value: impl Into<Bytes>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expires_at: Some(expires_at),
        }
    }
}

/// The remote-procedure methods of the batch protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Set,
    Has,
    MGet,
    MExpire,
    Ttl,
    Delete,
    Clear,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::Set,
        Method::Has,
        Method::MGet,
        Method::MExpire,
        Method::Ttl,
        Method::Delete,
        Method::Clear,
    ];

    /// Wire name, e.g. `kv.MGet`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Set => "kv.Set",
            Method::Has => "kv.Has",
            Method::MGet => "kv.MGet",
            Method::MExpire => "kv.MExpire",
            Method::Ttl => "kv.TTL",
            Method::Delete => "kv.Delete",
            Method::Clear => "kv.Clear",
        }
    }

    /// True for methods that mutate the storage instance.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Method::Set | Method::MExpire | Method::Delete | Method::Clear
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| KvError::Protocol(format!("unknown method '{}'", s)))
    }
}

/// Parses an RFC 3339 timestamp into a UTC instant with second precision.
pub fn parse_timestamp(key: &str, text: &str) -> KvResult<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(text.trim()).map_err(|e| KvError::InvalidTimeout {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    Utc.timestamp_opt(parsed.timestamp(), 0)
        .single()
        .ok_or_else(|| KvError::InvalidTimeout {
            key: key.to_string(),
            reason: "timestamp out of range".to_string(),
        })
}

/// Formats an instant as RFC 3339 in UTC with whole seconds (`2024-05-01T10:00:00Z`).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_normalizes_to_utc() {
        let at = parse_timestamp("k", "2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(format_timestamp(at), "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_parse_timestamp_truncates_fraction() {
        let at = parse_timestamp("k", "2024-05-01T10:00:00.987Z").unwrap();
        assert_eq!(at.timestamp_subsec_nanos(), 0);
        assert_eq!(format_timestamp(at), "2024-05-01T10:00:00Z");
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("session", "tomorrow").unwrap_err();
        assert!(matches!(err, KvError::InvalidTimeout { ref key, .. } if key == "session"));

        // A duration is not an instant
        assert!(parse_timestamp("k", "10s").is_err());
    }

    #[test]
    fn test_method_names() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert_eq!(Method::Ttl.as_str(), "kv.TTL");
        assert!("kv.Get".parse::<Method>().is_err());
    }

    #[test]
    fn test_write_methods() {
        let writes: Vec<Method> = Method::ALL.into_iter().filter(Method::is_write).collect();
        assert_eq!(
            writes,
            vec![Method::Set, Method::MExpire, Method::Delete, Method::Clear]
        );
    }

    #[test]
    fn test_item_builders() {
        let at = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let item = Item::new("a", "aa").expires_at(at);
        assert_eq!(item.timeout.as_deref(), Some("2030-01-01T00:00:00Z"));

        let req = Request::keys("memory", ["a", "b"]);
        assert_eq!(req.items.len(), 2);
        assert!(req.items.iter().all(|i| i.value.is_empty() && i.timeout.is_none()));
    }
}
