//! Batch Frame Codec
//!
//! Maps batch requests and responses onto RESP values.
//!
//! ```text
//! request  := *3 $<method> $<storage> *N <item>...
//! item     := *3 $<key> <value> <timeout>
//! value    := $<bytes> | $-1
//! timeout  := $<RFC 3339> | $-1
//!
//! success  := *M <item>...          (acks are *0)
//! failure  := -<CODE> <message>
//! ```
//!
//! A null value decodes to an empty value; a null or empty timeout decodes
//! to "no timeout".

use crate::error::{KvError, KvResult};
use crate::item::{Item, Method, Request, Response};
use crate::protocol::types::RespValue;
use bytes::Bytes;

/// Encodes a request frame.
pub fn encode_request(method: Method, request: &Request) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(Bytes::from_static(method.as_str().as_bytes())),
        RespValue::bulk_string(Bytes::from(request.storage.clone())),
        encode_items(&request.items),
    ])
}

/// Decodes a request frame.
pub fn decode_request(frame: RespValue) -> KvResult<(Method, Request)> {
    let parts = frame.into_array().ok_or_else(|| {
        KvError::Protocol("request frame must be an array".to_string())
    })?;

    let [method, storage, items]: [RespValue; 3] = parts.try_into().map_err(|parts: Vec<_>| {
        KvError::Protocol(format!(
            "request frame must have 3 elements, got {}",
            parts.len()
        ))
    })?;

    let method: Method = text(&method, "method")?.parse()?;
    let storage = text(&storage, "storage")?.to_string();
    let items = match items {
        // A clear may omit its items entirely
        RespValue::Null => Vec::new(),
        other => decode_items(other)?,
    };

    Ok((method, Request { storage, items }))
}

/// Encodes the outcome of a request as a reply frame.
pub fn encode_response(result: &KvResult<Response>) -> RespValue {
    match result {
        Ok(response) => encode_items(&response.items),
        Err(e) => RespValue::error(e.to_wire()),
    }
}

/// Decodes a reply frame.
pub fn decode_response(frame: RespValue) -> KvResult<Response> {
    match frame {
        RespValue::Error(line) => Err(KvError::from_wire(&line)),
        other => Ok(Response {
            items: decode_items(other)?,
        }),
    }
}

fn encode_items(items: &[Item]) -> RespValue {
    RespValue::array(items.iter().map(encode_item).collect())
}

fn encode_item(item: &Item) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(Bytes::from(item.key.clone())),
        RespValue::bulk_string(item.value.clone()),
        match &item.timeout {
            Some(t) => RespValue::bulk_string(Bytes::from(t.clone())),
            None => RespValue::null(),
        },
    ])
}

fn decode_items(value: RespValue) -> KvResult<Vec<Item>> {
    let values = value
        .into_array()
        .ok_or_else(|| KvError::Protocol("items must be an array".to_string()))?;

    values.into_iter().map(decode_item).collect()
}

fn decode_item(value: RespValue) -> KvResult<Item> {
    let found = value.type_name();
    let parts = value
        .into_array()
        .ok_or_else(|| KvError::Protocol(format!("item must be an array, got {}", found)))?;

    let [key, value, timeout]: [RespValue; 3] = parts.try_into().map_err(|parts: Vec<_>| {
        KvError::Protocol(format!("item must have 3 elements, got {}", parts.len()))
    })?;

    let key = text(&key, "key")?.to_string();

    let value = match value {
        RespValue::BulkString(b) => b,
        RespValue::Null => Bytes::new(),
        other => {
            return Err(KvError::Protocol(format!(
                "item value must be a bulk string, got {}",
                other.type_name()
            )))
        }
    };

    let timeout = match timeout {
        RespValue::Null => None,
        other => Some(text(&other, "timeout")?.to_string()).filter(|t| !t.is_empty()),
    };

    Ok(Item {
        key,
        value,
        timeout,
    })
}

fn text<'a>(value: &'a RespValue, field: &str) -> KvResult<&'a str> {
    match value {
        RespValue::BulkString(_) | RespValue::SimpleString(_) => value
            .as_str()
            .ok_or_else(|| KvError::Protocol(format!("{} must be valid UTF-8", field))),
        other => Err(KvError::Protocol(format!(
            "{} must be a string, got {}",
            field,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_message;

    #[test]
    fn test_request_frame_wire_format() {
        let request = Request::new("memory", vec![Item::new("a", "aa")]);
        let bytes = encode_request(Method::Set, &request).serialize();

        assert_eq!(
            bytes,
            b"*3\r\n$6\r\nkv.Set\r\n$6\r\nmemory\r\n*1\r\n*3\r\n$1\r\na\r\n$2\r\naa\r\n$-1\r\n"
        );
    }

    #[test]
    fn test_request_decodes_from_wire() {
        let request = Request::new(
            "redis-rr",
            vec![
                Item::new("c", "cc").with_timeout("2030-01-01T00:00:00Z"),
                Item::key("d"),
            ],
        );
        let bytes = encode_request(Method::MExpire, &request).serialize();
        let (frame, _) = parse_message(&bytes).unwrap().unwrap();

        let (method, decoded) = decode_request(frame).unwrap();
        assert_eq!(method, Method::MExpire);
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_clear_without_items() {
        let frame = RespValue::array(vec![
            RespValue::bulk_string("kv.Clear"),
            RespValue::bulk_string("memory"),
            RespValue::null(),
        ]);

        let (method, request) = decode_request(frame).unwrap();
        assert_eq!(method, Method::Clear);
        assert!(request.items.is_empty());
    }

    #[test]
    fn test_empty_timeout_means_none() {
        let frame = RespValue::array(vec![
            RespValue::bulk_string("kv.Set"),
            RespValue::bulk_string("memory"),
            RespValue::array(vec![RespValue::array(vec![
                RespValue::bulk_string("a"),
                RespValue::null(),
                RespValue::bulk_string(""),
            ])]),
        ]);

        let (_, request) = decode_request(frame).unwrap();
        assert_eq!(request.items[0].timeout, None);
        assert!(request.items[0].value.is_empty());
    }

    #[test]
    fn test_malformed_requests() {
        let not_array = RespValue::bulk_string("kv.Set");
        assert!(matches!(decode_request(not_array), Err(KvError::Protocol(_))));

        let short = RespValue::command(["kv.Has", "memory"]);
        assert!(matches!(decode_request(short), Err(KvError::Protocol(_))));

        let unknown = RespValue::array(vec![
            RespValue::bulk_string("kv.Get"),
            RespValue::bulk_string("memory"),
            RespValue::array(vec![]),
        ]);
        assert!(matches!(decode_request(unknown), Err(KvError::Protocol(_))));

        let bad_item = RespValue::array(vec![
            RespValue::bulk_string("kv.Has"),
            RespValue::bulk_string("memory"),
            RespValue::array(vec![RespValue::integer(7)]),
        ]);
        assert!(matches!(decode_request(bad_item), Err(KvError::Protocol(_))));
    }

    #[test]
    fn test_response_frames() {
        let ok: KvResult<Response> = Ok(Response {
            items: vec![Item::key("a"), Item::key("b")],
        });
        let decoded = decode_response(encode_response(&ok)).unwrap();
        assert_eq!(decoded.keys(), vec!["a", "b"]);

        let ack: KvResult<Response> = Ok(Response::ack());
        assert_eq!(encode_response(&ack).serialize(), b"*0\r\n");

        let failed: KvResult<Response> = Err(KvError::UnknownStorage("cache".into()));
        let frame = encode_response(&failed);
        assert_eq!(frame.serialize(), b"-UNKNOWN_STORAGE cache\r\n");
        assert_eq!(
            decode_response(frame),
            Err(KvError::UnknownStorage("cache".into()))
        );
    }
}
