//! Wire codec for forward-channel batches.
//!
//! A batch of maps is written as a form-encoded body:
//!
//! ```text
//! count=2&ofs=40&req0_key=value&req1_key=value%201
//! ```
//!
//! `ofs` is the id of the first map in the batch and each field prefix
//! `req<i>_` carries that map's id relative to `ofs`. Response decoding is
//! in [`crate::value`].

use std::collections::BTreeMap;

use url::form_urlencoded;

use crate::error::{DecodeError, DecodeResult};
use crate::handler::{MessageMap, QueuedMap};

/// Marker written in place of the fields of a map that cannot be encoded.
pub const BAD_MAP_MARKER: &str = "_badmap";

/// Encoded request body plus the maps that had to be left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeResult {
    /// Form-encoded body
    pub body: String,

    /// Number of maps written with their payload
    pub encoded: usize,

    /// Ids of maps whose payload was omitted
    pub skipped: Vec<u64>,
}

impl EncodeResult {
    /// True when every map in the batch was written.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Keys go on the wire verbatim, so they are limited to URL-safe characters.
fn is_encodable_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))
}

/// Encode the first `count` maps of `maps`.
///
/// A map with an unencodable key has its payload replaced by
/// `type=_badmap`; its id is reported in [`EncodeResult::skipped`] so the
/// caller can notify the application.
#[must_use]
pub fn encode_message_queue(maps: &[QueuedMap], count: usize) -> EncodeResult {
    let count = count.min(maps.len());
    let mut parts = vec![format!("count={count}")];
    let mut skipped = Vec::new();

    if let Some(first) = maps.first().filter(|_| count > 0) {
        let offset = first.map_id;
        parts.push(format!("ofs={offset}"));

        for queued in &maps[..count] {
            let prefix = format!("req{}_", queued.map_id.saturating_sub(offset));
            if queued.map.iter().all(|(key, _)| is_encodable_key(key)) {
                parts.extend(queued.map.iter().map(|(key, value)| {
                    let value: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
                    format!("{prefix}{key}={value}")
                }));
            } else {
                tracing::warn!("omitting map {} with unencodable key", queued.map_id);
                parts.push(format!("{prefix}type={BAD_MAP_MARKER}"));
                skipped.push(queued.map_id);
            }
        }
    }

    EncodeResult {
        body: parts.join("&"),
        encoded: count - skipped.len(),
        skipped,
    }
}

/// A forward-channel body decoded back into maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Value of the `count` field
    pub count: usize,

    /// Id of the first map, absent for empty batches
    pub offset: Option<u64>,

    /// Maps by absolute id, fields in body order
    pub maps: BTreeMap<u64, MessageMap>,
}

/// Decode a body produced by [`encode_message_queue`].
///
/// Used by protocol tooling and test servers.
///
/// # Errors
///
/// Fails when `count` is missing or any numeric field is malformed.
pub fn decode_message_queue(body: &str) -> DecodeResult<DecodedBatch> {
    let mut count = None;
    let mut offset = None;
    let mut fields = Vec::new();

    for (name, value) in form_urlencoded::parse(body.as_bytes()) {
        match &*name {
            "count" => count = Some(parse_number::<usize>("count", &value)?),
            "ofs" => offset = Some(parse_number::<u64>("ofs", &value)?),
            _ => fields.push((name.into_owned(), value.into_owned())),
        }
    }

    let count = count.ok_or(DecodeError::MissingField("count"))?;
    let mut maps: BTreeMap<u64, MessageMap> = BTreeMap::new();
    for (name, value) in fields {
        let split = name
            .strip_prefix("req")
            .and_then(|rest| rest.split_once('_'))
            .map(|(index, key)| (index.to_string(), key.to_string()));
        let Some((index, key)) = split else {
            return Err(DecodeError::MalformedField { field: name, value });
        };
        let index = parse_number::<u64>(&name, &index)?;
        let base = offset.ok_or(DecodeError::MissingField("ofs"))?;
        maps.entry(base + index).or_default().push((key, value));
    }

    Ok(DecodedBatch {
        count,
        offset,
        maps,
    })
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> DecodeResult<T> {
    value.parse().map_err(|_| DecodeError::MalformedField {
        field: field.to_string(),
        value: value.to_string(),
    })
}
