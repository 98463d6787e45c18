//! CloudEvents HTTP protocol binding.
//!
//! Inbound requests may use either content mode:
//! - binary: attributes in `ce-*` headers, payload in the body
//! - structured: `content-type: application/cloudevents+json`, everything in a
//!   JSON object
//!
//! Outbound events (broker forwarding) always use binary mode.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as JsonValue};

use crate::error::TransportError;

use super::{Event, SPEC_VERSION};

/// Media type of structured-mode envelopes.
pub const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents+json";

/// Largest envelope accepted by either listener.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024; // 1 MiB

const HEADER_PREFIX: &str = "ce-";

fn malformed(message: impl Into<String>) -> TransportError {
    TransportError::MalformedEvent {
        message: message.into(),
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, TransportError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| malformed(format!("invalid time '{raw}': {e}")))
}

fn check_spec_version(raw: Option<&str>) -> Result<(), TransportError> {
    match raw {
        None => Ok(()),
        Some(v) if v == SPEC_VERSION => Ok(()),
        Some(v) => Err(malformed(format!("unsupported specversion '{v}'"))),
    }
}

fn is_structured(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim().starts_with(STRUCTURED_CONTENT_TYPE))
}

/// Decodes an HTTP request in either content mode.
///
/// # Errors
///
/// Returns `TransportError::MalformedEvent` if a required attribute is
/// missing, a header is not valid text, or the structured body is invalid.
pub fn decode_http(headers: &HeaderMap, body: &[u8]) -> Result<Event, TransportError> {
    if body.len() > MAX_EVENT_BYTES {
        return Err(TransportError::PayloadTooLarge {
            actual: body.len(),
            limit: MAX_EVENT_BYTES,
        });
    }
    if is_structured(headers) {
        return decode_structured(body);
    }
    decode_binary(headers, body)
}

fn decode_binary(headers: &HeaderMap, body: &[u8]) -> Result<Event, TransportError> {
    let mut id = None;
    let mut kind = None;
    let mut source = None;
    let mut spec_version = None;
    let mut event = Event::new("", "", "");
    event.time = None;

    for (name, value) in headers {
        let Some(attr) = name.as_str().strip_prefix(HEADER_PREFIX) else {
            continue;
        };
        let value = value
            .to_str()
            .map_err(|_| malformed(format!("header '{name}' is not valid text")))?
            .to_string();
        match attr {
            "id" => id = Some(value),
            "type" => kind = Some(value),
            "source" => source = Some(value),
            "specversion" => spec_version = Some(value),
            "time" => event.time = Some(parse_time(&value)?),
            "subject" => event.subject = Some(value),
            ext => event.set_extension(ext, value),
        }
    }

    check_spec_version(spec_version.as_deref())?;
    event.id = id.ok_or_else(|| malformed("missing ce-id header"))?;
    event.kind = kind.ok_or_else(|| malformed("missing ce-type header"))?;
    event.source = source.ok_or_else(|| malformed("missing ce-source header"))?;

    if !body.is_empty() {
        event.datacontenttype = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        event.data = Some(body.to_vec());
    }
    Ok(event)
}

fn take_string(obj: &mut Map<String, JsonValue>, name: &str) -> Result<Option<String>, TransportError> {
    match obj.remove(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s)),
        Some(other) => Err(malformed(format!("attribute '{name}' must be a string, got {other}"))),
    }
}

/// Decodes a structured-mode JSON envelope.
///
/// # Errors
///
/// Returns `TransportError::MalformedEvent` for invalid JSON, missing
/// required attributes, non-scalar extensions or `data_base64` payloads.
pub fn decode_structured(bytes: &[u8]) -> Result<Event, TransportError> {
    let value: JsonValue =
        serde_json::from_slice(bytes).map_err(|e| malformed(format!("invalid envelope JSON: {e}")))?;
    let JsonValue::Object(mut obj) = value else {
        return Err(malformed("envelope must be a JSON object"));
    };

    check_spec_version(take_string(&mut obj, "specversion")?.as_deref())?;
    let id = take_string(&mut obj, "id")?.ok_or_else(|| malformed("missing 'id'"))?;
    let kind = take_string(&mut obj, "type")?.ok_or_else(|| malformed("missing 'type'"))?;
    let source = take_string(&mut obj, "source")?.ok_or_else(|| malformed("missing 'source'"))?;

    let mut event = Event::new(id, kind, source);
    event.time = take_string(&mut obj, "time")?
        .map(|t| parse_time(&t))
        .transpose()?;
    event.subject = take_string(&mut obj, "subject")?;
    event.datacontenttype = take_string(&mut obj, "datacontenttype")?;

    if obj.contains_key("data_base64") {
        return Err(malformed("data_base64 payloads are not supported"));
    }
    event.data = match obj.remove("data") {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s.into_bytes()),
        Some(other) => Some(
            serde_json::to_vec(&other).map_err(|e| malformed(format!("invalid data: {e}")))?,
        ),
    };

    for (name, value) in obj {
        let text = match value {
            JsonValue::Null => continue,
            JsonValue::String(s) => s,
            JsonValue::Bool(b) => b.to_string(),
            JsonValue::Number(n) => n.to_string(),
            JsonValue::Array(_) | JsonValue::Object(_) => {
                return Err(malformed(format!("extension '{name}' must be a scalar")));
            }
        };
        event.set_extension(name, text);
    }
    Ok(event)
}

/// Encodes an event as a structured-mode JSON envelope.
///
/// # Errors
///
/// Returns `TransportError::SerializationFailed` if the payload is neither
/// JSON nor UTF-8 text.
pub fn encode_structured(event: &Event) -> Result<Vec<u8>, TransportError> {
    let mut obj = Map::new();
    obj.insert("specversion".to_string(), SPEC_VERSION.into());
    obj.insert("id".to_string(), event.id.clone().into());
    obj.insert("type".to_string(), event.kind.clone().into());
    obj.insert("source".to_string(), event.source.clone().into());
    if let Some(time) = event.time {
        obj.insert(
            "time".to_string(),
            time.to_rfc3339_opts(SecondsFormat::AutoSi, true).into(),
        );
    }
    if let Some(subject) = &event.subject {
        obj.insert("subject".to_string(), subject.clone().into());
    }
    if let Some(ct) = &event.datacontenttype {
        obj.insert("datacontenttype".to_string(), ct.clone().into());
    }
    for (name, value) in &event.extensions {
        obj.insert(name.clone(), value.clone().into());
    }
    if let Some(data) = &event.data {
        let is_json = event
            .datacontenttype
            .as_deref()
            .is_some_and(|ct| ct.contains("json"));
        let value = match serde_json::from_slice::<JsonValue>(data) {
            Ok(v) if is_json => v,
            _ => String::from_utf8(data.clone())
                .map(JsonValue::String)
                .map_err(|_| TransportError::SerializationFailed {
                    message: "binary data cannot be carried in structured mode".to_string(),
                })?,
        };
        obj.insert("data".to_string(), value);
    }

    serde_json::to_vec(&JsonValue::Object(obj)).map_err(|e| TransportError::SerializationFailed {
        message: e.to_string(),
    })
}

/// Encodes an event in binary mode: headers plus body.
///
/// # Errors
///
/// Returns `TransportError::SerializationFailed` if an attribute cannot be
/// represented as an HTTP header.
pub fn encode_binary(event: &Event) -> Result<(HeaderMap, Vec<u8>), TransportError> {
    let mut headers = HeaderMap::new();
    let mut put = |name: &str, value: &str| -> Result<(), TransportError> {
        let header_name = HeaderName::from_bytes(format!("{HEADER_PREFIX}{name}").as_bytes())
            .map_err(|e| TransportError::SerializationFailed {
                message: format!("invalid attribute name '{name}': {e}"),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::SerializationFailed {
            message: format!("invalid value for attribute '{name}': {e}"),
        })?;
        headers.insert(header_name, header_value);
        Ok(())
    };

    put("specversion", SPEC_VERSION)?;
    put("id", &event.id)?;
    put("type", &event.kind)?;
    put("source", &event.source)?;
    if let Some(time) = event.time {
        put("time", &time.to_rfc3339_opts(SecondsFormat::AutoSi, true))?;
    }
    if let Some(subject) = &event.subject {
        put("subject", subject)?;
    }
    for (name, value) in &event.extensions {
        put(name, value)?;
    }

    if let Some(ct) = &event.datacontenttype {
        let value = HeaderValue::from_str(ct).map_err(|e| TransportError::SerializationFailed {
            message: format!("invalid datacontenttype: {e}"),
        })?;
        headers.insert(CONTENT_TYPE, value);
    }
    Ok((headers, event.data.clone().unwrap_or_default()))
}
