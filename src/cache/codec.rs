//! Codec Module
//!
//! Turns entries into text records for the shared store and back.
//!
//! Two independent layers:
//! 1. Per-shape binary segments become base64 strings, each flagged by a
//!    sibling `__<field>IsBase64` marker so decoding knows what to reverse.
//! 2. Optionally, the whole JSON record is gzip-compressed and base64-encoded.
//!
//! Decoding sniffs the outer layer (plain records start with `{`), so
//! toggling compression never strands records written under the other mode.

use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::{Map, Value};

use crate::cache::{CacheEntry, ValueKind};
use crate::error::{CacheError, Result};

const BODY_MARKER: &str = "__bodyIsBase64";
const RSC_DATA_MARKER: &str = "__rscDataIsBase64";
const SEGMENT_DATA_MARKER: &str = "__segmentDataIsBase64";
const BUFFER_MARKER: &str = "__bufferIsBase64";

// == Codec ==
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    compression: bool,
}

impl Codec {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    // == Encode ==
    /// Serializes an entry into its stored text form.
    pub fn encode(&self, entry: &CacheEntry) -> Result<String> {
        let mut record = serde_json::to_value(entry)?;
        if let Some(value) = record.get_mut("value").and_then(Value::as_object_mut) {
            segments_to_text(entry.value.kind(), value);
        }
        let json = serde_json::to_string(&record)?;

        if !self.compression {
            return Ok(json);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(json.as_bytes())
            .map_err(|e| CacheError::Encode(format!("gzip failed: {}", e)))?;
        let compressed = encoder
            .finish()
            .map_err(|e| CacheError::Encode(format!("gzip failed: {}", e)))?;

        Ok(general_purpose::STANDARD.encode(compressed))
    }

    // == Decode ==
    /// Parses a stored record back into an entry.
    pub fn decode(&self, stored: &str) -> Result<CacheEntry> {
        let json = if stored.trim_start().starts_with('{') {
            stored.to_string()
        } else {
            let compressed = general_purpose::STANDARD.decode(stored.trim())?;
            let mut json = String::new();
            GzDecoder::new(compressed.as_slice())
                .read_to_string(&mut json)
                .map_err(|e| CacheError::Decode(format!("gunzip failed: {}", e)))?;
            json
        };

        let mut record: Value = serde_json::from_str(&json)?;
        let value = record
            .get_mut("value")
            .and_then(Value::as_object_mut)
            .ok_or_else(|| CacheError::Decode("record has no value".to_string()))?;
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .and_then(kind_from_discriminant)
            .ok_or_else(|| CacheError::Decode("unknown value kind".to_string()))?;
        segments_to_binary(kind, value)?;

        Ok(serde_json::from_value(record)?)
    }
}

fn kind_from_discriminant(kind: &str) -> Option<ValueKind> {
    match kind {
        "APP_ROUTE" => Some(ValueKind::AppRoute),
        "APP_PAGE" => Some(ValueKind::AppPage),
        "FETCH" => Some(ValueKind::Fetch),
        "PAGES" => Some(ValueKind::Pages),
        "REDIRECT" => Some(ValueKind::Redirect),
        "IMAGE" => Some(ValueKind::Image),
        _ => None,
    }
}

// == Binary Segments ==
/// Replaces every binary segment of a serialized value with base64 text.
pub(crate) fn segments_to_text(kind: ValueKind, value: &mut Map<String, Value>) {
    match kind {
        ValueKind::AppRoute => bytes_field_to_text(value, "body", BODY_MARKER),
        ValueKind::AppPage => {
            bytes_field_to_text(value, "rscData", RSC_DATA_MARKER);
            bytes_map_to_text(value, "segmentData", SEGMENT_DATA_MARKER);
        }
        ValueKind::Fetch => {
            if let Some(data) = value.get_mut("data").and_then(Value::as_object_mut) {
                bytes_field_to_text(data, "body", BODY_MARKER);
            }
        }
        ValueKind::Image => bytes_field_to_text(value, "buffer", BUFFER_MARKER),
        ValueKind::Pages | ValueKind::Redirect => {}
    }
}

/// Reverses [`segments_to_text`]. Fields without their marker are left as is.
pub(crate) fn segments_to_binary(kind: ValueKind, value: &mut Map<String, Value>) -> Result<()> {
    match kind {
        ValueKind::AppRoute => text_field_to_bytes(value, "body", BODY_MARKER),
        ValueKind::AppPage => {
            text_field_to_bytes(value, "rscData", RSC_DATA_MARKER)?;
            text_map_to_bytes(value, "segmentData", SEGMENT_DATA_MARKER)
        }
        ValueKind::Fetch => match value.get_mut("data").and_then(Value::as_object_mut) {
            Some(data) => text_field_to_bytes(data, "body", BODY_MARKER),
            None => Ok(()),
        },
        ValueKind::Image => text_field_to_bytes(value, "buffer", BUFFER_MARKER),
        ValueKind::Pages | ValueKind::Redirect => Ok(()),
    }
}

fn bytes_of(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
        .collect()
}

fn array_of(bytes: Vec<u8>) -> Value {
    Value::Array(bytes.into_iter().map(Value::from).collect())
}

fn bytes_field_to_text(obj: &mut Map<String, Value>, field: &str, marker: &str) {
    let Some(bytes) = obj.get(field).and_then(bytes_of) else {
        return;
    };
    obj.insert(
        field.to_string(),
        Value::String(general_purpose::STANDARD.encode(bytes)),
    );
    obj.insert(marker.to_string(), Value::Bool(true));
}

fn bytes_map_to_text(obj: &mut Map<String, Value>, field: &str, marker: &str) {
    let Some(segments) = obj.get(field).and_then(Value::as_object) else {
        return;
    };
    let mut encoded = Map::new();
    for (name, segment) in segments {
        let Some(bytes) = bytes_of(segment) else {
            return;
        };
        encoded.insert(
            name.clone(),
            Value::String(general_purpose::STANDARD.encode(bytes)),
        );
    }
    obj.insert(field.to_string(), Value::Object(encoded));
    obj.insert(marker.to_string(), Value::Bool(true));
}

fn is_marked(obj: &Map<String, Value>, marker: &str) -> bool {
    obj.get(marker).and_then(Value::as_bool).unwrap_or(false)
}

fn text_field_to_bytes(obj: &mut Map<String, Value>, field: &str, marker: &str) -> Result<()> {
    if !is_marked(obj, marker) {
        return Ok(());
    }
    if let Some(text) = obj.get(field).and_then(Value::as_str) {
        let bytes = general_purpose::STANDARD.decode(text)?;
        obj.insert(field.to_string(), array_of(bytes));
    }
    obj.remove(marker);
    Ok(())
}

fn text_map_to_bytes(obj: &mut Map<String, Value>, field: &str, marker: &str) -> Result<()> {
    if !is_marked(obj, marker) {
        return Ok(());
    }
    if let Some(segments) = obj.get(field).and_then(Value::as_object) {
        let mut decoded = Map::new();
        for (name, segment) in segments {
            let bytes = match segment.as_str() {
                Some(text) => general_purpose::STANDARD.decode(text)?,
                None => return Err(CacheError::Decode(format!("segment {} is not text", name))),
            };
            decoded.insert(name.clone(), array_of(bytes));
        }
        obj.insert(field.to_string(), Value::Object(decoded));
    }
    obj.remove(marker);
    Ok(())
}
