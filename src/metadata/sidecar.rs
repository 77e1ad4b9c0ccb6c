// Sidecar parsing: JSON documents are read directly, XMP goes through exiftool

use std::path::Path;

use serde_json::Value;

use crate::error::{MediaflowError, Result};

use super::exiftool;

/// Parse a sidecar file into a JSON value.
pub fn read_sidecar(path: &Path) -> Result<Value> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "json" => {
            let bytes = std::fs::read(path)?;
            Ok(serde_json::from_slice(&bytes)?)
        }
        "xmp" => exiftool::extract_raw(path),
        other => Err(MediaflowError::Validation(format!("Unsupported sidecar type: {}", other))),
    }
}

/// Attach sidecar content to a raw metadata blob under "sidecar".
/// A non-object blob is wrapped so nothing already extracted is lost.
pub fn merge_into(raw: &mut Value, sidecar: Value) {
    if !raw.is_object() {
        let previous = std::mem::take(raw);
        let mut obj = serde_json::Map::new();
        if !previous.is_null() {
            obj.insert("extracted".to_string(), previous);
        }
        *raw = Value::Object(obj);
    }
    if let Value::Object(obj) = raw {
        obj.insert("sidecar".to_string(), sidecar);
    }
}
