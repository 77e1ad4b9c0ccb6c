// ExifTool wrapper
//
// Used for XMP sidecars and as a second opinion for images whose container
// kamadak-exif cannot read.

use std::path::Path;
use std::process::Command;

use serde_json::Value;

use crate::db::schema::MetadataRecord;
use crate::error::{MediaflowError, Result};

use super::normalize_exif_date;

/// Run exiftool in grouped numeric mode (-j -G -n) and return the tag object
/// for the single input file.
pub fn extract_raw(path: &Path) -> Result<Value> {
    let output = Command::new(crate::tools::exiftool_path())
        .args(["-j", "-G", "-n"])
        .arg(path)
        .output()
        .map_err(|e| MediaflowError::ExifTool(format!("Failed to run exiftool: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaflowError::ExifTool(format!("exiftool failed: {}", stderr.trim())));
    }

    let array: Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| MediaflowError::ExifTool(format!("Failed to parse exiftool JSON: {}", e)))?;

    // exiftool returns an array; take the first element
    Ok(array
        .as_array()
        .and_then(|a| a.first())
        .cloned()
        .unwrap_or_else(|| Value::Object(serde_json::Map::new())))
}

/// Fill unset fields of `record` from a grouped exiftool dump.
pub fn apply_dump(dump: &Value, record: &mut MetadataRecord) {
    record.width = record.width.or_else(|| {
        get_grouped_number(dump, "ExifImageWidth")
            .or_else(|| get_grouped_number(dump, "ImageWidth"))
            .map(|v| v as i64)
    });
    record.height = record.height.or_else(|| {
        get_grouped_number(dump, "ExifImageHeight")
            .or_else(|| get_grouped_number(dump, "ImageHeight"))
            .map(|v| v as i64)
    });
    if record.date_taken.is_none() {
        record.date_taken = get_grouped_string(dump, "DateTimeOriginal")
            .or_else(|| get_grouped_string(dump, "CreateDate"))
            .and_then(|d| normalize_exif_date(&d));
    }
    record.make = record.make.take().or_else(|| get_grouped_string(dump, "Make"));
    record.model = record.model.take().or_else(|| get_grouped_string(dump, "Model"));
    record.lens = record.lens.take().or_else(|| get_grouped_string(dump, "LensModel"));
    record.iso = record.iso.or_else(|| get_grouped_number(dump, "ISO").map(|v| v as i64));
    record.f_number = record.f_number.or_else(|| get_grouped_number(dump, "FNumber"));
    record.exposure_time = record.exposure_time.or_else(|| get_grouped_number(dump, "ExposureTime"));
}

/// With -G, keys are "Group:TagName". The EXIF group wins, then any group.
fn get_grouped_string(dump: &Value, tag: &str) -> Option<String> {
    let obj = dump.as_object()?;
    if let Some(val) = obj.get(&format!("EXIF:{}", tag)).and_then(value_to_string) {
        return Some(val);
    }
    let suffix = format!(":{}", tag);
    obj.iter()
        .filter(|(key, _)| key.ends_with(&suffix) || key.as_str() == tag)
        .find_map(|(_, val)| value_to_string(val))
}

fn get_grouped_number(dump: &Value, tag: &str) -> Option<f64> {
    let obj = dump.as_object()?;
    if let Some(val) = obj.get(&format!("EXIF:{}", tag)).and_then(|v| v.as_f64()) {
        return Some(val);
    }
    let suffix = format!(":{}", tag);
    obj.iter()
        .filter(|(key, _)| key.ends_with(&suffix) || key.as_str() == tag)
        .find_map(|(_, val)| val.as_f64())
}

fn value_to_string(val: &Value) -> Option<String> {
    match val {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn is_available() -> bool {
    crate::tools::Tool::ExifTool.is_available()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_dump_prefers_exif_group() {
        let dump = json!({
            "SourceFile": "a.jpg",
            "MakerNotes:Make": "Other",
            "EXIF:Make": "Canon",
            "EXIF:Model": "EOS R5",
            "EXIF:ISO": 800,
            "EXIF:FNumber": 4.0,
            "EXIF:ExposureTime": 0.01,
            "EXIF:ExifImageWidth": 8192,
            "EXIF:ExifImageHeight": 5464,
            "EXIF:DateTimeOriginal": "2023:06:15 14:30:00"
        });
        let mut record = MetadataRecord::default();
        apply_dump(&dump, &mut record);

        assert_eq!(record.make.as_deref(), Some("Canon"));
        assert_eq!(record.model.as_deref(), Some("EOS R5"));
        assert_eq!(record.iso, Some(800));
        assert_eq!(record.f_number, Some(4.0));
        assert_eq!(record.width, Some(8192));
        assert_eq!(record.height, Some(5464));
        assert_eq!(record.date_taken.as_deref(), Some("2023-06-15T14:30:00Z"));
    }

    #[test]
    fn test_apply_dump_keeps_existing_fields() {
        let mut record = MetadataRecord {
            make: Some("Sony".to_string()),
            width: Some(100),
            ..Default::default()
        };
        apply_dump(&json!({"EXIF:Make": "Canon", "File:ImageWidth": 50}), &mut record);
        assert_eq!(record.make.as_deref(), Some("Sony"));
        assert_eq!(record.width, Some(100));
    }
}
