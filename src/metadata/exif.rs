// EXIF extraction for still images
//
// Malformed values (zero denominators, unparsable strings) are dropped
// rather than reported.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ::exif::{Exif, Field, In, Reader, Tag, Value};
use serde_json::{Map, Value as JsonValue};

use crate::db::schema::MetadataRecord;

use super::normalize_exif_date;

/// Parse a number that may be written as a rational "n/d".
pub fn parse_rational(s: &str) -> Option<f64> {
    let s = s.trim();
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.trim().parse().ok()?;
        let den: f64 = den.trim().parse().ok()?;
        if den == 0.0 {
            return None;
        }
        return Some(num / den).filter(|v| v.is_finite());
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn field_number(field: &Field) -> Option<f64> {
    match &field.value {
        Value::Rational(v) => v.first().filter(|r| r.denom != 0).map(|r| r.num as f64 / r.denom as f64),
        Value::SRational(v) => v.first().filter(|r| r.denom != 0).map(|r| r.num as f64 / r.denom as f64),
        Value::Short(v) => v.first().map(|n| *n as f64),
        Value::Long(v) => v.first().map(|n| *n as f64),
        Value::SShort(v) => v.first().map(|n| *n as f64),
        Value::SLong(v) => v.first().map(|n| *n as f64),
        Value::Float(v) => v.first().map(|n| *n as f64),
        Value::Double(v) => v.first().copied(),
        Value::Ascii(v) => v.first().and_then(|b| std::str::from_utf8(b).ok()).and_then(parse_rational),
        _ => None,
    }
}

fn field_string(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(v) => v
            .first()
            .map(|b| String::from_utf8_lossy(b).trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn number(exif: &Exif, tag: Tag) -> Option<f64> {
    exif.get_field(tag, In::PRIMARY).and_then(field_number)
}

fn string(exif: &Exif, tag: Tag) -> Option<String> {
    exif.get_field(tag, In::PRIMARY).and_then(field_string)
}

/// Read the EXIF block of an image. Returns None when the container has none.
pub fn read_exif(path: &Path) -> Option<Exif> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => Some(exif),
        Err(e) => {
            log::debug!("No EXIF in {}: {}", path.display(), e);
            None
        }
    }
}

/// Fill image fields of `record` from EXIF tags. Returns the raw tag map.
pub fn apply_exif(exif: &Exif, record: &mut MetadataRecord) -> JsonValue {
    record.width = number(exif, Tag::PixelXDimension)
        .or_else(|| number(exif, Tag::ImageWidth))
        .map(|v| v as i64);
    record.height = number(exif, Tag::PixelYDimension)
        .or_else(|| number(exif, Tag::ImageLength))
        .map(|v| v as i64);
    record.date_taken = string(exif, Tag::DateTimeOriginal)
        .or_else(|| string(exif, Tag::DateTime))
        .and_then(|d| normalize_exif_date(&d));
    record.make = string(exif, Tag::Make);
    record.model = string(exif, Tag::Model);
    record.lens = string(exif, Tag::LensModel);
    record.iso = number(exif, Tag::PhotographicSensitivity).map(|v| v as i64);
    record.f_number = number(exif, Tag::FNumber);
    record.exposure_time = number(exif, Tag::ExposureTime);

    let mut raw = Map::new();
    for field in exif.fields().filter(|f| f.ifd_num == In::PRIMARY) {
        raw.insert(
            field.tag.to_string(),
            JsonValue::String(field.display_value().with_unit(exif).to_string()),
        );
    }
    JsonValue::Object(raw)
}
