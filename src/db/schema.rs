// Database schema types and query helpers
// Every write is an upsert keyed on the natural identity of the row
// (path, file_id, media_id, (media_id, size)), so replays are idempotent.

use rusqlite::{Connection, params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use crate::error::{MediaflowError, Result};

use super::{new_id, now_rfc3339};

// ----- Source -----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceMode {
    #[serde(rename = "scanOnce")]
    ScanOnce,
    #[serde(rename = "watch")]
    Watch,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::ScanOnce => "scanOnce",
            SourceMode::Watch => "watch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scanOnce" => Some(SourceMode::ScanOnce),
            "watch" => Some(SourceMode::Watch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    Idle,
    Scanning,
    Ok,
    Error,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Idle => "IDLE",
            SourceStatus::Scanning => "SCANNING",
            SourceStatus::Ok => "OK",
            SourceStatus::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(SourceStatus::Idle),
            "SCANNING" => Some(SourceStatus::Scanning),
            "OK" => Some(SourceStatus::Ok),
            "ERROR" => Some(SourceStatus::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub path: String,
    pub mode: SourceMode,
    pub enabled: bool,
    pub status: SourceStatus,
    pub scanned_at: Option<String>,
    pub created_at: String,
}

const SOURCE_COLUMNS: &str = "id, path, mode, enabled, status, scanned_at, created_at";

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    let mode: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Source {
        id: row.get(0)?,
        path: row.get(1)?,
        mode: SourceMode::parse(&mode).unwrap_or(SourceMode::ScanOnce),
        enabled: row.get(3)?,
        status: SourceStatus::parse(&status).unwrap_or(SourceStatus::Idle),
        scanned_at: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Insert a new source. A duplicate path is a `Conflict`, not a generic database error.
pub fn insert_source(conn: &Connection, path: &str, mode: SourceMode) -> Result<Source> {
    if get_source_by_path(conn, path)?.is_some() {
        return Err(MediaflowError::Conflict(format!("Source already exists: {}", path)));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO sources (id, path, mode) VALUES (?1, ?2, ?3)",
        params![id, path, mode.as_str()],
    )?;

    get_source(conn, &id)?.ok_or_else(|| MediaflowError::NotFound(format!("source {}", id)))
}

pub fn get_source(conn: &Connection, id: &str) -> Result<Option<Source>> {
    let sql = format!("SELECT {} FROM sources WHERE id = ?1", SOURCE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], source_from_row).optional()?)
}

pub fn get_source_by_path(conn: &Connection, path: &str) -> Result<Option<Source>> {
    let sql = format!("SELECT {} FROM sources WHERE path = ?1", SOURCE_COLUMNS);
    Ok(conn.query_row(&sql, params![path], source_from_row).optional()?)
}

pub fn list_sources(conn: &Connection) -> Result<Vec<Source>> {
    let sql = format!("SELECT {} FROM sources ORDER BY created_at, path", SOURCE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let sources = stmt.query_map([], source_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(sources)
}

pub fn update_source_status(conn: &Connection, id: &str, status: SourceStatus) -> Result<()> {
    conn.execute(
        "UPDATE sources SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    Ok(())
}

/// Mark a source scanned: status OK and scanned_at = now.
pub fn mark_source_scanned(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE sources SET status = 'OK', scanned_at = ?1 WHERE id = ?2",
        params![now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn update_source_mode(conn: &Connection, id: &str, mode: SourceMode) -> Result<()> {
    conn.execute(
        "UPDATE sources SET mode = ?1 WHERE id = ?2",
        params![mode.as_str(), id],
    )?;
    Ok(())
}

pub fn update_source_enabled(conn: &Connection, id: &str, enabled: bool) -> Result<()> {
    conn.execute(
        "UPDATE sources SET enabled = ?1 WHERE id = ?2",
        params![enabled, id],
    )?;
    Ok(())
}

/// Delete a source. Files, media, metadata and thumbnails cascade.
pub fn delete_source(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM sources WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

// ----- File -----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: String,
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub hash: Option<String>,
    pub is_directory: bool,
    pub mime_type: Option<String>,
    pub parent_id: Option<String>,
    pub source_id: String,
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub size: i64,
    pub hash: Option<String>,
    pub is_directory: bool,
    pub mime_type: Option<String>,
    pub parent_id: Option<String>,
    pub source_id: String,
    pub modified_at: Option<String>,
}

const FILE_COLUMNS: &str =
    "id, path, name, extension, size, hash, is_directory, mime_type, parent_id, source_id, modified_at";

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileEntry> {
    Ok(FileEntry {
        id: row.get(0)?,
        path: row.get(1)?,
        name: row.get(2)?,
        extension: row.get(3)?,
        size: row.get(4)?,
        hash: row.get(5)?,
        is_directory: row.get(6)?,
        mime_type: row.get(7)?,
        parent_id: row.get(8)?,
        source_id: row.get(9)?,
        modified_at: row.get(10)?,
    })
}

/// Upsert a file by path. Returns the id of the (possibly pre-existing) row.
pub fn upsert_file(conn: &Connection, file: &NewFile) -> Result<String> {
    let id: String = conn.query_row(
        "INSERT INTO files
            (id, path, name, extension, size, hash, is_directory, mime_type, parent_id, source_id, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(path) DO UPDATE SET
            name = excluded.name,
            extension = excluded.extension,
            size = excluded.size,
            hash = excluded.hash,
            is_directory = excluded.is_directory,
            mime_type = excluded.mime_type,
            parent_id = COALESCE(excluded.parent_id, files.parent_id),
            source_id = excluded.source_id,
            modified_at = excluded.modified_at,
            updated_at = datetime('now')
         RETURNING id",
        params![
            new_id(),
            file.path,
            file.name,
            file.extension,
            file.size,
            file.hash,
            file.is_directory,
            file.mime_type,
            file.parent_id,
            file.source_id,
            file.modified_at,
        ],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_file(conn: &Connection, id: &str) -> Result<Option<FileEntry>> {
    let sql = format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], file_from_row).optional()?)
}

pub fn get_file_by_path(conn: &Connection, path: &str) -> Result<Option<FileEntry>> {
    let sql = format!("SELECT {} FROM files WHERE path = ?1", FILE_COLUMNS);
    Ok(conn.query_row(&sql, params![path], file_from_row).optional()?)
}

pub fn count_files(conn: &Connection, source_id: Option<&str>) -> Result<i64> {
    let count = match source_id {
        Some(id) => conn.query_row(
            "SELECT COUNT(*) FROM files WHERE source_id = ?1 AND is_directory = 0",
            params![id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM files WHERE is_directory = 0",
            [],
            |row| row.get(0),
        )?,
    };
    Ok(count)
}

/// Count every row, directories included.
pub fn count_file_rows(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?)
}

pub fn total_file_bytes(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(size), 0) FROM files WHERE is_directory = 0",
        [],
        |row| row.get(0),
    )?)
}

// ----- Media -----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaType::Image),
            "video" => Some(MediaType::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Media {
    pub id: String,
    pub file_id: String,
    pub source_id: String,
    pub media_type: MediaType,
    pub mime_type: String,
}

fn media_from_row(row: &Row<'_>) -> rusqlite::Result<Media> {
    let media_type: String = row.get(3)?;
    Ok(Media {
        id: row.get(0)?,
        file_id: row.get(1)?,
        source_id: row.get(2)?,
        media_type: MediaType::parse(&media_type).unwrap_or(MediaType::Image),
        mime_type: row.get(4)?,
    })
}

/// Upsert a media row by file id. Returns the media id.
pub fn upsert_media(
    conn: &Connection,
    file_id: &str,
    source_id: &str,
    media_type: MediaType,
    mime_type: &str,
) -> Result<String> {
    let id: String = conn.query_row(
        "INSERT INTO media (id, file_id, source_id, type, mime_type)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(file_id) DO UPDATE SET
            source_id = excluded.source_id,
            type = excluded.type,
            mime_type = excluded.mime_type
         RETURNING id",
        params![new_id(), file_id, source_id, media_type.as_str(), mime_type],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_media(conn: &Connection, id: &str) -> Result<Option<Media>> {
    Ok(conn.query_row(
        "SELECT id, file_id, source_id, type, mime_type FROM media WHERE id = ?1",
        params![id],
        media_from_row,
    ).optional()?)
}

pub fn count_media(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?)
}

/// Media counts grouped by type.
pub fn count_media_by_type(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT type, COUNT(*) FROM media GROUP BY type ORDER BY type"
    )?;
    let counts = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(counts)
}

// ----- Metadata -----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub media_id: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration: Option<f64>,
    pub date_taken: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub lens: Option<String>,
    pub iso: Option<i64>,
    pub f_number: Option<f64>,
    pub exposure_time: Option<f64>,
    pub fps: Option<f64>,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub raw: serde_json::Value,
    pub sidecar_file_id: Option<String>,
}

pub fn upsert_metadata(conn: &Connection, meta: &MetadataRecord) -> Result<()> {
    let raw = serde_json::to_string(&meta.raw)?;
    conn.execute(
        "INSERT INTO metadata
            (media_id, width, height, duration, date_taken, make, model, lens, iso,
             f_number, exposure_time, fps, codec, bitrate, raw, sidecar_file_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
         ON CONFLICT(media_id) DO UPDATE SET
            width = excluded.width,
            height = excluded.height,
            duration = excluded.duration,
            date_taken = excluded.date_taken,
            make = excluded.make,
            model = excluded.model,
            lens = excluded.lens,
            iso = excluded.iso,
            f_number = excluded.f_number,
            exposure_time = excluded.exposure_time,
            fps = excluded.fps,
            codec = excluded.codec,
            bitrate = excluded.bitrate,
            raw = excluded.raw,
            sidecar_file_id = excluded.sidecar_file_id,
            updated_at = datetime('now')",
        params![
            meta.media_id,
            meta.width,
            meta.height,
            meta.duration,
            meta.date_taken,
            meta.make,
            meta.model,
            meta.lens,
            meta.iso,
            meta.f_number,
            meta.exposure_time,
            meta.fps,
            meta.codec,
            meta.bitrate,
            raw,
            meta.sidecar_file_id,
        ],
    )?;
    Ok(())
}

pub fn get_metadata(conn: &Connection, media_id: &str) -> Result<Option<MetadataRecord>> {
    let row = conn.query_row(
        "SELECT media_id, width, height, duration, date_taken, make, model, lens, iso,
                f_number, exposure_time, fps, codec, bitrate, raw, sidecar_file_id
         FROM metadata WHERE media_id = ?1",
        params![media_id],
        |row| {
            let raw: String = row.get(14)?;
            Ok(MetadataRecord {
                media_id: row.get(0)?,
                width: row.get(1)?,
                height: row.get(2)?,
                duration: row.get(3)?,
                date_taken: row.get(4)?,
                make: row.get(5)?,
                model: row.get(6)?,
                lens: row.get(7)?,
                iso: row.get(8)?,
                f_number: row.get(9)?,
                exposure_time: row.get(10)?,
                fps: row.get(11)?,
                codec: row.get(12)?,
                bitrate: row.get(13)?,
                raw: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
                sidecar_file_id: row.get(15)?,
            })
        },
    ).optional()?;
    Ok(row)
}

pub fn count_metadata(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM metadata", [], |row| row.get(0))?)
}

// ----- Thumbnail -----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub media_id: String,
    pub size: String,
    pub path: String,
    pub width: i64,
    pub height: i64,
}

pub fn upsert_thumbnail(conn: &Connection, thumb: &Thumbnail) -> Result<()> {
    conn.execute(
        "INSERT INTO thumbnails (media_id, size, path, width, height)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(media_id, size) DO UPDATE SET
            path = excluded.path,
            width = excluded.width,
            height = excluded.height,
            updated_at = datetime('now')",
        params![thumb.media_id, thumb.size, thumb.path, thumb.width, thumb.height],
    )?;
    Ok(())
}

pub fn list_thumbnails(conn: &Connection, media_id: &str) -> Result<Vec<Thumbnail>> {
    let mut stmt = conn.prepare(
        "SELECT media_id, size, path, width, height FROM thumbnails
         WHERE media_id = ?1 ORDER BY size"
    )?;
    let thumbs = stmt.query_map(params![media_id], |row| {
        Ok(Thumbnail {
            media_id: row.get(0)?,
            size: row.get(1)?,
            path: row.get(2)?,
            width: row.get(3)?,
            height: row.get(4)?,
        })
    })?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(thumbs)
}

pub fn count_thumbnails(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM thumbnails", [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn new_file(path: &str, source_id: &str, parent_id: Option<String>) -> NewFile {
        NewFile {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            extension: Some("jpg".to_string()),
            size: 10,
            hash: Some("blake3:abc".to_string()),
            is_directory: false,
            mime_type: Some("image/jpeg".to_string()),
            parent_id,
            source_id: source_id.to_string(),
            modified_at: None,
        }
    }

    #[test]
    fn test_duplicate_source_is_conflict() {
        let conn = setup_test_db();
        insert_source(&conn, "/photos", SourceMode::ScanOnce).unwrap();
        let err = insert_source(&conn, "/photos", SourceMode::Watch).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_upsert_file_keeps_id() {
        let conn = setup_test_db();
        let source = insert_source(&conn, "/photos", SourceMode::ScanOnce).unwrap();

        let first = upsert_file(&conn, &new_file("/photos/a.jpg", &source.id, None)).unwrap();
        let mut changed = new_file("/photos/a.jpg", &source.id, None);
        changed.size = 99;
        let second = upsert_file(&conn, &changed).unwrap();

        assert_eq!(first, second);
        assert_eq!(count_file_rows(&conn).unwrap(), 1);
        assert_eq!(get_file(&conn, &first).unwrap().unwrap().size, 99);
    }

    #[test]
    fn test_upsert_media_and_thumbnail_are_unique() {
        let conn = setup_test_db();
        let source = insert_source(&conn, "/photos", SourceMode::ScanOnce).unwrap();
        let file_id = upsert_file(&conn, &new_file("/photos/a.jpg", &source.id, None)).unwrap();

        let m1 = upsert_media(&conn, &file_id, &source.id, MediaType::Image, "image/jpeg").unwrap();
        let m2 = upsert_media(&conn, &file_id, &source.id, MediaType::Image, "image/jpeg").unwrap();
        assert_eq!(m1, m2);
        assert_eq!(count_media(&conn).unwrap(), 1);

        for _ in 0..2 {
            upsert_thumbnail(&conn, &Thumbnail {
                media_id: m1.clone(),
                size: "240p".to_string(),
                path: "/cache/x.jpg".to_string(),
                width: 320,
                height: 240,
            }).unwrap();
        }
        assert_eq!(list_thumbnails(&conn, &m1).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_source_cascades() {
        let conn = setup_test_db();
        let source = insert_source(&conn, "/photos", SourceMode::ScanOnce).unwrap();
        let file_id = upsert_file(&conn, &new_file("/photos/a.jpg", &source.id, None)).unwrap();
        let media_id = upsert_media(&conn, &file_id, &source.id, MediaType::Image, "image/jpeg").unwrap();
        upsert_metadata(&conn, &MetadataRecord {
            media_id: media_id.clone(),
            raw: serde_json::json!({}),
            ..Default::default()
        }).unwrap();

        assert!(delete_source(&conn, &source.id).unwrap());
        assert_eq!(count_file_rows(&conn).unwrap(), 0);
        assert_eq!(count_media(&conn).unwrap(), 0);
        assert_eq!(count_metadata(&conn).unwrap(), 0);
    }

    #[test]
    fn test_metadata_upsert_overwrites() {
        let conn = setup_test_db();
        let source = insert_source(&conn, "/photos", SourceMode::ScanOnce).unwrap();
        let file_id = upsert_file(&conn, &new_file("/photos/a.jpg", &source.id, None)).unwrap();
        let media_id = upsert_media(&conn, &file_id, &source.id, MediaType::Image, "image/jpeg").unwrap();

        let mut meta = MetadataRecord {
            media_id: media_id.clone(),
            width: Some(100),
            raw: serde_json::json!({"a": 1}),
            ..Default::default()
        };
        upsert_metadata(&conn, &meta).unwrap();
        meta.width = Some(200);
        upsert_metadata(&conn, &meta).unwrap();

        let stored = get_metadata(&conn, &media_id).unwrap().unwrap();
        assert_eq!(stored.width, Some(200));
        assert_eq!(stored.raw, serde_json::json!({"a": 1}));
        assert_eq!(count_metadata(&conn).unwrap(), 1);
    }
}
