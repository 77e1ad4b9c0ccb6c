// End-to-end scanning scenarios: real store, real workers, generated images

use super::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use crate::cache::{rendition_path, CacheCategory};
use crate::db::schema::{Source, SourceMode};
use crate::db::Store;
use crate::jobs::pool::WorkerPoolManager;
use crate::jobs::progress::LogNotifier;
use crate::jobs::registry::Registry;
use crate::jobs::QueueAction;
use crate::settings::snapshot::{KEY_JOB_DELAY_MS, KEY_SCAN_EXCLUDE, KEY_VIDEO_PREVIEWS_ENABLED};

struct Harness {
    _tmp: TempDir,
    media_dir: PathBuf,
    env: Arc<JobEnv>,
    pool: Option<Arc<WorkerPoolManager>>,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let root = std::fs::canonicalize(tmp.path()).unwrap();
        let media_dir = root.join("media");
        std::fs::create_dir_all(&media_dir).unwrap();

        let store = Arc::new(Store::open(&root.join("test.db")).unwrap());
        let env = JobEnv::new(store, Arc::new(LogNotifier), root.join("cache")).unwrap();
        env.settings
            .set(KEY_JOB_DELAY_MS, r#"{"scan":0,"metadata":0,"thumbnail":0,"preview":0}"#)
            .unwrap();

        Self { _tmp: tmp, media_dir, env, pool: None }
    }

    fn start(&mut self) {
        let pool = Arc::new(WorkerPoolManager::new(Registry::standard(), Arc::clone(&self.env)));
        pool.reconcile().unwrap();
        self.pool = Some(pool);
    }

    fn source(&self, id: &str) -> Source {
        self.env.store.with_conn(|conn| schema::get_source(conn, id)).unwrap().unwrap()
    }

    /// Wait until every queue is empty and the source has settled.
    fn wait_settled(&self, source_id: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(30);
        while Instant::now() < deadline {
            let idle = self.env.queue.is_idle().unwrap();
            if idle && self.source(source_id).status != SourceStatus::Scanning {
                // Let the completion hook of the last scan land
                std::thread::sleep(Duration::from_millis(100));
                if self.env.queue.is_idle().unwrap() && self.source(source_id).status == SourceStatus::Ok {
                    return true;
                }
            }
            std::thread::sleep(Duration::from_millis(25));
        }
        false
    }

    fn count<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> Result<T>) -> T {
        self.env.store.with_conn(f).unwrap()
    }

    /// Claim the next `job_type` job and run it on this thread.
    fn run_next(&self, job_type: JobType) -> Result<Value> {
        let job = self.env.queue.claim(job_type, "test").unwrap().expect("no job due");
        let processor = Registry::standard().get(job_type).unwrap();
        let ctx = JobContext {
            job_id: job.id.clone(),
            job_type,
            attempt: job.attempt,
            settings: self.env.settings.snapshot(),
            env: Arc::clone(&self.env),
        };
        let result = processor.process(&ctx, &job.payload);
        match &result {
            Ok(value) => {
                self.env.queue.complete(job_type, &job, value).unwrap();
                processor.finished(&ctx, &job.payload, JobOutcome::Completed);
            }
            Err(e) => {
                self.env.queue.fail(job_type, &job, &e.to_string()).unwrap();
            }
        }
        result
    }

    fn first_media_id(&self) -> String {
        self.count(|conn| Ok(conn.query_row("SELECT id FROM media LIMIT 1", [], |row| row.get(0))?))
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.close();
        }
    }
}

fn write_png(path: &Path, width: u32, height: u32) {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    img.save(path).unwrap();
}

// ---------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------

#[test]
fn test_single_image_flows_through_pipeline() {
    let mut h = Harness::new();
    write_png(&h.media_dir.join("photo.png"), 800, 600);
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id), "source never settled");

    // root + directory + file
    assert_eq!(h.env.queue.count_runs(JobType::Scan).unwrap(), 3);
    assert_eq!(h.env.queue.count_runs(JobType::Metadata).unwrap(), 1);
    assert_eq!(h.env.queue.count_runs(JobType::Thumbnail).unwrap(), 1);
    assert_eq!(h.env.queue.count_runs(JobType::Preview).unwrap(), 0);

    assert_eq!(h.count(|c| schema::count_files(c, None)), 1);
    assert_eq!(h.count(schema::count_media), 1);
    assert_eq!(h.count(schema::count_metadata), 1);

    let media_id = h.first_media_id();
    let meta = h.count(|c| schema::get_metadata(c, &media_id)).unwrap();
    assert_eq!(meta.width, Some(800));
    assert_eq!(meta.height, Some(600));

    let thumbs = h.count(|c| schema::list_thumbnails(c, &media_id));
    let sizes: Vec<_> = thumbs.iter().map(|t| t.size.as_str()).collect();
    assert_eq!(sizes, vec!["240p", "720p", "lqip"]);

    let small = &thumbs[0];
    assert_eq!((small.width, small.height), (320, 240));
    // Never upscaled past the source
    assert_eq!((thumbs[1].width, thumbs[1].height), (800, 600));
    assert_eq!(thumbs[2].height, 32);

    let expected = rendition_path(&h.env.cache_root, CacheCategory::Thumbnails, "240p", &media_id, "jpg");
    assert_eq!(PathBuf::from(&small.path), expected);
    assert!(expected.exists());

    let source = h.source(&source.id);
    assert_eq!(source.status, SourceStatus::Ok);
    assert!(source.scanned_at.is_some());
}

#[test]
fn test_rescan_is_idempotent() {
    let mut h = Harness::new();
    write_png(&h.media_dir.join("a.png"), 64, 64);
    std::fs::create_dir_all(h.media_dir.join("sub")).unwrap();
    write_png(&h.media_dir.join("sub/b.png"), 64, 32);
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id));

    let rows = h.count(schema::count_file_rows);
    let media = h.count(schema::count_media);
    assert_eq!(media, 2);
    // media dir + sub dir + two images
    assert_eq!(rows, 4);

    rescan_source(&h.env, &source.id).unwrap();
    assert!(h.wait_settled(&source.id));

    assert_eq!(h.count(schema::count_file_rows), rows);
    assert_eq!(h.count(schema::count_media), media);
    assert_eq!(h.count(schema::count_metadata), 2);
}

#[test]
fn test_parent_links_follow_directories() {
    let mut h = Harness::new();
    std::fs::create_dir_all(h.media_dir.join("2024/june")).unwrap();
    let photo = h.media_dir.join("2024/june/p.png");
    write_png(&photo, 16, 16);
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id));

    let file = h.count(|c| schema::get_file_by_path(c, &photo.to_string_lossy())).unwrap();
    let june = h.count(|c| schema::get_file(c, file.parent_id.as_deref().unwrap())).unwrap();
    assert!(june.is_directory);
    assert_eq!(june.name, "june");

    let year = h.count(|c| schema::get_file(c, june.parent_id.as_deref().unwrap())).unwrap();
    assert_eq!(year.name, "2024");

    let root = h.count(|c| schema::get_file(c, year.parent_id.as_deref().unwrap())).unwrap();
    assert_eq!(PathBuf::from(&root.path), h.media_dir);
    assert!(root.parent_id.is_none());
}

#[test]
fn test_exclusions_and_temp_files_are_skipped() {
    let mut h = Harness::new();
    h.env.settings.set(KEY_SCAN_EXCLUDE, r#"["private", ".git"]"#).unwrap();

    std::fs::create_dir_all(h.media_dir.join("private")).unwrap();
    std::fs::create_dir_all(h.media_dir.join(".git")).unwrap();
    write_png(&h.media_dir.join("private/secret.png"), 8, 8);
    write_png(&h.media_dir.join(".git/x.png"), 8, 8);
    write_png(&h.media_dir.join("keep.png"), 8, 8);
    std::fs::write(h.media_dir.join(".mediaflow_tmp_partial"), b"x").unwrap();
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id));

    assert_eq!(h.count(|c| schema::count_files(c, None)), 1);
    assert_eq!(h.count(schema::count_media), 1);
    let private = h.media_dir.join("private");
    assert!(h.count(|c| schema::get_file_by_path(c, &private.to_string_lossy())).is_none());
}

#[test]
fn test_non_media_files_get_rows_but_no_jobs() {
    let mut h = Harness::new();
    std::fs::write(h.media_dir.join("notes.txt"), b"hello").unwrap();
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id));

    assert_eq!(h.count(|c| schema::count_files(c, None)), 1);
    assert_eq!(h.count(schema::count_media), 0);
    assert_eq!(h.env.queue.count_runs(JobType::Metadata).unwrap(), 0);

    let txt = h.media_dir.join("notes.txt");
    let file = h.count(|c| schema::get_file_by_path(c, &txt.to_string_lossy())).unwrap();
    assert!(file.hash.unwrap().starts_with("blake3:"));
}

#[test]
fn test_json_sidecar_is_linked() {
    let mut h = Harness::new();
    write_png(&h.media_dir.join("beach.png"), 32, 32);
    std::fs::write(h.media_dir.join("beach.json"), r#"{"title": "Beach day"}"#).unwrap();
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id));

    let media_id = h.first_media_id();
    let meta = h.count(|c| schema::get_metadata(c, &media_id)).unwrap();
    assert_eq!(meta.raw["sidecar"]["title"], "Beach day");

    let sidecar_path = h.media_dir.join("beach.json");
    let sidecar = h.count(|c| schema::get_file_by_path(c, &sidecar_path.to_string_lossy())).unwrap();
    assert_eq!(meta.sidecar_file_id.as_deref(), Some(sidecar.id.as_str()));
}

#[test]
fn test_remove_source_cascades() {
    let mut h = Harness::new();
    write_png(&h.media_dir.join("x.png"), 16, 16);
    h.start();

    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    assert!(h.wait_settled(&source.id));
    assert_eq!(h.count(schema::count_media), 1);

    remove_source(&h.env, &source.id).unwrap();
    assert_eq!(h.count(schema::count_file_rows), 0);
    assert_eq!(h.count(schema::count_media), 0);
    assert_eq!(h.count(schema::count_thumbnails), 0);

    let err = remove_source(&h.env, &source.id).unwrap_err();
    assert!(matches!(err, MediaflowError::NotFound(_)));
}

// ---------------------------------------------------------------
// Source validation (no workers needed)
// ---------------------------------------------------------------

#[test]
fn test_add_source_rejects_missing_and_file_paths() {
    let h = Harness::new();

    let missing = h.media_dir.join("nope");
    assert!(add_source(&h.env, &missing, SourceMode::ScanOnce).unwrap_err().is_validation());

    let file = h.media_dir.join("f.png");
    write_png(&file, 4, 4);
    assert!(add_source(&h.env, &file, SourceMode::ScanOnce).unwrap_err().is_validation());
}

#[test]
fn test_add_source_twice_is_conflict() {
    let h = Harness::new();
    add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    let err = add_source(&h.env, &h.media_dir, SourceMode::Watch).unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn test_add_source_queues_root_scan() {
    let h = Harness::new();
    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();

    assert_eq!(source.status, SourceStatus::Idle);
    let status = h.env.queue.status_of(JobType::Scan).unwrap();
    assert_eq!(status.counts.waiting, 1);
    assert_eq!(h.count(|c| crate::jobs::ledger::count_open_scans(c, &source.id)), 1);
}

#[test]
fn test_disabled_source_cannot_rescan() {
    let h = Harness::new();
    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    let updated = set_source_enabled(&h.env, &source.id, false).unwrap();
    assert!(!updated.enabled);
    assert!(rescan_source(&h.env, &source.id).unwrap_err().is_validation());
}

#[test]
fn test_set_watch_switches_mode() {
    let h = Harness::new();
    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();

    let watched = set_watch(&h.env, &source.id, true).unwrap();
    assert_eq!(watched.mode, SourceMode::Watch);
    // Turning watch on queues a rescan on top of the initial one
    assert_eq!(h.env.queue.status_of(JobType::Scan).unwrap().counts.waiting, 2);

    let unwatched = set_watch(&h.env, &source.id, false).unwrap();
    assert_eq!(unwatched.mode, SourceMode::ScanOnce);
}

#[test]
fn test_scan_payload_shape() {
    let payload = scan_payload("s1", Path::new("/m/a.jpg"), Some("p1"), false);
    assert_eq!(payload["sourceId"], "s1");
    assert_eq!(payload["path"], "/m/a.jpg");
    assert_eq!(payload["parentId"], "p1");
    assert_eq!(payload["root"], false);
}

// ---------------------------------------------------------------
// Jobs run by hand, no workers
// ---------------------------------------------------------------

fn scan_one_video(h: &Harness) -> Value {
    std::fs::write(h.media_dir.join("clip.mp4"), b"not really a video").unwrap();
    add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    h.run_next(JobType::Scan).unwrap(); // root
    h.run_next(JobType::Scan).unwrap(); // directory
    h.run_next(JobType::Scan).unwrap()
}

#[test]
fn test_video_chains_preview() {
    let h = Harness::new();
    let result = scan_one_video(&h);

    assert_eq!(result["chained"], json!(["metadata", "thumbnail", "preview"]));
    assert_eq!(h.env.queue.count_runs(JobType::Metadata).unwrap(), 1);
    assert_eq!(h.env.queue.count_runs(JobType::Thumbnail).unwrap(), 1);
    assert_eq!(h.env.queue.count_runs(JobType::Preview).unwrap(), 1);
}

#[test]
fn test_video_previews_can_be_disabled() {
    let h = Harness::new();
    h.env.settings.set(KEY_VIDEO_PREVIEWS_ENABLED, "false").unwrap();
    let result = scan_one_video(&h);

    assert_eq!(result["chained"], json!(["metadata", "thumbnail"]));
    assert_eq!(h.env.queue.count_runs(JobType::Metadata).unwrap(), 1);
    assert_eq!(h.env.queue.count_runs(JobType::Thumbnail).unwrap(), 1);
    assert_eq!(h.env.queue.count_runs(JobType::Preview).unwrap(), 0);
}

#[test]
fn test_lqip_survives_failed_size_class() {
    let h = Harness::new();
    write_png(&h.media_dir.join("photo.png"), 800, 600);
    add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();
    for _ in 0..3 {
        h.run_next(JobType::Scan).unwrap();
    }

    // A plain file where the 720p directory belongs
    let thumbs_dir = h.env.cache_root.join(CacheCategory::Thumbnails.folder());
    std::fs::create_dir_all(&thumbs_dir).unwrap();
    std::fs::write(thumbs_dir.join("720p"), b"").unwrap();

    assert!(h.run_next(JobType::Thumbnail).is_err());

    let media_id = h.first_media_id();
    let sizes: Vec<String> = h
        .count(|c| schema::list_thumbnails(c, &media_id))
        .into_iter()
        .map(|t| t.size)
        .collect();
    assert_eq!(sizes, vec!["240p", "lqip"]);
}

#[test]
fn test_drained_scan_settles_source() {
    let h = Harness::new();
    write_png(&h.media_dir.join("a.png"), 8, 8);
    let source = add_source(&h.env, &h.media_dir, SourceMode::ScanOnce).unwrap();

    // Root scan marks the source scanning and queues the directory
    h.run_next(JobType::Scan).unwrap();
    assert_eq!(h.source(&source.id).status, SourceStatus::Scanning);
    assert_eq!(h.count(|c| ledger::count_open_scans(c, &source.id)), 1);

    let pool = WorkerPoolManager::new(Registry::standard(), Arc::clone(&h.env));
    pool.control("scan", QueueAction::Drain).unwrap();

    assert_eq!(h.count(|c| ledger::count_open_scans(c, &source.id)), 0);
    let source = h.source(&source.id);
    assert_eq!(source.status, SourceStatus::Ok);
    assert!(source.scanned_at.is_some());
}
