// Settings store and process-wide snapshot cache
//
// Lifecycle: seed-if-absent -> load on start -> reload on every write.
// Readers take an Arc of the current snapshot and keep it for the duration of
// their work; a later write swaps the Arc and notifies subscribers.

pub mod snapshot;

pub use snapshot::{label_height, SettingsSnapshot, ThumbnailFormat};

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::Store;
use crate::error::Result;

pub struct SettingsCache {
    store: Arc<Store>,
    current: RwLock<Arc<SettingsSnapshot>>,
    subscribers: Mutex<Vec<Sender<Arc<SettingsSnapshot>>>>,
}

impl SettingsCache {
    /// Seed missing keys with factory defaults, then load the snapshot.
    pub fn load(store: Arc<Store>) -> Result<Self> {
        store.with_conn(seed_defaults)?;
        let raw = store.with_conn(read_all)?;
        Ok(Self {
            store,
            current: RwLock::new(Arc::new(SettingsSnapshot::from_raw(&raw))),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// The current typed snapshot.
    pub fn snapshot(&self) -> Arc<SettingsSnapshot> {
        let guard = self.current.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&guard)
    }

    /// Raw key-value pairs as stored.
    pub fn raw(&self) -> Result<HashMap<String, String>> {
        self.store.with_conn(read_all)
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.store.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [key],
                |row| row.get(0),
            ).optional()?)
        })
    }

    /// Write one key, reload the snapshot and notify subscribers.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_many(&[(key, value)])
    }

    /// Write several keys atomically; subscribers see a single change.
    pub fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        self.store.transaction(|conn| {
            for (key, value) in pairs {
                conn.execute(
                    "INSERT INTO settings (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;
            }
            Ok(())
        })?;
        self.reload()
    }

    /// Remove a key so the compiled default applies again.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.store.with_conn(|conn| {
            conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
            Ok(())
        })?;
        self.reload()
    }

    /// Re-read the store, swap the snapshot and notify subscribers.
    pub fn reload(&self) -> Result<()> {
        let raw = self.store.with_conn(read_all)?;
        let snapshot = Arc::new(SettingsSnapshot::from_raw(&raw));
        {
            let mut guard = self.current.write().unwrap_or_else(|p| p.into_inner());
            *guard = Arc::clone(&snapshot);
        }
        self.publish(snapshot);
        Ok(())
    }

    /// Receive every snapshot published after this call.
    pub fn subscribe(&self) -> Receiver<Arc<SettingsSnapshot>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().unwrap_or_else(|p| p.into_inner()).push(tx);
        rx
    }

    fn publish(&self, snapshot: Arc<SettingsSnapshot>) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        // Dropped receivers are pruned here
        subscribers.retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }
}

fn seed_defaults(conn: &Connection) -> Result<()> {
    for (key, value) in SettingsSnapshot::default_raw() {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2) ON CONFLICT(key) DO NOTHING",
            params![key, value],
        )?;
    }
    Ok(())
}

fn read_all(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let pairs = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot::{KEY_JOB_CONCURRENCY, KEY_THUMBNAIL_RESOLUTION};

    fn cache() -> SettingsCache {
        let store = Arc::new(Store::open_in_memory().unwrap());
        SettingsCache::load(store).unwrap()
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let first = SettingsCache::load(Arc::clone(&store)).unwrap();
        first.set(KEY_THUMBNAIL_RESOLUTION, "360p").unwrap();

        let second = SettingsCache::load(store).unwrap();
        assert_eq!(second.snapshot().thumbnail_resolution, "360p");
    }

    #[test]
    fn test_set_reloads_and_notifies() {
        let cache = cache();
        let rx = cache.subscribe();

        cache.set(KEY_JOB_CONCURRENCY, "{\"thumbnail\": 3}").unwrap();

        let published = rx.try_recv().unwrap();
        assert_eq!(published.concurrency_override("thumbnail"), Some(3));
        assert_eq!(cache.snapshot().concurrency_override("thumbnail"), Some(3));
    }

    #[test]
    fn test_old_snapshot_is_unaffected_by_write() {
        let cache = cache();
        let before = cache.snapshot();
        cache.set(KEY_THUMBNAIL_RESOLUTION, "480p").unwrap();
        assert_eq!(before.thumbnail_resolution, "240p");
        assert_eq!(cache.snapshot().thumbnail_resolution, "480p");
    }

    #[test]
    fn test_bad_value_is_stored_but_snapshot_falls_back() {
        let cache = cache();
        cache.set(KEY_JOB_CONCURRENCY, "{{{").unwrap();
        assert_eq!(cache.get_raw(KEY_JOB_CONCURRENCY).unwrap().as_deref(), Some("{{{"));
        assert!(cache.snapshot().job_concurrency.is_empty());
    }

    #[test]
    fn test_delete_restores_default() {
        let cache = cache();
        cache.set(KEY_THUMBNAIL_RESOLUTION, "480p").unwrap();
        cache.delete(KEY_THUMBNAIL_RESOLUTION).unwrap();
        assert_eq!(cache.snapshot().thumbnail_resolution, "240p");
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let cache = cache();
        drop(cache.subscribe());
        cache.set(KEY_THUMBNAIL_RESOLUTION, "480p").unwrap();
        assert!(cache.subscribers.lock().unwrap().is_empty());
    }
}
