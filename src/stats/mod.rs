// Live stats: aggregate counters plus a throttled broadcaster.
//
// Change notifications arriving within one throttle window coalesce into a
// single trailing broadcast, emitted no earlier than the first notification
// plus the window and never sooner than one window after the last broadcast.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::Disks;

use crate::constants::STATS_THROTTLE_MS;
use crate::db::{schema, Store};
use crate::error::Result;
use crate::jobs::progress::{Event, Notifier};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStats {
    pub media_by_type: BTreeMap<String, i64>,
    pub total_files: i64,
    pub total_bytes: i64,
    pub disk_free: u64,
    pub disk_total: u64,
}

/// Recompute the aggregate from the store and the host disk holding `disk_path`.
pub fn collect(store: &Store, disk_path: &Path) -> Result<LiveStats> {
    let (media_by_type, total_files, total_bytes) = store.with_conn(|conn| {
        let by_type = schema::count_media_by_type(conn)?.into_iter().collect();
        Ok((by_type, schema::count_files(conn, None)?, schema::total_file_bytes(conn)?))
    })?;
    let (disk_free, disk_total) = disk_space(disk_path);
    Ok(LiveStats {
        media_by_type,
        total_files,
        total_bytes,
        disk_free,
        disk_total,
    })
}

/// Free and total bytes of the disk whose mount point is the longest prefix of `path`.
fn disk_space(path: &Path) -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| (d.available_space(), d.total_space()))
        .unwrap_or((0, 0))
}

#[derive(Default)]
struct ThrottleState {
    pending_since: Option<Instant>,
    last_broadcast: Option<Instant>,
    stopped: bool,
}

pub struct StatsBroadcaster {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    disk_path: PathBuf,
    window: Duration,
    state: Mutex<ThrottleState>,
    cvar: Condvar,
}

impl StatsBroadcaster {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>, disk_path: PathBuf) -> Self {
        Self {
            store,
            notifier,
            disk_path,
            window: Duration::from_millis(STATS_THROTTLE_MS),
            state: Mutex::new(ThrottleState::default()),
            cvar: Condvar::new(),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Record that counters changed. Cheap; never blocks on the store.
    pub fn notify_changed(&self) {
        let mut state = self.lock();
        if state.pending_since.is_none() {
            state.pending_since = Some(Instant::now());
            self.cvar.notify_all();
        }
    }

    /// Collect and push immediately, outside the throttle.
    pub fn broadcast_now(&self) -> Result<LiveStats> {
        let stats = collect(&self.store, &self.disk_path)?;
        self.notifier.emit(Event::Stats(stats.clone()));
        Ok(stats)
    }

    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let this = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("stats-broadcaster".into())
            .spawn(move || this.run())?;
        Ok(handle)
    }

    pub fn stop(&self) {
        self.lock().stopped = true;
        self.cvar.notify_all();
    }

    fn run(&self) {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return;
            }
            let first = match state.pending_since {
                Some(first) => first,
                None => {
                    state = self.cvar.wait(state).unwrap_or_else(|p| p.into_inner());
                    continue;
                }
            };

            let mut due = first + self.window;
            if let Some(last) = state.last_broadcast {
                due = due.max(last + self.window);
            }
            let now = Instant::now();
            if now < due {
                state = self.cvar
                    .wait_timeout(state, due - now)
                    .unwrap_or_else(|p| p.into_inner())
                    .0;
                continue;
            }

            state.pending_since = None;
            state.last_broadcast = Some(now);
            drop(state);
            if let Err(e) = self.broadcast_now() {
                log::warn!("Failed to collect live stats: {}", e);
            }
            state = self.lock();
        }
    }

    fn lock(&self) -> MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}
