//! The "polite" freezetag cache: an LRU of parsed [`Freezetag`]s that only
//! evicts entries nobody has open, plus a keep-alive window so a freezetag
//! touched only by the initial scan (never actually `open()`ed) still gets
//! purged eventually instead of sitting in memory forever. Grounded on
//! `original_source/freezetag/freezefs.py`'s `PoliteLRUCache` and
//! `_schedule_purge_ftag`/`_can_purge_ftag`.

use freezetag_container::Freezetag;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// How long a freezetag lingers in cache, unopened, before a purge attempt
/// fires. Matches `freezefs.py::KEEPALIVE_TIME`.
const KEEPALIVE: Duration = Duration::from_secs(10);

/// Upper bound on how many freezetags stay cached even while idle. Beyond
/// this, the least-recently-used entry with no open references is evicted
/// immediately rather than waiting out its keep-alive window.
const MAX_CACHED: usize = 32;

#[derive(Default)]
struct RefState {
    open_count: u32,
    /// Bumped on every (re)schedule; a pending purge thread whose captured
    /// generation no longer matches is a no-op, which is how a schedule
    /// "cancels" an earlier one without an actual cancellable timer handle.
    generation: u64,
}

struct Inner {
    cache: LruCache<PathBuf, Arc<Freezetag>>,
    refs: HashMap<PathBuf, RefState>,
}

/// Guards the freezetag cache, its refcounts, and (implicitly, via the
/// generation counter) its pending keep-alive purges — the one mutex §5
/// calls for around this whole subsystem.
pub struct FreezetagRefCache {
    inner: Mutex<Inner>,
}

impl Default for FreezetagRefCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FreezetagRefCache {
    pub fn new() -> Self {
        FreezetagRefCache {
            inner: Mutex::new(Inner {
                cache: LruCache::unbounded(),
                refs: HashMap::new(),
            }),
        }
    }

    /// Loads (or returns the cached) freezetag and schedules an eventual
    /// purge, without incrementing its open refcount. Used when the
    /// indexer merely needs to read a freezetag's contents, as opposed to
    /// `open()` keeping it alive for an active file handle.
    pub fn load_and_schedule_purge(
        self: &Arc<Self>,
        path: &Path,
    ) -> Result<Arc<Freezetag>, freezetag_container::ContainerError> {
        let freezetag = {
            let mut inner = self.inner.lock();
            match inner.cache.get(path) {
                Some(ft) => ft.clone(),
                None => {
                    drop(inner);
                    let loaded = Arc::new(Freezetag::from_path(path)?);
                    inner = self.inner.lock();
                    inner.cache.put(path.to_path_buf(), loaded.clone());
                    loaded
                }
            }
        };
        self.enforce_capacity();
        self.schedule_purge(path.to_path_buf());
        Ok(freezetag)
    }

    /// Loads (or returns the cached) freezetag and increments its open
    /// refcount, keeping it pinned until a matching [`Self::release`].
    pub fn acquire(
        self: &Arc<Self>,
        path: &Path,
    ) -> Result<Arc<Freezetag>, freezetag_container::ContainerError> {
        let freezetag = {
            let mut inner = self.inner.lock();
            let ft = match inner.cache.get(path) {
                Some(ft) => ft.clone(),
                None => {
                    drop(inner);
                    let loaded = Arc::new(Freezetag::from_path(path)?);
                    inner = self.inner.lock();
                    inner.cache.put(path.to_path_buf(), loaded.clone());
                    loaded
                }
            };
            inner.refs.entry(path.to_path_buf()).or_default().open_count += 1;
            ft
        };
        self.enforce_capacity();
        Ok(freezetag)
    }

    /// Releases one reference taken by [`Self::acquire`] and schedules a
    /// keep-alive purge for when the last reference is gone.
    pub fn release(self: &Arc<Self>, path: PathBuf) {
        {
            let mut inner = self.inner.lock();
            if let Some(state) = inner.refs.get_mut(&path) {
                state.open_count = state.open_count.saturating_sub(1);
            }
        }
        self.schedule_purge(path);
    }

    /// Drops a freezetag from cache immediately, regardless of refcount —
    /// used when the backing file itself was deleted or moved out from
    /// under us, matching `_purge_ftag`'s unconditional removal path.
    pub fn force_purge(&self, path: &Path) {
        let mut inner = self.inner.lock();
        inner.cache.pop(path);
        inner.refs.remove(path);
    }

    fn schedule_purge(self: &Arc<Self>, path: PathBuf) {
        let generation = {
            let mut inner = self.inner.lock();
            let state = inner.refs.entry(path.clone()).or_default();
            state.generation += 1;
            state.generation
        };
        let this = Arc::clone(self);
        std::thread::spawn(move || {
            std::thread::sleep(KEEPALIVE);
            this.try_purge(&path, generation);
        });
    }

    fn try_purge(&self, path: &Path, generation: u64) {
        let mut inner = self.inner.lock();
        let Some(state) = inner.refs.get(path) else {
            return;
        };
        if state.generation != generation || state.open_count > 0 {
            return;
        }
        inner.cache.pop(path);
        inner.refs.remove(path);
    }

    /// Evicts least-recently-used, reference-free entries down to
    /// `MAX_CACHED`, without waiting for their keep-alive window. Entries
    /// with open references are never evicted regardless of LRU order.
    fn enforce_capacity(&self) {
        let mut inner = self.inner.lock();
        if inner.cache.len() <= MAX_CACHED {
            return;
        }
        let candidates: Vec<PathBuf> = inner
            .cache
            .iter()
            .rev()
            .map(|(p, _)| p.clone())
            .filter(|p| inner.refs.get(p).map(|s| s.open_count == 0).unwrap_or(true))
            .collect();
        let mut over = inner.cache.len() - MAX_CACHED;
        for path in candidates {
            if over == 0 {
                break;
            }
            inner.cache.pop(&path);
            inner.refs.remove(&path);
            over -= 1;
        }
    }

    #[cfg(test)]
    fn is_cached(&self, path: &Path) -> bool {
        self.inner.lock().cache.contains(path)
    }

    #[cfg(test)]
    fn open_count(&self, path: &Path) -> u32 {
        self.inner.lock().refs.get(path).map(|s| s.open_count).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_sample_ftag(dir: &std::path::Path, name: &str) -> PathBuf {
        use freezetag_container::{Freezetag, Frozen, Mode};
        let frozen = Frozen {
            mode: Mode::Default,
            music_checksum: [0u8; 8],
            metadata_checksum: [0u8; 4],
            root: "lib".to_string(),
            files: vec![],
        };
        let freezetag = Freezetag::new(1, frozen);
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&freezetag.bytes().unwrap()).unwrap();
        path
    }

    #[test]
    fn acquire_pins_and_release_schedules_eventual_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_ftag(dir.path(), "a.ftag");
        let cache = Arc::new(FreezetagRefCache::new());

        let _ft = cache.acquire(&path).unwrap();
        assert!(cache.is_cached(&path));
        assert_eq!(cache.open_count(&path), 1);

        cache.release(path.clone());
        assert_eq!(cache.open_count(&path), 0);
        // Still cached immediately after release; the keep-alive window
        // hasn't elapsed yet.
        assert!(cache.is_cached(&path));
    }

    #[test]
    fn force_purge_drops_regardless_of_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_sample_ftag(dir.path(), "a.ftag");
        let cache = Arc::new(FreezetagRefCache::new());

        let _ft = cache.acquire(&path).unwrap();
        cache.force_purge(&path);
        assert!(!cache.is_cached(&path));
        assert_eq!(cache.open_count(&path), 0);
    }
}
