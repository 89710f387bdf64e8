//! Persistent per-file metadata cache.
//!
//! Stores the most recent successful transform and docblock extraction per
//! file, keyed by `(absolute path, field, transform-options hash)`. Entries
//! are validated against the file's modified time when read; stale entries
//! are dropped. The storage medium is behind [CacheStore]; only the
//! read/write contract is fixed.

use std::{
    cell::RefCell,
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Writes are held back until this much time passed since the last one.
const WRITE_DEBOUNCE: Duration = Duration::from_secs(2);

/// Read/write contract for the cache's backing storage.
pub trait CacheStore {
    /// # Errors
    /// I/O failure reading the stored blob. A missing blob is `Ok(None)`.
    fn load(&self) -> io::Result<Option<String>>;

    /// # Errors
    /// I/O failure writing the blob.
    fn save(&self, data: &str) -> io::Result<()>;
}

/// Store backed by a single file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, data: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, data)
    }
}

/// In-memory store for tests and cache-less configurations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RefCell<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(self.data.borrow().clone())
    }

    fn save(&self, data: &str) -> io::Result<()> {
        *self.data.borrow_mut() = Some(data.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheRecord {
    mtime_ms: u64,
    value: String,
}

/// path → field → options-hash → record
type Entries = FxHashMap<String, FxHashMap<String, FxHashMap<String, CacheRecord>>>;

pub struct MetaCache {
    store: Box<dyn CacheStore>,
    entries: Entries,
    dirty: bool,
    last_write: Option<Instant>,
}

impl MetaCache {
    /// Open a cache over `store`, loading whatever it holds. A malformed
    /// blob is discarded rather than reported: the cache is best-effort.
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        let entries = store
            .load()
            .ok()
            .flatten()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default();
        Self { store, entries, dirty: false, last_write: None }
    }

    pub fn with_file<P: AsRef<Path>>(path: P) -> Self {
        Self::new(Box::new(FileStore::new(path)))
    }

    /// Fetch a validated entry. A stored entry whose modified time no longer
    /// matches `mtime` is stale and dropped.
    pub fn get(
        &mut self,
        path: &Path,
        field: &str,
        options_key: u64,
        mtime: Option<SystemTime>,
    ) -> Option<String> {
        let path_key = path.to_string_lossy();
        let records = self.entries.get_mut(path_key.as_ref())?.get_mut(field)?;
        let key = options_key.to_string();
        let record = records.get(&key)?;
        if record.mtime_ms != mtime_ms(mtime) {
            records.remove(&key);
            self.dirty = true;
            return None;
        }
        Some(record.value.clone())
    }

    pub fn set(
        &mut self,
        path: &Path,
        field: &str,
        options_key: u64,
        mtime: Option<SystemTime>,
        value: String,
    ) {
        self.entries
            .entry(path.to_string_lossy().into_owned())
            .or_default()
            .entry(field.to_string())
            .or_default()
            .insert(options_key.to_string(), CacheRecord { mtime_ms: mtime_ms(mtime), value });
        self.dirty = true;
        self.maybe_persist();
    }

    /// Drop every field stored for `path`. Called on file change events.
    pub fn invalidate(&mut self, path: &Path) {
        let path_key = path.to_string_lossy();
        if self.entries.remove(path_key.as_ref()).is_some() {
            self.dirty = true;
        }
    }

    fn maybe_persist(&mut self) {
        let due = self.last_write.is_none_or(|at| at.elapsed() >= WRITE_DEBOUNCE);
        if self.dirty && due {
            self.flush();
        }
    }

    /// Write pending entries out now, regardless of the debounce window.
    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        match serde_json::to_string(&self.entries) {
            Ok(data) => {
                if let Err(e) = self.store.save(&data) {
                    tracing::debug!(error = ?e, "meta cache write failed");
                }
            }
            Err(e) => tracing::debug!(error = ?e, "meta cache serialize failed"),
        }
        self.dirty = false;
        self.last_write = Some(Instant::now());
    }
}

impl Drop for MetaCache {
    fn drop(&mut self) {
        self.flush();
    }
}

fn mtime_ms(mtime: Option<SystemTime>) -> u64 {
    mtime
        .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mtime(secs: u64) -> Option<SystemTime> {
        SystemTime::UNIX_EPOCH.checked_add(Duration::from_secs(secs))
    }

    #[test]
    fn round_trips_through_the_store() {
        let mut cache = MetaCache::new(Box::new(MemoryStore::new()));
        cache.set(Path::new("/r/a.js"), "transform", 1, mtime(1), "code".to_string());
        assert_eq!(
            cache.get(Path::new("/r/a.js"), "transform", 1, mtime(1)),
            Some("code".to_string())
        );
        // Different options key is a different entry.
        assert_eq!(cache.get(Path::new("/r/a.js"), "transform", 2, mtime(1)), None);
    }

    #[test]
    fn stale_mtime_drops_the_entry() {
        let mut cache = MetaCache::new(Box::new(MemoryStore::new()));
        cache.set(Path::new("/r/a.js"), "transform", 1, mtime(1), "old".to_string());
        assert_eq!(cache.get(Path::new("/r/a.js"), "transform", 1, mtime(2)), None);
        // Dropped, not merely skipped.
        assert_eq!(cache.get(Path::new("/r/a.js"), "transform", 1, mtime(1)), None);
    }

    #[test]
    fn invalidate_clears_all_fields() {
        let mut cache = MetaCache::new(Box::new(MemoryStore::new()));
        cache.set(Path::new("/r/a.js"), "transform", 1, mtime(1), "x".to_string());
        cache.set(Path::new("/r/a.js"), "docblock", 0, mtime(1), "y".to_string());
        cache.invalidate(Path::new("/r/a.js"));
        assert_eq!(cache.get(Path::new("/r/a.js"), "transform", 1, mtime(1)), None);
        assert_eq!(cache.get(Path::new("/r/a.js"), "docblock", 0, mtime(1)), None);
    }

    #[test]
    fn persisted_entries_survive_reopen() {
        let store = std::rc::Rc::new(MemoryStore::new());

        struct Shared(std::rc::Rc<MemoryStore>);
        impl CacheStore for Shared {
            fn load(&self) -> io::Result<Option<String>> {
                self.0.load()
            }
            fn save(&self, data: &str) -> io::Result<()> {
                self.0.save(data)
            }
        }

        let mut cache = MetaCache::new(Box::new(Shared(std::rc::Rc::clone(&store))));
        cache.set(Path::new("/r/a.js"), "transform", 1, mtime(1), "code".to_string());
        cache.flush();
        drop(cache);

        let mut reopened = MetaCache::new(Box::new(Shared(store)));
        assert_eq!(
            reopened.get(Path::new("/r/a.js"), "transform", 1, mtime(1)),
            Some("code".to_string())
        );
    }
}
