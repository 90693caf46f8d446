use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::debug;

use crate::error::VisionError;

struct Entry {
    image: Arc<RgbaImage>,
    loaded_at: Instant,
}

/// Reference images keyed by path, expired after a fixed time to live.
///
/// Owned by the readiness gate; there is no process-wide instance. Safe to
/// share across the per-frame visual refresh workers.
pub struct TemplateCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl TemplateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_load<F>(&self, path: &str, load: F) -> Result<Arc<RgbaImage>, VisionError>
    where
        F: FnOnce(&str) -> Result<RgbaImage, VisionError>,
    {
        self.get_or_load_at(path, Instant::now(), load)
    }

    /// Return the cached image for `path`, loading it when absent or
    /// expired at `now`. Failed loads are not cached.
    pub fn get_or_load_at<F>(
        &self,
        path: &str,
        now: Instant,
        load: F,
    ) -> Result<Arc<RgbaImage>, VisionError>
    where
        F: FnOnce(&str) -> Result<RgbaImage, VisionError>,
    {
        if let Some(image) = self.lookup(path, now) {
            return Ok(image);
        }
        // Load outside the lock; two workers may race on the same path and
        // the later insert wins, which is harmless.
        let image = Arc::new(load(path)?);
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                path.to_string(),
                Entry {
                    image: Arc::clone(&image),
                    loaded_at: now,
                },
            );
        }
        debug!(path, "template loaded");
        Ok(image)
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        let ttl = self.ttl;
        entries.retain(|_, e| now.saturating_duration_since(e.loaded_at) < ttl);
        before - entries.len()
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, path: &str, now: Instant) -> Option<Arc<RgbaImage>> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(path)?;
        if now.saturating_duration_since(entry.loaded_at) < self.ttl {
            Some(Arc::clone(&entry.image))
        } else {
            None
        }
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3_600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn loader(calls: &Cell<u32>) -> impl FnOnce(&str) -> Result<RgbaImage, VisionError> + '_ {
        move |_| {
            calls.set(calls.get() + 1);
            Ok(RgbaImage::new(2, 2))
        }
    }

    #[test]
    fn second_lookup_hits_the_cache() {
        let cache = TemplateCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        let t0 = Instant::now();
        cache.get_or_load_at("a.png", t0, loader(&calls)).unwrap();
        cache
            .get_or_load_at("a.png", t0 + Duration::from_secs(1), loader(&calls))
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_entries_reload() {
        let cache = TemplateCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        let t0 = Instant::now();
        cache.get_or_load_at("a.png", t0, loader(&calls)).unwrap();
        cache
            .get_or_load_at("a.png", t0 + Duration::from_secs(61), loader(&calls))
            .unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn purge_removes_only_expired() {
        let cache = TemplateCache::new(Duration::from_secs(60));
        let calls = Cell::new(0);
        let t0 = Instant::now();
        cache.get_or_load_at("old.png", t0, loader(&calls)).unwrap();
        cache
            .get_or_load_at("new.png", t0 + Duration::from_secs(50), loader(&calls))
            .unwrap();
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(70)), 1);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn failed_load_is_not_cached() {
        let cache = TemplateCache::default();
        let err = cache.get_or_load("missing.png", |p| {
            Err(VisionError::TemplateLoad {
                path: p.to_string(),
                reason: "not found".into(),
            })
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
    }
}
