use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;

use crate::TileGrid;

/// Fully normalized tile request identity. Float members are stored as raw
/// bits so equality stays structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    keys: Vec<String>,
    bounds: Option<[u64; 4]>,
    tilesize: (usize, usize),
    nodata: u64,
}

impl CacheKey {
    pub(crate) fn new(keys: &[String], bounds: Option<raster::Bounds>, tilesize: (usize, usize), nodata: f64) -> Self {
        CacheKey {
            keys: keys.to_vec(),
            bounds: bounds.map(|b| b.array().map(f64::to_bits)),
            tilesize,
            nodata: nodata.to_bits(),
        }
    }
}

struct CacheInner {
    entries: LruCache<CacheKey, Arc<TileGrid>>,
    bytes: usize,
}

/// Byte-budgeted strict LRU over decoded tile arrays.
///
/// Entries are shared immutably; a hit hands out another reference to the
/// cached buffer. Only successful reads are inserted, failures are never
/// cached.
pub struct TileCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl TileCache {
    /// `capacity` is the pixel-buffer budget in bytes.
    pub fn new(capacity: usize) -> Self {
        TileCache {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<Arc<TileGrid>> {
        self.lock().entries.get(key).cloned()
    }

    pub(crate) fn insert(&self, key: CacheKey, grid: Arc<TileGrid>) {
        let size = grid.byte_size();
        if size > self.capacity {
            // oversized entries would evict the whole cache for a single use
            return;
        }

        let mut inner = self.lock();
        if let Some(replaced) = inner.entries.push(key, grid) {
            inner.bytes -= replaced.1.byte_size();
        }
        inner.bytes += size;

        while inner.bytes > self.capacity {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => inner.bytes -= evicted.byte_size(),
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_size(&self) -> usize {
        self.lock().bytes
    }
}
