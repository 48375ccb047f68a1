use crate::models::ChunkRecord;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Configuration for the chunk cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached chunks (default: 32)
    pub max_chunks: usize,
    /// Maximum size of cached sample data in bytes (default: 64MB)
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_chunks: 32,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Bookkeeping for one cached chunk
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Asset the chunk belongs to
    asset: String,
    chunk: Arc<ChunkRecord>,
    size_bytes: usize,
    /// Access stamp (for LRU)
    last_accessed: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    /// chunk_id -> CacheEntry
    entries: HashMap<String, CacheEntry>,
    current_bytes: usize,
    clock: u64,
    hits: u64,
    misses: u64,
}

/// LRU cache of decoded chunk records
///
/// Shared by every reader of a `ChunkStore`; consecutive look-ahead windows
/// usually overlap a chunk, which is then served from here.
#[derive(Debug, Clone)]
pub struct ChunkCache {
    config: CacheConfig,
    state: Arc<Mutex<CacheState>>,
}

impl ChunkCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a chunk from cache if it exists
    pub fn get(&self, chunk_id: &str) -> Option<Arc<ChunkRecord>> {
        let mut state = self.lock();
        state.clock += 1;
        let stamp = state.clock;

        match state.entries.get_mut(chunk_id) {
            Some(entry) => {
                entry.last_accessed = stamp;
                let chunk = entry.chunk.clone();
                state.hits += 1;
                Some(chunk)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Put a chunk into the cache, evicting least recently used chunks as needed
    pub fn put(&self, chunk: Arc<ChunkRecord>) {
        let size_bytes = chunk.size_bytes();
        if self.config.max_chunks == 0 || size_bytes > self.config.max_bytes {
            return;
        }

        let mut state = self.lock();

        if let Some(old) = state.entries.remove(&chunk.id) {
            state.current_bytes = state.current_bytes.saturating_sub(old.size_bytes);
        }

        while state.current_bytes + size_bytes > self.config.max_bytes
            && !state.entries.is_empty()
        {
            Self::evict_lru(&mut state);
        }
        while state.entries.len() >= self.config.max_chunks && !state.entries.is_empty() {
            Self::evict_lru(&mut state);
        }

        state.clock += 1;
        let entry = CacheEntry {
            asset: chunk.name.clone(),
            size_bytes,
            last_accessed: state.clock,
            chunk: chunk.clone(),
        };
        state.current_bytes += size_bytes;
        state.entries.insert(chunk.id.clone(), entry);
    }

    /// Drop every cached chunk belonging to an asset
    pub fn invalidate_asset(&self, asset: &str) {
        let mut state = self.lock();
        let before = state.entries.len();
        let mut freed = 0;
        state.entries.retain(|_, entry| {
            if entry.asset == asset {
                freed += entry.size_bytes;
                false
            } else {
                true
            }
        });
        state.current_bytes = state.current_bytes.saturating_sub(freed);

        let removed = before - state.entries.len();
        if removed > 0 {
            debug!("Invalidated {} cached chunks for asset {}", removed, asset);
        }
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            total_chunks: state.entries.len(),
            total_bytes: state.current_bytes,
            max_chunks: self.config.max_chunks,
            max_bytes: self.config.max_bytes,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    fn evict_lru(state: &mut CacheState) {
        let lru_chunk_id = state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(id, _)| id.clone());

        if let Some(chunk_id) = lru_chunk_id {
            if let Some(entry) = state.entries.remove(&chunk_id) {
                state.current_bytes = state.current_bytes.saturating_sub(entry.size_bytes);
                debug!("Evicted chunk {} ({} bytes)", chunk_id, entry.size_bytes);
            }
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_chunks: usize,
    pub total_bytes: usize,
    pub max_chunks: usize,
    pub max_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(asset: &str, start_second: u32, samples: usize) -> Arc<ChunkRecord> {
        Arc::new(ChunkRecord {
            id: ChunkRecord::chunk_id(asset, start_second),
            name: asset.to_string(),
            sample_rate: 100,
            start_second,
            sample_count: samples,
            channel_data: vec![vec![0.0; samples]],
        })
    }

    #[test]
    fn test_evicts_least_recently_used_by_count() {
        let cache = ChunkCache::new(CacheConfig {
            max_chunks: 2,
            max_bytes: usize::MAX,
        });
        cache.put(chunk("a", 0, 10));
        cache.put(chunk("a", 5, 10));

        // Touch a-0 so a-5 becomes the LRU entry
        assert!(cache.get("a-0").is_some());
        cache.put(chunk("a", 10, 10));

        assert!(cache.get("a-0").is_some());
        assert!(cache.get("a-5").is_none());
        assert!(cache.get("a-10").is_some());
        assert_eq!(cache.stats().total_chunks, 2);
    }

    #[test]
    fn test_evicts_by_size() {
        // Each chunk is 10 samples * 4 bytes
        let cache = ChunkCache::new(CacheConfig {
            max_chunks: 100,
            max_bytes: 100,
        });
        cache.put(chunk("a", 0, 10));
        cache.put(chunk("a", 5, 10));
        cache.put(chunk("a", 10, 10));

        let stats = cache.stats();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_bytes, 80);
        assert!(cache.get("a-0").is_none());
    }

    #[test]
    fn test_oversized_chunk_is_not_cached() {
        let cache = ChunkCache::new(CacheConfig {
            max_chunks: 4,
            max_bytes: 16,
        });
        cache.put(chunk("a", 0, 10));
        assert_eq!(cache.stats().total_chunks, 0);
    }

    #[test]
    fn test_invalidate_asset_only_touches_that_asset() {
        let cache = ChunkCache::new(CacheConfig::default());
        cache.put(chunk("a", 0, 10));
        cache.put(chunk("a-0", 0, 10));
        cache.put(chunk("b", 0, 10));

        cache.invalidate_asset("a");

        assert!(cache.get("a-0").is_none());
        assert!(cache.get("a-0-0").is_some());
        assert!(cache.get("b-0").is_some());
        assert_eq!(cache.stats().total_bytes, 80);
    }

    #[test]
    fn test_hit_rate() {
        let cache = ChunkCache::new(CacheConfig::default());
        cache.put(chunk("a", 0, 10));
        assert!(cache.get("a-0").is_some());
        assert!(cache.get("a-5").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }
}
