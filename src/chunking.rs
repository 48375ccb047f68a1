use crate::cache::{CacheConfig, CacheStats, ChunkCache};
use crate::models::{AssetMetadata, ChunkRecord, DecodedWindow};
use crate::store::{Collection, PersistentStore, StoreError, StoredRecord};
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Tolerance for comparing second offsets against asset bounds
const TIME_EPSILON: f64 = 1e-9;

/// Tolerance (in samples) absorbed when converting seconds to sample indices
const SAMPLE_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum ChunkStoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Window at {offset}s for {duration}s exceeds asset duration {total}s")]
    OutOfRange {
        offset: f64,
        duration: f64,
        total: f64,
    },
    #[error("Chunk start {start_second}s is not divisible by chunk duration {chunk_seconds}s")]
    MisalignedChunk {
        start_second: u32,
        chunk_seconds: u32,
    },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Record encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration for chunked storage
#[derive(Debug, Clone)]
pub struct ChunkStoreConfig {
    /// Duration of each chunk in seconds (default: 5)
    pub chunk_seconds: u32,
    pub cache: CacheConfig,
    /// Chunk reads in flight per window read (default: 4)
    pub max_concurrent_reads: usize,
}

impl Default for ChunkStoreConfig {
    fn default() -> Self {
        ChunkStoreConfig {
            chunk_seconds: 5,
            cache: CacheConfig::default(),
            max_concurrent_reads: 4,
        }
    }
}

/// Splits decoded assets into fixed-duration chunks and reassembles
/// arbitrary windows from them
///
/// Reads are side-effect free (apart from the chunk cache) and safe to run
/// concurrently. Saving an asset while it is being read is a caller error.
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn PersistentStore>,
    config: ChunkStoreConfig,
    cache: ChunkCache,
}

impl std::fmt::Debug for ChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStore")
            .field("store", &"<dyn PersistentStore>")
            .field("config", &self.config)
            .finish()
    }
}

impl ChunkStore {
    pub fn new(store: Arc<dyn PersistentStore>, config: ChunkStoreConfig) -> Self {
        let cache = ChunkCache::new(config.cache.clone());
        Self {
            store,
            config,
            cache,
        }
    }

    pub fn chunk_seconds(&self) -> u32 {
        self.config.chunk_seconds
    }

    /// Persist a fully decoded asset as chunks, then its metadata record
    ///
    /// Metadata is written last so a reader never observes metadata for an
    /// asset whose chunks are incomplete.
    pub async fn save_asset(
        &self,
        name: &str,
        channels: &[Vec<f32>],
        sample_rate: u32,
    ) -> Result<AssetMetadata, ChunkStoreError> {
        if name.is_empty() {
            return Err(ChunkStoreError::InvalidInput(
                "Asset name cannot be empty".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(ChunkStoreError::InvalidInput(
                "Sample rate cannot be zero".to_string(),
            ));
        }
        if self.config.chunk_seconds == 0 {
            return Err(ChunkStoreError::InvalidInput(
                "Chunk duration cannot be zero".to_string(),
            ));
        }
        let frames = match channels.first() {
            Some(first) => first.len(),
            None => {
                return Err(ChunkStoreError::InvalidInput(
                    "Asset has no channels".to_string(),
                ))
            }
        };
        if channels.iter().any(|c| c.len() != frames) {
            return Err(ChunkStoreError::InvalidInput(
                "Channels have differing lengths".to_string(),
            ));
        }

        // A previous save may have used a longer duration or a different chunk size
        let previous = self.metadata(name).await?;

        let chunk_seconds = self.config.chunk_seconds;
        let chunk_samples = sample_rate as usize * chunk_seconds as usize;

        let mut records = Vec::with_capacity(frames.div_ceil(chunk_samples));
        let mut offset = 0usize;
        while offset < frames {
            let end = (offset + chunk_samples).min(frames);
            let start_second = (offset / sample_rate as usize) as u32;
            let chunk = ChunkRecord {
                id: ChunkRecord::chunk_id(name, start_second),
                name: name.to_string(),
                sample_rate,
                start_second,
                sample_count: end - offset,
                channel_data: channels.iter().map(|c| c[offset..end].to_vec()).collect(),
            };
            records.push(StoredRecord::new(chunk.id.clone(), bincode::serialize(&chunk)?));
            offset = end;
        }

        let chunk_count = records.len() as u32;
        let new_ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
        self.store.put_records(Collection::Chunks, records).await?;
        self.cache.invalidate_asset(name);

        let metadata = AssetMetadata {
            name: name.to_string(),
            channel_count: channels.len() as u16,
            sample_rate,
            total_duration: frames as f64 / sample_rate as f64,
            chunk_count,
            chunk_seconds,
            created_at: Utc::now(),
        };
        self.store
            .put_records(
                Collection::Metadata,
                vec![StoredRecord::new(name, bincode::serialize(&metadata)?)],
            )
            .await?;

        if let Some(previous) = previous {
            let stale: Vec<String> = previous
                .chunk_starts()
                .map(|start| ChunkRecord::chunk_id(name, start))
                .filter(|id| !new_ids.contains(id))
                .collect();
            if !stale.is_empty() {
                debug!("Removing {} stale chunks of {}", stale.len(), name);
                self.store.delete_records(Collection::Chunks, &stale).await?;
            }
        }

        info!(
            "Saved asset {}: {:.3}s, {} channels @ {} Hz in {} chunks",
            name, metadata.total_duration, metadata.channel_count, sample_rate, chunk_count
        );

        Ok(metadata)
    }

    /// Get an asset's metadata, if the asset has been fully saved
    pub async fn metadata(&self, name: &str) -> Result<Option<AssetMetadata>, ChunkStoreError> {
        match self.store.get_record(Collection::Metadata, name).await? {
            Some(payload) => Ok(Some(bincode::deserialize(&payload)?)),
            None => Ok(None),
        }
    }

    async fn require_metadata(&self, name: &str) -> Result<AssetMetadata, ChunkStoreError> {
        self.metadata(name)
            .await?
            .ok_or_else(|| ChunkStoreError::NotFound(format!("metadata for asset {}", name)))
    }

    /// Low-level accessor for a single chunk by its start second
    pub async fn chunk(
        &self,
        name: &str,
        start_second: u32,
    ) -> Result<Arc<ChunkRecord>, ChunkStoreError> {
        let metadata = self.require_metadata(name).await?;
        self.chunk_for(&metadata, start_second).await
    }

    async fn chunk_for(
        &self,
        metadata: &AssetMetadata,
        start_second: u32,
    ) -> Result<Arc<ChunkRecord>, ChunkStoreError> {
        if metadata.chunk_seconds == 0 || start_second % metadata.chunk_seconds != 0 {
            return Err(ChunkStoreError::MisalignedChunk {
                start_second,
                chunk_seconds: metadata.chunk_seconds,
            });
        }

        let chunk_id = ChunkRecord::chunk_id(&metadata.name, start_second);
        if let Some(chunk) = self.cache.get(&chunk_id) {
            return Ok(chunk);
        }

        let payload = self
            .store
            .get_record(Collection::Chunks, &chunk_id)
            .await?
            .ok_or_else(|| ChunkStoreError::NotFound(format!("chunk {}", chunk_id)))?;
        let chunk: Arc<ChunkRecord> = Arc::new(bincode::deserialize(&payload)?);
        self.cache.put(chunk.clone());

        Ok(chunk)
    }

    /// Reassemble the window [offset, offset + duration) of an asset
    pub async fn read_window(
        &self,
        name: &str,
        offset: f64,
        duration: f64,
    ) -> Result<DecodedWindow, ChunkStoreError> {
        let metadata = self.require_metadata(name).await?;

        if !offset.is_finite()
            || !duration.is_finite()
            || offset < 0.0
            || duration < 0.0
            || offset + duration > metadata.total_duration + TIME_EPSILON
        {
            return Err(ChunkStoreError::OutOfRange {
                offset,
                duration,
                total: metadata.total_duration,
            });
        }

        let chunk_seconds = metadata.chunk_seconds;
        let aligned_start = (offset / chunk_seconds as f64).floor() as u32 * chunk_seconds;
        let local_offset = offset - aligned_start as f64;
        let asset_end = metadata.chunk_count * chunk_seconds;

        // Every chunk that could still overlap the requested window
        let mut starts = Vec::new();
        let mut start = aligned_start;
        while ((start - aligned_start) as f64) < local_offset + duration && start < asset_end {
            starts.push(start);
            start += chunk_seconds;
        }

        debug!(
            "Reading {} [{:.3}s, +{:.3}s) from {} chunks starting at {}s",
            name,
            offset,
            duration,
            starts.len(),
            aligned_start
        );

        let mut chunks: Vec<(u32, Arc<ChunkRecord>)> = stream::iter(starts)
            .map(|start| {
                let metadata = &metadata;
                async move {
                    let chunk = self.chunk_for(metadata, start).await?;
                    Ok::<_, ChunkStoreError>((start, chunk))
                }
            })
            .buffer_unordered(self.config.max_concurrent_reads.max(1))
            .try_collect()
            .await?;

        // Reads may complete out of order
        chunks.sort_by_key(|(start, _)| *start);

        let channel_count = metadata.channel_count as usize;
        let total_len: usize = chunks.iter().map(|(_, c)| c.sample_count).sum();
        let mut stitched: Vec<Vec<f32>> = vec![Vec::with_capacity(total_len); channel_count];
        for (_, chunk) in &chunks {
            for (buffer, data) in stitched.iter_mut().zip(&chunk.channel_data) {
                buffer.extend_from_slice(data);
            }
        }

        let rate = metadata.sample_rate as f64;
        let first = ((local_offset * rate + SAMPLE_EPSILON).floor() as usize).min(total_len);
        let count = (duration * rate - SAMPLE_EPSILON).ceil().max(0.0) as usize;
        let last = (first + count).min(total_len);

        let channels = stitched
            .into_iter()
            .map(|mut buffer| {
                buffer.truncate(last);
                buffer.drain(..first);
                buffer
            })
            .collect();

        Ok(DecodedWindow {
            channel_count: metadata.channel_count,
            sample_rate: metadata.sample_rate,
            channels,
        })
    }

    /// Remove an asset's metadata, then its chunks
    pub async fn delete_asset(&self, name: &str) -> Result<(), ChunkStoreError> {
        let metadata = self.require_metadata(name).await?;

        self.store
            .delete_records(Collection::Metadata, &[name.to_string()])
            .await?;

        let chunk_ids: Vec<String> = metadata
            .chunk_starts()
            .map(|start| ChunkRecord::chunk_id(name, start))
            .collect();
        self.store
            .delete_records(Collection::Chunks, &chunk_ids)
            .await?;
        self.cache.invalidate_asset(name);

        info!("Deleted asset {} ({} chunks)", name, chunk_ids.len());
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
