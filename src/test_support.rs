// Test support utilities for both unit and integration tests

use crate::chunking::{ChunkStore, ChunkStoreConfig};
use crate::config::PlaybackConfig;
use crate::loader::{AssetLoader, LoadError};
use crate::models::{DecodedAsset, DecodedWindow};
use crate::playback::{ChainId, OutputSink, PlaybackContext};
use crate::store::{Collection, MemoryStore, PersistentStore, StoreError, StoredRecord};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sample value the synthetic assets carry at a given frame
///
/// Unique per frame and channel, so a scheduled window can be traced back to
/// the offset it was read from.
pub fn synthetic_sample(channel: usize, frame: usize) -> f32 {
    frame as f32 + channel as f32 * 0.25
}

/// Deterministic asset of the given length
pub fn synthetic_asset(sample_rate: u32, channel_count: usize, duration: f64) -> DecodedAsset {
    let frames = (duration * sample_rate as f64).round() as usize;
    DecodedAsset {
        sample_rate,
        channels: (0..channel_count)
            .map(|ch| (0..frames).map(|i| synthetic_sample(ch, i)).collect())
            .collect(),
    }
}

/// One `schedule` call seen by a [`RecordingSink`]
#[derive(Debug, Clone)]
pub struct ScheduledSegment {
    pub chain: ChainId,
    /// Clock time the segment was scheduled to start at
    pub when: f64,
    /// Clock time the schedule call was made
    pub scheduled_at: f64,
    pub frames: usize,
    pub duration: f64,
    /// First sample of channel 0, if any
    pub first_sample: Option<f32>,
}

#[derive(Debug, Default)]
struct RecordingState {
    next_chain: u64,
    scheduled: Vec<ScheduledSegment>,
    gains: HashMap<ChainId, f32>,
    detached: HashSet<ChainId>,
}

/// Output sink that records everything instead of playing it
///
/// Its clock is Tokio's, so tests running with a paused clock control it
/// exactly.
#[derive(Debug)]
pub struct RecordingSink {
    origin: tokio::time::Instant,
    state: Mutex<RecordingState>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            state: Mutex::new(RecordingState::default()),
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledSegment> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn scheduled_on(&self, chain: ChainId) -> Vec<ScheduledSegment> {
        self.scheduled()
            .into_iter()
            .filter(|s| s.chain == chain)
            .collect()
    }

    pub fn gain(&self, chain: ChainId) -> Option<f32> {
        self.state.lock().unwrap().gains.get(&chain).copied()
    }

    pub fn is_detached(&self, chain: ChainId) -> bool {
        self.state.lock().unwrap().detached.contains(&chain)
    }
}

impl OutputSink for RecordingSink {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn create_chain(&self, gain: f32) -> ChainId {
        let mut state = self.state.lock().unwrap();
        state.next_chain += 1;
        let chain = ChainId(state.next_chain);
        state.gains.insert(chain, gain);
        chain
    }

    fn set_gain(&self, chain: ChainId, gain: f32) {
        self.state.lock().unwrap().gains.insert(chain, gain);
    }

    fn detach(&self, chain: ChainId) {
        self.state.lock().unwrap().detached.insert(chain);
    }

    fn schedule(&self, chain: ChainId, window: Arc<DecodedWindow>, when: f64) {
        let scheduled_at = self.now();
        self.state.lock().unwrap().scheduled.push(ScheduledSegment {
            chain,
            when,
            scheduled_at,
            frames: window.frames(),
            duration: window.duration(),
            first_sample: window.channels.first().and_then(|c| c.first().copied()),
        });
    }
}

/// Loader producing [`synthetic_asset`]s
pub struct SyntheticLoader {
    sample_rate: u32,
    channel_count: usize,
    default_duration: f64,
    durations: HashMap<String, f64>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl SyntheticLoader {
    pub fn new(sample_rate: u32, channel_count: usize, default_duration: f64) -> Self {
        Self {
            sample_rate,
            channel_count,
            default_duration,
            durations: HashMap::new(),
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn with_duration(mut self, asset: &str, duration: f64) -> Self {
        self.durations.insert(asset.to_string(), duration);
        self
    }

    /// Number of `load` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AssetLoader for SyntheticLoader {
    async fn load(&self, asset: &str) -> Result<DecodedAsset, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(LoadError::Other(format!("synthetic failure for {}", asset)));
        }
        let duration = self
            .durations
            .get(asset)
            .copied()
            .unwrap_or(self.default_duration);
        Ok(synthetic_asset(
            self.sample_rate,
            self.channel_count,
            duration,
        ))
    }
}

/// Store wrapper adding latency (and optionally failures) to chunk reads
///
/// Metadata reads and all writes go straight through.
pub struct DelayedStore {
    inner: Arc<dyn PersistentStore>,
    delay: Mutex<Duration>,
    chunk_reads: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
}

impl DelayedStore {
    pub fn new(inner: Arc<dyn PersistentStore>, delay: Duration) -> Self {
        Self {
            inner,
            delay: Mutex::new(delay),
            chunk_reads: AtomicUsize::new(0),
            fail_after: Mutex::new(None),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Fail every chunk read after the first `reads`
    pub fn fail_after(&self, reads: usize) {
        *self.fail_after.lock().unwrap() = Some(reads);
    }

    pub fn chunk_reads(&self) -> usize {
        self.chunk_reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PersistentStore for DelayedStore {
    async fn get_record(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        if collection == Collection::Chunks {
            let read = self.chunk_reads.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = *self.delay.lock().unwrap();
            let fail_after = *self.fail_after.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fail_after.is_some_and(|limit| read > limit) {
                return Err(StoreError::Backend(format!("injected read failure for {}", id)));
            }
        }
        self.inner.get_record(collection, id).await
    }

    async fn put_records(
        &self,
        collection: Collection,
        records: Vec<StoredRecord>,
    ) -> Result<(), StoreError> {
        self.inner.put_records(collection, records).await
    }

    async fn delete_records(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<(), StoreError> {
        self.inner.delete_records(collection, ids).await
    }
}

/// Playback context over an in-memory store, a synthetic loader and a recording sink
pub struct TestRig {
    pub ctx: PlaybackContext,
    pub sink: Arc<RecordingSink>,
    pub loader: Arc<SyntheticLoader>,
    pub delayed: Arc<DelayedStore>,
}

impl TestRig {
    /// 100 Hz mono assets, 5s chunks and windows, 2s fetch lead
    pub fn new(loader: SyntheticLoader) -> Self {
        let delayed = Arc::new(DelayedStore::new(
            Arc::new(MemoryStore::new()),
            Duration::ZERO,
        ));
        let store = ChunkStore::new(delayed.clone(), ChunkStoreConfig::default());
        let sink = Arc::new(RecordingSink::new());
        let loader = Arc::new(loader);
        let ctx = PlaybackContext::new(
            store,
            loader.clone(),
            sink.clone(),
            PlaybackConfig::default(),
        );
        Self {
            ctx,
            sink,
            loader,
            delayed,
        }
    }
}
