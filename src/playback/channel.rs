use super::output::{ChainId, OutputSink};
use super::progress::{EventHub, PlaybackEvent};
use super::{PlaybackError, END_EPSILON};
use crate::chunking::{ChunkStore, ChunkStoreError};
use crate::config::PlaybackConfig;
use crate::loader::AssetLoader;
use crate::models::DecodedWindow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc as tokio_mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Everything a channel needs from the outside world
///
/// Cheap to clone; every channel of a group shares one context (and so one
/// output clock).
#[derive(Clone)]
pub struct PlaybackContext {
    pub store: ChunkStore,
    pub loader: Arc<dyn AssetLoader>,
    pub sink: Arc<dyn OutputSink>,
    pub config: PlaybackConfig,
    pub events: EventHub,
}

impl PlaybackContext {
    pub fn new(
        store: ChunkStore,
        loader: Arc<dyn AssetLoader>,
        sink: Arc<dyn OutputSink>,
        config: PlaybackConfig,
    ) -> Self {
        Self {
            store,
            loader,
            sink,
            config: config.normalized(),
            events: EventHub::new(),
        }
    }

    pub fn subscribe(&self) -> tokio_mpsc::UnboundedReceiver<PlaybackEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for PlaybackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackContext")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}

/// A window fetched ahead of time for a known offset
struct PrimedSegment {
    offset: f64,
    window: Arc<DecodedWindow>,
}

struct ChannelState {
    /// None until loaded
    duration: Option<f64>,
    running: bool,
    /// The final segment is scheduled and the end timer is armed
    ending: bool,
    /// Output clock time at which `offset` played (or will play)
    start_clock: Option<f64>,
    /// Cursor offset in seconds
    offset: f64,
    primed: Option<PrimedSegment>,
    /// Active output chain; replaced on every stop
    chain: ChainId,
    gain: f32,
    fetch_timer: Option<JoinHandle<()>>,
    end_timer: Option<JoinHandle<()>>,
    progress_timer: Option<JoinHandle<()>>,
}

struct ChannelInner {
    asset: String,
    ctx: PlaybackContext,
    state: Mutex<ChannelState>,
}

/// Streaming playback of one stored asset
///
/// Keeps at most one bounded window ahead of the output clock: each fetched
/// window is scheduled right after the previous one, and the next fetch fires
/// a fixed lead time before the scheduled audio runs out. Results of fetches
/// issued before a stop or seek are recognised by their chain and dropped.
///
/// `stream`, `seek` and the transport methods spawn tasks and must be called
/// from within a Tokio runtime.
pub struct StreamChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.lock();
        f.debug_struct("StreamChannel")
            .field("asset", &self.inner.asset)
            .field("duration", &st.duration)
            .field("running", &st.running)
            .field("offset", &st.offset)
            .field("chain", &st.chain)
            .finish()
    }
}

impl StreamChannel {
    pub fn new(asset: impl Into<String>, ctx: PlaybackContext) -> Self {
        let chain = ctx.sink.create_chain(1.0);
        let state = ChannelState {
            duration: None,
            running: false,
            ending: false,
            start_clock: None,
            offset: 0.0,
            primed: None,
            chain,
            gain: 1.0,
            fetch_timer: None,
            end_timer: None,
            progress_timer: None,
        };

        Self {
            inner: Arc::new(ChannelInner {
                asset: asset.into(),
                ctx,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn asset(&self) -> &str {
        &self.inner.asset
    }

    /// Asset duration in seconds, once loaded
    pub fn duration(&self) -> Option<f64> {
        self.inner.lock().duration
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.lock().duration.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.lock().running
    }

    pub fn is_ending(&self) -> bool {
        self.inner.lock().ending
    }

    pub fn chain(&self) -> ChainId {
        self.inner.lock().chain
    }

    pub fn gain(&self) -> f32 {
        self.inner.lock().gain
    }

    pub fn set_gain(&self, gain: f32) {
        let mut st = self.inner.lock();
        st.gain = gain;
        self.inner.ctx.sink.set_gain(st.chain, gain);
    }

    /// Make the asset playable, reusing stored chunks unless `force_refetch`
    ///
    /// Returns the asset duration. Loading stops playback first.
    pub async fn load(&self, force_refetch: bool) -> Result<f64, PlaybackError> {
        let inner = &self.inner;
        self.stop();

        let stored = if force_refetch {
            None
        } else {
            inner.ctx.store.metadata(&inner.asset).await?
        };

        let (metadata, from_cache) = match stored {
            Some(metadata) => {
                info!(
                    "{}: using stored chunks ({:.3}s)",
                    inner.asset, metadata.total_duration
                );
                (metadata, true)
            }
            None => {
                info!("{}: fetching source asset", inner.asset);
                let decoded = inner.ctx.loader.load(&inner.asset).await.map_err(|e| {
                    error!("Failed to load {}: {}", inner.asset, e);
                    PlaybackError::Load(e)
                })?;
                let metadata = inner
                    .ctx
                    .store
                    .save_asset(&inner.asset, &decoded.channels, decoded.sample_rate)
                    .await?;
                (metadata, false)
            }
        };

        let duration = metadata.total_duration;
        {
            let mut st = inner.lock();
            st.duration = Some(duration);
            st.primed = None;
            if st.offset >= duration {
                st.offset = 0.0;
            }
        }

        inner.emit(PlaybackEvent::Loaded {
            asset: inner.asset.clone(),
            duration,
            from_cache,
        });
        Ok(duration)
    }

    /// Fetch the first window for `offset` (default: the cursor) ahead of a start
    ///
    /// A following `stream` at the same offset schedules it without waiting
    /// on the store.
    pub async fn prime(&self, offset: Option<f64>) -> Result<(), PlaybackError> {
        let inner = &self.inner;
        let (offset, duration) = {
            let st = inner.lock();
            let duration = st.duration.ok_or(PlaybackError::NotReady)?;
            (offset.unwrap_or(st.offset), duration)
        };

        if !offset.is_finite() || offset < 0.0 || offset >= duration - END_EPSILON {
            return Err(PlaybackError::OutOfRange { offset, duration });
        }

        let length = inner.ctx.config.window_seconds.min(duration - offset);
        let window = inner
            .ctx
            .store
            .read_window(&inner.asset, offset, length)
            .await?;
        debug!(
            "{}: primed {:.3}s at {:.3}s",
            inner.asset,
            window.duration(),
            offset
        );

        inner.lock().primed = Some(PrimedSegment {
            offset,
            window: Arc::new(window),
        });
        inner.emit(PlaybackEvent::Primed {
            asset: inner.asset.clone(),
            offset,
            duration: length,
        });
        Ok(())
    }

    /// Start playing from `offset` (default: the cursor), now
    pub fn stream(&self, offset: Option<f64>) -> Result<(), PlaybackError> {
        self.inner.stream_from(offset, None)
    }

    /// Start playing from `offset` against a start clock shared with other channels
    pub(crate) fn stream_at(&self, offset: f64, start_clock: f64) -> Result<(), PlaybackError> {
        self.inner.stream_from(Some(offset), Some(start_clock))
    }

    /// Stop playback, keeping the cursor where the output clock got to
    pub fn stop(&self) {
        let mut st = self.inner.lock();
        self.inner.stop_locked(&mut st);
    }

    /// Current playback position in seconds
    ///
    /// Running past the end stops the channel and reports 0.
    pub fn current_time(&self) -> f64 {
        let mut st = self.inner.lock();
        let (true, Some(start)) = (st.running, st.start_clock) else {
            return st.offset;
        };

        let duration = st.duration.unwrap_or(0.0);
        let position = st.offset + (self.inner.ctx.sink.now() - start).max(0.0);
        if position >= duration - END_EPSILON {
            self.inner.stop_locked(&mut st);
            return 0.0;
        }
        position
    }

    /// Move the cursor; a playing channel restarts from there
    pub fn seek(&self, offset: f64) -> Result<(), PlaybackError> {
        let was_running = {
            let mut st = self.inner.lock();
            if !offset.is_finite() || offset < 0.0 {
                return Err(PlaybackError::OutOfRange {
                    offset,
                    duration: st.duration.unwrap_or(0.0),
                });
            }
            if st.running {
                self.inner.stop_locked(&mut st)
            } else {
                st.offset = offset;
                false
            }
        };

        if was_running {
            self.inner.stream_from(Some(offset), None)?;
        }
        Ok(())
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        let mut st = self.inner.lock();
        self.inner.stop_locked(&mut st);
        self.inner.ctx.sink.detach(st.chain);
    }
}

impl ChannelInner {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PlaybackEvent) {
        self.ctx.events.emit(event);
    }

    fn stream_from(
        self: &Arc<Self>,
        offset: Option<f64>,
        group_start: Option<f64>,
    ) -> Result<(), PlaybackError> {
        let mut st = self.lock();
        let duration = st.duration.ok_or(PlaybackError::NotReady)?;
        if st.running {
            return Err(PlaybackError::AlreadyPlaying);
        }

        let offset = offset.unwrap_or(st.offset);
        if !offset.is_finite() || offset < 0.0 {
            return Err(PlaybackError::OutOfRange { offset, duration });
        }
        if offset >= duration - END_EPSILON {
            debug!("{}: nothing to play from {:.3}s", self.asset, offset);
            st.offset = 0.0;
            st.primed = None;
            return Ok(());
        }

        if let Some(timer) = st.end_timer.take() {
            timer.abort();
        }
        st.ending = false;
        st.running = true;
        st.offset = offset;
        let start = group_start.unwrap_or_else(|| self.ctx.sink.now());
        st.start_clock = Some(start);

        let chain = st.chain;
        st.progress_timer = Some(self.spawn_progress_ticker(chain));

        info!(
            "{}: streaming from {:.3}s on {} at clock {:.3}",
            self.asset, offset, chain, start
        );
        self.emit(PlaybackEvent::Started {
            asset: self.asset.clone(),
            offset,
        });

        // A primed window for some other offset is stale either way
        let primed = st.primed.take();
        match primed {
            Some(primed) if (primed.offset - offset).abs() < END_EPSILON => {
                self.deliver(&mut st, chain, primed.window, offset, start);
            }
            _ => self.request_window(&st, chain, offset, start),
        }
        Ok(())
    }

    /// Fetch the window at `offset` in the background, to play at `when`
    fn request_window(self: &Arc<Self>, st: &ChannelState, chain: ChainId, offset: f64, when: f64) {
        let Some(duration) = st.duration else {
            return;
        };
        let length = self.ctx.config.window_seconds.min(duration - offset);
        debug!(
            "{}: fetching {:.3}s at {:.3}s for clock {:.3}",
            self.asset, length, offset, when
        );
        self.emit(PlaybackEvent::FetchRequested {
            asset: self.asset.clone(),
            offset,
            duration: length,
        });

        let inner = self.clone();
        tokio::spawn(async move {
            let result = inner
                .ctx
                .store
                .read_window(&inner.asset, offset, length)
                .await;
            inner.on_window(chain, offset, when, result);
        });
    }

    fn on_window(
        self: &Arc<Self>,
        chain: ChainId,
        offset: f64,
        when: f64,
        result: Result<DecodedWindow, ChunkStoreError>,
    ) {
        let mut st = self.lock();
        if st.chain != chain || !st.running {
            debug!(
                "{}: discarding stale window at {:.3}s for {}",
                self.asset, offset, chain
            );
            self.emit(PlaybackEvent::StaleWindowDiscarded {
                asset: self.asset.clone(),
                offset,
            });
            return;
        }

        match result {
            Ok(window) => self.deliver(&mut st, chain, Arc::new(window), offset, when),
            Err(e) => {
                // Already scheduled audio keeps playing; the loop just stops here
                warn!("{}: fetch at {:.3}s failed: {}", self.asset, offset, e);
                self.emit(PlaybackEvent::FetchFailed {
                    asset: self.asset.clone(),
                    offset,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Schedule a window and arm whatever comes next: the next fetch, or the end
    fn deliver(
        self: &Arc<Self>,
        st: &mut ChannelState,
        chain: ChainId,
        window: Arc<DecodedWindow>,
        offset: f64,
        when: f64,
    ) {
        let Some(duration) = st.duration else {
            return;
        };
        let length = window.duration();
        self.ctx.sink.schedule(chain, window, when);
        self.emit(PlaybackEvent::SegmentScheduled {
            asset: self.asset.clone(),
            offset,
            duration: length,
            when,
        });

        let next_offset = offset + length;
        let next_when = when + length;

        if next_offset >= duration - END_EPSILON || length <= 0.0 {
            debug!("{}: final segment ends at clock {:.3}", self.asset, next_when);
            st.ending = true;
            self.emit(PlaybackEvent::Ending {
                asset: self.asset.clone(),
                ends_at: next_when,
            });

            let inner = self.clone();
            st.end_timer = Some(tokio::spawn(async move {
                sleep_until_clock(inner.ctx.sink.as_ref(), next_when).await;
                inner.finish(chain);
            }));
        } else {
            let fire_at = next_when - self.ctx.config.fetch_lead_seconds;
            let inner = self.clone();
            st.fetch_timer = Some(tokio::spawn(async move {
                sleep_until_clock(inner.ctx.sink.as_ref(), fire_at).await;
                let st = inner.lock();
                if st.chain == chain && st.running {
                    inner.request_window(&st, chain, next_offset, next_when);
                }
            }));
        }
    }

    /// End timer: the final segment has played out
    fn finish(&self, chain: ChainId) {
        let mut st = self.lock();
        if st.chain != chain || !st.running {
            return;
        }

        // Running as the end timer; don't let stop abort it
        st.end_timer = None;
        info!("{}: reached end of asset", self.asset);
        self.stop_locked(&mut st);
        self.emit(PlaybackEvent::Ended {
            asset: self.asset.clone(),
        });
    }

    /// Returns whether the channel was running
    fn stop_locked(&self, st: &mut ChannelState) -> bool {
        if !st.running {
            return false;
        }

        let sink = &self.ctx.sink;
        sink.detach(st.chain);
        st.chain = sink.create_chain(st.gain);

        let elapsed = st
            .start_clock
            .take()
            .map(|start| (sink.now() - start).max(0.0))
            .unwrap_or(0.0);
        let duration = st.duration.unwrap_or(0.0);
        let mut offset = st.offset + elapsed;
        if offset >= duration - END_EPSILON {
            offset = 0.0;
        }
        st.offset = offset;
        st.running = false;
        st.ending = false;

        for timer in [
            st.fetch_timer.take(),
            st.end_timer.take(),
            st.progress_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            timer.abort();
        }

        info!("{}: stopped at {:.3}s", self.asset, offset);
        self.emit(PlaybackEvent::Stopped {
            asset: self.asset.clone(),
            offset,
        });
        true
    }

    fn spawn_progress_ticker(self: &Arc<Self>, chain: ChainId) -> JoinHandle<()> {
        let inner = self.clone();
        let period = self.ctx.config.progress_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let event = {
                    let st = inner.lock();
                    let (true, Some(start), Some(duration)) =
                        (st.chain == chain && st.running, st.start_clock, st.duration)
                    else {
                        break;
                    };
                    let position =
                        (st.offset + (inner.ctx.sink.now() - start).max(0.0)).min(duration);
                    PlaybackEvent::Position {
                        asset: inner.asset.clone(),
                        position,
                        duration,
                    }
                };
                inner.emit(event);
            }
        })
    }
}

/// Sleep until the output clock reaches `target`
async fn sleep_until_clock(sink: &dyn OutputSink, target: f64) {
    loop {
        let remaining = target - sink.now();
        if remaining <= 0.0 {
            return;
        }
        tokio::time::sleep(Duration::from_secs_f64(remaining.max(0.001))).await;
    }
}
