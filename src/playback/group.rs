use super::channel::{PlaybackContext, StreamChannel};
use super::progress::PlaybackEvent;
use super::{PlaybackError, END_EPSILON};
use futures::future::try_join_all;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct GroupState {
    /// Longest member duration, once every member is loaded
    duration: Option<f64>,
    running: bool,
    start_clock: Option<f64>,
    offset: f64,
    /// Bumped by every stream call, so a barrier that lost a race can tell
    session: u64,
}

/// Several channels on one timeline with one transport
///
/// Starting waits for every member to prime at the target offset, then
/// starts them all against the same clock time, so they stay phase aligned
/// regardless of how long each fetch took.
#[derive(Debug)]
pub struct StreamGroup {
    members: Vec<StreamChannel>,
    ctx: PlaybackContext,
    state: Mutex<GroupState>,
}

impl StreamGroup {
    pub fn new<I, S>(assets: I, ctx: PlaybackContext) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = assets
            .into_iter()
            .map(|asset| StreamChannel::new(asset, ctx.clone()))
            .collect();
        Self::from_channels(members, ctx)
    }

    /// Group existing channels; they should share `ctx`'s output sink
    pub fn from_channels(members: Vec<StreamChannel>, ctx: PlaybackContext) -> Self {
        Self {
            members,
            ctx,
            state: Mutex::new(GroupState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn members(&self) -> &[StreamChannel] {
        &self.members
    }

    pub fn member(&self, index: usize) -> Result<&StreamChannel, PlaybackError> {
        self.members
            .get(index)
            .ok_or(PlaybackError::NoSuchMember(index))
    }

    pub fn duration(&self) -> Option<f64> {
        self.lock().duration
    }

    pub fn is_playing(&self) -> bool {
        self.lock().running
    }

    /// Load every member concurrently; the group lasts as long as its longest member
    pub async fn load(&self, force_refetch: bool) -> Result<f64, PlaybackError> {
        self.stop();

        let durations =
            try_join_all(self.members.iter().map(|m| m.load(force_refetch))).await?;
        let duration = durations.into_iter().fold(0.0, f64::max);

        let mut st = self.lock();
        st.duration = Some(duration);
        if st.offset >= duration {
            st.offset = 0.0;
        }
        info!(
            "Group of {} loaded, {:.3}s",
            self.members.len(),
            duration
        );
        Ok(duration)
    }

    /// Start every member at `offset` (default: the stored offset) in lockstep
    ///
    /// The group counts as running as soon as this is called; members only
    /// start once all of them have primed.
    pub async fn stream(&self, offset: Option<f64>) -> Result<(), PlaybackError> {
        let (offset, session) = {
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
                st.offset = 0.0;
                return Ok(());
            }

            st.running = true;
            st.offset = offset;
            st.session += 1;
            (offset, st.session)
        };

        // Members that end before the offset have nothing to prime
        let primes = self
            .members
            .iter()
            .filter(|m| m.duration().is_some_and(|d| d - END_EPSILON > offset))
            .map(|m| m.prime(Some(offset)));

        if let Err(e) = try_join_all(primes).await {
            warn!("Group prime at {:.3}s failed: {}", offset, e);
            let mut st = self.lock();
            if st.session == session && st.running {
                st.running = false;
                st.start_clock = None;
            }
            return Err(e);
        }

        let start = {
            let mut st = self.lock();
            if st.session != session || !st.running {
                debug!("Group start at {:.3}s superseded during prime", offset);
                return Ok(());
            }
            *st.start_clock.get_or_insert_with(|| self.ctx.sink.now())
        };

        for member in &self.members {
            if let Err(e) = member.stream_at(offset, start) {
                warn!("{}: failed to start with group: {}", member.asset(), e);
                self.stop();
                return Err(e);
            }
        }

        info!(
            "Group started at {:.3}s, clock {:.3}",
            offset, start
        );
        self.ctx.events.emit(PlaybackEvent::GroupStarted {
            offset,
            start_clock: start,
        });
        Ok(())
    }

    pub fn stop(&self) {
        let mut st = self.lock();
        if !st.running {
            return;
        }

        for member in &self.members {
            member.stop();
        }

        let elapsed = st
            .start_clock
            .take()
            .map(|start| (self.ctx.sink.now() - start).max(0.0))
            .unwrap_or(0.0);
        let duration = st.duration.unwrap_or(0.0);
        let mut offset = st.offset + elapsed;
        if offset >= duration - END_EPSILON {
            offset = 0.0;
        }
        st.offset = offset;
        st.running = false;

        info!("Group stopped at {:.3}s", offset);
        self.ctx
            .events
            .emit(PlaybackEvent::GroupStopped { offset });
    }

    /// Group timeline position in seconds; running past the end stops and reports 0
    pub fn current_time(&self) -> f64 {
        let position = {
            let st = self.lock();
            let (true, Some(start)) = (st.running, st.start_clock) else {
                return st.offset;
            };
            let position = st.offset + (self.ctx.sink.now() - start).max(0.0);
            if position < st.duration.unwrap_or(0.0) - END_EPSILON {
                return position;
            }
            position
        };

        debug!("Group ran past its end at {:.3}s", position);
        self.stop();
        0.0
    }

    pub async fn seek(&self, offset: f64) -> Result<(), PlaybackError> {
        if !offset.is_finite() || offset < 0.0 {
            return Err(PlaybackError::OutOfRange {
                offset,
                duration: self.duration().unwrap_or(0.0),
            });
        }

        if self.is_playing() {
            self.stop();
            self.stream(Some(offset)).await
        } else {
            self.lock().offset = offset;
            Ok(())
        }
    }

    /// Silence every member except `index`
    pub fn solo(&self, index: usize) -> Result<(), PlaybackError> {
        self.member(index)?;
        for (i, member) in self.members.iter().enumerate() {
            member.set_gain(if i == index { 1.0 } else { 0.0 });
        }
        Ok(())
    }

    pub fn mute(&self, index: usize) -> Result<(), PlaybackError> {
        self.member(index)?.set_gain(0.0);
        Ok(())
    }

    pub fn unmute_all(&self) {
        for member in &self.members {
            member.set_gain(1.0);
        }
    }

    pub fn gains(&self) -> Vec<f32> {
        self.members.iter().map(|m| m.gain()).collect()
    }
}
