use super::{PlaybackError, StreamChannel, StreamGroup, END_EPSILON};

/// What a transport widget needs to drive playback
///
/// Implemented by single channels and by groups, so a player surface does
/// not need to know which one it is driving.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start playing from the current position. No-op while playing.
    async fn play(&self) -> Result<(), PlaybackError>;

    fn pause(&self);

    async fn seek(&self, seconds: f64) -> Result<(), PlaybackError>;

    fn current_time(&self) -> f64;

    /// Duration in seconds, 0 until loaded
    fn duration(&self) -> f64;

    fn is_playing(&self) -> bool;
}

#[async_trait::async_trait]
impl Transport for StreamChannel {
    async fn play(&self) -> Result<(), PlaybackError> {
        if StreamChannel::is_playing(self) {
            return Ok(());
        }
        // At the end there is nothing to prime; stream falls back to a stop
        let at_end = StreamChannel::duration(self)
            .is_some_and(|duration| StreamChannel::current_time(self) >= duration - END_EPSILON);
        if !at_end {
            self.prime(None).await?;
        }
        self.stream(None)
    }

    fn pause(&self) {
        self.stop();
    }

    async fn seek(&self, seconds: f64) -> Result<(), PlaybackError> {
        StreamChannel::seek(self, seconds)
    }

    fn current_time(&self) -> f64 {
        StreamChannel::current_time(self)
    }

    fn duration(&self) -> f64 {
        StreamChannel::duration(self).unwrap_or(0.0)
    }

    fn is_playing(&self) -> bool {
        StreamChannel::is_playing(self)
    }
}

#[async_trait::async_trait]
impl Transport for StreamGroup {
    async fn play(&self) -> Result<(), PlaybackError> {
        if StreamGroup::is_playing(self) {
            return Ok(());
        }
        self.stream(None).await
    }

    fn pause(&self) {
        self.stop();
    }

    async fn seek(&self, seconds: f64) -> Result<(), PlaybackError> {
        StreamGroup::seek(self, seconds).await
    }

    fn current_time(&self) -> f64 {
        StreamGroup::current_time(self)
    }

    fn duration(&self) -> f64 {
        StreamGroup::duration(self).unwrap_or(0.0)
    }

    fn is_playing(&self) -> bool {
        StreamGroup::is_playing(self)
    }
}
