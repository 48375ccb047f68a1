pub mod handle;

pub use handle::EventHub;

/// Structured playback events, for an external observer to format or act on
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Loaded {
        asset: String,
        duration: f64,
        /// True when existing chunks were reused instead of refetching the source
        from_cache: bool,
    },
    Primed {
        asset: String,
        offset: f64,
        duration: f64,
    },
    FetchRequested {
        asset: String,
        offset: f64,
        duration: f64,
    },
    SegmentScheduled {
        asset: String,
        offset: f64,
        duration: f64,
        /// Output clock time the segment starts at
        when: f64,
    },
    StaleWindowDiscarded {
        asset: String,
        offset: f64,
    },
    FetchFailed {
        asset: String,
        offset: f64,
        error: String,
    },
    /// The final segment has been scheduled
    Ending {
        asset: String,
        ends_at: f64,
    },
    Started {
        asset: String,
        offset: f64,
    },
    Stopped {
        asset: String,
        offset: f64,
    },
    /// Playback ran to the end of the asset
    Ended {
        asset: String,
    },
    Position {
        asset: String,
        position: f64,
        duration: f64,
    },
    GroupStarted {
        offset: f64,
        start_clock: f64,
    },
    GroupStopped {
        offset: f64,
    },
}
