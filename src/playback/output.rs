use crate::models::DecodedWindow;
use std::sync::Arc;

/// Identity of one output chain (a gain stage wired to the device)
///
/// A channel swaps its chain on every stop, so the ID doubles as the epoch
/// token that marks in-flight fetches as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u64);

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "chain#{}", self.0)
    }
}

/// Output clock and sink that playback schedules against
///
/// All methods are synchronous and cheap: scheduling only hands a window to
/// the sink, actual rendering happens on the sink's own thread.
pub trait OutputSink: Send + Sync {
    /// Monotonic output clock, in seconds
    fn now(&self) -> f64;

    /// Create a fresh chain with the given gain
    fn create_chain(&self, gain: f32) -> ChainId;

    fn set_gain(&self, chain: ChainId, gain: f32);

    /// Disconnect a chain, silencing everything scheduled on it
    fn detach(&self, chain: ChainId);

    /// Start playing `window` on `chain` at clock time `when`
    ///
    /// A `when` already in the past starts output at the matching point
    /// inside the window rather than from its first frame.
    fn schedule(&self, chain: ChainId, window: Arc<DecodedWindow>, when: f64);
}
