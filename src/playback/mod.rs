mod channel;
pub mod cpal_output;
mod group;
pub mod mixer;
pub mod output;
pub mod progress;
mod transport;

pub use channel::{PlaybackContext, StreamChannel};
pub use cpal_output::{CpalSink, OutputError};
pub use group::StreamGroup;
pub use output::{ChainId, OutputSink};
pub use progress::{EventHub, PlaybackEvent};
pub use transport::Transport;

use crate::chunking::ChunkStoreError;
use crate::loader::LoadError;
use thiserror::Error;

/// Offsets this close to the end of an asset count as the end
pub(crate) const END_EPSILON: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),
    #[error("Not loaded")]
    NotReady,
    #[error("Already playing")]
    AlreadyPlaying,
    #[error("Offset {offset}s is outside 0..{duration}s")]
    OutOfRange { offset: f64, duration: f64 },
    #[error("Chunk store error: {0}")]
    Store(#[from] ChunkStoreError),
    #[error("No group member at index {0}")]
    NoSuchMember(usize),
}
