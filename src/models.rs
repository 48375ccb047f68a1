use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-asset metadata record
///
/// Written exactly once per save, after every chunk of the asset has been
/// written. Its presence is what marks an asset as readable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetMetadata {
    pub name: String,
    pub channel_count: u16,
    pub sample_rate: u32,
    /// Total duration in seconds
    pub total_duration: f64,
    pub chunk_count: u32,
    /// Chunk duration (seconds) the asset was split with
    pub chunk_seconds: u32,
    pub created_at: DateTime<Utc>,
}

impl AssetMetadata {
    /// Total number of sample frames in the asset
    pub fn total_samples(&self) -> u64 {
        (self.total_duration * self.sample_rate as f64).round() as u64
    }

    /// Start seconds of every chunk of this asset, in order
    pub fn chunk_starts(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.chunk_count).map(move |i| i * self.chunk_seconds)
    }
}

/// Immutable slice of an asset's decoded samples
///
/// `start_second` is always a multiple of the asset's chunk duration. Every
/// chunk but the last holds exactly `sample_rate * chunk_seconds` frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub name: String,
    pub sample_rate: u32,
    pub start_second: u32,
    pub sample_count: usize,
    /// One sample sequence per channel, each `sample_count` long
    pub channel_data: Vec<Vec<f32>>,
}

impl ChunkRecord {
    /// Chunk ID: asset name joined with the aligned start second
    pub fn chunk_id(name: &str, start_second: u32) -> String {
        format!("{}-{}", name, start_second)
    }

    pub fn duration(&self) -> f64 {
        self.sample_count as f64 / self.sample_rate as f64
    }

    /// Approximate in-memory footprint of the sample data
    pub fn size_bytes(&self) -> usize {
        self.sample_count * self.channel_data.len() * std::mem::size_of::<f32>()
    }
}

/// Stitched, trimmed, playback-ready window of an asset. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWindow {
    pub channel_count: u16,
    pub sample_rate: u32,
    pub channels: Vec<Vec<f32>>,
}

impl DecodedWindow {
    /// Number of sample frames (identical across channels)
    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Window length in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }
}

/// Fully decoded source asset, as produced by an asset loader
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAsset {
    pub sample_rate: u32,
    /// Planar samples, one sequence per channel
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAsset {
    pub fn channel_count(&self) -> u16 {
        self.channels.len() as u16
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(ChunkRecord::chunk_id("drums", 0), "drums-0");
        assert_eq!(ChunkRecord::chunk_id("bass-di", 10), "bass-di-10");
    }

    #[test]
    fn test_window_duration() {
        let window = DecodedWindow {
            channel_count: 2,
            sample_rate: 100,
            channels: vec![vec![0.0; 250], vec![0.0; 250]],
        };
        assert_eq!(window.frames(), 250);
        assert_eq!(window.duration(), 2.5);

        let empty = DecodedWindow {
            channel_count: 0,
            sample_rate: 100,
            channels: vec![],
        };
        assert!(empty.is_empty());
        assert_eq!(empty.duration(), 0.0);
    }

    #[test]
    fn test_metadata_chunk_starts() {
        let meta = AssetMetadata {
            name: "vox".to_string(),
            channel_count: 1,
            sample_rate: 100,
            total_duration: 12.0,
            chunk_count: 3,
            chunk_seconds: 5,
            created_at: Utc::now(),
        };
        assert_eq!(meta.chunk_starts().collect::<Vec<_>>(), vec![0, 5, 10]);
        assert_eq!(meta.total_samples(), 1200);
    }
}
