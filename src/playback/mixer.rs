use super::output::ChainId;
use crate::models::DecodedWindow;
use std::collections::HashMap;
use std::sync::Arc;

/// A window placed on the output timeline
#[derive(Debug)]
struct Segment {
    window: Arc<DecodedWindow>,
    /// Output frame at which the window's first frame plays (may be negative
    /// relative to what has already been rendered)
    start_frame: i64,
    /// Output frame just past the window's last frame
    end_frame: i64,
}

#[derive(Debug, Default)]
struct Chain {
    gain: f32,
    segments: Vec<Segment>,
}

/// Sample-accurate software mixer behind the cpal sink
///
/// Renders interleaved f32 frames at the device rate. The clock is the number
/// of frames rendered so far, so `now()` advances only as the device pulls.
#[derive(Debug)]
pub struct Mixer {
    output_rate: u32,
    output_channels: usize,
    frames_rendered: u64,
    next_chain: u64,
    chains: HashMap<ChainId, Chain>,
}

impl Mixer {
    pub fn new(output_rate: u32, output_channels: u16) -> Self {
        Self {
            output_rate: output_rate.max(1),
            output_channels: output_channels.max(1) as usize,
            frames_rendered: 0,
            next_chain: 1,
            chains: HashMap::new(),
        }
    }

    pub fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.output_rate as f64
    }

    pub fn create_chain(&mut self, gain: f32) -> ChainId {
        let id = ChainId(self.next_chain);
        self.next_chain += 1;
        self.chains.insert(
            id,
            Chain {
                gain,
                segments: Vec::new(),
            },
        );
        id
    }

    pub fn set_gain(&mut self, chain: ChainId, gain: f32) {
        if let Some(chain) = self.chains.get_mut(&chain) {
            chain.gain = gain;
        }
    }

    pub fn detach(&mut self, chain: ChainId) {
        self.chains.remove(&chain);
    }

    /// Place a window on a chain. Unknown (detached) chains drop it.
    pub fn schedule(&mut self, chain: ChainId, window: Arc<DecodedWindow>, when: f64) {
        let Some(chain) = self.chains.get_mut(&chain) else {
            return;
        };
        if window.is_empty() || window.sample_rate == 0 {
            return;
        }

        let start_frame = (when * self.output_rate as f64).round() as i64;
        let ratio = self.output_rate as f64 / window.sample_rate as f64;
        let length = (window.frames() as f64 * ratio).ceil() as i64;
        chain.segments.push(Segment {
            window,
            start_frame,
            end_frame: start_frame + length,
        });
    }

    /// Segments not yet fully rendered, across all chains
    pub fn pending_segments(&self) -> usize {
        self.chains.values().map(|c| c.segments.len()).sum()
    }

    /// Fill an interleaved output buffer and advance the clock
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let channels = self.output_channels;
        let frames = out.len() / channels;
        let base = self.frames_rendered as i64;
        let output_rate = self.output_rate as f64;

        for chain in self.chains.values_mut() {
            let gain = chain.gain;
            for segment in &chain.segments {
                if segment.end_frame <= base || segment.start_frame >= base + frames as i64 {
                    continue;
                }

                let window = &segment.window;
                let step = window.sample_rate as f64 / output_rate;
                let source_frames = window.frames();
                let source_channels = window.channels.len();

                let first = (segment.start_frame - base).max(0) as usize;
                let last = ((segment.end_frame - base) as usize).min(frames);
                for i in first..last {
                    let elapsed = (base + i as i64 - segment.start_frame) as f64;
                    let source_index = (elapsed * step) as usize;
                    if source_index >= source_frames {
                        break;
                    }
                    for ch in 0..channels {
                        // Mono sources feed every output channel
                        let source_channel = if ch < source_channels {
                            ch
                        } else if source_channels == 1 {
                            0
                        } else {
                            continue;
                        };
                        out[i * channels + ch] +=
                            window.channels[source_channel][source_index] * gain;
                    }
                }
            }
        }

        self.frames_rendered += frames as u64;
        let rendered = self.frames_rendered as i64;
        for chain in self.chains.values_mut() {
            chain.segments.retain(|s| s.end_frame > rendered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(sample_rate: u32, channels: Vec<Vec<f32>>) -> Arc<DecodedWindow> {
        Arc::new(DecodedWindow {
            channel_count: channels.len() as u16,
            sample_rate,
            channels,
        })
    }

    #[test]
    fn test_schedules_at_future_frame() {
        let mut mixer = Mixer::new(10, 1);
        let chain = mixer.create_chain(1.0);
        mixer.schedule(chain, window(10, vec![vec![1.0, 2.0, 3.0]]), 0.2);

        let mut out = vec![0.0; 6];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 2.0, 3.0, 0.0]);
        assert!((mixer.now() - 0.6).abs() < 1e-9);
        assert_eq!(mixer.pending_segments(), 0);
    }

    #[test]
    fn test_past_start_is_trimmed_to_now() {
        let mut mixer = Mixer::new(10, 1);
        let chain = mixer.create_chain(1.0);
        let mut out = vec![0.0; 2];
        mixer.render(&mut out);

        // Scheduled at 0.0 while the clock already reads 0.2
        mixer.schedule(chain, window(10, vec![vec![1.0, 2.0, 3.0, 4.0]]), 0.0);
        mixer.render(&mut out);
        assert_eq!(out, vec![3.0, 4.0]);
    }

    #[test]
    fn test_gain_and_detach() {
        let mut mixer = Mixer::new(10, 1);
        let loud = mixer.create_chain(1.0);
        let quiet = mixer.create_chain(0.5);
        mixer.schedule(loud, window(10, vec![vec![1.0; 4]]), 0.0);
        mixer.schedule(quiet, window(10, vec![vec![1.0; 4]]), 0.0);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.5, 1.5]);

        mixer.set_gain(quiet, 0.0);
        mixer.detach(loud);
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0, 0.0]);

        // Windows for a detached chain are dropped
        mixer.schedule(loud, window(10, vec![vec![1.0; 4]]), 0.4);
        assert_eq!(mixer.pending_segments(), 0);
    }

    #[test]
    fn test_rate_conversion_and_mono_upmix() {
        let mut mixer = Mixer::new(20, 2);
        let chain = mixer.create_chain(1.0);
        mixer.schedule(chain, window(10, vec![vec![1.0, 2.0]]), 0.0);

        let mut out = vec![0.0; 10];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stereo_to_mono_takes_first_channel() {
        let mut mixer = Mixer::new(10, 1);
        let chain = mixer.create_chain(1.0);
        mixer.schedule(chain, window(10, vec![vec![1.0, 1.0], vec![9.0, 9.0]]), 0.0);

        let mut out = vec![0.0; 2];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.0]);
    }
}
