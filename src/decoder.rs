use crate::models::DecodedAsset;
use std::io::Cursor;
use symphonia::core::{
    audio::{AudioBufferRef, SampleBuffer},
    codecs::{Decoder, DecoderOptions},
    formats::{FormatOptions, FormatReader},
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Symphonia error: {0}")]
    Symphonia(#[from] symphonia::core::errors::Error),
    #[error("No audio tracks found")]
    NoAudioTracks,
    #[error("Unknown sample rate")]
    UnknownSampleRate,
}

/// Wrapper around a symphonia decoder for one in-memory asset
pub struct AssetDecoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
}

impl AssetDecoder {
    /// Probe the container format and set up a decoder for its first audio track
    ///
    /// `extension` (e.g. "flac", "wav") is only a hint; probing inspects the bytes.
    pub fn new(data: Vec<u8>, extension: Option<&str>) -> Result<Self, DecoderError> {
        let cursor = Cursor::new(data);
        let media_source = MediaSourceStream::new(Box::new(cursor), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = extension {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe().format(
            &hint,
            media_source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
            .ok_or(DecoderError::NoAudioTracks)?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or(DecoderError::UnknownSampleRate)?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())?;

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Decode the next packet into owned planar samples, one vector per channel
    /// Returns None when end of stream is reached
    fn decode_next(&mut self) -> Result<Option<Vec<Vec<f32>>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(DecoderError::Symphonia(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            // The decoder's buffer is copied out here so no borrow of it outlives this arm
            let planes = match self.decoder.decode(&packet) {
                Ok(audio_buf) => copy_planes(audio_buf),
                // A corrupt packet is skipped rather than failing the asset
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecoderError::Symphonia(e)),
            };
            return Ok(Some(planes));
        }
    }

    /// Decode the whole asset into planar f32 samples
    pub fn decode_all(mut self) -> Result<DecodedAsset, DecoderError> {
        let sample_rate = self.sample_rate;
        let mut channels: Vec<Vec<f32>> = Vec::new();

        while let Some(planes) = self.decode_next()? {
            if planes.first().map_or(true, |plane| plane.is_empty()) {
                continue;
            }
            if channels.is_empty() {
                channels = vec![Vec::new(); planes.len()];
            }
            for (buffer, plane) in channels.iter_mut().zip(planes) {
                buffer.extend(plane);
            }
        }

        if channels.is_empty() {
            return Err(DecoderError::NoAudioTracks);
        }

        debug!(
            "Decoded {} frames x {} channels @ {} Hz",
            channels[0].len(),
            channels.len(),
            sample_rate
        );

        Ok(DecodedAsset {
            sample_rate,
            channels,
        })
    }
}

fn copy_planes(audio_buf: AudioBufferRef<'_>) -> Vec<Vec<f32>> {
    let spec = *audio_buf.spec();
    let frames = audio_buf.frames();
    let channel_count = spec.channels.count();
    if frames == 0 {
        return vec![Vec::new(); channel_count];
    }

    let mut sample_buf = SampleBuffer::<f32>::new(audio_buf.capacity() as u64, spec);
    sample_buf.copy_planar_ref(audio_buf);
    sample_buf
        .samples()
        .chunks(frames)
        .take(channel_count)
        .map(|plane| plane.to_vec())
        .collect()
}
