//! Opus decoder wrapper
//!
//! One instance per stream; Opus decoders carry state between frames, so
//! every packet of a stream (silence frames included) goes through the
//! same instance in arrival order.

use opus::{Channels, Decoder};

use crate::codec::FrameDecoder;
use crate::error::CodecError;

/// Opus decoder producing interleaved 16-bit PCM
pub struct OpusDecoder {
    decoder: Decoder,
    channels: u16,
    frame_size: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    samples_produced: u64,
}

impl OpusDecoder {
    /// Create a new Opus decoder
    pub fn new(sample_rate: u32, channels: u16, frame_size: usize) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::DecoderInit(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let decoder = Decoder::new(sample_rate, opus_channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // 120ms is the longest frame Opus can carry
        let max_samples = sample_rate as usize * channels as usize * 120 / 1000;

        Ok(Self {
            decoder,
            channels,
            frame_size,
            decode_buffer: vec![0i16; max_samples],
            frames_decoded: 0,
            samples_produced: 0,
        })
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            samples_produced: self.samples_produced,
        }
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        let total_samples = samples * self.channels as usize;
        self.frames_decoded += 1;
        self.samples_produced += total_samples as u64;

        Ok(self.decode_buffer[..total_samples].to_vec())
    }

    fn samples_per_frame(&self) -> usize {
        self.frame_size
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub samples_produced: u64,
}
