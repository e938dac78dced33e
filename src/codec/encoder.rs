//! Opus encoder wrapper
//!
//! Only the simulator needs to produce packets; the recorder itself
//! consumes them.

use bytes::Bytes;
use opus::{Application, Bitrate, Channels, Encoder};

use crate::error::CodecError;

/// Voice-tuned Opus encoder
pub struct OpusEncoder {
    encoder: Encoder,
    channels: u16,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
}

impl OpusEncoder {
    /// Create an encoder configured for speech
    pub fn voice(sample_rate: u32, channels: u16, frame_size: usize) -> Result<Self, CodecError> {
        let opus_channels = match channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => {
                return Err(CodecError::EncoderInit(format!(
                    "Unsupported channel count: {}",
                    channels
                )))
            }
        };

        let mut encoder = Encoder::new(sample_rate, opus_channels, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(Bitrate::Bits(64_000))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Max Opus packet is about 1275 bytes
        Ok(Self {
            encoder,
            channels,
            frame_size,
            encode_buffer: vec![0u8; 4000],
            frames_encoded: 0,
        })
    }

    /// Encode one frame of interleaved samples
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        let expected = self.frame_size * self.channels as usize;
        if samples.len() != expected {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let len = self
            .encoder
            .encode(samples, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        Ok(Bytes::copy_from_slice(&self.encode_buffer[..len]))
    }

    /// Interleaved samples expected per call to [`encode`](Self::encode)
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_wrong_frame_size() {
        let mut encoder = OpusEncoder::voice(48000, 2, 960).unwrap();
        assert_eq!(encoder.samples_per_frame(), 1920);

        let err = encoder.encode(&[0i16; 100]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidFrameSize(100)));
        assert_eq!(encoder.frames_encoded(), 0);
    }
}
