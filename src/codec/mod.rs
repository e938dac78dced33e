//! Codec capability
//!
//! The recorder never looks inside encoded frames. It only needs one
//! decoder per stream, created on demand through a [`DecoderFactory`].

#[cfg(feature = "opus")]
pub mod decoder;
#[cfg(feature = "opus")]
pub mod encoder;

#[cfg(feature = "opus")]
pub use decoder::OpusDecoder;
#[cfg(feature = "opus")]
pub use encoder::OpusEncoder;

use std::sync::Arc;

use crate::constants::OPUS_SILENCE_FRAME;
use crate::error::CodecError;

/// Decodes one encoded frame into interleaved 16-bit PCM
pub trait FrameDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError>;

    /// Samples per channel in one decoded frame
    fn samples_per_frame(&self) -> usize;
}

/// Builds a fresh decoder for a newly seen stream
pub type DecoderFactory =
    Arc<dyn Fn() -> Result<Box<dyn FrameDecoder>, CodecError> + Send + Sync>;

/// Whether a raw packet payload is the codec's explicit silence frame
pub fn is_silence_frame(data: &[u8]) -> bool {
    data == OPUS_SILENCE_FRAME
}

/// Factory producing Opus decoders with the given parameters
#[cfg(feature = "opus")]
pub fn opus_factory(config: &crate::config::CodecConfig) -> DecoderFactory {
    let config = config.clone();
    Arc::new(move || {
        let decoder = OpusDecoder::new(
            config.sample_rate,
            config.channels,
            config.samples_per_frame(),
        )?;
        Ok(Box::new(decoder) as Box<dyn FrameDecoder>)
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_sentinel() {
        assert!(is_silence_frame(&[0xF8, 0xFF, 0xFE]));
        assert!(!is_silence_frame(&[0xF8, 0xFF]));
        assert!(!is_silence_frame(&[0xF8, 0xFF, 0xFE, 0x00]));
    }
}
