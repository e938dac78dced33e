//! Decoded frames and the entries the scheduler emits

use std::sync::Arc;

use crate::streams::StreamId;

/// One decoded frame of a single speaker
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Interleaved 16-bit PCM
    pub pcm: Vec<i16>,
    /// Packet sequence number (wraps at 2^16)
    pub sequence: u16,
    /// Packet timestamp, codec clock
    pub timestamp: u32,
    /// Peak absolute sample scaled into [0, 1], zero for silence frames
    pub level: f32,
    /// Sender marked this frame as explicit silence
    pub silence: bool,
}

impl Frame {
    pub fn new(pcm: Vec<i16>, sequence: u16, timestamp: u32, silence: bool) -> Self {
        let level = if silence { 0.0 } else { peak_level(&pcm) };
        Self {
            pcm,
            sequence,
            timestamp,
            level,
            silence,
        }
    }
}

/// Normalized peak magnitude of a PCM block
pub fn peak_level(pcm: &[i16]) -> f32 {
    let peak = pcm
        .iter()
        .map(|&s| (s as i32).unsigned_abs())
        .max()
        .unwrap_or(0);
    peak as f32 / crate::constants::LEVEL_SCALE
}

/// What a stream contributes to its output queue
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// A real, decoded frame
    Frame(Arc<Frame>),
    /// Concealment for a gap that followed silence (or had nothing before it)
    Silence,
    /// Concealment repeating the previous frame
    Repeat(Arc<Frame>),
}

impl Entry {
    /// Level used for voice activity detection
    pub fn level(&self) -> f32 {
        match self {
            Self::Frame(frame) | Self::Repeat(frame) => frame.level,
            Self::Silence => 0.0,
        }
    }

    /// Whether the entry carries no audio
    pub fn is_silent(&self) -> bool {
        match self {
            Self::Frame(frame) | Self::Repeat(frame) => frame.silence,
            Self::Silence => true,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        !matches!(self, Self::Frame(_))
    }

    /// Underlying frame, if any
    pub fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            Self::Frame(frame) | Self::Repeat(frame) => Some(frame),
            Self::Silence => None,
        }
    }

    /// Sequence number of a real frame
    pub fn sequence(&self) -> Option<u16> {
        match self {
            Self::Frame(frame) => Some(frame.sequence),
            _ => None,
        }
    }
}

/// One stream's contribution to a tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickEntry {
    pub stream_id: StreamId,
    pub entry: Entry,
}

/// Everything the scheduler sampled during one pass
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTick {
    /// Scheduler pass that produced this tick
    pub index: u64,
    /// Ordered by stream id; streams with nothing ready are absent
    pub entries: Vec<TickEntry>,
}

impl OutputTick {
    /// Highest level among the speakers in this tick
    pub fn max_level(&self) -> f32 {
        self.entries
            .iter()
            .map(|e| e.entry.level())
            .fold(0.0, f32::max)
    }

    pub fn entry_for(&self, stream_id: StreamId) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|e| e.stream_id == stream_id)
            .map(|e| &e.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_is_normalized_peak() {
        let frame = Frame::new(vec![100, -16384, 2000], 1, 0, false);
        assert!((frame.level - 0.25).abs() < 1e-6);

        let extreme = Frame::new(vec![i16::MIN], 2, 0, false);
        assert!((extreme.level - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_silence_forces_zero_level() {
        let frame = Frame::new(vec![30000; 4], 1, 0, true);
        assert_eq!(frame.level, 0.0);
        assert!(Entry::Frame(Arc::new(frame)).is_silent());
    }

    #[test]
    fn test_entry_accessors() {
        let frame = Arc::new(Frame::new(vec![8192; 4], 7, 960, false));
        let repeat = Entry::Repeat(frame.clone());

        assert!(repeat.is_placeholder());
        assert_eq!(repeat.sequence(), None);
        assert_eq!(repeat.frame().map(|f| f.sequence), Some(7));
        assert!(!Entry::Frame(frame).is_placeholder());
        assert!(Entry::Silence.is_silent());
        assert_eq!(Entry::Silence.level(), 0.0);
    }
}
