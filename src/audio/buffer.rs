//! Per-stream jitter buffer
//!
//! Packets land in an unordered pending set as they arrive. Once per
//! scheduler tick, [`StreamBuffer::advance`] commits the next frame to the
//! output queue, concealing sequence gaps with a single placeholder.
//!
//! Two locks guard a stream: the decoder lock (decoding runs outside the
//! ordering critical section) and the state lock shared by producers and
//! the scheduler.

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::frame::{Entry, Frame};
use crate::codec::{is_silence_frame, FrameDecoder};
use crate::config::JitterConfig;
use crate::constants::SEQUENCE_SPACE;
use crate::error::CodecError;
use crate::streams::StreamId;

/// Distance between the last emitted sequence and a candidate, minus one
///
/// A candidate more than `wraparound_threshold` below `last` is taken to be
/// past the 16-bit rollover. Returns the gap and whether it wrapped; the gap
/// is negative for late or repeated sequences.
pub fn sequence_gap(last: u16, candidate: u16, wraparound_threshold: u16) -> (i32, bool) {
    let (last, next) = (last as i32, candidate as i32);
    if next < last - wraparound_threshold as i32 {
        (next + SEQUENCE_SPACE - last - 1, true)
    } else {
        (next - last - 1, false)
    }
}

/// Result of one scheduler pass over a stream
#[derive(Debug, Clone)]
pub struct StreamTick {
    /// Output queue depth after advancing, before popping
    pub queue_depth: usize,
    /// Entry sampled for this tick, if the stream was ready
    pub entry: Option<Entry>,
}

/// Stream statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StreamStats {
    pub stream_id: u64,
    pub frames_decoded: u64,
    pub decode_failures: u64,
    /// Pending frames replaced by a later packet with the same sequence
    pub frames_superseded: u64,
    pub frames_emitted: u64,
    pub silence_placeholders: u64,
    pub repeat_placeholders: u64,
    pub wraparounds: u64,
    pub pending: usize,
    pub queued: usize,
    pub buffering: bool,
}

struct BufferState {
    pending: BTreeMap<u16, Frame>,
    output: VecDeque<Entry>,
    last_sequence: Option<u16>,
    /// Non-zero while warming up; a fresh stream starts warming up
    buffering_count: u32,
    silence_credit: i32,
    frames_seen_total: u64,
    silence_placeholders: u64,
    repeat_placeholders: u64,
    wraparounds: u64,
}

impl BufferState {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            output: VecDeque::new(),
            last_sequence: None,
            buffering_count: 1,
            silence_credit: 0,
            frames_seen_total: 0,
            silence_placeholders: 0,
            repeat_placeholders: 0,
            wraparounds: 0,
        }
    }

    fn advance(&mut self, config: &JitterConfig, stream_id: StreamId) {
        let waiting = self.pending.len();
        if waiting == 0 || self.buffering_count > 0 {
            self.buffering_count += 1;
            if waiting < config.warm_up_pending_count {
                return;
            }
        }

        let Some(candidate) = self.next_candidate() else {
            return;
        };

        let gap = match self.last_sequence {
            Some(last) => {
                let (gap, wrapped) = sequence_gap(last, candidate, config.wraparound_threshold);
                if wrapped {
                    self.wraparounds += 1;
                    tracing::debug!(
                        stream = %stream_id,
                        last,
                        next = candidate,
                        gap,
                        "Sequence wrapped around"
                    );
                }
                gap
            }
            None => 0,
        } - self.silence_credit;

        if gap > 0 {
            let limit = i32::try_from(config.placeholder_trigger_threshold).unwrap_or(i32::MAX);
            let fill = gap.min(limit);
            for _ in 0..fill {
                let placeholder = self.placeholder();
                match placeholder {
                    Entry::Silence => self.silence_placeholders += 1,
                    _ => self.repeat_placeholders += 1,
                }
                self.output.push_back(placeholder);
            }
        }

        if let Some(frame) = self.pending.remove(&candidate) {
            self.output.push_back(Entry::Frame(Arc::new(frame)));
        }
        self.last_sequence = Some(candidate);
        self.buffering_count = 0;
        self.silence_credit = 0;
        self.frames_seen_total += 1;
    }

    /// Smallest pending sequence after the last one, else the smallest overall
    fn next_candidate(&self) -> Option<u16> {
        let after_last = self.last_sequence.and_then(|last| {
            self.pending
                .range((Bound::Excluded(last), Bound::Unbounded))
                .next()
                .map(|(&seq, _)| seq)
        });
        after_last.or_else(|| self.pending.keys().next().copied())
    }

    /// Silence after silence (or with nothing queued), otherwise repeat the tail
    fn placeholder(&self) -> Entry {
        match self
            .output
            .back()
            .filter(|entry| !entry.is_silent())
            .and_then(Entry::frame)
        {
            Some(frame) => Entry::Repeat(frame.clone()),
            None => Entry::Silence,
        }
    }
}

/// Reorder and concealment state for one speaker
pub struct StreamBuffer {
    stream_id: StreamId,
    config: JitterConfig,
    decoder: Mutex<Box<dyn FrameDecoder>>,
    state: Mutex<BufferState>,
    frames_decoded: AtomicU64,
    decode_failures: AtomicU64,
    frames_superseded: AtomicU64,
}

impl StreamBuffer {
    pub fn new(stream_id: StreamId, decoder: Box<dyn FrameDecoder>, config: JitterConfig) -> Self {
        Self {
            stream_id,
            config,
            decoder: Mutex::new(decoder),
            state: Mutex::new(BufferState::new()),
            frames_decoded: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            frames_superseded: AtomicU64::new(0),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Decode a raw packet and add it to the pending set
    ///
    /// Silence frames are decoded too so the decoder sees every packet.
    /// A decode failure drops only this packet.
    pub fn ingest(&self, data: &[u8], sequence: u16, timestamp: u32) -> Result<(), CodecError> {
        let silence = is_silence_frame(data);

        let decoded = self.decoder.lock().decode(data);
        let pcm = match decoded {
            Ok(pcm) => pcm,
            Err(e) => {
                self.decode_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(stream = %self.stream_id, sequence, "Dropping frame: {}", e);
                return Err(e);
            }
        };
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);

        let frame = Frame::new(pcm, sequence, timestamp, silence);
        if self.state.lock().pending.insert(sequence, frame).is_some() {
            self.frames_superseded.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Commit at most one pending frame (plus concealment) to the output queue
    pub fn advance(&self) {
        self.state.lock().advance(&self.config, self.stream_id);
    }

    /// Advance, then pop one entry unless the stream is still cold
    ///
    /// Runs under a single acquisition of the state lock.
    pub fn tick(&self, cold_start_frames: u64) -> StreamTick {
        let mut state = self.state.lock();
        state.advance(&self.config, self.stream_id);

        let queue_depth = state.output.len();
        let entry = if state.frames_seen_total < cold_start_frames {
            None
        } else {
            state.output.pop_front()
        };

        StreamTick { queue_depth, entry }
    }

    /// Pop the oldest ready entry
    pub fn pop_ready(&self) -> Option<Entry> {
        self.state.lock().output.pop_front()
    }

    /// Record silence an outer signal already accounted for, so the next
    /// gap is not concealed for those frames
    pub fn credit_silence(&self, frames: u32) {
        let mut state = self.state.lock();
        let frames = i32::try_from(frames).unwrap_or(i32::MAX);
        state.silence_credit = state.silence_credit.saturating_add(frames);
    }

    pub fn queue_depth(&self) -> usize {
        self.state.lock().output.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Frames committed to the output queue so far
    pub fn frames_seen_total(&self) -> u64 {
        self.state.lock().frames_seen_total
    }

    pub fn last_sequence(&self) -> Option<u16> {
        self.state.lock().last_sequence
    }

    pub fn stats(&self) -> StreamStats {
        let state = self.state.lock();
        StreamStats {
            stream_id: self.stream_id.get(),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
            frames_emitted: state.frames_seen_total,
            silence_placeholders: state.silence_placeholders,
            repeat_placeholders: state.repeat_placeholders,
            wraparounds: state.wraparounds,
            pending: state.pending.len(),
            queued: state.output.len(),
            buffering: state.buffering_count > 0,
        }
    }
}
