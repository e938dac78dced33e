//! # Voice Replay
//!
//! Rolling multi-speaker capture with on-demand replay.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Packet sources (one per speaker, any thread)                         │
//! │     ingest(stream_id, opus bytes, seq, timestamp)                     │
//! └──────────────┬───────────────────┬───────────────────┬────────────────┘
//!                ▼                   ▼                   ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                 Stream Table (streams::table)                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐               │
//! │  │ StreamBuffer │   │ StreamBuffer │   │ StreamBuffer │  decode,      │
//! │  │  pending set │   │  pending set │   │  pending set │  reorder,     │
//! │  │  out queue   │   │  out queue   │   │  out queue   │  conceal      │
//! │  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘               │
//! └─────────┼──────────────────┼──────────────────┼───────────────────────┘
//!           └──────────────────┼──────────────────┘
//!                              ▼  every 20 ms (drift corrected)
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │            Stream Scheduler (recorder::scheduler)                      │
//! │      advance every stream, pop one entry each → OutputTick            │
//! └──────────────────────────────┬────────────────────────────────────────┘
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │   History (recorder::history) - bounded FIFO, 20 s of ticks           │
//! └──────────────────────────────┬────────────────────────────────────────┘
//!                                ▼  snapshot
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │   Replay Extractor (recorder::replay) - window, padding, trim         │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod recorder;
pub mod streams;

pub use error::{Error, Result};
pub use recorder::{Recorder, SchedulerHandle};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for decoded audio
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default frame duration in milliseconds
    pub const DEFAULT_FRAME_DURATION_MS: u32 = 20;

    /// Opus frame the sender emits in place of audio when it stops talking
    pub const OPUS_SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

    /// Default scheduler tick rate
    pub const DEFAULT_TICK_RATE_HZ: u32 = 50;

    /// Default length of the rolling history
    pub const DEFAULT_HISTORY_SECONDS: f64 = 20.0;

    /// Size of the sequence number space
    pub const SEQUENCE_SPACE: i32 = 1 << 16;

    /// Divisor used to normalize peak sample magnitude into a level
    pub const LEVEL_SCALE: f32 = 65536.0;
}
