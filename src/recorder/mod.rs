//! Recorder facade
//!
//! Owns the stream table and the history and hands them to the scheduler
//! and replay extractor. Dropping the recorder (after stopping its
//! scheduler) is how all state is cleared.

pub mod history;
pub mod replay;
pub mod scheduler;

pub use history::History;
pub use replay::{ReplayExtractor, ReplaySummary, SpeakerSummary};
pub use scheduler::{PacingClock, SchedulerHandle, StreamScheduler, TickReport};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::buffer::StreamStats;
use crate::audio::frame::OutputTick;
use crate::codec::DecoderFactory;
use crate::config::RecorderConfig;
use crate::error::{Error, StreamError};
use crate::streams::{StreamId, StreamTable};

pub struct Recorder {
    config: RecorderConfig,
    table: Arc<StreamTable>,
    history: Arc<History>,
    replay: ReplayExtractor,
    ticks_run: Arc<AtomicU64>,
    /// Run flag of the spawned scheduler, cleared by its handle on stop
    running: Arc<AtomicBool>,
}

impl Recorder {
    pub fn new(config: RecorderConfig, decoder_factory: DecoderFactory) -> Result<Self, Error> {
        config.validate()?;

        let table = Arc::new(StreamTable::new(decoder_factory, config.jitter.clone()));
        let history = Arc::new(History::new(config.scheduler.history_capacity()));
        let replay = ReplayExtractor::new(
            history.clone(),
            config.scheduler.tick_rate_hz,
            config.replay.clone(),
        );

        Ok(Self {
            config,
            table,
            history,
            replay,
            ticks_run: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Recorder decoding Opus with the configured codec parameters
    #[cfg(feature = "opus")]
    pub fn with_opus(config: RecorderConfig) -> Result<Self, Error> {
        let factory = crate::codec::opus_factory(&config.codec);
        Self::new(config, factory)
    }

    /// Accept one packet from a speaker
    ///
    /// Never fails: packets without an identity (id 0) are dropped
    /// silently, and undecodable packets are logged and dropped without
    /// touching the rest of the stream.
    pub fn ingest(&self, stream_id: u64, data: &[u8], sequence: u16, timestamp: u32) {
        let Some(stream_id) = StreamId::new(stream_id) else {
            tracing::trace!(sequence, "Dropping packet without stream identity");
            return;
        };

        match self.table.ingest(stream_id, data, sequence, timestamp) {
            Ok(()) => {}
            Err(e @ StreamError::DecoderUnavailable(..)) => tracing::warn!("{}", e),
            Err(e) => tracing::trace!("{}", e),
        }
    }

    /// Slice of recent history; see [`ReplayExtractor::get_replay`]
    pub fn get_replay(
        &self,
        duration_seconds: f64,
        padding_seconds: f64,
        trim_silence: bool,
    ) -> Vec<OutputTick> {
        self.replay
            .get_replay(duration_seconds, padding_seconds, trim_silence)
    }

    /// Summarize a replay window
    pub fn summarize(&self, ticks: &[OutputTick]) -> ReplaySummary {
        ReplaySummary::from_ticks(
            ticks,
            self.config.scheduler.tick_rate_hz,
            self.config.replay.voice_activity_threshold,
        )
    }

    /// Session-boundary hook; state is kept until the recorder is recreated
    pub fn reset(&self) {
        tracing::debug!("Recorder reset requested");
    }

    /// Scheduler sharing this recorder's streams and history
    ///
    /// Call [`StreamScheduler::run_tick`] on it to drive ticks by hand, or
    /// use [`start`](Self::start) for real-time pacing.
    pub fn scheduler(&self) -> StreamScheduler {
        StreamScheduler::new(
            self.table.clone(),
            self.history.clone(),
            self.config.scheduler.clone(),
            self.ticks_run.clone(),
        )
    }

    /// Spawn the real-time scheduler on the current tokio runtime
    ///
    /// Fails while a previously started scheduler is still running; once
    /// its handle is stopped the recorder can be started again.
    pub fn start(&self) -> Result<SchedulerHandle, Error> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }
        Ok(self.scheduler().spawn_with(self.running.clone()))
    }

    /// Tell a stream that `frames` of silence were already accounted for
    pub fn credit_silence(&self, stream_id: u64, frames: u32) {
        if let Some(buffer) = StreamId::new(stream_id).and_then(|id| self.table.get(id)) {
            buffer.credit_silence(frames);
        }
    }

    pub fn stream_count(&self) -> usize {
        self.table.len()
    }

    pub fn stream_stats(&self) -> Vec<StreamStats> {
        self.table.stats()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn ticks_run(&self) -> u64 {
        self.ticks_run.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }
}
