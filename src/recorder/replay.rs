//! Replay window extraction
//!
//! Works on a snapshot of the history, so extraction never blocks the
//! scheduler beyond the copy.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::audio::frame::{Entry, OutputTick};
use crate::config::ReplayConfig;
use crate::recorder::history::History;

pub struct ReplayExtractor {
    history: Arc<History>,
    tick_rate: u32,
    config: ReplayConfig,
}

impl ReplayExtractor {
    pub fn new(history: Arc<History>, tick_rate: u32, config: ReplayConfig) -> Self {
        Self {
            history,
            tick_rate,
            config,
        }
    }

    /// The `duration` seconds of history that end `padding` seconds before
    /// the newest tick
    ///
    /// At least one trailing tick is always left out. With `trim_silence`,
    /// leading ticks before the first voiced tick are dropped, keeping a
    /// short lead-in.
    pub fn get_replay(&self, duration: f64, padding: f64, trim_silence: bool) -> Vec<OutputTick> {
        let mut ticks = self.history.snapshot();

        let rate = self.tick_rate as f64;
        let tail = ((padding * rate).round() as usize).max(1);
        let window = (duration * rate).round() as usize;

        let end = ticks.len().saturating_sub(tail);
        let start = ticks.len().saturating_sub(window.saturating_add(tail));
        ticks.truncate(end);
        if start >= ticks.len() {
            return Vec::new();
        }
        ticks.drain(..start);

        if trim_silence {
            if let Some(onset) = self.speech_onset(&ticks, duration) {
                ticks.drain(..onset);
            }
        }

        ticks
    }

    /// Index to start from so the first voiced tick keeps its lead-in
    fn speech_onset(&self, ticks: &[OutputTick], duration: f64) -> Option<usize> {
        let lead_in = self.config.onset_lead_in_ticks;
        let budget = (duration * self.tick_rate as f64).round() as i64 - lead_in as i64;
        let scan = (self.config.trim_scan_limit.min(ticks.len()) as i64)
            .min(budget)
            .max(0) as usize;

        ticks[..scan]
            .iter()
            .position(|tick| {
                tick.entries
                    .iter()
                    .any(|e| e.entry.level() > self.config.voice_activity_threshold)
            })
            .map(|voiced| voiced.saturating_sub(lead_in))
    }
}

/// Per-speaker breakdown of a replay window
#[derive(Debug, Clone, Default, Serialize)]
pub struct SpeakerSummary {
    pub stream_id: u64,
    pub frames: usize,
    pub repeats: usize,
    pub silences: usize,
    /// Ticks where this speaker was above the voice activity threshold
    pub voiced_ticks: usize,
    pub peak_level: f32,
}

/// Overview of a replay window
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub ticks: usize,
    pub duration_seconds: f64,
    pub first_tick: Option<u64>,
    pub last_tick: Option<u64>,
    pub speakers: Vec<SpeakerSummary>,
}

impl ReplaySummary {
    pub fn from_ticks(ticks: &[OutputTick], tick_rate: u32, voice_threshold: f32) -> Self {
        let mut speakers: BTreeMap<u64, SpeakerSummary> = BTreeMap::new();

        for tick in ticks {
            for item in &tick.entries {
                let id = item.stream_id.get();
                let speaker = speakers.entry(id).or_insert_with(|| SpeakerSummary {
                    stream_id: id,
                    ..Default::default()
                });
                match &item.entry {
                    Entry::Frame(_) => speaker.frames += 1,
                    Entry::Repeat(_) => speaker.repeats += 1,
                    Entry::Silence => speaker.silences += 1,
                }
                let level = item.entry.level();
                if level > voice_threshold {
                    speaker.voiced_ticks += 1;
                }
                speaker.peak_level = speaker.peak_level.max(level);
            }
        }

        Self {
            ticks: ticks.len(),
            duration_seconds: ticks.len() as f64 / tick_rate as f64,
            first_tick: ticks.first().map(|t| t.index),
            last_tick: ticks.last().map(|t| t.index),
            speakers: speakers.into_values().collect(),
        }
    }
}
