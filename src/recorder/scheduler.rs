//! Fixed-rate stream scheduler
//!
//! A single task samples every stream once per tick and appends the
//! result to the history. Pacing follows an absolute schedule
//! (`start + n * interval`) so sleep overshoot does not accumulate; if
//! the process stalls for longer than the resync threshold (suspend, a
//! debugger) the schedule restarts from "now" instead of bursting ticks
//! to catch up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::audio::buffer::StreamTick;
use crate::audio::frame::{OutputTick, TickEntry};
use crate::config::SchedulerConfig;
use crate::recorder::history::History;
use crate::streams::StreamTable;

/// Absolute, drift-corrected tick schedule
#[derive(Debug, Clone)]
pub struct PacingClock {
    start: Instant,
    interval: Duration,
    resync_threshold: Duration,
    tick_index: u64,
    resyncs: u64,
}

impl PacingClock {
    pub fn new(start: Instant, interval: Duration, resync_threshold: Duration) -> Self {
        Self {
            start,
            interval,
            resync_threshold,
            tick_index: 0,
            resyncs: 0,
        }
    }

    /// Deadline of the next tick
    ///
    /// When the target is more than the resync threshold away from `now`
    /// in either direction, the schedule is rebased so the tick fires now.
    pub fn next_deadline(&mut self, now: Instant) -> Instant {
        self.tick_index += 1;
        let offset = self.interval.as_nanos() * self.tick_index as u128;
        let target = self.start + Duration::from_nanos(offset as u64);

        let drift = if target > now {
            target - now
        } else {
            now - target
        };

        if drift > self.resync_threshold {
            tracing::warn!("Scheduler drifted {:?}, resynchronizing", drift);
            self.start = now;
            self.tick_index = 0;
            self.resyncs += 1;
            return now;
        }

        target
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

/// Outcome of one scheduler pass
#[derive(Debug, Clone)]
pub struct TickReport {
    pub index: u64,
    /// Entries appended to history (zero means nothing was appended)
    pub entries: usize,
    pub max_queue_depth: usize,
    /// Whether this pass logged the long-buffer warning
    pub warned: bool,
}

/// Samples all streams into synchronized ticks
pub struct StreamScheduler {
    table: Arc<StreamTable>,
    history: Arc<History>,
    config: SchedulerConfig,
    ticks_run: Arc<AtomicU64>,
}

impl StreamScheduler {
    pub fn new(
        table: Arc<StreamTable>,
        history: Arc<History>,
        config: SchedulerConfig,
        ticks_run: Arc<AtomicU64>,
    ) -> Self {
        Self {
            table,
            history,
            config,
            ticks_run,
        }
    }

    /// Run one pass over every stream
    pub fn run_tick(&self) -> TickReport {
        let index = self.ticks_run.fetch_add(1, Ordering::Relaxed) + 1;
        let streams = self.table.snapshot();

        let mut entries = Vec::with_capacity(streams.len());
        let mut depths = Vec::with_capacity(streams.len());

        for (stream_id, buffer) in &streams {
            let StreamTick { queue_depth, entry } = buffer.tick(self.config.cold_start_frames);
            depths.push(queue_depth);
            if let Some(entry) = entry {
                entries.push(TickEntry {
                    stream_id: *stream_id,
                    entry,
                });
            }
        }

        let max_queue_depth = depths.iter().copied().max().unwrap_or(0);
        // An interval of zero disables the check
        let warned = index.checked_rem(self.config.diagnostic_interval_ticks) == Some(0)
            && max_queue_depth > self.config.diagnostic_queue_depth_warning;
        if warned {
            tracing::warn!(?depths, "Long buffers in recorder");
        }

        let appended = entries.len();
        if appended > 0 {
            if let Some(evicted) = self.history.push(OutputTick { index, entries }) {
                tracing::trace!(tick = evicted.index, "History full, evicted oldest tick");
            }
        }

        TickReport {
            index,
            entries: appended,
            max_queue_depth,
            warned,
        }
    }

    /// Tick until `running` is cleared
    pub async fn run(self, running: Arc<AtomicBool>) {
        let mut clock = PacingClock::new(
            Instant::now(),
            self.config.tick_interval(),
            self.config.drift_resync(),
        );

        tracing::info!(
            "Scheduler started at {} Hz, history {} ticks",
            self.config.tick_rate_hz,
            self.history.capacity()
        );

        while running.load(Ordering::Relaxed) {
            let deadline = clock.next_deadline(Instant::now());
            tokio::time::sleep_until(deadline).await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            self.run_tick();
        }

        tracing::info!(resyncs = clock.resyncs(), "Scheduler stopped");
    }

    /// Spawn the tick loop on the current tokio runtime
    pub fn spawn(self) -> SchedulerHandle {
        self.spawn_with(Arc::new(AtomicBool::new(true)))
    }

    /// Spawn with a caller-owned run flag, which [`SchedulerHandle::stop`]
    /// clears
    pub(crate) fn spawn_with(self, running: Arc<AtomicBool>) -> SchedulerHandle {
        running.store(true, Ordering::SeqCst);
        let task = tokio::spawn(self.run(running.clone()));
        SchedulerHandle { running, task }
    }
}

/// Handle to a running scheduler task
pub struct SchedulerHandle {
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.task.is_finished()
    }

    /// Stop ticking and wait for the task to finish its current pass
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.task.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::testing::{factory, tone, CORRUPT};
    use crate::config::JitterConfig;
    use crate::streams::StreamId;

    fn id(raw: u64) -> StreamId {
        StreamId::new(raw).unwrap()
    }

    fn scheduler(config: SchedulerConfig) -> (Arc<StreamTable>, Arc<History>, StreamScheduler) {
        let table = Arc::new(StreamTable::new(factory(), JitterConfig::default()));
        let history = Arc::new(History::new(config.history_capacity()));
        let scheduler = StreamScheduler::new(
            table.clone(),
            history.clone(),
            config,
            Arc::new(AtomicU64::new(0)),
        );
        (table, history, scheduler)
    }

    fn feed(table: &StreamTable, stream: u64, sequences: std::ops::Range<u16>) {
        for seq in sequences {
            table.ingest(id(stream), &tone(40), seq, seq as u32 * 960).unwrap();
        }
    }

    #[test]
    fn test_clock_follows_absolute_schedule() {
        let start = Instant::now();
        let interval = Duration::from_millis(20);
        let mut clock = PacingClock::new(start, interval, Duration::from_secs(1));

        assert_eq!(clock.next_deadline(start), start + interval);
        // Waking late does not push later ticks back
        let late = start + Duration::from_millis(35);
        assert_eq!(clock.next_deadline(late), start + interval * 2);
        assert_eq!(clock.next_deadline(late), start + interval * 3);
        assert_eq!(clock.resyncs(), 0);
    }

    #[test]
    fn test_clock_resyncs_after_stall() {
        let start = Instant::now();
        let interval = Duration::from_millis(20);
        let mut clock = PacingClock::new(start, interval, Duration::from_secs(1));
        clock.next_deadline(start);

        let resumed = start + Duration::from_secs(30);
        assert_eq!(clock.next_deadline(resumed), resumed);
        assert_eq!(clock.next_deadline(resumed), resumed + interval);
        assert_eq!(clock.resyncs(), 1);
    }

    #[test]
    fn test_clock_resyncs_when_far_ahead() {
        let now = Instant::now();
        let mut clock = PacingClock::new(
            now + Duration::from_secs(5),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );

        assert_eq!(clock.next_deadline(now), now);
        assert_eq!(clock.resyncs(), 1);
    }

    #[test]
    fn test_cold_start_holds_first_frames() {
        let (table, history, scheduler) = scheduler(SchedulerConfig::default());
        feed(&table, 1, 0..40);

        for _ in 0..9 {
            assert_eq!(scheduler.run_tick().entries, 0);
        }
        assert!(history.is_empty());

        let report = scheduler.run_tick();
        assert_eq!(report.entries, 1);
        assert_eq!(report.max_queue_depth, 10);

        let ticks = history.snapshot();
        assert_eq!(ticks[0].index, 10);
        assert_eq!(ticks[0].entry_for(id(1)).and_then(|e| e.sequence()), Some(0));
    }

    #[test]
    fn test_streams_sampled_in_id_order() {
        let (table, history, scheduler) = scheduler(SchedulerConfig {
            cold_start_frames: 0,
            ..SchedulerConfig::default()
        });
        for stream in [9, 2, 5] {
            feed(&table, stream, 0..4);
        }

        scheduler.run_tick();
        let tick = &history.snapshot()[0];
        let order: Vec<u64> = tick.entries.iter().map(|e| e.stream_id.get()).collect();
        assert_eq!(order, vec![2, 5, 9]);
    }

    #[test]
    fn test_history_stays_bounded() {
        let (table, history, scheduler) = scheduler(SchedulerConfig {
            history_duration_seconds: 1.0,
            cold_start_frames: 0,
            ..SchedulerConfig::default()
        });
        assert_eq!(history.capacity(), 50);

        let mut next = 0u16;
        feed(&table, 1, 0..4);
        next += 4;
        for _ in 0..300 {
            feed(&table, 1, next..next + 1);
            next = next.wrapping_add(1);
            scheduler.run_tick();
            assert!(history.len() <= 50);
        }

        let indices: Vec<u64> = history.snapshot().iter().map(|t| t.index).collect();
        assert_eq!(indices, (251..=300).collect::<Vec<_>>());
    }

    #[test]
    fn test_idle_ticks_are_not_recorded() {
        let (table, history, scheduler) = scheduler(SchedulerConfig {
            cold_start_frames: 0,
            ..SchedulerConfig::default()
        });
        feed(&table, 1, 0..4);

        for _ in 0..10 {
            scheduler.run_tick();
        }
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn test_faulty_stream_does_not_stall_others() {
        let (table, history, scheduler) = scheduler(SchedulerConfig {
            cold_start_frames: 0,
            ..SchedulerConfig::default()
        });
        feed(&table, 1, 0..4);
        for seq in 0..4 {
            assert!(table.ingest(id(2), &[CORRUPT], seq, 0).is_err());
        }

        scheduler.run_tick();
        let tick = &history.snapshot()[0];
        assert_eq!(tick.entries.len(), 1);
        assert_eq!(tick.entries[0].stream_id, id(1));
    }

    #[test]
    fn test_reports_queue_depth_of_backlogged_stream() {
        let (table, _history, scheduler) = scheduler(SchedulerConfig {
            cold_start_frames: 1000,
            ..SchedulerConfig::default()
        });
        feed(&table, 1, 0..40);
        feed(&table, 2, 0..4);

        let mut last = None;
        for _ in 0..30 {
            last = Some(scheduler.run_tick());
        }
        let report = last.unwrap();
        assert_eq!(report.index, 30);
        assert_eq!(report.max_queue_depth, 30);
        assert_eq!(report.entries, 0);
    }

    #[test]
    fn test_depth_warning_only_on_interval_ticks_above_limit() {
        let (table, _history, scheduler) = scheduler(SchedulerConfig {
            cold_start_frames: 1000,
            ..SchedulerConfig::default()
        });
        // Nothing is popped, so the queue grows by one frame per tick
        feed(&table, 1, 0..40);

        let reports: Vec<TickReport> = (0..30).map(|_| scheduler.run_tick()).collect();
        let warned: Vec<u64> = reports.iter().filter(|r| r.warned).map(|r| r.index).collect();
        assert_eq!(warned, vec![30]);

        // Depth of exactly 25 on an interval tick stays quiet
        assert_eq!(reports[24].max_queue_depth, 25);
        assert!(!reports[24].warned);
        // Above the limit but off the interval
        assert_eq!(reports[27].max_queue_depth, 28);
        assert!(!reports[27].warned);
    }

    #[test]
    fn test_zero_diagnostic_interval_disables_warning() {
        let (table, _history, scheduler) = scheduler(SchedulerConfig {
            cold_start_frames: 1000,
            diagnostic_interval_ticks: 0,
            ..SchedulerConfig::default()
        });
        feed(&table, 1, 0..40);

        for _ in 0..30 {
            assert!(!scheduler.run_tick().warned);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_scheduler_ticks_at_rate() {
        let config = SchedulerConfig::default();
        let ticks_run = Arc::new(AtomicU64::new(0));
        let table = Arc::new(StreamTable::new(factory(), JitterConfig::default()));
        let history = Arc::new(History::new(config.history_capacity()));
        let handle =
            StreamScheduler::new(table, history, config, ticks_run.clone()).spawn();

        tokio::time::sleep(Duration::from_millis(1010)).await;
        assert!(handle.is_running());
        handle.stop().await;

        assert_eq!(ticks_run.load(Ordering::Relaxed), 50);
    }
}
