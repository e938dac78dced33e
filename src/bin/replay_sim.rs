//! Replay Simulator
//!
//! Synthesizes several speakers, pushes their Opus packets through a lossy,
//! reordering "network" into the recorder, then prints a replay summary.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_replay::{
    codec::OpusEncoder,
    config::{CodecConfig, RecorderConfig},
    constants::OPUS_SILENCE_FRAME,
    Recorder,
};

/// Silence frames a sender emits after it stops talking
const TRAILING_SILENCE_FRAMES: u32 = 5;

/// Multi-speaker jitter buffer and replay simulator.
#[derive(Parser, Debug)]
#[command(name = "replay-sim")]
#[command(about = "Feed synthetic lossy speaker streams into the recorder and print a replay")]
struct Args {
    /// Config file (default: platform config dir, then built-in defaults)
    #[arg(short, long, env = "VOICE_REPLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Number of simulated speakers
    #[arg(long, default_value_t = 3)]
    speakers: u64,

    /// How long the speakers talk, in seconds
    #[arg(long, default_value_t = 10)]
    seconds: u64,

    /// Replay window length, in seconds
    #[arg(long, default_value_t = 5.0)]
    replay: f64,

    /// Seconds of newest history left out of the replay
    #[arg(long, default_value_t = 0.0)]
    padding: f64,

    /// Drop leading silence from the replay
    #[arg(long)]
    trim_silence: bool,

    /// Percentage of packets lost in transit
    #[arg(long, default_value_t = 5)]
    loss_percent: u64,

    /// Percentage of packets delivered after their successor
    #[arg(long, default_value_t = 10)]
    reorder_percent: u64,

    /// First sequence number (close to 65535 to exercise wraparound)
    #[arg(long, default_value_t = 65000)]
    start_sequence: u16,
}

/// A packet as it would come off the wire
struct Packet {
    stream_id: u64,
    payload: Bytes,
    sequence: u16,
    timestamp: u32,
}

/// Deterministic per-packet choice, stable across runs
fn pick(stream_id: u64, sequence: u16, salt: u64, percent: u64) -> bool {
    let h = (sequence as u64 ^ (stream_id << 16) ^ salt).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    (h >> 32) % 100 < percent
}

/// Speakers alternate bursts of talk and pauses, offset from each other
fn is_talking(stream_id: u64, frame: u64) -> bool {
    ((frame + stream_id * 37) / 100) % 2 == 0
}

fn tone_frame(codec: &CodecConfig, stream_id: u64, frame: u64) -> Vec<i16> {
    let samples = codec.samples_per_frame();
    let freq = 110.0 * (stream_id + 1) as f32;
    let amplitude = 4000.0 + 2000.0 * (stream_id % 3) as f32;

    (0..samples)
        .flat_map(|i| {
            let t = (frame as usize * samples + i) as f32 / codec.sample_rate as f32;
            let v = ((t * freq * 2.0 * std::f32::consts::PI).sin() * amplitude) as i16;
            std::iter::repeat(v).take(codec.channels as usize)
        })
        .collect()
}

/// Generate one speaker's packets in real time
async fn run_speaker(
    stream_id: u64,
    args: Arc<Args>,
    codec: CodecConfig,
    tx: Sender<Packet>,
    dropped: Arc<AtomicU64>,
) -> Result<()> {
    let mut encoder = OpusEncoder::voice(codec.sample_rate, codec.channels, codec.samples_per_frame())
        .context("creating encoder")?;
    let mut ticker = tokio::time::interval(Duration::from_millis(codec.frame_duration_ms as u64));

    let frames = args.seconds * 1000 / codec.frame_duration_ms as u64;
    let mut sequence = args.start_sequence;
    let mut silence_sent = 0;
    let mut held: Option<Packet> = None;

    for frame in 0..frames {
        ticker.tick().await;

        let payload = if is_talking(stream_id, frame) {
            silence_sent = 0;
            encoder.encode(&tone_frame(&codec, stream_id, frame))?
        } else if silence_sent < TRAILING_SILENCE_FRAMES {
            silence_sent += 1;
            Bytes::from_static(&OPUS_SILENCE_FRAME)
        } else {
            continue;
        };

        let packet = Packet {
            stream_id,
            payload,
            sequence,
            timestamp: (frame as u32).wrapping_mul(codec.samples_per_frame() as u32),
        };
        sequence = sequence.wrapping_add(1);

        if pick(stream_id, packet.sequence, 1, args.loss_percent) {
            continue;
        }
        if held.is_none() && pick(stream_id, packet.sequence, 2, args.reorder_percent) {
            held = Some(packet);
            continue;
        }

        for packet in std::iter::once(packet).chain(held.take()) {
            if let Err(TrySendError::Full(_)) = tx.try_send(packet) {
                dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    tracing::info!(stream = stream_id, frames = encoder.frames_encoded(), "Speaker finished");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Arc::new(Args::parse());

    let config = match &args.config {
        Some(path) => RecorderConfig::load(path)?,
        None => RecorderConfig::load_or_default()?,
    };
    let codec = config.codec.clone();

    tracing::info!(
        "Simulating {} speakers for {}s ({}% loss, {}% reordered)",
        args.speakers,
        args.seconds,
        args.loss_percent,
        args.reorder_percent
    );

    let recorder = Arc::new(Recorder::with_opus(config)?);
    let scheduler = recorder.start()?;

    // Packet path: speakers -> channel -> ingest thread
    let (packet_tx, packet_rx) = bounded::<Packet>(4096);
    let ingest = {
        let recorder = recorder.clone();
        std::thread::Builder::new()
            .name("ingest".into())
            .spawn(move || {
                let mut packets = 0u64;
                for packet in packet_rx {
                    recorder.ingest(
                        packet.stream_id,
                        &packet.payload,
                        packet.sequence,
                        packet.timestamp,
                    );
                    packets += 1;
                }
                packets
            })?
    };

    let dropped = Arc::new(AtomicU64::new(0));
    let speakers: Vec<_> = (1..=args.speakers)
        .map(|stream_id| {
            tokio::spawn(run_speaker(
                stream_id,
                args.clone(),
                codec.clone(),
                packet_tx.clone(),
                dropped.clone(),
            ))
        })
        .collect();
    drop(packet_tx);

    for speaker in speakers {
        speaker.await??;
    }
    let packets = ingest
        .join()
        .map_err(|_| anyhow::anyhow!("ingest thread panicked"))?;

    // Let the buffers drain into history
    tokio::time::sleep(Duration::from_millis(500)).await;
    scheduler.stop().await;

    tracing::info!(
        "Ingested {} packets ({} dropped at the channel), {} ticks run, {} in history",
        packets,
        dropped.load(Ordering::Relaxed),
        recorder.ticks_run(),
        recorder.history_len()
    );

    let replay = recorder.get_replay(args.replay, args.padding, args.trim_silence);
    let report = serde_json::json!({
        "replay": recorder.summarize(&replay),
        "streams": recorder.stream_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
