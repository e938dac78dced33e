//! Stream table
//!
//! Maps stream ids to their jitter buffers. Buffers are created on the
//! first packet of a stream and live as long as the table.

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::sync::Arc;

use crate::audio::buffer::{StreamBuffer, StreamStats};
use crate::codec::DecoderFactory;
use crate::config::JitterConfig;
use crate::error::StreamError;
use crate::streams::StreamId;

/// Concurrent registry of per-speaker buffers
pub struct StreamTable {
    streams: DashMap<StreamId, Arc<StreamBuffer>>,
    decoder_factory: DecoderFactory,
    config: JitterConfig,
}

impl StreamTable {
    pub fn new(decoder_factory: DecoderFactory, config: JitterConfig) -> Self {
        Self {
            streams: DashMap::new(),
            decoder_factory,
            config,
        }
    }

    /// Look up a stream, creating it if this is its first packet
    ///
    /// The shard lock is held only for the lookup-or-insert; the returned
    /// handle is used without any registry lock.
    pub fn get_or_create(&self, stream_id: StreamId) -> Result<Arc<StreamBuffer>, StreamError> {
        if let Some(buffer) = self.streams.get(&stream_id) {
            return Ok(buffer.clone());
        }

        match self.streams.entry(stream_id) {
            MapEntry::Occupied(entry) => Ok(entry.get().clone()),
            MapEntry::Vacant(entry) => {
                let decoder = (self.decoder_factory)()
                    .map_err(|e| StreamError::DecoderUnavailable(stream_id.get(), e))?;
                let buffer = Arc::new(StreamBuffer::new(stream_id, decoder, self.config.clone()));
                entry.insert(buffer.clone());
                tracing::debug!(stream = %stream_id, "New stream registered");
                Ok(buffer)
            }
        }
    }

    pub fn get(&self, stream_id: StreamId) -> Option<Arc<StreamBuffer>> {
        self.streams.get(&stream_id).map(|b| b.clone())
    }

    /// Feed one raw packet to its stream
    pub fn ingest(
        &self,
        stream_id: StreamId,
        data: &[u8],
        sequence: u16,
        timestamp: u32,
    ) -> Result<(), StreamError> {
        self.get_or_create(stream_id)?
            .ingest(data, sequence, timestamp)
            .map_err(|e| StreamError::FrameDropped(stream_id.get(), e))
    }

    /// Current streams, sorted by id
    pub fn snapshot(&self) -> Vec<(StreamId, Arc<StreamBuffer>)> {
        let mut streams: Vec<_> = self
            .streams
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        streams.sort_by_key(|(id, _)| *id);
        streams
    }

    pub fn stream_ids(&self) -> Vec<StreamId> {
        self.snapshot().into_iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Statistics for every stream, sorted by id
    pub fn stats(&self) -> Vec<StreamStats> {
        self.snapshot().iter().map(|(_, b)| b.stats()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Entry;
    use crate::codec::testing::{factory, tone, CORRUPT};
    use crate::error::CodecError;
    use std::thread;

    fn id(raw: u64) -> StreamId {
        StreamId::new(raw).unwrap()
    }

    #[test]
    fn test_lazy_creation() {
        let table = StreamTable::new(factory(), JitterConfig::default());
        assert!(table.is_empty());

        table.ingest(id(7), &tone(40), 1, 0).unwrap();
        table.ingest(id(7), &tone(40), 2, 960).unwrap();
        table.ingest(id(3), &tone(40), 1, 0).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.stream_ids(), vec![id(3), id(7)]);
        assert_eq!(table.get(id(7)).unwrap().pending_count(), 2);
        assert!(table.get(id(9)).is_none());
    }

    #[test]
    fn test_zero_id_is_not_an_identity() {
        assert!(StreamId::new(0).is_none());
        assert_eq!(id(42).to_string(), "42");
    }

    #[test]
    fn test_decode_failure_keeps_stream() {
        let table = StreamTable::new(factory(), JitterConfig::default());
        let err = table.ingest(id(1), &[CORRUPT], 1, 0).unwrap_err();
        assert!(matches!(err, StreamError::FrameDropped(1, _)));

        // Stream exists, just without the bad frame
        let stats = table.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].decode_failures, 1);
        assert_eq!(stats[0].pending, 0);
    }

    #[test]
    fn test_decoder_factory_failure_creates_nothing() {
        let failing: DecoderFactory =
            Arc::new(|| Err(CodecError::DecoderInit("no codec".into())));
        let table = StreamTable::new(failing, JitterConfig::default());

        let err = table.ingest(id(1), &tone(40), 1, 0).unwrap_err();
        assert!(matches!(err, StreamError::DecoderUnavailable(1, _)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_ingest_no_drop_or_duplicate() {
        const FRAMES: u16 = 200;

        for streams in [1u64, 2, 5, 16] {
            let table = Arc::new(StreamTable::new(factory(), JitterConfig::default()));

            let handles: Vec<_> = (1..=streams)
                .map(|raw| {
                    let table = table.clone();
                    thread::spawn(move || {
                        // Deliver pairs swapped to exercise reordering
                        for pair in (0..FRAMES).step_by(2) {
                            for seq in [pair + 1, pair] {
                                table.ingest(id(raw), &tone(40), seq, seq as u32 * 960).unwrap();
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(table.len(), streams as usize);
            for (_, buffer) in table.snapshot() {
                while buffer.pending_count() > 0 {
                    buffer.advance();
                }
                let emitted: Vec<u16> = std::iter::from_fn(|| buffer.pop_ready())
                    .map(|e| match e {
                        Entry::Frame(f) => f.sequence,
                        other => panic!("unexpected placeholder {:?}", other),
                    })
                    .collect();
                assert_eq!(emitted, (0..FRAMES).collect::<Vec<_>>());
            }
        }
    }
}
