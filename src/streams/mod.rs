//! Stream identity and the registry of live streams

pub mod table;

pub use table::StreamTable;

use serde::Serialize;
use std::fmt;
use std::num::NonZeroU64;

/// Identifies one speaker's packet stream
///
/// Zero is reserved on the wire for "no identity", so ids are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StreamId(NonZeroU64);

impl StreamId {
    /// Returns `None` for the reserved zero id
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
