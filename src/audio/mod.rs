//! Per-speaker audio buffering

pub mod buffer;
pub mod frame;

pub use buffer::{StreamBuffer, StreamStats};
pub use frame::{Entry, Frame, OutputTick, TickEntry};
