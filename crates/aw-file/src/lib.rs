//! aw-file: sound-file adapters for the UHJ encoder
//!
//! Streaming decode of any format symphonia can probe (WAV, FLAC, OGG, ...)
//! with a channel-map query, and 24-bit FLAC output via flac-bound.

mod error;
mod flac_writer;
mod reader;

pub use error::*;
pub use flac_writer::*;
pub use reader::*;
