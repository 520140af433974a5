//! Asynchronous bitstream persistence for the strand pipeline.

pub mod writer;

pub use writer::{BitstreamWriter, WriterStats};
