//! Cross-device encode pipeline core.
//!
//! # Architecture
//!
//! ```text
//! render ──signal GPU fence──▸ submit ──▸ ┌─────────────┐ ──▸ drain ──▸ sink
//!                                         │ ticket ring │
//!                                         │ (bounded)   │
//!                                         └─────────────┘
//! ```
//!
//! A single control thread drives render → submit → drain.  The GPU and
//! the encoder execute their submitted work asynchronously on their own
//! hardware queues; the pending-ticket ring bounds the number of frames in
//! flight and guarantees strict FIFO retrieval, so bitstream order always
//! matches encode order.

pub mod coordinator;
pub mod mock;
pub mod pipeline;
pub mod registry;

pub use coordinator::{FrameCoordinator, PipelineConfig};
pub use pipeline::EncodePipeline;
pub use registry::ResourceRegistry;
