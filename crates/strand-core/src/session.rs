//! Capability traits at the device and encoder boundary.
//!
//! # Cross-device fence bridge
//!
//! ```text
//! renderer ──signal V──▸ GPU fence ──┐
//!                                    │ input_wait (device timeline)
//! submit ───────────────────────────▸│ encoder reads texture
//!                                    │ output_signal (device timeline)
//! drain ◂──wait V'── slot fence ◂────┘
//! ```
//!
//! The renderer signals a GPU fence after copying a frame into the shared
//! texture; the submission tells the encoder "wait for GPU fence ≥ V before
//! reading" and "signal the slot fence to V' when the encoded picture is
//! available".  Both the wait and the signal execute on the respective
//! device's timeline — the CPU only blocks in the completion drain, and
//! only when it has no rendering work left to do.
//!
//! The encoder itself is a vendor function table; modelling it as the
//! [`EncoderSession`] trait lets a mock backend drive the whole pipeline in
//! tests without hardware.

use std::sync::Arc;

use crate::config::{Capabilities, EncoderConfig};
use crate::error::Result;
use crate::types::PixelFormat;

// ─── Opaque handles ──────────────────────────────────────────────────────

/// Opaque handle to a GPU-owned resource (texture or buffer).
///
/// The pipeline never owns the resource behind this handle — ownership
/// stays with the renderer or the device layer that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuResource(pub u64);

/// Encoder-side registration handle, returned by `register_input` /
/// `register_output` and consumed by mapping, submission and unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisteredId(pub u64);

/// Encoder-side mapped-input handle, valid between `map_input` and
/// `unmap_input`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MappedId(pub u64);

// ─── Fences ──────────────────────────────────────────────────────────────

/// A monotonically increasing completion counter signalled by a device.
pub trait GpuFence: Send + Sync {
    /// The highest value the fence has reached.
    fn completed_value(&self) -> u64;

    /// Block the calling thread until the fence reaches `value`.
    ///
    /// Only the completion drain may call this, and only when it has no
    /// useful rendering work left to do.
    fn wait(&self, value: u64) -> Result<()>;

    /// CPU-side signal.  Used by the renderer boundary after a frame copy
    /// and by test backends standing in for a device timeline.
    fn signal(&self, value: u64);
}

/// A fence plus the value to wait for or signal to.
#[derive(Clone)]
pub struct FencePoint {
    pub fence: Arc<dyn GpuFence>,
    pub value: u64,
}

impl std::fmt::Debug for FencePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FencePoint")
            .field("value", &self.value)
            .field("completed", &self.fence.completed_value())
            .finish()
    }
}

// ─── GPU device boundary ─────────────────────────────────────────────────

/// The slice of the GPU device the pipeline needs: fence and resource
/// creation.  Command submission and swap-chain handling stay with the
/// renderer.
pub trait GpuDevice {
    /// Create a fence starting at `initial`.
    fn create_fence(&self, initial: u64) -> Result<Arc<dyn GpuFence>>;

    /// Create a readback buffer of `size` bytes for encoder output.
    fn create_readback_buffer(&self, size: u64) -> Result<GpuResource>;

    /// Create a simultaneous-access texture shared with the encoder.
    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<GpuResource>;
}

// ─── Encoder session boundary ────────────────────────────────────────────

/// One picture submission: the mapped input, the output slot, and the two
/// fence points bridging the GPU and encoder timelines.
#[derive(Clone, Debug)]
pub struct PictureSubmission {
    /// Mapped input obtained from `map_input` immediately before this
    /// submission.
    pub input: MappedId,
    pub width: u32,
    pub height: u32,
    /// Input row pitch in bytes.
    pub pitch: u32,
    pub format: PixelFormat,
    /// Monotonic frame index; doubles as the input timestamp.
    pub frame_index: u32,
    /// The encoder must not read the input until this fence point passes.
    pub input_wait: FencePoint,
    /// Registered output buffer receiving the encoded picture.
    pub output: RegisteredId,
    /// The encoder signals this fence point once the output is readable.
    pub output_signal: FencePoint,
}

/// The hardware encoder session, consumed through its vendor function
/// table.  All methods report vendor failures as `Err` — registration,
/// mapping, submission and lock failures are fatal for the pipeline.
pub trait EncoderSession {
    /// Open/initialize the encode session for `config`.
    fn initialize(&mut self, config: &EncoderConfig) -> Result<()>;

    /// Register a GPU texture as encoder input.  `ready_fence` is the
    /// fence the renderer signals when the texture contents are ready.
    fn register_input(
        &mut self,
        resource: GpuResource,
        width: u32,
        height: u32,
        format: PixelFormat,
        ready_fence: Arc<dyn GpuFence>,
    ) -> Result<RegisteredId>;

    /// Register a buffer as encoder bitstream output.
    fn register_output(&mut self, resource: GpuResource, size: u32) -> Result<RegisteredId>;

    /// Release a registration.  The resource must be unmapped first.
    fn unregister(&mut self, id: RegisteredId) -> Result<()>;

    /// Obtain an encoder-side input handle for a registered texture.
    fn map_input(&mut self, id: RegisteredId) -> Result<MappedId>;

    /// Release a mapped input handle.
    fn unmap_input(&mut self, id: MappedId) -> Result<()>;

    /// Enqueue one picture for encoding.  Non-blocking: the encoder waits
    /// on `input_wait` and signals `output_signal` on its own timeline.
    fn submit(&mut self, picture: &PictureSubmission) -> Result<()>;

    /// Lock a completed output buffer for CPU read.  The returned bytes
    /// are only valid until [`unlock_output`](Self::unlock_output) — the
    /// caller must copy before unlocking.
    fn lock_output(&mut self, id: RegisteredId) -> Result<&[u8]>;

    /// Unlock an output buffer, invalidating the locked byte range.
    fn unlock_output(&mut self, id: RegisteredId) -> Result<()>;

    /// Query what the encoder supports.
    fn capabilities(&mut self) -> Result<Capabilities>;

    /// Close the session.  Callers must have drained all pending encodes
    /// and unregistered all resources first.
    fn close(&mut self) -> Result<()>;
}

// ─── Bitstream sink ──────────────────────────────────────────────────────

/// Receives encoded bitstream output in submission order.
///
/// Implementations: the async file writer, or an in-memory sink in tests.
pub trait BitstreamSink: Send {
    /// Write one encoded access unit.  `data` is only valid for the
    /// duration of the call — implementations must copy before returning.
    fn write_frame(&mut self, data: &[u8]) -> Result<()>;

    /// Complete all pending writes and flush to stable storage.
    fn flush(&mut self) -> Result<()>;
}
