//! Shared value types: pixel formats, resource states, pipeline counters.

use serde::Serialize;

/// Fence value reserved as "never signaled".
///
/// Fences are created at this value; the first real completion value a
/// submission may target is `1`.
pub const NEVER_SIGNALED: u64 = 0;

// ─── Pixel formats ───────────────────────────────────────────────────────

/// Pixel formats the encoder accepts as input textures.
///
/// Mirrors the DXGI → encoder-format mapping of the capture path: packed
/// 8-bit RGB variants for rendered frames, NV12/P010 for pre-converted
/// video surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    /// 8-bit BGRA, packed (the swap-chain default).
    Bgra8,
    /// 8-bit RGBA, packed.
    Rgba8,
    /// 10-bit RGB with 2-bit alpha, packed.
    Rgb10a2,
    /// 8-bit 4:2:0 planar luma + interleaved chroma.
    Nv12,
    /// 10-bit 4:2:0, 16-bit container.
    P010,
}

impl PixelFormat {
    /// Row pitch in bytes for the primary plane at `width` pixels.
    pub fn row_pitch(self, width: u32) -> u32 {
        match self {
            Self::Bgra8 | Self::Rgba8 | Self::Rgb10a2 => width * 4,
            Self::Nv12 => width,
            Self::P010 => width * 2,
        }
    }

    /// Total frame size in bytes, all planes.
    pub fn frame_bytes(self, width: u32, height: u32) -> u64 {
        let (w, h) = (u64::from(width), u64::from(height));
        match self {
            Self::Bgra8 | Self::Rgba8 | Self::Rgb10a2 => w * h * 4,
            // Luma plane plus half-height interleaved chroma plane.
            Self::Nv12 => w * h + w * h / 2,
            Self::P010 => 2 * (w * h + w * h / 2),
        }
    }

    /// Whether the format carries more than 8 bits per component.
    pub fn is_10bit(self) -> bool {
        matches!(self, Self::Rgb10a2 | Self::P010)
    }
}

// ─── Resource state tracking ─────────────────────────────────────────────

/// Tracked GPU resource state for the shared encoder textures.
///
/// All state changes go through [`ResourceState::transition`] so the
/// renderer boundary emits exactly the barriers that are needed — no
/// redundant barriers, no missed ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    Common,
    RenderTarget,
    CopySource,
    CopyDest,
}

impl ResourceState {
    /// Move to `next`, returning the `(before, after)` barrier pair when a
    /// barrier is actually required.  Transitioning to the current state
    /// is a no-op and returns `None`.
    pub fn transition(&mut self, next: ResourceState) -> Option<(ResourceState, ResourceState)> {
        if *self == next {
            return None;
        }
        let prev = *self;
        *self = next;
        Some((prev, next))
    }
}

// ─── Pipeline counters ───────────────────────────────────────────────────

/// Monotonic pipeline counters.
///
/// Identity: `submitted_frames - completed_frames == pending_frames`, and
/// `pending_frames` always equals the occupancy of the submission ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames handed to the encoder.
    pub submitted_frames: u64,
    /// Frames whose encoded output has been retrieved and retired.
    pub completed_frames: u64,
    /// Frames currently in flight (ring occupancy).
    pub pending_frames: u64,
    /// Times the drain loop had to block on an encoder fence.
    pub wait_count: u64,
}
