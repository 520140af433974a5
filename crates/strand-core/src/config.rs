//! Encoder configuration and capability model.
//!
//! Configuration problems (rejected codec, out-of-range dimensions) are
//! fatal and surface as [`StrandError::Unsupported`]; capability *queries*
//! that fail degrade to "unsupported" instead of aborting.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StrandError};
use crate::session::EncoderSession;

/// Target codec for the encoder session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    H264,
    Hevc,
    Av1,
}

/// Encoder speed/quality preset, fastest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Preset {
    Fastest,
    Fast,
    Medium,
    Slow,
    Slowest,
}

/// Rate-control mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateControl {
    ConstantQp,
    VariableBitrate,
    ConstantBitrate,
}

/// Full encoder session configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub codec: Codec,
    pub preset: Preset,
    pub rate_control: RateControl,

    /// Encoded width in pixels.
    pub width: u32,
    /// Encoded height in pixels.
    pub height: u32,
    /// Framerate numerator.
    pub frame_rate_num: u32,
    /// Framerate denominator.
    pub frame_rate_den: u32,

    /// Average bitrate in bits/sec.
    pub bitrate: u32,
    /// Max bitrate in bits/sec (VBR/CBR ceiling).
    pub max_bitrate: u32,
    /// GOP length (frames between IDR).
    pub gop_length: u32,
    /// B-frame interval (0 = no B-frames).
    pub b_frames: u32,
    /// QP for constant-QP mode.
    pub qp: u32,

    /// Tune for low-latency streaming rather than throughput.
    pub low_latency: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec: Codec::H264,
            preset: Preset::Medium,
            rate_control: RateControl::ConstantBitrate,
            width: 0,
            height: 0,
            frame_rate_num: 60,
            frame_rate_den: 1,
            bitrate: 8_000_000,
            max_bitrate: 12_000_000,
            gop_length: 120,
            b_frames: 0,
            qp: 23,
            low_latency: true,
        }
    }
}

impl EncoderConfig {
    /// Validate this configuration against queried session capabilities.
    ///
    /// A rejected codec or out-of-range resolution is a configuration
    /// error, not a runtime condition to recover from.
    pub fn validate(&self, caps: &Capabilities) -> Result<()> {
        let codec_ok = match self.codec {
            Codec::H264 => caps.supports_h264,
            Codec::Hevc => caps.supports_hevc,
            Codec::Av1 => caps.supports_av1,
        };
        if !codec_ok {
            return Err(StrandError::Unsupported(format!(
                "codec {:?} not supported by this encoder",
                self.codec
            )));
        }
        if caps.max_width > 0 && self.width > caps.max_width
            || caps.max_height > 0 && self.height > caps.max_height
        {
            return Err(StrandError::Unsupported(format!(
                "{}x{} exceeds encoder maximum {}x{}",
                self.width, self.height, caps.max_width, caps.max_height
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(StrandError::Unsupported(format!(
                "invalid encode dimensions {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Capabilities reported by an encoder session.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct Capabilities {
    pub supports_h264: bool,
    pub supports_hevc: bool,
    pub supports_av1: bool,
    /// Maximum encode width; `0` means unreported.
    pub max_width: u32,
    /// Maximum encode height; `0` means unreported.
    pub max_height: u32,
    pub supports_async_encode: bool,
    pub supports_10bit: bool,
}

/// Whether `codec` is supported by the session.
///
/// Capability-query failures degrade to `false` — a query that cannot
/// complete must never crash the caller.
pub fn is_codec_supported(session: &mut dyn EncoderSession, codec: Codec) -> bool {
    match session.capabilities() {
        Ok(caps) => match codec {
            Codec::H264 => caps.supports_h264,
            Codec::Hevc => caps.supports_hevc,
            Codec::Av1 => caps.supports_av1,
        },
        Err(err) => {
            debug!(error = %err, ?codec, "Capability query failed; reporting codec unsupported");
            false
        }
    }
}
