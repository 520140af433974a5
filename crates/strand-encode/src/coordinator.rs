//! Frame coordinator — the render-loop-facing surface.
//!
//! Owns the encoder session, the sink and a small pool of shared textures.
//! Each call to [`FrameCoordinator::encode_frame`] submits the current
//! texture, opportunistically drains completed frames without blocking, and
//! rotates to the next texture so the renderer never writes into a texture
//! the encoder may still be reading.

use std::sync::Arc;

use tracing::{debug, info};

use strand_core::config::{Codec, EncoderConfig, Preset, RateControl};
use strand_core::error::{Result, StrandError};
use strand_core::session::{BitstreamSink, EncoderSession, GpuDevice, GpuFence};
use strand_core::types::{PipelineStats, PixelFormat, ResourceState};

use crate::pipeline::EncodePipeline;

/// User-facing pipeline configuration; expanded into a full
/// [`EncoderConfig`] at setup.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub width: u32,
    pub height: u32,
    /// Frames per second.
    pub frame_rate: u32,
    /// Average bitrate in bits/sec.
    pub bitrate: u32,
    pub codec: Codec,
    pub format: PixelFormat,
    pub low_latency: bool,
    /// Shared textures and ring slots; bounds frames in flight.
    pub buffer_count: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 60,
            bitrate: 8_000_000,
            codec: Codec::H264,
            format: PixelFormat::Bgra8,
            low_latency: true,
            buffer_count: 3,
        }
    }
}

impl PipelineConfig {
    fn encoder_config(&self) -> EncoderConfig {
        EncoderConfig {
            codec: self.codec,
            preset: if self.low_latency {
                Preset::Fast
            } else {
                Preset::Medium
            },
            rate_control: RateControl::ConstantBitrate,
            width: self.width,
            height: self.height,
            frame_rate_num: self.frame_rate,
            frame_rate_den: 1,
            bitrate: self.bitrate,
            max_bitrate: self.bitrate.saturating_mul(2),
            gop_length: self.frame_rate.saturating_mul(2),
            low_latency: self.low_latency,
            ..EncoderConfig::default()
        }
    }

    /// Per-slot readback buffer size.  Generously sized from the raw frame
    /// footprint — a compressed picture is far smaller, and an IDR burst
    /// must still fit.
    fn output_buffer_size(&self) -> u32 {
        let bytes = self.format.frame_bytes(self.width, self.height).max(64 * 1024);
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

/// Drives render → submit → drain from a single control thread.
pub struct FrameCoordinator<S: EncoderSession, K: BitstreamSink> {
    session: S,
    sink: K,
    pipeline: EncodePipeline,
    /// Per-texture renderer-side resource state, for barrier bookkeeping.
    texture_states: Vec<ResourceState>,
    ready_fences: Vec<Arc<dyn GpuFence>>,
    current_texture: usize,
    frame_count: u64,
    config: PipelineConfig,
}

impl<S: EncoderSession, K: BitstreamSink> FrameCoordinator<S, K> {
    /// Validate the configuration against the session's capabilities, open
    /// the session, and build the texture pool and submission ring.
    ///
    /// A capability query failure here is fatal: without a capability
    /// report there is no way to tell whether the requested codec would
    /// silently produce garbage.
    pub fn new(
        device: &dyn GpuDevice,
        mut session: S,
        sink: K,
        config: PipelineConfig,
    ) -> Result<Self> {
        if config.buffer_count == 0 {
            return Err(StrandError::InvariantViolation(
                "buffer_count must be at least 1".into(),
            ));
        }
        let caps = session.capabilities()?;
        let encoder_config = config.encoder_config();
        encoder_config.validate(&caps)?;
        session.initialize(&encoder_config)?;

        let mut pipeline = EncodePipeline::new(
            &mut session,
            device,
            config.buffer_count,
            config.output_buffer_size(),
        )?;

        let mut ready_fences = Vec::with_capacity(config.buffer_count);
        for _ in 0..config.buffer_count {
            let texture =
                device.create_shared_texture(config.width, config.height, config.format)?;
            let fence = device.create_fence(0)?;
            pipeline.register_texture(
                &mut session,
                texture,
                config.width,
                config.height,
                config.format,
                fence.clone(),
            )?;
            ready_fences.push(fence);
        }

        info!(
            width = config.width,
            height = config.height,
            codec = ?config.codec,
            buffer_count = config.buffer_count,
            "Frame coordinator ready"
        );
        Ok(Self {
            session,
            sink,
            texture_states: vec![ResourceState::Common; config.buffer_count],
            ready_fences,
            current_texture: 0,
            frame_count: 0,
            pipeline,
            config,
        })
    }

    /// Texture the renderer should draw into next.
    pub fn current_texture_index(&self) -> usize {
        self.current_texture
    }

    /// Fence the renderer must signal once the current texture's contents
    /// are final for this frame.
    pub fn current_ready_fence(&self) -> Arc<dyn GpuFence> {
        self.ready_fences[self.current_texture].clone()
    }

    /// Fence value [`encode_frame`](Self::encode_frame) will wait on for
    /// the next submission.
    pub fn next_ready_value(&self) -> u64 {
        self.frame_count + 1
    }

    /// Record a renderer-side state transition for a pooled texture.
    ///
    /// Returns the `(before, after)` pair a barrier should be issued for,
    /// or `None` when the texture is already in `next`.
    pub fn transition_texture(
        &mut self,
        index: usize,
        next: ResourceState,
    ) -> Result<Option<(ResourceState, ResourceState)>> {
        let state = self.texture_states.get_mut(index).ok_or_else(|| {
            StrandError::InvariantViolation(format!("no pooled texture at index {index}"))
        })?;
        Ok(state.transition(next))
    }

    /// Submit the current texture for encoding, collect any completed
    /// frames without blocking, and rotate to the next texture.
    ///
    /// The renderer must already have signalled the current ready fence to
    /// [`next_ready_value`](Self::next_ready_value).  When all ring slots
    /// are occupied, this blocks once for the oldest in-flight frame, then
    /// retries the submission.
    pub fn encode_frame(&mut self) -> Result<()> {
        let frame_index = u32::try_from(self.frame_count).map_err(|_| {
            StrandError::InvariantViolation("frame index overflowed u32".into())
        })?;
        let ready_value = self.next_ready_value();

        match self.pipeline.submit(
            &mut self.session,
            self.current_texture,
            ready_value,
            frame_index,
        ) {
            Ok(()) => {}
            Err(err) if err.is_backpressure() => {
                debug!(frame_index, "Submission ring full; draining oldest frame");
                self.pipeline.drain_one(&mut self.session, &mut self.sink)?;
                self.pipeline.submit(
                    &mut self.session,
                    self.current_texture,
                    ready_value,
                    frame_index,
                )?;
            }
            Err(other) => return Err(other),
        }

        self.pipeline
            .drain(&mut self.session, &mut self.sink, false)?;

        self.current_texture = (self.current_texture + 1) % self.config.buffer_count;
        self.frame_count += 1;
        Ok(())
    }

    /// Drain every in-flight frame, tear down the session, and flush the
    /// sink to stable storage.
    pub fn finish(&mut self) -> Result<()> {
        self.pipeline.shutdown(&mut self.session, &mut self.sink)?;
        self.sink.flush()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The underlying session, for capability reporting.
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    /// The underlying sink, for per-frame housekeeping such as reclaiming
    /// completed write slots.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }
}
