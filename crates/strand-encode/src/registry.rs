//! Resource registry — encoder-side registration and mapping state.
//!
//! Tracks every texture and output buffer registered with the encoder
//! session, including the mapped/unmapped state of each input.  The
//! encoder exposes a bounded number of mapping slots, so a mapping must
//! immediately precede a submission and the unmapping must immediately
//! follow it — holding mappings across frames exhausts the slots.
//!
//! Teardown order matters: a mapped resource must be unmapped before it is
//! unregistered, and everything must be unregistered before the session is
//! closed.  `unregister_all_*` log and ignore vendor failures so teardown
//! always completes — a stuck resource must never block process exit.
//!
//! Entries are tombstoned rather than removed, so an index handed out by
//! registration stays valid for the life of the registry.

use std::sync::Arc;

use tracing::{debug, warn};

use strand_core::error::{Result, StrandError};
use strand_core::session::{EncoderSession, GpuFence, GpuResource, MappedId, RegisteredId};
use strand_core::types::PixelFormat;

/// A GPU texture registered as encoder input.
///
/// The texture itself is owned by the renderer; this entry owns only the
/// encoder-side registration.
pub struct RegisteredTexture {
    /// Non-owned renderer resource handle.
    pub resource: GpuResource,
    registered: RegisteredId,
    /// Present only while mapped.
    mapped: Option<MappedId>,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Signalled by the renderer when the texture contents are ready.
    pub ready_fence: Arc<dyn GpuFence>,
}

impl RegisteredTexture {
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }
}

/// A buffer registered as encoder bitstream output.
pub struct RegisteredOutput {
    pub resource: GpuResource,
    registered: RegisteredId,
    /// Byte capacity.
    pub size: u32,
}

/// Per-session registration bookkeeping for textures and output buffers.
#[derive(Default)]
pub struct ResourceRegistry {
    textures: Vec<Option<RegisteredTexture>>,
    outputs: Vec<Option<RegisteredOutput>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a renderer-owned texture as encoder input.
    ///
    /// Fails fatally if the encoder rejects the resource — an unsupported
    /// format or size is a configuration error, not something to retry.
    pub fn register_texture(
        &mut self,
        session: &mut dyn EncoderSession,
        resource: GpuResource,
        width: u32,
        height: u32,
        format: PixelFormat,
        ready_fence: Arc<dyn GpuFence>,
    ) -> Result<usize> {
        let registered =
            session.register_input(resource, width, height, format, ready_fence.clone())?;
        self.textures.push(Some(RegisteredTexture {
            resource,
            registered,
            mapped: None,
            format,
            width,
            height,
            ready_fence,
        }));
        let index = self.textures.len() - 1;
        debug!(index, width, height, ?format, "Input texture registered");
        Ok(index)
    }

    /// Register a readback buffer as encoder bitstream output.
    pub fn register_output(
        &mut self,
        session: &mut dyn EncoderSession,
        resource: GpuResource,
        size: u32,
    ) -> Result<usize> {
        let registered = session.register_output(resource, size)?;
        self.outputs.push(Some(RegisteredOutput {
            resource,
            registered,
            size,
        }));
        let index = self.outputs.len() - 1;
        debug!(index, size, "Output buffer registered");
        Ok(index)
    }

    /// Map a texture for submission.  Idempotent: mapping an already
    /// mapped texture returns the existing handle without a vendor call.
    pub fn map_input(
        &mut self,
        session: &mut dyn EncoderSession,
        index: usize,
    ) -> Result<MappedId> {
        let entry = self.texture_entry_mut(index)?;
        if let Some(mapped) = entry.mapped {
            return Ok(mapped);
        }
        let mapped = session.map_input(entry.registered)?;
        entry.mapped = Some(mapped);
        Ok(mapped)
    }

    /// Unmap a texture after submission.  A no-op if not mapped.
    pub fn unmap_input(&mut self, session: &mut dyn EncoderSession, index: usize) -> Result<()> {
        let entry = self.texture_entry_mut(index)?;
        let Some(mapped) = entry.mapped.take() else {
            return Ok(());
        };
        session.unmap_input(mapped)
    }

    /// Release a single texture registration, unmapping first if needed.
    /// The index is tombstoned; other indices stay valid.
    pub fn unregister_texture(
        &mut self,
        session: &mut dyn EncoderSession,
        index: usize,
    ) -> Result<()> {
        let entry = self
            .textures
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                StrandError::Register(format!("no registered texture at index {index}"))
            })?;
        if let Some(mapped) = entry.mapped {
            session.unmap_input(mapped)?;
        }
        session.unregister(entry.registered)?;
        debug!(index, "Input texture unregistered");
        Ok(())
    }

    /// Release a single output-buffer registration.
    pub fn unregister_output(
        &mut self,
        session: &mut dyn EncoderSession,
        index: usize,
    ) -> Result<()> {
        let entry = self
            .outputs
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                StrandError::Register(format!("no registered output at index {index}"))
            })?;
        session.unregister(entry.registered)?;
        debug!(index, "Output buffer unregistered");
        Ok(())
    }

    pub fn texture(&self, index: usize) -> Option<&RegisteredTexture> {
        self.textures.get(index).and_then(Option::as_ref)
    }

    /// Live (non-tombstoned) texture registrations.
    pub fn texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }

    /// Encoder registration id of the output buffer at `index`.
    pub fn output_id(&self, index: usize) -> Option<RegisteredId> {
        self.outputs
            .get(index)
            .and_then(Option::as_ref)
            .map(|o| o.registered)
    }

    /// Unmap (if needed) then unregister every texture.  Vendor failures
    /// are logged and ignored; the registry is cleared regardless.
    pub fn unregister_all_textures(&mut self, session: &mut dyn EncoderSession) {
        for (index, entry) in self.textures.drain(..).enumerate() {
            let Some(entry) = entry else { continue };
            if let Some(mapped) = entry.mapped
                && let Err(err) = session.unmap_input(mapped)
            {
                warn!(index, error = %err, "Unmap during teardown failed; continuing");
            }
            if let Err(err) = session.unregister(entry.registered) {
                warn!(index, error = %err, "Texture unregister during teardown failed; continuing");
            }
        }
    }

    /// Unregister every output buffer, logging and ignoring failures.
    pub fn unregister_all_outputs(&mut self, session: &mut dyn EncoderSession) {
        for (index, entry) in self.outputs.drain(..).enumerate() {
            let Some(entry) = entry else { continue };
            if let Err(err) = session.unregister(entry.registered) {
                warn!(index, error = %err, "Output unregister during teardown failed; continuing");
            }
        }
    }

    fn texture_entry_mut(&mut self, index: usize) -> Result<&mut RegisteredTexture> {
        self.textures
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or_else(|| StrandError::Map(format!("no registered texture at index {index}")))
    }
}
