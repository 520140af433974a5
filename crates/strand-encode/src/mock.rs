//! Mock device and encoder session backends.
//!
//! Stand-ins for the GPU device and the vendor encoder so the pipeline can
//! run on any machine: unit tests drive the encoder timeline by hand
//! (`complete_next` / `finish_encode_next`), while the CLI's synthetic mode
//! uses auto-completion.  The mock is deliberately strict about protocol
//! misuse — double-mapping, unregistering a mapped input, unbalanced
//! lock/unlock and reads that race the input fence all fail loudly.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::debug;

use strand_core::config::{Capabilities, EncoderConfig};
use strand_core::error::{Result, StrandError};
use strand_core::session::{
    EncoderSession, FencePoint, GpuDevice, GpuFence, GpuResource, MappedId, PictureSubmission,
    RegisteredId,
};
use strand_core::types::PixelFormat;

// ─── Mock fence ──────────────────────────────────────────────────────────

/// CPU-visible fence: a counter guarded by a mutex plus a condvar for
/// blocking waits.  Stands in for a device fence with an event-on-completion
/// wait handle.
pub struct MockFence {
    state: Mutex<u64>,
    cv: Condvar,
}

impl MockFence {
    pub fn new(initial: u64) -> Self {
        Self {
            state: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }
}

impl GpuFence for MockFence {
    fn completed_value(&self) -> u64 {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait(&self, value: u64) -> Result<()> {
        let mut cur = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *cur < value {
            cur = self.cv.wait(cur).unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }

    fn signal(&self, value: u64) {
        let mut cur = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if value > *cur {
            *cur = value;
            self.cv.notify_all();
        }
    }
}

// ─── Mock device ─────────────────────────────────────────────────────────

/// Fabricates resource handles and [`MockFence`]s.
#[derive(Default)]
pub struct MockDevice {
    next_resource: Cell<u64>,
    fences: RefCell<Vec<Arc<MockFence>>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fence handed out so far, in creation order.
    pub fn created_fences(&self) -> Vec<Arc<MockFence>> {
        self.fences.borrow().clone()
    }
}

impl GpuDevice for MockDevice {
    fn create_fence(&self, initial: u64) -> Result<Arc<dyn GpuFence>> {
        let fence = Arc::new(MockFence::new(initial));
        self.fences.borrow_mut().push(fence.clone());
        Ok(fence)
    }

    fn create_readback_buffer(&self, _size: u64) -> Result<GpuResource> {
        let id = self.next_resource.get();
        self.next_resource.set(id + 1);
        Ok(GpuResource(id))
    }

    fn create_shared_texture(
        &self,
        _width: u32,
        _height: u32,
        _format: PixelFormat,
    ) -> Result<GpuResource> {
        let id = self.next_resource.get();
        self.next_resource.set(id + 1);
        Ok(GpuResource(id))
    }
}

// ─── Mock session ────────────────────────────────────────────────────────

/// Deterministic payload the mock "encodes" for `frame_index`.
///
/// Annex-B-style start code, the big-endian frame index, then `fill`
/// filler bytes — enough structure for tests to recover submission order
/// from the persisted bitstream.
pub fn mock_payload(frame_index: u32, fill: usize) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + fill);
    payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    payload.extend_from_slice(&frame_index.to_be_bytes());
    payload.resize(8 + fill, 0xAB);
    payload
}

struct InputEntry {
    mapped: bool,
}

struct OutputEntry {
    size: u32,
    bytes: Vec<u8>,
    locked: bool,
}

struct QueuedEncode {
    frame_index: u32,
    input_wait: FencePoint,
    output: RegisteredId,
    output_signal: FencePoint,
}

/// In-memory encoder session implementing the full session contract.
pub struct MockSession {
    next_id: u64,
    inputs: HashMap<u64, InputEntry>,
    outputs: HashMap<u64, OutputEntry>,
    /// mapped id → registered input id
    mapped: HashMap<u64, u64>,
    queue: VecDeque<QueuedEncode>,

    /// Complete every submission inline (CLI synthetic mode).
    auto_complete: bool,
    payload_fill: usize,
    produce_empty_payloads: bool,

    caps: Capabilities,
    config: Option<EncoderConfig>,
    closed: bool,

    fail_capabilities: bool,
    fail_next_unlock: bool,
    fail_next_unregister: bool,

    submitted: Vec<u32>,
    map_calls: u64,
    unmap_calls: u64,
    lock_calls: u64,
    unlock_calls: u64,
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            mapped: HashMap::new(),
            queue: VecDeque::new(),
            auto_complete: false,
            payload_fill: 56,
            produce_empty_payloads: false,
            caps: Capabilities {
                supports_h264: true,
                supports_hevc: true,
                supports_av1: false,
                max_width: 4096,
                max_height: 4096,
                supports_async_encode: true,
                supports_10bit: false,
            },
            config: None,
            closed: false,
            fail_capabilities: false,
            fail_next_unlock: false,
            fail_next_unregister: false,
            submitted: Vec::new(),
            map_calls: 0,
            unmap_calls: 0,
            lock_calls: 0,
            unlock_calls: 0,
        }
    }

    /// A session that finishes every encode at submission time.
    pub fn auto_completing() -> Self {
        Self {
            auto_complete: true,
            ..Self::new()
        }
    }

    pub fn set_payload_fill(&mut self, fill: usize) {
        self.payload_fill = fill;
    }

    /// Make subsequent completions produce zero-byte outputs.
    pub fn produce_empty_payloads(&mut self) {
        self.produce_empty_payloads = true;
    }

    pub fn set_capabilities(&mut self, caps: Capabilities) {
        self.caps = caps;
    }

    pub fn fail_capabilities(&mut self) {
        self.fail_capabilities = true;
    }

    pub fn fail_next_unlock(&mut self) {
        self.fail_next_unlock = true;
    }

    pub fn fail_next_unregister(&mut self) {
        self.fail_next_unregister = true;
    }

    /// The payload [`complete_next`](Self::complete_next) produces for a
    /// frame, given the current fill setting.
    pub fn expected_payload(&self, frame_index: u32) -> Vec<u8> {
        mock_payload(frame_index, self.payload_fill)
    }

    /// Finish the oldest queued encode: write its payload and signal its
    /// output fence point.  Fails if the submission's input fence wait is
    /// not yet satisfied — the encoder would be reading garbage.
    pub fn complete_next(&mut self) -> Result<()> {
        let signal = self.finish_encode_next()?;
        signal.fence.signal(signal.value);
        Ok(())
    }

    /// Finish the oldest queued encode without signalling, returning the
    /// output fence point for the caller to signal.  Lets tests separate
    /// "output bytes ready" from "completion visible to the drain".
    pub fn finish_encode_next(&mut self) -> Result<FencePoint> {
        let encode = self.queue.pop_front().ok_or_else(|| {
            StrandError::InvariantViolation("no queued encode to complete".into())
        })?;
        if encode.input_wait.fence.completed_value() < encode.input_wait.value {
            return Err(StrandError::Submit(format!(
                "encoder would read frame {} before its input fence reached {}",
                encode.frame_index, encode.input_wait.value
            )));
        }
        let payload = if self.produce_empty_payloads {
            Vec::new()
        } else {
            mock_payload(encode.frame_index, self.payload_fill)
        };
        let entry = self.outputs.get_mut(&encode.output.0).ok_or_else(|| {
            StrandError::InvariantViolation(format!(
                "queued encode references unregistered output {:?}",
                encode.output
            ))
        })?;
        if payload.len() as u64 > u64::from(entry.size) {
            return Err(StrandError::Submit(format!(
                "payload of {} bytes exceeds output capacity {}",
                payload.len(),
                entry.size
            )));
        }
        entry.bytes = payload;
        Ok(encode.output_signal)
    }

    // Test observability.

    pub fn queued_encodes(&self) -> usize {
        self.queue.len()
    }

    pub fn submitted_frame_indices(&self) -> &[u32] {
        &self.submitted
    }

    pub fn registered_input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn registered_output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn map_calls(&self) -> u64 {
        self.map_calls
    }

    pub fn unmap_calls(&self) -> u64 {
        self.unmap_calls
    }

    pub fn lock_calls(&self) -> u64 {
        self.lock_calls
    }

    pub fn unlock_calls(&self) -> u64 {
        self.unlock_calls
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl EncoderSession for MockSession {
    fn initialize(&mut self, config: &EncoderConfig) -> Result<()> {
        if self.config.is_some() {
            return Err(StrandError::Session("session already initialized".into()));
        }
        self.config = Some(config.clone());
        debug!(codec = ?config.codec, width = config.width, height = config.height,
               "Mock encoder session initialized");
        Ok(())
    }

    fn register_input(
        &mut self,
        _resource: GpuResource,
        width: u32,
        height: u32,
        _format: PixelFormat,
        _ready_fence: Arc<dyn GpuFence>,
    ) -> Result<RegisteredId> {
        if width == 0 || height == 0 {
            return Err(StrandError::Register(format!(
                "rejected {width}x{height} input texture"
            )));
        }
        let id = self.alloc_id();
        self.inputs.insert(id, InputEntry { mapped: false });
        Ok(RegisteredId(id))
    }

    fn register_output(&mut self, _resource: GpuResource, size: u32) -> Result<RegisteredId> {
        if size == 0 {
            return Err(StrandError::Register("rejected zero-size output".into()));
        }
        let id = self.alloc_id();
        self.outputs.insert(
            id,
            OutputEntry {
                size,
                bytes: Vec::new(),
                locked: false,
            },
        );
        Ok(RegisteredId(id))
    }

    fn unregister(&mut self, id: RegisteredId) -> Result<()> {
        if self.fail_next_unregister {
            self.fail_next_unregister = false;
            return Err(StrandError::Register("injected unregister failure".into()));
        }
        if self.mapped.values().any(|&reg| reg == id.0) {
            return Err(StrandError::Register(format!(
                "cannot unregister {id:?} while it is mapped"
            )));
        }
        if self.inputs.remove(&id.0).is_none() && self.outputs.remove(&id.0).is_none() {
            return Err(StrandError::Register(format!("unknown registration {id:?}")));
        }
        Ok(())
    }

    fn map_input(&mut self, id: RegisteredId) -> Result<MappedId> {
        let entry = self
            .inputs
            .get_mut(&id.0)
            .ok_or_else(|| StrandError::Map(format!("unknown input registration {id:?}")))?;
        if entry.mapped {
            return Err(StrandError::Map(format!("{id:?} is already mapped")));
        }
        entry.mapped = true;
        self.map_calls += 1;
        let mapped = self.alloc_id();
        self.mapped.insert(mapped, id.0);
        Ok(MappedId(mapped))
    }

    fn unmap_input(&mut self, id: MappedId) -> Result<()> {
        let registered = self
            .mapped
            .remove(&id.0)
            .ok_or_else(|| StrandError::Map(format!("unknown mapped handle {id:?}")))?;
        if let Some(entry) = self.inputs.get_mut(&registered) {
            entry.mapped = false;
        }
        self.unmap_calls += 1;
        Ok(())
    }

    fn submit(&mut self, picture: &PictureSubmission) -> Result<()> {
        if !self.mapped.contains_key(&picture.input.0) {
            return Err(StrandError::Submit(format!(
                "submission references unmapped input {:?}",
                picture.input
            )));
        }
        if !self.outputs.contains_key(&picture.output.0) {
            return Err(StrandError::Submit(format!(
                "submission references unregistered output {:?}",
                picture.output
            )));
        }
        self.submitted.push(picture.frame_index);
        self.queue.push_back(QueuedEncode {
            frame_index: picture.frame_index,
            input_wait: picture.input_wait.clone(),
            output: picture.output,
            output_signal: picture.output_signal.clone(),
        });
        if self.auto_complete {
            self.complete_next()?;
        }
        Ok(())
    }

    fn lock_output(&mut self, id: RegisteredId) -> Result<&[u8]> {
        let entry = self
            .outputs
            .get_mut(&id.0)
            .ok_or_else(|| StrandError::Lock(format!("unknown output registration {id:?}")))?;
        if entry.locked {
            return Err(StrandError::Lock(format!("{id:?} is already locked")));
        }
        entry.locked = true;
        self.lock_calls += 1;
        let entry = self
            .outputs
            .get(&id.0)
            .ok_or_else(|| StrandError::Lock(format!("unknown output registration {id:?}")))?;
        Ok(&entry.bytes)
    }

    fn unlock_output(&mut self, id: RegisteredId) -> Result<()> {
        let entry = self
            .outputs
            .get_mut(&id.0)
            .ok_or_else(|| StrandError::Lock(format!("unknown output registration {id:?}")))?;
        if !entry.locked {
            return Err(StrandError::Lock(format!("{id:?} is not locked")));
        }
        entry.locked = false;
        self.unlock_calls += 1;
        if self.fail_next_unlock {
            self.fail_next_unlock = false;
            return Err(StrandError::Lock("injected unlock failure".into()));
        }
        Ok(())
    }

    fn capabilities(&mut self) -> Result<Capabilities> {
        if self.fail_capabilities {
            return Err(StrandError::Capability(
                "injected capability query failure".into(),
            ));
        }
        Ok(self.caps)
    }

    fn close(&mut self) -> Result<()> {
        if !self.queue.is_empty() {
            return Err(StrandError::Session(format!(
                "close with {} encodes still queued",
                self.queue.len()
            )));
        }
        if !self.mapped.is_empty() {
            return Err(StrandError::Session(format!(
                "close with {} inputs still mapped",
                self.mapped.len()
            )));
        }
        self.closed = true;
        Ok(())
    }
}
