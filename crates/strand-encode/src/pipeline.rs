//! Frame submission pipeline and completion drain.
//!
//! # Design
//!
//! One [`EncodePipeline`] owns a fixed-capacity ring of pending tickets,
//! one ticket per in-flight encode.  Submission maps the input texture,
//! hands the encoder an input-fence wait and an output-fence signal, and
//! records the ticket at `(head + pending) % capacity`.  The drain retires
//! tickets strictly in submission order: lock the output buffer, hand the
//! bytes to the sink, unlock, advance.  FIFO retirement is load-bearing —
//! bitstream order must match encode order or the GOP reference structure
//! of the output is corrupt.
//!
//! # Backpressure
//!
//! Submitting into a full ring returns [`StrandError::RingFull`]; the ring
//! never grows and never drops a frame.  The caller drains at least one
//! ticket and retries (see [`FrameCoordinator`](crate::coordinator)).
//!
//! # Blocking
//!
//! The drain is the only place the pipeline blocks the CPU, and only when
//! `wait_for_all` is set — at shutdown, or when the ring is saturated and
//! the caller has no rendering work left.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use strand_core::error::{Result, StrandError};
use strand_core::session::{
    BitstreamSink, EncoderSession, FencePoint, GpuDevice, GpuFence, GpuResource,
    PictureSubmission, RegisteredId,
};
use strand_core::types::{NEVER_SIGNALED, PipelineStats, PixelFormat};

use crate::registry::ResourceRegistry;

/// One in-flight encode awaiting completion.
struct PendingTicket {
    /// Output buffer the encoder writes into.
    output: RegisteredId,
    /// The slot fence the encoder signals when the output is readable.
    fence: Arc<dyn GpuFence>,
    /// Target fence value marking "encode done" (`frame_index + 1`).
    fence_value: u64,
    frame_index: u32,
}

/// One ring slot's dedicated output buffer and completion fence.
struct OutputSlot {
    /// Index into the registry's output-buffer table.
    output_index: usize,
    fence: Arc<dyn GpuFence>,
}

/// Bounded submit/drain pipeline over one encoder session.
pub struct EncodePipeline {
    registry: ResourceRegistry,
    slots: Vec<OutputSlot>,
    ring: Vec<Option<PendingTicket>>,
    head: usize,
    pending: usize,

    submitted_frames: u64,
    completed_frames: u64,
    wait_count: u64,
}

impl EncodePipeline {
    /// Create a pipeline with `buffer_count` ring slots, each backed by a
    /// dedicated readback buffer of `output_buffer_size` bytes and its own
    /// completion fence.
    pub fn new(
        session: &mut dyn EncoderSession,
        device: &dyn GpuDevice,
        buffer_count: usize,
        output_buffer_size: u32,
    ) -> Result<Self> {
        if buffer_count == 0 {
            return Err(StrandError::InvariantViolation(
                "pipeline needs at least one ring slot".into(),
            ));
        }
        let mut registry = ResourceRegistry::new();
        let mut slots = Vec::with_capacity(buffer_count);
        let mut ring = Vec::with_capacity(buffer_count);
        for _ in 0..buffer_count {
            let fence = device.create_fence(NEVER_SIGNALED)?;
            let buffer = device.create_readback_buffer(u64::from(output_buffer_size))?;
            let output_index = registry.register_output(session, buffer, output_buffer_size)?;
            slots.push(OutputSlot {
                output_index,
                fence,
            });
            ring.push(None);
        }
        info!(
            buffer_count,
            output_buffer_size, "Encode pipeline ring created"
        );
        Ok(Self {
            registry,
            slots,
            ring,
            head: 0,
            pending: 0,
            submitted_frames: 0,
            completed_frames: 0,
            wait_count: 0,
        })
    }

    /// Register a renderer-owned texture as a submittable input.
    pub fn register_texture(
        &mut self,
        session: &mut dyn EncoderSession,
        resource: GpuResource,
        width: u32,
        height: u32,
        format: PixelFormat,
        ready_fence: Arc<dyn GpuFence>,
    ) -> Result<usize> {
        self.registry
            .register_texture(session, resource, width, height, format, ready_fence)
    }

    /// Ring capacity (`buffer_count` at construction).
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Submit one rendered frame for encoding.
    ///
    /// `ready_fence_value` is the value the renderer signals on the
    /// texture's GPU fence once the frame copy is complete; the encoder
    /// waits for it on its own timeline, so this call never blocks.  The
    /// encoder will signal the slot fence to `frame_index + 1` when the
    /// encoded picture is available.
    ///
    /// Returns [`StrandError::RingFull`] when `pending == capacity`; the
    /// caller must drain at least one ticket first.
    pub fn submit(
        &mut self,
        session: &mut dyn EncoderSession,
        texture_index: usize,
        ready_fence_value: u64,
        frame_index: u32,
    ) -> Result<()> {
        let capacity = self.capacity();
        if self.pending == capacity {
            return Err(StrandError::RingFull { capacity });
        }
        if ready_fence_value == NEVER_SIGNALED {
            return Err(StrandError::InvariantViolation(
                "ready fence value 0 is reserved as never-signaled".into(),
            ));
        }

        let slot_index = (self.head + self.pending) % capacity;
        let output = self
            .registry
            .output_id(self.slots[slot_index].output_index)
            .ok_or_else(|| {
                StrandError::InvariantViolation(format!("ring slot {slot_index} lost its output"))
            })?;

        // Map immediately before submission, unmap immediately after: the
        // device-side input fence wait keeps the texture valid for the
        // encoder, and holding mappings across frames exhausts the
        // encoder's mapping slots.
        let mapped = self.registry.map_input(session, texture_index)?;
        let (width, height, pitch, format, ready_fence) = {
            let texture = self.registry.texture(texture_index).ok_or_else(|| {
                StrandError::Map(format!("no registered texture at index {texture_index}"))
            })?;
            (
                texture.width,
                texture.height,
                texture.format.row_pitch(texture.width),
                texture.format,
                texture.ready_fence.clone(),
            )
        };

        let fence_value = u64::from(frame_index) + 1;
        let picture = PictureSubmission {
            input: mapped,
            width,
            height,
            pitch,
            format,
            frame_index,
            input_wait: FencePoint {
                fence: ready_fence,
                value: ready_fence_value,
            },
            output,
            output_signal: FencePoint {
                fence: self.slots[slot_index].fence.clone(),
                value: fence_value,
            },
        };

        let submitted = session.submit(&picture);
        let unmapped = self.registry.unmap_input(session, texture_index);
        submitted?;
        unmapped?;

        self.ring[slot_index] = Some(PendingTicket {
            output,
            fence: self.slots[slot_index].fence.clone(),
            fence_value,
            frame_index,
        });
        self.pending += 1;
        self.submitted_frames += 1;
        trace!(
            frame_index,
            slot_index,
            pending = self.pending,
            "Frame submitted"
        );
        Ok(())
    }

    /// Retrieve completed encodes in strict FIFO order.
    ///
    /// With `wait_for_all == false`, stops at the first ticket whose fence
    /// has not reached its target — control returns to the caller so
    /// rendering continues.  With `wait_for_all == true`, blocks on each
    /// ticket until the ring is empty (shutdown, or saturation with no
    /// other work to do).
    pub fn drain(
        &mut self,
        session: &mut dyn EncoderSession,
        sink: &mut dyn BitstreamSink,
        wait_for_all: bool,
    ) -> Result<()> {
        while self.pending > 0 {
            let (fence, fence_value) = {
                let ticket = self.head_ticket()?;
                (ticket.fence.clone(), ticket.fence_value)
            };
            if fence.completed_value() < fence_value {
                if !wait_for_all {
                    break;
                }
                fence.wait(fence_value)?;
                self.wait_count += 1;
            }
            self.retire_head(session, sink)?;
        }
        Ok(())
    }

    /// Blocking retirement of exactly the oldest ticket.
    ///
    /// The coordinator's answer to [`StrandError::RingFull`]: free one
    /// slot, then retry the submission.  A no-op on an empty ring.
    pub fn drain_one(
        &mut self,
        session: &mut dyn EncoderSession,
        sink: &mut dyn BitstreamSink,
    ) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let (fence, fence_value) = {
            let ticket = self.head_ticket()?;
            (ticket.fence.clone(), ticket.fence_value)
        };
        if fence.completed_value() < fence_value {
            fence.wait(fence_value)?;
            self.wait_count += 1;
        }
        self.retire_head(session, sink)
    }

    /// Shutdown protocol: drain everything, then tear down registrations
    /// and close the session.  Teardown always runs, even when the final
    /// drain fails — resources must never leak past shutdown — but a
    /// drain failure is still reported.
    pub fn shutdown(
        &mut self,
        session: &mut dyn EncoderSession,
        sink: &mut dyn BitstreamSink,
    ) -> Result<()> {
        let drained = self.drain(session, sink, true);
        self.registry.unregister_all_textures(session);
        self.registry.unregister_all_outputs(session);
        if let Err(err) = session.close() {
            warn!(error = %err, "Encoder session close failed during teardown; continuing");
        }
        info!(
            submitted = self.submitted_frames,
            completed = self.completed_frames,
            waits = self.wait_count,
            "Encode pipeline shut down"
        );
        drained
    }

    /// Current pipeline counters.
    ///
    /// `pending_frames` always equals ring occupancy, and
    /// `submitted - completed == pending` at every observation point.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            submitted_frames: self.submitted_frames,
            completed_frames: self.completed_frames,
            pending_frames: self.pending as u64,
            wait_count: self.wait_count,
        }
    }

    fn head_ticket(&self) -> Result<&PendingTicket> {
        self.ring[self.head].as_ref().ok_or_else(|| {
            StrandError::InvariantViolation(format!(
                "ring head {} empty with {} tickets pending",
                self.head, self.pending
            ))
        })
    }

    /// Lock the head ticket's output, hand the bytes to the sink, unlock,
    /// retire.  Lock and sink failures are fatal and leave the ticket in
    /// place, but the unlock always runs once the lock succeeded — an
    /// output left locked poisons every later lock and the teardown.  An
    /// unlock failure on its own is logged and the ticket retired anyway;
    /// refusing to retire a stuck slot would deadlock the ring forever.
    fn retire_head(
        &mut self,
        session: &mut dyn EncoderSession,
        sink: &mut dyn BitstreamSink,
    ) -> Result<()> {
        let (output, frame_index) = {
            let ticket = self.head_ticket()?;
            (ticket.output, ticket.frame_index)
        };

        let delivered = {
            let bytes = session.lock_output(output)?;
            if bytes.is_empty() {
                Ok(0)
            } else {
                sink.write_frame(bytes).map(|()| bytes.len())
            }
        };
        if let Err(err) = session.unlock_output(output) {
            warn!(frame_index, error = %err, "Unlock after read failed; retiring ticket anyway");
        }
        let written = delivered?;

        self.ring[self.head] = None;
        self.head = (self.head + 1) % self.capacity();
        self.pending -= 1;
        self.completed_frames += 1;
        debug!(
            frame_index,
            bytes = written,
            pending = self.pending,
            "Frame completed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockFence, MockSession};

    /// Sink recording every delivered payload.
    #[derive(Default)]
    struct VecSink {
        frames: Vec<Vec<u8>>,
    }

    impl BitstreamSink for VecSink {
        fn write_frame(&mut self, data: &[u8]) -> Result<()> {
            self.frames.push(data.to_vec());
            Ok(())
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        session: MockSession,
        pipeline: EncodePipeline,
        ready_fence: Arc<MockFence>,
        texture: usize,
    }

    fn fixture(capacity: usize) -> Fixture {
        let device = MockDevice::new();
        let mut session = MockSession::new();
        let mut pipeline =
            EncodePipeline::new(&mut session, &device, capacity, 64 * 1024).expect("pipeline");
        let ready_fence = Arc::new(MockFence::new(0));
        let texture = pipeline
            .register_texture(
                &mut session,
                GpuResource(100),
                64,
                64,
                PixelFormat::Bgra8,
                ready_fence.clone(),
            )
            .expect("register texture");
        Fixture {
            session,
            pipeline,
            ready_fence,
            texture,
        }
    }

    /// Signal the ready fence and submit one frame.
    fn submit_frame(fx: &mut Fixture, frame_index: u32) -> Result<()> {
        let ready = u64::from(frame_index) + 1;
        fx.ready_fence.signal(ready);
        fx.pipeline
            .submit(&mut fx.session, fx.texture, ready, frame_index)
    }

    fn assert_stats_identity(fx: &Fixture) {
        let stats = fx.pipeline.stats();
        assert_eq!(
            stats.submitted_frames - stats.completed_frames,
            stats.pending_frames,
            "stats identity violated: {stats:?}"
        );
    }

    #[test]
    fn ring_bound_holds_and_full_ring_rejects_submission() {
        let mut fx = fixture(3);
        for i in 0..3 {
            submit_frame(&mut fx, i).expect("submit within capacity");
            assert_stats_identity(&fx);
        }
        assert_eq!(fx.pipeline.stats().pending_frames, 3);

        let err = submit_frame(&mut fx, 3).expect_err("4th submission must be rejected");
        assert!(matches!(err, StrandError::RingFull { capacity: 3 }));
        assert_eq!(
            fx.pipeline.stats().pending_frames,
            3,
            "rejected submission must not grow the ring"
        );
        assert_eq!(fx.pipeline.stats().submitted_frames, 3);
    }

    #[test]
    fn zero_ready_fence_value_is_rejected() {
        let mut fx = fixture(2);
        let err = fx
            .pipeline
            .submit(&mut fx.session, fx.texture, 0, 0)
            .expect_err("fence value 0 is reserved");
        assert!(matches!(err, StrandError::InvariantViolation(_)));
    }

    #[test]
    fn nonblocking_drain_before_any_completion_retires_nothing() {
        let mut fx = fixture(3);
        for i in 0..3 {
            submit_frame(&mut fx, i).expect("submit");
        }
        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, false)
            .expect("non-blocking drain");

        let stats = fx.pipeline.stats();
        assert_eq!(stats.pending_frames, 3);
        assert_eq!(stats.wait_count, 0);
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn completion_scenario_delivers_exactly_the_ready_frame() {
        // capacity=3, frames 0,1,2 in flight, then exactly one completes.
        let mut fx = fixture(3);
        for i in 0..3 {
            submit_frame(&mut fx, i).expect("submit");
        }
        let mut sink = VecSink::default();

        fx.session.complete_next().expect("complete frame 0");
        fx.pipeline
            .drain(&mut fx.session, &mut sink, false)
            .expect("drain");

        let stats = fx.pipeline.stats();
        assert_eq!(stats.pending_frames, 2);
        assert_eq!(stats.completed_frames, 1);
        assert_eq!(stats.wait_count, 0);
        assert_eq!(sink.frames, vec![fx.session.expected_payload(0)]);
        assert_stats_identity(&fx);
    }

    #[test]
    fn frames_reach_the_sink_in_submission_order() {
        let mut fx = fixture(3);
        let mut sink = VecSink::default();

        // Interleave submission and completion across two ring wraps.
        for i in 0..6u32 {
            match submit_frame(&mut fx, i) {
                Ok(()) => {}
                Err(StrandError::RingFull { .. }) => {
                    fx.session.complete_next().expect("complete oldest");
                    fx.pipeline
                        .drain_one(&mut fx.session, &mut sink)
                        .expect("drain one");
                    submit_frame(&mut fx, i).expect("retry after drain");
                }
                Err(other) => panic!("unexpected submit error: {other}"),
            }
            assert_stats_identity(&fx);
        }
        while fx.session.queued_encodes() > 0 {
            fx.session.complete_next().expect("complete");
        }
        fx.pipeline
            .drain(&mut fx.session, &mut sink, true)
            .expect("final drain");

        let expected: Vec<Vec<u8>> = (0..6).map(|i| fx.session.expected_payload(i)).collect();
        assert_eq!(sink.frames, expected, "bitstream order must match submission order");
        assert_eq!(
            fx.session.submitted_frame_indices(),
            &[0, 1, 2, 3, 4, 5],
            "encoder must see frame indices in order"
        );
    }

    #[test]
    fn sink_failure_unlocks_the_output_and_leaves_the_ticket_retryable() {
        struct FailingSink;

        impl BitstreamSink for FailingSink {
            fn write_frame(&mut self, _data: &[u8]) -> Result<()> {
                Err(StrandError::Io(std::io::Error::other("disk full")))
            }

            fn flush(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let mut fx = fixture(2);
        submit_frame(&mut fx, 0).expect("submit");
        fx.session.complete_next().expect("complete");

        let err = fx
            .pipeline
            .drain(&mut fx.session, &mut FailingSink, false)
            .expect_err("a failed delivery is fatal");
        assert!(matches!(err, StrandError::Io(_)));
        assert_eq!(
            fx.session.lock_calls(),
            fx.session.unlock_calls(),
            "every lock must be balanced by an unlock even when the sink fails"
        );
        assert_eq!(
            fx.pipeline.stats().pending_frames,
            1,
            "failed delivery must not retire the ticket"
        );

        // The buffer is unlocked, so the same ticket drains cleanly once
        // the sink recovers.
        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, false)
            .expect("retry after sink recovery");
        assert_eq!(sink.frames, vec![fx.session.expected_payload(0)]);
        assert_eq!(fx.pipeline.stats().pending_frames, 0);
    }

    #[test]
    fn full_drain_empties_the_ring() {
        let mut fx = fixture(3);
        for i in 0..3 {
            submit_frame(&mut fx, i).expect("submit");
        }
        for _ in 0..3 {
            fx.session.complete_next().expect("complete");
        }
        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, true)
            .expect("full drain");

        let stats = fx.pipeline.stats();
        assert_eq!(stats.pending_frames, 0);
        assert_eq!(stats.completed_frames, 3);
        assert_eq!(sink.frames.len(), 3);
        assert_stats_identity(&fx);
    }

    #[test]
    fn blocking_drain_waits_for_a_late_completion() {
        let mut fx = fixture(2);
        submit_frame(&mut fx, 0).expect("submit");

        // Output bytes land now; the completion signal arrives later from
        // another thread, as a real encoder timeline would deliver it.
        let signal = fx.session.finish_encode_next().expect("finish encode");
        let handle = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(25));
            signal.fence.signal(signal.value);
        });

        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, true)
            .expect("blocking drain");
        handle.join().expect("signal thread");

        let stats = fx.pipeline.stats();
        assert_eq!(stats.wait_count, 1);
        assert_eq!(stats.pending_frames, 0);
        assert_eq!(sink.frames, vec![fx.session.expected_payload(0)]);
    }

    #[test]
    fn unlock_failure_is_nonfatal_and_still_retires_the_ticket() {
        let mut fx = fixture(2);
        submit_frame(&mut fx, 0).expect("submit");
        fx.session.complete_next().expect("complete");
        fx.session.fail_next_unlock();

        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, false)
            .expect("drain must swallow the unlock failure");

        let stats = fx.pipeline.stats();
        assert_eq!(stats.completed_frames, 1);
        assert_eq!(stats.pending_frames, 0);
        assert_eq!(sink.frames.len(), 1, "the payload was read before the unlock failed");
    }

    #[test]
    fn empty_payload_retires_without_a_write() {
        let mut fx = fixture(2);
        fx.session.produce_empty_payloads();
        submit_frame(&mut fx, 0).expect("submit");
        fx.session.complete_next().expect("complete");

        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, false)
            .expect("drain");
        assert!(sink.frames.is_empty());
        assert_eq!(fx.pipeline.stats().completed_frames, 1);
    }

    #[test]
    fn every_read_is_bracketed_by_lock_and_unlock() {
        let mut fx = fixture(3);
        for i in 0..3 {
            submit_frame(&mut fx, i).expect("submit");
            fx.session.complete_next().expect("complete");
        }
        let mut sink = VecSink::default();
        fx.pipeline
            .drain(&mut fx.session, &mut sink, true)
            .expect("drain");
        assert_eq!(fx.session.lock_calls(), 3);
        assert_eq!(fx.session.unlock_calls(), 3);
    }

    #[test]
    fn shutdown_drains_then_unregisters_then_closes() {
        let mut fx = fixture(2);
        submit_frame(&mut fx, 0).expect("submit");
        submit_frame(&mut fx, 1).expect("submit");
        fx.session.complete_next().expect("complete");
        fx.session.complete_next().expect("complete");

        let mut sink = VecSink::default();
        fx.pipeline
            .shutdown(&mut fx.session, &mut sink)
            .expect("shutdown");

        assert_eq!(fx.pipeline.stats().pending_frames, 0);
        assert_eq!(fx.session.registered_input_count(), 0);
        assert_eq!(fx.session.registered_output_count(), 0);
        assert!(fx.session.is_closed(), "session must close after teardown");
        assert_eq!(sink.frames.len(), 2);
    }
}
