//! Overlapped bitstream file writer.
//!
//! # Design
//!
//! Writes raw encoded access units to a file as a sequential elementary
//! bitstream (no container framing).  The output can be played back or
//! remuxed into MP4 via:
//!
//! ```bash
//! ffmpeg -i output.264 -c copy output.mp4
//! ```
//!
//! Writes are overlapped: a background thread owns the file and performs
//! positioned writes in job order, while the caller-side slot pool tracks
//! in-flight jobs.  [`BitstreamWriter::write_frame`] copies the caller's
//! bytes into a slot-owned buffer before returning — the caller's memory
//! (typically locked encoder output) is only valid until the caller unlocks
//! it, which may happen long before the write lands on disk.
//!
//! # Backpressure
//!
//! The pool is fixed-size.  When every slot is pending, `write_frame`
//! force-completes the oldest slot (blocking) before reusing it.  This
//! valve is independent of the encode ring's backpressure and is counted in
//! [`WriterStats::forced_completions`].
//!
//! # Failure policy
//!
//! "Write still in flight" is never an error — it is what
//! [`drain_completed`](BitstreamWriter::drain_completed) polls for.  Any
//! actual I/O failure is fatal: there is no recovery strategy for a
//! corrupted output stream.

use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use serde::Serialize;
use tracing::{debug, info};

use strand_core::error::{Result, StrandError};
use strand_core::session::BitstreamSink;

/// Default number of in-flight write slots.
pub const DEFAULT_WRITE_SLOTS: usize = 4;

enum WriterMsg {
    Write { buf: Vec<u8>, offset: u64 },
    Flush,
}

enum Done {
    /// One positioned write finished; the slot buffer comes back for reuse.
    Write(io::Result<()>, Vec<u8>),
    Flush(io::Result<()>),
}

/// Writer-side counters.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct WriterStats {
    /// Access units accepted for writing.
    pub frames_written: u64,
    /// Total payload bytes accepted.
    pub bytes_written: u64,
    /// Times `write_frame` had to block on the oldest pending slot.
    pub forced_completions: u64,
}

/// Asynchronous raw-bitstream file writer with a fixed slot pool.
pub struct BitstreamWriter {
    jobs: Option<Sender<WriterMsg>>,
    done: Receiver<Done>,
    worker: Option<JoinHandle<()>>,
    /// Recycled slot buffers, bounded by the slot count.
    free: Vec<Vec<u8>>,
    slot_count: usize,
    pending: usize,
    offset: u64,
    stats: WriterStats,
    path: PathBuf,
}

impl BitstreamWriter {
    /// Create the output file and start the writer thread with
    /// [`DEFAULT_WRITE_SLOTS`] slots.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_slots(path, DEFAULT_WRITE_SLOTS)
    }

    /// Create with an explicit slot-pool size (must be ≥ 1).
    pub fn with_slots(path: impl AsRef<Path>, slot_count: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if slot_count == 0 {
            return Err(StrandError::InvariantViolation(
                "bitstream writer needs at least one write slot".into(),
            ));
        }
        let file = File::create(&path)?;

        let (job_tx, job_rx) = mpsc::channel::<WriterMsg>();
        let (done_tx, done_rx) = mpsc::channel::<Done>();
        let worker = std::thread::Builder::new()
            .name("strand-bitstream-writer".into())
            .spawn(move || writer_thread(file, job_rx, done_tx))
            .map_err(StrandError::Io)?;

        info!(path = %path.display(), slots = slot_count, "Bitstream writer opened");

        Ok(Self {
            jobs: Some(job_tx),
            done: done_rx,
            worker: Some(worker),
            free: Vec::with_capacity(slot_count),
            slot_count,
            pending: 0,
            offset: 0,
            stats: WriterStats::default(),
            path,
        })
    }

    /// Queue one access unit for writing at the next sequential offset.
    ///
    /// Copies `data` before returning; never blocks unless the slot pool
    /// is exhausted, in which case the oldest pending write is completed
    /// first.
    pub fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if self.pending == self.slot_count {
            // Pool exhausted: the writer's own backpressure valve.  Count
            // the blocking event first — the reclaimed write may surface
            // an I/O failure, and the stats must still record the wait.
            self.stats.forced_completions += 1;
            self.reclaim_one()?;
        }

        let mut buf = self.free.pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(data);

        let offset = self.offset;
        self.offset += data.len() as u64;

        self.send(WriterMsg::Write { buf, offset })?;
        self.pending += 1;
        self.stats.frames_written += 1;
        self.stats.bytes_written += data.len() as u64;

        if self.stats.frames_written.is_multiple_of(100) {
            debug!(
                frames = self.stats.frames_written,
                bytes_mb = self.stats.bytes_written / (1024 * 1024),
                "Writer progress"
            );
        }
        Ok(())
    }

    /// Reclaim every slot whose write has finished, without blocking.
    ///
    /// Call once per loop iteration to bound buffer-reuse latency.
    pub fn drain_completed(&mut self) -> Result<()> {
        while self.pending > 0 {
            match self.done.try_recv() {
                Ok(done) => self.finish_one(done)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(StrandError::WriterClosed),
            }
        }
        Ok(())
    }

    /// Complete all pending writes and flush the file to storage.
    pub fn flush_all(&mut self) -> Result<()> {
        while self.pending > 0 {
            self.reclaim_one()?;
        }
        self.send(WriterMsg::Flush)?;
        match self.done.recv() {
            Ok(Done::Flush(result)) => result.map_err(StrandError::Io)?,
            Ok(Done::Write(..)) => {
                return Err(StrandError::InvariantViolation(
                    "write completion received while no writes were pending".into(),
                ));
            }
            Err(_) => return Err(StrandError::WriterClosed),
        }
        info!(
            path = %self.path.display(),
            frames = self.stats.frames_written,
            bytes = self.stats.bytes_written,
            "Bitstream flushed"
        );
        Ok(())
    }

    /// Writer counters.
    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Number of writes currently in flight.
    pub fn pending_slots(&self) -> usize {
        self.pending
    }

    /// Block until the oldest pending write completes and reclaim its slot.
    fn reclaim_one(&mut self) -> Result<()> {
        match self.done.recv() {
            Ok(done) => self.finish_one(done),
            Err(_) => Err(StrandError::WriterClosed),
        }
    }

    fn finish_one(&mut self, done: Done) -> Result<()> {
        match done {
            Done::Write(result, buf) => {
                self.pending -= 1;
                self.free.push(buf);
                result.map_err(StrandError::Io)
            }
            Done::Flush(_) => Err(StrandError::InvariantViolation(
                "flush completion received while reclaiming a write slot".into(),
            )),
        }
    }

    fn send(&self, msg: WriterMsg) -> Result<()> {
        self.jobs
            .as_ref()
            .ok_or(StrandError::WriterClosed)?
            .send(msg)
            .map_err(|_| StrandError::WriterClosed)
    }
}

impl BitstreamSink for BitstreamWriter {
    fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        BitstreamWriter::write_frame(self, data)
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_all()
    }
}

impl Drop for BitstreamWriter {
    fn drop(&mut self) {
        // Closing the job channel lets the worker finish queued writes,
        // flush, and exit; joining keeps the file valid past drop.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Worker loop: owns the file, performs positioned writes in job order.
///
/// Job order equals completion order (single consumer of a FIFO channel),
/// which is what gives the caller-side slot pool its strict FIFO
/// reclamation.
fn writer_thread(mut file: File, jobs: Receiver<WriterMsg>, done: Sender<Done>) {
    for msg in jobs {
        match msg {
            WriterMsg::Write { buf, offset } => {
                let result = file
                    .seek(SeekFrom::Start(offset))
                    .and_then(|_| file.write_all(&buf));
                // A dropped receiver means the writer is being torn down;
                // finishing the remaining queued writes is all that's left.
                let _ = done.send(Done::Write(result, buf));
            }
            WriterMsg::Flush => {
                let _ = done.send(Done::Flush(file.flush()));
            }
        }
    }
    let _ = file.flush();
}
