//! Typed error hierarchy for the encode pipeline.
//!
//! Uses `thiserror` for library-grade errors.  Every vendor-facing call
//! returns `Result` — there is no panic-based control flow anywhere in the
//! pipeline.  Each variant maps to a stable integer code via
//! [`StrandError::error_code`] for structured telemetry (and the CLI exit
//! code) without string parsing.

/// All errors originating from the strand pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StrandError {
    // ── Session ───────────────────────────────────────────────────────
    #[error("Encoder session error: {0}")]
    Session(String),

    #[error("Unsupported configuration: {0}")]
    Unsupported(String),

    #[error("Capability query error: {0}")]
    Capability(String),

    // ── Resource registry ─────────────────────────────────────────────
    #[error("Resource registration error: {0}")]
    Register(String),

    #[error("Input mapping error: {0}")]
    Map(String),

    // ── Encode ────────────────────────────────────────────────────────
    #[error("Picture submission error: {0}")]
    Submit(String),

    #[error("Bitstream lock error: {0}")]
    Lock(String),

    // ── Pipeline ──────────────────────────────────────────────────────
    #[error("Submission ring full ({capacity} frames in flight) — drain before submitting")]
    RingFull { capacity: usize },

    // ── I/O ───────────────────────────────────────────────────────────
    #[error("Bitstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bitstream writer thread exited unexpectedly")]
    WriterClosed,

    // ── Invariants ────────────────────────────────────────────────────
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl StrandError {
    /// Stable integer error code for structured telemetry.
    ///
    /// Codes are grouped by category:
    /// - 1xx: session/capability
    /// - 2xx: registry
    /// - 3xx: encode
    /// - 4xx: pipeline
    /// - 5xx: I/O
    /// - 6xx: invariants
    pub fn error_code(&self) -> u32 {
        match self {
            Self::Session(_) => 100,
            Self::Unsupported(_) => 101,
            Self::Capability(_) => 102,
            Self::Register(_) => 200,
            Self::Map(_) => 201,
            Self::Submit(_) => 300,
            Self::Lock(_) => 301,
            Self::RingFull { .. } => 400,
            Self::Io(_) => 500,
            Self::WriterClosed => 501,
            Self::InvariantViolation(_) => 600,
        }
    }

    /// Whether this error is a backpressure signal rather than a failure.
    ///
    /// [`RingFull`](Self::RingFull) tells the caller to drain and retry;
    /// every other variant aborts the pipeline.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, Self::RingFull { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StrandError>;
