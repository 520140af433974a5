//! Shared foundation for the strand encode pipeline.
//!
//! This crate is the neutral home for the types that cross crate
//! boundaries: the error taxonomy, pixel/resource/stats types, encoder
//! configuration, and the capability traits through which the pipeline
//! consumes the GPU device and the hardware encoder session.  Keeping the
//! traits here breaks the dependency cycle between `strand-encode` and
//! `strand-io` and lets a mock backend drive the whole pipeline in tests.

pub mod config;
pub mod error;
pub mod session;
pub mod types;
