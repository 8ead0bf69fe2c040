//! Common utilities shared by the reconstruction pipeline.
//!
//! Currently a single submodule:
//!
//! - **`perf`**: platform-specific process statistics used for diagnostic
//!   reporting when time measurement is enabled on a run. Large volumetric
//!   reconstructions are memory-bound, so the peak resident set size is
//!   reported alongside wall-clock durations.

pub mod perf;
