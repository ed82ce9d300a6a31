//! The parallel tool executor (spec §4 component 2): bounded concurrency,
//! per-tool timeout/retry/backoff, and panic isolation over a catalogue of
//! externally-supplied [`tool::Tool`] implementations.

pub mod parallel;
pub mod tool;

pub use parallel::{ExecutorMetricsSnapshot, ParallelExecutor, ToolOutcome};
pub use tool::{Tool, ToolCatalogue};
