//! The event pipeline: emitter, sinks, plugin registry, stats collector,
//! result guard, and the trace writer/reader/replayer.

pub mod emitter;
pub mod plugin;
pub mod result_guard;
pub mod sink;
pub mod stats_collector;
pub mod trace;

pub use emitter::Emitter;
pub use plugin::{Plugin, PluginRegistry, PluginSink};
pub use result_guard::ResultGuard;
pub use sink::{
    BackpressureSink, CallbackSink, Chunk, ChunkAdapterSink, ChunkSink, ChannelSink, MultiSink,
    NoopSink, Sink,
};
pub use stats_collector::StatsCollector;
pub use trace::{ReplayReport, Replayer, SequenceRange, TraceHeader, TraceReader, TraceSink, TraceWriter, TraceWriterSink};
