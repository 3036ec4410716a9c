pub mod replay;
pub mod runner;
pub mod sink;
pub mod source;

pub use replay::{load_config, replay, ReplayLine, ReplaySummary};
pub use runner::{Collector, CollectorHandle, CollectorOptions, CollectorStatus};
pub use sink::{ChannelSink, FrameSink, SendFuture};
pub use source::{wait_until_ready, SnapshotSource, SourceReading};
