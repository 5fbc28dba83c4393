// Trigger scheduler: per-job poll loops and the build request boundary

pub mod engine;
pub mod sink;

pub use engine::{run_cycle, TriggerScheduler};
pub use sink::{BuildRequestSink, ChannelBuildRequestSink, LogBuildRequestSink};
