pub mod liveness;
pub mod queue;
pub mod relay;

pub use liveness::LivenessTracker;
pub use queue::TaskQueue;
pub use relay::ProgressRelay;
