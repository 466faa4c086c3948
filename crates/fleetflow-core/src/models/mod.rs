pub mod agent;
pub mod channel;
pub mod task;

pub use agent::{Agent, AgentStatus};
pub use channel::{ChannelType, OriginChannel, OutboundMessage};
pub use task::{
    ProgressUpdate, Task, TaskLogEntry, TaskLogLevel, TaskResult, TaskStatus, MAX_TASK_LOG_ENTRIES,
};
