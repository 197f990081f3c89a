use std::fmt;

use ingest_config::shared::QueueConfig;

/// A step of the batch pipeline. Each stage consumes the messages of its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    ReceiveFullBatch,
    PurgePlan,
    PurgeExecute,
    Broadcast,
    Cleanup,
    Abort,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::ReceiveFullBatch,
        Stage::PurgePlan,
        Stage::PurgeExecute,
        Stage::Broadcast,
        Stage::Cleanup,
        Stage::Abort,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::ReceiveFullBatch => "receive-fullbatch",
            Stage::PurgePlan => "purge-plan",
            Stage::PurgeExecute => "purge-execute",
            Stage::Broadcast => "broadcast",
            Stage::Cleanup => "cleanup",
            Stage::Abort => "abort",
        }
    }

    /// Returns `true` for stages that mutate per-type state and need the type lock.
    pub fn requires_lock(&self) -> bool {
        !matches!(self, Stage::Cleanup | Stage::Abort)
    }

    pub fn queue_name<'a>(&self, queues: &'a QueueConfig) -> &'a str {
        match self {
            Stage::ReceiveFullBatch => &queues.receive_full_batch,
            Stage::PurgePlan => &queues.purge_plan,
            Stage::PurgeExecute => &queues.purge_execute,
            Stage::Broadcast => &queues.broadcast,
            Stage::Cleanup => &queues.cleanup,
            Stage::Abort => &queues.abort,
        }
    }

    pub fn from_queue_name(queues: &QueueConfig, queue_name: &str) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.queue_name(queues) == queue_name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
