//! Session pipeline: queues, stages and the orchestrator that runs them.

pub mod channel;
pub mod coordinator;
pub mod inbound;
pub mod messages;
pub mod outbound;
