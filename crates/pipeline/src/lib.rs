//! Outbound delivery pipeline.
//!
//! Two entry points operate over the durable stores: the [`OutboxRunner`]
//! drains queued messages through quota admission, handoff gating, and the
//! transport, and the [`InboundFlowHandler`] turns webhook payloads into
//! conversation updates and queued replies. Both are constructed over the
//! repository traits so they run identically against SQL and in-memory
//! storage.

pub mod enqueue;
pub mod inbound;
pub mod report;
pub mod runner;

pub use enqueue::enqueue_message;
pub use inbound::{
    InboundFlowHandler, InboundMessage, InboundOutcome, NoReplyProducer, ReplyDecision,
    ReplyProducer,
};
pub use report::RunReport;
pub use runner::{OutboxRunner, RunnerSettings};
