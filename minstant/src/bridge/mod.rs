//! Streaming bridge between a turn's producer task and its HTTP consumer.
//!
//! The producer forwards chunks through a bounded handoff channel and reports
//! its terminal outcome once on a separate single-slot channel. The consumer
//! drains chunks first and only then consults the outcome, so success is never
//! declared before the producer has finished.

mod pool;

use crate::flow::FlowError;

pub use pool::TurnPool;

/// Handoff channel capacity. Tokio channels need at least one slot, so a
/// slow consumer stalls the producer one chunk ahead.
pub const HANDOFF_CAPACITY: usize = 1;

/// What the consumer observes for one turn.
#[derive(Debug)]
pub enum StreamEvent {
    Chunk(String),
    /// Terminal success carrying the full reply.
    Done(String),
    /// Terminal failure, including cancellation.
    Error(FlowError),
}

