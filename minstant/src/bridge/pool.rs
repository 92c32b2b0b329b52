//! Pool of concurrently running turns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{StreamEvent, HANDOFF_CAPACITY};
use crate::flow::{ChatFlow, FlowError};
use crate::models::ChatInput;

/// A unique identifier for a turn within the pool.
pub type TurnId = u64;

type Outcome = Result<String, FlowError>;

/// Consumer side of a running turn.
///
/// Dropping the handle cancels the turn.
#[derive(Debug)]
pub struct TurnHandle {
    id: TurnId,
    chunks: mpsc::Receiver<String>,
    outcome: Option<oneshot::Receiver<Outcome>>,
    cancel: CancellationToken,
}

impl TurnHandle {
    pub const fn id(&self) -> TurnId {
        self.id
    }

    /// Stop forwarding chunks and tell the producer to stop generating.
    #[cfg(test)]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next event of the turn, or `None` after the terminal event.
    ///
    /// Chunks arrive in emission order. Once they are drained (or the turn is
    /// cancelled) the outcome channel is awaited exactly once, and the
    /// terminal event is whatever the producer reported. A turn cancelled
    /// after its save began still completes.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let outcome = self.outcome.take()?;

        if !self.cancel.is_cancelled() {
            let chunk = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                chunk = self.chunks.recv() => chunk,
            };
            if let Some(chunk) = chunk {
                self.outcome = Some(outcome);
                return Some(StreamEvent::Chunk(chunk));
            }
        }

        let event = match outcome.await {
            Ok(Ok(reply)) => StreamEvent::Done(reply),
            Ok(Err(e)) => StreamEvent::Error(e),
            Err(_) => StreamEvent::Error(FlowError::Aborted),
        };
        Some(event)
    }
}

impl Drop for TurnHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Runs turns as independent tasks with a concurrency limit.
pub struct TurnPool {
    flow: Arc<ChatFlow>,

    /// Semaphore for limiting concurrent turns.
    semaphore: Arc<Semaphore>,

    /// Counter for generating unique turn IDs.
    next_id: AtomicU64,
}

impl TurnPool {
    pub fn new(flow: Arc<ChatFlow>, max_concurrent: usize) -> Self {
        Self {
            flow,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start a turn. It waits for a free slot before generating; the wait
    /// itself ends early if the turn is cancelled.
    pub fn spawn(&self, input: ChatInput) -> TurnHandle {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let (chunk_tx, chunk_rx) = mpsc::channel(HANDOFF_CAPACITY);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let span = info_span!("turn", turn_id = id, session_id = %input.session_id);
        span.in_scope(|| debug!(free_slots = self.available_permits(), "turn accepted"));
        tokio::spawn(
            run_turn(
                self.flow.clone(),
                self.semaphore.clone(),
                input,
                chunk_tx,
                outcome_tx,
                cancel.clone(),
            )
            .instrument(span),
        );

        TurnHandle {
            id,
            chunks: chunk_rx,
            outcome: Some(outcome_rx),
            cancel,
        }
    }

    /// Number of turns that could start right now.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Producer task of one turn.
async fn run_turn(
    flow: Arc<ChatFlow>,
    semaphore: Arc<Semaphore>,
    input: ChatInput,
    chunk_tx: mpsc::Sender<String>,
    outcome_tx: oneshot::Sender<Outcome>,
    cancel: CancellationToken,
) {
    // Only the wait for a slot races cancellation here. The flow watches the
    // token itself up to the point of saving.
    let permit = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(FlowError::Cancelled),
        permit = semaphore.acquire() => permit.map_err(|_| FlowError::Aborted),
    };
    let result = match permit {
        Ok(_permit) => flow.run(input, &chunk_tx, &cancel).await,
        Err(e) => Err(e),
    };
    drop(chunk_tx);

    match &result {
        Ok(reply) => info!(chars = reply.len(), "turn completed"),
        Err(FlowError::Cancelled) => info!("turn cancelled"),
        Err(e) => warn!(error = %e, "turn failed"),
    }

    let _ = outcome_tx.send(result);
}
