//! One conversational turn: load, compose, generate, persist.

#[cfg(test)]
pub(crate) mod fake;
mod prompt;

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::llm::{GenerateEvent, GenerateRequest, Model, ModelError};
use crate::models::{ChatInput, Message};
use crate::session::{SessionStore, StoreError};
use crate::tools::ToolSet;

pub use prompt::SystemPrompt;

/// Turn-level failure. History is left untouched whenever one is returned.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to render system prompt: {0}")]
    Prompt(#[from] minijinja::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("model stream ended without a final result")]
    Incomplete,

    #[error("turn cancelled")]
    Cancelled,

    #[error("turn task ended without reporting a result")]
    Aborted,
}

/// Orchestrates turns against injected collaborators.
pub struct ChatFlow {
    store: Arc<dyn SessionStore>,
    model: Arc<dyn Model>,
    tools: Arc<ToolSet>,
    prompt: SystemPrompt,
}

impl ChatFlow {
    pub fn new(
        store: Arc<dyn SessionStore>,
        model: Arc<dyn Model>,
        tools: Arc<ToolSet>,
        prompt: SystemPrompt,
    ) -> Self {
        Self {
            store,
            model,
            tools,
            prompt,
        }
    }

    /// Run one turn, forwarding every chunk to `chunks` in emission order.
    ///
    /// Returns the full reply once the exchange is persisted. If `cancel`
    /// fires or `chunks` is closed before the final event, the turn stops
    /// with [`FlowError::Cancelled`] and nothing is saved. Once persisting
    /// has begun the save always runs to completion.
    pub async fn run(
        &self,
        input: ChatInput,
        chunks: &mpsc::Sender<String>,
        cancel: &CancellationToken,
    ) -> Result<String, FlowError> {
        let ChatInput {
            session_id,
            message,
            identity,
        } = input;

        debug!(session_id = %session_id, phase = "loading");
        let mut state = self.store.load(&session_id).await?.unwrap_or_default();
        let prior = state.history.len();

        debug!(session_id = %session_id, phase = "composing", prior);
        let system = self.prompt.render(identity.as_ref())?;
        let user = Message::user(message);
        let mut messages = state.history.clone();
        messages.push(user.clone());

        debug!(session_id = %session_id, phase = "generating");
        let mut events = self.model.generate(GenerateRequest {
            system,
            messages,
            tools: self.tools.clone(),
        });

        let mut reply = None;
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(FlowError::Cancelled),
                event = events.next() => event,
            };
            let Some(event) = event else { break };

            match event? {
                GenerateEvent::Chunk(text) => {
                    let sent = tokio::select! {
                        biased;
                        () = cancel.cancelled() => false,
                        sent = chunks.send(text) => sent.is_ok(),
                    };
                    if !sent {
                        return Err(FlowError::Cancelled);
                    }
                }
                GenerateEvent::Done(text) => {
                    reply = Some(text);
                    break;
                }
            }
        }
        drop(events);
        let reply = reply.ok_or(FlowError::Incomplete)?;

        // Last point at which the turn can be abandoned without a trace.
        if cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        debug!(session_id = %session_id, phase = "persisting");
        state.record_turn(user, Message::assistant(reply.clone()));
        self.store.save(&session_id, &state).await?;

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::BoxStream;

    use super::fake::{flow, CountingStore, ScriptedModel, Step};
    use super::*;
    use crate::models::{Identity, SessionState};

    async fn run(flow: &ChatFlow, session: &str, text: &str) -> (Result<String, FlowError>, Vec<String>) {
        let (tx, mut rx) = mpsc::channel(64);
        let input = ChatInput::new(session, text, None).unwrap();
        let result = flow.run(input, &tx, &CancellationToken::new()).await;
        drop(tx);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        (result, chunks)
    }

    fn seeded() -> SessionState {
        SessionState {
            history: vec![Message::user("hi"), Message::assistant("hello!")],
        }
    }

    #[tokio::test]
    async fn unknown_session_starts_empty() {
        let store = Arc::new(CountingStore::default());
        let model = Arc::new(ScriptedModel::replying("Hi there"));
        let flow = flow(model.clone(), store.clone());

        let (result, chunks) = run(&flow, "s1", "hello").await;

        assert_eq!(result.unwrap(), "Hi there");
        assert_eq!(chunks, ["Hi ", "there"]);
        assert_eq!(
            store.inner.load("s1").await.unwrap().unwrap().history,
            vec![Message::user("hello"), Message::assistant("Hi there")]
        );
        assert_eq!(model.requests()[0].messages, vec![Message::user("hello")]);
    }

    #[tokio::test]
    async fn existing_history_is_extended_in_order() {
        let store = Arc::new(CountingStore::default());
        store.inner.save("s1", &seeded()).await.unwrap();
        let model = Arc::new(ScriptedModel::replying("Use the VIB card"));
        let flow = flow(model.clone(), store.clone());

        run(&flow, "s1", "which card?").await.0.unwrap();

        let history = store.inner.load("s1").await.unwrap().unwrap().history;
        assert_eq!(history.len(), 4);
        assert_eq!(history[..2], seeded().history[..]);
        assert_eq!(history[2], Message::user("which card?"));
        assert_eq!(history[3], Message::assistant("Use the VIB card"));

        let requests = model.requests();
        let sent = &requests[0].messages;
        assert_eq!(sent[..2], seeded().history[..]);
        assert_eq!(sent[2], Message::user("which card?"));
        assert_eq!(store.saves(), 1);
    }

    #[tokio::test]
    async fn failed_generation_leaves_history_untouched() {
        let store = Arc::new(CountingStore::default());
        store.inner.save("s1", &seeded()).await.unwrap();
        let before = store.inner.raw("s1").await;
        let model = Arc::new(ScriptedModel::new(vec![
            Step::Chunk("par"),
            Step::Chunk("tial"),
            Step::Fail("upstream closed"),
        ]));
        let flow = flow(model, store.clone());

        let (result, chunks) = run(&flow, "s1", "hello").await;

        assert!(matches!(result, Err(FlowError::Model(_))));
        assert_eq!(chunks, ["par", "tial"]);
        assert_eq!(store.saves(), 0);
        assert_eq!(store.inner.raw("s1").await, before);
    }

    #[tokio::test]
    async fn stream_without_final_event_is_incomplete() {
        let store = Arc::new(CountingStore::default());
        let model = Arc::new(ScriptedModel::new(vec![Step::Chunk("hmm")]));
        let flow = flow(model, store.clone());

        let (result, _) = run(&flow, "s1", "hello").await;

        assert!(matches!(result, Err(FlowError::Incomplete)));
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn corrupt_session_fails_before_generation() {
        let store = Arc::new(CountingStore::default());
        store
            .inner
            .insert_raw("s1", serde_json::json!({"history": 7}))
            .await;
        let model = Arc::new(ScriptedModel::replying("unused"));
        let flow = flow(model.clone(), store.clone());

        let (result, _) = run(&flow, "s1", "hello").await;

        assert!(matches!(
            result,
            Err(FlowError::Store(StoreError::Corrupt { .. }))
        ));
        assert_eq!(model.calls(), 0);
        assert_eq!(store.loads(), 1);
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn closed_receiver_cancels_without_saving() {
        let store = Arc::new(CountingStore::default());
        let model = Arc::new(ScriptedModel::replying("Hi there"));
        let flow = flow(model, store.clone());

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let input = ChatInput::new("s1", "hello", None).unwrap();

        let result = flow.run(input, &tx, &CancellationToken::new()).await;

        assert!(matches!(result, Err(FlowError::Cancelled)));
        assert_eq!(store.saves(), 0);
        assert!(store.inner.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identity_reaches_the_system_prompt() {
        let store = Arc::new(CountingStore::default());
        let model = Arc::new(ScriptedModel::replying("ok"));
        let flow = flow(model.clone(), store);

        let (tx, _rx) = mpsc::channel(8);
        let identity = Identity {
            caller_id: "u-7".into(),
            display_name: Some("Minh".into()),
            lat: None,
            long: None,
        };
        let input = ChatInput::new("s9", "hello", Some(identity)).unwrap();
        flow.run(input, &tx, &CancellationToken::new()).await.unwrap();

        let requests = model.requests();
        let system = &requests[0].system;
        assert!(system.contains("userId: u-7\n"));
        assert!(system.contains("fullName: Minh\n"));
        assert!(system.contains("lat: null\n"));
    }

    /// Emits one chunk, fires `cancel`, then emits the final event.
    struct CancelBeforeDone(CancellationToken);

    impl Model for CancelBeforeDone {
        fn generate(
            &self,
            _request: GenerateRequest,
        ) -> BoxStream<'static, Result<GenerateEvent, ModelError>> {
            let cancel = self.0.clone();
            async_stream::stream! {
                yield Ok::<_, ModelError>(GenerateEvent::Chunk("Hi".to_string()));
                cancel.cancel();
                yield Ok(GenerateEvent::Done("Hi".to_string()));
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn cancel_before_final_event_skips_persisting() {
        let store = Arc::new(CountingStore::default());
        let cancel = CancellationToken::new();
        let flow = flow(Arc::new(CancelBeforeDone(cancel.clone())), store.clone());

        let (tx, mut rx) = mpsc::channel(8);
        let input = ChatInput::new("s1", "hello", None).unwrap();
        let result = flow.run(input, &tx, &cancel).await;

        assert!(matches!(result, Err(FlowError::Cancelled)));
        assert_eq!(rx.recv().await.as_deref(), Some("Hi"));
        assert_eq!(store.saves(), 0);
        assert!(store.inner.load("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_generation_output() {
        let store = Arc::new(CountingStore::default());
        let flow = flow(Arc::new(ScriptedModel::replying("Hi there")), store.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, mut rx) = mpsc::channel(8);
        let input = ChatInput::new("s1", "hello", None).unwrap();
        let result = flow.run(input, &tx, &cancel).await;
        drop(tx);

        assert!(matches!(result, Err(FlowError::Cancelled)));
        assert!(rx.recv().await.is_none());
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn load_failure_is_a_store_error() {
        let store = Arc::new(CountingStore::failing_load());
        let model = Arc::new(ScriptedModel::replying("unused"));
        let flow = flow(model.clone(), store.clone());

        let (result, chunks) = run(&flow, "s1", "hello").await;

        assert!(matches!(
            result,
            Err(FlowError::Store(StoreError::Storage(_)))
        ));
        assert!(chunks.is_empty());
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn save_failure_after_streaming_is_a_store_error() {
        let store = Arc::new(CountingStore::failing_save());
        let flow = flow(Arc::new(ScriptedModel::replying("Hi there")), store.clone());

        let (result, chunks) = run(&flow, "s1", "hello").await;

        assert!(matches!(
            result,
            Err(FlowError::Store(StoreError::Storage(_)))
        ));
        assert_eq!(chunks, ["Hi ", "there"]);
        assert_eq!(store.saves(), 1);
        assert!(store.inner.load("s1").await.unwrap().is_none());
    }
}
