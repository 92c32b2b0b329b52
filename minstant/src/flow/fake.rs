//! Test doubles for the model and session store.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use super::{ChatFlow, SystemPrompt};
use crate::llm::{GenerateEvent, GenerateRequest, Model, ModelError};
use crate::models::SessionState;
use crate::session::{MemorySessionStore, SessionStore, StoreError};
use crate::tools::ToolSet;

pub fn flow(model: Arc<dyn Model>, store: Arc<dyn SessionStore>) -> ChatFlow {
    ChatFlow::new(
        store,
        model,
        Arc::new(ToolSet::default()),
        SystemPrompt::new().unwrap(),
    )
}

#[derive(Debug, Clone, Copy)]
pub enum Step {
    Chunk(&'static str),
    Done(&'static str),
    Fail(&'static str),
}

/// Model replaying a fixed script on every call.
pub struct ScriptedModel {
    steps: Vec<Step>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
            requests: Mutex::default(),
        }
    }

    /// Stream `reply` word by word, then finish with it.
    pub fn replying(reply: &'static str) -> Self {
        let mut steps: Vec<Step> = reply.split_inclusive(' ').map(Step::Chunk).collect();
        steps.push(Step::Done(reply));
        Self::new(steps)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Model for ScriptedModel {
    fn generate(
        &self,
        request: GenerateRequest,
    ) -> BoxStream<'static, Result<GenerateEvent, ModelError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let events: Vec<_> = self
            .steps
            .iter()
            .map(|step| match *step {
                Step::Chunk(t) => Ok(GenerateEvent::Chunk(t.to_string())),
                Step::Done(t) => Ok(GenerateEvent::Done(t.to_string())),
                Step::Fail(m) => Err(ModelError::Stream(m.to_string())),
            })
            .collect();
        stream::iter(events).boxed()
    }
}

/// Sets a flag when dropped.
struct DropSignal(Arc<AtomicBool>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Model that emits `chunks` chunks and then never finishes.
pub struct PendingModel {
    chunks: usize,
    calls: AtomicUsize,
    pub produced: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicBool>,
}

impl PendingModel {
    pub fn new(chunks: usize) -> Self {
        Self {
            chunks,
            calls: AtomicUsize::new(0),
            produced: Arc::default(),
            dropped: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn produced(&self) -> usize {
        self.produced.load(Ordering::SeqCst)
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl Model for PendingModel {
    fn generate(
        &self,
        _request: GenerateRequest,
    ) -> BoxStream<'static, Result<GenerateEvent, ModelError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks = self.chunks;
        let produced = self.produced.clone();
        let signal = DropSignal(self.dropped.clone());

        async_stream::stream! {
            let _signal = signal;
            for i in 0..chunks {
                produced.fetch_add(1, Ordering::SeqCst);
                yield Ok::<_, ModelError>(GenerateEvent::Chunk(format!("chunk {i} ")));
            }
            futures::future::pending::<()>().await;
        }
        .boxed()
    }
}

/// Memory store that counts calls and can be told to fail.
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemorySessionStore,
    loads: AtomicUsize,
    saves: AtomicUsize,
    fail_load: bool,
    fail_save: bool,
}

impl CountingStore {
    pub fn failing_load() -> Self {
        Self {
            fail_load: true,
            ..Self::default()
        }
    }

    pub fn failing_save() -> Self {
        Self {
            fail_save: true,
            ..Self::default()
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for CountingStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(StoreError::Storage(sqlx::Error::PoolClosed));
        }
        self.inner.load(session_id).await
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_save {
            return Err(StoreError::Storage(sqlx::Error::PoolClosed));
        }
        self.inner.save(session_id, state).await
    }
}
