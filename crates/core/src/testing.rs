//! Scripted [`GenerationBackend`] for exercising the relay without a model server.

use crate::generation::{ChunkStream, GenerationBackend, GenerationError, GenerationRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::VecDeque,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc;

/// One scripted reply of a [`ScriptedBackend`].
pub enum Script {
    /// Yields the chunks, then ends the body.
    Chunks(Vec<Bytes>),
    /// Yields the chunks, then never produces another item.
    Stall(Vec<Bytes>),
    /// Yields whatever is sent on the channel, ending when the sender drops.
    Live(mpsc::Receiver<Bytes>),
    /// Fails the generate call itself.
    Fail(GenerationError),
}

/// A [`GenerationBackend`] replaying canned replies, for tests.
///
/// Each `generate` call consumes the next [`Script`] in order.
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Number of `generate` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in call order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<ChunkStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match script {
            Some(Script::Chunks(chunks)) => Ok(Box::pin(stream::iter(
                chunks.into_iter().map(Ok::<_, GenerationError>),
            ))),
            Some(Script::Stall(chunks)) => Ok(Box::pin(
                stream::iter(chunks.into_iter().map(Ok::<_, GenerationError>))
                    .chain(stream::pending()),
            )),
            Some(Script::Live(rx)) => Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv()
                    .await
                    .map(|chunk| (Ok::<_, GenerationError>(chunk), rx))
            }))),
            Some(Script::Fail(err)) => Err(err),
            None => Err(GenerationError::Transport("no scripted reply left".to_string())),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, GenerationError> {
        Ok(vec!["scripted:latest".to_string()])
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
