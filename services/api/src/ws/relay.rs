//! Streams one prompt through the generation backend to a connection.

use super::{
    flight::SingleFlight,
    protocol::{CLOSE_AUTH_REQUIRED, CLOSE_AUTH_UNAVAILABLE, ConnectionPhase, ServerMessage},
};
use crate::config::RelayConfig;
use codeprep_core::{
    GenerationBackend, GenerationError, GenerationRequest, RecordDecoder, SamplingOptions,
    StreamRecord, TopicFilter, generation::truncate_chars,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

const MAX_UPSTREAM_ERROR_CHARS: usize = 200;

/// Connection-level refusals. None of these reach the generation backend.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    #[error("authentication required")]
    AuthRequired,
    #[error("authentication service unavailable")]
    AuthServiceError,
    #[error("a response is already being generated on this connection")]
    Busy,
    #[error("prompt is outside the supported topics")]
    OffTopic,
}

impl RelayError {
    /// Close code for refusals that end the connection.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            RelayError::AuthRequired => Some(CLOSE_AUTH_REQUIRED),
            RelayError::AuthServiceError => Some(CLOSE_AUTH_UNAVAILABLE),
            RelayError::Busy | RelayError::OffTopic => None,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            RelayError::AuthRequired => "Authentication required. Please log in again.",
            RelayError::AuthServiceError => {
                "Authentication is temporarily unavailable. Please try again shortly."
            }
            RelayError::Busy => {
                "A response is already being generated. Please wait for it to finish."
            }
            RelayError::OffTopic => {
                "I can only help with programming, algorithms and coding-contest questions."
            }
        }
    }
}

/// How a single relayed request ended.
#[derive(Debug)]
pub enum RelayOutcome {
    /// The backend sent its completion record.
    Completed { transcript: String },
    /// The body ended without a completion record.
    Ended { transcript: String },
    /// The backend reported an error record mid-stream.
    UpstreamError(String),
    /// The request failed before or while streaming and the client was told.
    Failed(GenerationError),
    /// Cancelled by connection close; nothing was reported.
    Cancelled,
    TimedOut,
}

impl RelayOutcome {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayOutcome::Completed { .. } => "completed",
            RelayOutcome::Ended { .. } => "ended",
            RelayOutcome::UpstreamError(_) => "upstream_error",
            RelayOutcome::Failed(_) => "failed",
            RelayOutcome::Cancelled => "cancelled",
            RelayOutcome::TimedOut => "timed_out",
        }
    }
}

/// What happened to a prompt handed to [`Relay::dispatch`].
#[derive(Debug)]
pub enum PromptDisposition {
    Started(JoinHandle<RelayOutcome>),
    Rejected(RelayError),
    Ignored,
}

/// Forwards prompts to the generation backend and streams records back.
pub struct Relay {
    backend: Arc<dyn GenerationBackend>,
    config: RelayConfig,
    topic_filter: TopicFilter,
    system_preamble: Option<String>,
    sampling: Option<SamplingOptions>,
}

impl Relay {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: RelayConfig) -> Self {
        Self {
            backend,
            config,
            topic_filter: TopicFilter::default(),
            system_preamble: None,
            sampling: None,
        }
    }

    pub fn with_system_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.system_preamble = Some(preamble.into());
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingOptions) -> Self {
        self.sampling = Some(sampling);
        self
    }

    pub fn with_topic_filter(mut self, filter: TopicFilter) -> Self {
        self.topic_filter = filter;
        self
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    fn request_for(&self, prompt: &str) -> GenerationRequest {
        let mut request = GenerationRequest::new(prompt);
        if let Some(preamble) = &self.system_preamble {
            request = request.with_system(preamble.clone());
        }
        if let Some(sampling) = self.sampling {
            request = request.with_options(sampling);
        }
        request
    }

    /// Accepts a prompt for a connection.
    ///
    /// Refusals are answered on `out` right away. A busy connection is
    /// refused before the topic filter runs, so a prompt sent mid-stream
    /// always gets the busy notice. An accepted prompt holds the
    /// connection's flight slot and streams on a spawned task; the slot is
    /// released when that task ends, however it ends.
    pub async fn dispatch(
        self: &Arc<Self>,
        prompt: &str,
        flight: &SingleFlight,
        out: &mpsc::Sender<ServerMessage>,
    ) -> PromptDisposition {
        if prompt.trim().is_empty() {
            return PromptDisposition::Ignored;
        }

        let Some(guard) = flight.try_enter() else {
            debug!("Prompt arrived while another response is streaming");
            return self.refuse(RelayError::Busy, out).await;
        };

        if self.config.topic_filter && !self.topic_filter.is_on_topic(prompt) {
            drop(guard);
            debug!("Refusing off-topic prompt");
            return self.refuse(RelayError::OffTopic, out).await;
        }

        let relay = Arc::clone(self);
        let out = out.clone();
        let request = self.request_for(prompt);
        let handle = tokio::spawn(
            async move {
                let outcome = relay.stream(request, guard.token(), &out).await;
                drop(guard);
                debug!(
                    phase = ?ConnectionPhase::Idle,
                    outcome = outcome.kind(),
                    "Relay task finished"
                );
                outcome
            }
            .in_current_span(),
        );
        PromptDisposition::Started(handle)
    }

    async fn refuse(
        &self,
        reason: RelayError,
        out: &mpsc::Sender<ServerMessage>,
    ) -> PromptDisposition {
        let _ = out
            .send(ServerMessage::Error(reason.user_message().to_string()))
            .await;
        PromptDisposition::Rejected(reason)
    }

    /// Runs one request to completion, error, cancellation or timeout.
    pub async fn stream(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
        out: &mpsc::Sender<ServerMessage>,
    ) -> RelayOutcome {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.drive(request, &cancel, out)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(GenerationError::Cancelled)) => {
                debug!("Generation cancelled");
                RelayOutcome::Cancelled
            }
            Ok(Err(err)) => {
                error!(error = %err, "Generation failed");
                let _ = out.send(ServerMessage::Error(err.user_message())).await;
                RelayOutcome::Failed(err)
            }
            Err(_) => {
                cancel.cancel();
                let err = GenerationError::TimedOut(timeout);
                warn!(?timeout, "Generation timed out");
                let _ = out.send(ServerMessage::Error(err.user_message())).await;
                RelayOutcome::TimedOut
            }
        }
    }

    async fn drive(
        &self,
        request: GenerationRequest,
        cancel: &CancellationToken,
        out: &mpsc::Sender<ServerMessage>,
    ) -> Result<RelayOutcome, GenerationError> {
        let mut body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            result = self.backend.generate(request) => result?,
        };

        let mut decoder = RecordDecoder::new();
        let mut transcript = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            for record in decoder.feed(&chunk?) {
                if let Some(outcome) = apply(record, &mut transcript, cancel, out).await? {
                    return Ok(outcome);
                }
            }
        }

        if let Some(record) = decoder.finish() {
            if let Some(outcome) = apply(record, &mut transcript, cancel, out).await? {
                return Ok(outcome);
            }
        }

        debug!(
            transcript_len = transcript.len(),
            "Stream ended without a completion record"
        );
        forward(out, cancel, ServerMessage::Complete(transcript.clone())).await?;
        Ok(RelayOutcome::Ended { transcript })
    }
}

/// Acts on one decoded record. Returns the outcome once the stream is finished.
async fn apply(
    record: StreamRecord,
    transcript: &mut String,
    cancel: &CancellationToken,
    out: &mpsc::Sender<ServerMessage>,
) -> Result<Option<RelayOutcome>, GenerationError> {
    if let Some(fragment) = record.fragment() {
        transcript.push_str(fragment);
        forward(out, cancel, ServerMessage::Stream(fragment.to_string())).await?;
    }

    if record.done {
        forward(out, cancel, ServerMessage::Complete(transcript.clone())).await?;
        info!(transcript_len = transcript.len(), "Generation complete");
        return Ok(Some(RelayOutcome::Completed {
            transcript: std::mem::take(transcript),
        }));
    }

    if let Some(message) = record.error {
        warn!(upstream_error = %message, "Generation backend reported an error");
        let message = truncate_chars(&message, MAX_UPSTREAM_ERROR_CHARS);
        forward(out, cancel, ServerMessage::Error(message.clone())).await?;
        return Ok(Some(RelayOutcome::UpstreamError(message)));
    }

    Ok(None)
}

/// Sends to the connection's writer, cancelling the request if the socket is gone.
async fn forward(
    out: &mpsc::Sender<ServerMessage>,
    cancel: &CancellationToken,
    message: ServerMessage,
) -> Result<(), GenerationError> {
    if out.is_closed() {
        debug!("Socket closed mid-stream; cancelling upstream request");
        cancel.cancel();
        return Err(GenerationError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GenerationError::Cancelled),
        sent = out.send(message) => sent.map_err(|_| {
            cancel.cancel();
            GenerationError::Cancelled
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::ConnectionRegistry;
    use bytes::Bytes;
    use codeprep_core::testing::{Script, ScriptedBackend};
    use std::time::Duration;
    use uuid::Uuid;

    fn config() -> RelayConfig {
        RelayConfig {
            topic_filter: false,
            request_timeout: Duration::from_secs(5),
            ..RelayConfig::default()
        }
    }

    fn chunks(parts: &[&'static str]) -> Script {
        Script::Chunks(parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect())
    }

    fn relay_with(backend: Arc<ScriptedBackend>, config: RelayConfig) -> Arc<Relay> {
        Arc::new(Relay::new(backend, config))
    }

    async fn run(relay: &Arc<Relay>, prompt: &str) -> (RelayOutcome, Vec<ServerMessage>) {
        let flight = SingleFlight::new();
        let (tx, mut rx) = mpsc::channel(64);
        let outcome = match relay.dispatch(prompt, &flight, &tx).await {
            PromptDisposition::Started(handle) => handle.await.unwrap(),
            other => panic!("prompt was not started: {other:?}"),
        };
        drop(tx);
        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }
        (outcome, messages)
    }

    #[tokio::test]
    async fn test_fragments_are_forwarded_in_order_with_one_completion() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&[
            "{\"response\":\"Use \"}\n{\"response\":\"a \"}\n",
            "{\"response\":\"hash map.\"}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ])]));
        let relay = relay_with(backend, config());

        let (outcome, messages) = run(&relay, "two sum").await;

        assert_eq!(
            messages,
            vec![
                ServerMessage::Stream("Use ".into()),
                ServerMessage::Stream("a ".into()),
                ServerMessage::Stream("hash map.".into()),
                ServerMessage::Complete("Use a hash map.".into()),
            ]
        );
        match outcome {
            RelayOutcome::Completed { transcript } => assert_eq!(transcript, "Use a hash map."),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_record_split_across_reads_is_one_fragment() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&[
            "{\"resp",
            "onse\":\"x\"}\n",
            "{\"done\":true}\n",
        ])]));
        let relay = relay_with(backend, config());

        let (_, messages) = run(&relay, "prompt").await;
        assert_eq!(
            messages,
            vec![
                ServerMessage::Stream("x".into()),
                ServerMessage::Complete("x".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_noise_between_records_is_skipped() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&[
            "{\"response\":\"a\"}\n<html>502</html>\n{\"response\":\"b\"}\n{\"done\":true}\n",
        ])]));
        let relay = relay_with(backend, config());

        let (_, messages) = run(&relay, "prompt").await;
        assert_eq!(messages.last(), Some(&ServerMessage::Complete("ab".into())));
        assert!(!messages.iter().any(|m| matches!(m, ServerMessage::Error(_))));
    }

    #[tokio::test]
    async fn test_end_of_stream_without_done_is_tolerated() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&[
            "{\"response\":\"partial\"}\n",
        ])]));
        let relay = relay_with(backend, config());

        let (outcome, messages) = run(&relay, "prompt").await;
        assert!(matches!(outcome, RelayOutcome::Ended { ref transcript } if transcript == "partial"));
        assert_eq!(messages.last(), Some(&ServerMessage::Complete("partial".into())));
    }

    #[tokio::test]
    async fn test_upstream_error_record_stops_stream() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&[
            "{\"response\":\"a\"}\n{\"error\":\"model crashed\"}\n{\"response\":\"never\"}\n",
        ])]));
        let relay = relay_with(backend, config());

        let (outcome, messages) = run(&relay, "prompt").await;
        assert!(matches!(outcome, RelayOutcome::UpstreamError(ref m) if m == "model crashed"));
        assert_eq!(
            messages,
            vec![
                ServerMessage::Stream("a".into()),
                ServerMessage::Error("model crashed".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_setup_failure_is_reported_once() {
        let backend = Arc::new(ScriptedBackend::new([Script::Fail(
            GenerationError::Unavailable {
                base_url: "http://localhost:11434".into(),
                model: "llama3.2".into(),
                detail: "tcp connect error: Connection refused".into(),
            },
        )]));
        let relay = relay_with(backend, config());

        let (outcome, messages) = run(&relay, "prompt").await;
        assert!(matches!(
            outcome,
            RelayOutcome::Failed(GenerationError::Unavailable { .. })
        ));
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::Error(text) => {
                assert!(text.contains("ollama serve"));
                assert!(!text.contains("Connection refused"));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_prompt_while_streaming_is_refused() {
        let (live_tx, live_rx) = mpsc::channel(8);
        let backend = Arc::new(ScriptedBackend::new([
            Script::Live(live_rx),
            chunks(&["{\"response\":\"next\",\"done\":true}\n"]),
        ]));
        let relay = relay_with(backend.clone(), config());
        let flight = SingleFlight::new();
        let (tx, mut rx) = mpsc::channel(64);

        let first = match relay.dispatch("first", &flight, &tx).await {
            PromptDisposition::Started(handle) => handle,
            other => panic!("unexpected {other:?}"),
        };
        assert!(flight.is_busy());

        let second = relay.dispatch("second", &flight, &tx).await;
        assert!(matches!(second, PromptDisposition::Rejected(RelayError::Busy)));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Error(RelayError::Busy.user_message().into()))
        );
        assert!(flight.is_busy());

        live_tx
            .send(Bytes::from_static(b"{\"response\":\"one\",\"done\":true}\n"))
            .await
            .unwrap();
        assert!(matches!(first.await.unwrap(), RelayOutcome::Completed { .. }));
        assert!(!flight.is_busy());
        assert_eq!(backend.calls(), 1);

        let third = relay.dispatch("third", &flight, &tx).await;
        let PromptDisposition::Started(handle) = third else {
            panic!("third prompt should start");
        };
        assert!(matches!(handle.await.unwrap(), RelayOutcome::Completed { ref transcript } if transcript == "next"));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_connection_close_cancels_stream_silently() {
        let backend = Arc::new(ScriptedBackend::new([Script::Stall(vec![Bytes::from_static(
            b"{\"response\":\"thinking\"}\n",
        )])]));
        let relay = relay_with(backend, config());
        let registry = ConnectionRegistry::new();
        let id = Uuid::new_v4();
        let flight = registry.register(id);
        let (tx, mut rx) = mpsc::channel(64);

        let PromptDisposition::Started(handle) = relay.dispatch("prompt", &flight, &tx).await
        else {
            panic!("prompt should start");
        };
        assert_eq!(rx.recv().await, Some(ServerMessage::Stream("thinking".into())));

        assert!(registry.remove(id));
        assert!(matches!(handle.await.unwrap(), RelayOutcome::Cancelled));
        assert!(!flight.is_busy());

        drop(tx);
        assert_eq!(rx.recv().await, None, "cancellation must not be reported");
    }

    #[tokio::test]
    async fn test_closed_socket_cancels_upstream_read() {
        let (live_tx, live_rx) = mpsc::channel(8);
        let backend = Arc::new(ScriptedBackend::new([Script::Live(live_rx)]));
        let relay = relay_with(backend, config());
        let flight = SingleFlight::new();
        let (tx, mut rx) = mpsc::channel(64);

        let PromptDisposition::Started(handle) = relay.dispatch("prompt", &flight, &tx).await
        else {
            panic!("prompt should start");
        };
        drop(tx);

        live_tx
            .send(Bytes::from_static(b"{\"response\":\"a\"}\n"))
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(ServerMessage::Stream("a".into())));
        // The writer side goes away mid-stream.
        drop(rx);
        live_tx
            .send(Bytes::from_static(b"{\"response\":\"b\"}\n"))
            .await
            .unwrap();

        assert!(matches!(handle.await.unwrap(), RelayOutcome::Cancelled));
        assert!(!flight.is_busy());
        // The relay dropped the upstream body, so the producer side sees it closed.
        assert!(live_tx.is_closed());
    }

    #[tokio::test]
    async fn test_timeout_reports_and_cancels() {
        let backend = Arc::new(ScriptedBackend::new([Script::Stall(vec![])]));
        let relay = relay_with(
            backend,
            RelayConfig {
                request_timeout: Duration::from_millis(50),
                ..config()
            },
        );

        let (outcome, messages) = run(&relay, "prompt").await;
        assert!(matches!(outcome, RelayOutcome::TimedOut));
        assert_eq!(
            messages,
            vec![ServerMessage::Error(
                GenerationError::TimedOut(Duration::from_millis(50)).user_message()
            )]
        );
    }

    #[tokio::test]
    async fn test_off_topic_prompt_never_reaches_backend() {
        let backend = Arc::new(ScriptedBackend::default());
        let relay = relay_with(
            backend.clone(),
            RelayConfig {
                topic_filter: true,
                ..config()
            },
        );
        let flight = SingleFlight::new();
        let (tx, mut rx) = mpsc::channel(8);

        let disposition = relay
            .dispatch("best pizza in town?", &flight, &tx)
            .await;
        assert!(matches!(disposition, PromptDisposition::Rejected(RelayError::OffTopic)));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Error(RelayError::OffTopic.user_message().into()))
        );
        assert_eq!(backend.calls(), 0);
        assert!(!flight.is_busy());
    }

    #[tokio::test]
    async fn test_busy_refusal_takes_precedence_over_topic() {
        let (live_tx, live_rx) = mpsc::channel(8);
        let backend = Arc::new(ScriptedBackend::new([Script::Live(live_rx)]));
        let relay = relay_with(
            backend.clone(),
            RelayConfig {
                topic_filter: true,
                ..config()
            },
        );
        let flight = SingleFlight::new();
        let (tx, mut rx) = mpsc::channel(8);

        let PromptDisposition::Started(first) =
            relay.dispatch("explain binary search", &flight, &tx).await
        else {
            panic!("prompt should start");
        };

        let second = relay.dispatch("best pizza in town?", &flight, &tx).await;
        assert!(matches!(second, PromptDisposition::Rejected(RelayError::Busy)));
        assert_eq!(
            rx.recv().await,
            Some(ServerMessage::Error(RelayError::Busy.user_message().into()))
        );
        assert!(flight.is_busy());
        assert_eq!(backend.calls(), 1);

        drop(live_tx);
        assert!(matches!(first.await.unwrap(), RelayOutcome::Ended { .. }));
        assert!(!flight.is_busy());
    }

    #[tokio::test]
    async fn test_off_topic_refusal_releases_flight_slot() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&["{\"done\":true}\n"])]));
        let relay = relay_with(
            backend.clone(),
            RelayConfig {
                topic_filter: true,
                ..config()
            },
        );
        let flight = SingleFlight::new();
        let (tx, _rx) = mpsc::channel(8);

        let refused = relay.dispatch("give me a map of Paris", &flight, &tx).await;
        assert!(matches!(refused, PromptDisposition::Rejected(RelayError::OffTopic)));
        assert!(!flight.is_busy());

        let PromptDisposition::Started(handle) =
            relay.dispatch("explain dfs", &flight, &tx).await
        else {
            panic!("prompt should start");
        };
        handle.await.unwrap();
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_outcome_kinds() {
        assert_eq!(RelayOutcome::Completed { transcript: String::new() }.kind(), "completed");
        assert_eq!(RelayOutcome::Ended { transcript: String::new() }.kind(), "ended");
        assert_eq!(RelayOutcome::UpstreamError("x".into()).kind(), "upstream_error");
        assert_eq!(RelayOutcome::Failed(GenerationError::Cancelled).kind(), "failed");
        assert_eq!(RelayOutcome::Cancelled.kind(), "cancelled");
        assert_eq!(RelayOutcome::TimedOut.kind(), "timed_out");
    }

    #[tokio::test]
    async fn test_custom_topic_filter() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&["{\"done\":true}\n"])]));
        let relay = Arc::new(
            Relay::new(
                backend.clone(),
                RelayConfig {
                    topic_filter: true,
                    ..config()
                },
            )
            .with_topic_filter(TopicFilter::with_keywords(["lifetimes"])),
        );
        let flight = SingleFlight::new();
        let (tx, _rx) = mpsc::channel(8);

        let refused = relay.dispatch("explain dynamic programming", &flight, &tx).await;
        assert!(matches!(refused, PromptDisposition::Rejected(RelayError::OffTopic)));

        let PromptDisposition::Started(handle) =
            relay.dispatch("why do lifetimes exist", &flight, &tx).await
        else {
            panic!("prompt should start");
        };
        handle.await.unwrap();
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn test_only_auth_refusals_close_the_socket() {
        assert_eq!(RelayError::AuthRequired.close_code(), Some(1008));
        assert_eq!(RelayError::AuthServiceError.close_code(), Some(1011));
        assert_eq!(RelayError::Busy.close_code(), None);
        assert_eq!(RelayError::OffTopic.close_code(), None);
    }

    #[tokio::test]
    async fn test_blank_prompt_is_ignored() {
        let backend = Arc::new(ScriptedBackend::default());
        let relay = relay_with(backend.clone(), config());
        let (tx, _rx) = mpsc::channel(8);
        let disposition = relay.dispatch("   ", &SingleFlight::new(), &tx).await;
        assert!(matches!(disposition, PromptDisposition::Ignored));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_sequential_prompts_are_independent() {
        let backend = Arc::new(ScriptedBackend::new([
            chunks(&["{\"response\":\"first\"}\n{\"error\":\"boom\"}\n"]),
            chunks(&["{\"response\":\"second\"}\n{\"done\":true}\n"]),
        ]));
        let relay = relay_with(backend, config());
        let flight = SingleFlight::new();
        let (tx, mut rx) = mpsc::channel(64);

        for prompt in ["one", "two"] {
            let PromptDisposition::Started(handle) = relay.dispatch(prompt, &flight, &tx).await
            else {
                panic!("prompt should start");
            };
            handle.await.unwrap();
        }
        drop(tx);

        let mut messages = Vec::new();
        while let Some(msg) = rx.recv().await {
            messages.push(msg);
        }
        assert_eq!(
            messages,
            vec![
                ServerMessage::Stream("first".into()),
                ServerMessage::Error("boom".into()),
                ServerMessage::Stream("second".into()),
                ServerMessage::Complete("second".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_request_carries_preamble_and_sampling() {
        let backend = Arc::new(ScriptedBackend::new([chunks(&["{\"done\":true}\n"])]));
        let relay = Arc::new(
            Relay::new(backend.clone(), config())
                .with_system_preamble("be brief")
                .with_sampling(SamplingOptions::default()),
        );

        run(&relay, "  explain bfs ").await;
        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, "  explain bfs ");
        assert_eq!(requests[0].system.as_deref(), Some("be brief"));
        assert_eq!(requests[0].options, Some(SamplingOptions::default()));
    }
}
