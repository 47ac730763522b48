//! Shared test doubles: a scripted client transport and a channel-driven
//! conversation backend.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use voice_bridge::bridge::{
    ClientEvent, ClientOutput, ClientSink, ClientSource, ServerMessage, TransportResult,
};
use voice_bridge::core::conversation::{
    ConversationBackend, ConversationError, ConversationEvent, ConversationReceiver,
    ConversationRequest, ConversationResult, ConversationSender, ConversationStream,
};

/// How long a test waits for any single expected observation.
pub const WAIT: Duration = Duration::from_secs(5);

/// Ordered record of side effects observed across the doubles.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<&'static str>>>);

impl Journal {
    pub fn record(&self, entry: &'static str) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| *e == entry)
    }
}

// =============================================================================
// Client transport
// =============================================================================

/// Test side of a scripted client transport.
pub struct ClientHarness {
    pub input: Option<mpsc::UnboundedSender<TransportResult<ClientEvent>>>,
    pub output: mpsc::UnboundedReceiver<ClientOutput>,
}

impl ClientHarness {
    pub fn new(
        packet_size: Option<usize>,
        interval: Option<Duration>,
        journal: Journal,
    ) -> (Self, Box<dyn ClientSource>, Box<dyn ClientSink>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let harness = Self {
            input: Some(input_tx),
            output: output_rx,
        };
        let source = ScriptedSource { events: input_rx };
        let sink = RecordingSink {
            outputs: output_tx,
            journal,
            closed: false,
            packet_size,
            interval,
        };
        (harness, Box::new(source), Box::new(sink))
    }

    pub fn send(&self, event: ClientEvent) {
        if let Some(input) = &self.input {
            let _ = input.send(Ok(event));
        }
    }

    pub fn fail(&self, error: voice_bridge::bridge::TransportError) {
        if let Some(input) = &self.input {
            let _ = input.send(Err(error));
        }
    }

    /// Simulates the client going away.
    pub fn disconnect(&mut self) {
        self.input = None;
    }

    pub async fn next_output(&mut self) -> ClientOutput {
        tokio::time::timeout(WAIT, self.output.recv())
            .await
            .expect("timed out waiting for client output")
            .expect("client sink dropped")
    }

    pub async fn next_signal(&mut self) -> ServerMessage {
        match self.next_output().await {
            ClientOutput::Signal(message) => message,
            other => panic!("expected signal, got {other:?}"),
        }
    }

    /// Every output delivered until the sink is released.
    pub async fn drain(&mut self) -> Vec<ClientOutput> {
        let mut outputs = Vec::new();
        while let Ok(Some(output)) = tokio::time::timeout(WAIT, self.output.recv()).await {
            outputs.push(output);
        }
        outputs
    }
}

struct ScriptedSource {
    events: mpsc::UnboundedReceiver<TransportResult<ClientEvent>>,
}

#[async_trait]
impl ClientSource for ScriptedSource {
    async fn recv(&mut self) -> TransportResult<Option<ClientEvent>> {
        match self.events.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

struct RecordingSink {
    outputs: mpsc::UnboundedSender<ClientOutput>,
    journal: Journal,
    closed: bool,
    packet_size: Option<usize>,
    interval: Option<Duration>,
}

#[async_trait]
impl ClientSink for RecordingSink {
    async fn send(&mut self, output: ClientOutput) -> TransportResult<()> {
        if self.closed {
            self.journal.record("sink.send_after_close");
        }
        self.journal.record("sink.send");
        let _ = self.outputs.send(output);
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.closed = true;
        self.journal.record("sink.close");
        Ok(())
    }

    fn audio_packet_size(&self) -> Option<usize> {
        self.packet_size
    }

    fn packet_interval(&self) -> Option<Duration> {
        self.interval
    }
}

// =============================================================================
// Conversation backend
// =============================================================================

/// Test side of one opened conversation stream.
pub struct MockStream {
    pub requests: mpsc::UnboundedReceiver<ConversationRequest>,
    pub events: Option<mpsc::UnboundedSender<ConversationResult<ConversationEvent>>>,
}

impl MockStream {
    pub async fn next_request(&mut self) -> Option<ConversationRequest> {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a backend request")
    }

    pub fn emit(&self, event: ConversationEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(Ok(event));
        }
    }

    pub fn fail(&self, error: ConversationError) {
        if let Some(events) = &self.events {
            let _ = events.send(Err(error));
        }
    }

    /// Ends the receive half.
    pub fn finish(&mut self) {
        self.events = None;
    }
}

/// Backend that hands every opened stream to the test.
pub struct MockBackend {
    streams: mpsc::UnboundedSender<MockStream>,
    journal: Journal,
    stalled: bool,
}

impl MockBackend {
    pub fn new(journal: Journal) -> (Arc<Self>, mpsc::UnboundedReceiver<MockStream>) {
        Self::build(journal, false)
    }

    /// Accepts the configuration, then never completes another send or close.
    pub fn stalled(journal: Journal) -> (Arc<Self>, mpsc::UnboundedReceiver<MockStream>) {
        Self::build(journal, true)
    }

    fn build(journal: Journal, stalled: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<MockStream>) {
        let (streams_tx, streams_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                streams: streams_tx,
                journal,
                stalled,
            }),
            streams_rx,
        )
    }
}

#[async_trait]
impl ConversationBackend for MockBackend {
    async fn open(&self, _session_id: &str) -> ConversationResult<ConversationStream> {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.streams
            .send(MockStream {
                requests: requests_rx,
                events: Some(events_tx),
            })
            .map_err(|_| ConversationError::ConnectionFailed("test ended".to_string()))?;
        self.journal.record("stream.open");

        Ok(ConversationStream {
            sender: Box::new(MockSender {
                requests: Some(requests_tx),
                journal: self.journal.clone(),
                stalled: self.stalled,
            }),
            receiver: Box::new(MockReceiver { events: events_rx }),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockSender {
    requests: Option<mpsc::UnboundedSender<ConversationRequest>>,
    journal: Journal,
    stalled: bool,
}

#[async_trait]
impl ConversationSender for MockSender {
    async fn send(&mut self, request: ConversationRequest) -> ConversationResult<()> {
        if self.stalled && !matches!(request, ConversationRequest::Configure(_)) {
            self.journal.record("stream.send_stalled");
            return std::future::pending().await;
        }
        match &self.requests {
            Some(requests) => requests
                .send(request)
                .map_err(|_| ConversationError::SendFailed("stream dropped".to_string())),
            None => Err(ConversationError::Closed),
        }
    }

    async fn close(&mut self) -> ConversationResult<()> {
        if self.stalled {
            self.journal.record("stream.close_stalled");
            return std::future::pending().await;
        }
        self.requests = None;
        self.journal.record("stream.close");
        Ok(())
    }
}

struct MockReceiver {
    events: mpsc::UnboundedReceiver<ConversationResult<ConversationEvent>>,
}

#[async_trait]
impl ConversationReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<ConversationResult<ConversationEvent>> {
        self.events.recv().await
    }
}

/// Waits for the next stream the bridge opens.
pub async fn next_stream(streams: &mut mpsc::UnboundedReceiver<MockStream>) -> MockStream {
    tokio::time::timeout(WAIT, streams.recv())
        .await
        .expect("timed out waiting for the bridge to open a stream")
        .expect("backend dropped")
}
