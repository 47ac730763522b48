//! Session bridge.
//!
//! One [`SessionBridge`] owns one client connection and one conversation
//! stream. It runs four tasks:
//!
//! - **inbound**: reads the client transport, drives negotiation, chunks
//!   media and sends it on the conversation stream
//! - **outbound**: reads conversation events and dispatches them
//! - **writer**: drains the [`OutboundQueue`] into the client transport
//! - **synthesis** (optional): turns segmented assistant text into audio
//!
//! Teardown always runs in the same order: stop inbound, close the stream's
//! send half, drain its receive half, then release the client transport.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::outbound::{DEFAULT_MAX_PENDING_OUTPUTS, OutboundQueue, QueueError, packetize};
use super::peer::PeerConnection;
use super::signaling::{ServerMessage, SignalingMessage, TranscriptRole};
use super::state::{PhaseInput, SessionPhase, SessionStatus, StreamState, TransportState};
use super::transport::{ClientEvent, ClientOutput, ClientSink, ClientSource, TransportError};
use crate::core::conversation::{
    AssistantContent, ConversationBackend, ConversationConfiguration, ConversationError,
    ConversationEvent, ConversationReceiver, ConversationRequest, ConversationSender,
    ConversationStream, DirectiveKind, StreamFormat,
};
use crate::core::segmenter::{SegmenterConfig, Sentence, SentenceSegmenter, TextFragment};
use crate::core::synthesis::Synthesizer;

/// Default inbound chunk threshold: 60 ms of 16 kHz 16-bit mono audio.
pub const DEFAULT_MIN_CHUNK_BYTES: usize = 1920;

/// Default time allowed to reach [`SessionPhase::Bridged`].
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on each teardown wait.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Default bound on each request handed to the conversation stream.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Errors and Reports
// =============================================================================

/// Session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Negotiation did not complete within {}ms", .0.as_millis())]
    NegotiationTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Stream error: {0}")]
    Stream(#[from] ConversationError),

    /// Logged and ignored; never ends a session
    #[error("Malformed signaling: {0}")]
    MalformedSignaling(String),
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client hung up or sent `disconnect`
    ClientHangup,
    /// The client transport reached end of stream
    ClientClosed,
    /// The backend ended the conversation
    EndConversation,
    /// The backend closed the stream
    StreamEnded,
    NegotiationTimeout,
    Cancelled,
    Transport(String),
    Stream(String),
}

impl From<&SessionError> for CloseReason {
    fn from(error: &SessionError) -> Self {
        match error {
            SessionError::NegotiationTimeout(_) => Self::NegotiationTimeout,
            SessionError::Transport(e) => Self::Transport(e.to_string()),
            SessionError::Stream(e) => Self::Stream(e.to_string()),
            SessionError::MalformedSignaling(e) => Self::Transport(e.clone()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientHangup => write!(f, "client hangup"),
            Self::ClientClosed => write!(f, "client closed"),
            Self::EndConversation => write!(f, "end of conversation"),
            Self::StreamEnded => write!(f, "conversation stream ended"),
            Self::NegotiationTimeout => write!(f, "negotiation timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Stream(e) => write!(f, "stream error: {e}"),
        }
    }
}

/// Summary returned when a session finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub session_id: String,
    pub reason: CloseReason,
    pub audio_chunks_sent: u64,
    pub events_received: u64,
    pub interruptions: u64,
}

// =============================================================================
// Settings
// =============================================================================

/// Per-transport session settings.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Inbound audio is sent to the backend once this many bytes are buffered
    pub min_chunk_bytes: usize,
    pub negotiation_timeout: Duration,
    pub drain_timeout: Duration,
    /// A backend that accepts no request for this long fails the session
    pub send_timeout: Duration,
    /// Client outputs allowed to wait before the client counts as stalled
    pub max_pending_outputs: usize,
    pub input_format: StreamFormat,
    pub output_format: StreamFormat,
    /// Assistant used when the client never sends `configure`
    pub default_assistant_id: Option<u64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            min_chunk_bytes: DEFAULT_MIN_CHUNK_BYTES,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_pending_outputs: DEFAULT_MAX_PENDING_OUTPUTS,
            input_format: StreamFormat::linear16(16000),
            output_format: StreamFormat::linear16(16000),
            default_assistant_id: None,
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

struct SessionShared {
    id: String,
    status: watch::Sender<SessionStatus>,
    /// Fires on the first terminal input
    draining: CancellationToken,
    /// External cancellation through [`SessionHandle`]
    cancel: CancellationToken,
    /// Fires when a teardown wait runs out of time
    hard_stop: CancellationToken,
    reason: Mutex<Option<CloseReason>>,
    outbound: OutboundQueue,
    audio_chunks_sent: AtomicU64,
    events_received: AtomicU64,
    interruptions: AtomicU64,
}

impl SessionShared {
    fn phase(&self) -> SessionPhase {
        self.status.borrow().phase
    }

    fn apply(&self, input: PhaseInput) {
        self.status.send_if_modified(|status| match status.phase.next(input) {
            Some(next) if next != status.phase => {
                debug!(session_id = %self.id, from = %status.phase, to = %next, "Session phase changed");
                status.phase = next;
                true
            }
            Some(_) => false,
            None => {
                warn!(session_id = %self.id, phase = %status.phase, ?input, "Rejected phase transition");
                false
            }
        });
    }

    /// Enters [`SessionPhase::Draining`]. Only the first call records a reason.
    fn begin_draining(&self, reason: CloseReason) {
        let mut entered = false;
        self.status.send_if_modified(|status| {
            match status.phase.next(PhaseInput::Terminal) {
                Some(next) if next != status.phase => {
                    status.phase = next;
                    entered = true;
                    true
                }
                _ => false,
            }
        });

        if entered {
            info!(session_id = %self.id, %reason, "Session draining");
            *self.reason.lock() = Some(reason);
            self.draining.cancel();
        }
    }

    /// Records the backend's acceptance. Returns `true` the first time.
    fn accept_stream(&self) -> bool {
        let mut first = false;
        self.status.send_if_modified(|status| {
            if status.stream != StreamState::Unconfigured {
                return false;
            }
            status.stream = StreamState::Configured;
            if let Some(next) = status.phase.next(PhaseInput::StreamAccepted) {
                status.phase = next;
            }
            first = true;
            true
        });
        first
    }

    fn set_transport(&self, transport: TransportState) {
        self.status.send_if_modified(|status| {
            let changed = status.transport != transport;
            status.transport = transport;
            changed
        });
    }

    fn set_stream(&self, stream: StreamState) {
        self.status.send_if_modified(|status| {
            let changed = status.stream != stream;
            status.stream = stream;
            changed
        });
    }

    fn signal(&self, message: ServerMessage) {
        self.push(ClientOutput::Signal(message));
    }

    fn push(&self, output: ClientOutput) {
        let result = self.outbound.push(output);
        self.check_delivery(result);
    }

    fn push_audio(&self, packets: Vec<Bytes>) {
        let result = self.outbound.push_audio(packets);
        self.check_delivery(result);
    }

    /// A client that lets its output back up past the limit is treated as a
    /// failed transport.
    fn check_delivery(&self, result: Result<(), QueueError>) {
        match result {
            Ok(()) | Err(QueueError::Closed) => {}
            Err(QueueError::Backlog { pending }) => {
                let error = SessionError::Transport(TransportError::Backlog(pending));
                warn!(session_id = %self.id, "{}", error);
                self.begin_draining(CloseReason::from(&error));
            }
        }
    }
}

/// Observer and cancellation handle for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    status: watch::Receiver<SessionStatus>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Cancels the session as a unit.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits until the session has reached `phase` or a later one.
    pub async fn wait_for_phase(&mut self, phase: SessionPhase) -> SessionStatus {
        let reached = self
            .status
            .wait_for(|status| status.phase >= phase)
            .await
            .map(|status| *status);
        match reached {
            Ok(status) => status,
            // Sender dropped: the last published status is final.
            Err(_) => *self.status.borrow(),
        }
    }
}

// =============================================================================
// Session Bridge
// =============================================================================

/// Bridges one client connection to one conversation stream.
pub struct SessionBridge {
    shared: Arc<SessionShared>,
    settings: SessionSettings,
    backend: Arc<dyn ConversationBackend>,
    peer: Option<Box<dyn PeerConnection>>,
    synthesis: Option<(Arc<dyn Synthesizer>, SegmenterConfig)>,
}

impl SessionBridge {
    pub fn new(
        id: impl Into<String>,
        settings: SessionSettings,
        backend: Arc<dyn ConversationBackend>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::default());
        let outbound = OutboundQueue::with_limit(settings.max_pending_outputs);
        Self {
            shared: Arc::new(SessionShared {
                id: id.into(),
                status,
                draining: CancellationToken::new(),
                cancel: CancellationToken::new(),
                hard_stop: CancellationToken::new(),
                reason: Mutex::new(None),
                outbound,
                audio_chunks_sent: AtomicU64::new(0),
                events_received: AtomicU64::new(0),
                interruptions: AtomicU64::new(0),
            }),
            settings,
            backend,
            peer: None,
            synthesis: None,
        }
    }

    /// Attaches the peer connection that handles browser signaling.
    pub fn with_peer(mut self, peer: Box<dyn PeerConnection>) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Re-synthesizes assistant text through `synthesizer`, one sentence at a time.
    pub fn with_synthesizer(
        mut self,
        synthesizer: Arc<dyn Synthesizer>,
        segmenter: SegmenterConfig,
    ) -> Self {
        self.synthesis = Some((synthesizer, segmenter));
        self
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.shared.id.clone(),
            status: self.shared.status.subscribe(),
            cancel: self.shared.cancel.clone(),
        }
    }

    /// Runs the session to completion.
    pub async fn run(
        self,
        source: Box<dyn ClientSource>,
        sink: Box<dyn ClientSink>,
    ) -> SessionReport {
        let SessionBridge {
            shared,
            settings,
            backend,
            peer,
            synthesis,
        } = self;

        shared.apply(PhaseInput::Accepted);
        info!(session_id = %shared.id, "Session accepted");

        let packet_size = sink.audio_packet_size();
        let mut writer = tokio::spawn(write_loop(sink, shared.clone()));

        let mut synthesis_control = None;
        let mut synthesis_task = None;
        if let Some((synthesizer, config)) = synthesis {
            match SentenceSegmenter::new(&config) {
                Ok((segmenter, sentences)) => {
                    let (resets_tx, resets_rx) = mpsc::channel(1);
                    synthesis_task = Some(tokio::spawn(synthesis_loop(
                        sentences,
                        resets_rx,
                        synthesizer,
                        shared.clone(),
                        packet_size,
                    )));
                    synthesis_control = Some(SynthesisControl {
                        segmenter: Arc::new(segmenter),
                        resets: resets_tx,
                    });
                }
                Err(e) => warn!(session_id = %shared.id, "Synthesis disabled: {}", e),
            }
        }
        let segmenter = synthesis_control
            .as_ref()
            .map(|control| control.segmenter.clone());

        let (stream_tx, stream_rx) = oneshot::channel();
        let mut inbound = tokio::spawn(
            InboundTask {
                shared: shared.clone(),
                settings: settings.clone(),
                backend,
                peer,
                stream_tx: Some(stream_tx),
                sender: None,
                assistant_id: settings.default_assistant_id,
                metadata: HashMap::new(),
                media_ready: false,
                buffer: BytesMut::with_capacity(settings.min_chunk_bytes),
            }
            .run(source),
        );
        let mut outbound = tokio::spawn(
            OutboundTask {
                shared: shared.clone(),
                synthesis: synthesis_control,
                packet_size,
            }
            .run(stream_rx),
        );

        supervise(&shared, settings.negotiation_timeout).await;

        // 1. Stop accepting inbound media.
        let inbound_outcome =
            join_within(&mut inbound, settings.drain_timeout, &shared, "inbound").await;
        let (sender, source, peer) = match inbound_outcome {
            Some(outcome) => (outcome.sender, Some(outcome.source), outcome.peer),
            None => (None, None, None),
        };

        // 2. Close the send half so the backend observes end of input.
        if let Some(mut sender) = sender {
            match tokio::time::timeout(settings.drain_timeout, sender.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session_id = %shared.id, "Closing conversation send half failed: {}", e)
                }
                Err(_) => {
                    warn!(session_id = %shared.id, "Conversation send half did not close in time")
                }
            }
        }

        // 3. Wait for the receive half to drain or fail.
        join_within(&mut outbound, settings.drain_timeout, &shared, "outbound").await;
        if let Some(segmenter) = &segmenter {
            segmenter.close();
        }
        if let Some(mut task) = synthesis_task {
            join_within(&mut task, settings.drain_timeout, &shared, "synthesis").await;
        }
        shared.set_stream(StreamState::Closed);

        // 4. Release the client transport once everything queued was written.
        shared.outbound.close();
        if let Some(mut sink) = join_within(&mut writer, settings.drain_timeout, &shared, "writer").await {
            match tokio::time::timeout(settings.drain_timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(session_id = %shared.id, "Closing client transport failed: {}", e)
                }
                Err(_) => warn!(session_id = %shared.id, "Client transport did not close in time"),
            }
        }
        drop(source);
        if let Some(mut peer) = peer
            && tokio::time::timeout(settings.drain_timeout, peer.close())
                .await
                .is_err()
        {
            warn!(session_id = %shared.id, "Peer connection did not close in time");
        }
        shared.set_transport(TransportState::Closed);
        shared.apply(PhaseInput::TeardownComplete);

        let reason = shared
            .reason
            .lock()
            .clone()
            .unwrap_or(CloseReason::Cancelled);
        let report = SessionReport {
            session_id: shared.id.clone(),
            reason,
            audio_chunks_sent: shared.audio_chunks_sent.load(Ordering::Relaxed),
            events_received: shared.events_received.load(Ordering::Relaxed),
            interruptions: shared.interruptions.load(Ordering::Relaxed),
        };
        info!(
            session_id = %report.session_id,
            reason = %report.reason,
            audio_chunks_sent = report.audio_chunks_sent,
            events_received = report.events_received,
            "Session closed"
        );
        report
    }
}

/// Waits for the session to end, enforcing the negotiation deadline.
async fn supervise(shared: &SessionShared, negotiation_timeout: Duration) {
    let mut status = shared.status.subscribe();

    let negotiated = tokio::select! {
        _ = shared.draining.cancelled() => return,
        _ = shared.cancel.cancelled() => {
            shared.begin_draining(CloseReason::Cancelled);
            return;
        }
        result = tokio::time::timeout(
            negotiation_timeout,
            status.wait_for(|s| s.phase >= SessionPhase::Bridged),
        ) => matches!(result, Ok(Ok(_))),
    };

    if !negotiated {
        let error = SessionError::NegotiationTimeout(negotiation_timeout);
        warn!(session_id = %shared.id, phase = %shared.phase(), "{}", error);
        shared.signal(ServerMessage::Error {
            message: error.to_string(),
        });
        shared.begin_draining(CloseReason::from(&error));
        return;
    }

    tokio::select! {
        _ = shared.draining.cancelled() => {}
        _ = shared.cancel.cancelled() => shared.begin_draining(CloseReason::Cancelled),
    }
}

/// Joins `task`, aborting it once `limit` has passed.
async fn join_within<T>(
    task: &mut JoinHandle<T>,
    limit: Duration,
    shared: &SessionShared,
    name: &str,
) -> Option<T> {
    match tokio::time::timeout(limit, &mut *task).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(session_id = %shared.id, task = name, "Session task failed: {}", e);
            None
        }
        Err(_) => {
            warn!(session_id = %shared.id, task = name, "Session task did not finish in time, stopping");
            shared.hard_stop.cancel();
            match tokio::time::timeout(limit, &mut *task).await {
                Ok(Ok(value)) => Some(value),
                _ => {
                    task.abort();
                    None
                }
            }
        }
    }
}

/// Hands `request` to the backend, failing once `limit` has passed.
async fn send_within(
    sender: &mut Box<dyn ConversationSender>,
    request: ConversationRequest,
    limit: Duration,
) -> Result<(), ConversationError> {
    match tokio::time::timeout(limit, sender.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(ConversationError::Timeout(format!(
            "backend accepted no request for {}ms",
            limit.as_millis()
        ))),
    }
}

// =============================================================================
// Inbound: client -> backend
// =============================================================================

struct InboundTask {
    shared: Arc<SessionShared>,
    settings: SessionSettings,
    backend: Arc<dyn ConversationBackend>,
    peer: Option<Box<dyn PeerConnection>>,
    stream_tx: Option<oneshot::Sender<Box<dyn ConversationReceiver>>>,
    sender: Option<Box<dyn ConversationSender>>,
    assistant_id: Option<u64>,
    metadata: HashMap<String, serde_json::Value>,
    media_ready: bool,
    buffer: BytesMut,
}

struct InboundOutcome {
    sender: Option<Box<dyn ConversationSender>>,
    source: Box<dyn ClientSource>,
    peer: Option<Box<dyn PeerConnection>>,
}

impl InboundTask {
    async fn run(mut self, mut source: Box<dyn ClientSource>) -> InboundOutcome {
        let draining = self.shared.draining.clone();

        loop {
            let event = tokio::select! {
                biased;
                _ = draining.cancelled() => break,
                event = source.recv() => event,
            };

            match event {
                Ok(Some(event)) => {
                    let flow = tokio::select! {
                        biased;
                        _ = draining.cancelled() => break,
                        flow = self.handle(event) => flow,
                    };
                    if let ControlFlow::Break(reason) = flow {
                        self.shared.begin_draining(reason);
                        break;
                    }
                }
                Ok(None) => {
                    info!(session_id = %self.shared.id, "Client transport closed");
                    self.shared.begin_draining(CloseReason::ClientClosed);
                    break;
                }
                Err(e) => {
                    let error = SessionError::from(e);
                    warn!(session_id = %self.shared.id, "{}", error);
                    self.shared.begin_draining(CloseReason::from(&error));
                    break;
                }
            }
        }

        if !self.buffer.is_empty() {
            debug!(
                session_id = %self.shared.id,
                discarded_bytes = self.buffer.len(),
                "Discarding partial inbound chunk"
            );
        }

        InboundOutcome {
            sender: self.sender,
            source,
            peer: self.peer,
        }
    }

    async fn handle(&mut self, event: ClientEvent) -> ControlFlow<CloseReason> {
        match event {
            ClientEvent::Announce { call_id } => {
                debug!(session_id = %self.shared.id, call_id, "Call announced");
                self.mark_media_ready();
                self.open_stream_if_ready().await
            }
            ClientEvent::Signal(message) => self.handle_signal(message).await,
            ClientEvent::Media(samples) => self.handle_media(samples).await,
            ClientEvent::Hangup => {
                info!(session_id = %self.shared.id, "Client hung up");
                ControlFlow::Break(CloseReason::ClientHangup)
            }
        }
    }

    async fn handle_signal(&mut self, message: SignalingMessage) -> ControlFlow<CloseReason> {
        if let Err(e) = message.validate_size() {
            self.ignore(message.kind(), e.to_string());
            return ControlFlow::Continue(());
        }
        debug!(session_id = %self.shared.id, kind = message.kind(), "Signaling message");

        match message {
            SignalingMessage::Offer { sdp } => match self.peer.as_mut() {
                Some(peer) => match peer.accept_offer(&sdp).await {
                    Ok(answer) => self.shared.signal(ServerMessage::Answer { sdp: answer }),
                    Err(e) => self.ignore("offer", e.to_string()),
                },
                None => self.ignore("offer", "transport has no peer connection".to_string()),
            },
            SignalingMessage::Answer { sdp } => match self.peer.as_mut() {
                Some(peer) => {
                    if let Err(e) = peer.apply_answer(&sdp).await {
                        self.ignore("answer", e.to_string());
                    }
                }
                None => self.ignore("answer", "transport has no peer connection".to_string()),
            },
            SignalingMessage::IceCandidate(candidate) => match self.peer.as_mut() {
                Some(peer) => {
                    if let Err(e) = peer.add_ice_candidate(&candidate).await {
                        self.ignore("ice_candidate", e.to_string());
                    }
                }
                None => self.ignore(
                    "ice_candidate",
                    "transport has no peer connection".to_string(),
                ),
            },
            SignalingMessage::Configure {
                assistant_id,
                metadata,
            } => {
                if self.sender.is_some() {
                    self.ignore("configure", "session is already configured".to_string());
                } else {
                    self.assistant_id = Some(assistant_id);
                    self.metadata = metadata;
                }
            }
            SignalingMessage::Content { text, message_id } => {
                let Some(sender) = self.sender.as_mut() else {
                    self.ignore("content", "conversation stream not open".to_string());
                    return ControlFlow::Continue(());
                };
                let id = message_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let request = ConversationRequest::Text { id, text };
                if let Err(e) = send_within(sender, request, self.settings.send_timeout).await {
                    let error = SessionError::Stream(e);
                    warn!(session_id = %self.shared.id, "{}", error);
                    return ControlFlow::Break(CloseReason::from(&error));
                }
            }
            SignalingMessage::Disconnect => {
                info!(session_id = %self.shared.id, "Client disconnected");
                return ControlFlow::Break(CloseReason::ClientHangup);
            }
        }

        if self.peer.as_ref().is_some_and(|peer| peer.is_media_ready()) {
            self.mark_media_ready();
        }
        self.open_stream_if_ready().await
    }

    async fn handle_media(&mut self, samples: Bytes) -> ControlFlow<CloseReason> {
        // Media only arrives once the path carrying it is up.
        self.mark_media_ready();
        if let ControlFlow::Break(reason) = self.open_stream_if_ready().await {
            return ControlFlow::Break(reason);
        }

        let Some(sender) = self.sender.as_mut() else {
            debug!(
                session_id = %self.shared.id,
                bytes = samples.len(),
                "Conversation stream not open, dropping audio"
            );
            return ControlFlow::Continue(());
        };

        self.buffer.extend_from_slice(&samples);
        if self.buffer.len() < self.settings.min_chunk_bytes {
            return ControlFlow::Continue(());
        }

        let chunk = self.buffer.split().freeze();
        let request = ConversationRequest::Audio(chunk);
        match send_within(sender, request, self.settings.send_timeout).await {
            Ok(()) => {
                self.shared.audio_chunks_sent.fetch_add(1, Ordering::Relaxed);
                ControlFlow::Continue(())
            }
            Err(e) => {
                let error = SessionError::Stream(e);
                warn!(session_id = %self.shared.id, "{}", error);
                ControlFlow::Break(CloseReason::from(&error))
            }
        }
    }

    fn mark_media_ready(&mut self) {
        if !self.media_ready {
            self.media_ready = true;
            self.shared.set_transport(TransportState::Connected);
            debug!(session_id = %self.shared.id, "Media path ready");
        }
    }

    /// Opens the conversation stream once an assistant is selected and media
    /// can flow. The configuration message is always the first request.
    async fn open_stream_if_ready(&mut self) -> ControlFlow<CloseReason> {
        if self.sender.is_some() || !self.media_ready {
            return ControlFlow::Continue(());
        }
        let Some(assistant_id) = self.assistant_id else {
            return ControlFlow::Continue(());
        };

        let ConversationStream {
            mut sender,
            receiver,
        } = match self.backend.open(&self.shared.id).await {
            Ok(stream) => stream,
            Err(e) => {
                let error = SessionError::Stream(e);
                error!(session_id = %self.shared.id, "Failed to open conversation stream: {}", error);
                return ControlFlow::Break(CloseReason::from(&error));
            }
        };

        let configuration = ConversationConfiguration {
            assistant_id,
            session_id: self.shared.id.clone(),
            input_format: self.settings.input_format,
            output_format: self.settings.output_format,
            metadata: std::mem::take(&mut self.metadata),
        };
        let request = ConversationRequest::Configure(configuration);
        if let Err(e) = send_within(&mut sender, request, self.settings.send_timeout).await {
            let error = SessionError::Stream(e);
            error!(session_id = %self.shared.id, "Failed to configure conversation stream: {}", error);
            return ControlFlow::Break(CloseReason::from(&error));
        }

        if let Some(stream_tx) = self.stream_tx.take()
            && stream_tx.send(receiver).is_err()
        {
            debug!(session_id = %self.shared.id, "Outbound task already stopped");
        }
        self.sender = Some(sender);
        info!(
            session_id = %self.shared.id,
            assistant_id,
            backend = self.backend.name(),
            "Conversation stream opened"
        );
        ControlFlow::Continue(())
    }

    fn ignore(&self, kind: &str, reason: String) {
        let error = SessionError::MalformedSignaling(format!("{kind}: {reason}"));
        warn!(session_id = %self.shared.id, "Ignoring signaling message. {}", error);
    }
}

// =============================================================================
// Outbound: backend -> client
// =============================================================================

struct OutboundTask {
    shared: Arc<SessionShared>,
    synthesis: Option<SynthesisControl>,
    packet_size: Option<usize>,
}

/// The outbound task's side of the synthesis pipeline.
struct SynthesisControl {
    segmenter: Arc<SentenceSegmenter>,
    /// Each reset is acknowledged with the number of sentences discarded
    resets: mpsc::Sender<oneshot::Sender<usize>>,
}

impl SynthesisControl {
    /// Discards buffered text, queued sentences and any synthesis in flight.
    /// Once this returns, no audio for text seen so far reaches the queue.
    async fn reset(&self) -> (usize, usize) {
        let discarded_bytes = self.segmenter.reset();
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.resets.send(ack_tx).await.is_err() {
            return (discarded_bytes, 0);
        }
        (discarded_bytes, ack_rx.await.unwrap_or(0))
    }
}

impl OutboundTask {
    async fn run(self, stream_rx: oneshot::Receiver<Box<dyn ConversationReceiver>>) {
        let hard_stop = self.shared.hard_stop.clone();

        let mut receiver = tokio::select! {
            biased;
            _ = hard_stop.cancelled() => return,
            receiver = stream_rx => match receiver {
                Ok(receiver) => receiver,
                // The stream was never opened.
                Err(_) => return,
            },
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = hard_stop.cancelled() => break,
                next = receiver.recv() => next,
            };

            match next {
                Some(Ok(event)) => {
                    self.shared.events_received.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        biased;
                        _ = hard_stop.cancelled() => break,
                        _ = self.dispatch(event) => {}
                    }
                }
                Some(Err(e)) => {
                    let error = SessionError::Stream(e);
                    warn!(session_id = %self.shared.id, "{}", error);
                    self.shared.begin_draining(CloseReason::from(&error));
                    break;
                }
                None => {
                    debug!(session_id = %self.shared.id, "Conversation stream ended");
                    self.shared.begin_draining(CloseReason::StreamEnded);
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, event: ConversationEvent) {
        match event {
            ConversationEvent::Configuration { conversation_id } => {
                if self.shared.accept_stream() {
                    info!(session_id = %self.shared.id, conversation_id, "Session bridged");
                    self.shared.signal(ServerMessage::Configured {
                        session_id: self.shared.id.clone(),
                    });
                } else {
                    debug!(session_id = %self.shared.id, conversation_id, "Ignoring repeated configuration");
                }
            }
            ConversationEvent::AssistantMessage {
                content: AssistantContent::Audio(audio),
                ..
            } => {
                self.shared.push_audio(packetize(audio, self.packet_size));
            }
            ConversationEvent::AssistantMessage {
                id,
                completed,
                content: AssistantContent::Text(text),
            } => {
                self.shared.signal(ServerMessage::Transcript {
                    role: TranscriptRole::Assistant,
                    text: text.clone(),
                    completed,
                });
                if let Some(synthesis) = &self.synthesis {
                    let fragment = TextFragment {
                        context_id: id,
                        text,
                        is_complete: completed,
                    };
                    if let Err(e) = synthesis.segmenter.tokenize(fragment).await {
                        warn!(session_id = %self.shared.id, "Sentence segmentation failed: {}", e);
                    }
                }
            }
            ConversationEvent::UserMessage {
                text, completed, ..
            } => {
                self.shared.signal(ServerMessage::Transcript {
                    role: TranscriptRole::User,
                    text,
                    completed,
                });
            }
            ConversationEvent::Interruption(kind) => {
                // Synthesis stops first so nothing it produces lands behind the signal.
                let (discarded_bytes, discarded_sentences) = match &self.synthesis {
                    Some(synthesis) => synthesis.reset().await,
                    None => (0, 0),
                };
                let dropped = self.shared.outbound.interrupt();
                self.shared.interruptions.fetch_add(1, Ordering::Relaxed);
                info!(
                    session_id = %self.shared.id,
                    ?kind,
                    dropped_packets = dropped,
                    discarded_sentences,
                    discarded_bytes,
                    "Interruption"
                );
            }
            ConversationEvent::Directive(DirectiveKind::EndConversation) => {
                info!(session_id = %self.shared.id, "Backend ended the conversation");
                self.shared.push(ClientOutput::Hangup);
                self.shared.begin_draining(CloseReason::EndConversation);
            }
            ConversationEvent::Directive(DirectiveKind::Unknown) => {
                debug!(session_id = %self.shared.id, "Ignoring unknown directive");
            }
        }
    }
}

// =============================================================================
// Writer and Synthesis
// =============================================================================

/// Drains the outbound queue into the client transport and hands the
/// transport back once the queue is closed and empty.
async fn write_loop(mut sink: Box<dyn ClientSink>, shared: Arc<SessionShared>) -> Box<dyn ClientSink> {
    let hard_stop = shared.hard_stop.clone();
    let mut pacer = sink.packet_interval().map(|period| {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        let (output, generation) = tokio::select! {
            biased;
            _ = hard_stop.cancelled() => break,
            output = shared.outbound.pop_with_generation() => match output {
                Some(output) => output,
                None => break,
            },
        };

        if output.is_audio()
            && let Some(pacer) = pacer.as_mut()
        {
            tokio::select! {
                biased;
                _ = hard_stop.cancelled() => break,
                _ = pacer.tick() => {}
            }
            // An interruption during the wait invalidates the packet in hand.
            if !shared.outbound.is_current(generation) {
                continue;
            }
        }

        let hangup = matches!(output, ClientOutput::Hangup);
        let result = tokio::select! {
            biased;
            _ = hard_stop.cancelled() => break,
            result = sink.send(output) => result,
        };

        if let Err(e) = result {
            let error = SessionError::Transport(e);
            warn!(session_id = %shared.id, "Failed to write to client: {}", error);
            shared.begin_draining(CloseReason::from(&error));
            break;
        }
        if hangup {
            break;
        }
    }

    shared.outbound.close();
    let dropped = shared.outbound.clear();
    if dropped > 0 {
        debug!(session_id = %shared.id, dropped, "Discarded undelivered client output");
    }
    sink
}

/// Synthesizes sentences one at a time. A reset abandons the sentence in
/// flight and everything still queued, then acknowledges.
async fn synthesis_loop(
    mut sentences: mpsc::Receiver<Sentence>,
    mut resets: mpsc::Receiver<oneshot::Sender<usize>>,
    synthesizer: Arc<dyn Synthesizer>,
    shared: Arc<SessionShared>,
    packet_size: Option<usize>,
) {
    let hard_stop = shared.hard_stop.clone();

    loop {
        let sentence = tokio::select! {
            biased;
            _ = hard_stop.cancelled() => break,
            Some(ack) = resets.recv() => {
                let _ = ack.send(discard_queued(&mut sentences));
                continue;
            }
            sentence = sentences.recv() => match sentence {
                Some(sentence) => sentence,
                None => break,
            },
        };

        let result = tokio::select! {
            biased;
            _ = hard_stop.cancelled() => break,
            Some(ack) = resets.recv() => {
                let _ = ack.send(1 + discard_queued(&mut sentences));
                continue;
            }
            result = synthesizer.synthesize(&sentence) => result,
        };

        match result {
            Ok(audio) => {
                debug!(
                    session_id = %shared.id,
                    context_id = %sentence.context_id,
                    bytes = audio.len(),
                    "Sentence synthesized"
                );
                shared.push_audio(packetize(audio, packet_size));
            }
            Err(e) => warn!(session_id = %shared.id, "Sentence synthesis failed: {}", e),
        }
    }
}

fn discard_queued(sentences: &mut mpsc::Receiver<Sentence>) -> usize {
    let mut discarded = 0;
    while sentences.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}
