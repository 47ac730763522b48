//! AudioSocket telephony listener
//!
//! Every accepted TCP connection is one call. The first frame must announce
//! the call id, which becomes the session id; after that, audio frames flow
//! in both directions until either side hangs up.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpListener;
use tracing::{debug, info, trace, warn};

use crate::bridge::{
    ClientEvent, ClientOutput, ClientSink, ClientSource, TransportError, TransportResult,
};
use crate::core::audiosocket::{
    FRAME_BYTES, FRAME_DURATION_MS, FrameType, parse_call_id, read_frame, write_frame,
};
use crate::state::AppState;

/// Accepts calls until the application shuts down.
pub async fn serve_audiosocket(listener: TcpListener, state: Arc<AppState>) {
    let shutdown = state.shutdown_token();
    info!(address = ?listener.local_addr().ok(), "AudioSocket listener started");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept AudioSocket connection: {}", e);
                    continue;
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "Failed to disable Nagle on AudioSocket connection: {}", e);
        }

        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(%peer, "AudioSocket connection failed: {}", e);
            }
        });
    }

    info!("AudioSocket listener stopped");
}

/// Runs one call over `stream`.
///
/// The connection is dropped without a session if the uuid-announce frame
/// does not arrive within the negotiation timeout.
pub async fn handle_connection<S>(stream: S, state: Arc<AppState>) -> TransportResult<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);

    let negotiation_timeout = state.config.negotiation_timeout();
    let first = tokio::time::timeout(negotiation_timeout, read_frame(&mut reader))
        .await
        .map_err(|_| {
            TransportError::Handshake(format!(
                "no uuid frame within {}ms",
                negotiation_timeout.as_millis()
            ))
        })??;

    let call_id = match first {
        Some(frame) if frame.frame_type == FrameType::Uuid => parse_call_id(&frame.payload)?,
        Some(frame) => {
            return Err(TransportError::Handshake(format!(
                "expected uuid frame, got {}",
                frame.frame_type
            )));
        }
        None => {
            return Err(TransportError::Handshake(
                "connection closed before uuid frame".to_string(),
            ));
        }
    };
    info!(call_id = %call_id, "AudioSocket call connected");

    let bridge = state.session(call_id.clone(), state.config.audiosocket_session_settings());
    let source = AudioSocketSource::new(reader, call_id);
    let sink = AudioSocketSink::new(writer, state.config.audiosocket_pace_output);

    let report = state
        .run_session(bridge, Box::new(source), Box::new(sink))
        .await;
    info!(
        call_id = %report.session_id,
        reason = %report.reason,
        audio_chunks_sent = report.audio_chunks_sent,
        "AudioSocket call finished"
    );
    Ok(())
}

/// Read half of an AudioSocket call.
///
/// Replays the already consumed uuid frame as [`ClientEvent::Announce`] first.
pub struct AudioSocketSource<R> {
    reader: R,
    pending_announce: Option<String>,
}

impl<R> AudioSocketSource<R> {
    pub fn new(reader: R, call_id: String) -> Self {
        Self {
            reader,
            pending_announce: Some(call_id),
        }
    }
}

#[async_trait]
impl<R> ClientSource for AudioSocketSource<R>
where
    R: AsyncRead + Send + Unpin,
{
    async fn recv(&mut self) -> TransportResult<Option<ClientEvent>> {
        if let Some(call_id) = self.pending_announce.take() {
            return Ok(Some(ClientEvent::Announce { call_id }));
        }

        loop {
            let Some(frame) = read_frame(&mut self.reader).await? else {
                return Ok(None);
            };

            match frame.frame_type {
                FrameType::Audio => return Ok(Some(ClientEvent::Media(frame.payload))),
                FrameType::Silence => trace!("Skipping silence frame"),
                FrameType::Hangup => return Ok(Some(ClientEvent::Hangup)),
                FrameType::Error => {
                    let code = frame.payload.first().copied().unwrap_or_default();
                    return Err(TransportError::Remote(format!(
                        "peer sent error frame (code {code:#04x})"
                    )));
                }
                FrameType::Uuid => debug!("Ignoring repeated uuid frame"),
            }
        }
    }
}

/// Write half of an AudioSocket call.
pub struct AudioSocketSink<W: AsyncWrite> {
    writer: BufWriter<W>,
    pace_output: bool,
}

impl<W: AsyncWrite> AudioSocketSink<W> {
    pub fn new(writer: W, pace_output: bool) -> Self {
        Self {
            writer: BufWriter::new(writer),
            pace_output,
        }
    }
}

#[async_trait]
impl<W> ClientSink for AudioSocketSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn send(&mut self, output: ClientOutput) -> TransportResult<()> {
        match output {
            ClientOutput::Audio(packet) => {
                write_frame(&mut self.writer, FrameType::Audio, &packet).await?;
            }
            ClientOutput::Hangup => {
                write_frame(&mut self.writer, FrameType::Hangup, &[]).await?;
            }
            // The wire has no channel for signaling.
            ClientOutput::Signal(message) => {
                trace!(?message, "Dropping signaling output on AudioSocket");
                return Ok(());
            }
        }
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    fn audio_packet_size(&self) -> Option<usize> {
        Some(FRAME_BYTES)
    }

    fn packet_interval(&self) -> Option<Duration> {
        self.pace_output
            .then(|| Duration::from_millis(FRAME_DURATION_MS))
    }
}
