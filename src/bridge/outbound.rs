//! Outbound delivery queue.
//!
//! Holds everything waiting to be written to the client. The queue keeps
//! arrival order except on interruption, which removes every audio packet
//! not yet handed to the transport. Each interruption starts a new
//! generation; packets popped under an older generation are stale.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use super::signaling::ServerMessage;
use super::transport::ClientOutput;

/// Pending outputs above which a warning is logged.
const BACKLOG_WARN_PACKETS: usize = 1500;

/// Default hard limit on pending outputs: five minutes of 20 ms packets.
pub const DEFAULT_MAX_PENDING_OUTPUTS: usize = 15_000;

/// Why an output was not queued.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Outbound queue closed")]
    Closed,

    /// The client is not draining its output
    #[error("Outbound backlog of {pending} outputs exceeds the limit")]
    Backlog { pending: usize },
}

struct QueueState {
    items: VecDeque<ClientOutput>,
    closed: bool,
    warned: bool,
    generation: u64,
}

/// Single-consumer queue feeding the session writer.
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    max_pending: usize,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING_OUTPUTS)
    }

    /// Builds a queue that refuses new output once `max_pending` items wait.
    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
                warned: false,
                generation: 0,
            }),
            notify: Notify::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// Appends `item`.
    pub fn push(&self, item: ClientOutput) -> Result<(), QueueError> {
        self.extend(std::iter::once(item), 1)
    }

    /// Appends each audio packet in order. The batch is refused as a whole
    /// when it would overflow the queue.
    pub fn push_audio(&self, packets: Vec<Bytes>) -> Result<(), QueueError> {
        let count = packets.len();
        self.extend(packets.into_iter().map(ClientOutput::Audio), count)
    }

    fn extend(
        &self,
        items: impl Iterator<Item = ClientOutput>,
        count: usize,
    ) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            let pending = state.items.len() + count;
            if pending > self.max_pending {
                return Err(QueueError::Backlog { pending });
            }
            state.items.extend(items);
            if !state.warned && state.items.len() > BACKLOG_WARN_PACKETS {
                state.warned = true;
                warn!(
                    pending = state.items.len(),
                    "Outbound queue backlog is growing, client is not keeping up"
                );
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Drops every pending audio packet, starts a new generation and queues
    /// an interruption signal.
    ///
    /// Returns the number of packets dropped.
    pub fn interrupt(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let before = state.items.len();
            state.items.retain(|item| !item.is_audio());
            let dropped = before - state.items.len();
            state.generation += 1;
            state
                .items
                .push_back(ClientOutput::Signal(ServerMessage::Interruption {}));
            state.warned = false;
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    /// Waits for the next item. Returns `None` once closed and empty.
    pub async fn pop(&self) -> Option<ClientOutput> {
        self.pop_with_generation().await.map(|(item, _)| item)
    }

    /// Like [`pop`](Self::pop), also returning the generation the item was
    /// popped under.
    pub async fn pop_with_generation(&self) -> Option<(ClientOutput, u64)> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.items.pop_front() {
                    return Some((item, state.generation));
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Whether no interruption happened since `generation` was observed.
    pub fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    /// Stops accepting items. Already queued items can still be popped.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    /// Discards everything still queued.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len();
        state.items.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `audio` into `packet_size` packets, padding the last one with
/// silence. Without a packet size the audio is passed through whole.
pub fn packetize(audio: Bytes, packet_size: Option<usize>) -> Vec<Bytes> {
    let Some(size) = packet_size.filter(|size| *size > 0) else {
        return if audio.is_empty() { Vec::new() } else { vec![audio] };
    };

    let mut packets = Vec::with_capacity(audio.len().div_ceil(size));
    let mut offset = 0;
    while offset < audio.len() {
        let end = (offset + size).min(audio.len());
        if end - offset == size {
            packets.push(audio.slice(offset..end));
        } else {
            let mut padded = BytesMut::zeroed(size);
            padded[..end - offset].copy_from_slice(&audio[offset..end]);
            packets.push(padded.freeze());
        }
        offset = end;
    }
    packets
}
